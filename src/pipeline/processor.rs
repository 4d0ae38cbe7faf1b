// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测帧处理: 计时 → 状态估计 → 延迟补偿
//! Frame processor: calibrator timing, estimator updates, compensated detections

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::config::PipelineConfig;
use crate::detection::{Detection, FrameGeometry};
use crate::telemetry::{Telemetry, TelemetryEvent};
use crate::tracking::{DelayCalibrator, FrameId, StateEstimator};

/// 帧处理器
///
/// 每帧调用顺序: `begin_frame` → `begin_processing` → (外部检测) → `finish_frame`.
pub struct FrameProcessor {
    config: PipelineConfig,
    estimator: Arc<StateEstimator>,
    calibrator: Arc<DelayCalibrator>,
    telemetry: Telemetry,
    next_frame_id: AtomicU64,
}

impl FrameProcessor {
    pub fn new(config: PipelineConfig, estimator: Arc<StateEstimator>, telemetry: Telemetry) -> Self {
        let calibrator = estimator.calibrator().clone();
        Self {
            config,
            estimator,
            calibrator,
            telemetry,
            next_frame_id: AtomicU64::new(0),
        }
    }

    pub fn estimator(&self) -> &Arc<StateEstimator> {
        &self.estimator
    }

    pub fn calibrator(&self) -> &Arc<DelayCalibrator> {
        &self.calibrator
    }

    /// 新帧到达: 分配帧ID并记录到达时间
    pub fn begin_frame(&self) -> FrameId {
        self.begin_frame_at(Instant::now())
    }

    pub fn begin_frame_at(&self, at: Instant) -> FrameId {
        let frame_id = self.next_frame_id.fetch_add(1, Ordering::Relaxed);
        self.calibrator.mark_frame_received_at(frame_id, at);
        frame_id
    }

    /// 开始检测
    pub fn begin_processing(&self, frame_id: FrameId) {
        self.calibrator.mark_processing_start_at(frame_id, Instant::now());
    }

    pub fn begin_processing_at(&self, frame_id: FrameId, at: Instant) {
        self.calibrator.mark_processing_start_at(frame_id, at);
    }

    /// 检测完成: 更新轨迹, 返回延迟补偿后的检测框
    ///
    /// 有跟踪ID的检测框平移到预测位置, 未跟踪的原样返回. 空列表也会结束计时.
    pub fn finish_frame(
        &self,
        frame_id: FrameId,
        frame_time: Option<f64>,
        geometry: FrameGeometry,
        detections: &[Detection],
    ) -> Vec<Detection> {
        self.finish_frame_at(frame_id, frame_time, geometry, detections, Instant::now())
    }

    pub fn finish_frame_at(
        &self,
        frame_id: FrameId,
        frame_time: Option<f64>,
        geometry: FrameGeometry,
        detections: &[Detection],
        now: Instant,
    ) -> Vec<Detection> {
        let evicted = self
            .estimator
            .cleanup_old_tracks_at(now, self.config.track_timeout());
        if evicted > 0 {
            debug!("清理过期轨迹 {} 条", evicted);
        }

        let center = geometry.center();
        let output = detections
            .iter()
            .map(|det| {
                let Some(track_id) = det.track_id else {
                    return det.clone();
                };
                let measured = det.center();
                let corrected =
                    self.estimator
                        .update_at(track_id, measured, frame_time, Some(center), now);
                let predicted = self
                    .estimator
                    .predict(track_id, None, Some(center))
                    .unwrap_or(corrected);

                self.telemetry.emit(TelemetryEvent::TrackPrediction {
                    track_id,
                    corrected,
                    predicted,
                });

                if self.config.compensate {
                    det.recentered(predicted)
                } else {
                    det.clone()
                }
            })
            .collect();

        self.calibrator.mark_processing_end_at(frame_id, now);
        output
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 延迟标定
//! Camera + processing latency estimation from frame lifecycle timestamps

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::config::CalibrationConfig;
use crate::telemetry::{Telemetry, TelemetryEvent};

/// 帧标识 (调用方分配, 不透明)
pub type FrameId = u64;

/// 单帧时间戳 (处理中可能未填)
#[derive(Clone, Copy, Debug, Default)]
pub struct TimingSample {
    pub received: Option<Instant>,
    pub processing_start: Option<Instant>,
    pub processing_end: Option<Instant>,
}

impl TimingSample {
    /// 处理耗时 (开始与结束都已记录时)
    pub fn processing_delay(&self) -> Option<Duration> {
        match (self.processing_start, self.processing_end) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }
}

/// 延迟估计 (秒)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DelayEstimate {
    /// 相机延迟: 固定假设值, 不从数据测量
    pub camera_delay: f64,
    /// 处理延迟: 最近样本的滑动平均
    pub processing_delay: f64,
    /// 总延迟 = 相机 + 处理
    pub total_delay: f64,
    pub calibrated: bool,
    pub samples: usize,
}

struct CalibratorState {
    pending: HashMap<FrameId, TimingSample>,
    /// 插入顺序, 用于淘汰最旧的未完成帧
    order: VecDeque<FrameId>,
    delays: VecDeque<f64>,
    estimate: DelayEstimate,
}

/// 延迟标定器 (线程安全)
pub struct DelayCalibrator {
    config: CalibrationConfig,
    state: Mutex<CalibratorState>,
    telemetry: Telemetry,
}

impl DelayCalibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self::with_telemetry(config, Telemetry::disabled())
    }

    pub fn with_telemetry(config: CalibrationConfig, telemetry: Telemetry) -> Self {
        let estimate = DelayEstimate {
            camera_delay: config.camera_delay_s,
            processing_delay: config.initial_processing_delay_s,
            total_delay: config.camera_delay_s + config.initial_processing_delay_s,
            calibrated: false,
            samples: 0,
        };
        Self {
            state: Mutex::new(CalibratorState {
                pending: HashMap::new(),
                order: VecDeque::new(),
                delays: VecDeque::with_capacity(config.window),
                estimate,
            }),
            config,
            telemetry,
        }
    }

    pub fn mark_frame_received(&self, frame_id: FrameId) {
        self.mark_frame_received_at(frame_id, Instant::now());
    }

    pub fn mark_processing_start(&self, frame_id: FrameId) {
        self.mark_processing_start_at(frame_id, Instant::now());
    }

    pub fn mark_processing_end(&self, frame_id: FrameId) {
        self.mark_processing_end_at(frame_id, Instant::now());
    }

    pub fn mark_frame_received_at(&self, frame_id: FrameId, at: Instant) {
        let mut state = self.lock();
        if state.pending.contains_key(&frame_id) {
            state.order.retain(|id| *id != frame_id);
        }
        state.pending.insert(
            frame_id,
            TimingSample {
                received: Some(at),
                ..Default::default()
            },
        );
        state.order.push_back(frame_id);

        // 上游丢帧时未完成的记录会堆积, 超过上限淘汰最旧的
        while state.order.len() > self.config.max_pending_frames.max(1) {
            if let Some(oldest) = state.order.pop_front() {
                state.pending.remove(&oldest);
            }
        }
    }

    pub fn mark_processing_start_at(&self, frame_id: FrameId, at: Instant) {
        let mut state = self.lock();
        match state.pending.get_mut(&frame_id) {
            Some(sample) => sample.processing_start = Some(at),
            None => warn!("⚠️  mark_processing_start: 未知帧 {}", frame_id),
        }
    }

    pub fn mark_processing_end_at(&self, frame_id: FrameId, at: Instant) {
        let mut state = self.lock();
        let Some(sample) = state.pending.get_mut(&frame_id) else {
            warn!("⚠️  mark_processing_end: 未知帧 {}", frame_id);
            return;
        };
        sample.processing_end = Some(at);
        let Some(delay) = sample.processing_delay() else {
            return;
        };

        // 样本已使用, 丢弃
        state.pending.remove(&frame_id);
        state.order.retain(|id| *id != frame_id);

        state.delays.push_back(delay.as_secs_f64());
        while state.delays.len() > self.config.window.max(1) {
            state.delays.pop_front();
        }

        let mean = state.delays.iter().sum::<f64>() / state.delays.len() as f64;
        let was_calibrated = state.estimate.calibrated;
        state.estimate.processing_delay = mean;
        state.estimate.total_delay = state.estimate.camera_delay + mean;
        state.estimate.samples = state.delays.len();
        state.estimate.calibrated =
            was_calibrated || state.delays.len() >= self.config.calibrated_after;

        if state.estimate.calibrated && !was_calibrated {
            info!(
                "✅ 延迟标定完成: 处理 {:.1}ms + 相机 {:.1}ms = {:.1}ms",
                mean * 1000.0,
                state.estimate.camera_delay * 1000.0,
                state.estimate.total_delay * 1000.0
            );
        }
        self.telemetry.emit(TelemetryEvent::DelayUpdated(state.estimate));
    }

    /// 当前延迟估计快照
    pub fn estimate(&self) -> DelayEstimate {
        self.lock().estimate
    }

    /// 总延迟 (秒), 状态估计器的默认预测时长
    pub fn total_delay(&self) -> f64 {
        self.lock().estimate.total_delay
    }

    pub fn is_calibrated(&self) -> bool {
        self.lock().estimate.calibrated
    }

    /// 未完成的帧数
    pub fn pending_frames(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CalibratorState> {
        // 锁中毒时继续使用内部数据, 估计值本身始终有效
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_frame(cal: &DelayCalibrator, id: FrameId, base: Instant, processing_ms: u64) {
        cal.mark_frame_received_at(id, base);
        let start = base + Duration::from_millis(5);
        cal.mark_processing_start_at(id, start);
        cal.mark_processing_end_at(id, start + Duration::from_millis(processing_ms));
    }

    #[test]
    fn test_initial_estimate_uses_assumptions() {
        let cal = DelayCalibrator::new(CalibrationConfig::default());
        let est = cal.estimate();
        assert!(!est.calibrated);
        assert!((est.total_delay - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_rolling_mean_and_calibration_flag() {
        let cal = DelayCalibrator::new(CalibrationConfig::default());
        let base = Instant::now();
        for id in 0..9 {
            run_frame(&cal, id, base, 20);
        }
        assert!(!cal.is_calibrated());

        run_frame(&cal, 9, base, 20);
        let est = cal.estimate();
        assert!(est.calibrated);
        assert_eq!(est.samples, 10);
        assert!((est.processing_delay - 0.020).abs() < 1e-9);
        assert!((est.total_delay - 0.070).abs() < 1e-9);
        assert_eq!(cal.pending_frames(), 0);
    }

    #[test]
    fn test_window_keeps_last_samples() {
        let config = CalibrationConfig {
            window: 30,
            ..Default::default()
        };
        let cal = DelayCalibrator::new(config);
        let base = Instant::now();
        for id in 0..30 {
            run_frame(&cal, id, base, 100);
        }
        for id in 30..60 {
            run_frame(&cal, id, base, 10);
        }
        let est = cal.estimate();
        assert_eq!(est.samples, 30);
        assert!((est.processing_delay - 0.010).abs() < 1e-9);
    }

    #[test]
    fn test_completed_frames_emit_delay_updates() {
        let (telemetry, rx) = Telemetry::channel(16);
        let cal = DelayCalibrator::with_telemetry(CalibrationConfig::default(), telemetry);
        let base = Instant::now();
        run_frame(&cal, 0, base, 20);

        // 未完成的帧不发送
        cal.mark_frame_received_at(1, base);
        cal.mark_processing_end_at(1, base);

        let updates: Vec<DelayEstimate> = rx
            .try_iter()
            .filter_map(|e| match e {
                TelemetryEvent::DelayUpdated(d) => Some(d),
                _ => None,
            })
            .collect();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].samples, 1);
        assert!((updates[0].total_delay - 0.070).abs() < 1e-9);
        assert_eq!(updates[0], cal.estimate());
    }

    #[test]
    fn test_unknown_frame_is_noop() {
        let cal = DelayCalibrator::new(CalibrationConfig::default());
        let before = cal.estimate();
        cal.mark_processing_start(42);
        cal.mark_processing_end(42);
        assert_eq!(cal.estimate(), before);
    }

    #[test]
    fn test_end_without_start_contributes_nothing() {
        let cal = DelayCalibrator::new(CalibrationConfig::default());
        cal.mark_frame_received(1);
        cal.mark_processing_end(1);
        assert_eq!(cal.estimate().samples, 0);
        assert_eq!(cal.pending_frames(), 1);
    }

    #[test]
    fn test_pending_frames_are_bounded() {
        let config = CalibrationConfig {
            max_pending_frames: 4,
            ..Default::default()
        };
        let cal = DelayCalibrator::new(config);
        for id in 0..10 {
            cal.mark_frame_received(id);
        }
        assert_eq!(cal.pending_frames(), 4);
        // 最旧的已被淘汰
        cal.mark_processing_start(0);
        cal.mark_processing_start(9);
    }
}

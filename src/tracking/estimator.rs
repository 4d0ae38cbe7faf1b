// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 状态估计器 (每条轨迹一个卡尔曼滤波器)
//! Per-track state estimation with latency-compensated prediction

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use super::delay::DelayCalibrator;
use super::kalman::ConstantVelocityKalman;
use crate::config::EstimatorConfig;
use crate::detection::{PixelPoint, TrackId};

// ========== 轨迹 ==========

/// 跟踪对象 (每个物理目标一个)
#[derive(Clone, Debug)]
pub struct Track {
    /// 跟踪ID
    pub id: TrackId,

    /// 卡尔曼滤波器
    filter: ConstantVelocityKalman,

    /// 修正后的位置历史
    history: VecDeque<PixelPoint>,

    /// 预测位置历史
    prediction_history: VecDeque<PixelPoint>,

    /// 最近一次更新的时间
    last_update: Instant,

    /// 最近一帧的时间戳 (秒)
    last_frame_time: Option<f64>,

    /// 稳定计数: 起始阶段已混合的预测次数
    stabilization_count: u32,
}

impl Track {
    fn new(id: TrackId, seed: PixelPoint, config: &EstimatorConfig, now: Instant) -> Self {
        let filter = ConstantVelocityKalman::new(
            (seed.x, seed.y),
            config.process_noise,
            config.measurement_noise,
            config.initial_position_variance,
            config.initial_velocity_variance,
        );
        Self {
            id,
            filter,
            history: VecDeque::with_capacity(config.history_len),
            prediction_history: VecDeque::with_capacity(config.history_len),
            last_update: now,
            last_frame_time: None,
            stabilization_count: 0,
        }
    }

    /// 由帧时间戳或墙钟时间计算时间步
    fn time_step(&mut self, frame_time: Option<f64>, now: Instant, config: &EstimatorConfig) -> f64 {
        match frame_time {
            Some(t) => {
                let dt = match self.last_frame_time {
                    Some(prev) if t > prev => t - prev,
                    _ => config.nominal_dt,
                };
                self.last_frame_time = Some(t);
                dt
            }
            None if self.history.is_empty() => config.nominal_dt,
            None => {
                let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
                elapsed.clamp(config.min_dt, config.max_dt)
            }
        }
    }

    pub fn position(&self) -> PixelPoint {
        self.filter.position().into()
    }

    pub fn velocity(&self) -> (f64, f64) {
        self.filter.velocity()
    }

    pub fn history(&self) -> impl Iterator<Item = &PixelPoint> {
        self.history.iter()
    }

    pub fn prediction_history(&self) -> impl Iterator<Item = &PixelPoint> {
        self.prediction_history.iter()
    }
}

fn push_bounded(buf: &mut VecDeque<PixelPoint>, point: PixelPoint, cap: usize) {
    buf.push_back(point);
    while buf.len() > cap.max(1) {
        buf.pop_front();
    }
}

// ========== 状态估计器 ==========

/// 多目标状态估计器
///
/// 同一跟踪ID只有一个滤波器; 所有操作在同一把锁内完成, 可在检测线程和控制线程间共享.
pub struct StateEstimator {
    config: EstimatorConfig,
    calibrator: Arc<DelayCalibrator>,
    tracks: Mutex<HashMap<TrackId, Track>>,
}

impl StateEstimator {
    pub fn new(config: EstimatorConfig, calibrator: Arc<DelayCalibrator>) -> Self {
        Self {
            config,
            calibrator,
            tracks: Mutex::new(HashMap::new()),
        }
    }

    pub fn calibrator(&self) -> &Arc<DelayCalibrator> {
        &self.calibrator
    }

    /// 用新观测更新轨迹, 返回修正后的位置
    ///
    /// 未知ID会被创建, 初始位置为 `frame_center` (速度为0), 避免首次预测从原点跳变.
    pub fn update(
        &self,
        track_id: TrackId,
        measured: PixelPoint,
        frame_time: Option<f64>,
        frame_center: Option<PixelPoint>,
    ) -> PixelPoint {
        self.update_at(track_id, measured, frame_time, frame_center, Instant::now())
    }

    pub fn update_at(
        &self,
        track_id: TrackId,
        measured: PixelPoint,
        frame_time: Option<f64>,
        frame_center: Option<PixelPoint>,
        now: Instant,
    ) -> PixelPoint {
        let config = &self.config;
        let mut tracks = self.lock();
        let track = tracks.entry(track_id).or_insert_with(|| {
            let seed = frame_center.unwrap_or_else(|| config.default_center.into());
            debug!("🆕 新轨迹 {} 初始位置 ({:.1}, {:.1})", track_id, seed.x, seed.y);
            Track::new(track_id, seed, config, now)
        });

        let dt = track.time_step(frame_time, now, config);
        track.filter.predict(dt);
        let corrected: PixelPoint = track.filter.correct((measured.x, measured.y)).into();

        track.last_update = now;
        push_bounded(&mut track.history, corrected, config.history_len);
        corrected
    }

    /// 预测 `time_offset` 秒后的位置 (默认使用当前总延迟)
    ///
    /// 不修改滤波器状态. 前几次预测会向 `frame_center` 混合以抑制新滤波器的初始偏移.
    /// 未知ID: 有 `frame_center` 时返回画面中心, 否则返回 `None` (无目标).
    pub fn predict(
        &self,
        track_id: TrackId,
        time_offset: Option<f64>,
        frame_center: Option<PixelPoint>,
    ) -> Option<PixelPoint> {
        let offset = time_offset.unwrap_or_else(|| self.calibrator.total_delay());
        let config = &self.config;
        let mut tracks = self.lock();
        let Some(track) = tracks.get_mut(&track_id) else {
            return frame_center;
        };

        let raw: PixelPoint = track.filter.project(offset).position().into();
        let predicted = match frame_center {
            Some(center) if track.stabilization_count < config.stabilization_predictions => {
                let progress =
                    track.stabilization_count as f64 / config.stabilization_predictions as f64;
                let weight = config.stabilization_weight * (1.0 - progress);
                track.stabilization_count += 1;
                raw.lerp(&center, weight)
            }
            _ => raw,
        };

        push_bounded(&mut track.prediction_history, predicted, config.history_len);
        Some(predicted)
    }

    /// 所有轨迹在当前延迟下的预测 (不做中心混合)
    pub fn get_all_predictions(&self) -> BTreeMap<TrackId, PixelPoint> {
        let offset = self.calibrator.total_delay();
        let mut tracks = self.lock();
        tracks
            .iter_mut()
            .map(|(id, track)| {
                let predicted: PixelPoint = track.filter.project(offset).position().into();
                push_bounded(&mut track.prediction_history, predicted, self.config.history_len);
                (*id, predicted)
            })
            .collect()
    }

    pub fn remove_track(&self, track_id: TrackId) -> bool {
        self.lock().remove(&track_id).is_some()
    }

    /// 删除超过 `max_age` 未更新的轨迹, 返回删除数量
    pub fn cleanup_old_tracks(&self, max_age: Duration) -> usize {
        self.cleanup_old_tracks_at(Instant::now(), max_age)
    }

    pub fn cleanup_old_tracks_at(&self, now: Instant, max_age: Duration) -> usize {
        let mut tracks = self.lock();
        let before = tracks.len();
        tracks.retain(|id, track| {
            let keep = now.saturating_duration_since(track.last_update) <= max_age;
            if !keep {
                debug!("🗑️  轨迹 {} 已过期", id);
            }
            keep
        });
        before - tracks.len()
    }

    pub fn contains(&self, track_id: TrackId) -> bool {
        self.lock().contains_key(&track_id)
    }

    pub fn track_count(&self) -> usize {
        self.lock().len()
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        let mut ids: Vec<_> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// 轨迹快照 (用于调试叠加显示)
    pub fn track(&self, track_id: TrackId) -> Option<Track> {
        self.lock().get(&track_id).cloned()
    }

    pub fn history(&self, track_id: TrackId) -> Option<Vec<PixelPoint>> {
        self.lock()
            .get(&track_id)
            .map(|t| t.history().copied().collect())
    }

    pub fn prediction_history(&self, track_id: TrackId) -> Option<Vec<PixelPoint>> {
        self.lock()
            .get(&track_id)
            .map(|t| t.prediction_history().copied().collect())
    }

    pub fn velocity(&self, track_id: TrackId) -> Option<(f64, f64)> {
        self.lock().get(&track_id).map(Track::velocity)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TrackId, Track>> {
        self.tracks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

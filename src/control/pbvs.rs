// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 基于位置的视觉伺服 (PBVS)
//! Position-based visual servoing
//!
//! 指令增量只由像素误差决定 (增益 + 单轴死区 + 指数平滑).
//! 针孔模型求出的相机坐标与深度只用于显示, 不参与控制.

use std::collections::VecDeque;

use super::law::{apply_deadzone, AngleDelta, ControlLaw, SelectionPolicy};
use crate::config::PbvsConfig;
use crate::detection::{Detection, PixelPoint};

/// 相机坐标系下的目标解算结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSolution {
    /// 相机坐标 (Xc, Yc, Zc), 米
    pub point: (f64, f64, f64),
    /// 成像平面坐标 (米)
    pub image_plane: (f64, f64),
    /// 方位角 (pan, tilt), 度
    pub bearing_deg: (f64, f64),
    /// 平滑后的深度估计
    pub depth: f64,
}

/// 跟踪误差统计 (像素, 保留一位小数)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ErrorStats {
    pub current: f64,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub is_converging: bool,
}

pub struct PbvsLaw {
    config: PbvsConfig,
    depth: f64,
    smoothed: AngleDelta,
    error_history: VecDeque<f64>,
    last_solution: Option<CameraSolution>,
}

impl PbvsLaw {
    pub fn new(config: PbvsConfig) -> Self {
        let depth = clamp_depth(config.initial_depth_m, &config);
        Self {
            error_history: VecDeque::with_capacity(config.error_history_len),
            config,
            depth,
            smoothed: AngleDelta::ZERO,
            last_solution: None,
        }
    }

    pub fn depth(&self) -> f64 {
        self.depth
    }

    pub fn last_solution(&self) -> Option<CameraSolution> {
        self.last_solution
    }

    pub fn error_history(&self) -> impl Iterator<Item = &f64> {
        self.error_history.iter()
    }

    /// 最近 N 次误差单调不增
    pub fn is_converging(&self) -> bool {
        let window = self.config.convergence_window.max(2);
        if self.error_history.len() < window {
            return false;
        }
        let recent: Vec<f64> = self
            .error_history
            .iter()
            .skip(self.error_history.len() - window)
            .copied()
            .collect();
        recent.windows(2).all(|w| w[0] >= w[1])
    }

    pub fn error_stats(&self) -> ErrorStats {
        let Some(&current) = self.error_history.back() else {
            return ErrorStats::default();
        };
        let n = self.error_history.len() as f64;
        let sum: f64 = self.error_history.iter().sum();
        let min = self.error_history.iter().copied().fold(f64::INFINITY, f64::min);
        let max = self.error_history.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        ErrorStats {
            current: round1(current),
            average: round1(sum / n),
            min: round1(min),
            max: round1(max),
            is_converging: self.is_converging(),
        }
    }

    fn record_error(&mut self, error: f64) {
        if self.error_history.len() >= self.config.error_history_len.max(1) {
            self.error_history.pop_front();
        }
        self.error_history.push_back(error);
    }

    /// 根据目标尺寸平滑更新深度
    fn update_depth(&mut self, w: f64, h: f64) {
        if w <= 0.0 || h <= 0.0 {
            return;
        }
        let avg_size = (w + h) / 2.0;
        let estimated = clamp_depth(self.config.depth_scale / avg_size, &self.config);
        let b = self.config.depth_blend.clamp(0.0, 1.0);
        self.depth = clamp_depth((1.0 - b) * self.depth + b * estimated, &self.config);
    }

    fn solve(&self, target: PixelPoint, optical_center: PixelPoint) -> CameraSolution {
        let (sx, sy) = self.config.pixels_per_meter;
        let z = self.depth;
        let xc = z * (target.x - optical_center.x) / sx;
        let yc = z * (target.y - optical_center.y) / sy;
        let f = self.config.focal_length_m;
        CameraSolution {
            point: (xc, yc, z),
            image_plane: (f * xc / z, f * yc / z),
            bearing_deg: (xc.atan2(z).to_degrees(), yc.atan2(z).to_degrees()),
            depth: z,
        }
    }

    fn smooth_axis(&self, raw: f64, prev: f64) -> f64 {
        let s = self.config.smoothing.clamp(0.0, 1.0);
        (1.0 - s) * raw + s * prev
    }
}

impl ControlLaw for PbvsLaw {
    fn name(&self) -> &'static str {
        "PBVS"
    }

    fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy::LargestArea
    }

    fn compute(&mut self, target: &Detection, frame_center: PixelPoint) -> AngleDelta {
        let point = target.center();
        let dx = point.x - frame_center.x;
        let dy = point.y - frame_center.y;
        self.record_error(dx.hypot(dy));

        // 显示用的三维解算
        self.update_depth(target.w, target.h);
        self.last_solution = Some(self.solve(point, frame_center));

        let ex = apply_deadzone(dx, self.config.deadzone_px);
        let ey = apply_deadzone(dy, self.config.deadzone_px);
        let pan = if ex == 0.0 {
            0.0
        } else {
            self.smooth_axis(-self.config.gain * ex, self.smoothed.pan)
        };
        let tilt = if ey == 0.0 {
            0.0
        } else {
            self.smooth_axis(-self.config.gain * ey, self.smoothed.tilt)
        };
        self.smoothed = AngleDelta::new(pan, tilt);
        self.smoothed
    }

    fn reset(&mut self) {
        self.error_history.clear();
        self.depth = clamp_depth(self.config.initial_depth_m, &self.config);
        self.smoothed = AngleDelta::ZERO;
        self.last_solution = None;
    }
}

fn clamp_depth(z: f64, config: &PbvsConfig) -> f64 {
    let (lo, hi) = config.depth_limits;
    z.clamp(lo.min(hi), hi.max(lo))
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    const CENTER: PixelPoint = PixelPoint::new(320.0, 240.0);

    fn boxed_at(cx: f64, cy: f64, size: f64) -> Detection {
        Detection::new(cx - size / 2.0, cy - size / 2.0, size, size, 0.9, 0)
    }

    fn unsmoothed() -> PbvsConfig {
        PbvsConfig {
            smoothing: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_deadzone_gives_zero_delta() {
        let mut law = PbvsLaw::new(PbvsConfig::default());
        let d = law.compute(&boxed_at(323.0, 236.0, 40.0), CENTER);
        assert!(d.is_zero());
        // 仍然记录误差
        assert_eq!(law.error_stats().current, 5.0);
    }

    #[test]
    fn test_deadzone_is_per_axis() {
        let mut law = PbvsLaw::new(unsmoothed());
        let d = law.compute(&boxed_at(420.0, 242.0, 40.0), CENTER);
        assert!((d.pan - -2.0).abs() < 1e-9);
        assert_eq!(d.tilt, 0.0);
    }

    #[test]
    fn test_exponential_smoothing() {
        let mut law = PbvsLaw::new(PbvsConfig::default());
        let target = boxed_at(420.0, 240.0, 40.0);
        let first = law.compute(&target, CENTER);
        assert!((first.pan - -0.4).abs() < 1e-9);
        let second = law.compute(&target, CENTER);
        assert!((second.pan - (0.2 * -2.0 + 0.8 * -0.4)).abs() < 1e-9);
    }

    #[test]
    fn test_depth_only_affects_display() {
        let mut near = PbvsLaw::new(PbvsConfig::default());
        let mut far = PbvsLaw::new(PbvsConfig::default());
        for i in 0..20 {
            let x = 500.0 - i as f64 * 5.0;
            let a = near.compute(&boxed_at(x, 100.0, 400.0), CENTER);
            let b = far.compute(&boxed_at(x, 100.0, 10.0), CENTER);
            assert!((a.pan - b.pan).abs() < 1e-12);
            assert!((a.tilt - b.tilt).abs() < 1e-12);
        }
        assert!(near.depth() < far.depth());
        let (ns, fs) = (near.last_solution().unwrap(), far.last_solution().unwrap());
        assert!(ns.point.0.abs() < fs.point.0.abs());
    }

    #[test]
    fn test_depth_is_clamped() {
        let mut law = PbvsLaw::new(PbvsConfig {
            depth_blend: 1.0,
            ..Default::default()
        });
        law.compute(&boxed_at(400.0, 240.0, 1.0), CENTER);
        assert_eq!(law.depth(), 5.0);
        law.compute(&boxed_at(400.0, 240.0, 10_000.0), CENTER);
        assert_eq!(law.depth(), 0.2);
    }

    #[test]
    fn test_solution_bearing() {
        let mut law = PbvsLaw::new(unsmoothed());
        // Z=1, 800 px/m: 800 px 偏移 = 1 m = 45°
        law.compute(&Detection::new(1120.0, 240.0, 0.0, 0.0, 0.9, 0), CENTER);
        let s = law.last_solution().unwrap();
        assert!((s.point.0 - 1.0).abs() < 1e-9);
        assert!((s.bearing_deg.0 - 45.0).abs() < 1e-9);
        assert_eq!(s.depth, 1.0);
    }

    #[test]
    fn test_error_stats_and_convergence() {
        let mut law = PbvsLaw::new(PbvsConfig::default());
        for x in [400.0, 380.0, 360.0, 350.0, 340.0] {
            law.compute(&boxed_at(x, 240.0, 40.0), CENTER);
        }
        let stats = law.error_stats();
        assert_eq!(stats.current, 20.0);
        assert_eq!(stats.max, 80.0);
        assert_eq!(stats.min, 20.0);
        assert_eq!(stats.average, 46.0);
        assert!(stats.is_converging);

        law.compute(&boxed_at(420.0, 240.0, 40.0), CENTER);
        assert!(!law.error_stats().is_converging);

        law.reset();
        assert_eq!(law.error_stats(), ErrorStats::default());
        assert_eq!(law.depth(), 1.0);
    }

    #[test]
    fn test_error_history_is_bounded() {
        let mut law = PbvsLaw::new(PbvsConfig::default());
        for _ in 0..100 {
            law.compute(&boxed_at(400.0, 240.0, 40.0), CENTER);
        }
        assert_eq!(law.error_history().count(), 30);
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 基于图像的视觉伺服 (IBVS)
//!
//! 每轴比例控制: delta = -gain × (target - center)

use super::law::{apply_deadzone, AngleDelta, ControlLaw, SelectionPolicy};
use crate::config::IbvsConfig;
use crate::detection::{Detection, PixelPoint};

pub struct IbvsLaw {
    config: IbvsConfig,
}

impl IbvsLaw {
    pub fn new(config: IbvsConfig) -> Self {
        Self { config }
    }

    /// 由像素误差计算角度增量
    pub fn delta_for(&self, target: PixelPoint, frame_center: PixelPoint) -> AngleDelta {
        let dx = apply_deadzone(target.x - frame_center.x, self.config.deadzone_px);
        let dy = apply_deadzone(target.y - frame_center.y, self.config.deadzone_px);
        AngleDelta::new(-self.config.pan_gain * dx, -self.config.tilt_gain * dy)
    }
}

impl ControlLaw for IbvsLaw {
    fn name(&self) -> &'static str {
        "IBVS"
    }

    fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy::HighestConfidence
    }

    fn compute(&mut self, target: &Detection, frame_center: PixelPoint) -> AngleDelta {
        self.delta_for(target.center(), frame_center)
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    const CENTER: PixelPoint = PixelPoint::new(320.0, 240.0);

    #[test]
    fn test_proportional_and_signed() {
        let law = IbvsLaw::new(IbvsConfig::default());
        let d = law.delta_for(PixelPoint::new(420.0, 190.0), CENTER);
        assert!((d.pan - -2.0).abs() < 1e-9);
        assert!((d.tilt - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_deadzone_per_axis() {
        let law = IbvsLaw::new(IbvsConfig::default());
        assert!(law.delta_for(PixelPoint::new(323.0, 236.0), CENTER).is_zero());
        let d = law.delta_for(PixelPoint::new(323.0, 140.0), CENTER);
        assert_eq!(d.pan, 0.0);
        assert!(d.tilt > 0.0);
    }

    #[test]
    fn test_compute_uses_box_center() {
        let mut law = IbvsLaw::new(IbvsConfig::default());
        let det = Detection::new(400.0, 230.0, 40.0, 20.0, 0.9, 0);
        let d = law.compute(&det, CENTER);
        assert!((d.pan - -2.0).abs() < 1e-9);
        assert_eq!(d.tilt, 0.0);
    }
}

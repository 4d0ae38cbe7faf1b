// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 控制律公共接口与目标选择
//! Control-law seam and target selection shared by IBVS / PBVS

use tracing::{debug, info};

use crate::detection::{Detection, PixelPoint, TrackId};

/// 角度增量 (度)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AngleDelta {
    pub pan: f64,
    pub tilt: f64,
}

impl AngleDelta {
    pub const ZERO: AngleDelta = AngleDelta { pan: 0.0, tilt: 0.0 };

    pub const fn new(pan: f64, tilt: f64) -> Self {
        Self { pan, tilt }
    }

    pub fn is_zero(&self) -> bool {
        self.pan == 0.0 && self.tilt == 0.0
    }
}

/// 控制律接口 (IBVS / PBVS)
///
/// 输入: 目标检测框 + 画面中心; 输出: 角度增量, 交给网关 `move_by`.
pub trait ControlLaw: Send {
    /// 名称 (日志与遥测)
    fn name(&self) -> &'static str;

    /// 未锁定目标时的选择策略
    fn selection_policy(&self) -> SelectionPolicy;

    /// 计算一次角度增量
    fn compute(&mut self, target: &Detection, frame_center: PixelPoint) -> AngleDelta;

    /// 清空内部状态 (开始跟踪时调用)
    fn reset(&mut self);
}

impl<L: ControlLaw + ?Sized> ControlLaw for Box<L> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn selection_policy(&self) -> SelectionPolicy {
        (**self).selection_policy()
    }

    fn compute(&mut self, target: &Detection, frame_center: PixelPoint) -> AngleDelta {
        (**self).compute(target, frame_center)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

/// 目标选择策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// 置信度最高 (IBVS)
    HighestConfidence,
    /// 面积最大 (PBVS)
    LargestArea,
}

impl SelectionPolicy {
    /// 按策略挑选检测框, 相同时取靠前的一个
    pub fn select<'a>(&self, detections: &'a [Detection]) -> Option<&'a Detection> {
        let mut best: Option<&Detection> = None;
        for det in detections {
            let better = match best {
                None => true,
                Some(b) => match self {
                    SelectionPolicy::HighestConfidence => det.confidence > b.confidence,
                    SelectionPolicy::LargestArea => det.area() > b.area(),
                },
            };
            if better {
                best = Some(det);
            }
        }
        best
    }
}

/// 目标锁定状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetLock {
    /// 未锁定, 每次按策略选择
    #[default]
    Any,
    /// 调用方指定: 目标消失时保持不动
    Explicit(TrackId),
    /// 按策略自动采用: 目标消失时释放并重新选择
    Adopted(TrackId),
}

impl TargetLock {
    pub fn from_request(track_id: Option<TrackId>) -> Self {
        match track_id {
            Some(id) => TargetLock::Explicit(id),
            None => TargetLock::Any,
        }
    }

    pub fn track_id(&self) -> Option<TrackId> {
        match self {
            TargetLock::Any => None,
            TargetLock::Explicit(id) | TargetLock::Adopted(id) => Some(*id),
        }
    }

    /// 从本帧检测中选出跟踪目标, 必要时更新锁定状态
    pub fn select<'a>(
        &mut self,
        detections: &'a [Detection],
        policy: SelectionPolicy,
    ) -> Option<&'a Detection> {
        match *self {
            TargetLock::Explicit(id) => return find_track(detections, id),
            TargetLock::Adopted(id) => {
                if let Some(det) = find_track(detections, id) {
                    return Some(det);
                }
                debug!("目标 #{} 丢失, 重新选择", id);
                *self = TargetLock::Any;
            }
            TargetLock::Any => {}
        }

        let chosen = policy.select(detections)?;
        if let Some(id) = chosen.track_id {
            info!("🎯 自动锁定目标 #{}", id);
            *self = TargetLock::Adopted(id);
        }
        Some(chosen)
    }
}

fn find_track(detections: &[Detection], id: TrackId) -> Option<&Detection> {
    detections.iter().find(|d| d.track_id == Some(id))
}

/// 单轴死区: |error| < deadzone 视为 0
pub(crate) fn apply_deadzone(error: f64, deadzone: f64) -> f64 {
    if error.abs() < deadzone {
        0.0
    } else {
        error
    }
}

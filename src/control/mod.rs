// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 视觉伺服控制 (Visual Servo Control)
//!
//! 两种控制律共用同一接口, 输出都交给舵机网关:
//! - IBVS: 像素误差比例控制, 选择置信度最高的目标
//! - PBVS: 像素误差 + 死区 + 平滑, 附带三维解算 (仅显示), 选择面积最大的目标

pub mod controller;
pub mod ibvs;
pub mod law;
pub mod pbvs;

pub use controller::{TrackingState, VisualServoController};
pub use ibvs::IbvsLaw;
pub use law::{AngleDelta, ControlLaw, SelectionPolicy, TargetLock};
pub use pbvs::{CameraSolution, ErrorStats, PbvsLaw};

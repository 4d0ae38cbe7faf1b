// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 配置参数
pub mod control; // 视觉伺服控制律与控制循环
pub mod detection; // 检测数据结构
pub mod pipeline; // 检测帧处理流水线
pub mod servo; // 舵机网关
pub mod telemetry; // 遥测事件与日志
pub mod tracking; // 状态估计与延迟标定

pub use crate::config::PanTiltConfig;
pub use crate::control::{
    AngleDelta, ControlLaw, IbvsLaw, PbvsLaw, TrackingState, VisualServoController,
};
pub use crate::detection::{Detection, FrameGeometry, PixelPoint, TrackId};
pub use crate::pipeline::FrameProcessor;
pub use crate::servo::{ServoError, ServoGateway, ServoLink};
pub use crate::telemetry::{init_logging, LinkStatus, Telemetry, TelemetryEvent};
pub use crate::tracking::{DelayCalibrator, DelayEstimate, StateEstimator};

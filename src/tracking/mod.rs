// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 跟踪与延迟补偿 (Tracking & Latency Compensation)
///
/// - Kalman:     匀速模型滤波器, 纯函数前向投影
/// - Estimator:  每条轨迹的状态估计与延迟补偿预测
/// - Delay:      由帧时间戳测量处理延迟, 给出总延迟
pub mod delay;
pub mod estimator;
pub mod kalman;

pub use delay::{DelayCalibrator, DelayEstimate, FrameId, TimingSample};
pub use estimator::{StateEstimator, Track};
pub use kalman::{ConstantVelocityKalman, Projection};

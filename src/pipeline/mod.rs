// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测处理流水线 (Detection Pipeline)
///
/// 采集线程: begin_frame → 检测器 → finish_frame → 控制器 set_detections
pub mod processor;

pub use processor::FrameProcessor;

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测数据 (Detection Records)
///
/// 外部检测器的输出格式, 核心只读取, 不修改
pub mod types;

pub use types::{Detection, FrameGeometry, PixelPoint, TrackId, UNTRACKED};

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 舵机模块 (Servo)
//!
//! - `gateway`: 网关, 执行器的唯一持有者
//! - `link`: 物理链路 (串口 / 录制)
//! - `command`: 指令编码

pub mod command;
pub mod error;
pub mod gateway;
pub mod link;

pub use error::ServoError;
pub use gateway::{ServoGateway, ServoState};
pub use link::{RecordingHandle, RecordingLink, SerialLink, ServoLink};

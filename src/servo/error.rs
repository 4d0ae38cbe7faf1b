// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use thiserror::Error;

/// 舵机链路错误
#[derive(Debug, Error)]
pub enum ServoError {
    #[error("servo link is not connected")]
    NotConnected,

    #[error("failed to open {port}: {source}")]
    Open {
        port: String,
        #[source]
        source: std::io::Error,
    },

    #[error("write to servo link failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("actuator {0} already has a gateway")]
    AlreadyOwned(String),
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 遥测与日志
//! Telemetry events for the presentation layer + tracing subscriber setup
//!
//! 核心只发送事件, 从不等待接收方: 通道满或无人接收时直接丢弃.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing_subscriber::{fmt, EnvFilter};

use crate::detection::{PixelPoint, TrackId};
use crate::tracking::DelayEstimate;

/// 连接状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkStatus {
    Connected,
    /// 已连接但最近一次写入失败
    Degraded,
    Disconnected,
}

/// 遥测事件 (核心 → 显示层)
#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryEvent {
    /// 指令被接受后的当前角度
    AnglesChanged { pan: f64, tilt: f64 },
    /// 连接状态变化
    Connectivity(LinkStatus),
    /// 单条轨迹的修正位置与延迟补偿后的预测位置
    TrackPrediction {
        track_id: TrackId,
        corrected: PixelPoint,
        predicted: PixelPoint,
    },
    /// 控制循环的一次输出
    TrackingUpdate {
        law: &'static str,
        target: PixelPoint,
        pan: f64,
        tilt: f64,
    },
    /// 延迟估计刷新
    DelayUpdated(DelayEstimate),
}

/// 遥测发送端 (可克隆, 默认不发送)
#[derive(Clone, Debug, Default)]
pub struct Telemetry {
    tx: Option<Sender<TelemetryEvent>>,
}

impl Telemetry {
    /// 不发送任何事件
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// 创建有界通道, 返回发送端与接收端
    pub fn channel(capacity: usize) -> (Self, Receiver<TelemetryEvent>) {
        let (tx, rx) = bounded(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn emit(&self, event: TelemetryEvent) {
        if let Some(tx) = &self.tx {
            if let Err(TrySendError::Disconnected(_)) = tx.try_send(event) {
                tracing::trace!("遥测接收端已关闭");
            }
        }
    }
}

/// 安装全局日志订阅器 (默认 info, 可用 RUST_LOG 覆盖)
///
/// 重复调用是安全的, 只有第一次生效.
pub fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_names(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_sink_drops_events() {
        let telemetry = Telemetry::disabled();
        telemetry.emit(TelemetryEvent::AnglesChanged { pan: 1.0, tilt: 2.0 });
        assert!(!telemetry.is_enabled());
    }

    #[test]
    fn test_full_channel_never_blocks() {
        let (telemetry, rx) = Telemetry::channel(1);
        telemetry.emit(TelemetryEvent::Connectivity(LinkStatus::Connected));
        telemetry.emit(TelemetryEvent::Connectivity(LinkStatus::Disconnected));
        assert_eq!(
            rx.try_recv().unwrap(),
            TelemetryEvent::Connectivity(LinkStatus::Connected)
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (telemetry, rx) = Telemetry::channel(4);
        drop(rx);
        telemetry.emit(TelemetryEvent::AnglesChanged { pan: 0.0, tilt: 0.0 });
    }
}

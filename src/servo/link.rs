// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 舵机物理链路
//! Byte links to the servo controller board

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::command;
use super::error::ServoError;

/// 物理链路接口
///
/// 网关持有链路并在锁内调用, 实现不需要自己加锁.
pub trait ServoLink: Send {
    /// 打开链路
    fn open(&mut self) -> Result<(), ServoError>;

    /// 写入一行指令 (已包含换行符)
    fn write_line(&mut self, line: &str) -> Result<(), ServoError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// 链路描述 (日志用)
    fn describe(&self) -> String;
}

// ========== 串口链路 ==========

/// 串口链路 (Arduino 等控制板)
pub struct SerialLink {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialLink {
    pub fn new(port_name: impl Into<String>, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout,
            port: None,
        }
    }
}

impl ServoLink for SerialLink {
    fn open(&mut self) -> Result<(), ServoError> {
        if self.port.is_some() {
            return Ok(());
        }
        let port = serialport::new(&self.port_name, self.baud_rate)
            .timeout(self.timeout)
            .open()
            .map_err(|e| ServoError::Open {
                port: self.port_name.clone(),
                source: e.into(),
            })?;
        self.port = Some(port);
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<(), ServoError> {
        let port = self.port.as_mut().ok_or(ServoError::NotConnected)?;
        port.write_all(line.as_bytes())?;
        port.flush()?;
        Ok(())
    }

    fn close(&mut self) {
        self.port = None;
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn describe(&self) -> String {
        format!("{} ({} baud)", self.port_name, self.baud_rate)
    }
}

// ========== 录制链路 ==========

/// 内存录制链路: 不接硬件, 记录发送的每一行
///
/// 用于 `--dry-run` 与测试. 克隆 [`RecordingHandle`] 可在外部查看记录或注入故障.
pub struct RecordingLink {
    name: String,
    open: bool,
    shared: Arc<RecordingShared>,
}

#[derive(Default)]
struct RecordingShared {
    lines: Mutex<Vec<String>>,
    fail_open: AtomicBool,
    fail_writes: AtomicBool,
}

/// 录制链路的外部句柄
#[derive(Clone)]
pub struct RecordingHandle {
    shared: Arc<RecordingShared>,
}

impl RecordingLink {
    pub fn new(name: impl Into<String>) -> (Self, RecordingHandle) {
        let shared = Arc::new(RecordingShared::default());
        let link = Self {
            name: name.into(),
            open: false,
            shared: shared.clone(),
        };
        (link, RecordingHandle { shared })
    }
}

impl ServoLink for RecordingLink {
    fn open(&mut self) -> Result<(), ServoError> {
        if self.shared.fail_open.load(Ordering::Relaxed) {
            return Err(ServoError::Open {
                port: self.name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "port unavailable"),
            });
        }
        self.open = true;
        Ok(())
    }

    fn write_line(&mut self, line: &str) -> Result<(), ServoError> {
        if !self.open {
            return Err(ServoError::NotConnected);
        }
        if self.shared.fail_writes.load(Ordering::Relaxed) {
            return Err(ServoError::Write(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "injected write failure",
            )));
        }
        self.shared
            .lines
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(line.to_string());
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn describe(&self) -> String {
        format!("{} (recording)", self.name)
    }
}

impl RecordingHandle {
    /// 已发送的所有行
    pub fn lines(&self) -> Vec<String> {
        self.shared
            .lines
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// 已发送的角度指令
    pub fn commands(&self) -> Vec<(f64, f64)> {
        self.lines().iter().filter_map(|l| command::decode(l)).collect()
    }

    pub fn last_command(&self) -> Option<(f64, f64)> {
        self.commands().last().copied()
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.shared.fail_open.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.shared.fail_writes.store(fail, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_link_requires_open() {
        let (mut link, handle) = RecordingLink::new("mock");
        assert!(matches!(link.write_line("P1.0T1.0\n"), Err(ServoError::NotConnected)));
        link.open().unwrap();
        link.write_line("P1.0T2.0\n").unwrap();
        assert_eq!(handle.last_command(), Some((1.0, 2.0)));
    }

    #[test]
    fn test_recording_link_fault_injection() {
        let (mut link, handle) = RecordingLink::new("mock");
        handle.set_fail_open(true);
        assert!(link.open().is_err());
        handle.set_fail_open(false);
        link.open().unwrap();
        handle.set_fail_writes(true);
        assert!(matches!(link.write_line("P0.0T0.0\n"), Err(ServoError::Write(_))));
        assert!(handle.lines().is_empty());
    }

    #[test]
    fn test_serial_link_write_without_open() {
        let mut link = SerialLink::new("/dev/does-not-exist", 115_200, Duration::from_millis(10));
        assert!(!link.is_open());
        assert!(matches!(link.write_line("P0.0T0.0\n"), Err(ServoError::NotConnected)));
    }
}

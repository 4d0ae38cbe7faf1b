// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 视觉伺服控制器 (Visual Servo Controller)
//!
//! 后台线程以固定频率读取最新检测结果, 由控制律算出角度增量后交给网关.
//! 检测输入与控制循环互不等待: 总是使用最近一次写入的检测.
//!
//! 状态机: Idle → Tracking (后台线程运行) → Idle (stop_tracking / drop)

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, select, tick, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use super::law::{AngleDelta, ControlLaw, TargetLock};
use crate::config::ControllerConfig;
use crate::detection::{Detection, FrameGeometry, PixelPoint, TrackId};
use crate::servo::ServoGateway;
use crate::telemetry::{Telemetry, TelemetryEvent};

/// 控制器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    Idle,
    Tracking,
}

/// 最新检测 (后写覆盖前写)
struct TargetBoard {
    detections: Vec<Detection>,
    received_at: Option<Instant>,
    frame_center: PixelPoint,
}

/// 控制线程与调用方共享的部分
struct ControlCore<L> {
    law: Mutex<L>,
    lock: Mutex<TargetLock>,
    board: Mutex<TargetBoard>,
    gateway: Arc<ServoGateway>,
    telemetry: Telemetry,
    config: ControllerConfig,
}

struct Worker {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct VisualServoController<L: ControlLaw + 'static> {
    core: Arc<ControlCore<L>>,
    worker: Mutex<Option<Worker>>,
}

impl<L: ControlLaw + 'static> VisualServoController<L> {
    pub fn new(
        law: L,
        gateway: Arc<ServoGateway>,
        config: ControllerConfig,
        telemetry: Telemetry,
    ) -> Self {
        info!(
            "🎯 {} 控制器初始化: {:.0}Hz, 画面 {}x{}",
            law.name(),
            config.tick_hz,
            config.frame.width,
            config.frame.height
        );
        let board = TargetBoard {
            detections: Vec::new(),
            received_at: None,
            frame_center: config.frame.center(),
        };
        Self {
            core: Arc::new(ControlCore {
                law: Mutex::new(law),
                lock: Mutex::new(TargetLock::Any),
                board: Mutex::new(board),
                gateway,
                telemetry,
                config,
            }),
            worker: Mutex::new(None),
        }
    }

    /// 开始跟踪 (`None` 表示按策略自动选择)
    ///
    /// 已在跟踪时只更新目标, 不会再启动第二个线程.
    pub fn start_tracking(&self, target_id: Option<TrackId>) {
        let mut worker = lock(&self.worker);
        *lock(&self.core.lock) = TargetLock::from_request(target_id);

        if worker.is_some() {
            info!("跟踪目标更新: {}", describe_target(target_id));
            return;
        }

        lock(&self.core.law).reset();
        match self.spawn_worker() {
            Ok(w) => *worker = Some(w),
            Err(e) => {
                error!("❌ 控制线程启动失败: {}", e);
                return;
            }
        }
        info!(
            "▶️  {} 开始跟踪: {}",
            lock(&self.core.law).name(),
            describe_target(target_id)
        );
    }

    /// 停止跟踪, 可重复调用
    ///
    /// 在限定时间内等待线程退出; 超时视为"已请求停止", 线程稍后自行结束.
    pub fn stop_tracking(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };

        worker.running.store(false, Ordering::SeqCst);
        let _ = worker.stop_tx.send(());
        match worker.done_rx.recv_timeout(self.core.config.join_timeout()) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                let _ = worker.handle.join();
                info!("⏹️  跟踪已停止");
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("⚠️  控制线程未在超时内退出, 将在下一周期结束");
            }
        }
    }

    pub fn state(&self) -> TrackingState {
        if lock(&self.worker).is_some() {
            TrackingState::Tracking
        } else {
            TrackingState::Idle
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.state() == TrackingState::Tracking
    }

    /// 写入最新一帧的检测结果
    pub fn set_detections(&self, detections: Vec<Detection>) {
        let mut board = lock(&self.core.board);
        board.detections = detections;
        board.received_at = Some(Instant::now());
    }

    /// 修改画面尺寸, 画面中心 (PBVS 光心) 随之更新
    pub fn set_frame_size(&self, width: u32, height: u32) {
        let center = FrameGeometry::new(width, height).center();
        lock(&self.core.board).frame_center = center;
        info!("画面中心更新为 ({:.0}, {:.0})", center.x, center.y);
    }

    pub fn frame_center(&self) -> PixelPoint {
        lock(&self.core.board).frame_center
    }

    pub fn target_lock(&self) -> TargetLock {
        *lock(&self.core.lock)
    }

    pub fn gateway(&self) -> &Arc<ServoGateway> {
        &self.core.gateway
    }

    /// 访问控制律 (读取诊断信息)
    pub fn with_law<R>(&self, f: impl FnOnce(&L) -> R) -> R {
        f(&lock(&self.core.law))
    }

    /// 同步执行一个控制周期 (不需要后台线程)
    pub fn step(&self) -> Option<AngleDelta> {
        self.core.step()
    }

    fn spawn_worker(&self) -> std::io::Result<Worker> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let running = Arc::new(AtomicBool::new(true));

        let core = self.core.clone();
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("servo-control".to_string())
            .spawn(move || {
                core.run(&flag, &stop_rx);
                let _ = done_tx.send(());
            })?;

        Ok(Worker {
            stop_tx,
            done_rx,
            running,
            handle,
        })
    }
}

impl<L: ControlLaw + 'static> Drop for VisualServoController<L> {
    fn drop(&mut self) {
        self.stop_tracking();
    }
}

impl<L: ControlLaw> ControlCore<L> {
    fn run(&self, running: &AtomicBool, stop_rx: &Receiver<()>) {
        debug!("控制线程启动");
        let ticker = tick(self.config.tick_interval());
        loop {
            select! {
                recv(stop_rx) -> _ => break,
                recv(ticker) -> _ => {}
            }
            if !running.load(Ordering::SeqCst) {
                break;
            }
            self.step();
        }
        debug!("控制线程退出");
    }

    /// 一个控制周期; 没有新鲜检测或没有目标时保持不动
    fn step(&self) -> Option<AngleDelta> {
        let (detections, center) = {
            let board = lock(&self.board);
            let fresh = board
                .received_at
                .map(|t| t.elapsed() <= self.config.detection_timeout())
                .unwrap_or(false);
            if !fresh {
                return None;
            }
            (board.detections.clone(), board.frame_center)
        };

        let mut law = lock(&self.law);
        let target = {
            let mut target_lock = lock(&self.lock);
            target_lock.select(&detections, law.selection_policy())?.clone()
        };

        let delta = law.compute(&target, center);
        if !delta.is_zero() && !self.gateway.move_by(delta.pan, delta.tilt) {
            debug!("本周期指令未发送, 下一周期重试");
        }

        let (pan, tilt) = self.gateway.get_current_angles();
        self.telemetry.emit(TelemetryEvent::TrackingUpdate {
            law: law.name(),
            target: target.center(),
            pan,
            tilt,
        });
        Some(delta)
    }
}

fn describe_target(target_id: Option<TrackId>) -> String {
    match target_id {
        Some(id) => format!("#{}", id),
        None => "any".to_string(),
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IbvsConfig, ServoConfig};
    use crate::control::ibvs::IbvsLaw;
    use crate::servo::{RecordingHandle, RecordingLink};
    use std::time::Duration;

    fn setup(port: &str) -> (VisualServoController<IbvsLaw>, RecordingHandle) {
        let servo = ServoConfig {
            serial_port: port.to_string(),
            settle_ms: 0,
            post_write_delay_ms: 0,
            max_step_deg: 10.0,
            ..Default::default()
        };
        let (link, handle) = RecordingLink::new(port);
        let gateway = ServoGateway::open(servo, Box::new(link), Telemetry::disabled()).unwrap();
        gateway.connect();
        let controller = VisualServoController::new(
            IbvsLaw::new(IbvsConfig::default()),
            gateway,
            ControllerConfig::default(),
            Telemetry::disabled(),
        );
        (controller, handle)
    }

    #[test]
    fn test_step_without_detections_holds() {
        let (c, handle) = setup("test://ctrl-hold");
        assert_eq!(c.step(), None);
        assert_eq!(handle.lines().len(), 1);
    }

    #[test]
    fn test_step_moves_toward_target() {
        let (c, _) = setup("test://ctrl-step");
        c.set_detections(vec![Detection::new(400.0, 220.0, 40.0, 40.0, 0.9, 0)]);
        let delta = c.step().unwrap();
        assert!((delta.pan - -2.0).abs() < 1e-9);
        assert_eq!(c.gateway().get_current_angles(), (88.0, 90.0));
    }

    #[test]
    fn test_stale_detections_are_ignored() {
        let (c, _) = setup("test://ctrl-stale");
        c.set_detections(vec![Detection::new(400.0, 220.0, 40.0, 40.0, 0.9, 0)]);
        lock(&c.core.board).received_at = Some(Instant::now() - Duration::from_secs(2));
        assert_eq!(c.step(), None);
    }

    #[test]
    fn test_start_twice_updates_target_only() {
        let (c, _) = setup("test://ctrl-start");
        c.start_tracking(None);
        assert_eq!(c.state(), TrackingState::Tracking);
        c.start_tracking(Some(4));
        assert_eq!(c.state(), TrackingState::Tracking);
        assert_eq!(c.target_lock(), TargetLock::Explicit(4));
        c.stop_tracking();
        c.stop_tracking();
        assert_eq!(c.state(), TrackingState::Idle);
    }

    #[test]
    fn test_set_frame_size_moves_center() {
        let (c, _) = setup("test://ctrl-frame");
        c.set_frame_size(1280, 720);
        assert_eq!(c.frame_center(), PixelPoint::new(640.0, 360.0));
    }
}

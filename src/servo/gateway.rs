// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 舵机网关 (Servo Gateway)
//!
//! 物理链路的唯一持有者, 也是唯一允许发送运动指令的组件.
//! 状态与链路在同一把锁内, 任意时刻只有一条指令在发送.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use once_cell::sync::Lazy;
use tracing::{debug, error, info, warn};

use super::command;
use super::error::ServoError;
use super::link::ServoLink;
use crate::config::{AngleLimits, ServoConfig};
use crate::telemetry::{LinkStatus, Telemetry, TelemetryEvent};

/// 全局网关表: 每个执行器 (串口) 只有一个网关
static GATEWAYS: Lazy<Mutex<HashMap<String, Arc<ServoGateway>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// 舵机状态 (只由网关修改)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ServoState {
    pub pan: f64,
    pub tilt: f64,
    pub pan_limits: AngleLimits,
    pub tilt_limits: AngleLimits,
    /// 单次指令最大角度变化
    pub max_step: f64,
    /// 小于此值的变化视为噪声
    pub min_adjustment: f64,
}

impl ServoState {
    fn from_config(config: &ServoConfig) -> Self {
        Self {
            pan: config.pan_limits.clamp(config.home_pan),
            tilt: config.tilt_limits.clamp(config.home_tilt),
            pan_limits: config.pan_limits,
            tilt_limits: config.tilt_limits,
            max_step: config.max_step_deg.abs(),
            min_adjustment: config.min_adjustment_deg.abs(),
        }
    }

    /// 限位 + 单步限幅后的目标角度
    fn constrain(&self, pan: f64, tilt: f64) -> (f64, f64) {
        let pan = step_limit(self.pan, self.pan_limits.clamp(pan), self.max_step);
        let tilt = step_limit(self.tilt, self.tilt_limits.clamp(tilt), self.max_step);
        (pan, tilt)
    }
}

fn step_limit(current: f64, target: f64, max_step: f64) -> f64 {
    let delta = target - current;
    if delta.abs() > max_step {
        current + max_step.copysign(delta)
    } else {
        target
    }
}

struct GatewayInner {
    state: ServoState,
    link: Box<dyn ServoLink>,
    status: LinkStatus,
}

/// 舵机网关
pub struct ServoGateway {
    config: ServoConfig,
    inner: Mutex<GatewayInner>,
    telemetry: Telemetry,
}

impl ServoGateway {
    /// 为 `config.serial_port` 创建网关并登记
    ///
    /// 同一执行器第二次创建返回 [`ServoError::AlreadyOwned`]; 已有句柄请用 [`ServoGateway::shared`].
    pub fn open(
        config: ServoConfig,
        link: Box<dyn ServoLink>,
        telemetry: Telemetry,
    ) -> Result<Arc<Self>, ServoError> {
        let mut registry = GATEWAYS.lock().unwrap_or_else(|p| p.into_inner());
        let key = config.serial_port.clone();
        if registry.contains_key(&key) {
            error!("❌ 执行器 {} 已有网关, 拒绝重复创建", key);
            return Err(ServoError::AlreadyOwned(key));
        }

        info!("🎯 舵机网关初始化: {}", link.describe());
        let gateway = Arc::new(Self {
            inner: Mutex::new(GatewayInner {
                state: ServoState::from_config(&config),
                link,
                status: LinkStatus::Disconnected,
            }),
            config,
            telemetry,
        });
        registry.insert(key, gateway.clone());
        Ok(gateway)
    }

    /// 获取已创建的网关
    pub fn shared(port: &str) -> Option<Arc<Self>> {
        GATEWAYS
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(port)
            .cloned()
    }

    pub fn port(&self) -> &str {
        &self.config.serial_port
    }

    /// 建立连接: 等待控制板稳定后归中
    ///
    /// 已连接时直接返回成功. 等待期间持有锁, 其他线程的指令在连接完成后依次执行.
    pub fn connect(&self) -> bool {
        let mut inner = self.lock();
        if inner.link.is_open() && inner.status != LinkStatus::Disconnected {
            info!("舵机控制板已连接");
            return true;
        }

        info!("🔌 连接舵机控制板: {} ...", inner.link.describe());
        if let Err(e) = inner.link.open() {
            error!("❌ 舵机控制板连接失败: {}", e);
            self.set_status(&mut inner, LinkStatus::Disconnected);
            return false;
        }

        thread::sleep(self.config.settle_time());
        self.set_status(&mut inner, LinkStatus::Connected);
        info!("✅ 舵机控制板连接成功: {}", inner.link.describe());

        // 归中不受单步限幅
        let home = (
            inner.state.pan_limits.clamp(self.config.home_pan),
            inner.state.tilt_limits.clamp(self.config.home_tilt),
        );
        inner.state.pan = home.0;
        inner.state.tilt = home.1;
        if !self.transmit(&mut inner) {
            warn!("⚠️  舵机未能归中, 但连接已建立");
        }
        true
    }

    /// 归中后断开
    pub fn disconnect(&self) -> bool {
        let mut inner = self.lock();
        if !inner.link.is_open() {
            return true;
        }
        inner.state.pan = inner.state.pan_limits.clamp(self.config.home_pan);
        inner.state.tilt = inner.state.tilt_limits.clamp(self.config.home_tilt);
        self.transmit(&mut inner);

        inner.link.close();
        self.set_status(&mut inner, LinkStatus::Disconnected);
        info!("🔌 已断开舵机控制板");
        true
    }

    /// 断开并注销; 之后可以为同一执行器重新创建网关
    pub fn release(&self) {
        self.disconnect();
        let mut registry = GATEWAYS.lock().unwrap_or_else(|p| p.into_inner());
        if registry
            .get(&self.config.serial_port)
            .is_some_and(|g| std::ptr::eq(Arc::as_ptr(g), self))
        {
            registry.remove(&self.config.serial_port);
        }
        info!("舵机网关资源已释放");
    }

    pub fn is_connected(&self) -> bool {
        let inner = self.lock();
        inner.link.is_open() && inner.status != LinkStatus::Disconnected
    }

    pub fn status(&self) -> LinkStatus {
        self.lock().status
    }

    /// 移动到绝对角度
    ///
    /// 先限位, 再限制单步变化; 两轴变化都小于最小调整量时不发送.
    /// 链路故障返回 `false`, 调用方下个周期重试.
    pub fn move_to(&self, pan: f64, tilt: f64) -> bool {
        let mut inner = self.lock();
        self.move_to_locked(&mut inner, pan, tilt)
    }

    /// 相对移动: 小于最小调整量的分量置零
    pub fn move_by(&self, delta_pan: f64, delta_tilt: f64) -> bool {
        let mut inner = self.lock();
        let min = inner.state.min_adjustment;
        let dp = if delta_pan.abs() < min { 0.0 } else { delta_pan };
        let dt = if delta_tilt.abs() < min { 0.0 } else { delta_tilt };
        let (pan, tilt) = (inner.state.pan + dp, inner.state.tilt + dt);
        self.move_to_locked(&mut inner, pan, tilt)
    }

    /// 当前角度快照 (pan, tilt)
    pub fn get_current_angles(&self) -> (f64, f64) {
        let inner = self.lock();
        (inner.state.pan, inner.state.tilt)
    }

    pub fn state(&self) -> ServoState {
        self.lock().state
    }

    /// 运行时修改限位, 当前角度随之收紧 (不发送)
    pub fn set_limits(&self, pan_limits: AngleLimits, tilt_limits: AngleLimits) {
        let mut inner = self.lock();
        inner.state.pan_limits = pan_limits;
        inner.state.tilt_limits = tilt_limits;
        inner.state.pan = pan_limits.clamp(inner.state.pan);
        inner.state.tilt = tilt_limits.clamp(inner.state.tilt);
        info!(
            "舵机限位: Pan [{:.1}-{:.1}], Tilt [{:.1}-{:.1}]",
            pan_limits.min, pan_limits.max, tilt_limits.min, tilt_limits.max
        );
    }

    fn move_to_locked(&self, inner: &mut GatewayInner, pan: f64, tilt: f64) -> bool {
        if !pan.is_finite() || !tilt.is_finite() {
            warn!("⚠️  忽略无效角度: pan={} tilt={}", pan, tilt);
            return false;
        }
        let (pan, tilt) = inner.state.constrain(pan, tilt);
        let min = inner.state.min_adjustment;
        if (pan - inner.state.pan).abs() < min && (tilt - inner.state.tilt).abs() < min {
            return true;
        }

        inner.state.pan = pan;
        inner.state.tilt = tilt;
        self.transmit(inner)
    }

    /// 发送当前状态
    fn transmit(&self, inner: &mut GatewayInner) -> bool {
        if !inner.link.is_open() || inner.status == LinkStatus::Disconnected {
            debug!(
                "指令未发送: 舵机未连接 (P{:.1}T{:.1})",
                inner.state.pan, inner.state.tilt
            );
            return false;
        }

        let line = command::encode(inner.state.pan, inner.state.tilt);
        match inner.link.write_line(&line) {
            Ok(()) => {
                self.set_status(inner, LinkStatus::Connected);
                self.telemetry.emit(TelemetryEvent::AnglesChanged {
                    pan: inner.state.pan,
                    tilt: inner.state.tilt,
                });
                let delay = self.config.post_write_delay();
                if !delay.is_zero() {
                    thread::sleep(delay);
                }
                true
            }
            Err(e) => {
                warn!("⚠️  舵机指令发送失败: {} ({})", e, line.trim_end());
                self.set_status(inner, LinkStatus::Degraded);
                false
            }
        }
    }

    fn set_status(&self, inner: &mut GatewayInner, status: LinkStatus) {
        if inner.status != status {
            inner.status = status;
            self.telemetry.emit(TelemetryEvent::Connectivity(status));
        }
    }

    fn lock(&self) -> MutexGuard<'_, GatewayInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 云台跟踪配置 - 通过JSON文件调整参数
//!
//! 所有增益、限位、超时集中在一个配置对象里, 构造各组件时传入.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detection::FrameGeometry;

/// 顶层配置
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PanTiltConfig {
    pub servo: ServoConfig,
    pub estimator: EstimatorConfig,
    pub calibration: CalibrationConfig,
    pub ibvs: IbvsConfig,
    pub pbvs: PbvsConfig,
    pub controller: ControllerConfig,
    pub pipeline: PipelineConfig,
}

/// 角度范围 [min, max] (度)
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AngleLimits {
    pub min: f64,
    pub max: f64,
}

impl AngleLimits {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// 限位; min/max 写反时按从小到大处理
    pub fn clamp(&self, angle: f64) -> f64 {
        angle.clamp(self.min.min(self.max), self.max.max(self.min))
    }
}

impl Default for AngleLimits {
    fn default() -> Self {
        Self::new(0.0, 180.0)
    }
}

// ========== 舵机网关 ==========

/// 舵机网关参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    pub serial_port: String,      // 串口
    pub baud_rate: u32,           // 波特率
    pub pan_limits: AngleLimits,  // 水平限位
    pub tilt_limits: AngleLimits, // 俯仰限位
    pub home_pan: f64,            // 归中角度
    pub home_tilt: f64,
    pub max_step_deg: f64,        // 单次指令最大角度变化 (防抖)
    pub min_adjustment_deg: f64,  // 小于此值的变化视为噪声
    pub settle_ms: u64,           // 建立连接后的等待时间
    pub write_timeout_ms: u64,    // 串口写超时
    pub post_write_delay_ms: u64, // 每条指令后的间隔
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115_200,
            pan_limits: AngleLimits::default(),
            tilt_limits: AngleLimits::default(),
            home_pan: 90.0,
            home_tilt: 90.0,
            max_step_deg: 2.0,
            min_adjustment_deg: 0.1,
            settle_ms: 2_500,
            write_timeout_ms: 1_000,
            post_write_delay_ms: 2,
        }
    }
}

impl ServoConfig {
    pub fn settle_time(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn post_write_delay(&self) -> Duration {
        Duration::from_millis(self.post_write_delay_ms)
    }
}

// ========== 状态估计 ==========

/// 卡尔曼滤波参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    pub history_len: usize,              // 轨迹/预测历史长度
    pub nominal_dt: f64,                 // 缺省时间步 (30fps)
    pub min_dt: f64,                     // 无时间戳时的时间步下限
    pub max_dt: f64,                     // 无时间戳时的时间步上限
    pub process_noise: f64,              // 过程噪声: 加速度标准差 (像素/秒²)
    pub measurement_noise: f64,          // 观测噪声: 标准差 (像素)
    pub initial_position_variance: f64,  // 初始位置方差
    pub initial_velocity_variance: f64,  // 初始速度方差
    pub stabilization_predictions: u32,  // 起始阶段向画面中心混合的预测次数
    pub stabilization_weight: f64,       // 第一次预测的中心权重
    pub default_center: (f64, f64),      // 未提供画面中心时的初始位置
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            history_len: 30,
            nominal_dt: 1.0 / 30.0,
            min_dt: 0.01,
            max_dt: 0.5,
            process_noise: 800.0,
            measurement_noise: 2.0,
            initial_position_variance: 10.0,
            initial_velocity_variance: 100.0,
            stabilization_predictions: 5,
            stabilization_weight: 0.8,
            default_center: (640.0, 360.0),
        }
    }
}

// ========== 延迟标定 ==========

/// 延迟标定参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub camera_delay_s: f64,             // 相机延迟 (固定估计值, 不做测量)
    pub initial_processing_delay_s: f64, // 处理延迟初值
    pub window: usize,                   // 滑动窗口样本数
    pub calibrated_after: usize,         // 达到多少样本视为标定完成
    pub max_pending_frames: usize,       // 未完成帧的最大缓存数
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            camera_delay_s: 0.05,
            initial_processing_delay_s: 0.1,
            window: 30,
            calibrated_after: 10,
            max_pending_frames: 256,
        }
    }
}

// ========== 控制律 ==========

/// IBVS 参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IbvsConfig {
    pub pan_gain: f64,    // 水平增益 (度/像素)
    pub tilt_gain: f64,   // 俯仰增益 (度/像素)
    pub deadzone_px: f64, // 中心死区 (像素)
}

impl Default for IbvsConfig {
    fn default() -> Self {
        Self {
            pan_gain: 0.02,
            tilt_gain: 0.02,
            deadzone_px: 5.0,
        }
    }
}

/// PBVS 参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PbvsConfig {
    pub gain: f64,                    // 像素误差 → 角度增益 (度/像素)
    pub deadzone_px: f64,             // 单轴死区 (像素)
    pub smoothing: f64,               // 指数平滑系数 (0-1, 越大越平滑)
    pub focal_length_m: f64,          // 焦距 (米)
    pub pixels_per_meter: (f64, f64), // 像素密度 sx, sy
    pub initial_depth_m: f64,         // 初始深度假设
    pub depth_scale: f64,             // 深度估计: Z = depth_scale / 平均边长
    pub depth_limits: (f64, f64),     // 深度范围
    pub depth_blend: f64,             // 深度平滑: Z = (1-b)·Z + b·Z_est
    pub error_history_len: usize,     // 误差历史长度
    pub convergence_window: usize,    // 收敛判定窗口
}

impl Default for PbvsConfig {
    fn default() -> Self {
        Self {
            gain: 0.02,
            deadzone_px: 5.0,
            smoothing: 0.8,
            focal_length_m: 0.02,
            pixels_per_meter: (800.0, 800.0),
            initial_depth_m: 1.0,
            depth_scale: 500.0,
            depth_limits: (0.2, 5.0),
            depth_blend: 0.1,
            error_history_len: 30,
            convergence_window: 5,
        }
    }
}

// ========== 控制循环 ==========

/// 后台控制循环参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub tick_hz: f64,              // 控制频率
    pub detection_timeout_ms: u64, // 超过此时间无检测则保持不动
    pub join_timeout_ms: u64,      // 停止时等待线程退出的时间
    pub frame: FrameGeometry,      // 画面尺寸
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_hz: 50.0,
            detection_timeout_ms: 500,
            join_timeout_ms: 1_000,
            frame: FrameGeometry::default(),
        }
    }
}

impl ControllerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_hz.clamp(1.0, 1_000.0))
    }

    pub fn detection_timeout(&self) -> Duration {
        Duration::from_millis(self.detection_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

/// 检测处理流水线参数
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub track_timeout_ms: u64, // 轨迹过期时间
    pub compensate: bool,      // 是否用延迟补偿后的位置替换检测框
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            track_timeout_ms: 1_000,
            compensate: true,
        }
    }
}

impl PipelineConfig {
    pub fn track_timeout(&self) -> Duration {
        Duration::from_millis(self.track_timeout_ms)
    }
}

impl PanTiltConfig {
    /// 从JSON文件加载配置
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(config) => {
                    info!("✅ 配置已从 {} 加载", path.display());
                    config
                }
                Err(e) => {
                    warn!("⚠️  配置文件解析失败: {}, 使用默认值", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("📝 配置文件不存在,创建默认配置...");
                let config = Self::default();
                config.save(path);
                config
            }
        }
    }

    /// 保存配置到JSON文件
    pub fn save(&self, path: impl AsRef<Path>) {
        let path = path.as_ref();
        match serde_json::to_string_pretty(self) {
            Ok(json) => {
                if let Err(e) = fs::write(path, json) {
                    warn!("❌ 保存配置失败: {}", e);
                } else {
                    info!("💾 配置已保存到 {}", path.display());
                }
            }
            Err(e) => warn!("❌ 序列化配置失败: {}", e),
        }
    }

    /// 打印当前配置
    pub fn log_summary(&self) {
        info!("🎛️  当前云台配置:");
        info!(
            "  串口: {} @ {} baud",
            self.servo.serial_port, self.servo.baud_rate
        );
        info!(
            "  水平限位: [{:.1}, {:.1}]  俯仰限位: [{:.1}, {:.1}]",
            self.servo.pan_limits.min,
            self.servo.pan_limits.max,
            self.servo.tilt_limits.min,
            self.servo.tilt_limits.max
        );
        info!(
            "  单步上限: {:.2}°  最小调整: {:.2}°",
            self.servo.max_step_deg, self.servo.min_adjustment_deg
        );
        info!(
            "  IBVS增益: ({:.3}, {:.3})  PBVS增益: {:.3}  死区: {:.0}px",
            self.ibvs.pan_gain, self.ibvs.tilt_gain, self.pbvs.gain, self.pbvs.deadzone_px
        );
        info!(
            "  控制频率: {:.0}Hz  检测超时: {}ms  轨迹超时: {}ms",
            self.controller.tick_hz,
            self.controller.detection_timeout_ms,
            self.pipeline.track_timeout_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "servo": { "serial_port": "COM7", "max_step_deg": 5.0 } }"#;
        let config: PanTiltConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.servo.serial_port, "COM7");
        assert_eq!(config.servo.max_step_deg, 5.0);
        assert_eq!(config.servo.baud_rate, 115_200);
        assert_eq!(config.calibration.window, 30);
        assert!(config.pipeline.compensate);
    }

    #[test]
    fn test_load_missing_file_writes_defaults() {
        let path = std::env::temp_dir().join(format!("pantilt-config-{}.json", std::process::id()));
        let _ = fs::remove_file(&path);

        let config = PanTiltConfig::load(&path);
        assert_eq!(config.servo.home_pan, 90.0);
        assert!(path.exists());

        let reloaded = PanTiltConfig::load(&path);
        assert_eq!(reloaded.controller.tick_hz, config.controller.tick_hz);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_inverted_limits_clamp_without_panic() {
        let limits = AngleLimits::new(180.0, 0.0);
        assert_eq!(limits.clamp(200.0), 180.0);
        assert_eq!(limits.clamp(-5.0), 0.0);
        assert_eq!(limits.clamp(45.0), 45.0);
    }

    #[test]
    fn test_tick_interval() {
        let config = ControllerConfig {
            tick_hz: 20.0,
            ..Default::default()
        };
        assert_eq!(config.tick_interval(), Duration::from_millis(50));
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 云台视觉跟踪 (Pan-Tilt Visual Tracking)
///
/// 系统架构:
/// 1. 检测输入: JSON 行 (文件/标准输入) 或模拟目标 (主线程)
/// 2. 控制线程: 固定频率读取最新检测, 驱动舵机网关
/// 3. 遥测线程: 输出角度/连接状态/预测位置
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, info, warn};

use pantilt_rs::config::PanTiltConfig;
use pantilt_rs::control::{ControlLaw, IbvsLaw, PbvsLaw, VisualServoController};
use pantilt_rs::detection::{Detection, FrameGeometry};
use pantilt_rs::pipeline::FrameProcessor;
use pantilt_rs::servo::{RecordingHandle, RecordingLink, SerialLink, ServoGateway, ServoLink};
use pantilt_rs::telemetry::{init_logging, Telemetry, TelemetryEvent};
use pantilt_rs::tracking::{DelayCalibrator, StateEstimator};

/// 控制律
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Law {
    Ibvs,
    Pbvs,
}

/// 云台跟踪参数
#[derive(Parser, Debug)]
#[command(author, version, about = "云台视觉跟踪 - 延迟补偿 + 视觉伺服", long_about = None)]
struct Args {
    /// 配置文件 (不存在时写入默认值)
    #[arg(short, long, default_value = "pantilt.json")]
    config: String,

    /// 串口 (覆盖配置文件)
    #[arg(short, long)]
    port: Option<String>,

    /// 控制律
    #[arg(short, long, value_enum, default_value = "ibvs")]
    law: Law,

    /// 不连接硬件, 只记录指令
    #[arg(long)]
    dry_run: bool,

    /// 检测输入 (JSON 行文件, "-" 为标准输入)
    #[arg(short, long, conflicts_with = "simulate")]
    input: Option<String>,

    /// 模拟目标运动的时长 (秒)
    #[arg(short, long)]
    simulate: Option<f64>,

    /// 锁定的跟踪ID (默认自动选择)
    #[arg(short, long, allow_hyphen_values = true)]
    target_id: Option<i64>,
}

/// 一帧检测输入
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FrameRecord {
    Frame {
        #[serde(default)]
        time: Option<f64>,
        #[serde(default)]
        width: Option<u32>,
        #[serde(default)]
        height: Option<u32>,
        detections: Vec<Detection>,
    },
    Bare(Vec<Detection>),
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = PanTiltConfig::load(&args.config);
    if let Some(port) = &args.port {
        config.servo.serial_port = port.clone();
    }
    info!("🚀 云台跟踪系统启动");
    config.log_summary();

    // ========== 遥测线程 ==========
    let (telemetry, events) = Telemetry::channel(256);
    thread::Builder::new()
        .name("telemetry".to_string())
        .spawn(move || {
            for event in events {
                match event {
                    TelemetryEvent::Connectivity(status) => info!("🔗 连接状态: {:?}", status),
                    TelemetryEvent::DelayUpdated(d) if d.calibrated => {
                        debug!("⏱️  总延迟 {:.1}ms", d.total_delay * 1000.0)
                    }
                    other => debug!("{:?}", other),
                }
            }
        })
        .context("启动遥测线程失败")?;

    // ========== 舵机网关 ==========
    let mut recording: Option<RecordingHandle> = None;
    let link: Box<dyn ServoLink> = if args.dry_run {
        let (link, handle) = RecordingLink::new(config.servo.serial_port.clone());
        recording = Some(handle);
        Box::new(link)
    } else {
        Box::new(SerialLink::new(
            config.servo.serial_port.clone(),
            config.servo.baud_rate,
            config.servo.write_timeout(),
        ))
    };
    let gateway = ServoGateway::open(config.servo.clone(), link, telemetry.clone())
        .context("创建舵机网关失败")?;
    if !gateway.connect() {
        warn!("⚠️  舵机未连接, 指令将被丢弃直到重新连接");
    }

    // ========== 状态估计 + 流水线 ==========
    let calibrator = Arc::new(DelayCalibrator::with_telemetry(
        config.calibration.clone(),
        telemetry.clone(),
    ));
    let estimator = Arc::new(StateEstimator::new(config.estimator.clone(), calibrator));
    let processor = FrameProcessor::new(config.pipeline.clone(), estimator, telemetry.clone());

    // ========== 控制线程 ==========
    let law: Box<dyn ControlLaw> = match args.law {
        Law::Ibvs => Box::new(IbvsLaw::new(config.ibvs.clone())),
        Law::Pbvs => Box::new(PbvsLaw::new(config.pbvs.clone())),
    };
    let controller = VisualServoController::new(
        law,
        gateway.clone(),
        config.controller.clone(),
        telemetry,
    );
    controller.start_tracking(args.target_id);

    // ========== 主线程: 检测输入 ==========
    let mut geometry = config.controller.frame;
    let frames = match &args.input {
        Some(path) => run_input(path, &processor, &controller, &mut geometry)?,
        None => run_simulation(args.simulate.unwrap_or(10.0), &processor, &controller, geometry),
    };

    controller.stop_tracking();
    let (pan, tilt) = gateway.get_current_angles();
    info!("📊 共处理 {} 帧, 最终角度 Pan {:.1}° Tilt {:.1}°", frames, pan, tilt);
    gateway.release();

    if let Some(handle) = recording {
        info!("📝 演练模式共记录 {} 条指令", handle.lines().len());
    }
    Ok(())
}

/// 处理一帧: 计时 → 延迟补偿 → 交给控制器
fn process_frame<L: ControlLaw + 'static>(
    processor: &FrameProcessor,
    controller: &VisualServoController<L>,
    frame_time: Option<f64>,
    geometry: FrameGeometry,
    detections: &[Detection],
) {
    let frame_id = processor.begin_frame();
    processor.begin_processing(frame_id);
    let compensated = processor.finish_frame(frame_id, frame_time, geometry, detections);
    controller.set_detections(compensated);
}

fn run_input<L: ControlLaw + 'static>(
    path: &str,
    processor: &FrameProcessor,
    controller: &VisualServoController<L>,
    geometry: &mut FrameGeometry,
) -> Result<usize> {
    let reader: Box<dyn BufRead> = if path == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        let file = File::open(path).with_context(|| format!("无法打开检测输入 {}", path))?;
        Box::new(BufReader::new(file))
    };
    info!("📥 读取检测输入: {}", path);

    let mut frames = 0;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.context("读取检测输入失败")?;
        if line.trim().is_empty() {
            continue;
        }
        let record: FrameRecord = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!("⚠️  第 {} 行解析失败: {}", line_no + 1, e);
                continue;
            }
        };

        let (time, detections) = match record {
            FrameRecord::Frame {
                time,
                width,
                height,
                detections,
            } => {
                if let (Some(w), Some(h)) = (width, height) {
                    if (w, h) != (geometry.width, geometry.height) {
                        *geometry = FrameGeometry::new(w, h);
                        controller.set_frame_size(w, h);
                    }
                }
                (time, detections)
            }
            FrameRecord::Bare(detections) => (None, detections),
        };
        process_frame(processor, controller, time, *geometry, &detections);
        frames += 1;
    }
    Ok(frames)
}

/// 模拟目标: 30fps 往返运动 + 随机抖动
fn run_simulation<L: ControlLaw + 'static>(
    seconds: f64,
    processor: &FrameProcessor,
    controller: &VisualServoController<L>,
    geometry: FrameGeometry,
) -> usize {
    info!("🎲 模拟目标运动 {:.1} 秒", seconds);
    let frame_interval = Duration::from_secs_f64(1.0 / 30.0);
    let (w, h) = (geometry.width as f64, geometry.height as f64);
    let mut rng = rand::thread_rng();
    let start = Instant::now();
    let mut frames = 0;

    while start.elapsed().as_secs_f64() < seconds {
        let t = frames as f64 / 30.0;
        let cx = w / 2.0 + w * 0.3 * (t * 0.8).sin() + rng.gen_range(-2.0..2.0);
        let cy = h / 2.0 + h * 0.25 * (t * 0.5).cos() + rng.gen_range(-2.0..2.0);
        let det = Detection::new(cx - 30.0, cy - 30.0, 60.0, 60.0, 0.9, 0).with_track_id(1);

        process_frame(processor, controller, Some(t), geometry, &[det]);
        frames += 1;
        thread::sleep(frame_interval);
    }
    frames
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测数据结构定义
//! Data structures shared between the external detector and the tracking core

use serde::{Deserialize, Serialize};

/// 跟踪ID (由外部检测器分配, 同一物体跨帧保持不变)
pub type TrackId = i64;

/// 未跟踪标记 (外部协议中 track_id = -1)
pub const UNTRACKED: TrackId = -1;

// ========== 数据结构 ==========

/// 像素坐标点
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// 到另一点的欧氏距离
    pub fn distance(&self, other: &PixelPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// 线性插值: weight=0 返回 self, weight=1 返回 other
    pub fn lerp(&self, other: &PixelPoint, weight: f64) -> PixelPoint {
        PixelPoint {
            x: self.x * (1.0 - weight) + other.x * weight,
            y: self.y * (1.0 - weight) + other.y * weight,
        }
    }
}

impl From<(f64, f64)> for PixelPoint {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// 检测框 (外部检测器输出, 核心只读)
///
/// 线上格式 `{x, y, w, h, confidence, class_id, track_id?}`,
/// `track_id` 缺省或为 -1 表示未跟踪.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    pub confidence: f32,
    pub class_id: u32,
    #[serde(default, deserialize_with = "de_track_id")]
    pub track_id: Option<TrackId>,
}

impl Detection {
    pub fn new(x: f64, y: f64, w: f64, h: f64, confidence: f32, class_id: u32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            confidence,
            class_id,
            track_id: None,
        }
    }

    pub fn with_track_id(mut self, track_id: TrackId) -> Self {
        self.track_id = normalize_track_id(Some(track_id));
        self
    }

    /// 中心点 (瞄准点)
    pub fn center(&self) -> PixelPoint {
        PixelPoint::new(self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// 平移检测框, 使中心落在 `center`
    pub fn recentered(&self, center: PixelPoint) -> Detection {
        let current = self.center();
        Detection {
            x: self.x + (center.x - current.x),
            y: self.y + (center.y - current.y),
            ..self.clone()
        }
    }
}

/// 画面尺寸
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

impl FrameGeometry {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// 画面中心 (整数像素, 与采集端一致)
    pub fn center(&self) -> PixelPoint {
        PixelPoint::new((self.width / 2) as f64, (self.height / 2) as f64)
    }
}

impl Default for FrameGeometry {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

fn normalize_track_id(id: Option<TrackId>) -> Option<TrackId> {
    id.filter(|&id| id != UNTRACKED)
}

fn de_track_id<'de, D>(deserializer: D) -> Result<Option<TrackId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<TrackId> = Option::deserialize(deserializer)?;
    Ok(normalize_track_id(raw))
}

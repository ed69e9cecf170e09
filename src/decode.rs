// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/decode.rs - 检测输出解码
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! # 输出解码
//!
//! 支持两种输出张量布局：
//!
//! - 通道优先 `(batch, 4 + C, N)`：YOLOv8 一类模型，框和类别分数沿通道轴展开；
//! - 行优先 `(N, 5 + C)`：每行依次为 4 个框值、objectness 和 C 个类别分数，
//!   YOLOv5 一类模型的 `(1, N, 5 + C)` 去掉 batch 轴后同样按此处理。
//!
//! 框值是模型输入空间中的中心点与宽高，解码时撤销 letterbox 变换，
//! 输出原始帧像素坐标。

use serde::Deserialize;
use tracing::debug;

use crate::{
  detection::Detection,
  model::{InferenceError, ModelOutput},
  preprocess::Letterbox,
};

const BOX_VALUES: usize = 4;
const ROW_FIRST_HEADER: usize = BOX_VALUES + 1;

/// 配置中指定的输出布局
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LayoutPreference {
  /// 根据形状自动判断
  #[default]
  Auto,
  ChannelFirst,
  RowFirst,
}

/// 已确认的输出布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
  ChannelFirst { classes: usize, candidates: usize },
  RowFirst { classes: usize, candidates: usize },
}

impl OutputLayout {
  /// 根据输出形状和配置确定布局，无法识别时返回错误
  pub fn resolve(shape: &[usize], preference: LayoutPreference) -> Result<Self, InferenceError> {
    use LayoutPreference::{Auto, ChannelFirst, RowFirst};

    let layout = match (shape, preference) {
      (&[candidates, features], Auto | RowFirst) => Self::row_first(features, candidates),
      (&[1, channels, candidates], Auto) if channels < candidates => {
        Self::channel_first(channels, candidates)
      }
      (&[1, channels, candidates], ChannelFirst) => Self::channel_first(channels, candidates),
      (&[1, candidates, features], Auto | RowFirst) => Self::row_first(features, candidates),
      _ => None,
    };

    layout.ok_or_else(|| InferenceError::UnrecognizedOutputShape(shape.to_vec()))
  }

  fn channel_first(channels: usize, candidates: usize) -> Option<Self> {
    channels
      .checked_sub(BOX_VALUES)
      .filter(|&classes| classes > 0)
      .map(|classes| OutputLayout::ChannelFirst {
        classes,
        candidates,
      })
  }

  fn row_first(features: usize, candidates: usize) -> Option<Self> {
    features
      .checked_sub(ROW_FIRST_HEADER)
      .filter(|&classes| classes > 0)
      .map(|classes| OutputLayout::RowFirst {
        classes,
        candidates,
      })
  }

  pub fn classes(&self) -> usize {
    match *self {
      OutputLayout::ChannelFirst { classes, .. } | OutputLayout::RowFirst { classes, .. } => {
        classes
      }
    }
  }

  pub fn candidates(&self) -> usize {
    match *self {
      OutputLayout::ChannelFirst { candidates, .. }
      | OutputLayout::RowFirst { candidates, .. } => candidates,
    }
  }
}

/// 解码模型输出，返回置信度不低于 `threshold` 的检测框（未做 NMS）
pub fn decode(output: &ModelOutput, letterbox: &Letterbox, threshold: f32) -> Vec<Detection> {
  let data = output.tensor().data();

  let detections: Vec<Detection> = match output.layout() {
    OutputLayout::ChannelFirst {
      classes,
      candidates,
    } => {
      let at = |channel: usize, i: usize| data[channel * candidates + i];
      (0..candidates)
        .filter_map(|i| {
          let (score, class_id) = best_class((0..classes).map(|c| at(BOX_VALUES + c, i)))?;
          candidate(
            letterbox,
            threshold,
            [at(0, i), at(1, i), at(2, i), at(3, i)],
            score,
            class_id,
          )
        })
        .collect()
    }
    OutputLayout::RowFirst {
      classes,
      candidates,
    } => data
      .chunks_exact(ROW_FIRST_HEADER + classes)
      .take(candidates)
      .filter_map(|row| {
        let (score, class_id) = best_class(row[ROW_FIRST_HEADER..].iter().copied())?;
        candidate(
          letterbox,
          threshold,
          [row[0], row[1], row[2], row[3]],
          score,
          class_id,
        )
      })
      .collect(),
  };

  debug!(
    "解码 {} 个候选框, {} 个超过阈值 {:.2}",
    output.layout().candidates(),
    detections.len(),
    threshold
  );

  detections
}

/// 最高类别分数及其类别编号，忽略非有限值
fn best_class(scores: impl Iterator<Item = f32>) -> Option<(f32, u32)> {
  scores
    .enumerate()
    .filter(|(_, score)| score.is_finite())
    .fold(None, |best, (class_id, score)| match best {
      Some((best_score, _)) if best_score >= score => best,
      _ => Some((score, class_id as u32)),
    })
}

fn candidate(
  letterbox: &Letterbox,
  threshold: f32,
  [cx, cy, w, h]: [f32; 4],
  score: f32,
  class_id: u32,
) -> Option<Detection> {
  if score < threshold {
    return None;
  }
  if ![cx, cy, w, h].iter().all(|v| v.is_finite()) || w <= 0.0 || h <= 0.0 {
    return None;
  }

  let (cx, cy) = letterbox.unmap_point(cx, cy);
  let (w, h) = (letterbox.unmap_length(w), letterbox.unmap_length(h));

  Some(Detection {
    x: cx - w / 2.0,
    y: cy - h / 2.0,
    width: w,
    height: h,
    confidence: score,
    class_id,
  })
}

// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/preprocess.rs - 图像预处理（letterbox）
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

//! # 预处理
//!
//! 把宿主提供的打包四通道帧转换为检测网络需要的输入张量：
//! 形状 `(1, 3, S, S)`，RGB 平面排列，数值归一化到 `[0, 1]`。
//!
//! 缩放保持宽高比，空白区域以灰色 114 填充，缩放后的图像居中放置，
//! 像素采用最近邻采样。解码阶段依赖同一个 [`Letterbox`] 把坐标映射回原图，
//! 因此两者必须共用这里的几何计算。

use thiserror::Error;
use tracing::debug;

use crate::{
  frame::{BYTES_PER_PIXEL, Frame, PixelFormat},
  tensor::Tensor,
};

/// letterbox 填充值（0-255）
pub const PAD_VALUE: u8 = 114;
const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreprocessError {
  #[error("帧尺寸无效: {width}x{height}")]
  InvalidGeometry { width: u32, height: u32 },
  #[error("模型输入尺寸无效: {0}")]
  InvalidInputSize(u32),
  #[error("不支持的像素格式: {0:?}")]
  UnsupportedFormat(PixelFormat),
  #[error("行跨度过小: 跨度 {stride} 字节, 至少需要 {required} 字节")]
  StrideTooSmall { stride: usize, required: usize },
  #[error("缓冲区大小不匹配: 期望至少 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
}

/// 原图与模型输入之间的 letterbox 变换
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  size: u32,
  source_width: u32,
  source_height: u32,
  scale: f64,
  scaled_width: u32,
  scaled_height: u32,
  pad_left: u32,
  pad_top: u32,
}

impl Letterbox {
  pub fn new(width: u32, height: u32, size: u32) -> Result<Self, PreprocessError> {
    if width == 0 || height == 0 {
      return Err(PreprocessError::InvalidGeometry { width, height });
    }
    if size == 0 {
      return Err(PreprocessError::InvalidInputSize(size));
    }

    // min(S/W, S/H) == S/max(W, H)，整数运算得到精确的 floor(W * scale)
    let longest = u64::from(width.max(height));
    let scaled_width = (u64::from(width) * u64::from(size) / longest) as u32;
    let scaled_height = (u64::from(height) * u64::from(size) / longest) as u32;

    Ok(Self {
      size,
      source_width: width,
      source_height: height,
      scale: f64::from(size) / longest as f64,
      scaled_width,
      scaled_height,
      pad_left: (size - scaled_width) / 2,
      pad_top: (size - scaled_height) / 2,
    })
  }

  pub fn size(&self) -> u32 {
    self.size
  }

  pub fn scale(&self) -> f64 {
    self.scale
  }

  pub fn scaled_dimensions(&self) -> (u32, u32) {
    (self.scaled_width, self.scaled_height)
  }

  pub fn padding(&self) -> (u32, u32) {
    (self.pad_left, self.pad_top)
  }

  pub fn source_dimensions(&self) -> (u32, u32) {
    (self.source_width, self.source_height)
  }

  /// 原图坐标 -> 模型输入坐标
  pub fn map_point(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (f64::from(x) * self.scale + f64::from(self.pad_left)) as f32,
      (f64::from(y) * self.scale + f64::from(self.pad_top)) as f32,
    )
  }

  /// 模型输入坐标 -> 原图坐标
  pub fn unmap_point(&self, x: f32, y: f32) -> (f32, f32) {
    (
      ((f64::from(x) - f64::from(self.pad_left)) / self.scale) as f32,
      ((f64::from(y) - f64::from(self.pad_top)) / self.scale) as f32,
    )
  }

  pub fn map_length(&self, length: f32) -> f32 {
    (f64::from(length) * self.scale) as f32
  }

  pub fn unmap_length(&self, length: f32) -> f32 {
    (f64::from(length) / self.scale) as f32
  }

  /// 目标列/行在源图中的最近邻索引
  fn source_indices(scaled: u32, source: u32) -> Vec<usize> {
    let ratio = f64::from(scaled) / f64::from(source);
    let last = source as usize - 1;
    (0..scaled)
      .map(|dst| ((f64::from(dst) / ratio) as usize).min(last))
      .collect()
  }
}

/// 预处理一帧，返回输入张量和对应的 letterbox 变换
pub fn preprocess(frame: &Frame<'_>, size: u32) -> Result<(Tensor, Letterbox), PreprocessError> {
  let letterbox = Letterbox::new(frame.width(), frame.height(), size)?;
  let offsets = frame
    .format()
    .rgb_offsets()
    .ok_or(PreprocessError::UnsupportedFormat(frame.format()))?;

  let row_bytes = frame.width() as usize * BYTES_PER_PIXEL;
  if frame.stride() < row_bytes {
    return Err(PreprocessError::StrideTooSmall {
      stride: frame.stride(),
      required: row_bytes,
    });
  }

  let data = frame.data();
  // 步长来自宿主，溢出时按无法满足的长度处理
  let expected = frame
    .stride()
    .checked_mul(frame.height() as usize - 1)
    .and_then(|bytes| bytes.checked_add(row_bytes))
    .unwrap_or(usize::MAX);
  if data.len() < expected {
    return Err(PreprocessError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let side = size as usize;
  let plane = side * side;
  let mut tensor = vec![f32::from(PAD_VALUE) / 255.0; RGB_CHANNELS * plane];

  let (scaled_width, scaled_height) = letterbox.scaled_dimensions();
  let (pad_left, pad_top) = letterbox.padding();
  let columns = Letterbox::source_indices(scaled_width, frame.width());
  let rows = Letterbox::source_indices(scaled_height, frame.height());

  for (dy, &sy) in rows.iter().enumerate() {
    let src_row = &data[sy * frame.stride()..sy * frame.stride() + row_bytes];
    let dst_row = (pad_top as usize + dy) * side + pad_left as usize;
    for (dx, &sx) in columns.iter().enumerate() {
      let pixel = &src_row[sx * BYTES_PER_PIXEL..(sx + 1) * BYTES_PER_PIXEL];
      for (c, &offset) in offsets.iter().enumerate() {
        tensor[c * plane + dst_row + dx] = f32::from(pixel[offset]) / 255.0;
      }
    }
  }

  debug!(
    "预处理完成: {}x{} -> {}x{}, 缩放 {:.4}, 填充 ({}, {})",
    frame.width(),
    frame.height(),
    scaled_width,
    scaled_height,
    letterbox.scale(),
    pad_left,
    pad_top
  );

  Ok((
    Tensor::from_canvas([1, RGB_CHANNELS, side, side], tensor),
    letterbox,
  ))
}

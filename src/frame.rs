// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/frame.rs - 视频帧定义
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

pub const BYTES_PER_PIXEL: usize = 4;

/// 宿主声明的像素格式
///
/// 只有 `Rgba` 与 `Bgra` 两种打包四通道格式可以送入预处理，
/// 其余格式由预处理阶段拒绝。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
  Rgba,
  Bgra,
  Nv12,
  I420,
}

impl PixelFormat {
  /// R、G、B 三个通道在单个像素内的字节偏移
  pub fn rgb_offsets(self) -> Option<[usize; 3]> {
    match self {
      PixelFormat::Rgba => Some([0, 1, 2]),
      PixelFormat::Bgra => Some([2, 1, 0]),
      PixelFormat::Nv12 | PixelFormat::I420 => None,
    }
  }
}

/// 借用的视频帧，仅在一次调用期间有效
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
  width: u32,
  height: u32,
  stride: usize,
  format: PixelFormat,
  data: &'a [u8],
}

impl<'a> Frame<'a> {
  pub fn new(width: u32, height: u32, format: PixelFormat, data: &'a [u8]) -> Self {
    Self {
      width,
      height,
      stride: width as usize * BYTES_PER_PIXEL,
      format,
      data,
    }
  }

  /// 设置行跨度（字节），宿主缓冲区存在行对齐时使用
  pub fn with_stride(mut self, stride: usize) -> Self {
    self.stride = stride;
    self
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn stride(&self) -> usize {
    self.stride
  }

  pub fn format(&self) -> PixelFormat {
    self.format
  }

  pub fn data(&self) -> &'a [u8] {
    self.data
  }
}

/// 输入源产生的自有帧
#[derive(Debug, Clone)]
pub struct OwnedFrame {
  width: u32,
  height: u32,
  stride: usize,
  format: PixelFormat,
  data: Box<[u8]>,
}

impl OwnedFrame {
  pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
    Self {
      width,
      height,
      stride: width as usize * BYTES_PER_PIXEL,
      format,
      data: data.into_boxed_slice(),
    }
  }

  /// 用同一个颜色填充整帧，测试与基准中使用
  pub fn filled(width: u32, height: u32, format: PixelFormat, pixel: [u8; 4]) -> Self {
    let data = pixel
      .iter()
      .copied()
      .cycle()
      .take(width as usize * height as usize * BYTES_PER_PIXEL)
      .collect();
    Self::new(width, height, format, data)
  }

  pub fn with_stride(mut self, stride: usize) -> Self {
    self.stride = stride;
    self
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn as_frame(&self) -> Frame<'_> {
    Frame::new(self.width, self.height, self.format, &self.data).with_stride(self.stride)
  }
}

impl AsMut<[u8]> for OwnedFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

/// 宿主按需提供当前帧
///
/// 只有在本次 tick 确定要执行推理时才会被调用。
pub trait FrameProvider {
  fn current_frame(&self) -> Option<Frame<'_>>;
}

impl FrameProvider for OwnedFrame {
  fn current_frame(&self) -> Option<Frame<'_>> {
    Some(self.as_frame())
  }
}

impl FrameProvider for Frame<'_> {
  fn current_frame(&self) -> Option<Frame<'_>> {
    Some(*self)
  }
}

impl<P: FrameProvider> FrameProvider for Option<P> {
  fn current_frame(&self) -> Option<Frame<'_>> {
    self.as_ref().and_then(P::current_frame)
  }
}

// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/tensor.rs - 张量定义
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

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("张量数据长度不匹配: 形状 {shape:?} 需要 {expected} 个元素, 实际为 {actual}")]
pub struct ShapeMismatch {
  pub shape: Vec<usize>,
  pub expected: usize,
  pub actual: usize,
}

/// 连续存储的 f32 张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: Box<[usize]>,
  data: Box<[f32]>,
}

impl Tensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ShapeMismatch> {
    let expected = shape.iter().product::<usize>();
    if expected != data.len() {
      return Err(ShapeMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      shape: shape.into_boxed_slice(),
      data: data.into_boxed_slice(),
    })
  }

  /// 预处理画布，长度由调用方保证
  pub(crate) fn from_canvas(shape: [usize; 4], data: Vec<f32>) -> Self {
    debug_assert_eq!(shape.iter().product::<usize>(), data.len());
    Self {
      shape: Box::new(shape),
      data: data.into_boxed_slice(),
    }
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }
}

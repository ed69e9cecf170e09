// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/model.rs - 模型
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

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::tensor::{ShapeMismatch, Tensor};

/// 已编译的检测模型
pub trait Model: Send {
  /// 模型声明的固定输入边长，动态尺寸返回 None
  fn input_size(&self) -> Option<u32>;

  fn forward(&mut self, input: &Tensor) -> Result<Tensor, InferenceError>;
}

/// 从文件加载并编译模型
pub trait ModelLoader: Send + Sync {
  type Model: Model;

  fn load(&self, path: &Path) -> Result<Self::Model, ModelLoadError>;
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("模型路径为空")]
  EmptyPath,
  #[error("模型文件读取错误: {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("模型无效: {0}")]
  Malformed(String),
  #[error("模型张量形状不兼容: {0}")]
  IncompatibleShape(String),
}

impl ModelLoadError {
  pub fn io(path: &Path, source: std::io::Error) -> Self {
    ModelLoadError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理运行时错误: {0}")]
  Runtime(String),
  #[error("无法识别的输出形状: {0:?}")]
  UnrecognizedOutputShape(Vec<usize>),
  #[error("输出张量错误: {0}")]
  Shape(#[from] ShapeMismatch),
}

mod engine;
pub use self::engine::{InferenceEngine, ModelOutput};

#[cfg(feature = "onnx_runtime")]
mod onnx;
#[cfg(feature = "onnx_runtime")]
pub use self::onnx::{OnnxModel, OnnxModelBuilder};

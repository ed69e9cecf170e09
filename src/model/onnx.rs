// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 模型
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

use std::path::Path;

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::ValueType,
};
use tracing::{debug, info};

use super::{InferenceError, Model, ModelLoadError, ModelLoader};
use crate::tensor::Tensor;

const ONNX_NUM_INPUTS: usize = 1;
const ONNX_INPUT_RANK: usize = 4;
const ONNX_INPUT_CHANNELS: i64 = 3;

impl From<ort::Error> for InferenceError {
  fn from(err: ort::Error) -> Self {
    InferenceError::Runtime(err.to_string())
  }
}

fn malformed(msg: &str, e: ort::Error) -> ModelLoadError {
  ModelLoadError::Malformed(format!("{}: {}", msg, e))
}

/// ONNX 模型加载配置
#[derive(Debug, Clone)]
pub struct OnnxModelBuilder {
  intra_threads: usize,
  optimization_level: GraphOptimizationLevel,
}

impl Default for OnnxModelBuilder {
  fn default() -> Self {
    Self {
      intra_threads: 4,
      optimization_level: GraphOptimizationLevel::Level3,
    }
  }
}

impl OnnxModelBuilder {
  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = threads.max(1);
    self
  }

  pub fn optimization_level(mut self, level: GraphOptimizationLevel) -> Self {
    self.optimization_level = level;
    self
  }

  pub fn build(&self, path: &Path) -> Result<OnnxModel, ModelLoadError> {
    info!("加载模型文件: {}", path.display());
    let model_data = std::fs::read(path).map_err(|e| ModelLoadError::io(path, e))?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()
      .map_err(|e| malformed("无法创建会话构建器", e))?
      .with_optimization_level(self.optimization_level.clone())
      .map_err(|e| malformed("无法设置优化等级", e))?
      .with_intra_threads(self.intra_threads)
      .map_err(|e| malformed("无法设置线程数", e))?
      .commit_from_memory(&model_data)
      .map_err(|e| malformed("无法编译模型", e))?;

    let input_size = validate_io(&session)?;
    match input_size {
      Some(size) => info!("模型加载完成, 固定输入尺寸 {}x{}", size, size),
      None => info!("模型加载完成, 动态输入尺寸"),
    }

    Ok(OnnxModel {
      session,
      input_size,
    })
  }
}

impl ModelLoader for OnnxModelBuilder {
  type Model = OnnxModel;

  fn load(&self, path: &Path) -> Result<OnnxModel, ModelLoadError> {
    self.build(path)
  }
}

/// 检查输入输出张量，返回模型声明的固定输入边长
fn validate_io(session: &Session) -> Result<Option<u32>, ModelLoadError> {
  if session.inputs.len() != ONNX_NUM_INPUTS {
    return Err(ModelLoadError::IncompatibleShape(format!(
      "预期模型输入数量为 {}, 实际为 {}",
      ONNX_NUM_INPUTS,
      session.inputs.len()
    )));
  }
  if session.outputs.is_empty() {
    return Err(ModelLoadError::IncompatibleShape("模型没有输出".to_string()));
  }

  let input = &session.inputs[0];
  let dims: Vec<i64> = match &input.input_type {
    ValueType::Tensor { shape, .. } => shape.iter().copied().collect(),
    other => {
      return Err(ModelLoadError::IncompatibleShape(format!(
        "输入 {} 不是张量: {:?}",
        input.name, other
      )));
    }
  };
  debug!("模型输入 {}: {:?}", input.name, dims);

  if dims.len() != ONNX_INPUT_RANK {
    return Err(ModelLoadError::IncompatibleShape(format!(
      "预期输入为 NCHW 四维张量, 实际形状 {:?}",
      dims
    )));
  }
  if dims[1] >= 0 && dims[1] != ONNX_INPUT_CHANNELS {
    return Err(ModelLoadError::IncompatibleShape(format!(
      "预期输入通道数为 {}, 实际形状 {:?}",
      ONNX_INPUT_CHANNELS, dims
    )));
  }

  // 负数维度表示动态尺寸
  match (dims[2], dims[3]) {
    (h, w) if h > 0 && w > 0 && h == w => Ok(Some(h as u32)),
    (h, w) if h > 0 && w > 0 => Err(ModelLoadError::IncompatibleShape(format!(
      "仅支持正方形输入, 实际为 {}x{}",
      w, h
    ))),
    _ => Ok(None),
  }
}

/// ONNX Runtime 上编译好的模型
pub struct OnnxModel {
  session: Session,
  input_size: Option<u32>,
}

impl Model for OnnxModel {
  fn input_size(&self) -> Option<u32> {
    self.input_size
  }

  fn forward(&mut self, input: &Tensor) -> Result<Tensor, InferenceError> {
    let shape = input.shape().to_vec();
    let value = ort::value::Tensor::from_array((shape, input.data().to_vec().into_boxed_slice()))?;

    let outputs = self.session.run(ort::inputs![value])?;
    let (name, output) = outputs
      .iter()
      .next()
      .ok_or_else(|| InferenceError::Runtime("模型没有产生输出".to_string()))?;

    let (shape, data) = output.try_extract_tensor::<f32>()?;
    let shape: Vec<usize> = shape
      .iter()
      .map(|&dim| usize::try_from(dim))
      .collect::<Result<_, _>>()
      .map_err(|_| InferenceError::UnrecognizedOutputShape(Vec::new()))?;
    debug!("模型输出 {}: {:?}", name, shape);

    Ok(Tensor::new(shape, data.to_vec())?)
  }
}

// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/model/engine.rs - 推理引擎
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

use std::{
  path::{Path, PathBuf},
  sync::atomic::{AtomicU64, Ordering},
  time::Instant,
};

use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::{InferenceError, Model, ModelLoadError, ModelLoader};
use crate::{
  decode::{LayoutPreference, OutputLayout},
  tensor::Tensor,
};

/// 一次推理的原始输出
#[derive(Debug, Clone)]
pub struct ModelOutput {
  tensor: Tensor,
  layout: OutputLayout,
  generation: u64,
}

impl ModelOutput {
  pub fn new(
    tensor: Tensor,
    preference: LayoutPreference,
    generation: u64,
  ) -> Result<Self, InferenceError> {
    let layout = OutputLayout::resolve(tensor.shape(), preference)?;
    Ok(Self {
      tensor,
      layout,
      generation,
    })
  }

  pub fn tensor(&self) -> &Tensor {
    &self.tensor
  }

  pub fn layout(&self) -> OutputLayout {
    self.layout
  }

  /// 产生该输出的模型代数
  pub fn generation(&self) -> u64 {
    self.generation
  }
}

struct LoadedModel<M> {
  model: M,
  path: PathBuf,
  generation: u64,
}

struct Slot<M> {
  loaded: Option<LoadedModel<M>>,
  // 已换入的模型总数，代数在锁内分配
  swaps: u64,
}

/// 持有当前模型的推理引擎
///
/// 加载与推理共用同一把锁：推理期间模型不会被替换，
/// 新模型在锁外编译完成后才整体换入，加载失败时保留原模型。
pub struct InferenceEngine<L: ModelLoader> {
  loader: L,
  slot: Mutex<Slot<L::Model>>,
  // 当前模型代数的只读副本，只在持有 slot 锁时写入
  current: AtomicU64,
}

impl<L: ModelLoader> InferenceEngine<L> {
  pub fn new(loader: L) -> Self {
    Self {
      loader,
      slot: Mutex::new(Slot {
        loaded: None,
        swaps: 0,
      }),
      current: AtomicU64::new(0),
    }
  }

  /// 加载模型并替换当前模型，返回新模型的代数
  pub fn load(&self, path: impl AsRef<Path>) -> Result<u64, ModelLoadError> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
      return Err(ModelLoadError::EmptyPath);
    }

    info!("加载模型: {}", path.display());
    let start = Instant::now();
    let model = match self.loader.load(path) {
      Ok(model) => model,
      Err(e) => {
        error!("模型加载失败: {}: {}", path.display(), e);
        return Err(e);
      }
    };

    let (generation, previous) = {
      let mut slot = self.slot.lock();
      slot.swaps += 1;
      let generation = slot.swaps;
      let previous = slot.loaded.replace(LoadedModel {
        model,
        path: path.to_path_buf(),
        generation,
      });
      self.current.store(generation, Ordering::Release);
      (generation, previous)
    };
    drop(previous);

    info!(
      "模型加载完成: {} (第 {} 代, 耗时 {:?})",
      path.display(),
      generation,
      start.elapsed()
    );
    Ok(generation)
  }

  /// 卸载当前模型，返回之前是否有模型
  pub fn unload(&self) -> bool {
    let previous = {
      let mut slot = self.slot.lock();
      self.current.store(0, Ordering::Release);
      slot.loaded.take()
    };
    match previous {
      Some(loaded) => {
        info!("卸载模型: {}", loaded.path.display());
        true
      }
      None => false,
    }
  }

  pub fn is_loaded(&self) -> bool {
    self.slot.lock().loaded.is_some()
  }

  pub fn loaded_path(&self) -> Option<PathBuf> {
    let slot = self.slot.lock();
    slot.loaded.as_ref().map(|loaded| loaded.path.clone())
  }

  /// 当前模型代数，0 表示没有已加载的模型
  ///
  /// 不经过模型锁，推理进行中也能立即读取。
  pub fn generation(&self) -> u64 {
    self.current.load(Ordering::Acquire)
  }

  /// 当前模型声明的固定输入边长
  pub fn input_size(&self) -> Option<u32> {
    let slot = self.slot.lock();
    slot.loaded.as_ref().and_then(|loaded| loaded.model.input_size())
  }

  /// 使用当前模型推理，未加载模型时返回 `Ok(None)`
  pub fn infer(
    &self,
    input: &Tensor,
    preference: LayoutPreference,
  ) -> Result<Option<ModelOutput>, InferenceError> {
    let (tensor, generation) = {
      let mut slot = self.slot.lock();
      let Some(loaded) = slot.loaded.as_mut() else {
        return Ok(None);
      };
      let start = Instant::now();
      let tensor = loaded.model.forward(input)?;
      debug!("推理耗时: {:?}", start.elapsed());
      (tensor, loaded.generation)
    };

    ModelOutput::new(tensor, preference, generation).map(Some)
  }
}

// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/filter.rs - 检测滤镜
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

//! # 检测滤镜
//!
//! 宿主以两条互不等待的调用路径驱动滤镜：
//!
//! - tick：节流 → 取帧 → 预处理 → 推理 → 解码 → NMS → 发布；
//! - render：读取最近一次发布的检测结果，原样放行帧，不触碰模型锁。
//!
//! 两条路径都只需要 `&self`，宿主可以在不同线程上调用。

use std::{
  convert::Infallible,
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
  },
  time::Instant,
};

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  decode::decode,
  detection::{DetectionSet, DetectionStore, FollowTarget},
  frame::{Frame, FrameProvider},
  model::{InferenceEngine, InferenceError, ModelLoader},
  nms::suppress,
  preprocess::{PreprocessError, preprocess},
  settings::FilterSettings,
  throttle::FrameThrottler,
};

/// 只记录前若干次渲染
const RENDER_LOG_LIMIT: u64 = 10;

#[derive(Error, Debug)]
pub enum FilterError {
  #[error("预处理错误: {0}")]
  Preprocess(#[from] PreprocessError),
  #[error("推理错误: {0}")]
  Inference(#[from] InferenceError),
}

/// 宿主视频滤镜的生命周期接口
pub trait VideoFilter: Sized + Send + Sync {
  type Settings;
  type Error;

  fn create(settings: Self::Settings) -> Result<Self, Self::Error>;

  fn update(&self, settings: Self::Settings);

  /// 周期性 tick，`seconds` 为距上次 tick 的时间
  fn on_tick(&self, seconds: f32, frames: &dyn FrameProvider);

  fn on_render<'f>(&self, frame: Frame<'f>) -> RenderPass<'f>;

  fn destroy(self);
}

/// 一次渲染的输入，帧不做任何修改
#[derive(Debug, Clone)]
pub struct RenderPass<'f> {
  pub frame: Frame<'f>,
  pub detections: Arc<DetectionSet>,
  /// 是否需要叠加检测框
  pub render_boxes: bool,
  /// 跟随模式下的目标
  pub follow_target: Option<FollowTarget>,
}

/// 一次 tick 的结果
#[derive(Debug)]
pub enum TickOutcome {
  Disabled,
  Throttled,
  ModelNotLoaded,
  NoFrame,
  Published { sequence: u64, detections: usize },
  /// 推理期间配置关闭了推理或模型已更换，结果被丢弃
  Stale,
  Failed(FilterError),
}

pub struct YoloFilter<L: ModelLoader> {
  settings: RwLock<Arc<FilterSettings>>,
  // 串行化配置更新，模型路径的比较与加载不会交错
  update_lock: Mutex<()>,
  // 只有 tick 路径会加锁
  throttler: Mutex<FrameThrottler>,
  engine: InferenceEngine<L>,
  store: DetectionStore,
  render_count: AtomicU64,
  published: AtomicU64,
}

impl<L: ModelLoader> YoloFilter<L> {
  pub fn with_loader(loader: L, settings: FilterSettings) -> Self {
    let filter = Self {
      settings: RwLock::new(Arc::new(FilterSettings::default())),
      update_lock: Mutex::new(()),
      throttler: Mutex::new(FrameThrottler::default()),
      engine: InferenceEngine::new(loader),
      store: DetectionStore::new(),
      render_count: AtomicU64::new(0),
      published: AtomicU64::new(0),
    };
    filter.apply_settings(settings);
    filter
  }

  pub fn settings(&self) -> Arc<FilterSettings> {
    Arc::clone(&self.settings.read())
  }

  pub fn engine(&self) -> &InferenceEngine<L> {
    &self.engine
  }

  pub fn detections(&self) -> Arc<DetectionSet> {
    self.store.snapshot()
  }

  pub fn render_count(&self) -> u64 {
    self.render_count.load(Ordering::Relaxed)
  }

  /// tick 路径发布的检测结果组数，不含清空
  pub fn published_count(&self) -> u64 {
    self.published.load(Ordering::Relaxed)
  }

  /// 应用新配置，模型路径变化时重新加载或卸载模型
  ///
  /// 新配置先于模型加载生效，加载期间完成的 tick 不会再发布结果。
  pub fn apply_settings(&self, settings: FilterSettings) {
    let _update = self.update_lock.lock();
    let settings = Arc::new(settings.sanitized());
    info!(
      "更新配置: 模型 '{}', 启用推理 {}, 置信度 {:.2}, 间隔 {}, 输入 {}, 目标 {}",
      settings.model_path,
      settings.enable_inference,
      settings.confidence_threshold,
      settings.frame_interval,
      settings.model_input_size,
      settings.target_class
    );

    self.throttler.lock().set_interval(settings.frame_interval);
    *self.settings.write() = Arc::clone(&settings);
    if !settings.enable_inference && !self.store.snapshot().is_empty() {
      self.store.clear();
    }
    self.sync_model(&settings.model_path);
  }

  fn sync_model(&self, model_path: &str) {
    if model_path.is_empty() {
      if self.engine.unload() {
        self.store.clear();
      }
      return;
    }

    let wanted = Path::new(model_path);
    if self.engine.loaded_path().as_deref() == Some(wanted) {
      return;
    }
    if self.engine.load(wanted).is_err()
      && let Some(current) = self.engine.loaded_path()
    {
      warn!("继续使用已加载的模型: {}", current.display());
    }
  }

  /// 执行一次 tick
  pub fn tick(&self, frames: &dyn FrameProvider) -> TickOutcome {
    let settings = self.settings();
    if !settings.enable_inference {
      return TickOutcome::Disabled;
    }
    if !self.throttler.lock().should_run() {
      return TickOutcome::Throttled;
    }
    if !self.engine.is_loaded() {
      return TickOutcome::ModelNotLoaded;
    }
    let Some(frame) = frames.current_frame() else {
      return TickOutcome::NoFrame;
    };

    match self.run_pipeline(&frame, &settings) {
      Ok(Some((set, generation))) => {
        let detections = set.len();
        let published = self.store.publish_if(set, || {
          self.settings.read().enable_inference && self.engine.generation() == generation
        });
        match published {
          Some(sequence) => {
            self.published.fetch_add(1, Ordering::Relaxed);
            TickOutcome::Published {
              sequence,
              detections,
            }
          }
          None => {
            debug!("配置已变更, 丢弃第 {} 代模型的检测结果", generation);
            TickOutcome::Stale
          }
        }
      }
      Ok(None) => TickOutcome::ModelNotLoaded,
      Err(e) => {
        warn!("本次推理跳过, 保留上一组检测结果: {}", e);
        TickOutcome::Failed(e)
      }
    }
  }

  fn run_pipeline(
    &self,
    frame: &Frame<'_>,
    settings: &FilterSettings,
  ) -> Result<Option<(DetectionSet, u64)>, FilterError> {
    let size = self
      .engine
      .input_size()
      .unwrap_or_else(|| settings.model_input_size.pixels());

    let now = Instant::now();
    let (input, letterbox) = preprocess(frame, size)?;
    let preprocessed = now.elapsed();

    let Some(output) = self.engine.infer(&input, settings.output_layout)? else {
      return Ok(None);
    };
    let inferred = now.elapsed();

    let candidates = decode(&output, &letterbox, settings.confidence_threshold);
    let candidate_count = candidates.len();
    let detections = suppress(candidates, settings.nms_threshold);

    debug!(
      "预处理 {:.2?} / 推理 {:.2?} / 后处理 {:.2?}, {} 个候选框保留 {} 个",
      preprocessed,
      inferred - preprocessed,
      now.elapsed() - inferred,
      candidate_count,
      detections.len()
    );
    for det in &detections {
      debug!(
        "  {} ({}) {:.2} @ ({:.1}, {:.1}, {:.1}, {:.1})",
        det.label().unwrap_or("unknown"),
        det.class_id,
        det.confidence,
        det.x,
        det.y,
        det.width,
        det.height
      );
    }

    let set = DetectionSet::new(detections, frame.width(), frame.height());
    Ok(Some((set, output.generation())))
  }

  /// 跟随模式下，满足类别过滤且置信度最高的检测框中心
  pub fn follow_target(&self) -> Option<FollowTarget> {
    let settings = self.settings();
    self.follow_target_in(&settings, &self.store.snapshot())
  }

  fn follow_target_in(
    &self,
    settings: &FilterSettings,
    detections: &DetectionSet,
  ) -> Option<FollowTarget> {
    if !settings.follow_mode {
      return None;
    }
    detections
      .best_match(settings.target_class)
      .map(FollowTarget::from)
  }

  /// 渲染路径，只读取检测结果快照
  pub fn render<'f>(&self, frame: Frame<'f>) -> RenderPass<'f> {
    let count = self.render_count.fetch_add(1, Ordering::Relaxed) + 1;
    let settings = self.settings();
    let detections = self.store.snapshot();

    if count <= RENDER_LOG_LIMIT {
      info!(
        "渲染 #{}: {}x{}, 检测结果 #{} 共 {} 个",
        count,
        frame.width(),
        frame.height(),
        detections.sequence(),
        detections.len()
      );
    }

    let follow_target = self.follow_target_in(&settings, &detections);
    RenderPass {
      frame,
      detections,
      render_boxes: settings.render_boxes,
      follow_target,
    }
  }
}

impl<L: ModelLoader + Default> VideoFilter for YoloFilter<L> {
  type Settings = FilterSettings;
  type Error = Infallible;

  fn create(settings: FilterSettings) -> Result<Self, Infallible> {
    info!("创建检测滤镜");
    Ok(Self::with_loader(L::default(), settings))
  }

  fn update(&self, settings: FilterSettings) {
    self.apply_settings(settings);
  }

  fn on_tick(&self, seconds: f32, frames: &dyn FrameProvider) {
    let outcome = self.tick(frames);
    debug!("tick ({:.3}s): {:?}", seconds, outcome);
  }

  fn on_render<'f>(&self, frame: Frame<'f>) -> RenderPass<'f> {
    self.render(frame)
  }

  fn destroy(self) {
    info!(
      "销毁检测滤镜, 共渲染 {} 次, 发布检测结果 {} 次",
      self.render_count(),
      self.published_count()
    );
    self.engine.unload();
  }
}

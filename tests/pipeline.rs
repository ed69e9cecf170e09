// 该文件是 Xunzong （寻踪） 项目的一部分。
// tests/pipeline.rs - 推理流程集成测试
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
  path::Path,
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
    mpsc,
  },
  thread,
};

use parking_lot::Mutex;

use xunzong::{
  decode::LayoutPreference,
  filter::{TickOutcome, VideoFilter, YoloFilter},
  frame::{OwnedFrame, PixelFormat},
  model::{InferenceEngine, InferenceError, Model, ModelLoadError, ModelLoader},
  settings::{ClassFilter, FilterSettings},
  tensor::Tensor,
};

/// 每次加载得到一个新编号的模型，输出全部填充该编号
#[derive(Default)]
struct CountingLoader {
  loads: AtomicU32,
}

struct CountingModel {
  id: u32,
}

impl Model for CountingModel {
  fn input_size(&self) -> Option<u32> {
    Some(64)
  }

  fn forward(&mut self, input: &Tensor) -> Result<Tensor, InferenceError> {
    assert_eq!(input.shape(), &[1, 3, 64, 64]);
    let mut data = Vec::with_capacity(6 * 32);
    for _ in 0..6 * 32 {
      data.push(self.id as f32);
      if data.len() == 3 * 32 {
        thread::yield_now();
      }
    }
    Ok(Tensor::new(vec![1, 6, 32], data)?)
  }
}

impl ModelLoader for CountingLoader {
  type Model = CountingModel;

  fn load(&self, path: &Path) -> Result<CountingModel, ModelLoadError> {
    if !path.exists() {
      return Err(ModelLoadError::io(
        path,
        std::io::Error::from(std::io::ErrorKind::NotFound),
      ));
    }
    let id = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
    Ok(CountingModel { id })
  }
}

/// 两个目标：0 类在 (16, 16)，2 类在 (48, 40)，模型输入 64x64
#[derive(Default)]
struct SceneLoader;

struct SceneModel;

impl Model for SceneModel {
  fn input_size(&self) -> Option<u32> {
    Some(64)
  }

  fn forward(&mut self, _input: &Tensor) -> Result<Tensor, InferenceError> {
    #[rustfmt::skip]
    let rows = [
      // cx, cy, w, h, obj, c0, c1, c2
      [16.0, 16.0, 8.0, 8.0, 1.0, 0.90, 0.0, 0.0],
      [17.0, 16.0, 8.0, 8.0, 1.0, 0.80, 0.0, 0.0],
      [48.0, 40.0, 12.0, 6.0, 1.0, 0.0, 0.1, 0.95],
      [40.0, 40.0, 4.0, 4.0, 1.0, 0.2, 0.2, 0.2],
    ];
    Ok(Tensor::new(vec![4, 8], rows.concat())?)
  }
}

impl ModelLoader for SceneLoader {
  type Model = SceneModel;

  fn load(&self, _path: &Path) -> Result<SceneModel, ModelLoadError> {
    Ok(SceneModel)
  }
}

/// 一次性闸门：到达时通知测试线程，然后等待放行
struct Gate {
  arrived: mpsc::Sender<()>,
  release: mpsc::Receiver<()>,
}

struct GateHandle {
  arrived: mpsc::Receiver<()>,
  release: mpsc::Sender<()>,
}

fn gate() -> (Gate, GateHandle) {
  let (arrived_tx, arrived_rx) = mpsc::channel();
  let (release_tx, release_rx) = mpsc::channel();
  (
    Gate {
      arrived: arrived_tx,
      release: release_rx,
    },
    GateHandle {
      arrived: arrived_rx,
      release: release_tx,
    },
  )
}

impl Gate {
  fn pass(self) {
    self.arrived.send(()).unwrap();
    self.release.recv().unwrap();
  }
}

/// 加载 `slow.onnx` 时停在闸门上；首个模型的第一次推理也可以停在闸门上
#[derive(Default)]
struct GatedLoader {
  slow_load: Mutex<Option<Gate>>,
  first_forward: Mutex<Option<Gate>>,
}

struct GatedModel {
  gate: Option<Gate>,
}

impl Model for GatedModel {
  fn input_size(&self) -> Option<u32> {
    Some(64)
  }

  fn forward(&mut self, _input: &Tensor) -> Result<Tensor, InferenceError> {
    if let Some(gate) = self.gate.take() {
      gate.pass();
    }
    Ok(Tensor::new(vec![1, 6, 1], vec![32.0, 32.0, 16.0, 16.0, 0.9, 0.1])?)
  }
}

impl ModelLoader for GatedLoader {
  type Model = GatedModel;

  fn load(&self, path: &Path) -> Result<GatedModel, ModelLoadError> {
    if path.ends_with("slow.onnx") {
      let gate = self.slow_load.lock().take();
      if let Some(gate) = gate {
        gate.pass();
      }
    }
    Ok(GatedModel {
      gate: self.first_forward.lock().take(),
    })
  }
}

fn gated_settings() -> FilterSettings {
  FilterSettings {
    model_path: "fast.onnx".to_string(),
    enable_inference: true,
    frame_interval: 1,
    output_layout: LayoutPreference::ChannelFirst,
    ..FilterSettings::default()
  }
}

fn model_files() -> (tempfile::TempDir, [String; 2]) {
  let dir = tempfile::tempdir().unwrap();
  let paths = ["a.onnx", "b.onnx"].map(|name| {
    let path = dir.path().join(name);
    std::fs::write(&path, b"model").unwrap();
    path.to_str().unwrap().to_string()
  });
  (dir, paths)
}

#[test]
fn concurrent_load_and_infer_never_mix_sessions() {
  let (_dir, paths) = model_files();
  let engine = Arc::new(InferenceEngine::new(CountingLoader::default()));
  engine.load(&paths[0]).unwrap();

  let done = Arc::new(AtomicBool::new(false));
  let loader = {
    let engine = Arc::clone(&engine);
    let done = Arc::clone(&done);
    thread::spawn(move || {
      for i in 0..200 {
        engine.load(&paths[i % 2]).unwrap();
      }
      done.store(true, Ordering::SeqCst);
    })
  };

  let input = Tensor::new(vec![1, 3, 64, 64], vec![0.5; 3 * 64 * 64]).unwrap();
  let mut last_generation = 0;
  let mut inferences = 0;
  while !done.load(Ordering::SeqCst) || inferences == 0 {
    let output = engine
      .infer(&input, LayoutPreference::ChannelFirst)
      .unwrap()
      .expect("model stays loaded");
    let generation = output.generation();
    // 单线程加载时，模型编号与代数一致
    assert!(
      output
        .tensor()
        .data()
        .iter()
        .all(|&v| v == generation as f32),
      "output of generation {} mixes sessions",
      generation
    );
    assert!(generation >= last_generation);
    last_generation = generation;
    inferences += 1;
  }

  loader.join().unwrap();
  assert_eq!(engine.generation(), 201);
}

#[test]
fn loading_missing_model_keeps_engine_state() {
  let dir = tempfile::tempdir().unwrap();
  let missing = dir.path().join("missing.onnx");
  let engine = InferenceEngine::new(CountingLoader::default());

  assert!(matches!(engine.load(&missing), Err(ModelLoadError::Io { .. })));
  assert!(!engine.is_loaded());
  let input = Tensor::new(vec![1, 3, 64, 64], vec![0.0; 3 * 64 * 64]).unwrap();
  assert!(engine.infer(&input, LayoutPreference::Auto).unwrap().is_none());

  let (_dir, paths) = model_files();
  engine.load(&paths[0]).unwrap();
  assert!(engine.load(&missing).is_err());
  assert_eq!(engine.loaded_path().as_deref(), Some(Path::new(&paths[0])));
  assert!(engine.infer(&input, LayoutPreference::ChannelFirst).unwrap().is_some());
}

#[cfg(feature = "onnx_runtime")]
#[test]
fn onnx_loader_reports_missing_and_malformed_files() {
  use xunzong::model::OnnxModelBuilder;

  let dir = tempfile::tempdir().unwrap();
  let engine = InferenceEngine::new(OnnxModelBuilder::default());
  assert!(matches!(
    engine.load(dir.path().join("missing.onnx")),
    Err(ModelLoadError::Io { .. })
  ));

  let garbage = dir.path().join("garbage.onnx");
  std::fs::write(&garbage, b"definitely not a protobuf").unwrap();
  assert!(matches!(engine.load(&garbage), Err(ModelLoadError::Malformed(_))));
  assert!(!engine.is_loaded());
}

fn scene_settings() -> FilterSettings {
  FilterSettings {
    model_path: "scene.onnx".to_string(),
    enable_inference: true,
    frame_interval: 3,
    confidence_threshold: 0.5,
    target_class: ClassFilter::Class(2),
    follow_mode: true,
    ..FilterSettings::default()
  }
}

#[test]
fn tick_and_render_through_host_interface() {
  let filter = YoloFilter::<SceneLoader>::create(scene_settings()).unwrap();
  // 128x64 -> 64: 缩放 0.5, 上下各填充 16
  let frame = OwnedFrame::filled(128, 64, PixelFormat::Bgra, [0, 0, 0, 255]);

  filter.on_tick(0.016, &frame);
  filter.on_tick(0.016, &frame);
  assert!(filter.on_render(frame.as_frame()).detections.is_empty());

  filter.on_tick(0.016, &frame);
  let pass = filter.on_render(frame.as_frame());
  let detections = pass.detections.items();
  assert_eq!(detections.len(), 2);
  assert_eq!(pass.detections.frame_size(), (128, 64));

  // 按置信度降序
  assert_eq!(detections[0].class_id, 2);
  assert!((detections[0].x - 84.0).abs() < 1e-4);
  assert!((detections[0].y - 42.0).abs() < 1e-4);
  assert!((detections[0].width - 24.0).abs() < 1e-4);
  assert!((detections[0].height - 12.0).abs() < 1e-4);
  assert_eq!(detections[1].class_id, 0);
  assert_eq!(detections[1].confidence, 0.9);

  let target = pass.follow_target.unwrap();
  assert_eq!(target.class_id, 2);
  assert!((target.x - 96.0).abs() < 1e-4);
  assert!((target.y - 48.0).abs() < 1e-4);

  filter.update(FilterSettings {
    enable_inference: false,
    ..scene_settings()
  });
  assert!(filter.on_render(frame.as_frame()).detections.is_empty());
  assert!(matches!(filter.tick(&frame), TickOutcome::Disabled));
  filter.destroy();
}

#[test]
fn render_never_waits_for_tick() {
  let filter = Arc::new(YoloFilter::<SceneLoader>::create(FilterSettings {
    frame_interval: 1,
    ..scene_settings()
  })
  .unwrap());
  let frame = Arc::new(OwnedFrame::filled(128, 64, PixelFormat::Rgba, [9, 9, 9, 255]));

  let ticker = {
    let filter = Arc::clone(&filter);
    let frame = Arc::clone(&frame);
    thread::spawn(move || {
      for _ in 0..100 {
        assert!(matches!(filter.tick(&*frame), TickOutcome::Published { .. }));
      }
    })
  };

  let mut last_sequence = 0;
  for _ in 0..100 {
    let pass = filter.render(frame.as_frame());
    let sequence = pass.detections.sequence();
    assert!(sequence >= last_sequence);
    assert!(pass.detections.is_empty() || pass.detections.len() == 2);
    last_sequence = sequence;
  }

  ticker.join().unwrap();
  assert_eq!(filter.detections().sequence(), 100);
  assert_eq!(filter.render_count(), 100);
}

#[test]
fn tick_during_slow_update_publishes_nothing() {
  let (load_gate, load) = gate();
  let loader = GatedLoader {
    slow_load: Mutex::new(Some(load_gate)),
    ..GatedLoader::default()
  };
  let filter = Arc::new(YoloFilter::with_loader(loader, gated_settings()));
  let frame = OwnedFrame::filled(64, 64, PixelFormat::Rgba, [0, 0, 0, 255]);
  assert!(matches!(filter.tick(&frame), TickOutcome::Published { .. }));

  let updater = {
    let filter = Arc::clone(&filter);
    thread::spawn(move || {
      filter.update(FilterSettings {
        enable_inference: false,
        model_path: "slow.onnx".to_string(),
        ..gated_settings()
      })
    })
  };

  // 更新线程停在慢加载里
  load.arrived.recv().unwrap();
  assert!(matches!(filter.tick(&frame), TickOutcome::Disabled));
  assert!(filter.on_render(frame.as_frame()).detections.is_empty());

  load.release.send(()).unwrap();
  updater.join().unwrap();
  assert!(matches!(filter.tick(&frame), TickOutcome::Disabled));
  assert!(filter.on_render(frame.as_frame()).detections.is_empty());
  assert_eq!(filter.published_count(), 1);
}

#[test]
fn unload_during_inference_leaves_no_detections() {
  let (forward_gate, forward) = gate();
  let loader = GatedLoader {
    first_forward: Mutex::new(Some(forward_gate)),
    ..GatedLoader::default()
  };
  let filter = Arc::new(YoloFilter::with_loader(loader, gated_settings()));
  let frame = Arc::new(OwnedFrame::filled(64, 64, PixelFormat::Rgba, [0, 0, 0, 255]));

  let ticker = {
    let filter = Arc::clone(&filter);
    let frame = Arc::clone(&frame);
    thread::spawn(move || filter.tick(&*frame))
  };
  forward.arrived.recv().unwrap();

  // 卸载要等推理释放模型锁
  let updater = {
    let filter = Arc::clone(&filter);
    thread::spawn(move || {
      filter.update(FilterSettings {
        model_path: String::new(),
        ..gated_settings()
      })
    })
  };
  thread::sleep(std::time::Duration::from_millis(20));
  forward.release.send(()).unwrap();

  let outcome = ticker.join().unwrap();
  updater.join().unwrap();
  assert!(
    matches!(outcome, TickOutcome::Published { .. } | TickOutcome::Stale),
    "unexpected outcome {:?}",
    outcome
  );
  assert!(!filter.engine().is_loaded());
  assert!(filter.on_render(frame.as_frame()).detections.is_empty());
  assert!(matches!(filter.tick(&*frame), TickOutcome::ModelNotLoaded));
}

#[test]
fn swapped_model_discards_in_flight_result() {
  let (forward_gate, forward) = gate();
  let loader = GatedLoader {
    first_forward: Mutex::new(Some(forward_gate)),
    ..GatedLoader::default()
  };
  let filter = Arc::new(YoloFilter::with_loader(loader, gated_settings()));
  let frame = Arc::new(OwnedFrame::filled(64, 64, PixelFormat::Rgba, [0, 0, 0, 255]));

  let ticker = {
    let filter = Arc::clone(&filter);
    let frame = Arc::clone(&frame);
    thread::spawn(move || filter.tick(&*frame))
  };
  forward.arrived.recv().unwrap();

  // 换入新模型要等推理释放模型锁
  let updater = {
    let filter = Arc::clone(&filter);
    thread::spawn(move || {
      filter.update(FilterSettings {
        model_path: "other.onnx".to_string(),
        ..gated_settings()
      })
    })
  };
  thread::sleep(std::time::Duration::from_millis(20));
  forward.release.send(()).unwrap();
  let outcome = ticker.join().unwrap();
  updater.join().unwrap();

  assert_eq!(filter.engine().generation(), 2);
  match outcome {
    // 推理结果先于换入发布，属于第 1 代模型
    TickOutcome::Published { sequence, .. } => assert_eq!(sequence, 1),
    TickOutcome::Stale => assert!(filter.detections().is_empty()),
    other => panic!("unexpected outcome {:?}", other),
  }
  assert!(matches!(filter.tick(&*frame), TickOutcome::Published { .. }));
  assert_eq!(filter.published_count(), filter.detections().sequence());
}

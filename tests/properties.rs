// 该文件是 Xunzong （寻踪） 项目的一部分。
// tests/properties.rs - 性质测试
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

use proptest::prelude::*;
use xunzong::{
  decode::{LayoutPreference, decode},
  detection::Detection,
  frame::{OwnedFrame, PixelFormat},
  model::ModelOutput,
  nms::{iou, suppress},
  preprocess::{Letterbox, PAD_VALUE, preprocess},
  tensor::Tensor,
  throttle::FrameThrottler,
};

fn input_size() -> impl Strategy<Value = u32> {
  prop_oneof![Just(32u32), Just(64), Just(96), Just(320)]
}

fn detection() -> impl Strategy<Value = Detection> {
  (
    0.0f32..200.0,
    0.0f32..200.0,
    1.0f32..80.0,
    1.0f32..80.0,
    0.0f32..1.0,
    0u32..3,
  )
    .prop_map(|(x, y, width, height, confidence, class_id)| Detection {
      x,
      y,
      width,
      height,
      confidence,
      class_id,
    })
}

proptest! {
  #![proptest_config(ProptestConfig::with_cases(64))]

  #[test]
  fn preprocess_shape_and_range(
    width in 1u32..300,
    height in 1u32..300,
    size in input_size(),
    pixel in any::<[u8; 4]>(),
  ) {
    let frame = OwnedFrame::filled(width, height, PixelFormat::Bgra, pixel);
    let (tensor, _) = preprocess(&frame.as_frame(), size).unwrap();
    let side = size as usize;
    prop_assert_eq!(tensor.shape(), &[1, 3, side, side]);
    prop_assert!(tensor.data().iter().all(|v| (0.0..=1.0).contains(v)));
  }

  #[test]
  fn padding_is_gray(width in 1u32..300, height in 1u32..300, size in input_size()) {
    let frame = OwnedFrame::filled(width, height, PixelFormat::Rgba, [0, 0, 0, 255]);
    let (tensor, letterbox) = preprocess(&frame.as_frame(), size).unwrap();
    let (scaled_width, scaled_height) = letterbox.scaled_dimensions();
    let (pad_left, pad_top) = letterbox.padding();
    let side = size as usize;
    let pad = f32::from(PAD_VALUE) / 255.0;

    for (i, value) in tensor.data().iter().enumerate() {
      let x = (i % side) as u32;
      let y = (i / side % side) as u32;
      let inside = x >= pad_left
        && x < pad_left + scaled_width
        && y >= pad_top
        && y < pad_top + scaled_height;
      if inside {
        prop_assert_eq!(*value, 0.0);
      } else {
        prop_assert!((value - pad).abs() < 1e-6);
      }
    }
  }

  #[test]
  fn decode_recovers_original_box(
    width in 16u32..2000,
    height in 16u32..2000,
    size in input_size(),
    fx in 0.1f32..0.9,
    fy in 0.1f32..0.9,
    fw in 0.05f32..0.2,
    fh in 0.05f32..0.2,
  ) {
    let letterbox = Letterbox::new(width, height, size).unwrap();
    let (cx, cy) = (fx * width as f32, fy * height as f32);
    let (w, h) = (fw * width as f32, fh * height as f32);

    let (mx, my) = letterbox.map_point(cx, cy);
    let data = vec![mx, my, letterbox.map_length(w), letterbox.map_length(h), 0.1, 0.8];
    let tensor = Tensor::new(vec![1, 6, 1], data).unwrap();
    let output = ModelOutput::new(tensor, LayoutPreference::ChannelFirst, 1).unwrap();

    let detections = decode(&output, &letterbox, 0.5);
    prop_assert_eq!(detections.len(), 1);
    let det = detections[0];
    let tolerance = 1e-3 * width.max(height) as f32;
    prop_assert!((det.x - (cx - w / 2.0)).abs() < tolerance);
    prop_assert!((det.y - (cy - h / 2.0)).abs() < tolerance);
    prop_assert!((det.width - w).abs() < tolerance);
    prop_assert!((det.height - h).abs() < tolerance);
    prop_assert_eq!(det.class_id, 1);
  }

  #[test]
  fn suppression_is_a_fixed_point(
    detections in prop::collection::vec(detection(), 0..40),
    threshold in 0.1f32..0.9,
  ) {
    let once = suppress(detections, threshold);
    let twice = suppress(once.clone(), threshold);
    prop_assert_eq!(once, twice);
  }

  #[test]
  fn kept_detections_of_a_class_do_not_overlap(
    detections in prop::collection::vec(detection(), 0..40),
    threshold in 0.1f32..0.9,
  ) {
    let kept = suppress(detections, threshold);
    prop_assert!(kept.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    for (i, a) in kept.iter().enumerate() {
      for b in &kept[i + 1..] {
        if a.class_id == b.class_id {
          prop_assert!(iou(a, b) <= threshold);
        }
      }
    }
  }

  #[test]
  fn throttler_runs_once_per_interval(interval in 1u32..20, rounds in 1usize..5) {
    let mut throttler = FrameThrottler::new(interval);
    for _ in 0..rounds {
      for call in 1..=interval {
        prop_assert_eq!(throttler.should_run(), call == interval);
      }
    }
  }
}

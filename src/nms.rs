// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/nms.rs - 非极大值抑制
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

use crate::detection::Detection;

/// 默认 NMS IOU 阈值
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

/// 计算两个边界框的 IoU，无重叠或面积为零时为 0
pub fn iou(a: &Detection, b: &Detection) -> f32 {
  let x1 = a.x.max(b.x);
  let y1 = a.y.max(b.y);
  let x2 = (a.x + a.width).min(b.x + b.width);
  let y2 = (a.y + a.height).min(b.y + b.height);

  if !(x2 > x1 && y2 > y1) {
    return 0.0;
  }

  let intersection = (x2 - x1) * (y2 - y1);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 {
    let value = intersection / union;
    if value.is_finite() { value } else { 0.0 }
  } else {
    0.0
  }
}

/// 按类别做非极大值抑制，结果按置信度降序排列
pub fn suppress(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
  detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut suppressed = vec![false; detections.len()];
  let mut kept = Vec::with_capacity(detections.len());

  for i in 0..detections.len() {
    if suppressed[i] {
      continue;
    }
    let best = detections[i];
    kept.push(best);

    for j in (i + 1)..detections.len() {
      if !suppressed[j]
        && detections[j].class_id == best.class_id
        && iou(&best, &detections[j]) > iou_threshold
      {
        suppressed[j] = true;
      }
    }
  }

  kept
}

// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/detection.rs - 检测结果与结果存储
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

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::{labels::coco_label, settings::ClassFilter};

/// 单个检测框，坐标为原始帧像素坐标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
  /// 边界框左上角 x 坐标
  pub x: f32,
  /// 边界框左上角 y 坐标
  pub y: f32,
  pub width: f32,
  pub height: f32,
  pub confidence: f32,
  pub class_id: u32,
}

impl Detection {
  pub fn area(&self) -> f32 {
    self.width * self.height
  }

  pub fn centroid(&self) -> (f32, f32) {
    (self.x + self.width / 2.0, self.y + self.height / 2.0)
  }

  pub fn label(&self) -> Option<&'static str> {
    coco_label(self.class_id)
  }
}

/// 一次发布的检测结果，发布后不再修改
#[derive(Debug, Clone, Default)]
pub struct DetectionSet {
  items: Box<[Detection]>,
  frame_width: u32,
  frame_height: u32,
  sequence: u64,
}

impl DetectionSet {
  pub fn new(items: Vec<Detection>, frame_width: u32, frame_height: u32) -> Self {
    Self {
      items: items.into_boxed_slice(),
      frame_width,
      frame_height,
      sequence: 0,
    }
  }

  pub fn items(&self) -> &[Detection] {
    &self.items
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// 检测结果所对应的原始帧尺寸
  pub fn frame_size(&self) -> (u32, u32) {
    (self.frame_width, self.frame_height)
  }

  /// 发布序号，0 表示尚未发布过任何结果
  pub fn sequence(&self) -> u64 {
    self.sequence
  }

  /// 满足类别过滤条件且置信度最高的检测框
  pub fn best_match(&self, filter: ClassFilter) -> Option<&Detection> {
    self
      .items
      .iter()
      .filter(|det| filter.accepts(det.class_id))
      .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
  }
}

/// 跟随模式下交给视角控制方的目标
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FollowTarget {
  pub x: f32,
  pub y: f32,
  pub class_id: u32,
  pub confidence: f32,
}

impl From<&Detection> for FollowTarget {
  fn from(det: &Detection) -> Self {
    let (x, y) = det.centroid();
    Self {
      x,
      y,
      class_id: det.class_id,
      confidence: det.confidence,
    }
  }
}

/// 最新检测结果的存储
///
/// tick 路径整体替换，渲染路径取快照。锁只在交换 `Arc` 时持有，
/// 与模型锁相互独立，长时间的推理不会阻塞渲染读取。
#[derive(Debug, Default)]
pub struct DetectionStore {
  current: Mutex<Arc<DetectionSet>>,
}

impl DetectionStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// 发布新的检测结果，返回其发布序号
  pub fn publish(&self, set: DetectionSet) -> u64 {
    let mut current = self.current.lock();
    let (sequence, previous) = Self::swap_in(&mut current, set);
    drop(current);
    // 旧结果在锁外释放
    drop(previous);
    debug!("发布检测结果 #{}", sequence);
    sequence
  }

  /// 在存储锁内确认 `still_valid` 后再发布，否则丢弃该结果
  ///
  /// 与 [`DetectionStore::clear`] 串行：先于清空完成的确认，其结果会被清空覆盖；
  /// 晚于清空的确认能看到清空前写入的状态。
  pub fn publish_if(
    &self,
    set: DetectionSet,
    still_valid: impl FnOnce() -> bool,
  ) -> Option<u64> {
    let mut current = self.current.lock();
    if !still_valid() {
      return None;
    }
    let (sequence, previous) = Self::swap_in(&mut current, set);
    drop(current);
    drop(previous);
    debug!("发布检测结果 #{}", sequence);
    Some(sequence)
  }

  fn swap_in(
    current: &mut Arc<DetectionSet>,
    mut set: DetectionSet,
  ) -> (u64, Arc<DetectionSet>) {
    set.sequence = current.sequence + 1;
    (set.sequence, std::mem::replace(current, Arc::new(set)))
  }

  /// 发布一个空结果，下游不再看到过期的检测框
  pub fn clear(&self) -> u64 {
    self.publish(DetectionSet::default())
  }

  pub fn snapshot(&self) -> Arc<DetectionSet> {
    Arc::clone(&self.current.lock())
  }
}

// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/throttle.rs - 推理节流
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

/// 每 N 次 tick 放行一次推理
#[derive(Debug, Clone)]
pub struct FrameThrottler {
  counter: u32,
  interval: u32,
}

impl Default for FrameThrottler {
  fn default() -> Self {
    Self::new(1)
  }
}

impl FrameThrottler {
  pub fn new(interval: u32) -> Self {
    Self {
      counter: 0,
      interval: interval.max(1),
    }
  }

  pub fn interval(&self) -> u32 {
    self.interval
  }

  /// 修改间隔，从下一次调用开始生效，计数器保持不变
  pub fn set_interval(&mut self, interval: u32) {
    self.interval = interval.max(1);
  }

  pub fn should_run(&mut self) -> bool {
    self.counter = self.counter.saturating_add(1);
    // 间隔缩小时计数器可能已经越过新的间隔
    if self.counter >= self.interval {
      self.counter = 0;
      true
    } else {
      false
    }
  }
}

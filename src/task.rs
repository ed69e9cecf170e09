// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/task.rs - 滤镜驱动任务
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
  thread,
  time::{Duration, Instant},
};

use tracing::{info, warn};

use crate::{
  filter::{TickOutcome, VideoFilter, YoloFilter},
  frame::OwnedFrame,
  model::ModelLoader,
};

/// 以宿主的身份驱动滤镜
pub trait Task<I, F>: Sized {
  type Error;
  fn run_task(self, input: I, filter: &F) -> Result<(), Self::Error>;
}

fn log_detections<L: ModelLoader>(filter: &YoloFilter<L>) {
  let detections = filter.detections();
  info!("检测结果 #{}: {} 个目标", detections.sequence(), detections.len());
  for det in detections.items() {
    info!(
      "  {} ({}) 置信度 {:.2}, 位置 ({:.1}, {:.1}), 大小 {:.1}x{:.1}",
      det.label().unwrap_or("unknown"),
      det.class_id,
      det.confidence,
      det.x,
      det.y,
      det.width,
      det.height
    );
  }
  if let Some(target) = filter.follow_target() {
    info!("跟随目标: ({:.1}, {:.1})", target.x, target.y);
  }
}

/// 单帧：tick 到真正执行一次推理为止，再渲染一次
pub struct OneShotTask;

impl<I, L> Task<I, YoloFilter<L>> for OneShotTask
where
  I: Iterator<Item = OwnedFrame>,
  L: ModelLoader,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, filter: &YoloFilter<L>) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");

    let now = Instant::now();
    let outcome = loop {
      match filter.tick(&frame) {
        TickOutcome::Throttled => continue,
        outcome => break outcome,
      }
    };
    let elapsed = now.elapsed();

    match outcome {
      TickOutcome::Published { .. } => info!("推理完成，耗时: {:.2?}", elapsed),
      TickOutcome::Disabled => warn!("推理未启用"),
      TickOutcome::ModelNotLoaded => anyhow::bail!("模型未加载"),
      TickOutcome::Failed(e) => return Err(e.into()),
      TickOutcome::NoFrame | TickOutcome::Throttled | TickOutcome::Stale => {}
    }

    let pass = filter.render(frame.as_frame());
    info!("渲染完成，检测框叠加: {}", pass.render_boxes);
    log_detections(filter);

    Ok(())
  }
}

/// 同一帧重复推理，统计平均耗时
pub struct RepeatShotTask {
  times: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self { times: 1000 }
  }
}

impl RepeatShotTask {
  pub fn with_times(mut self, times: usize) -> Self {
    self.times = times;
    self
  }
}

impl<I, L> Task<I, YoloFilter<L>> for RepeatShotTask
where
  I: Iterator<Item = OwnedFrame>,
  L: ModelLoader,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, filter: &YoloFilter<L>) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");

    let mut times = Vec::with_capacity(self.times);
    for i in 0..self.times {
      let now = Instant::now();
      match filter.tick(&frame) {
        TickOutcome::Published { detections, .. } => {
          let elapsed = now.elapsed();
          info!("({})推理完成，{} 个目标，耗时: {:.2?}", i, detections, elapsed);
          times.push(elapsed);
        }
        TickOutcome::Failed(e) => return Err(e.into()),
        TickOutcome::ModelNotLoaded => anyhow::bail!("模型未加载"),
        TickOutcome::Disabled => anyhow::bail!("推理未启用"),
        TickOutcome::Throttled | TickOutcome::NoFrame | TickOutcome::Stale => {}
      }
      filter.render(frame.as_frame());
    }

    // 前两次包含预热开销
    if times.len() > 2 {
      warn!(
        "平均推理时间: {:.2?}",
        times.iter().skip(2).sum::<Duration>() / (times.len() - 2) as u32
      );
    }
    log_detections(filter);

    Ok(())
  }
}

/// 连续帧：每帧 tick 一次、渲染一次，Ctrl-C 或达到帧数后退出
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<I, F> Task<I, F> for ContinuousTask
where
  I: Iterator<Item = OwnedFrame>,
  F: VideoFilter,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, filter: &F) -> Result<(), Self::Error> {
    info!("开始任务...");
    let (tx, rx) = std::sync::mpsc::channel();

    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })?;

    let mut frame_index = 0usize;
    let mut last_tick = Instant::now();
    for frame in input {
      frame_index = frame_index.wrapping_add(1);

      let seconds = last_tick.elapsed().as_secs_f32();
      last_tick = Instant::now();
      filter.on_tick(seconds, &frame);
      let pass = filter.on_render(frame.as_frame());
      info!(
        "第 {} 帧: 检测结果 #{} 共 {} 个，耗时: {:.2?}",
        frame_index,
        pass.detections.sequence(),
        pass.detections.len(),
        last_tick.elapsed()
      );
      if let Some(target) = pass.follow_target {
        info!("跟随目标: ({:.1}, {:.1})", target.x, target.y);
      }

      if self.frame_number.is_some_and(|n| frame_index >= n) {
        info!("达到指定帧数 {}, 退出任务循环", frame_index);
        break;
      }
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    info!("任务完成，退出");
    Ok(())
  }
}

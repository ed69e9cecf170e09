// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理基准
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use tracing::info;
use xunzong::{
  FromUrl,
  args::FilterArgs,
  filter::YoloFilter,
  input::InputWrapper,
  model::OnnxModelBuilder,
  task::{RepeatShotTask, Task},
};

/// Xunzong 推理基准
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源，例如 image:///path/to/image.png
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 重复次数
  #[arg(long, default_value = "1000", value_name = "TIMES")]
  pub times: usize,

  /// ONNX Runtime 线程数
  #[arg(long, default_value = "4", value_name = "THREADS")]
  pub threads: usize,

  #[command(flatten)]
  pub filter: FilterArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let mut settings = args.filter.resolve()?;
  // 基准测试每次 tick 都要推理
  settings.frame_interval = 1;

  info!("模型文件路径: {}", settings.model_path);
  info!("输入来源: {}", args.input);
  info!("重复次数: {}, 线程数: {}", args.times, args.threads);

  let input = InputWrapper::from_url(&args.input)?;
  let loader = OnnxModelBuilder::default().intra_threads(args.threads);
  let filter = YoloFilter::with_loader(loader, settings);

  RepeatShotTask::default()
    .with_times(args.times)
    .run_task(input, &filter)?;

  Ok(())
}

// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/bin/simple_continueshot.rs - 连续帧检测
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
  filter::{VideoFilter, YoloFilter},
  input::InputWrapper,
  model::OnnxModelBuilder,
  task::{ContinuousTask, Task},
};

/// Xunzong 连续帧检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源，例如 gst://file/path/to/video.mp4 或 gst://camera/dev/video0
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 处理的帧数，不指定时处理到输入结束
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  #[command(flatten)]
  pub filter: FilterArgs,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let settings = args.filter.resolve()?;

  info!("模型文件路径: {}", settings.model_path);
  info!("输入来源: {}", args.input);

  let input = InputWrapper::from_url(&args.input)?;
  let filter = YoloFilter::<OnnxModelBuilder>::create(settings)?;

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .run_task(input, &filter)?;

  filter.destroy();
  Ok(())
}

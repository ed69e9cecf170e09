// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Args;
use tracing::info;

use crate::{
  decode::LayoutPreference,
  settings::{ClassFilter, FilterSettings, InputSize, SettingsError},
};

/// 滤镜配置参数，命令行的值覆盖配置文件
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
  /// JSON 配置文件
  #[arg(long, value_name = "FILE")]
  pub settings: Option<PathBuf>,

  /// ONNX 模型文件路径
  #[arg(long, value_name = "MODEL")]
  pub model: Option<String>,

  /// 启用推理（未提供配置文件时默认启用）
  #[arg(long, value_name = "BOOL")]
  pub enable_inference: Option<bool>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// 推理间隔（帧）
  #[arg(long, value_name = "FRAMES")]
  pub frame_interval: Option<u32>,

  /// 跟随目标类别，类别编号或 all
  #[arg(long, value_name = "CLASS")]
  pub target_class: Option<ClassFilter>,

  /// 模型输入尺寸: 320 / 416 / 512 / 640
  #[arg(long, value_name = "SIZE")]
  pub input_size: Option<InputSize>,

  #[arg(long, value_name = "BOOL")]
  pub render_boxes: Option<bool>,

  /// 跟随模式
  #[arg(long, value_name = "BOOL")]
  pub follow: Option<bool>,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub nms_threshold: Option<f32>,

  /// 输出张量布局
  #[arg(long, value_enum, value_name = "LAYOUT")]
  pub output_layout: Option<LayoutPreference>,
}

impl FilterArgs {
  pub fn resolve(&self) -> Result<FilterSettings, SettingsError> {
    let mut settings = match &self.settings {
      Some(path) => {
        info!("读取配置文件: {}", path.display());
        FilterSettings::from_json_file(path)?
      }
      None => FilterSettings {
        enable_inference: true,
        ..FilterSettings::default()
      },
    };

    if let Some(model) = &self.model {
      settings.model_path = model.clone();
    }
    if let Some(enable) = self.enable_inference {
      settings.enable_inference = enable;
    }
    if let Some(confidence) = self.confidence {
      settings.confidence_threshold = confidence;
    }
    if let Some(interval) = self.frame_interval {
      settings.frame_interval = interval;
    }
    if let Some(target) = self.target_class {
      settings.target_class = target;
    }
    if let Some(size) = self.input_size {
      settings.model_input_size = size;
    }
    if let Some(render) = self.render_boxes {
      settings.render_boxes = render;
    }
    if let Some(follow) = self.follow {
      settings.follow_mode = follow;
    }
    if let Some(nms) = self.nms_threshold {
      settings.nms_threshold = nms;
    }
    if let Some(layout) = self.output_layout {
      settings.output_layout = layout;
    }

    Ok(settings)
  }
}

// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/settings.rs - 滤镜配置
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

use std::{fmt, path::Path, str::FromStr};

use serde::Deserialize;
use thiserror::Error;

use crate::{decode::LayoutPreference, nms::DEFAULT_IOU_THRESHOLD};

const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug)]
pub enum SettingsError {
  #[error("配置文件读取错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置文件解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("不支持的模型输入尺寸: {0}，可选 320 / 416 / 512 / 640")]
  UnsupportedInputSize(u32),
  #[error("无效的模型输入尺寸: {0}")]
  InvalidInputSize(String),
  #[error("无效的类别过滤: {0}")]
  InvalidClassFilter(String),
}

/// 模型输入边长
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "u32")]
pub enum InputSize {
  S320,
  S416,
  S512,
  #[default]
  S640,
}

impl InputSize {
  pub const ALL: [InputSize; 4] = [InputSize::S320, InputSize::S416, InputSize::S512, InputSize::S640];

  pub fn pixels(self) -> u32 {
    match self {
      InputSize::S320 => 320,
      InputSize::S416 => 416,
      InputSize::S512 => 512,
      InputSize::S640 => 640,
    }
  }
}

impl TryFrom<u32> for InputSize {
  type Error = SettingsError;

  fn try_from(value: u32) -> Result<Self, Self::Error> {
    InputSize::ALL
      .into_iter()
      .find(|size| size.pixels() == value)
      .ok_or(SettingsError::UnsupportedInputSize(value))
  }
}

impl FromStr for InputSize {
  type Err = SettingsError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let value = s
      .trim()
      .parse::<u32>()
      .map_err(|_| SettingsError::InvalidInputSize(s.to_string()))?;
    InputSize::try_from(value)
  }
}

impl fmt::Display for InputSize {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.pixels())
  }
}

/// 目标类别过滤，"all" 表示全部类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "ClassFilterRepr")]
pub enum ClassFilter {
  #[default]
  All,
  Class(u32),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassFilterRepr {
  Id(u32),
  Name(String),
}

impl TryFrom<ClassFilterRepr> for ClassFilter {
  type Error = SettingsError;

  fn try_from(repr: ClassFilterRepr) -> Result<Self, Self::Error> {
    match repr {
      ClassFilterRepr::Id(id) => Ok(ClassFilter::Class(id)),
      ClassFilterRepr::Name(name) => name.parse(),
    }
  }
}

impl FromStr for ClassFilter {
  type Err = SettingsError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("all") {
      return Ok(ClassFilter::All);
    }
    s.parse::<u32>()
      .map(ClassFilter::Class)
      .map_err(|_| SettingsError::InvalidClassFilter(s.to_string()))
  }
}

impl fmt::Display for ClassFilter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ClassFilter::All => write!(f, "all"),
      ClassFilter::Class(id) => write!(f, "{}", id),
    }
  }
}

impl ClassFilter {
  pub fn accepts(self, class_id: u32) -> bool {
    match self {
      ClassFilter::All => true,
      ClassFilter::Class(id) => id == class_id,
    }
  }
}

/// 滤镜配置
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
  /// 模型文件路径
  pub model_path: String,
  /// 启用推理
  pub enable_inference: bool,
  /// 置信度阈值 (0.0 - 1.0)
  pub confidence_threshold: f32,
  /// 推理间隔（帧）
  pub frame_interval: u32,
  /// 目标类别，目前只用于跟随模式选取目标
  pub target_class: ClassFilter,
  pub model_input_size: InputSize,
  /// 渲染检测框（叠加层尚未实现）
  pub render_boxes: bool,
  /// 跟随模式
  pub follow_mode: bool,
  /// NMS IOU 阈值 (0.0 - 1.0)
  pub nms_threshold: f32,
  /// 输出张量布局
  pub output_layout: LayoutPreference,
}

impl Default for FilterSettings {
  fn default() -> Self {
    Self {
      model_path: String::new(),
      enable_inference: false,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      frame_interval: 1,
      target_class: ClassFilter::All,
      model_input_size: InputSize::S640,
      render_boxes: true,
      follow_mode: false,
      nms_threshold: DEFAULT_IOU_THRESHOLD,
      output_layout: LayoutPreference::Auto,
    }
  }
}

impl FilterSettings {
  pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
    Ok(serde_json::from_str(json)?)
  }

  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
    let json = std::fs::read_to_string(path)?;
    Self::from_json_str(&json)
  }

  /// 把越界的数值收回合法范围
  pub fn sanitized(mut self) -> Self {
    self.confidence_threshold = clamp_unit(self.confidence_threshold, DEFAULT_CONFIDENCE_THRESHOLD);
    self.nms_threshold = clamp_unit(self.nms_threshold, DEFAULT_IOU_THRESHOLD);
    self.frame_interval = self.frame_interval.max(1);
    self
  }
}

fn clamp_unit(value: f32, fallback: f32) -> f32 {
  if value.is_nan() {
    fallback
  } else {
    value.clamp(0.0, 1.0)
  }
}

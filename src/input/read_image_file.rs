// 该文件是 Xunzong （寻踪） 项目的一部分。
// src/input/read_image_file.rs - 图片文件输入
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

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{OwnedFrame, PixelFormat},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("图片读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图片解码错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单张图片，产出一帧 RGBA
pub struct ImageFileInput {
  image: Option<OwnedFrame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 预期 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch(url.scheme().to_string()));
    }

    let path = url.path();
    let image = ImageReader::open(path)?.with_guessed_format()?.decode()?.to_rgba8();
    let (width, height) = image.dimensions();
    info!("读取图片: {} ({}x{})", path, width, height);

    Ok(ImageFileInput {
      image: Some(OwnedFrame::new(
        width,
        height,
        PixelFormat::Rgba,
        image.into_raw(),
      )),
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = OwnedFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}

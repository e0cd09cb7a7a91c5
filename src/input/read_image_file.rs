// 该文件是 Liusha （流沙） 项目的一部分。
// src/input/read_image_file.rs - 从图片文件加载帧
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

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader, imageops::FilterType};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::{FrameLoader, LoadedFrame},
  model::{Tensor, YOLOV8_INPUT_SHAPE},
};

#[derive(Error, Debug)]
pub enum ImageFileLoaderError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法读取 {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("无法解码 {path}: {source}")]
  Decode {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
}

/// 帧引用即图片路径；相对路径基于 `base_dir` 解析
#[derive(Debug, Clone, Default)]
pub struct ImageFileLoader {
  base_dir: Option<PathBuf>,
}

impl ImageFileLoader {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
    ImageFileLoader {
      base_dir: Some(base_dir.into()),
    }
  }

  pub fn resolve(&self, reference: &str) -> PathBuf {
    let path = Path::new(reference);
    match &self.base_dir {
      Some(base) if path.is_relative() => base.join(path),
      _ => path.to_path_buf(),
    }
  }

  pub fn open(&self, reference: &str) -> Result<DynamicImage, ImageFileLoaderError> {
    let path = self.resolve(reference);
    let reader = ImageReader::open(&path).map_err(|source| ImageFileLoaderError::Io {
      path: path.clone(),
      source,
    })?;
    reader
      .decode()
      .map_err(|source| ImageFileLoaderError::Decode { path, source })
  }
}

impl FromUrlWithScheme for ImageFileLoader {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileLoader {
  type Error = ImageFileLoaderError;

  /// `image:` 使用工作目录，`image:///data/frames` 指定基准目录
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileLoaderError::SchemeMismatch);
    }
    let path = url.path();
    if path.is_empty() {
      Ok(Self::new())
    } else {
      Ok(Self::with_base_dir(path))
    }
  }
}

impl FrameLoader for ImageFileLoader {
  type Error = ImageFileLoaderError;

  fn load(&self, reference: &str) -> Result<LoadedFrame, Self::Error> {
    let image = self.open(reference)?;
    let (width, height) = (image.width(), image.height());
    debug!("已加载 {} ({}x{})", reference, width, height);
    Ok(LoadedFrame {
      tensor: prepare_input(&image),
      width,
      height,
    })
  }
}

/// Lanczos3 缩放到 640x640，按 RGB 平面排列并归一化到 [0, 1]
pub fn prepare_input(image: &DynamicImage) -> Tensor {
  let [_, channels, height, width] = YOLOV8_INPUT_SHAPE;
  let resized = image
    .resize_exact(width as u32, height as u32, FilterType::Lanczos3)
    .to_rgb8();

  let mut tensor = Tensor::zeros(&YOLOV8_INPUT_SHAPE);
  let plane = width * height;
  let data = tensor.data_mut();
  for (x, y, pixel) in resized.enumerate_pixels() {
    let offset = y as usize * width + x as usize;
    for c in 0..channels {
      data[c * plane + offset] = pixel[c] as f32 / 255.0;
    }
  }
  tensor
}

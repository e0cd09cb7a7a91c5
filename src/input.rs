// 该文件是 Liusha （流沙） 项目的一部分。
// src/input.rs - 帧加载
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

use thiserror::Error;

use crate::model::Tensor;

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileLoader, ImageFileLoaderError, prepare_input};

/// 已解码并预处理的帧
#[derive(Debug, Clone)]
pub struct LoadedFrame {
  /// 模型输入，`[1, 3, 640, 640]`
  pub tensor: Tensor,
  /// 原图宽度
  pub width: u32,
  /// 原图高度
  pub height: u32,
}

/// 将帧引用解析为模型输入
pub trait FrameLoader: Send + Sync {
  type Error;

  fn load(&self, reference: &str) -> Result<LoadedFrame, Self::Error>;
}

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图片文件加载错误: {0}")]
  ImageFileLoaderError(#[from] ImageFileLoaderError),
}

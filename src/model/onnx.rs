// 该文件是 Liusha （流沙） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use ort::{inputs, session::Session, value::Tensor as OrtTensor};
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Model, Tensor, TensorError},
};

const INPUT_NAME: &str = "images";
const OUTPUT_NAME: &str = "output0";

#[derive(Error, Debug)]
pub enum OnnxModelError {
  #[error("ONNX Runtime 错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("缺少模型路径")]
  MissingPath,
  #[error("无法创建推理会话 {path}: {reason}")]
  Session { path: PathBuf, reason: String },
}

pub struct OnnxModel {
  session: Session,
}

fn session_error(path: &Path, reason: impl ToString) -> OnnxModelError {
  OnnxModelError::Session {
    path: path.to_path_buf(),
    reason: reason.to_string(),
  }
}

impl OnnxModel {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, OnnxModelError> {
    let path = path.as_ref();
    let mut builder = Session::builder().map_err(|e| session_error(path, e))?;
    let session = builder
      .commit_from_file(path)
      .map_err(|e| session_error(path, e))?;
    info!("已加载 ONNX 模型: {}", path.display());
    Ok(OnnxModel { session })
  }
}

impl FromUrlWithScheme for OnnxModel {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModel {
  type Error = OnnxModelError;

  /// `onnx:yolov8m.onnx` 或 `onnx:///models/yolov8m.onnx`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxModelError::SchemeMismatch(format!(
        "期望方案 '{}', 实际方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    let path = url.path();
    if path.is_empty() {
      return Err(OnnxModelError::MissingPath);
    }
    Self::open(path)
  }
}

impl Model for OnnxModel {
  type Error = OnnxModelError;

  fn run(&mut self, input: &Tensor) -> Result<Tensor, Self::Error> {
    let value = OrtTensor::from_array((input.shape().to_vec(), input.data().to_vec()))?;
    let outputs = self.session.run(inputs![INPUT_NAME => value])?;
    let (shape, data) = outputs[OUTPUT_NAME].try_extract_tensor::<f32>()?;
    let shape: Vec<usize> = shape.iter().map(|&dim| dim as usize).collect();
    Ok(Tensor::from_vec(&shape, data.to_vec())?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_foreign_scheme() {
    let url = Url::parse("rknn:model.rknn").unwrap();
    assert!(matches!(
      OnnxModel::from_url(&url),
      Err(OnnxModelError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn missing_model_file_is_an_error() {
    let url = Url::parse("onnx:/nonexistent/liusha/model.onnx").unwrap();
    assert!(OnnxModel::from_url(&url).is_err());
  }
}

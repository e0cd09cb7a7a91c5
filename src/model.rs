// 该文件是 Liusha （流沙） 项目的一部分。
// src/model.rs - 模型
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

use std::fmt;

use thiserror::Error;
use url::Url;

use crate::FromUrl;

/// 推理后端：输入张量 -> 输出张量。同一会话不保证可并发调用。
pub trait Model {
  type Error;

  fn run(&mut self, input: &Tensor) -> Result<Tensor, Self::Error>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
  #[error("形状 {shape:?} 需要 {expected} 个元素, 实际为 {actual}")]
  LengthMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
  #[error("张量形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  ShapeMismatch {
    expected: Vec<usize>,
    actual: Vec<usize>,
  },
}

/// 定长稠密 f32 张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: Box<[usize]>,
  data: Box<[f32]>,
}

impl Tensor {
  pub fn zeros(shape: &[usize]) -> Self {
    let len = shape.iter().product();
    Tensor {
      shape: shape.into(),
      data: vec![0.0; len].into_boxed_slice(),
    }
  }

  pub fn from_vec(shape: &[usize], data: Vec<f32>) -> Result<Self, TensorError> {
    let expected: usize = shape.iter().product();
    if data.len() != expected {
      return Err(TensorError::LengthMismatch {
        shape: shape.to_vec(),
        expected,
        actual: data.len(),
      });
    }
    Ok(Tensor {
      shape: shape.into(),
      data: data.into_boxed_slice(),
    })
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn data_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }

  pub fn expect_shape(&self, expected: &[usize]) -> Result<(), TensorError> {
    if *self.shape != *expected {
      return Err(TensorError::ShapeMismatch {
        expected: expected.to_vec(),
        actual: self.shape.to_vec(),
      });
    }
    Ok(())
  }
}

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

#[derive(Debug, Clone, PartialEq)]
pub struct DetectItem {
  pub class_id: usize,
  pub score: f32,
  pub bbox: [f32; 4], // [x1, y1, x2, y2]，像素坐标
}

impl DetectItem {
  pub fn label(&self) -> &'static str {
    COCO_CLASSES.get(self.class_id).copied().unwrap_or("unknown")
  }
}

impl fmt::Display for DetectItem {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "Object {} (confidence {:.2}): ({:.2}, {:.2}), ({:.2}, {:.2})",
      self.label(),
      self.score,
      self.bbox[0],
      self.bbox[1],
      self.bbox[2],
      self.bbox[3]
    )
  }
}

/// 过滤后的检测结果，按置信度升序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, DetectItem> {
    self.items.iter()
  }
}

pub mod nms;
mod yolov8;
pub use self::yolov8::{
  IOU_THRESHOLD, NUM_CLASSES, NUM_PREDICTIONS, PROB_THRESHOLD, YOLOV8_INPUT_SHAPE,
  YOLOV8_OUTPUT_SHAPE, DecodeError, Yolov8, Yolov8Error, decode, decode_with_threshold,
};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxModel, OnnxModelError};

#[derive(Error, Debug)]
pub enum ModelError {
  #[cfg(feature = "onnx")]
  #[error("ONNX 模型错误: {0}")]
  OnnxModelError(#[from] OnnxModelError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择的推理后端
pub enum ModelWrapper {
  #[cfg(feature = "onnx")]
  Onnx(OnnxModel),
}

impl FromUrl for ModelWrapper {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "onnx")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == OnnxModel::SCHEME {
        return Ok(ModelWrapper::Onnx(OnnxModel::from_url(url)?));
      }
    }
    Err(ModelError::SchemeMismatch(format!(
      "未启用支持 '{}' 的模型后端",
      url.scheme()
    )))
  }
}

impl Model for ModelWrapper {
  type Error = ModelError;

  fn run(&mut self, input: &Tensor) -> Result<Tensor, Self::Error> {
    #[cfg(not(feature = "onnx"))]
    let _ = input;
    match *self {
      #[cfg(feature = "onnx")]
      ModelWrapper::Onnx(ref mut model) => model.run(input).map_err(ModelError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tensor_length_is_checked() {
    assert!(Tensor::from_vec(&[1, 2, 3], vec![0.0; 6]).is_ok());
    assert_eq!(
      Tensor::from_vec(&[1, 2, 3], vec![0.0; 5]),
      Err(TensorError::LengthMismatch {
        shape: vec![1, 2, 3],
        expected: 6,
        actual: 5,
      })
    );
  }

  #[test]
  fn shape_mismatch_is_reported() {
    let tensor = Tensor::zeros(&[1, 84, 10]);
    assert!(tensor.expect_shape(&[1, 84, 10]).is_ok());
    assert!(matches!(
      tensor.expect_shape(&YOLOV8_OUTPUT_SHAPE),
      Err(TensorError::ShapeMismatch { .. })
    ));
  }

  #[test]
  fn detect_item_displays_label() {
    let item = DetectItem {
      class_id: 2,
      score: 0.875,
      bbox: [10.0, 20.0, 30.0, 40.0],
    };
    assert_eq!(
      item.to_string(),
      "Object car (confidence 0.88): (10.00, 20.00), (30.00, 40.00)"
    );
    let unknown = DetectItem {
      class_id: 99,
      ..item
    };
    assert_eq!(unknown.label(), "unknown");
  }

  #[test]
  fn model_scheme_without_backend_is_rejected() {
    let url = Url::parse("tflite:model.tflite").unwrap();
    assert!(matches!(
      ModelWrapper::from_url(&url),
      Err(ModelError::SchemeMismatch(_))
    ));
  }
}

// 该文件是 Liusha （流沙） 项目的一部分。
// src/model/yolov8.rs - YOLOv8 输出解码与检测器
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

use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, warn};

use crate::model::{DetectItem, DetectResult, Model, Tensor, TensorError, nms::filter_boxes};

pub const NUM_CLASSES: usize = 80;
pub const NUM_PREDICTIONS: usize = 8400;
const BOX_LANES: usize = 4;
pub const YOLOV8_INPUT_SHAPE: [usize; 4] = [1, 3, 640, 640];
pub const YOLOV8_OUTPUT_SHAPE: [usize; 3] = [1, BOX_LANES + NUM_CLASSES, NUM_PREDICTIONS];
pub const PROB_THRESHOLD: f32 = 0.5;
pub const IOU_THRESHOLD: f32 = 0.7;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
  #[error("输出长度应为 {expected}, 实际为 {actual}")]
  OutputLength { expected: usize, actual: usize },
}

#[derive(Error, Debug)]
pub enum Yolov8Error {
  #[error("推理失败: {0}")]
  ModelRun(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("张量错误: {0}")]
  Tensor(#[from] TensorError),
  #[error("解码错误: {0}")]
  Decode(#[from] DecodeError),
  #[error("推理会话锁已损坏")]
  SessionPoisoned,
}

/// 取第 `index` 个预测的最高类别分数；严格大于才替换，同分取较小类别
fn detect_class(output: &[f32], index: usize) -> (usize, f32) {
  let mut probability = -1e9f32;
  let mut class_id = 0usize;
  for class in 0..NUM_CLASSES {
    let current = output[NUM_PREDICTIONS * (class + BOX_LANES) + index];
    if current > probability {
      probability = current;
      class_id = class;
    }
  }
  (class_id, probability)
}

/// 使用默认阈值解码
pub fn decode(output: &[f32], image_width: u32, image_height: u32) -> Result<Vec<DetectItem>, DecodeError> {
  decode_with_threshold(output, image_width, image_height, PROB_THRESHOLD)
}

/// 将 `[84, 8400]` 输出解码为像素坐标候选框，顺序与网格扫描顺序一致
pub fn decode_with_threshold(
  output: &[f32],
  image_width: u32,
  image_height: u32,
  prob_threshold: f32,
) -> Result<Vec<DetectItem>, DecodeError> {
  let expected = (BOX_LANES + NUM_CLASSES) * NUM_PREDICTIONS;
  if output.len() != expected {
    return Err(DecodeError::OutputLength {
      expected,
      actual: output.len(),
    });
  }

  let (img_w, img_h) = (image_width as f32, image_height as f32);
  let mut items = Vec::new();
  for index in 0..NUM_PREDICTIONS {
    let (class_id, score) = detect_class(output, index);
    if score < prob_threshold {
      continue;
    }

    let xc = output[index];
    let yc = output[NUM_PREDICTIONS + index];
    let w = output[2 * NUM_PREDICTIONS + index];
    let h = output[3 * NUM_PREDICTIONS + index];

    let bbox = [
      ((xc - w / 2.0) * img_w).trunc(),
      ((yc - h / 2.0) * img_h).trunc(),
      ((xc + w / 2.0) * img_w).trunc(),
      ((yc + h / 2.0) * img_h).trunc(),
    ];
    if !bbox.iter().all(|v| v.is_finite()) {
      warn!("丢弃坐标非有限的预测 {}: {:?}", index, bbox);
      continue;
    }

    items.push(DetectItem {
      class_id,
      score,
      bbox,
    });
  }
  Ok(items)
}

/// YOLOv8 检测器：共享推理会话，调用串行化
pub struct Yolov8<M> {
  session: Mutex<M>,
  prob_threshold: f32,
  iou_threshold: f32,
}

impl<M> Yolov8<M>
where
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(model: M) -> Self {
    Yolov8 {
      session: Mutex::new(model),
      prob_threshold: PROB_THRESHOLD,
      iou_threshold: IOU_THRESHOLD,
    }
  }

  pub fn with_thresholds(mut self, prob_threshold: f32, iou_threshold: f32) -> Self {
    self.prob_threshold = prob_threshold;
    self.iou_threshold = iou_threshold;
    self
  }

  pub fn prob_threshold(&self) -> f32 {
    self.prob_threshold
  }

  pub fn iou_threshold(&self) -> f32 {
    self.iou_threshold
  }

  /// 运行模型并返回去重后的检测结果；`image_width`/`image_height` 为原图尺寸
  pub fn infer(
    &self,
    input: &Tensor,
    image_width: u32,
    image_height: u32,
  ) -> Result<DetectResult, Yolov8Error> {
    input.expect_shape(&YOLOV8_INPUT_SHAPE)?;

    // 仅在推理期间持有会话，解码使用输出副本
    let output = {
      let mut session = self
        .session
        .lock()
        .map_err(|_| Yolov8Error::SessionPoisoned)?;
      debug!("执行模型推理");
      session
        .run(input)
        .map_err(|e| Yolov8Error::ModelRun(Box::new(e)))?
    };
    output.expect_shape(&YOLOV8_OUTPUT_SHAPE)?;

    let candidates =
      decode_with_threshold(output.data(), image_width, image_height, self.prob_threshold)?;
    debug!("候选框 {} 个", candidates.len());
    let items = filter_boxes(candidates, self.iou_threshold);

    Ok(DetectResult {
      items: items.into_boxed_slice(),
    })
  }
}

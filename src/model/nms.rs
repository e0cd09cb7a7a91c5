// 该文件是 Liusha （流沙） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use tracing::debug;

use crate::model::DetectItem;

/// 整数像素矩形，构造时已规范化为 `x0 <= x1`、`y0 <= y1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
  pub x0: i64,
  pub y0: i64,
  pub x1: i64,
  pub y1: i64,
}

impl Rect {
  pub fn new(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
    Rect {
      x0: x0.min(x1),
      y0: y0.min(y1),
      x1: x0.max(x1),
      y1: y0.max(y1),
    }
  }

  /// 坐标向零截断为整数像素
  pub fn from_bbox(bbox: &[f32; 4]) -> Self {
    Rect::new(
      bbox[0] as i64,
      bbox[1] as i64,
      bbox[2] as i64,
      bbox[3] as i64,
    )
  }

  /// 超出 i64 范围时饱和
  pub fn area(&self) -> i64 {
    self
      .x1
      .saturating_sub(self.x0)
      .saturating_mul(self.y1.saturating_sub(self.y0))
  }

  /// 不相交时返回空矩形
  pub fn intersect(&self, other: &Rect) -> Rect {
    let x0 = self.x0.max(other.x0);
    let y0 = self.y0.max(other.y0);
    let x1 = self.x1.min(other.x1);
    let y1 = self.y1.min(other.y1);
    if x0 >= x1 || y0 >= y1 {
      return Rect::new(0, 0, 0, 0);
    }
    Rect { x0, y0, x1, y1 }
  }
}

/// 计算两个边界框的 IoU；并集面积为 0 时返回 0
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let (ra, rb) = (Rect::from_bbox(a), Rect::from_bbox(b));
  let intersection = ra.intersect(&rb).area();
  let union = ra
    .area()
    .saturating_add(rb.area())
    .saturating_sub(intersection);
  if union <= 0 {
    return 0.0;
  }
  intersection as f32 / union as f32
}

/// 贪心去重：按置信度升序遍历，与任一已接受框的 IoU 超过阈值即丢弃。
///
/// 结果保持接受顺序（置信度升序）。重叠簇中先被遍历到的低置信度框会保留下来。
pub fn filter_boxes(mut items: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  items.sort_by(|a, b| a.score.total_cmp(&b.score));

  let mut merged: Vec<DetectItem> = Vec::with_capacity(items.len());
  for candidate in items {
    let overlaps = merged
      .iter()
      .any(|existing| iou(&candidate.bbox, &existing.bbox) > iou_threshold);
    if !overlaps {
      merged.push(candidate);
    }
  }

  debug!("去重后保留 {} 个框", merged.len());
  merged
}

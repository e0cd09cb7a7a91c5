// 该文件是 Liusha （流沙） 项目的一部分。
// src/output/jsonl_record.rs - 将检测结果追加到 JSON Lines 文件
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

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde_json::json;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameRecord, MessageId},
  model::DetectResult,
  output::Render,
};

#[derive(Error, Debug)]
pub enum JsonLinesOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("记录文件锁已损坏")]
  Poisoned,
}

/// 每条处理过的消息一行 JSON，无检测结果时 `detections` 为空数组。
pub struct JsonLinesOutput {
  file: Mutex<File>,
}

impl JsonLinesOutput {
  pub fn create(path: impl AsRef<Path>) -> Result<Self, JsonLinesOutputError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    info!("检测记录写入 {}", path.display());
    Ok(JsonLinesOutput {
      file: Mutex::new(file),
    })
  }
}

impl FromUrlWithScheme for JsonLinesOutput {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonLinesOutputError::SchemeMismatch);
    }
    Self::create(url.path())
  }
}

impl Render for JsonLinesOutput {
  type Error = JsonLinesOutputError;

  fn render_result(
    &self,
    id: &MessageId,
    record: &FrameRecord,
    result: &DetectResult,
  ) -> Result<(), Self::Error> {
    let detections: Vec<_> = result
      .iter()
      .map(|item| {
        json!({
          "class_id": item.class_id,
          "label": item.label(),
          "confidence": item.score,
          "bbox": item.bbox,
        })
      })
      .collect();
    let line = serde_json::to_string(&json!({
      "id": id.as_str(),
      "frame_reference": record.frame_reference,
      "timestamp": record.timestamp,
      "detections": detections,
    }))?;

    let mut file = self
      .file
      .lock()
      .map_err(|_| JsonLinesOutputError::Poisoned)?;
    writeln!(file, "{}", line)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  fn result_with_car() -> DetectResult {
    DetectResult {
      items: vec![DetectItem {
        class_id: 2,
        score: 0.75,
        bbox: [1.0, 2.0, 3.0, 4.0],
      }]
      .into_boxed_slice(),
    }
  }

  #[test]
  fn appends_one_line_per_result() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("report").join("detections.jsonl");
    let output = JsonLinesOutput::create(&path).unwrap();
    let record = FrameRecord::new("car.png");

    output
      .render_result(&MessageId::new("1-0"), &record, &result_with_car())
      .unwrap();
    output
      .render_result(&MessageId::new("1-1"), &record, &DetectResult::default())
      .unwrap();
    output
      .render_result(&MessageId::new("1-2"), &record, &result_with_car())
      .unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = content
      .lines()
      .map(|line| serde_json::from_str(line).unwrap())
      .collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0]["id"], "1-0");
    assert_eq!(lines[1]["id"], "1-1");
    assert_eq!(lines[1]["detections"].as_array().unwrap().len(), 0);
    assert_eq!(lines[2]["id"], "1-2");
    assert_eq!(lines[0]["frame_reference"], "car.png");
    assert_eq!(lines[0]["detections"][0]["label"], "car");
    assert_eq!(lines[0]["detections"][0]["bbox"][3], 4.0);
  }

  #[test]
  fn empty_result_is_still_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("all.jsonl");
    let url = Url::parse(&format!("jsonl://{}", path.display())).unwrap();
    let output = JsonLinesOutput::from_url(&url).unwrap();

    output
      .render_result(
        &MessageId::new("5-0"),
        &FrameRecord::new("empty.png"),
        &DetectResult::default(),
      )
      .unwrap();
    let content = std::fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 1);
  }
}

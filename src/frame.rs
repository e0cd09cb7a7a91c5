// 该文件是 Liusha （流沙） 项目的一部分。
// src/frame.rs - 帧引用消息定义
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

use std::{cmp::Ordering, collections::HashMap, fmt};

use chrono::{Local, SecondsFormat};
use thiserror::Error;

pub const FRAME_REFERENCE_FIELD: &str = "frame_reference";
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// 流消息的原始字段
pub type FieldMap = HashMap<String, String>;

/// 由日志分配的消息 ID，形如 `<毫秒>-<序号>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
  pub fn new(id: impl Into<String>) -> Self {
    MessageId(id.into())
  }

  /// 排在所有消息之前的 ID
  pub fn zero() -> Self {
    MessageId("0-0".to_string())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  fn parts(&self) -> Option<(u64, u64)> {
    match self.0.split_once('-') {
      Some((ms, seq)) => Some((ms.parse().ok()?, seq.parse().ok()?)),
      None => Some((self.0.parse().ok()?, 0)),
    }
  }
}

impl Ord for MessageId {
  fn cmp(&self, other: &Self) -> Ordering {
    match (self.parts(), other.parts()) {
      (Some(a), Some(b)) => a.cmp(&b),
      _ => self.0.cmp(&other.0),
    }
  }
}

impl PartialOrd for MessageId {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

impl fmt::Display for MessageId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
  #[error("消息 {0} 缺少字段 '{1}'")]
  MissingField(MessageId, &'static str),
  #[error("消息 {0} 的字段 '{1}' 为空")]
  EmptyField(MessageId, &'static str),
}

/// 帧引用记录，发布到日志后不再修改
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRecord {
  pub frame_reference: String,
  /// RFC3339 格式
  pub timestamp: String,
}

impl FrameRecord {
  /// 以当前本地时间创建记录
  pub fn new(frame_reference: impl Into<String>) -> Self {
    FrameRecord {
      frame_reference: frame_reference.into(),
      timestamp: Local::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    }
  }

  pub fn to_fields(&self) -> [(&'static str, &str); 2] {
    [
      (FRAME_REFERENCE_FIELD, self.frame_reference.as_str()),
      (TIMESTAMP_FIELD, self.timestamp.as_str()),
    ]
  }

  /// 从消息字段中解析记录；时间戳缺失时保留为空字符串
  pub fn from_fields(id: &MessageId, fields: &FieldMap) -> Result<Self, SchemaError> {
    let frame_reference = fields
      .get(FRAME_REFERENCE_FIELD)
      .ok_or_else(|| SchemaError::MissingField(id.clone(), FRAME_REFERENCE_FIELD))?;
    if frame_reference.trim().is_empty() {
      return Err(SchemaError::EmptyField(id.clone(), FRAME_REFERENCE_FIELD));
    }

    Ok(FrameRecord {
      frame_reference: frame_reference.clone(),
      timestamp: fields.get(TIMESTAMP_FIELD).cloned().unwrap_or_default(),
    })
  }
}

/// 从日志读取到的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
  pub id: MessageId,
  pub fields: FieldMap,
}

impl StreamMessage {
  pub fn record(&self) -> Result<FrameRecord, SchemaError> {
    FrameRecord::from_fields(&self.id, &self.fields)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fields(pairs: &[(&str, &str)]) -> FieldMap {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[test]
  fn message_ids_order_numerically() {
    let mut ids = vec![
      MessageId::new("1700000000010-2"),
      MessageId::new("1700000000009-15"),
      MessageId::new("1700000000010-10"),
      MessageId::zero(),
    ];
    ids.sort();
    let ordered: Vec<_> = ids.iter().map(MessageId::as_str).collect();
    assert_eq!(
      ordered,
      ["0-0", "1700000000009-15", "1700000000010-2", "1700000000010-10"]
    );
  }

  #[test]
  fn record_timestamp_is_rfc3339() {
    let record = FrameRecord::new("car.png");
    assert!(chrono::DateTime::parse_from_rfc3339(&record.timestamp).is_ok());
    assert_eq!(record.to_fields()[0], (FRAME_REFERENCE_FIELD, "car.png"));
  }

  #[test]
  fn missing_frame_reference_is_schema_error() {
    let id = MessageId::new("1-0");
    let err = FrameRecord::from_fields(&id, &fields(&[(TIMESTAMP_FIELD, "x")])).unwrap_err();
    assert_eq!(err, SchemaError::MissingField(id.clone(), FRAME_REFERENCE_FIELD));

    let err = FrameRecord::from_fields(&id, &fields(&[(FRAME_REFERENCE_FIELD, "  ")])).unwrap_err();
    assert_eq!(err, SchemaError::EmptyField(id, FRAME_REFERENCE_FIELD));
  }

  #[test]
  fn record_parses_from_message() {
    let message = StreamMessage {
      id: MessageId::new("5-1"),
      fields: fields(&[
        (FRAME_REFERENCE_FIELD, "frames/a.png"),
        (TIMESTAMP_FIELD, "2026-01-01T00:00:00Z"),
      ]),
    };
    let record = message.record().unwrap();
    assert_eq!(record.frame_reference, "frames/a.png");
    assert_eq!(record.timestamp, "2026-01-01T00:00:00Z");
  }
}

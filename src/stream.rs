// 该文件是 Liusha （流沙） 项目的一部分。
// src/stream.rs - 消息日志（流）接口
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

use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{MessageId, StreamMessage},
};

mod consumer;
mod memory;
mod publisher;
mod redis_log;

pub use self::consumer::{Consumer, ConsumerConfig, ConsumerError, ConsumerStats};
pub use self::memory::MemoryLog;
pub use self::publisher::{PublishError, Publisher};
pub use self::redis_log::{RedisConnector, RedisLog};

/// 新建消费组时从流尾开始
pub const GROUP_START_TAIL: &str = "$";
pub const DEFAULT_BATCH_SIZE: usize = 10;

#[derive(Error, Debug)]
pub enum StreamError {
  #[error("Redis 错误: {0}")]
  Redis(#[from] redis::RedisError),
  #[error("消费组 {group} 不存在于流 {stream}")]
  GroupMissing { stream: String, group: String },
  #[error("无效的起始位置: {0}")]
  InvalidStart(String),
  #[error("日志状态锁已损坏")]
  Poisoned,
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
  Created,
  Existed,
}

/// 消费组读取位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadCursor {
  /// 尚未投递给任何消费者的新消息（`>`）
  New,
  /// 本消费者名下、ID 大于给定值的待确认消息
  Pending(MessageId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
  pub count: usize,
  /// `None` 表示无限期阻塞
  pub block: Option<Duration>,
}

impl Default for ReadOptions {
  fn default() -> Self {
    ReadOptions {
      count: DEFAULT_BATCH_SIZE,
      block: None,
    }
  }
}

/// 支持消费组的追加式日志。每个任务持有自己的句柄。
pub trait StreamLog: Send {
  fn append(&mut self, stream: &str, fields: &[(&str, &str)]) -> Result<MessageId, StreamError>;

  /// 创建消费组（必要时创建流）；组已存在视为成功
  fn ensure_group(
    &mut self,
    stream: &str,
    group: &str,
    start: &str,
  ) -> Result<GroupStatus, StreamError>;

  fn read_group(
    &mut self,
    stream: &str,
    group: &str,
    consumer: &str,
    cursor: &ReadCursor,
    options: &ReadOptions,
  ) -> Result<Vec<StreamMessage>, StreamError>;

  /// 返回该消息此前是否处于待确认状态
  fn ack(&mut self, stream: &str, group: &str, id: &MessageId) -> Result<bool, StreamError>;

  fn pending_count(&mut self, stream: &str, group: &str) -> Result<usize, StreamError>;
}

/// 为每个任务创建独立的日志句柄
pub trait LogConnector: Send + Sync {
  type Log: StreamLog + 'static;
  fn connect(&self) -> Result<Self::Log, StreamError>;
}

pub enum LogBackend {
  Redis(RedisConnector),
  Memory(MemoryLog),
}

impl FromUrl for LogBackend {
  type Error = StreamError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      RedisConnector::SCHEME | "rediss" => Ok(LogBackend::Redis(RedisConnector::from_url(url)?)),
      MemoryLog::SCHEME => Ok(LogBackend::Memory(MemoryLog::from_url(url)?)),
      other => Err(StreamError::SchemeMismatch(format!(
        "不支持的日志方案 '{}'",
        other
      ))),
    }
  }
}

pub enum LogHandle {
  Redis(RedisLog),
  Memory(MemoryLog),
}

impl LogConnector for LogBackend {
  type Log = LogHandle;

  fn connect(&self) -> Result<Self::Log, StreamError> {
    match self {
      LogBackend::Redis(connector) => connector.connect().map(LogHandle::Redis),
      LogBackend::Memory(log) => log.connect().map(LogHandle::Memory),
    }
  }
}

impl StreamLog for LogHandle {
  fn append(&mut self, stream: &str, fields: &[(&str, &str)]) -> Result<MessageId, StreamError> {
    match self {
      LogHandle::Redis(log) => log.append(stream, fields),
      LogHandle::Memory(log) => log.append(stream, fields),
    }
  }

  fn ensure_group(
    &mut self,
    stream: &str,
    group: &str,
    start: &str,
  ) -> Result<GroupStatus, StreamError> {
    match self {
      LogHandle::Redis(log) => log.ensure_group(stream, group, start),
      LogHandle::Memory(log) => log.ensure_group(stream, group, start),
    }
  }

  fn read_group(
    &mut self,
    stream: &str,
    group: &str,
    consumer: &str,
    cursor: &ReadCursor,
    options: &ReadOptions,
  ) -> Result<Vec<StreamMessage>, StreamError> {
    match self {
      LogHandle::Redis(log) => log.read_group(stream, group, consumer, cursor, options),
      LogHandle::Memory(log) => log.read_group(stream, group, consumer, cursor, options),
    }
  }

  fn ack(&mut self, stream: &str, group: &str, id: &MessageId) -> Result<bool, StreamError> {
    match self {
      LogHandle::Redis(log) => log.ack(stream, group, id),
      LogHandle::Memory(log) => log.ack(stream, group, id),
    }
  }

  fn pending_count(&mut self, stream: &str, group: &str) -> Result<usize, StreamError> {
    match self {
      LogHandle::Redis(log) => log.pending_count(stream, group),
      LogHandle::Memory(log) => log.pending_count(stream, group),
    }
  }
}

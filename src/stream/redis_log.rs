// 该文件是 Liusha （流沙） 项目的一部分。
// src/stream/redis_log.rs - Redis Streams 日志
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

use redis::{
  Commands, RedisResult,
  streams::{StreamPendingReply, StreamReadOptions, StreamReadReply},
};
use tracing::{debug, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FieldMap, MessageId, StreamMessage},
  stream::{GroupStatus, LogConnector, ReadCursor, ReadOptions, StreamError, StreamLog},
};

const BUSY_GROUP: &str = "BUSYGROUP";

/// 持有 Redis 客户端，为每个任务打开独立连接
#[derive(Debug, Clone)]
pub struct RedisConnector {
  client: redis::Client,
}

impl FromUrlWithScheme for RedisConnector {
  const SCHEME: &'static str = "redis";
}

impl FromUrl for RedisConnector {
  type Error = StreamError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME && url.scheme() != "rediss" {
      return Err(StreamError::SchemeMismatch(format!(
        "期望方案 '{}', 实际方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    let client = redis::Client::open(url.as_str())?;
    Ok(RedisConnector { client })
  }
}

impl LogConnector for RedisConnector {
  type Log = RedisLog;

  fn connect(&self) -> Result<Self::Log, StreamError> {
    let connection = self.client.get_connection()?;
    debug!("已连接 Redis: {:?}", self.client.get_connection_info().addr);
    Ok(RedisLog { connection })
  }
}

pub struct RedisLog {
  connection: redis::Connection,
}

impl StreamLog for RedisLog {
  fn append(&mut self, stream: &str, fields: &[(&str, &str)]) -> Result<MessageId, StreamError> {
    let id: String = self.connection.xadd(stream, "*", fields)?;
    Ok(MessageId::new(id))
  }

  fn ensure_group(
    &mut self,
    stream: &str,
    group: &str,
    start: &str,
  ) -> Result<GroupStatus, StreamError> {
    let created: RedisResult<()> = self.connection.xgroup_create_mkstream(stream, group, start);
    match created {
      Ok(()) => Ok(GroupStatus::Created),
      Err(e) if e.code() == Some(BUSY_GROUP) => Ok(GroupStatus::Existed),
      Err(e) => Err(e.into()),
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
    let block_ms = options
      .block
      .map(|block| block.as_millis().max(1) as usize)
      .unwrap_or(0);
    let opts = StreamReadOptions::default()
      .group(group, consumer)
      .count(options.count)
      .block(block_ms);
    let id = match cursor {
      ReadCursor::New => ">",
      ReadCursor::Pending(after) => after.as_str(),
    };

    // 阻塞超时返回 nil
    let reply: Option<StreamReadReply> = self.connection.xread_options(&[stream], &[id], &opts)?;
    let Some(reply) = reply else {
      return Ok(Vec::new());
    };

    let mut messages = Vec::new();
    for key in reply.keys {
      for entry in key.ids {
        let mut fields = FieldMap::with_capacity(entry.map.len());
        for (name, value) in entry.map.iter() {
          match redis::from_redis_value::<String>(value) {
            Ok(text) => {
              fields.insert(name.clone(), text);
            }
            Err(e) => warn!("消息 {} 的字段 {} 不是字符串: {}", entry.id, name, e),
          }
        }
        messages.push(StreamMessage {
          id: MessageId::new(entry.id),
          fields,
        });
      }
    }
    Ok(messages)
  }

  fn ack(&mut self, stream: &str, group: &str, id: &MessageId) -> Result<bool, StreamError> {
    let acked: i64 = self.connection.xack(stream, group, &[id.as_str()])?;
    Ok(acked > 0)
  }

  fn pending_count(&mut self, stream: &str, group: &str) -> Result<usize, StreamError> {
    let reply: StreamPendingReply = self.connection.xpending(stream, group)?;
    Ok(reply.count())
  }
}

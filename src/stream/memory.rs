// 该文件是 Liusha （流沙） 项目的一部分。
// src/stream/memory.rs - 进程内消息日志
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

use std::{
  collections::{BTreeMap, HashMap},
  sync::{Arc, Condvar, Mutex, MutexGuard},
  time::Instant,
};

use chrono::Utc;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FieldMap, MessageId, StreamMessage},
  stream::{GroupStatus, LogConnector, ReadCursor, ReadOptions, StreamError, StreamLog},
};

#[derive(Default)]
struct GroupState {
  /// 下一条待投递消息在 `entries` 中的下标
  next_index: usize,
  /// 待确认消息 -> 所属消费者
  pending: BTreeMap<MessageId, String>,
}

#[derive(Default)]
struct MemoryStream {
  entries: Vec<StreamMessage>,
  last_ms: u64,
  last_seq: u64,
  groups: HashMap<String, GroupState>,
}

impl MemoryStream {
  fn next_id(&mut self) -> MessageId {
    let now = Utc::now().timestamp_millis().max(0) as u64;
    if now > self.last_ms {
      self.last_ms = now;
      self.last_seq = 0;
    } else {
      self.last_seq += 1;
    }
    MessageId::new(format!("{}-{}", self.last_ms, self.last_seq))
  }

  fn position_after(&self, id: &MessageId) -> usize {
    self.entries.partition_point(|entry| entry.id <= *id)
  }

  fn find(&self, id: &MessageId) -> Option<&StreamMessage> {
    self
      .entries
      .binary_search_by(|entry| entry.id.cmp(id))
      .ok()
      .map(|index| &self.entries[index])
  }
}

#[derive(Default)]
struct Shared {
  streams: Mutex<HashMap<String, MemoryStream>>,
  appended: Condvar,
}

/// 进程内实现的日志，语义与 Redis Streams 消费组一致。克隆得到共享同一份数据的新句柄。
#[derive(Clone, Default)]
pub struct MemoryLog {
  shared: Arc<Shared>,
}

impl MemoryLog {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, MemoryStream>>, StreamError> {
    self.shared.streams.lock().map_err(|_| StreamError::Poisoned)
  }

  /// 流中消息总数
  pub fn len(&self, stream: &str) -> Result<usize, StreamError> {
    Ok(self.lock()?.get(stream).map_or(0, |s| s.entries.len()))
  }

  pub fn is_empty(&self, stream: &str) -> Result<bool, StreamError> {
    self.len(stream).map(|len| len == 0)
  }
}

impl FromUrlWithScheme for MemoryLog {
  const SCHEME: &'static str = "memory";
}

impl FromUrl for MemoryLog {
  type Error = StreamError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StreamError::SchemeMismatch(format!(
        "期望方案 '{}', 实际方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Ok(MemoryLog::new())
  }
}

impl LogConnector for MemoryLog {
  type Log = MemoryLog;

  fn connect(&self) -> Result<Self::Log, StreamError> {
    Ok(self.clone())
  }
}

fn group_missing(stream: &str, group: &str) -> StreamError {
  StreamError::GroupMissing {
    stream: stream.to_string(),
    group: group.to_string(),
  }
}

impl StreamLog for MemoryLog {
  fn append(&mut self, stream: &str, fields: &[(&str, &str)]) -> Result<MessageId, StreamError> {
    let mut streams = self.lock()?;
    let entry = streams.entry(stream.to_string()).or_default();
    let id = entry.next_id();
    entry.entries.push(StreamMessage {
      id: id.clone(),
      fields: fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<FieldMap>(),
    });
    drop(streams);
    self.shared.appended.notify_all();
    Ok(id)
  }

  fn ensure_group(
    &mut self,
    stream: &str,
    group: &str,
    start: &str,
  ) -> Result<GroupStatus, StreamError> {
    let mut streams = self.lock()?;
    let entry = streams.entry(stream.to_string()).or_default();
    if entry.groups.contains_key(group) {
      return Ok(GroupStatus::Existed);
    }

    let next_index = match start {
      "$" => entry.entries.len(),
      "0" => 0,
      other => {
        let id = MessageId::new(other);
        if !other.contains('-') && other.parse::<u64>().is_err() {
          return Err(StreamError::InvalidStart(other.to_string()));
        }
        entry.position_after(&id)
      }
    };
    entry.groups.insert(
      group.to_string(),
      GroupState {
        next_index,
        pending: BTreeMap::new(),
      },
    );
    Ok(GroupStatus::Created)
  }

  fn read_group(
    &mut self,
    stream: &str,
    group: &str,
    consumer: &str,
    cursor: &ReadCursor,
    options: &ReadOptions,
  ) -> Result<Vec<StreamMessage>, StreamError> {
    let mut streams = self.lock()?;

    if let ReadCursor::Pending(after) = cursor {
      let entry = streams
        .get(stream)
        .ok_or_else(|| group_missing(stream, group))?;
      let state = entry
        .groups
        .get(group)
        .ok_or_else(|| group_missing(stream, group))?;
      let messages = state
        .pending
        .iter()
        .filter(|(id, owner)| *id > after && owner.as_str() == consumer)
        .take(options.count)
        .map(|(id, _)| {
          entry.find(id).cloned().unwrap_or_else(|| StreamMessage {
            id: id.clone(),
            fields: FieldMap::new(),
          })
        })
        .collect();
      return Ok(messages);
    }

    let deadline = options.block.map(|block| Instant::now() + block);
    loop {
      let entry = streams
        .get_mut(stream)
        .ok_or_else(|| group_missing(stream, group))?;
      let total = entry.entries.len();
      let state = entry
        .groups
        .get_mut(group)
        .ok_or_else(|| group_missing(stream, group))?;

      if state.next_index < total {
        let end = total.min(state.next_index + options.count.max(1));
        let batch: Vec<StreamMessage> = entry.entries[state.next_index..end].to_vec();
        state.next_index = end;
        for message in &batch {
          state
            .pending
            .insert(message.id.clone(), consumer.to_string());
        }
        return Ok(batch);
      }

      streams = match deadline {
        None => self
          .shared
          .appended
          .wait(streams)
          .map_err(|_| StreamError::Poisoned)?,
        Some(deadline) => {
          let now = Instant::now();
          if now >= deadline {
            return Ok(Vec::new());
          }
          self
            .shared
            .appended
            .wait_timeout(streams, deadline - now)
            .map_err(|_| StreamError::Poisoned)?
            .0
        }
      };
    }
  }

  fn ack(&mut self, stream: &str, group: &str, id: &MessageId) -> Result<bool, StreamError> {
    let mut streams = self.lock()?;
    let state = streams
      .get_mut(stream)
      .and_then(|entry| entry.groups.get_mut(group))
      .ok_or_else(|| group_missing(stream, group))?;
    Ok(state.pending.remove(id).is_some())
  }

  fn pending_count(&mut self, stream: &str, group: &str) -> Result<usize, StreamError> {
    let streams = self.lock()?;
    streams
      .get(stream)
      .and_then(|entry| entry.groups.get(group))
      .map(|state| state.pending.len())
      .ok_or_else(|| group_missing(stream, group))
  }
}

// 该文件是 Liusha （流沙） 项目的一部分。
// src/stream/consumer.rs - 消费组消费者
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

use std::{fmt::Display, time::Duration};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  frame::{MessageId, StreamMessage},
  stream::{DEFAULT_BATCH_SIZE, ReadCursor, ReadOptions, StreamError, StreamLog},
  utils::{Backoff, BackoffConfig, CancelToken},
};

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
  pub stream: String,
  pub group: String,
  pub name: String,
  pub read: ReadOptions,
  pub backoff: BackoffConfig,
  /// 启动时先重新处理本消费者名下遗留的待确认消息
  pub recover_pending: bool,
}

impl ConsumerConfig {
  pub fn new(stream: impl Into<String>, group: impl Into<String>, name: impl Into<String>) -> Self {
    ConsumerConfig {
      stream: stream.into(),
      group: group.into(),
      name: name.into(),
      read: ReadOptions {
        count: DEFAULT_BATCH_SIZE,
        block: Some(Duration::from_secs(2)),
      },
      backoff: BackoffConfig::default(),
      recover_pending: true,
    }
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
  pub received: usize,
  pub acked: usize,
  pub failed: usize,
  pub ack_errors: usize,
}

impl std::ops::AddAssign for ConsumerStats {
  fn add_assign(&mut self, rhs: Self) {
    self.received += rhs.received;
    self.acked += rhs.acked;
    self.failed += rhs.failed;
    self.ack_errors += rhs.ack_errors;
  }
}

#[derive(Error, Debug)]
pub enum ConsumerError {
  #[error("消费者 {consumer} 连续 {attempts} 次读取失败: {source}")]
  RetriesExhausted {
    consumer: String,
    attempts: u32,
    #[source]
    source: StreamError,
  },
}

enum Read {
  Batch(Vec<StreamMessage>),
  Cancelled,
}

pub struct Consumer<L> {
  log: L,
  config: ConsumerConfig,
  backoff: Backoff,
  stats: ConsumerStats,
}

impl<L: StreamLog> Consumer<L> {
  pub fn new(log: L, config: ConsumerConfig) -> Self {
    let backoff = Backoff::new(config.backoff);
    Consumer {
      log,
      config,
      backoff,
      stats: ConsumerStats::default(),
    }
  }

  pub fn name(&self) -> &str {
    &self.config.name
  }

  pub fn stats(&self) -> ConsumerStats {
    self.stats
  }

  /// 循环读取并处理消息，直到被取消或读取重试次数耗尽。
  ///
  /// 处理函数返回 `Ok` 的消息会被确认；返回 `Err` 的消息保持待确认状态，继续处理下一条。
  pub fn process<F, E>(
    &mut self,
    cancel: &CancelToken,
    mut handler: F,
  ) -> Result<ConsumerStats, ConsumerError>
  where
    F: FnMut(&StreamMessage) -> Result<(), E>,
    E: Display,
  {
    info!("消费者 {} 开始读取流 {}", self.config.name, self.config.stream);

    if self.config.recover_pending {
      self.recover(cancel, &mut handler)?;
    }

    while !cancel.is_cancelled() {
      let batch = match self.read(cancel, &ReadCursor::New)? {
        Read::Batch(batch) => batch,
        Read::Cancelled => break,
      };
      if !batch.is_empty() {
        debug!("消费者 {} 读取到 {} 条消息", self.config.name, batch.len());
      }
      self.dispatch(&batch, &mut handler);
    }

    info!(
      "消费者 {} 退出: 接收 {}, 确认 {}, 失败 {}",
      self.config.name, self.stats.received, self.stats.acked, self.stats.failed
    );
    Ok(self.stats)
  }

  fn recover<F, E>(&mut self, cancel: &CancelToken, handler: &mut F) -> Result<(), ConsumerError>
  where
    F: FnMut(&StreamMessage) -> Result<(), E>,
    E: Display,
  {
    let mut after = MessageId::zero();
    while !cancel.is_cancelled() {
      let batch = match self.read(cancel, &ReadCursor::Pending(after.clone()))? {
        Read::Batch(batch) => batch,
        Read::Cancelled => break,
      };
      let Some(last) = batch.last() else {
        break;
      };
      after = last.id.clone();
      info!(
        "消费者 {} 重新处理 {} 条遗留消息",
        self.config.name,
        batch.len()
      );
      self.dispatch(&batch, handler);
    }
    Ok(())
  }

  fn read(&mut self, cancel: &CancelToken, cursor: &ReadCursor) -> Result<Read, ConsumerError> {
    loop {
      let result = self.log.read_group(
        &self.config.stream,
        &self.config.group,
        &self.config.name,
        cursor,
        &self.config.read,
      );
      match result {
        Ok(batch) => {
          self.backoff.reset();
          return Ok(Read::Batch(batch));
        }
        Err(source) => match self.backoff.next_delay() {
          Some(delay) => {
            warn!(
              "消费者 {} 读取流 {} 失败 ({:.2?} 后重试): {}",
              self.config.name, self.config.stream, delay, source
            );
            if cancel.wait_timeout(delay) {
              return Ok(Read::Cancelled);
            }
          }
          None => {
            error!(
              "消费者 {} 读取失败次数已达上限: {}",
              self.config.name, source
            );
            return Err(ConsumerError::RetriesExhausted {
              consumer: self.config.name.clone(),
              attempts: self.backoff.attempts(),
              source,
            });
          }
        },
      }
    }
  }

  fn dispatch<F, E>(&mut self, batch: &[StreamMessage], handler: &mut F)
  where
    F: FnMut(&StreamMessage) -> Result<(), E>,
    E: Display,
  {
    for message in batch {
      self.stats.received += 1;
      if let Err(e) = handler(message) {
        self.stats.failed += 1;
        warn!("处理消息 {} 失败: {}", message.id, e);
        continue;
      }

      match self
        .log
        .ack(&self.config.stream, &self.config.group, &message.id)
      {
        Ok(true) => self.stats.acked += 1,
        Ok(false) => debug!("消息 {} 已不在待确认列表中", message.id),
        Err(e) => {
          self.stats.ack_errors += 1;
          warn!("确认消息 {} 失败: {}", message.id, e);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::stream::{GroupStatus, MemoryLog};
  use std::{
    sync::{Arc, Mutex},
    thread,
    time::Instant,
  };

  const STREAM: &str = "s";
  const GROUP: &str = "g";

  fn config(name: &str) -> ConsumerConfig {
    let mut config = ConsumerConfig::new(STREAM, GROUP, name);
    config.read.block = Some(Duration::from_millis(10));
    config
  }

  fn seeded(n: usize) -> MemoryLog {
    let mut log = MemoryLog::new();
    log.ensure_group(STREAM, GROUP, "$").unwrap();
    for i in 0..n {
      log
        .append(STREAM, &[("frame_reference", format!("f{i}.png").as_str())])
        .unwrap();
    }
    log
  }

  /// 每次读取都失败的日志
  struct BrokenLog {
    reads: Arc<Mutex<u32>>,
  }

  impl StreamLog for BrokenLog {
    fn append(&mut self, _: &str, _: &[(&str, &str)]) -> Result<MessageId, StreamError> {
      Err(StreamError::Poisoned)
    }

    fn ensure_group(&mut self, _: &str, _: &str, _: &str) -> Result<GroupStatus, StreamError> {
      Ok(GroupStatus::Existed)
    }

    fn read_group(
      &mut self,
      _: &str,
      _: &str,
      _: &str,
      _: &ReadCursor,
      _: &ReadOptions,
    ) -> Result<Vec<StreamMessage>, StreamError> {
      *self.reads.lock().unwrap() += 1;
      Err(StreamError::Poisoned)
    }

    fn ack(&mut self, _: &str, _: &str, _: &MessageId) -> Result<bool, StreamError> {
      Ok(false)
    }

    fn pending_count(&mut self, _: &str, _: &str) -> Result<usize, StreamError> {
      Ok(0)
    }
  }

  fn run_until<F, D>(
    mut consumer: Consumer<MemoryLog>,
    handler: F,
    done: D,
    log: MemoryLog,
  ) -> ConsumerStats
  where
    F: FnMut(&StreamMessage) -> Result<(), String> + Send + 'static,
    D: Fn(&MemoryLog) -> bool,
  {
    let cancel = CancelToken::new();
    let watcher = cancel.clone();
    let handle = thread::spawn(move || consumer.process(&watcher, handler));
    let started = Instant::now();
    while !done(&log) && started.elapsed() < Duration::from_secs(5) {
      thread::sleep(Duration::from_millis(5));
    }
    cancel.cancel();
    handle.join().unwrap().unwrap()
  }

  #[test]
  fn acknowledges_successfully_handled_messages() {
    let log = seeded(5);
    let handled = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&handled);
    let observed = Arc::clone(&handled);
    let consumer = Consumer::new(log.clone(), config("c1"));
    let stats = run_until(
      consumer,
      move |_: &StreamMessage| {
        *counter.lock().unwrap() += 1;
        Ok(())
      },
      move |log: &MemoryLog| {
        *observed.lock().unwrap() >= 5 && log.clone().pending_count(STREAM, GROUP).unwrap() == 0
      },
      log.clone(),
    );
    assert_eq!(stats.received, 5);
    assert_eq!(stats.acked, 5);
    assert_eq!(log.clone().pending_count(STREAM, GROUP).unwrap(), 0);
  }

  #[test]
  fn failed_messages_stay_pending() {
    let log = seeded(4);
    let seen = Arc::new(Mutex::new(0usize));
    let counter = Arc::clone(&seen);
    let observed = Arc::clone(&seen);
    let consumer = Consumer::new(log.clone(), config("c1"));
    let stats = run_until(
      consumer,
      move |message: &StreamMessage| {
        *counter.lock().unwrap() += 1;
        if message.fields["frame_reference"] == "f1.png" {
          Err("模型失败".to_string())
        } else {
          Ok(())
        }
      },
      move |_: &MemoryLog| *observed.lock().unwrap() >= 4,
      log.clone(),
    );
    assert_eq!(stats.received, 4);
    assert_eq!(stats.acked, 3);
    assert_eq!(stats.failed, 1);
    assert_eq!(log.clone().pending_count(STREAM, GROUP).unwrap(), 1);
  }

  #[test]
  fn leftover_pending_is_recovered_on_start() {
    let mut log = seeded(3);
    let taken = log
      .read_group(STREAM, GROUP, "c1", &ReadCursor::New, &ReadOptions::default())
      .unwrap();
    assert_eq!(taken.len(), 3);

    let consumer = Consumer::new(log.clone(), config("c1"));
    let stats = run_until(
      consumer,
      |_: &StreamMessage| Ok(()),
      |log: &MemoryLog| log.clone().pending_count(STREAM, GROUP).unwrap() == 0,
      log.clone(),
    );
    assert_eq!(stats.acked, 3);
  }

  #[test]
  fn cancellation_stops_idle_consumer() {
    let log = seeded(0);
    let mut consumer = Consumer::new(log, config("idle"));
    let cancel = CancelToken::new();
    let watcher = cancel.clone();
    let handle = thread::spawn(move || consumer.process(&watcher, |_| Ok::<(), String>(())));
    thread::sleep(Duration::from_millis(30));
    let started = Instant::now();
    cancel.cancel();
    let stats = handle.join().unwrap().unwrap();
    assert_eq!(stats, ConsumerStats::default());
    assert!(started.elapsed() < Duration::from_secs(1));
  }

  #[test]
  fn read_failures_exhaust_backoff() {
    let reads = Arc::new(Mutex::new(0));
    let log = BrokenLog {
      reads: Arc::clone(&reads),
    };
    let mut config = config("broken");
    config.recover_pending = false;
    config.backoff = BackoffConfig {
      base: Duration::from_millis(1),
      max: Duration::from_millis(4),
      max_retries: 3,
    };
    let mut consumer = Consumer::new(log, config);
    let err = consumer
      .process(&CancelToken::new(), |_| Ok::<(), String>(()))
      .unwrap_err();
    assert!(matches!(
      err,
      ConsumerError::RetriesExhausted { attempts: 3, .. }
    ));
    assert_eq!(*reads.lock().unwrap(), 4);
  }
}

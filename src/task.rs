// 该文件是 Liusha （流沙） 项目的一部分。
// src/task.rs - 发布者/消费者流水线
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

use std::{fmt::Display, sync::Arc, time::Duration};

use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  frame::{FrameRecord, StreamMessage},
  pool::{PoolError, WorkerPool},
  stream::{
    Consumer, ConsumerConfig, ConsumerError, ConsumerStats, GROUP_START_TAIL, LogConnector,
    Publisher, ReadOptions, StreamError, StreamLog,
  },
  utils::{BackoffConfig, CancelToken},
};

pub const DEFAULT_STREAM: &str = "camera_stream";
pub const DEFAULT_GROUP: &str = "camera_group";
pub const DEFAULT_FRAME_REFERENCE: &str = "car.png";

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("无效配置: {0}")]
  InvalidConfig(String),
  #[error("启动失败: {0}")]
  Startup(#[from] StreamError),
  #[error("任务池错误: {0}")]
  Pool(#[from] PoolError),
  #[error("消费者异常终止: {0}")]
  Consumer(#[from] ConsumerError),
}

/// 一次运行的统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSummary {
  pub published: usize,
  pub publish_failures: usize,
  pub consumers: ConsumerStats,
  pub panicked: usize,
  /// 结束时消费组的待确认消息数；无法查询时为 `None`
  pub pending: Option<usize>,
}

#[derive(Debug, Default, Clone, Copy)]
struct PublisherReport {
  published: usize,
  failed: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineTask {
  pub stream: String,
  pub group: String,
  pub publishers: usize,
  pub consumers: usize,
  pub publisher_capacity: usize,
  pub consumer_capacity: usize,
  pub frames_per_publisher: usize,
  pub publish_interval: Duration,
  pub frame_reference: String,
  pub read: ReadOptions,
  pub backoff: BackoffConfig,
  pub recover_pending: bool,
  /// 发布结束后再运行多久即停止消费者；`None` 表示直到被取消
  pub run_for: Option<Duration>,
}

impl Default for PipelineTask {
  fn default() -> Self {
    PipelineTask {
      stream: DEFAULT_STREAM.to_string(),
      group: DEFAULT_GROUP.to_string(),
      publishers: 20,
      consumers: 30,
      publisher_capacity: 20,
      consumer_capacity: 30,
      frames_per_publisher: 5,
      publish_interval: Duration::from_millis(500),
      frame_reference: DEFAULT_FRAME_REFERENCE.to_string(),
      read: ReadOptions {
        count: crate::stream::DEFAULT_BATCH_SIZE,
        block: Some(Duration::from_millis(2000)),
      },
      backoff: BackoffConfig::default(),
      recover_pending: true,
      run_for: None,
    }
  }
}

impl PipelineTask {
  pub fn with_stream(mut self, stream: impl Into<String>, group: impl Into<String>) -> Self {
    self.stream = stream.into();
    self.group = group.into();
    self
  }

  /// 设置任务数，容量同时设为相同值
  pub fn with_tasks(mut self, publishers: usize, consumers: usize) -> Self {
    self.publishers = publishers;
    self.consumers = consumers;
    self.publisher_capacity = publishers;
    self.consumer_capacity = consumers;
    self
  }

  pub fn with_capacity(mut self, publisher_capacity: usize, consumer_capacity: usize) -> Self {
    self.publisher_capacity = publisher_capacity;
    self.consumer_capacity = consumer_capacity;
    self
  }

  pub fn with_frames(
    mut self,
    frame_reference: impl Into<String>,
    frames_per_publisher: usize,
    publish_interval: Duration,
  ) -> Self {
    self.frame_reference = frame_reference.into();
    self.frames_per_publisher = frames_per_publisher;
    self.publish_interval = publish_interval;
    self
  }

  pub fn with_read(mut self, read: ReadOptions) -> Self {
    self.read = read;
    self
  }

  pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
    self.backoff = backoff;
    self
  }

  pub fn with_recover_pending(mut self, recover_pending: bool) -> Self {
    self.recover_pending = recover_pending;
    self
  }

  pub fn with_run_for(mut self, run_for: Option<Duration>) -> Self {
    self.run_for = run_for;
    self
  }

  pub fn validate(&self) -> Result<(), PipelineError> {
    if self.stream.is_empty() || self.group.is_empty() {
      return Err(PipelineError::InvalidConfig("流名称和消费组不能为空".into()));
    }
    if self.publishers > 0 && self.publisher_capacity == 0 {
      return Err(PipelineError::InvalidConfig("发布者容量必须大于 0".into()));
    }
    if self.consumers > 0 && self.consumer_capacity == 0 {
      return Err(PipelineError::InvalidConfig("消费者容量必须大于 0".into()));
    }
    if self.read.count == 0 {
      return Err(PipelineError::InvalidConfig("批量读取数量必须大于 0".into()));
    }
    if self.frame_reference.is_empty() {
      return Err(PipelineError::InvalidConfig("帧引用不能为空".into()));
    }
    Ok(())
  }

  /// 启动全部发布者与消费者并等待其结束。
  ///
  /// 消费者在 `cancel` 被触发（或 `run_for` 到期）时退出；任一消费者读取重试耗尽时取消整条流水线。
  pub fn run<C, H, E>(
    &self,
    connector: Arc<C>,
    handler: H,
    cancel: &CancelToken,
  ) -> Result<PipelineSummary, PipelineError>
  where
    C: LogConnector + 'static,
    H: Fn(&StreamMessage) -> Result<(), E> + Send + Sync + 'static,
    E: Display + 'static,
  {
    self.validate()?;

    let mut log = connector.connect()?;
    let status = log.ensure_group(&self.stream, &self.group, GROUP_START_TAIL)?;
    info!("消费组 {} ({:?}) 已就绪于流 {}", self.group, status, self.stream);
    drop(log);

    let handler = Arc::new(handler);
    let mut spawn_error = None;

    let mut publishers = WorkerPool::new("publisher", self.publisher_capacity);
    for i in 1..=self.publishers {
      let connector = Arc::clone(&connector);
      let token = cancel.clone();
      let task = self.clone();
      let spawned = publishers.spawn(format!("publisher-{}", i), move |name| {
        task.publish_frames(name, connector.as_ref(), &token)
      });
      if let Err(e) = spawned {
        error!("无法启动发布者: {}", e);
        spawn_error.get_or_insert(e);
        cancel.cancel();
        break;
      }
    }

    let mut consumers = WorkerPool::new("consumer", self.consumer_capacity);
    for i in 1..=self.consumers {
      if spawn_error.is_some() {
        break;
      }
      let connector = Arc::clone(&connector);
      let handler = Arc::clone(&handler);
      let token = cancel.clone();
      let task = self.clone();
      let spawned = consumers.spawn(format!("consumer-{}", i), move |name| {
        let result = task.consume(name, connector.as_ref(), handler.as_ref(), &token);
        if result.is_err() {
          token.cancel();
        }
        result
      });
      if let Err(e) = spawned {
        error!("无法启动消费者: {}", e);
        spawn_error.get_or_insert(e);
        cancel.cancel();
      }
    }

    let mut summary = PipelineSummary::default();
    for report in publishers.join() {
      match report {
        Ok(report) => {
          summary.published += report.published;
          summary.publish_failures += report.failed;
        }
        Err(_) => summary.panicked += 1,
      }
    }
    info!(
      "发布完成: 成功 {}, 失败 {}",
      summary.published, summary.publish_failures
    );

    if let Some(run_for) = self.run_for
      && !cancel.wait_timeout(run_for)
    {
      info!("运行时间已到, 停止消费者");
      cancel.cancel();
    }

    let mut fatal = None;
    for result in consumers.join() {
      match result {
        Ok(Ok(stats)) => summary.consumers += stats,
        Ok(Err(e)) => {
          fatal.get_or_insert(e);
        }
        Err(_) => summary.panicked += 1,
      }
    }

    summary.pending = match connector
      .connect()
      .and_then(|mut log| log.pending_count(&self.stream, &self.group))
    {
      Ok(pending) => Some(pending),
      Err(e) => {
        warn!("无法查询待确认消息数: {}", e);
        None
      }
    };

    info!(
      "流水线结束: 发布 {}, 接收 {}, 确认 {}, 失败 {}, 待确认 {:?}",
      summary.published,
      summary.consumers.received,
      summary.consumers.acked,
      summary.consumers.failed,
      summary.pending
    );

    if let Some(e) = spawn_error {
      return Err(e.into());
    }
    if let Some(e) = fatal {
      return Err(e);
    }
    Ok(summary)
  }

  fn publish_frames<C: LogConnector>(
    &self,
    name: &str,
    connector: &C,
    cancel: &CancelToken,
  ) -> PublisherReport {
    let mut report = PublisherReport::default();
    let log = match connector.connect() {
      Ok(log) => log,
      Err(e) => {
        error!("发布者 {} 无法连接: {}", name, e);
        report.failed = self.frames_per_publisher;
        return report;
      }
    };

    info!("发布者 {} 开始", name);
    let mut publisher = Publisher::new(log, self.stream.clone());
    for i in 0..self.frames_per_publisher {
      if cancel.is_cancelled() {
        break;
      }
      let record = FrameRecord::new(self.frame_reference.clone());
      match publisher.publish(&record) {
        Ok(_) => report.published += 1,
        Err(e) => {
          report.failed += 1;
          warn!("发布者 {} 发布第 {} 帧失败: {}", name, i, e);
        }
      }
      if cancel.wait_timeout(self.publish_interval) {
        break;
      }
    }
    info!("发布者 {} 结束", name);
    report
  }

  fn consume<C, H, E>(
    &self,
    name: &str,
    connector: &C,
    handler: &H,
    cancel: &CancelToken,
  ) -> Result<ConsumerStats, PipelineError>
  where
    C: LogConnector,
    H: Fn(&StreamMessage) -> Result<(), E>,
    E: Display,
  {
    let log = connector.connect().map_err(|e| {
      error!("消费者 {} 无法连接: {}", name, e);
      e
    })?;
    let config = ConsumerConfig {
      read: self.read,
      backoff: self.backoff,
      recover_pending: self.recover_pending,
      ..ConsumerConfig::new(self.stream.clone(), self.group.clone(), name)
    };
    let mut consumer = Consumer::new(log, config);
    Ok(consumer.process(cancel, handler)?)
  }
}

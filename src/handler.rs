// 该文件是 Liusha （流沙） 项目的一部分。
// src/handler.rs - 单条帧消息的检测处理
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

use std::sync::Arc;

use clap::ValueEnum;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  frame::{SchemaError, StreamMessage},
  input::FrameLoader,
  model::{DetectResult, Model, Yolov8, Yolov8Error},
  output::Render,
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// 消息何时被确认
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum AckPolicy {
  /// 加载、推理、输出全部成功后才确认；失败的消息留在待确认列表
  #[default]
  Confirmed,
  /// 收到即确认，处理失败只记录日志
  Receipt,
}

#[derive(Error, Debug)]
pub enum HandlerError {
  #[error("消息格式错误: {0}")]
  Schema(#[from] SchemaError),
  #[error("帧加载失败: {0}")]
  Load(#[source] BoxError),
  #[error("检测失败: {0}")]
  Detect(#[from] Yolov8Error),
  #[error("结果输出失败: {0}")]
  Render(#[source] BoxError),
}

pub struct DetectionHandler<L, M, R> {
  loader: L,
  detector: Arc<Yolov8<M>>,
  output: R,
  policy: AckPolicy,
}

impl<L, M, R> DetectionHandler<L, M, R>
where
  L: FrameLoader,
  L::Error: std::error::Error + Send + Sync + 'static,
  M: Model,
  M::Error: std::error::Error + Send + Sync + 'static,
  R: Render,
  R::Error: std::error::Error + Send + Sync + 'static,
{
  pub fn new(loader: L, detector: Arc<Yolov8<M>>, output: R) -> Self {
    DetectionHandler {
      loader,
      detector,
      output,
      policy: AckPolicy::default(),
    }
  }

  pub fn with_policy(mut self, policy: AckPolicy) -> Self {
    self.policy = policy;
    self
  }

  pub fn policy(&self) -> AckPolicy {
    self.policy
  }

  /// 解析、加载、检测并输出，不考虑确认策略
  pub fn process(&self, message: &StreamMessage) -> Result<DetectResult, HandlerError> {
    let record = message.record()?;
    let frame = self
      .loader
      .load(&record.frame_reference)
      .map_err(|e| HandlerError::Load(Box::new(e)))?;
    let result = self.detector.infer(&frame.tensor, frame.width, frame.height)?;
    debug!("消息 {} 保留 {} 个检测框", message.id, result.len());
    self
      .output
      .render_result(&message.id, &record, &result)
      .map_err(|e| HandlerError::Render(Box::new(e)))?;
    Ok(result)
  }

  /// 返回 `Ok` 表示消息可以确认
  pub fn handle(&self, message: &StreamMessage) -> Result<(), HandlerError> {
    match (self.process(message), self.policy) {
      (Ok(_), _) => Ok(()),
      (Err(e), AckPolicy::Receipt) => {
        warn!("消息 {} 处理失败, 仍然确认: {}", message.id, e);
        Ok(())
      }
      (Err(e), AckPolicy::Confirmed) => Err(e),
    }
  }
}

// 该文件是 Liusha （流沙） 项目的一部分。
// src/stream/publisher.rs - 帧引用发布者
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

use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  frame::{FrameRecord, MessageId},
  stream::{StreamError, StreamLog},
};

#[derive(Error, Debug)]
#[error("发布到流 {stream} 失败: {source}")]
pub struct PublishError {
  pub stream: String,
  #[source]
  pub source: StreamError,
}

/// 向指定流追加帧引用记录。失败不重试。
pub struct Publisher<L> {
  log: L,
  stream: String,
}

impl<L: StreamLog> Publisher<L> {
  pub fn new(log: L, stream: impl Into<String>) -> Self {
    Publisher {
      log,
      stream: stream.into(),
    }
  }

  pub fn publish(&mut self, record: &FrameRecord) -> Result<MessageId, PublishError> {
    match self.log.append(&self.stream, &record.to_fields()) {
      Ok(id) => {
        debug!("已发布帧 {} -> {}", record.frame_reference, id);
        Ok(id)
      }
      Err(source) => {
        warn!("发布到流 {} 失败: {}", self.stream, source);
        Err(PublishError {
          stream: self.stream.clone(),
          source,
        })
      }
    }
  }
}

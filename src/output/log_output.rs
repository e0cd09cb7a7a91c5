// 该文件是 Liusha （流沙） 项目的一部分。
// src/output/log_output.rs - 以日志形式输出检测结果
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
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{FrameRecord, MessageId},
  model::DetectResult,
  output::Render,
};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 每个检测框一行日志；`log:?quiet` 只输出汇总
#[derive(Debug, Clone, Default)]
pub struct LogOutput {
  quiet: bool,
}

impl LogOutput {
  pub fn new() -> Self {
    Self::default()
  }
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch);
    }
    let quiet = url.query_pairs().any(|(k, _)| k == "quiet");
    Ok(LogOutput { quiet })
  }
}

impl Render for LogOutput {
  type Error = LogOutputError;

  fn render_result(
    &self,
    id: &MessageId,
    record: &FrameRecord,
    result: &DetectResult,
  ) -> Result<(), Self::Error> {
    if result.is_empty() {
      info!("消息 {} 帧 {} 未检测到目标", id, record.frame_reference);
      return Ok(());
    }
    info!(
      "消息 {} 帧 {} 检测到 {} 个目标",
      id,
      record.frame_reference,
      result.len()
    );
    if !self.quiet {
      for item in result.iter() {
        info!("{}", item);
      }
    }
    Ok(())
  }
}

// 该文件是 Liusha （流沙） 项目的一部分。
// src/main.rs - 流水线入口
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

use std::{sync::Arc, thread, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use liusha::{
  FromUrl,
  frame::StreamMessage,
  handler::{AckPolicy, DetectionHandler},
  input::{ImageFileLoader, InputError},
  model::{IOU_THRESHOLD, ModelWrapper, PROB_THRESHOLD, Yolov8},
  output::OutputWrapper,
  stream::{LogBackend, ReadOptions},
  task::{DEFAULT_FRAME_REFERENCE, DEFAULT_GROUP, DEFAULT_STREAM, PipelineTask},
  utils::CancelToken,
};

/// Liusha 流式检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 消息日志地址（redis://host:port 或 memory:）
  #[arg(long, default_value = "redis://localhost:6379", value_name = "URL")]
  pub log: Url,
  #[arg(long, default_value = DEFAULT_STREAM)]
  pub stream: String,
  #[arg(long, default_value = DEFAULT_GROUP)]
  pub group: String,

  #[arg(long, default_value_t = 20, value_name = "COUNT")]
  pub publishers: usize,
  #[arg(long, default_value_t = 30, value_name = "COUNT")]
  pub consumers: usize,
  /// 同时运行的发布者上限，默认等于发布者数
  #[arg(long, value_name = "COUNT")]
  pub publisher_capacity: Option<usize>,
  /// 同时运行的消费者上限，默认等于消费者数
  #[arg(long, value_name = "COUNT")]
  pub consumer_capacity: Option<usize>,

  /// 每个发布者发布的帧数
  #[arg(long, default_value_t = 5, value_name = "COUNT")]
  pub frames: usize,
  /// 两次发布之间的间隔（毫秒）
  #[arg(long, default_value_t = 500, value_name = "MS")]
  pub interval_ms: u64,
  /// 发布的帧引用
  #[arg(long, default_value = DEFAULT_FRAME_REFERENCE, value_name = "PATH")]
  pub frame: String,
  /// 帧加载器，`image:` 相对工作目录解析帧引用
  #[arg(long, default_value = "image:", value_name = "URL")]
  pub loader: Url,

  /// 模型地址
  #[arg(long, default_value = "onnx:yolov8m.onnx", value_name = "URL")]
  pub model: Url,
  #[arg(long, default_value_t = PROB_THRESHOLD, value_name = "THRESHOLD")]
  pub prob_threshold: f32,
  #[arg(long, default_value_t = IOU_THRESHOLD, value_name = "THRESHOLD")]
  pub iou_threshold: f32,

  /// 单次读取的最大消息数
  #[arg(long, default_value_t = 10, value_name = "COUNT")]
  pub batch: usize,
  /// 读取阻塞超时（毫秒），0 表示一直阻塞
  #[arg(long, default_value_t = 2000, value_name = "MS")]
  pub block_ms: u64,
  #[arg(long, value_enum, default_value_t = AckPolicy::Confirmed)]
  pub ack_policy: AckPolicy,
  /// 启动时不重新处理遗留的待确认消息
  #[arg(long)]
  pub no_recover: bool,
  /// 发布结束后继续消费的秒数，缺省时运行到收到中断信号
  #[arg(long, value_name = "SECS")]
  pub run_for: Option<u64>,

  /// 结果输出（log: 或 jsonl:///path/to/file.jsonl）
  #[arg(long, default_value = "log:", value_name = "URL")]
  pub report: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("消息日志: {}", args.log);
  info!("模型: {}", args.model);
  info!("结果输出: {}", args.report);

  let cancel = CancelToken::new();
  {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      cancel.cancel();
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .context("无法设置 Ctrl-C 处理器")?;
  }

  let backend = LogBackend::from_url(&args.log).context("无法创建消息日志")?;
  let model = ModelWrapper::from_url(&args.model).context("无法加载模型")?;
  let detector =
    Arc::new(Yolov8::new(model).with_thresholds(args.prob_threshold, args.iou_threshold));
  info!(
    "阈值: 置信度 {}, IoU {}",
    detector.prob_threshold(),
    detector.iou_threshold()
  );
  let loader = ImageFileLoader::from_url(&args.loader)
    .map_err(InputError::from)
    .context("无法创建帧加载器")?;
  let output = OutputWrapper::from_url(&args.report).context("无法创建结果输出")?;
  let handler = DetectionHandler::new(loader, detector, output).with_policy(args.ack_policy);

  let block = (args.block_ms > 0).then(|| Duration::from_millis(args.block_ms));
  let task = PipelineTask::default()
    .with_stream(args.stream, args.group)
    .with_tasks(args.publishers, args.consumers)
    .with_capacity(
      args.publisher_capacity.unwrap_or(args.publishers),
      args.consumer_capacity.unwrap_or(args.consumers),
    )
    .with_frames(args.frame, args.frames, Duration::from_millis(args.interval_ms))
    .with_read(ReadOptions {
      count: args.batch,
      block,
    })
    .with_recover_pending(!args.no_recover)
    .with_run_for(args.run_for.map(Duration::from_secs));

  let summary = task.run(
    Arc::new(backend),
    move |message: &StreamMessage| handler.handle(message),
    &cancel,
  )?;

  info!(
    "运行结束: 发布 {} (失败 {}), 处理 {}, 确认 {}, 处理失败 {}",
    summary.published,
    summary.publish_failures,
    summary.consumers.received,
    summary.consumers.acked,
    summary.consumers.failed
  );
  if let Some(pending) = summary.pending
    && pending > 0
  {
    warn!("仍有 {} 条消息未确认", pending);
  }

  Ok(())
}

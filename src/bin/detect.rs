// 该文件是 Liusha （流沙） 项目的一部分。
// src/bin/detect.rs - 单张图片检测
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

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use liusha::{
  FromUrl,
  frame::{FrameRecord, MessageId},
  input::{FrameLoader, ImageFileLoader},
  model::{IOU_THRESHOLD, ModelWrapper, PROB_THRESHOLD, Yolov8},
  output::{OutputWrapper, Render},
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  #[arg(long, default_value = "onnx:yolov8m.onnx", value_name = "URL")]
  pub model: Url,
  /// 输入图片
  #[arg(long, default_value = "car.png", value_name = "PATH")]
  pub input: String,
  /// 结果输出
  #[arg(long, default_value = "log:", value_name = "URL")]
  pub output: Url,
  #[arg(long, default_value_t = PROB_THRESHOLD, value_name = "THRESHOLD")]
  pub prob_threshold: f32,
  #[arg(long, default_value_t = IOU_THRESHOLD, value_name = "THRESHOLD")]
  pub iou_threshold: f32,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("输入图片: {}", args.input);

  let model = ModelWrapper::from_url(&args.model).context("无法加载模型")?;
  let detector = Yolov8::new(model).with_thresholds(args.prob_threshold, args.iou_threshold);
  let output = OutputWrapper::from_url(&args.output)?;

  let frame = ImageFileLoader::new()
    .load(&args.input)
    .with_context(|| format!("无法加载 {}", args.input))?;

  let now = std::time::Instant::now();
  let result = detector.infer(&frame.tensor, frame.width, frame.height)?;
  info!("推理完成，耗时: {:.2?}", now.elapsed());

  for item in result.iter() {
    println!("{}", item);
  }
  output.render_result(&MessageId::zero(), &FrameRecord::new(args.input), &result)?;

  Ok(())
}

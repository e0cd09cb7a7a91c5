// 该文件是 Liusha （流沙） 项目的一部分。
// tests/handler.rs - 检测处理与确认策略
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
  collections::HashMap,
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
  time::Duration,
};

use thiserror::Error;

use liusha::{
  frame::{FrameRecord, MessageId, StreamMessage},
  handler::{AckPolicy, DetectionHandler, HandlerError},
  input::{FrameLoader, LoadedFrame},
  model::{
    DetectResult, Model, NUM_PREDICTIONS, Tensor, YOLOV8_INPUT_SHAPE, YOLOV8_OUTPUT_SHAPE, Yolov8,
  },
  output::Render,
  stream::{MemoryLog, ReadOptions, StreamLog},
  task::PipelineTask,
  utils::CancelToken,
};

#[derive(Error, Debug)]
#[error("no such frame: {0}")]
struct MissingFrame(String);

/// 只认识 `car.png` 的加载器
struct StubLoader;

impl FrameLoader for StubLoader {
  type Error = MissingFrame;

  fn load(&self, reference: &str) -> Result<LoadedFrame, Self::Error> {
    if reference != "car.png" {
      return Err(MissingFrame(reference.to_string()));
    }
    Ok(LoadedFrame {
      tensor: Tensor::zeros(&YOLOV8_INPUT_SHAPE),
      width: 200,
      height: 100,
    })
  }
}

#[derive(Error, Debug)]
#[error("model failure")]
struct ModelFailure;

/// 固定输出一个 car 检测框
struct StubModel {
  calls: Arc<AtomicUsize>,
}

impl Model for StubModel {
  type Error = ModelFailure;

  fn run(&mut self, _: &Tensor) -> Result<Tensor, Self::Error> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    let mut data = vec![0.0; 84 * NUM_PREDICTIONS];
    let index = 42;
    for (lane, value) in [0.5f32, 0.5, 0.25, 0.5].iter().enumerate() {
      data[lane * NUM_PREDICTIONS + index] = *value;
    }
    data[(4 + 2) * NUM_PREDICTIONS + index] = 0.9;
    Tensor::from_vec(&YOLOV8_OUTPUT_SHAPE, data).map_err(|_| ModelFailure)
  }
}

#[derive(Clone, Default)]
struct Collect {
  results: Arc<Mutex<Vec<(MessageId, DetectResult)>>>,
}

impl Render for Collect {
  type Error = std::io::Error;

  fn render_result(
    &self,
    id: &MessageId,
    _: &FrameRecord,
    result: &DetectResult,
  ) -> Result<(), Self::Error> {
    self
      .results
      .lock()
      .map_err(|_| std::io::Error::other("poisoned"))?
      .push((id.clone(), result.clone()));
    Ok(())
  }
}

fn message(id: &str, fields: &[(&str, &str)]) -> StreamMessage {
  StreamMessage {
    id: MessageId::new(id),
    fields: fields
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect::<HashMap<_, _>>(),
  }
}

fn handler(
  policy: AckPolicy,
) -> (
  DetectionHandler<StubLoader, StubModel, Collect>,
  Arc<AtomicUsize>,
  Collect,
) {
  let calls = Arc::new(AtomicUsize::new(0));
  let collect = Collect::default();
  let detector = Arc::new(Yolov8::new(StubModel {
    calls: Arc::clone(&calls),
  }));
  let handler =
    DetectionHandler::new(StubLoader, detector, collect.clone()).with_policy(policy);
  (handler, calls, collect)
}

#[test]
fn successful_detection_is_reported() {
  let (handler, calls, collect) = handler(AckPolicy::Confirmed);
  let msg = message(
    "1-0",
    &[("frame_reference", "car.png"), ("timestamp", "2026-01-01T00:00:00Z")],
  );
  assert!(handler.handle(&msg).is_ok());
  assert_eq!(calls.load(Ordering::SeqCst), 1);

  let results = collect.results.lock().unwrap();
  assert_eq!(results.len(), 1);
  let (id, result) = &results[0];
  assert_eq!(id.as_str(), "1-0");
  assert_eq!(result.len(), 1);
  let item = &result.items[0];
  assert_eq!(item.label(), "car");
  assert_eq!(item.bbox, [75.0, 25.0, 125.0, 75.0]);
}

#[test]
fn schema_error_skips_model() {
  let (handler, calls, collect) = handler(AckPolicy::Confirmed);
  let msg = message("1-0", &[("timestamp", "2026-01-01T00:00:00Z")]);
  assert!(matches!(handler.handle(&msg), Err(HandlerError::Schema(_))));
  assert_eq!(calls.load(Ordering::SeqCst), 0);
  assert!(collect.results.lock().unwrap().is_empty());
}

#[test]
fn confirmed_policy_reports_load_failure() {
  let (handler, calls, _) = handler(AckPolicy::Confirmed);
  let msg = message("2-0", &[("frame_reference", "missing.png")]);
  assert!(matches!(handler.handle(&msg), Err(HandlerError::Load(_))));
  assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn receipt_policy_acknowledges_failures() {
  let (handler, _, collect) = handler(AckPolicy::Receipt);
  assert_eq!(handler.policy(), AckPolicy::Receipt);
  let missing = message("2-0", &[("frame_reference", "missing.png")]);
  let malformed = message("2-1", &[]);
  assert!(handler.handle(&missing).is_ok());
  assert!(handler.handle(&malformed).is_ok());
  assert!(matches!(
    handler.process(&missing),
    Err(HandlerError::Load(_))
  ));
  assert!(collect.results.lock().unwrap().is_empty());
}

fn run_pipeline(policy: AckPolicy, frame: &str) -> (usize, usize) {
  let (handler, _, _) = handler(policy);
  let log = MemoryLog::new();
  let cancel = CancelToken::new();
  let seen = Arc::new(AtomicUsize::new(0));

  let summary = {
    let seen = Arc::clone(&seen);
    let stop = cancel.clone();
    PipelineTask::default()
      .with_tasks(1, 2)
      .with_frames(frame, 3, Duration::from_millis(1))
      .with_read(ReadOptions {
        count: 10,
        block: Some(Duration::from_millis(20)),
      })
      .with_run_for(Some(Duration::from_secs(30)))
      .run(
        Arc::new(log.clone()),
        move |message: &StreamMessage| {
          let result = handler.handle(message);
          if seen.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
            stop.cancel();
          }
          result
        },
        &cancel,
      )
      .unwrap()
  };

  let mut log = log;
  let pending = log.pending_count("camera_stream", "camera_group").unwrap();
  (summary.consumers.acked, pending)
}

#[test]
fn confirmed_policy_leaves_unloadable_frames_pending() {
  assert_eq!(run_pipeline(AckPolicy::Confirmed, "missing.png"), (0, 3));
  assert_eq!(run_pipeline(AckPolicy::Confirmed, "car.png"), (3, 0));
}

#[test]
fn receipt_policy_drains_unloadable_frames() {
  assert_eq!(run_pipeline(AckPolicy::Receipt, "missing.png"), (3, 0));
}

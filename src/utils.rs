// 该文件是 Liusha （流沙） 项目的一部分。
// src/utils.rs - 取消信号与退避重试
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
  sync::{Arc, Condvar, Mutex, PoisonError},
  time::Duration,
};

use rand::Rng;

#[derive(Default)]
struct CancelInner {
  cancelled: Mutex<bool>,
  signal: Condvar,
}

/// 跨线程共享的取消信号，克隆后指向同一个信号
#[derive(Clone, Default)]
pub struct CancelToken {
  inner: Arc<CancelInner>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    let mut cancelled = self
      .inner
      .cancelled
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    *cancelled = true;
    self.inner.signal.notify_all();
  }

  pub fn is_cancelled(&self) -> bool {
    *self
      .inner
      .cancelled
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  /// 睡眠至多 `timeout`，期间被取消则提前返回；返回是否已取消
  pub fn wait_timeout(&self, timeout: Duration) -> bool {
    let guard = self
      .inner
      .cancelled
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    let (guard, _) = self
      .inner
      .signal
      .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
      .unwrap_or_else(PoisonError::into_inner);
    *guard
  }
}

impl std::fmt::Debug for CancelToken {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CancelToken")
      .field("cancelled", &self.is_cancelled())
      .finish()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
  pub base: Duration,
  pub max: Duration,
  /// 连续失败次数上限，超过后放弃
  pub max_retries: u32,
}

impl Default for BackoffConfig {
  fn default() -> Self {
    BackoffConfig {
      base: Duration::from_millis(100),
      max: Duration::from_secs(5),
      max_retries: 8,
    }
  }
}

/// 带抖动的指数退避
#[derive(Debug, Clone)]
pub struct Backoff {
  config: BackoffConfig,
  attempt: u32,
}

impl Backoff {
  pub fn new(config: BackoffConfig) -> Self {
    Backoff { config, attempt: 0 }
  }

  pub fn attempts(&self) -> u32 {
    self.attempt
  }

  pub fn reset(&mut self) {
    self.attempt = 0;
  }

  /// 下一次重试前的等待时间，取 `[d/2, d]` 内的随机值；次数用尽时返回 `None`
  pub fn next_delay(&mut self) -> Option<Duration> {
    if self.attempt >= self.config.max_retries {
      return None;
    }
    let exp = self
      .config
      .base
      .saturating_mul(1u32.checked_shl(self.attempt).unwrap_or(u32::MAX));
    let ceiling = exp.min(self.config.max);
    self.attempt += 1;

    let ceiling_ms = ceiling.as_millis() as u64;
    if ceiling_ms == 0 {
      return Some(ceiling);
    }
    let jittered = rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms);
    Some(Duration::from_millis(jittered))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{thread, time::Instant};

  #[test]
  fn cancel_wakes_sleeping_waiter() {
    let token = CancelToken::new();
    let waiter = token.clone();
    let started = Instant::now();
    let handle = thread::spawn(move || waiter.wait_timeout(Duration::from_secs(10)));
    thread::sleep(Duration::from_millis(50));
    token.cancel();
    assert!(handle.join().unwrap());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(token.is_cancelled());
  }

  #[test]
  fn wait_times_out_without_cancel() {
    let token = CancelToken::new();
    assert!(!token.wait_timeout(Duration::from_millis(10)));
  }

  #[test]
  fn backoff_grows_and_is_capped() {
    let mut backoff = Backoff::new(BackoffConfig {
      base: Duration::from_millis(100),
      max: Duration::from_millis(400),
      max_retries: 5,
    });
    let ceilings = [100, 200, 400, 400, 400];
    for ceiling in ceilings {
      let delay = backoff.next_delay().unwrap().as_millis() as u64;
      assert!(delay >= ceiling / 2 && delay <= ceiling, "{delay} vs {ceiling}");
    }
    assert_eq!(backoff.next_delay(), None);
    assert_eq!(backoff.attempts(), 5);

    backoff.reset();
    assert!(backoff.next_delay().is_some());
  }
}

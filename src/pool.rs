// 该文件是 Liusha （流沙） 项目的一部分。
// src/pool.rs - 计数信号量与工作线程池
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
  thread::{self, JoinHandle},
};

use thiserror::Error;
use tracing::{debug, error};

/// 计数信号量
#[derive(Debug)]
pub struct Semaphore {
  permits: Mutex<usize>,
  released: Condvar,
  capacity: usize,
}

impl Semaphore {
  pub fn new(capacity: usize) -> Self {
    Semaphore {
      permits: Mutex::new(capacity),
      released: Condvar::new(),
      capacity,
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn available(&self) -> usize {
    *self.permits.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// 阻塞直到取得一个名额
  pub fn acquire(&self) -> SemaphorePermit<'_> {
    let guard = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
    let mut guard = self
      .released
      .wait_while(guard, |permits| *permits == 0)
      .unwrap_or_else(PoisonError::into_inner);
    *guard -= 1;
    SemaphorePermit { semaphore: self }
  }

  fn release(&self) {
    let mut guard = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
    *guard += 1;
    self.released.notify_one();
  }
}

/// 持有期间占用一个名额，析构时（包括 panic 展开）归还
#[must_use]
pub struct SemaphorePermit<'a> {
  semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
  fn drop(&mut self) {
    self.semaphore.release();
  }
}

#[derive(Error, Debug)]
pub enum PoolError {
  #[error("无法创建线程 {name}: {source}")]
  Spawn {
    name: String,
    #[source]
    source: std::io::Error,
  },
  #[error("任务 {0} 异常退出")]
  Panicked(String),
}

/// 同一角色的一组任务，活跃数量受信号量限制
pub struct WorkerPool<T> {
  role: &'static str,
  semaphore: Arc<Semaphore>,
  handles: Vec<(String, JoinHandle<T>)>,
}

impl<T: Send + 'static> WorkerPool<T> {
  pub fn new(role: &'static str, capacity: usize) -> Self {
    WorkerPool {
      role,
      semaphore: Arc::new(Semaphore::new(capacity)),
      handles: Vec::new(),
    }
  }

  pub fn semaphore(&self) -> &Arc<Semaphore> {
    &self.semaphore
  }

  pub fn len(&self) -> usize {
    self.handles.len()
  }

  pub fn is_empty(&self) -> bool {
    self.handles.is_empty()
  }

  /// 启动一个任务；任务先取得名额再执行
  pub fn spawn<F>(&mut self, name: String, task: F) -> Result<(), PoolError>
  where
    F: FnOnce(&str) -> T + Send + 'static,
  {
    let semaphore = Arc::clone(&self.semaphore);
    let role = self.role;
    let task_name = name.clone();
    let handle = thread::Builder::new()
      .name(name.clone())
      .spawn(move || {
        let _permit = semaphore.acquire();
        debug!(
          role,
          task = %task_name,
          available = semaphore.available(),
          capacity = semaphore.capacity(),
          "取得执行名额"
        );
        task(&task_name)
      })
      .map_err(|source| PoolError::Spawn {
        name: name.clone(),
        source,
      })?;
    self.handles.push((name, handle));
    Ok(())
  }

  /// 等待全部任务结束，按启动顺序返回结果
  pub fn join(self) -> Vec<Result<T, PoolError>> {
    let role = self.role;
    self
      .handles
      .into_iter()
      .map(|(name, handle)| {
        handle.join().map_err(|_| {
          error!(role, task = %name, "任务异常退出");
          PoolError::Panicked(name)
        })
      })
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
  };

  #[test]
  fn active_tasks_never_exceed_capacity() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let mut pool = WorkerPool::new("test", 2);

    for i in 0..6 {
      let active = Arc::clone(&active);
      let peak = Arc::clone(&peak);
      pool
        .spawn(format!("worker-{i}"), move |_| {
          let now = active.fetch_add(1, Ordering::SeqCst) + 1;
          peak.fetch_max(now, Ordering::SeqCst);
          thread::sleep(Duration::from_millis(20));
          active.fetch_sub(1, Ordering::SeqCst);
          i
        })
        .unwrap();
    }

    let results: Vec<_> = pool.join().into_iter().map(Result::unwrap).collect();
    assert_eq!(results, vec![0, 1, 2, 3, 4, 5]);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
  }

  #[test]
  fn permit_is_released_when_task_panics() {
    let mut pool = WorkerPool::new("test", 1);
    let semaphore = Arc::clone(pool.semaphore());
    pool
      .spawn("boom".to_string(), |_| panic!("task failure"))
      .unwrap();
    pool.spawn("after".to_string(), |name| name.len()).unwrap();

    let results = pool.join();
    assert!(matches!(results[0], Err(PoolError::Panicked(ref name)) if name == "boom"));
    assert_eq!(results[1].as_ref().unwrap(), &5);
    assert_eq!(semaphore.available(), 1);
  }

  #[test]
  fn permits_are_counted_until_dropped() {
    let semaphore = Semaphore::new(2);
    let first = semaphore.acquire();
    let second = semaphore.acquire();
    assert_eq!(semaphore.available(), 0);
    drop(first);
    assert_eq!(semaphore.available(), 1);
    drop(second);
    assert_eq!(semaphore.available(), semaphore.capacity());
  }
}

//! Fire-and-forget work that must never delay or fail a response.

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use color_eyre::Result;
use tokio::task::JoinSet;
use tracing::warn;

/// Tracks spawned side effects so a host can wait for them before shutting down.
#[derive(Default)]
pub struct Background {
  tasks: Mutex<JoinSet<()>>,
}

impl Background {
  /// Spawn `work`; its error is logged and dropped at the task boundary.
  pub fn spawn<F>(&self, label: &'static str, work: F)
  where
    F: Future<Output = Result<()>> + Send + 'static,
  {
    let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
    // Reap finished tasks so the set does not grow unbounded
    while tasks.try_join_next().is_some() {}
    tasks.spawn(async move {
      if let Err(e) = work.await {
        warn!(task = label, error = %e, "background task failed");
      }
    });
  }

  /// Wait until every spawned task, including ones spawned while waiting, has finished.
  pub async fn settle(&self) {
    loop {
      let mut pending = {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *tasks)
      };
      if pending.is_empty() {
        return;
      }
      while let Some(joined) = pending.join_next().await {
        if let Err(e) = joined {
          warn!(error = %e, "background task panicked");
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  #[tokio::test]
  async fn test_settle_waits_for_spawned_work() {
    let background = Background::default();
    let done = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
      let done = Arc::clone(&done);
      background.spawn("count", async move {
        tokio::task::yield_now().await;
        done.fetch_add(1, Ordering::SeqCst);
        Ok(())
      });
    }

    background.settle().await;
    assert_eq!(done.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn test_errors_are_swallowed() {
    let background = Background::default();
    background.spawn("fails", async { Err(eyre!("quota exceeded")) });
    background.settle().await;
    background.settle().await;
  }
}

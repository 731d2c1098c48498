//! Restartable one-shot timer.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

struct Pending {
    deadline: Instant,
    handle: JoinHandle<()>,
}

/// Runs the most recently scheduled job once `delay` has passed without a
/// newer one being scheduled.
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<Pending>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `job` after the delay, cancelling any job still waiting.
    pub fn schedule<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            job.await;
        });

        let previous = self.pending.lock().unwrap().replace(Pending {
            deadline: Instant::now() + delay,
            handle,
        });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
    }

    /// Cancel the waiting job. Returns true if one was waiting.
    pub fn cancel(&self) -> bool {
        let waiting = self.remaining().is_some();
        if let Some(previous) = self.pending.lock().unwrap().take() {
            previous.handle.abort();
        }
        waiting
    }

    /// Time left before the waiting job starts, if any.
    pub fn remaining(&self) -> Option<Duration> {
        let pending = self.pending.lock().unwrap();
        let pending = pending.as_ref()?;
        if pending.handle.is_finished() {
            return None;
        }
        let left = pending.deadline.saturating_duration_since(Instant::now());
        (!left.is_zero()).then_some(left)
    }

    /// Whole seconds left, rounded up; zero when nothing is waiting.
    pub fn countdown_secs(&self) -> u64 {
        self.remaining().map_or(0, |left| {
            let secs = left.as_secs();
            if left.subsec_nanos() > 0 {
                secs + 1
            } else {
                secs
            }
        })
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(pending) = self.pending.get_mut().ok().and_then(Option::take) {
            pending.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_only_latest_job_runs() {
        let runs = Arc::new(AtomicUsize::new(0));
        let last = Arc::new(AtomicUsize::new(0));
        let debouncer = Debouncer::new(Duration::from_millis(50));

        for i in 1..=3 {
            let runs = runs.clone();
            let last = last.clone();
            debouncer.schedule(async move {
                runs.fetch_add(1, Ordering::SeqCst);
                last.store(i, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 3);
        assert_eq!(debouncer.remaining(), None);
    }

    #[tokio::test]
    async fn test_countdown_and_cancel() {
        let runs = Arc::new(AtomicUsize::new(0));
        let debouncer = Debouncer::new(Duration::from_secs(15));
        assert_eq!(debouncer.countdown_secs(), 0);

        let counter = runs.clone();
        debouncer.schedule(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let countdown = debouncer.countdown_secs();
        assert!(countdown == 15 || countdown == 14);

        assert!(debouncer.cancel());
        assert!(!debouncer.cancel());
        assert_eq!(debouncer.countdown_secs(), 0);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}

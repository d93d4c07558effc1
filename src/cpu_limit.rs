//! Limits on concurrent CPU-heavy external processes.

use std::sync::Arc;

use tokio::sync::Semaphore;

use crate::prelude::*;

/// Caps the number of heavy external processes (like `pdftocairo`) running at
/// once, across every pipeline sharing this limiter.
///
/// Each of these processes will happily use 100% of a core, and we do not want
/// a burst of uploads to start dozens of them at the same time.
#[derive(Clone, Debug)]
pub struct CpuLimiter {
    semaphore: Arc<Semaphore>,
}

impl CpuLimiter {
    /// Allow up to `permits` concurrent processes. Zero is treated as one.
    pub fn new(permits: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits.max(1))),
        }
    }

    /// Allow one process per CPU.
    pub fn per_cpu() -> Self {
        Self::new(num_cpus::get())
    }

    /// Run `f` while holding a permit.
    #[instrument(level = "trace", skip_all)]
    pub async fn run<Func, Fut, R>(&self, f: Func) -> Result<R>
    where
        Func: FnOnce() -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .context("could not acquire CPU permit")?;
        f().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures::future::join_all;

    use super::*;

    #[tokio::test]
    async fn never_exceeds_permit_count() {
        let limiter = CpuLimiter::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let tasks = (0..6).map(|_| {
            let running = running.clone();
            let peak = peak.clone();
            let limiter = limiter.clone();
            async move {
                limiter
                    .run(|| async {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }
        });
        for result in join_all(tasks).await {
            result.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }
}

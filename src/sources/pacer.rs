//! Per-source request pacing: a concurrency cap plus a minimum spacing between
//! request starts. One `Pacer` per source, shared by every attempt against it.

use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::{sleep_until, Instant};

use crate::error::SourceError;

#[derive(Debug)]
pub struct Pacer {
    permits: Semaphore,
    concurrency: usize,
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Pacer {
    pub fn new(concurrency: usize, min_interval: Duration) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            permits: Semaphore::new(concurrency),
            concurrency,
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait for a request slot. Holding the returned permit counts against the
    /// source's concurrency cap. Fails with `Timeout` when the slot would open
    /// after `deadline`.
    pub async fn acquire(&self, deadline: Instant) -> Result<SemaphorePermit<'_>, SourceError> {
        let permit = tokio::time::timeout_at(deadline, self.permits.acquire())
            .await
            .map_err(|_| SourceError::Timeout)?
            .map_err(|_| SourceError::unavailable("request pacer closed"))?;

        let start_at = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let at = next.map_or(now, |n| n.max(now));
            if at > deadline {
                return Err(SourceError::Timeout);
            }
            *next = Some(at + self.min_interval);
            at
        };
        sleep_until(start_at).await;
        Ok(permit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn spaces_request_starts() {
        let p = Pacer::new(4, Duration::from_millis(200));
        let t0 = Instant::now();
        let deadline = t0 + Duration::from_secs(10);
        let mut starts = Vec::new();
        for _ in 0..3 {
            let _permit = p.acquire(deadline).await.unwrap();
            starts.push(Instant::now() - t0);
        }
        assert_eq!(starts[0], Duration::ZERO);
        assert!(starts[1] >= Duration::from_millis(200));
        assert!(starts[2] >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn slot_past_deadline_is_a_timeout() {
        let p = Pacer::new(1, Duration::from_secs(5));
        let deadline = Instant::now() + Duration::from_secs(1);
        drop(p.acquire(deadline).await.unwrap());
        assert_eq!(p.acquire(deadline).await.unwrap_err(), SourceError::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_cap_blocks_until_release() {
        let p = Pacer::new(1, Duration::ZERO);
        let deadline = Instant::now() + Duration::from_millis(50);
        let held = p.acquire(deadline).await.unwrap();
        assert_eq!(p.acquire(deadline).await.unwrap_err(), SourceError::Timeout);
        drop(held);
        assert!(p.acquire(Instant::now() + Duration::from_secs(1)).await.is_ok());
    }
}

//! Crawl orchestrator: concurrent fan-out over all configured sources.
//!
//! - One [`SourceTask`] per source, mutated only by the loop in [`CrawlOrchestrator::run`].
//! - Workers run on a `JoinSet` and hand back `(index, attempt, result)` slots.
//! - A global semaphore caps concurrent fetches; each source's [`Pacer`] caps its own
//!   concurrency and spaces its requests.
//! - One deadline for the whole fan-out. When it fires, open tasks become `TimedOut`
//!   and their workers are aborted without being awaited.

pub mod task;

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use metrics::{counter, histogram};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout_at, Instant};

use crate::config::{CrawlConfig, PipelineConfig};
use crate::error::{PipelineError, SourceError};
use crate::intent::Intent;
use crate::sources::pacer::Pacer;
use crate::sources::{build_adapters, FetchLimits, RawListing, SourceAdapter};
pub use task::{AttemptOutcome, AttemptRecord, RetryPolicy, SourceReport, SourceTask, TaskState};

/// An adapter plus the limits every attempt against it runs under.
#[derive(Clone)]
pub struct SourceHandle {
    pub adapter: Arc<dyn SourceAdapter>,
    pub limits: FetchLimits,
}

impl SourceHandle {
    pub fn new(adapter: Arc<dyn SourceAdapter>, limits: FetchLimits) -> Self {
        Self { adapter, limits }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CrawlSettings {
    pub deadline: Duration,
    pub attempt_timeout: Duration,
    pub global_concurrency: usize,
    pub retry: RetryPolicy,
}

impl From<&CrawlConfig> for CrawlSettings {
    fn from(c: &CrawlConfig) -> Self {
        Self {
            deadline: c.deadline(),
            attempt_timeout: Duration::from_millis(c.attempt_timeout_ms),
            global_concurrency: c.global_concurrency,
            retry: RetryPolicy {
                max_attempts: c.max_attempts,
                base: Duration::from_millis(c.base_backoff_ms),
                max: Duration::from_millis(c.max_backoff_ms),
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    /// All listings, grouped by source in configuration order.
    pub listings: Vec<RawListing>,
    pub reports: Vec<SourceReport>,
    pub deadline_hit: bool,
    pub elapsed_ms: u64,
}

/// Result slot a worker hands back to the loop.
struct Slot {
    index: usize,
    attempt: u32,
    elapsed: Duration,
    result: Result<Vec<RawListing>, SourceError>,
}

pub struct CrawlOrchestrator {
    sources: Vec<SourceHandle>,
    settings: CrawlSettings,
}

impl CrawlOrchestrator {
    pub fn new(sources: Vec<SourceHandle>, settings: CrawlSettings) -> Self {
        Self { sources, settings }
    }

    /// Adapters and pacers for every enabled source of the config.
    pub fn from_config(cfg: &PipelineConfig) -> anyhow::Result<Self> {
        let adapters = build_adapters(&cfg.sources)?;
        let enabled = cfg.sources.iter().filter(|s| s.enabled);
        let sources = adapters
            .into_iter()
            .zip(enabled)
            .map(|(adapter, s)| {
                let limits = FetchLimits {
                    max_listings: s.max_listings,
                    max_queries: s.max_queries,
                    pacer: Arc::new(Pacer::new(
                        s.concurrency,
                        Duration::from_millis(s.min_interval_ms),
                    )),
                };
                SourceHandle::new(adapter, limits)
            })
            .collect();
        Ok(Self::new(sources, CrawlSettings::from(&cfg.crawl)))
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.sources
            .iter()
            .map(|s| s.adapter.id().to_string())
            .collect()
    }

    pub fn settings(&self) -> &CrawlSettings {
        &self.settings
    }

    /// Fan out over every source until all tasks are terminal or the deadline fires.
    /// Fails with `NoDataAvailable` only when not a single listing came back.
    pub async fn run(&self, intent: Arc<Intent>) -> Result<CrawlOutcome, PipelineError> {
        crate::metrics::ensure_described();
        let started = Instant::now();
        let deadline = started + self.settings.deadline;
        let global = Arc::new(Semaphore::new(self.settings.global_concurrency.max(1)));

        let mut tasks: Vec<SourceTask> = self
            .sources
            .iter()
            .map(|s| SourceTask::new(s.adapter.id(), deadline))
            .collect();
        let mut slots: Vec<Vec<RawListing>> = self.sources.iter().map(|_| Vec::new()).collect();
        let mut workers: JoinSet<Slot> = JoinSet::new();

        for (i, task) in tasks.iter_mut().enumerate() {
            self.launch(i, task, &intent, &global, deadline, &mut workers);
        }

        let mut deadline_hit = false;
        while tasks.iter().any(|t| !t.state.is_terminal()) {
            let next_retry = tasks
                .iter()
                .filter(|t| t.state == TaskState::Pending)
                .filter_map(|t| t.next_attempt_at)
                .min();

            tokio::select! {
                biased;
                _ = sleep_until(deadline) => {
                    deadline_hit = true;
                    break;
                }
                joined = workers.join_next(), if !workers.is_empty() => {
                    match joined {
                        Some(Ok(slot)) => self.settle(slot, &mut tasks, &mut slots),
                        Some(Err(e)) => {
                            tracing::error!(target: "crawl", error = %e, "crawl worker aborted");
                        }
                        None => {}
                    }
                }
                _ = sleep_until(next_retry.unwrap_or(deadline)), if next_retry.is_some() => {}
            }

            let now = Instant::now();
            for (i, task) in tasks.iter_mut().enumerate() {
                if task.is_due(now) {
                    self.launch(i, task, &intent, &global, deadline, &mut workers);
                }
            }
        }

        if deadline_hit {
            for t in tasks.iter_mut().filter(|t| !t.state.is_terminal()) {
                tracing::warn!(target: "crawl", source = %t.source_id, state = ?t.state, "cancelled at crawl deadline");
                t.cancel_at_deadline();
                record_terminal(t);
            }
        }
        // Aborted workers are dropped, never awaited.
        workers.abort_all();
        drop(workers);

        let elapsed = started.elapsed();
        histogram!("crawl_run_ms").record(elapsed.as_secs_f64() * 1_000.0);

        let reports: Vec<SourceReport> = tasks.iter().map(SourceTask::report).collect();
        let listings: Vec<RawListing> = slots.into_iter().flatten().collect();

        tracing::info!(
            target: "crawl",
            sources = reports.len(),
            listings = listings.len(),
            deadline_hit,
            elapsed_ms = elapsed.as_millis() as u64,
            "crawl finished"
        );

        if listings.is_empty() {
            return Err(PipelineError::NoDataAvailable { sources: reports });
        }
        Ok(CrawlOutcome {
            listings,
            reports,
            deadline_hit,
            elapsed_ms: elapsed.as_millis() as u64,
        })
    }

    fn launch(
        &self,
        index: usize,
        task: &mut SourceTask,
        intent: &Arc<Intent>,
        global: &Arc<Semaphore>,
        deadline: Instant,
        workers: &mut JoinSet<Slot>,
    ) {
        task.start();
        counter!("crawl_source_attempts_total", "source" => task.source_id.clone()).increment(1);
        tracing::debug!(target: "crawl", source = %task.source_id, attempt = task.attempts, "attempt started");

        let adapter = Arc::clone(&self.sources[index].adapter);
        let limits = self.sources[index].limits.clone();
        let intent = Arc::clone(intent);
        let global = Arc::clone(global);
        let attempt = task.attempts;
        let attempt_deadline = deadline.min(Instant::now() + self.settings.attempt_timeout);

        workers.spawn(async move {
            let t0 = Instant::now();
            let work = async {
                let _permit = match global.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return Err(SourceError::unavailable("crawl semaphore closed")),
                };
                AssertUnwindSafe(adapter.fetch(&intent, &limits, attempt_deadline))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| Err(SourceError::unavailable("adapter panicked")))
            };
            let result = timeout_at(attempt_deadline, work)
                .await
                .unwrap_or(Err(SourceError::Timeout));
            Slot {
                index,
                attempt,
                elapsed: t0.elapsed(),
                result,
            }
        });
    }

    fn settle(&self, slot: Slot, tasks: &mut [SourceTask], slots: &mut [Vec<RawListing>]) {
        let task = &mut tasks[slot.index];
        if task.state != TaskState::InFlight || task.attempts != slot.attempt {
            return;
        }
        match slot.result {
            Ok(listings) => {
                tracing::info!(target: "crawl", source = %task.source_id, attempt = slot.attempt, listings = listings.len(), "source succeeded");
                task.succeed(listings.len(), slot.elapsed);
                slots[slot.index] = listings;
            }
            Err(err) => {
                tracing::warn!(target: "crawl", source = %task.source_id, attempt = slot.attempt, error = %err, "source attempt failed");
                let next = task.fail(err, slot.elapsed, &self.settings.retry, Instant::now());
                if let Some(at) = next {
                    tracing::debug!(target: "crawl", source = %task.source_id, retry_in_ms = (at - Instant::now()).as_millis() as u64, "retry scheduled");
                }
            }
        }
        if task.state.is_terminal() {
            record_terminal(task);
        }
    }
}

fn record_terminal(task: &SourceTask) {
    let state = match task.state {
        TaskState::Succeeded => "succeeded",
        TaskState::TimedOut => "timed_out",
        TaskState::Exhausted => "exhausted",
        _ => "other",
    };
    counter!("crawl_source_terminal_total", "state" => state).increment(1);
}

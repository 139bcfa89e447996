//! Per-source task state machine.
//!
//! ```text
//! Pending → InFlight → Succeeded
//!                    → TimedOut                      (terminal)
//!                    → Failed | RateLimited → Pending (backoff)
//!                                           → Exhausted (no attempts / no time left)
//! ```
//!
//! Only the orchestrator loop mutates a [`SourceTask`]; workers hand back results.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::SourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InFlight,
    Succeeded,
    Failed,
    RateLimited,
    TimedOut,
    Exhausted,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::TimedOut | Self::Exhausted)
    }

    fn can_become(self, to: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, to),
            (Pending, InFlight)
                | (Pending, TimedOut)
                | (InFlight, Succeeded)
                | (InFlight, Failed)
                | (InFlight, RateLimited)
                | (InFlight, TimedOut)
                | (Failed, Pending)
                | (Failed, Exhausted)
                | (Failed, TimedOut)
                | (RateLimited, Pending)
                | (RateLimited, Exhausted)
                | (RateLimited, TimedOut)
        )
    }
}

/// How one attempt ended, as recorded in the crawl report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Timeout,
    RateLimited,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
    pub listings: usize,
    pub error: Option<String>,
}

/// Exponential backoff with a cap; a source's `retry_after` acts as a floor.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let raw = self.base.saturating_mul(1u32 << exp).min(self.max);
        match retry_after {
            Some(floor) => raw.max(floor),
            None => raw,
        }
    }
}

/// One (source, intent) pairing for the duration of a crawl.
#[derive(Debug, Clone)]
pub struct SourceTask {
    pub source_id: String,
    pub state: TaskState,
    pub attempts: u32,
    pub last_error: Option<SourceError>,
    pub deadline: Instant,
    /// Earliest start of the next attempt while `Pending` after a failure.
    pub next_attempt_at: Option<Instant>,
    pub listings: usize,
    pub transitions: Vec<TaskState>,
    pub attempt_log: Vec<AttemptRecord>,
    started_at: Instant,
    finished_at: Option<Instant>,
}

impl SourceTask {
    pub fn new(source_id: impl Into<String>, deadline: Instant) -> Self {
        Self {
            source_id: source_id.into(),
            state: TaskState::Pending,
            attempts: 0,
            last_error: None,
            deadline,
            next_attempt_at: None,
            listings: 0,
            transitions: vec![TaskState::Pending],
            attempt_log: Vec::new(),
            started_at: Instant::now(),
            finished_at: None,
        }
    }

    fn go(&mut self, to: TaskState) {
        debug_assert!(
            self.state.can_become(to),
            "illegal transition {:?} -> {:?} for {}",
            self.state,
            to,
            self.source_id
        );
        if !self.state.can_become(to) {
            tracing::error!(target: "crawl", source = %self.source_id, from = ?self.state, to = ?to, "illegal task transition");
        }
        self.state = to;
        self.transitions.push(to);
        if to.is_terminal() {
            self.finished_at = Some(Instant::now());
        }
    }

    /// Ready to launch now (never before its backoff has elapsed).
    pub fn is_due(&self, now: Instant) -> bool {
        self.state == TaskState::Pending && self.next_attempt_at.map_or(true, |t| t <= now)
    }

    pub fn start(&mut self) {
        self.attempts += 1;
        self.next_attempt_at = None;
        self.go(TaskState::InFlight);
    }

    pub fn succeed(&mut self, listings: usize, elapsed: Duration) {
        self.listings = listings;
        self.attempt_log.push(AttemptRecord {
            attempt: self.attempts,
            outcome: AttemptOutcome::Success,
            elapsed_ms: elapsed.as_millis() as u64,
            listings,
            error: None,
        });
        self.go(TaskState::Succeeded);
    }

    /// Record a failed attempt and decide what happens next.
    /// Returns the time of the next attempt when one was scheduled.
    pub fn fail(
        &mut self,
        err: SourceError,
        elapsed: Duration,
        policy: &RetryPolicy,
        now: Instant,
    ) -> Option<Instant> {
        let (outcome, state, retry_after) = match &err {
            SourceError::Timeout => (AttemptOutcome::Timeout, TaskState::TimedOut, None),
            SourceError::RateLimited { retry_after } => {
                (AttemptOutcome::RateLimited, TaskState::RateLimited, *retry_after)
            }
            SourceError::Unavailable { .. } => {
                (AttemptOutcome::Unavailable, TaskState::Failed, None)
            }
        };
        self.attempt_log.push(AttemptRecord {
            attempt: self.attempts,
            outcome,
            elapsed_ms: elapsed.as_millis() as u64,
            listings: 0,
            error: Some(err.to_string()),
        });
        self.last_error = Some(err);
        self.go(state);
        if state == TaskState::TimedOut {
            return None;
        }

        if self.attempts >= policy.max_attempts {
            self.go(TaskState::Exhausted);
            return None;
        }
        let at = now + policy.backoff(self.attempts, retry_after);
        if at >= self.deadline {
            // attempts remain but none could start in time
            self.go(TaskState::TimedOut);
            return None;
        }
        self.next_attempt_at = Some(at);
        self.go(TaskState::Pending);
        Some(at)
    }

    /// The global deadline fired while this task was still open.
    pub fn cancel_at_deadline(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if self.last_error.is_none() {
            self.last_error = Some(SourceError::Timeout);
        }
        if self.state == TaskState::InFlight {
            self.attempt_log.push(AttemptRecord {
                attempt: self.attempts,
                outcome: AttemptOutcome::Timeout,
                elapsed_ms: 0,
                listings: 0,
                error: Some("cancelled at crawl deadline".into()),
            });
        }
        self.next_attempt_at = None;
        self.go(TaskState::TimedOut);
    }

    pub fn elapsed(&self) -> Duration {
        self.finished_at.unwrap_or_else(Instant::now) - self.started_at
    }

    pub fn report(&self) -> SourceReport {
        SourceReport {
            source_id: self.source_id.clone(),
            state: self.state,
            attempts: self.attempts,
            listings: self.listings,
            last_error: self.last_error.as_ref().map(|e| e.to_string()),
            elapsed_ms: self.elapsed().as_millis() as u64,
            transitions: self.transitions.clone(),
            attempt_log: self.attempt_log.clone(),
        }
    }
}

/// What survives a [`SourceTask`] once the crawl is over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source_id: String,
    pub state: TaskState,
    pub attempts: u32,
    pub listings: usize,
    pub last_error: Option<String>,
    pub elapsed_ms: u64,
    pub transitions: Vec<TaskState>,
    pub attempt_log: Vec<AttemptRecord>,
}

impl SourceReport {
    /// Ended without delivering a complete result.
    pub fn is_incomplete(&self) -> bool {
        self.state != TaskState::Succeeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base: Duration::from_millis(100),
            max: Duration::from_millis(1_000),
        }
    }

    #[test]
    fn backoff_doubles_caps_and_honours_retry_after() {
        let p = policy(5);
        assert_eq!(p.backoff(1, None), Duration::from_millis(100));
        assert_eq!(p.backoff(2, None), Duration::from_millis(200));
        assert_eq!(p.backoff(3, None), Duration::from_millis(400));
        assert_eq!(p.backoff(6, None), Duration::from_millis(1_000));
        assert_eq!(
            p.backoff(1, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
    }

    #[tokio::test]
    async fn failure_then_success_walks_the_machine() {
        let now = Instant::now();
        let mut t = SourceTask::new("shop", now + Duration::from_secs(10));
        t.start();
        let next = t.fail(SourceError::unavailable("503"), Duration::ZERO, &policy(3), now);
        assert_eq!(next, Some(now + Duration::from_millis(100)));
        assert_eq!(t.state, TaskState::Pending);
        assert!(!t.is_due(now));
        assert!(t.is_due(now + Duration::from_millis(100)));

        t.start();
        t.succeed(4, Duration::from_millis(30));
        assert_eq!(
            t.transitions,
            vec![
                TaskState::Pending,
                TaskState::InFlight,
                TaskState::Failed,
                TaskState::Pending,
                TaskState::InFlight,
                TaskState::Succeeded
            ]
        );
        let r = t.report();
        assert_eq!((r.attempts, r.listings), (2, 4));
        assert_eq!(r.attempt_log[0].outcome, AttemptOutcome::Unavailable);
        assert!(!r.is_incomplete());
    }

    #[tokio::test]
    async fn attempts_run_out_into_exhausted() {
        let now = Instant::now();
        let mut t = SourceTask::new("shop", now + Duration::from_secs(10));
        t.start();
        let limited = SourceError::RateLimited { retry_after: None };
        assert!(t.fail(limited, Duration::ZERO, &policy(1), now).is_none());
        assert_eq!(t.state, TaskState::Exhausted);
        assert_eq!(t.transitions.last().copied(), Some(TaskState::Exhausted));
    }

    #[tokio::test]
    async fn retry_past_deadline_is_not_scheduled() {
        let now = Instant::now();
        let mut t = SourceTask::new("shop", now + Duration::from_millis(50));
        t.start();
        assert!(t
            .fail(SourceError::unavailable("x"), Duration::ZERO, &policy(5), now)
            .is_none());
        assert_eq!(t.state, TaskState::TimedOut);
        assert_eq!(
            t.transitions,
            vec![
                TaskState::Pending,
                TaskState::InFlight,
                TaskState::Failed,
                TaskState::TimedOut
            ]
        );
        assert!(t.report().is_incomplete());
        assert_eq!(t.last_error, Some(SourceError::unavailable("x")));
    }

    #[tokio::test]
    async fn last_attempt_failing_near_deadline_is_exhausted() {
        let now = Instant::now();
        let mut t = SourceTask::new("shop", now + Duration::from_millis(50));
        t.start();
        assert!(t
            .fail(SourceError::unavailable("x"), Duration::ZERO, &policy(1), now)
            .is_none());
        assert_eq!(t.state, TaskState::Exhausted);
    }

    #[tokio::test]
    async fn timeout_is_terminal() {
        let now = Instant::now();
        let mut t = SourceTask::new("shop", now + Duration::from_secs(10));
        t.start();
        assert!(t
            .fail(SourceError::Timeout, Duration::ZERO, &policy(5), now)
            .is_none());
        assert_eq!(t.state, TaskState::TimedOut);
        assert!(t.state.is_terminal());
    }

    #[tokio::test]
    async fn deadline_cancels_open_tasks_only() {
        let now = Instant::now();
        let mut open = SourceTask::new("a", now);
        open.start();
        open.cancel_at_deadline();
        assert_eq!(open.state, TaskState::TimedOut);
        assert_eq!(open.last_error, Some(SourceError::Timeout));

        let mut done = SourceTask::new("b", now);
        done.start();
        done.succeed(1, Duration::ZERO);
        done.cancel_at_deadline();
        assert_eq!(done.state, TaskState::Succeeded);
    }
}

// ── Poll supervisor ──
//
// Runs a driver's poll/subscribe function only while at least one consumer
// is attached. Failures back off exponentially; the loop is cancelled when
// the last consumer's token fires.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;

/// Error type returned by supervised poll functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

type PollFn = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

// ── Configuration ────────────────────────────────────────────────────

/// Exponential backoff between failed polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    /// Delay after the first failure. Default: 1s.
    pub initial_delay: Duration,

    /// Upper bound on backoff delay. Default: 30s.
    pub max_delay: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Wait between successful polls. Default: 10s.
    pub period: Duration,

    pub backoff: BackoffConfig,

    /// Consecutive failures logged at `warn` before throttling. Default: 3.
    pub verbose_attempts: u32,

    /// After throttling starts, every Nth failure is still logged at `warn`.
    /// Default: 10.
    pub log_every: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(10),
            backoff: BackoffConfig::default(),
            verbose_attempts: 3,
            log_every: 10,
        }
    }
}

/// Observable supervisor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No consumers attached; the poll function is not running.
    Idle,
    /// The poll function is active, or waiting for its next tick.
    Running,
    /// Waiting before retrying after `attempt` consecutive failures.
    Backoff { attempt: u32 },
}

// ── PollSupervisor ───────────────────────────────────────────────────

/// Supervises one poll or subscribe function.
///
/// Cheap to clone; clones share consumers and the running loop. The poll
/// function is never invoked concurrently with itself.
#[derive(Clone)]
pub struct PollSupervisor {
    inner: Arc<SupervisorInner>,
}

struct SupervisorInner {
    name: String,
    config: PollConfig,
    poll: PollFn,
    shared: Mutex<Shared>,
    state_tx: watch::Sender<SupervisorState>,
    trigger: Notify,
    invocations: AtomicU64,
}

struct Shared {
    attached: usize,
    run: Option<Run>,
}

/// The current (or most recently cancelled) loop task.
struct Run {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollSupervisor {
    pub fn new<F, Fut>(name: impl Into<String>, config: PollConfig, poll: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let poll: PollFn = Arc::new(move |cancel| poll(cancel).boxed());
        let (state_tx, _) = watch::channel(SupervisorState::Idle);
        Self {
            inner: Arc::new(SupervisorInner {
                name: name.into(),
                config,
                poll,
                shared: Mutex::new(Shared {
                    attached: 0,
                    run: None,
                }),
                state_tx,
                trigger: Notify::new(),
                invocations: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register a consumer for as long as `ctx` is not cancelled.
    ///
    /// The first consumer starts the supervised loop in the background; this
    /// call never waits for a poll. Must be called within a Tokio runtime.
    pub fn attach(&self, ctx: CancellationToken) -> Result<(), CoreError> {
        if ctx.is_cancelled() {
            return Err(CoreError::Cancelled);
        }

        {
            let mut shared = self.inner.shared.lock();
            shared.attached += 1;
            if shared.attached == 1 {
                let previous = shared.run.take().map(|run| run.handle);
                let cancel = CancellationToken::new();
                let handle = tokio::spawn(run_loop(
                    Arc::clone(&self.inner),
                    cancel.clone(),
                    previous,
                ));
                shared.run = Some(Run { cancel, handle });
                debug!(supervisor = %self.inner.name, "first consumer attached, starting");
            }
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            ctx.cancelled().await;
            inner.detach();
        });
        Ok(())
    }

    /// Cut the current wait short and poll now. At most one trigger is
    /// remembered while a poll is in flight.
    pub fn trigger(&self) {
        self.inner.trigger.notify_one();
    }

    pub fn state(&self) -> watch::Receiver<SupervisorState> {
        self.inner.state_tx.subscribe()
    }

    /// State transitions as a stream, starting with the current state.
    pub fn state_stream(&self) -> WatchStream<SupervisorState> {
        WatchStream::new(self.state())
    }

    pub fn current_state(&self) -> SupervisorState {
        *self.inner.state_tx.borrow()
    }

    /// Number of consumers currently attached.
    pub fn attached(&self) -> usize {
        self.inner.shared.lock().attached
    }

    /// Total poll function invocations since construction.
    pub fn invocations(&self) -> u64 {
        self.inner.invocations.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PollSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollSupervisor")
            .field("name", &self.inner.name)
            .field("state", &self.current_state())
            .field("attached", &self.attached())
            .finish_non_exhaustive()
    }
}

impl SupervisorInner {
    fn detach(&self) {
        let mut shared = self.shared.lock();
        shared.attached = shared.attached.saturating_sub(1);
        if shared.attached == 0 {
            if let Some(run) = &shared.run {
                run.cancel.cancel();
            }
            debug!(supervisor = %self.name, "last consumer detached, stopping");
        }
    }

    fn set_state(&self, state: SupervisorState) {
        self.state_tx.send_replace(state);
    }

    fn log_failure(&self, attempt: u32, error: &BoxError) {
        let throttled = attempt > self.config.verbose_attempts
            && (self.config.log_every == 0 || attempt % self.config.log_every != 0);
        if throttled {
            debug!(supervisor = %self.name, attempt, error = %error, "poll failed");
        } else {
            warn!(supervisor = %self.name, attempt, error = %error, "poll failed");
        }
    }
}

// ── Supervised loop ──────────────────────────────────────────────────

async fn run_loop(
    inner: Arc<SupervisorInner>,
    cancel: CancellationToken,
    previous: Option<JoinHandle<()>>,
) {
    // A cancelled loop may still be unwinding its poll future.
    if let Some(previous) = previous {
        if let Err(error) = previous.await {
            debug!(supervisor = %inner.name, %error, "previous loop ended abnormally");
        }
    }

    // A trigger stored while idle is satisfied by the initial poll.
    let _ = inner.trigger.notified().now_or_never();

    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            break;
        }
        inner.set_state(SupervisorState::Running);
        inner.invocations.fetch_add(1, Ordering::Relaxed);

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = (inner.poll)(cancel.child_token()) => Some(result),
        };
        let Some(result) = outcome else { break };

        let delay = match result {
            Ok(()) => {
                if attempt > 0 {
                    info!(supervisor = %inner.name, failures = attempt, "poll recovered");
                }
                attempt = 0;
                inner.config.period
            }
            Err(error) => {
                attempt = attempt.saturating_add(1);
                inner.log_failure(attempt, &error);
                inner.set_state(SupervisorState::Backoff { attempt });
                calculate_backoff(attempt - 1, &inner.config.backoff)
            }
        };

        let woke = tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = inner.trigger.notified() => true,
            () = tokio::time::sleep(delay) => true,
        };
        if !woke {
            break;
        }
    }

    inner.set_state(SupervisorState::Idle);
    debug!(supervisor = %inner.name, "poll loop exiting");
}

/// Exponential delay for the given zero-based retry with a deterministic
/// +/-25% spread, capped at `max_delay`.
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
pub(crate) fn calculate_backoff(attempt: u32, config: &BackoffConfig) -> Duration {
    let exponent = attempt.min(30) as i32;
    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(exponent);

    let jitter_factor = 1.0 + 0.25 * (f64::from(attempt) * 7.3).sin();
    let with_jitter = (base * jitter_factor).clamp(0.0, config.max_delay.as_secs_f64());

    Duration::from_secs_f64(with_jitter)
}

// ── Tests ────────────────────────────────────────────────────────────

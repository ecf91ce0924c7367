//! Outbound publication queue.
//!
//! A single consumer drains the queue one task at a time. Between attempts
//! it honors the startup quiet period, the minimum inter-post interval, the
//! rate-limit cooldown window, and a failure-scaled extra delay, whichever
//! demands the longest wait. Retries are data (an attempt counter and a
//! next-eligible time computed from state), not control flow: the pure
//! [`required_delay`] function makes the scheduling decision testable on
//! its own.

use crate::publisher::{PublishError, Publisher};
use crate::settings::PublisherSettings;
use crate::types::{PublicationTask, QueueStatus};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub quiet_period: Duration,
    pub min_interval: Duration,
    pub rate_limit_cooldown: Duration,
    pub failure_delay_step: Duration,
    pub failure_delay_max: Duration,
    pub max_attempts: u32,
    pub rearm_delay: Duration,
    pub rearm_failure_delay: Duration,
    /// Longest single cooperative sleep. Pauses are sliced so an operator
    /// reset is picked up at the next wake-up instead of after a full
    /// cooldown window.
    pub pause_slice: Duration,
}

impl From<&PublisherSettings> for QueueConfig {
    fn from(s: &PublisherSettings) -> Self {
        Self {
            quiet_period: Duration::from_secs(s.quiet_period_seconds),
            min_interval: Duration::from_secs(s.min_interval_seconds),
            rate_limit_cooldown: Duration::from_secs(s.rate_limit_cooldown_seconds),
            failure_delay_step: Duration::from_secs(s.failure_delay_step_seconds),
            failure_delay_max: Duration::from_secs(s.failure_delay_max_seconds),
            max_attempts: s.max_attempts.max(1),
            rearm_delay: Duration::from_millis(s.rearm_delay_ms),
            rearm_failure_delay: Duration::from_millis(s.rearm_failure_delay_ms),
            pause_slice: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ConsumerState {
    last_publish: Option<Instant>,
    last_rate_limit: Option<Instant>,
    last_attempt: Option<Instant>,
    failure_count: u32,
}

/// How long the consumer must wait before the next attempt, given the
/// current state. Returns the maximum over all active constraints.
fn required_delay(
    cfg: &QueueConfig,
    started_at: Instant,
    state: ConsumerState,
    now: Instant,
) -> Duration {
    let mut wait = Duration::ZERO;

    let since_start = now.saturating_duration_since(started_at);
    if since_start < cfg.quiet_period {
        wait = wait.max(cfg.quiet_period - since_start);
    }

    if let Some(last) = state.last_publish {
        let since = now.saturating_duration_since(last);
        if since < cfg.min_interval {
            wait = wait.max(cfg.min_interval - since);
        }
    }

    if let Some(limited_at) = state.last_rate_limit {
        let since = now.saturating_duration_since(limited_at);
        if since < cfg.rate_limit_cooldown {
            wait = wait.max(cfg.rate_limit_cooldown - since);
        }
    }

    if state.failure_count > 0 {
        if let Some(last_attempt) = state.last_attempt {
            let extra = cfg
                .failure_delay_step
                .saturating_mul(state.failure_count)
                .min(cfg.failure_delay_max);
            let since = now.saturating_duration_since(last_attempt);
            if since < extra {
                wait = wait.max(extra - since);
            }
        }
    }

    wait
}

struct QueueInner {
    tasks: Mutex<VecDeque<PublicationTask>>,
    state: Mutex<ConsumerState>,
    enabled: AtomicBool,
    sending: AtomicBool,
    consumer_running: AtomicBool,
    started_at: Instant,
    last_publish_unix: AtomicI64,
    notify: Notify,
    publisher: Box<dyn Publisher>,
    cfg: QueueConfig,
}

pub struct PublicationQueue {
    inner: Arc<QueueInner>,
}

impl PublicationQueue {
    pub fn new(publisher: Box<dyn Publisher>, cfg: QueueConfig, enabled: bool) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                tasks: Mutex::new(VecDeque::new()),
                state: Mutex::new(ConsumerState::default()),
                enabled: AtomicBool::new(enabled),
                sending: AtomicBool::new(false),
                consumer_running: AtomicBool::new(false),
                started_at: Instant::now(),
                last_publish_unix: AtomicI64::new(0),
                notify: Notify::new(),
                publisher,
                cfg,
            }),
        }
    }

    pub fn enqueue(&self, text: String) {
        let mut tasks = self.inner.tasks.lock().expect("queue lock poisoned");
        tasks.push_back(PublicationTask::new(text));
        debug!(depth = tasks.len(), "publication task enqueued");
        drop(tasks);
        self.inner.notify.notify_one();
    }

    pub fn depth(&self) -> usize {
        self.inner.tasks.lock().expect("queue lock poisoned").len()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
        info!(
            enabled,
            "publication mode switched ({})",
            if enabled { "live" } else { "dry-run" }
        );
    }

    /// Clears the failure counter and the rate-limit cooldown so the next
    /// scheduled wake-up runs with a clean slate.
    pub fn reset_failure_state(&self) {
        let mut state = self.inner.state.lock().expect("state lock poisoned");
        state.failure_count = 0;
        state.last_rate_limit = None;
        info!("publication failure state reset");
    }

    pub fn status(&self) -> QueueStatus {
        let failure_count = self
            .inner
            .state
            .lock()
            .expect("state lock poisoned")
            .failure_count;
        let unix = self.inner.last_publish_unix.load(Ordering::SeqCst);
        QueueStatus {
            depth: self.depth(),
            last_publish_unix: (unix > 0).then_some(unix),
            failure_count,
            publication_enabled: self.is_enabled(),
        }
    }

    fn pop_front(&self) -> Option<PublicationTask> {
        self.inner
            .tasks
            .lock()
            .expect("queue lock poisoned")
            .pop_front()
    }

    fn requeue_front(&self, task: PublicationTask) {
        self.inner
            .tasks
            .lock()
            .expect("queue lock poisoned")
            .push_front(task);
    }

    /// Single consumer loop. At most one send is in flight process-wide;
    /// the `sending` flag guards it because producers keep appending while
    /// the consumer is paused by any of the delay constraints.
    pub async fn run_consumer(self: Arc<Self>) {
        if self.inner.consumer_running.swap(true, Ordering::SeqCst) {
            warn!("publication consumer already running, refusing second instance");
            return;
        }
        info!(
            publisher = self.inner.publisher.describe(),
            quiet_period_secs = self.inner.cfg.quiet_period.as_secs(),
            min_interval_secs = self.inner.cfg.min_interval.as_secs(),
            "publication consumer started"
        );

        loop {
            if self.depth() == 0 {
                self.inner.notify.notified().await;
                continue;
            }

            let wait = {
                let state = *self.inner.state.lock().expect("state lock poisoned");
                required_delay(&self.inner.cfg, self.inner.started_at, state, Instant::now())
            };
            if !wait.is_zero() {
                debug!(wait_ms = wait.as_millis() as u64, "consumer pausing");
                sleep(wait.min(self.inner.cfg.pause_slice)).await;
                // state may have changed while sleeping (reset, rate limit)
                continue;
            }

            let Some(task) = self.pop_front() else {
                continue;
            };
            self.attempt(task).await;

            let rearm = {
                let state = self.inner.state.lock().expect("state lock poisoned");
                if state.failure_count > 0 {
                    self.inner.cfg.rearm_failure_delay
                } else {
                    self.inner.cfg.rearm_delay
                }
            };
            sleep(rearm).await;
        }
    }

    async fn attempt(&self, mut task: PublicationTask) {
        self.inner.sending.store(true, Ordering::SeqCst);

        let live = self.is_enabled();
        let result = if live {
            self.inner.publisher.publish(&task.text).await
        } else {
            info!("dry-run, not sending: {}", task.text.replace('\n', " | "));
            Ok(())
        };

        let now = Instant::now();
        let mut state = self.inner.state.lock().expect("state lock poisoned");
        state.last_attempt = Some(now);

        match result {
            Ok(()) => {
                state.failure_count = 0;
                state.last_publish = Some(now);
                self.inner
                    .last_publish_unix
                    .store(chrono::Utc::now().timestamp(), Ordering::SeqCst);
                info!(
                    live,
                    queued_ms = task.enqueued_at.elapsed().as_millis() as u64,
                    "publication task completed"
                );
            }
            Err(e) if e.is_permanent() => {
                // the whole channel is broken; retrying cannot help
                error!("abandoning publication task after permanent failure: {}", e);
            }
            Err(e) => {
                state.failure_count += 1;
                if matches!(e, PublishError::RateLimited) {
                    state.last_rate_limit = Some(now);
                    warn!(
                        cooldown_secs = self.inner.cfg.rate_limit_cooldown.as_secs(),
                        "rate limit observed, cooldown armed"
                    );
                }
                task.attempts += 1;
                if task.attempts >= self.inner.cfg.max_attempts {
                    error!(
                        attempts = task.attempts,
                        "abandoning publication task after transient failures: {}", e
                    );
                } else {
                    warn!(
                        attempts = task.attempts,
                        failure_count = state.failure_count,
                        "transient publish failure, requeueing at front: {}",
                        e
                    );
                    drop(state);
                    self.requeue_front(task);
                    self.inner.sending.store(false, Ordering::SeqCst);
                    return;
                }
            }
        }

        drop(state);
        self.inner.sending.store(false, Ordering::SeqCst);
    }
}

//! Durable Reply Queue
//!
//! Redis-backed dispatcher with a single rate-limited worker.
//!
//! Architecture:
//! - `enqueue` schedules jobs into `{prefix}:delayed` (sorted set, score = due
//!   Unix millis) so a reply never races the source network's own
//!   read-after-write consistency.
//! - The worker promotes due jobs into `{prefix}:wait` (list) and claims them
//!   with BRPOP. A claimed job is gone from Redis: one attempt, then ack.
//! - `{prefix}:completed` / `{prefix}:failed` are plain counters.

use std::time::{Duration, Instant as StdInstant};

use async_trait::async_trait;
use fred::interfaces::{KeysInterface, ListInterface, LuaInterface, SortedSetsInterface};
use fred::prelude::*;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::dispatcher::ReplyDispatcher;
use super::processor::{ProcessOutcome, ReplyProcessor};
use super::types::{DispatchError, QueueMetrics, QueuedReply, ReplyJob};
use crate::config::ReplyQueueConfig;
use crate::ratelimit::{Admission, RateLimit, RateLimiterState};

/// BRPOP timeout in seconds; short so shutdown and delayed jobs are noticed quickly.
const POLL_TIMEOUT_SECS: f64 = 1.0;

/// Maximum delayed jobs promoted per poll.
const PROMOTE_BATCH: u32 = 50;

/// Maximum payload characters logged when an envelope cannot be decoded.
const PAYLOAD_PREVIEW_CHARS: usize = 500;

/// Atomically moves due jobs from the delayed set into the wait list.
const PROMOTE_DUE_LUA: &str = r"
local items = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
if #items > 0 then
    redis.call('ZREM', KEYS[1], unpack(items))
    redis.call('LPUSH', KEYS[2], unpack(items))
end
return #items
";

/// Redis keys of one reply queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyQueueKeys {
    pub wait: String,
    pub delayed: String,
    pub completed: String,
    pub failed: String,
}

impl ReplyQueueKeys {
    #[must_use]
    pub fn new(prefix: &str) -> Self {
        Self {
            wait: format!("{prefix}:wait"),
            delayed: format!("{prefix}:delayed"),
            completed: format!("{prefix}:completed"),
            failed: format!("{prefix}:failed"),
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Schedules an envelope to become claimable at `due_millis`.
async fn schedule(
    redis: &Client,
    keys: &ReplyQueueKeys,
    envelope: &QueuedReply,
    due_millis: i64,
) -> Result<(), DispatchError> {
    let payload = serde_json::to_string(envelope)?;
    redis
        .zadd::<(), _, _>(
            keys.delayed.as_str(),
            None,
            None,
            false,
            false,
            (due_millis as f64, payload),
        )
        .await?;
    Ok(())
}

/// Admission state of one queue: throughput ceiling plus 429 cool-down.
///
/// Consulted before every claim, so a cool-down holds back every job in the
/// queue, not only the one that was refused.
#[derive(Debug)]
struct ClaimGate {
    limit: RateLimit,
    cool_down: Duration,
    state: RateLimiterState,
}

impl ClaimGate {
    fn new(config: &ReplyQueueConfig) -> Self {
        Self {
            limit: config.rate_limit,
            cool_down: config.cool_down,
            state: RateLimiterState::new(),
        }
    }

    /// How long to wait before the next claim; `None` when one may run now.
    fn wait_before_claim(&self, now: StdInstant) -> Option<Duration> {
        match self.state.peek(&self.limit, now) {
            Admission::Admit => None,
            Admission::Deny { retry_after } => Some(retry_after),
        }
    }

    /// Counts a claimed job against the throughput ceiling.
    fn record_claim(&mut self, now: StdInstant) {
        self.state.try_admit(&self.limit, now);
    }

    /// Pauses claims after a 429 and returns the pause. A publisher
    /// `retry_after` longer than the configured cool-down wins.
    fn record_rate_limited(&mut self, retry_after: Option<Duration>, now: StdInstant) -> Duration {
        let cool_down = self.cool_down.max(retry_after.unwrap_or_default());
        self.state.throttle(cool_down, now);
        cool_down
    }
}

/// Redis-backed reply dispatcher.
#[derive(Clone)]
pub struct DurableDispatcher {
    redis: Client,
    keys: ReplyQueueKeys,
    config: ReplyQueueConfig,
    processor: ReplyProcessor,
}

/// Running worker; stop it to finish the current job and exit.
pub struct WorkerHandle {
    shutdown: CancellationToken,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Signals the worker and waits for it to exit.
    pub async fn stop(self) {
        self.shutdown.cancel();
        if let Err(e) = self.join.await {
            error!("Reply worker task failed: {}", e);
        }
    }
}

impl DurableDispatcher {
    #[must_use]
    pub fn new(redis: Client, config: ReplyQueueConfig, processor: ReplyProcessor) -> Self {
        let keys = ReplyQueueKeys::new(&config.key_prefix);
        Self {
            redis,
            keys,
            config,
            processor,
        }
    }

    #[must_use]
    pub const fn keys(&self) -> &ReplyQueueKeys {
        &self.keys
    }

    /// Spawns the background worker.
    pub fn start(&self) -> WorkerHandle {
        let shutdown = CancellationToken::new();
        let worker = ReplyWorker {
            redis: self.redis.clone(),
            keys: self.keys.clone(),
            config: self.config.clone(),
            processor: self.processor.clone(),
            gate: ClaimGate::new(&self.config),
            shutdown: shutdown.clone(),
        };
        let join = tokio::spawn(worker.run());
        WorkerHandle { shutdown, join }
    }

    async fn counter(&self, key: &str) -> Option<u64> {
        match self.redis.get::<Option<u64>, _>(key).await {
            Ok(v) => Some(v.unwrap_or(0)),
            Err(e) => {
                warn!(key, error = %e, "Failed to read queue counter");
                None
            }
        }
    }
}

#[async_trait]
impl ReplyDispatcher for DurableDispatcher {
    #[instrument(skip(self, job), fields(reply_id = %job.id))]
    async fn enqueue(&self, job: ReplyJob) -> Result<(), DispatchError> {
        let envelope = QueuedReply::new(job);
        let due = now_millis() + self.config.initial_delay.as_millis() as i64;
        schedule(&self.redis, &self.keys, &envelope, due).await
    }

    async fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            completed: self.counter(&self.keys.completed).await,
            failed: self.counter(&self.keys.failed).await,
            waiting: self.redis.llen::<u64, _>(self.keys.wait.as_str()).await.ok(),
            delayed: self.redis.zcard::<u64, _>(self.keys.delayed.as_str()).await.ok(),
        }
    }

    fn is_durable(&self) -> bool {
        true
    }
}

/// The worker loop. Owns the queue's claim gate exclusively.
struct ReplyWorker {
    redis: Client,
    keys: ReplyQueueKeys,
    config: ReplyQueueConfig,
    processor: ReplyProcessor,
    gate: ClaimGate,
    shutdown: CancellationToken,
}

impl ReplyWorker {
    async fn run(mut self) {
        info!(queue = %self.keys.wait, "Reply worker started");

        // Consecutive Redis errors, for exponential backoff
        let mut consecutive_errors: u32 = 0;

        while !self.shutdown.is_cancelled() {
            // Cool-down and throughput ceiling gate the next claim
            if let Some(wait) = self.gate.wait_before_claim(Instant::now().into_std()) {
                self.sleep(wait).await;
                continue;
            }

            self.promote_due().await;

            let result: Result<Option<(String, String)>, Error> =
                self.redis.brpop(self.keys.wait.as_str(), POLL_TIMEOUT_SECS).await;

            let payload = match result {
                Ok(Some((_key, value))) => {
                    consecutive_errors = 0;
                    value
                }
                Ok(None) => {
                    consecutive_errors = 0;
                    continue;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    let backoff_secs = 1u64 << consecutive_errors.min(6); // 2, 4, 8, ... 64
                    if backoff_secs > 30 {
                        error!(
                            consecutive_errors,
                            backoff_secs,
                            "Persistent Redis failure in reply worker, backing off: {}",
                            e
                        );
                    } else {
                        error!("Failed to BRPOP from reply queue: {}", e);
                    }
                    self.sleep(Duration::from_secs(backoff_secs)).await;
                    continue;
                }
            };

            let envelope: QueuedReply = match serde_json::from_str(&payload) {
                Ok(envelope) => envelope,
                Err(e) => {
                    let truncated: String = payload.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
                    error!(
                        error = %e,
                        payload_preview = %truncated,
                        "Failed to deserialize reply job"
                    );
                    self.incr(&self.keys.failed).await;
                    continue;
                }
            };

            self.gate.record_claim(Instant::now().into_std());
            self.handle(envelope).await;
        }

        info!(queue = %self.keys.wait, "Reply worker stopped");
    }

    /// Sleeps for `duration` unless shutdown is requested first.
    async fn sleep(&self, duration: Duration) {
        tokio::select! {
            () = self.shutdown.cancelled() => {}
            () = tokio::time::sleep(duration) => {}
        }
    }

    async fn promote_due(&self) {
        let result: Result<i64, Error> = self
            .redis
            .eval(
                PROMOTE_DUE_LUA,
                vec![self.keys.delayed.as_str(), self.keys.wait.as_str()],
                vec![now_millis().to_string(), PROMOTE_BATCH.to_string()],
            )
            .await;
        if let Err(e) = result {
            error!("Failed to promote delayed replies (Lua): {}", e);
        }
    }

    async fn incr(&self, key: &str) {
        if let Err(e) = self.redis.incr::<i64, _>(key).await {
            warn!(key, error = %e, "Failed to update queue counter");
        }
    }

    /// Runs the single attempt for a claimed job.
    #[instrument(skip(self, envelope), fields(reply_id = %envelope.job.id))]
    async fn handle(&mut self, mut envelope: QueuedReply) {
        if !envelope.begin_attempt() {
            warn!(
                attempts_made = envelope.attempts_made,
                "Reply job has no attempts left, dropping"
            );
            self.incr(&self.keys.failed).await;
            return;
        }

        // Panic-catching wrapper: a panicking publisher must not kill the worker
        let processor = self.processor.clone();
        let job = envelope.job.clone();
        let outcome = match tokio::spawn(async move { processor.process(&job).await }).await {
            Ok(outcome) => outcome,
            Err(e) => ProcessOutcome::Failed {
                error: format!("reply task panicked: {e}"),
            },
        };

        match outcome {
            ProcessOutcome::Published { hash } => {
                info!(hash = %hash, reply_to = %envelope.job.reply_to, "Reply published");
                self.incr(&self.keys.completed).await;
            }
            ProcessOutcome::RateLimited { retry_after } => {
                self.on_rate_limited(envelope, retry_after).await;
            }
            ProcessOutcome::Failed { error } => {
                error!(error = %error, "Error processing reply");
                self.incr(&self.keys.failed).await;
            }
        }
    }

    /// Cools the worker down and puts the job back without spending its attempt.
    async fn on_rate_limited(&mut self, mut envelope: QueuedReply, retry_after: Option<Duration>) {
        let cool_down = self
            .gate
            .record_rate_limited(retry_after, Instant::now().into_std());

        if envelope.rate_limited_requeues >= self.config.max_rate_limited_requeues {
            warn!(
                requeues = envelope.rate_limited_requeues,
                "Reply still rate limited after all requeues, giving up"
            );
            self.incr(&self.keys.failed).await;
            return;
        }

        envelope.refund_rate_limited_attempt();
        info!(
            cool_down_ms = cool_down.as_millis() as u64,
            requeues = envelope.rate_limited_requeues,
            "Rate limited, trying later"
        );

        let due = now_millis() + cool_down.as_millis() as i64;
        if let Err(e) = schedule(&self.redis, &self.keys, &envelope, due).await {
            error!(error = %e, "Failed to requeue rate-limited reply, dropping");
            self.incr(&self.keys.failed).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_share_prefix() {
        let keys = ReplyQueueKeys::new("mentionbot:replies");
        assert_eq!(keys.wait, "mentionbot:replies:wait");
        assert_eq!(keys.delayed, "mentionbot:replies:delayed");
        assert_eq!(keys.completed, "mentionbot:replies:completed");
        assert_eq!(keys.failed, "mentionbot:replies:failed");
    }

    fn gate() -> ClaimGate {
        ClaimGate::new(&ReplyQueueConfig {
            rate_limit: RateLimit::new(2, Duration::from_millis(1000)),
            cool_down: Duration::from_millis(300),
            ..ReplyQueueConfig::default()
        })
    }

    #[test]
    fn gate_enforces_throughput_ceiling() {
        let mut gate = gate();
        let t0 = StdInstant::now();

        assert_eq!(gate.wait_before_claim(t0), None);
        gate.record_claim(t0);
        assert_eq!(gate.wait_before_claim(t0), None);
        gate.record_claim(t0);

        assert_eq!(
            gate.wait_before_claim(t0 + Duration::from_millis(100)),
            Some(Duration::from_millis(900))
        );
        assert_eq!(gate.wait_before_claim(t0 + Duration::from_millis(1000)), None);
    }

    #[test]
    fn gate_cool_down_holds_every_later_claim() {
        let mut gate = gate();
        let t0 = StdInstant::now();

        // First job claimed and refused with a 429
        gate.record_claim(t0);
        let t429 = t0 + Duration::from_millis(10);
        assert_eq!(gate.record_rate_limited(None, t429), Duration::from_millis(300));

        // The throughput budget still has room, but the next job must wait
        assert_eq!(gate.wait_before_claim(t429), Some(Duration::from_millis(300)));
        assert_eq!(
            gate.wait_before_claim(t429 + Duration::from_millis(200)),
            Some(Duration::from_millis(100))
        );
        assert_eq!(gate.wait_before_claim(t429 + Duration::from_millis(300)), None);
    }

    #[test]
    fn gate_honours_longer_retry_after() {
        let mut gate = gate();
        let t0 = StdInstant::now();

        let pause = gate.record_rate_limited(Some(Duration::from_secs(2)), t0);
        assert_eq!(pause, Duration::from_secs(2));

        // A later, shorter signal does not cut the pause short
        let t1 = t0 + Duration::from_millis(100);
        assert_eq!(gate.record_rate_limited(None, t1), Duration::from_millis(300));
        assert_eq!(gate.wait_before_claim(t1), Some(Duration::from_millis(1900)));
    }
}

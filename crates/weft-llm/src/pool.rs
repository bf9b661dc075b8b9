use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tracing::{info, warn};

use weft_core::config::ModelConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::LlmClient;
use weft_core::types::*;

/// Consecutive failures before a candidate is marked unhealthy.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 3;
/// How long an unhealthy candidate is skipped before it is retried.
pub const HEALTH_CHECK_COOLDOWN: Duration = Duration::from_secs(5 * 60);
/// Successes needed for an unhealthy candidate to count as healthy again.
pub const MIN_SUCCESSES_TO_RECOVER: u32 = 2;

/// One model the pool can route to.
pub struct ModelCandidate {
    pub config: ModelConfig,
    pub client: Arc<dyn LlmClient>,
}

impl ModelCandidate {
    pub fn new(config: ModelConfig, client: Arc<dyn LlmClient>) -> Self {
        Self { config, client }
    }
}

#[derive(Debug, Clone)]
struct Health {
    healthy: bool,
    consecutive_failures: u32,
    recovery_successes: u32,
    total_failures: u64,
    total_successes: u64,
    last_failure: Option<Instant>,
    last_success: Option<Instant>,
}

impl Default for Health {
    fn default() -> Self {
        Self {
            healthy: true,
            consecutive_failures: 0,
            recovery_successes: 0,
            total_failures: 0,
            total_successes: 0,
            last_failure: None,
            last_success: None,
        }
    }
}

impl Health {
    fn available(&self, now: Instant) -> bool {
        self.healthy
            || self
                .last_failure
                .map_or(true, |at| now.saturating_duration_since(at) >= HEALTH_CHECK_COOLDOWN)
    }
}

#[derive(Debug)]
struct PoolState {
    health: Vec<Health>,
    cursor: usize,
}

/// Snapshot of pool health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub healthy: usize,
    pub models: Vec<(String, bool)>,
}

/// Model pool with per-candidate health and cooldown tracking.
///
/// Candidates are ordered by preference. Failover rotates round-robin over
/// the fallbacks; when every candidate is unhealthy and still cooling down,
/// the first one is used.
pub struct ModelPool {
    candidates: Vec<ModelCandidate>,
    state: Mutex<PoolState>,
}

impl ModelPool {
    pub fn new(candidates: Vec<ModelCandidate>) -> Self {
        let health = vec![Health::default(); candidates.len()];
        Self {
            candidates,
            state: Mutex::new(PoolState { health, cursor: 0 }),
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn candidate(&self, index: usize) -> Option<&ModelCandidate> {
        self.candidates.get(index)
    }

    /// Attempt order for one request.
    ///
    /// The preferred candidate goes first while it is available, so the
    /// caller's model config is honoured. Fallbacks follow in round-robin
    /// order, skipping any still cooling down. When nothing is available the
    /// preferred candidate is tried anyway.
    pub fn attempt_order(&self) -> Vec<usize> {
        self.attempt_order_at(Instant::now())
    }

    fn attempt_order_at(&self, now: Instant) -> Vec<usize> {
        let n = self.candidates.len();
        if n == 0 {
            return vec![];
        }
        let mut state = self.lock();
        let mut order = Vec::with_capacity(n);
        if state.health[0].available(now) {
            order.push(0);
        }

        let fallbacks = n - 1;
        if fallbacks > 0 {
            let rotated: Vec<usize> = (0..fallbacks)
                .map(|offset| 1 + (state.cursor + offset) % fallbacks)
                .filter(|&idx| state.health[idx].available(now))
                .collect();
            if let Some(&first) = rotated.first() {
                state.cursor = first % fallbacks;
            }
            order.extend(rotated);
        }

        if order.is_empty() {
            warn!("All pooled models unhealthy, falling back to preferred model");
            order.push(0);
        }
        order
    }

    pub fn record_success(&self, index: usize) {
        self.record_success_at(index, Instant::now());
    }

    fn record_success_at(&self, index: usize, now: Instant) {
        let mut state = self.lock();
        let Some(h) = state.health.get_mut(index) else { return };
        h.total_successes += 1;
        h.consecutive_failures = 0;
        h.last_success = Some(now);
        if !h.healthy {
            h.recovery_successes += 1;
            if h.recovery_successes >= MIN_SUCCESSES_TO_RECOVER {
                h.healthy = true;
                h.recovery_successes = 0;
                info!(model = %self.candidates[index].config.model_id, "Pooled model recovered");
            }
        }
    }

    pub fn record_failure(&self, index: usize) {
        self.record_failure_at(index, Instant::now());
    }

    fn record_failure_at(&self, index: usize, now: Instant) {
        let mut state = self.lock();
        let Some(h) = state.health.get_mut(index) else { return };
        h.total_failures += 1;
        h.consecutive_failures += 1;
        h.recovery_successes = 0;
        h.last_failure = Some(now);
        if h.healthy && h.consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
            h.healthy = false;
            warn!(
                model = %self.candidates[index].config.model_id,
                failures = h.consecutive_failures,
                "Pooled model marked unhealthy"
            );
        }
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            total: self.candidates.len(),
            healthy: state.health.iter().filter(|h| h.healthy).count(),
            models: self
                .candidates
                .iter()
                .zip(state.health.iter())
                .map(|(c, h)| (c.config.model_id.clone(), h.healthy))
                .collect(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        // Health bookkeeping stays usable even if a holder panicked.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// LLM client that routes each request through a [`ModelPool`], failing over within the call.
///
/// The preferred candidate runs with the caller's model config, so per-block
/// and checker model choices apply. Fallbacks use their own configured models.
pub struct PooledClient {
    pool: Arc<ModelPool>,
}

impl PooledClient {
    pub fn new(pool: Arc<ModelPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ModelPool> {
        &self.pool
    }
}

impl LlmClient for PooledClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        format: ResponseFormat,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let mut last_err = None;
            for idx in self.pool.attempt_order() {
                let Some(candidate) = self.pool.candidate(idx) else { continue };
                let effective = if idx == 0 { &config } else { &candidate.config };
                match candidate
                    .client
                    .chat_stream(effective, messages.clone(), &tools, format)
                    .await
                {
                    Ok(stream) => {
                        self.pool.record_success(idx);
                        return Ok(stream);
                    }
                    Err(e) => {
                        warn!(model = %effective.model_id, error = %e, "Pooled model request failed");
                        self.pool.record_failure(idx);
                        last_err = Some(e);
                    }
                }
            }
            Err(last_err.unwrap_or_else(|| WeftError::LlmRequest("No models available in pool".into())))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_test_utils::{model_config, ScriptedLlm};

    fn pool_of(n: usize) -> ModelPool {
        ModelPool::new(
            (0..n)
                .map(|i| ModelCandidate::new(model_config(&format!("m{}", i)), Arc::new(ScriptedLlm::new())))
                .collect(),
        )
    }

    #[test]
    fn healthy_pool_tries_preferred_first_and_rotates_fallbacks() {
        let pool = pool_of(3);
        let now = Instant::now();
        assert_eq!(pool.attempt_order_at(now), vec![0, 1, 2]);
        assert_eq!(pool.attempt_order_at(now), vec![0, 2, 1]);
        assert_eq!(pool.attempt_order_at(now), vec![0, 1, 2]);
    }

    #[test]
    fn unhealthy_after_consecutive_failures_and_skipped() {
        let pool = pool_of(3);
        let now = Instant::now();
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            pool.record_failure_at(1, now);
        }
        assert_eq!(pool.stats().healthy, 2);
        assert_eq!(pool.attempt_order_at(now), vec![0, 2]);
        assert_eq!(pool.attempt_order_at(now), vec![0, 2]);
    }

    #[test]
    fn unhealthy_preferred_moves_fallbacks_first() {
        let pool = pool_of(3);
        let now = Instant::now();
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            pool.record_failure_at(0, now);
        }
        assert_eq!(pool.attempt_order_at(now), vec![1, 2]);
        assert_eq!(pool.attempt_order_at(now), vec![2, 1]);
    }

    #[test]
    fn cooldown_elapsed_makes_candidate_eligible() {
        let pool = pool_of(2);
        let now = Instant::now();
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            pool.record_failure_at(1, now);
        }
        assert_eq!(pool.attempt_order_at(now), vec![0]);
        let later = now + HEALTH_CHECK_COOLDOWN + Duration::from_secs(1);
        assert_eq!(pool.attempt_order_at(later), vec![0, 1]);
    }

    #[test]
    fn recovery_needs_two_successes() {
        let pool = pool_of(1);
        let now = Instant::now();
        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            pool.record_failure_at(0, now);
        }
        pool.record_success_at(0, now);
        assert_eq!(pool.stats().healthy, 0);
        pool.record_success_at(0, now);
        assert_eq!(pool.stats().healthy, 1);
    }

    #[test]
    fn all_unhealthy_falls_back_to_first() {
        let pool = pool_of(2);
        let now = Instant::now();
        for idx in 0..2 {
            for _ in 0..MAX_CONSECUTIVE_FAILURES {
                pool.record_failure_at(idx, now);
            }
        }
        assert_eq!(pool.attempt_order_at(now), vec![0]);
        assert!(ModelPool::new(vec![]).attempt_order().is_empty());
    }

    #[tokio::test]
    async fn healthy_pool_keeps_the_requested_model() {
        let primary = ScriptedLlm::new().then_text("one").then_text("two");
        let fallback = ScriptedLlm::new().then_text("unused");
        let pool = Arc::new(ModelPool::new(vec![
            ModelCandidate::new(model_config("gpt-4o"), Arc::new(primary.clone())),
            ModelCandidate::new(model_config("gpt-4o-big-fallback"), Arc::new(fallback.clone())),
        ]));
        let client = PooledClient::new(pool);

        for expected in ["one", "two"] {
            let stream = client
                .chat_stream(
                    &model_config("checker-mini"),
                    vec![ChatMessage::user("verify")],
                    &[],
                    ResponseFormat::Json,
                )
                .await
                .unwrap();
            let turn = crate::collect_turn(stream).await.unwrap();
            assert_eq!(turn.text, expected);
        }

        let models: Vec<_> = primary.requests().into_iter().map(|r| r.model_id).collect();
        assert_eq!(models, vec!["checker-mini", "checker-mini"]);
        assert_eq!(fallback.call_count(), 0);
    }

    #[tokio::test]
    async fn pooled_client_fails_over_within_one_call() {
        let broken = ScriptedLlm::new().then_error(WeftError::LlmRequest("HTTP 401".into()));
        let healthy = ScriptedLlm::new().then_text("from fallback");
        let pool = Arc::new(ModelPool::new(vec![
            ModelCandidate::new(model_config("primary"), Arc::new(broken.clone())),
            ModelCandidate::new(model_config("fallback"), Arc::new(healthy.clone())),
        ]));
        let client = PooledClient::new(pool.clone());

        let stream = client
            .chat_stream(&model_config("primary"), vec![ChatMessage::user("hi")], &[], ResponseFormat::Text)
            .await
            .unwrap();
        let turn = crate::collect_turn(stream).await.unwrap();
        assert_eq!(turn.text, "from fallback");
        assert_eq!(broken.call_count(), 1);
        assert_eq!(healthy.requests()[0].model_id, "fallback");
    }
}

//! Model fallback routing with per-model cooldown.
//!
//! The router owns the only mutable fallback state in the system: per model,
//! a consecutive-failure count and a cooldown deadline. Candidate order is
//! primary first, then the configured fallbacks; models currently cooling
//! are moved behind every available one, and are only attempted at all when
//! no model is available (a run must not deadlock just because everything
//! recently failed). Repeated failures back off exponentially: 15s, 30s,
//! 60s, ... capped at five minutes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::llm::client::{ClientFactory, CompletionRequest, CompletionResponse};

const COOLDOWN_BASE_SECS: u64 = 15;
const COOLDOWN_CAP_SECS: u64 = 300;

#[derive(Debug, Default)]
struct ModelHealth {
    failures: u32,
    cooldown_until: Option<Instant>,
}

/// Routes completion calls across the primary model and its fallbacks.
pub struct FallbackRouter {
    primary: String,
    fallbacks: Vec<String>,
    factory: Arc<dyn ClientFactory>,
    health: Mutex<HashMap<String, ModelHealth>>,
}

impl FallbackRouter {
    pub fn new(
        primary: impl Into<String>,
        fallbacks: impl IntoIterator<Item = String>,
        factory: Arc<dyn ClientFactory>,
    ) -> Self {
        let primary = primary.into();
        let mut seen = vec![primary.clone()];
        let mut normalized = Vec::new();
        for raw in fallbacks {
            let model = raw.trim().to_string();
            if model.is_empty() || seen.contains(&model) {
                continue;
            }
            seen.push(model.clone());
            normalized.push(model);
        }
        Self {
            primary,
            fallbacks: normalized,
            factory,
            health: Mutex::new(HashMap::new()),
        }
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn fallbacks(&self) -> &[String] {
        &self.fallbacks
    }

    /// Candidate models in attempt order: available ones first (primary
    /// before fallbacks); when everything is cooling, the cooled list is
    /// returned instead so one attempt still happens.
    pub fn candidates(&self) -> Vec<String> {
        let now = Instant::now();
        let health = self.health.lock();
        let mut available = Vec::new();
        let mut cooling = Vec::new();
        for model in std::iter::once(&self.primary).chain(self.fallbacks.iter()) {
            let cooled = health
                .get(model)
                .and_then(|h| h.cooldown_until)
                .is_some_and(|until| until > now);
            if cooled {
                cooling.push(model.clone());
            } else {
                available.push(model.clone());
            }
        }
        if available.is_empty() { cooling } else { available }
    }

    /// Remaining cooldown for a model, when one is active.
    pub fn cooldown_remaining(&self, model: &str) -> Option<Duration> {
        let health = self.health.lock();
        let until = health.get(model)?.cooldown_until?;
        until.checked_duration_since(Instant::now())
    }

    /// Record a model failure and start (or extend) its cooldown.
    pub fn mark_failure(&self, model: &str) {
        let mut health = self.health.lock();
        let entry = health.entry(model.to_string()).or_default();
        entry.failures += 1;
        let cooldown_secs =
            (COOLDOWN_BASE_SECS << (entry.failures - 1).min(32)).min(COOLDOWN_CAP_SECS);
        entry.cooldown_until = Some(Instant::now() + Duration::from_secs(cooldown_secs));
        debug!(model, failures = entry.failures, cooldown_secs, "Model entered cooldown");
    }

    /// Clear a model's failure history.
    pub fn mark_success(&self, model: &str) {
        self.health.lock().remove(model);
    }

    /// Call the first candidate that answers. Returns the response and the
    /// model that produced it. Fatal (non-retryable) failures stop the walk;
    /// retryable ones continue to the next profile, then the next model.
    pub async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<(CompletionResponse, String), CoreError> {
        let candidates = self.candidates();
        let mut last_error: Option<String> = None;

        for model in &candidates {
            let clients = self.factory.clients_for(model);
            if clients.is_empty() {
                warn!(model = %model, "No client configured for model, skipping");
                continue;
            }
            let profiles = clients.len();
            for (profile_idx, client) in clients.into_iter().enumerate() {
                match client.complete(request.clone()).await {
                    Ok(response) => {
                        self.mark_success(model);
                        if *model != self.primary {
                            warn!(
                                primary = %self.primary,
                                selected = %model,
                                "Model fallback selected"
                            );
                        }
                        return Ok((response, model.clone()));
                    }
                    Err(e) => {
                        self.mark_failure(model);
                        last_error = Some(e.to_string());
                        if !e.is_retryable() && profile_idx + 1 >= profiles {
                            warn!(model = %model, error = %e, "Fatal model error, not falling back");
                            return Err(CoreError::Llm(e.to_string()));
                        }
                        warn!(
                            model = %model,
                            profile = profile_idx,
                            error = %e,
                            "Model call failed, trying next candidate"
                        );
                    }
                }
            }
        }

        Err(CoreError::ModelExhausted(
            last_error.unwrap_or_else(|| "no clients configured".to_string()),
        ))
    }
}

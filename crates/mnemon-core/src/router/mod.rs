//! Retrieval router ("dancer")
//!
//! Picks a strategy per query and gates each route behind an independent
//! circuit breaker: at most 5 failures inside a rolling 60 s window; the 6th
//! opens the route for a 5-minute cooldown, after which a single probe call
//! runs half-open. `direct_retrieval` is the ungated fallback.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterConfig {
    /// Failures tolerated inside the rolling window before opening
    pub circuit_failures: u32,
    /// Rolling failure window in seconds
    pub circuit_window_secs: u64,
    /// Cooldown before a half-open probe, in seconds
    pub circuit_cooldown_secs: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            circuit_failures: 5,
            circuit_window_secs: 60,
            circuit_cooldown_secs: 300,
        }
    }
}

impl RouterConfig {
    fn window(&self) -> Duration {
        Duration::from_secs(self.circuit_window_secs)
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_cooldown_secs)
    }
}

// ============================================================================
// STRATEGIES
// ============================================================================

/// Retrieval strategies the router can pick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Vector search re-ranked by learned pattern weights
    PatternMatch,
    /// Vector search expanded along outgoing causal paths
    CausalForward,
    /// Vector search expanded along incoming causal paths
    CausalBackward,
    /// Causal expansion restricted to temporal relations
    TemporalCausal,
    /// Vector search plus learning-adjusted ranking
    #[default]
    Hybrid,
    /// Plain vector search, the ungated fallback
    DirectRetrieval,
    /// Shadow search for contradictions
    Adversarial,
}

impl RetrievalStrategy {
    /// Every routable strategy
    pub const ALL: [RetrievalStrategy; 7] = [
        RetrievalStrategy::PatternMatch,
        RetrievalStrategy::CausalForward,
        RetrievalStrategy::CausalBackward,
        RetrievalStrategy::TemporalCausal,
        RetrievalStrategy::Hybrid,
        RetrievalStrategy::DirectRetrieval,
        RetrievalStrategy::Adversarial,
    ];

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::PatternMatch => "pattern_match",
            RetrievalStrategy::CausalForward => "causal_forward",
            RetrievalStrategy::CausalBackward => "causal_backward",
            RetrievalStrategy::TemporalCausal => "temporal_causal",
            RetrievalStrategy::Hybrid => "hybrid",
            RetrievalStrategy::DirectRetrieval => "direct_retrieval",
            RetrievalStrategy::Adversarial => "adversarial",
        }
    }

    /// Parse from string name, defaulting to `Hybrid`
    pub fn parse_name(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pattern_match" => RetrievalStrategy::PatternMatch,
            "causal_forward" => RetrievalStrategy::CausalForward,
            "causal_backward" => RetrievalStrategy::CausalBackward,
            "temporal_causal" => RetrievalStrategy::TemporalCausal,
            "hybrid" => RetrievalStrategy::Hybrid,
            "direct_retrieval" => RetrievalStrategy::DirectRetrieval,
            "adversarial" => RetrievalStrategy::Adversarial,
            _ => RetrievalStrategy::Hybrid,
        }
    }
}

impl std::fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
}

/// Per-route failure gate
///
/// State machine: closed -> (6th failure in window) open -> (cooldown)
/// half-open probe -> closed on success, open again on failure. Driven by a
/// monotonic clock.
pub struct CircuitBreaker {
    config: RouterConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(config: RouterConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
            }),
        }
    }

    /// True when a call may proceed on this route right now
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    fn allow_at(&self, now: Instant) -> bool {
        let Ok(mut inner) = self.inner.lock() else {
            return true;
        };
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::HalfOpen => false,
            BreakerState::Open => {
                let cooled = inner
                    .opened_at
                    .map(|t| now.duration_since(t) >= self.config.cooldown())
                    .unwrap_or(true);
                if cooled {
                    // One probe call slips through half-open
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Closed;
            inner.opened_at = None;
        }
        inner.failures.clear();
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    fn record_failure_at(&self, now: Instant) {
        let Ok(mut inner) = self.inner.lock() else {
            return;
        };
        match inner.state {
            BreakerState::HalfOpen => {
                // Probe failed: straight back to open
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.failures.clear();
            }
            BreakerState::Open => {}
            BreakerState::Closed => {
                let window = self.config.window();
                inner.failures.push_back(now);
                while let Some(first) = inner.failures.front() {
                    if now.duration_since(*first) > window {
                        inner.failures.pop_front();
                    } else {
                        break;
                    }
                }
                if inner.failures.len() as u32 > self.config.circuit_failures {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    inner.failures.clear();
                }
            }
        }
    }

    /// True while the route is refusing calls
    pub fn is_open(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.state == BreakerState::Open)
            .unwrap_or(false)
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Per-query strategy selection with breaker gating
pub struct Router {
    config: RouterConfig,
    breakers: HashMap<RetrievalStrategy, CircuitBreaker>,
}

impl Router {
    /// Create a router with every breaker closed
    pub fn new(config: RouterConfig) -> Self {
        let breakers = RetrievalStrategy::ALL
            .iter()
            .map(|s| (*s, CircuitBreaker::new(config.clone())))
            .collect();
        Self { config, breakers }
    }

    /// Router configuration
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Cue-phrase preference for a query
    ///
    /// The heuristic only picks the preferred route; breaker state decides
    /// what actually runs.
    pub fn preferred(&self, query: &str, adversarial: bool, has_tag_filters: bool) -> RetrievalStrategy {
        if adversarial {
            return RetrievalStrategy::Adversarial;
        }
        let lowered = query.to_lowercase();
        let has = |cues: &[&str]| cues.iter().any(|c| lowered.contains(c));

        if has(&["why ", "why?", "because", "cause of", "caused", "reason"]) {
            RetrievalStrategy::CausalBackward
        } else if has(&["effect", "result of", "consequence", "leads to", "what happens"]) {
            RetrievalStrategy::CausalForward
        } else if has(&["before", "after", "timeline", "sequence of", "precede"]) {
            RetrievalStrategy::TemporalCausal
        } else if has_tag_filters {
            RetrievalStrategy::PatternMatch
        } else {
            RetrievalStrategy::Hybrid
        }
    }

    /// Select the strategy for a query, honouring breakers
    ///
    /// Falls from the preferred route through `hybrid` to the ungated
    /// `direct_retrieval`.
    pub fn select(&self, query: &str, adversarial: bool, has_tag_filters: bool) -> RetrievalStrategy {
        let preferred = self.preferred(query, adversarial, has_tag_filters);
        for candidate in [preferred, RetrievalStrategy::Hybrid] {
            if candidate == RetrievalStrategy::DirectRetrieval {
                break;
            }
            if self
                .breakers
                .get(&candidate)
                .map(|b| b.allow())
                .unwrap_or(true)
            {
                return candidate;
            }
        }
        RetrievalStrategy::DirectRetrieval
    }

    /// Report a route success to its breaker
    pub fn record_success(&self, strategy: RetrievalStrategy) {
        if let Some(breaker) = self.breakers.get(&strategy) {
            breaker.record_success();
        }
    }

    /// Report a route failure to its breaker
    pub fn record_failure(&self, strategy: RetrievalStrategy) {
        if let Some(breaker) = self.breakers.get(&strategy) {
            breaker.record_failure();
        }
    }

    /// The breaker guarding a route
    pub fn breaker(&self, strategy: RetrievalStrategy) -> Option<&CircuitBreaker> {
        self.breakers.get(&strategy)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(RouterConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================

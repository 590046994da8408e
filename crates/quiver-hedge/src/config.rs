//! Hedging policy.

use http::Method;
use rand::Rng;
use std::time::Duration;

/// What happens when a hedge boundary is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HedgeMode {
    /// Leave earlier attempts running and race everything; first success
    /// wins and losers are pruned.
    #[default]
    Race,
    /// Cancel the running attempt before starting the next; at most one
    /// attempt is active at a time.
    CancelAndRetry,
}

/// Per-call hedging policy.
///
/// Hedge `i` (1-based) is scheduled `delay × multiplierⁱ⁻¹` after the
/// previous launch, spread by `± jitter` as a fraction. With `servers`
/// configured, the client substitutes the host of hedge `i` with
/// `servers[(i - 1) % len]`, spreading racers across replicas.
#[derive(Debug, Clone)]
pub struct HedgePolicy {
    pub(crate) enabled: bool,
    pub(crate) mode: HedgeMode,
    pub(crate) delay: Duration,
    pub(crate) max_hedges: usize,
    pub(crate) multiplier: f64,
    pub(crate) jitter: f64,
    pub(crate) include_methods: Vec<Method>,
    pub(crate) servers: Vec<String>,
}

impl HedgePolicy {
    /// Starts a builder.
    pub fn builder() -> HedgePolicyBuilder {
        HedgePolicyBuilder::new()
    }

    /// A policy that explicitly disables hedging, overriding any
    /// client-level policy for the call it is attached to.
    pub fn disabled() -> Self {
        let mut policy = HedgePolicyBuilder::new().build();
        policy.enabled = false;
        policy
    }

    /// Whether hedging applies to a request with this method.
    pub fn should_hedge(&self, method: &Method) -> bool {
        self.enabled && self.max_hedges > 0 && self.include_methods.contains(method)
    }

    /// The hedging mode.
    pub fn mode(&self) -> HedgeMode {
        self.mode
    }

    /// Maximum redundant attempts beyond the primary.
    pub fn max_hedges(&self) -> usize {
        self.max_hedges
    }

    /// Replacement host for racer `index`, when servers are configured.
    /// The primary (index 0) always uses the original host.
    pub fn server_for(&self, index: usize) -> Option<&str> {
        if index == 0 || self.servers.is_empty() {
            return None;
        }
        Some(self.servers[(index - 1) % self.servers.len()].as_str())
    }

    /// Jittered delay before hedge `hedge_index` (1-based).
    pub fn delay_for(&self, hedge_index: usize) -> Duration {
        let exponent = hedge_index.saturating_sub(1) as i32;
        let base = self.delay.as_secs_f64() * self.multiplier.powi(exponent);
        let spread = if self.jitter > 0.0 {
            1.0 + rand::rng().random_range(-self.jitter..=self.jitter)
        } else {
            1.0
        };
        Duration::from_secs_f64((base * spread).max(0.0))
    }
}

/// Builder for [`HedgePolicy`].
///
/// Defaults: race mode, 1 s delay, 1 hedge, multiplier 1.0, no jitter,
/// GET/HEAD/OPTIONS eligible, no server rotation.
pub struct HedgePolicyBuilder {
    policy: HedgePolicy,
}

impl HedgePolicyBuilder {
    /// Creates a builder with defaults.
    pub fn new() -> Self {
        Self {
            policy: HedgePolicy {
                enabled: true,
                mode: HedgeMode::Race,
                delay: Duration::from_secs(1),
                max_hedges: 1,
                multiplier: 1.0,
                jitter: 0.0,
                include_methods: vec![Method::GET, Method::HEAD, Method::OPTIONS],
                servers: Vec::new(),
            },
        }
    }

    /// Sets the hedging mode.
    pub fn mode(mut self, mode: HedgeMode) -> Self {
        self.policy.mode = mode;
        self
    }

    /// Sets the delay before the first hedge.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.policy.delay = delay;
        self
    }

    /// Sets the maximum number of hedges beyond the primary. Zero disables
    /// hedging for the call.
    pub fn max_hedges(mut self, max_hedges: usize) -> Self {
        self.policy.max_hedges = max_hedges;
        self
    }

    /// Scales successive hedge delays geometrically.
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier.max(0.0);
        self
    }

    /// Spreads each delay by `± jitter` as a fraction of itself.
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.policy.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Replaces the method whitelist.
    pub fn include_methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.policy.include_methods = methods.into_iter().collect();
        self
    }

    /// Rotates hedge attempts across replacement hosts.
    pub fn servers(mut self, servers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.policy.servers = servers.into_iter().map(Into::into).collect();
        self
    }

    /// Builds the policy.
    pub fn build(self) -> HedgePolicy {
        self.policy
    }
}

impl Default for HedgePolicyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Configuration for the token-bucket rate limiter.

use quiver_core::{Request, StatsListeners};
use std::fmt;
use std::sync::Arc;

/// How requests map onto buckets.
#[derive(Clone)]
pub enum RateLimitScope {
    /// One bucket for everything.
    Global,
    /// One bucket per URL host.
    Domain,
    /// One bucket per method + path (query stripped).
    Endpoint,
    /// Caller-supplied key function.
    Custom(Arc<dyn Fn(&Request) -> String + Send + Sync>),
}

impl RateLimitScope {
    /// Derives the bucket key for a request.
    pub fn key(&self, req: &Request) -> String {
        match self {
            RateLimitScope::Global => "global".to_string(),
            RateLimitScope::Domain => req.host().to_string(),
            RateLimitScope::Endpoint => req.endpoint(),
            RateLimitScope::Custom(f) => f(req),
        }
    }
}

impl fmt::Debug for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateLimitScope::Global => write!(f, "Global"),
            RateLimitScope::Domain => write!(f, "Domain"),
            RateLimitScope::Endpoint => write!(f, "Endpoint"),
            RateLimitScope::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Invalid rate-limiter configuration.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum RateLimitConfigError {
    /// The refill rate must be positive.
    #[error("refill rate must be positive, got {0}")]
    NonPositiveRate(f64),
    /// The burst capacity must admit at least one request.
    #[error("burst capacity must be at least 1, got {0}")]
    BurstTooSmall(f64),
    /// An include/exclude pattern failed to parse.
    #[error("invalid endpoint pattern {pattern:?}: {message}")]
    InvalidPattern {
        /// The offending pattern.
        pattern: String,
        /// Parser diagnostic.
        message: String,
    },
}

/// Parameters of a limiter instance.
pub struct RateLimitConfig {
    pub(crate) name: String,
    pub(crate) rate_per_ms: f64,
    pub(crate) capacity: f64,
    pub(crate) scope: RateLimitScope,
    pub(crate) include: Vec<glob::Pattern>,
    pub(crate) exclude: Vec<glob::Pattern>,
    pub(crate) listeners: StatsListeners,
}

impl RateLimitConfig {
    /// Starts a builder.
    pub fn builder() -> RateLimitConfigBuilder {
        RateLimitConfigBuilder::new()
    }

    /// Shares an additional set of stats listeners with this instance.
    pub fn merge_listeners(&mut self, listeners: &StatsListeners) {
        self.listeners.extend_from(listeners);
    }
}

impl fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("name", &self.name)
            .field("rate_per_ms", &self.rate_per_ms)
            .field("capacity", &self.capacity)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RateLimitConfig`].
///
/// Defaults: 10 requests/second, burst of 10, global scope, no filters.
pub struct RateLimitConfigBuilder {
    name: String,
    rate_per_sec: f64,
    capacity: f64,
    scope: RateLimitScope,
    include: Vec<String>,
    exclude: Vec<String>,
    listeners: StatsListeners,
}

impl RateLimitConfigBuilder {
    /// Creates a builder with defaults.
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            rate_per_sec: 10.0,
            capacity: 10.0,
            scope: RateLimitScope::Global,
            include: Vec::new(),
            exclude: Vec::new(),
            listeners: StatsListeners::new(),
        }
    }

    /// Sets the instance name used in events and tracing.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the refill rate in tokens per second.
    pub fn rate_per_sec(mut self, rate: f64) -> Self {
        self.rate_per_sec = rate;
        self
    }

    /// Sets the burst capacity.
    pub fn burst(mut self, capacity: f64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the bucket scope.
    pub fn scope(mut self, scope: RateLimitScope) -> Self {
        self.scope = scope;
        self
    }

    /// Sets a custom key function.
    pub fn scope_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.scope = RateLimitScope::Custom(Arc::new(f));
        self
    }

    /// Limits participation to endpoint keys matching `pattern`.
    ///
    /// Patterns are globs over the endpoint key (`"GET /v1/items"`). When any
    /// include pattern is present, only matching requests are subject to the
    /// limiter.
    pub fn include(mut self, pattern: impl Into<String>) -> Self {
        self.include.push(pattern.into());
        self
    }

    /// Exempts endpoint keys matching `pattern` from the limiter.
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.exclude.push(pattern.into());
        self
    }

    /// Registers a stats listener for limiter events.
    pub fn listeners(mut self, listeners: StatsListeners) -> Self {
        self.listeners = listeners;
        self
    }

    /// Validates and builds the configuration.
    pub fn build(self) -> Result<RateLimitConfig, RateLimitConfigError> {
        if self.rate_per_sec <= 0.0 || !self.rate_per_sec.is_finite() {
            return Err(RateLimitConfigError::NonPositiveRate(self.rate_per_sec));
        }
        if self.capacity < 1.0 || !self.capacity.is_finite() {
            return Err(RateLimitConfigError::BurstTooSmall(self.capacity));
        }
        let compile = |patterns: Vec<String>| -> Result<Vec<glob::Pattern>, RateLimitConfigError> {
            patterns
                .into_iter()
                .map(|pattern| {
                    glob::Pattern::new(&pattern).map_err(|err| {
                        RateLimitConfigError::InvalidPattern {
                            pattern,
                            message: err.to_string(),
                        }
                    })
                })
                .collect()
        };
        Ok(RateLimitConfig {
            name: self.name,
            rate_per_ms: self.rate_per_sec / 1000.0,
            capacity: self.capacity,
            scope: self.scope,
            include: compile(self.include)?,
            exclude: compile(self.exclude)?,
            listeners: self.listeners,
        })
    }
}

impl Default for RateLimitConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

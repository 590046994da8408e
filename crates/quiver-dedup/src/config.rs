//! Configuration for the deduplicator.

use http::Method;
use quiver_core::{Request, StatsListeners};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How the dedup key is derived from a request.
#[derive(Clone, Default)]
pub enum DedupKeyStrategy {
    /// Effective URL only.
    #[default]
    Url,
    /// Method + URL.
    UrlMethod,
    /// Method + URL + a hash of the encoded body.
    UrlMethodBody,
    /// Caller-supplied key function.
    Custom(Arc<dyn Fn(&Request) -> String + Send + Sync>),
}

impl DedupKeyStrategy {
    /// Derives the key for a request.
    pub fn key(&self, req: &Request) -> String {
        match self {
            DedupKeyStrategy::Url => req.url.to_string(),
            DedupKeyStrategy::UrlMethod => format!("{} {}", req.method, req.url),
            DedupKeyStrategy::UrlMethodBody => {
                format!("{} {} #{:016x}", req.method, req.url, req.body.fingerprint())
            }
            DedupKeyStrategy::Custom(f) => f(req),
        }
    }
}

impl fmt::Debug for DedupKeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupKeyStrategy::Url => write!(f, "Url"),
            DedupKeyStrategy::UrlMethod => write!(f, "UrlMethod"),
            DedupKeyStrategy::UrlMethodBody => write!(f, "UrlMethodBody"),
            DedupKeyStrategy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Parameters of a deduplicator instance.
#[derive(Clone)]
pub struct DedupConfig {
    pub(crate) name: String,
    pub(crate) strategy: DedupKeyStrategy,
    pub(crate) methods: Vec<Method>,
    /// Lifetime of cached leader results. Zero disables the cache; in-flight
    /// coalescing still applies.
    pub(crate) cache_ttl: Duration,
    pub(crate) cache_capacity: usize,
    pub(crate) listeners: StatsListeners,
}

impl DedupConfig {
    /// Starts a builder.
    pub fn builder() -> DedupConfigBuilder {
        DedupConfigBuilder::new()
    }

    /// Whether the request's method is eligible for deduplication.
    pub fn eligible(&self, req: &Request) -> bool {
        self.methods.contains(&req.method)
    }

    /// Shares an additional set of stats listeners with this instance.
    pub fn merge_listeners(&mut self, listeners: &StatsListeners) {
        self.listeners.extend_from(listeners);
    }
}

impl fmt::Debug for DedupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedupConfig")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .field("methods", &self.methods)
            .field("cache_ttl", &self.cache_ttl)
            .field("cache_capacity", &self.cache_capacity)
            .finish_non_exhaustive()
    }
}

/// Builder for [`DedupConfig`].
///
/// Defaults: `Url` key strategy, GET and HEAD eligible, cache disabled,
/// capacity 128.
pub struct DedupConfigBuilder {
    name: String,
    strategy: DedupKeyStrategy,
    methods: Vec<Method>,
    cache_ttl: Duration,
    cache_capacity: usize,
    listeners: StatsListeners,
}

impl DedupConfigBuilder {
    /// Creates a builder with defaults.
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            strategy: DedupKeyStrategy::Url,
            methods: vec![Method::GET, Method::HEAD],
            cache_ttl: Duration::ZERO,
            cache_capacity: 128,
            listeners: StatsListeners::new(),
        }
    }

    /// Sets the instance name used in events and tracing.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the key strategy.
    pub fn key_strategy(mut self, strategy: DedupKeyStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets a custom key function.
    pub fn key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.strategy = DedupKeyStrategy::Custom(Arc::new(f));
        self
    }

    /// Replaces the eligible-method whitelist.
    pub fn methods(mut self, methods: impl IntoIterator<Item = Method>) -> Self {
        self.methods = methods.into_iter().collect();
        self
    }

    /// Enables the TTL cache. Completed leader results are served to
    /// arrivals within `ttl` without another transport call.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Bounds the TTL cache size; least-recently-used entries are evicted.
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Registers a stats listener for dedup events.
    pub fn listeners(mut self, listeners: StatsListeners) -> Self {
        self.listeners = listeners;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> DedupConfig {
        DedupConfig {
            name: self.name,
            strategy: self.strategy,
            methods: self.methods,
            cache_ttl: self.cache_ttl,
            cache_capacity: self.cache_capacity.max(1),
            listeners: self.listeners,
        }
    }
}

impl Default for DedupConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Configuration for the debouncer.

use quiver_core::{Request, StatsListeners};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// How the debounce key is derived from a request.
#[derive(Clone, Default)]
pub enum DebounceKeyStrategy {
    /// Effective URL only.
    #[default]
    Url,
    /// Method + URL.
    MethodUrl,
    /// Method + URL + a hash of the encoded body.
    MethodUrlBody,
    /// Caller-supplied key function.
    Custom(Arc<dyn Fn(&Request) -> String + Send + Sync>),
}

impl DebounceKeyStrategy {
    /// Derives the key for a request.
    pub fn key(&self, req: &Request) -> String {
        match self {
            DebounceKeyStrategy::Url => req.url.to_string(),
            DebounceKeyStrategy::MethodUrl => format!("{} {}", req.method, req.url),
            DebounceKeyStrategy::MethodUrlBody => {
                format!("{} {} #{:016x}", req.method, req.url, req.body.fingerprint())
            }
            DebounceKeyStrategy::Custom(f) => f(req),
        }
    }
}

impl fmt::Debug for DebounceKeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebounceKeyStrategy::Url => write!(f, "Url"),
            DebounceKeyStrategy::MethodUrl => write!(f, "MethodUrl"),
            DebounceKeyStrategy::MethodUrlBody => write!(f, "MethodUrlBody"),
            DebounceKeyStrategy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Parameters of a debouncer instance.
#[derive(Clone)]
pub struct DebounceConfig {
    pub(crate) name: String,
    pub(crate) delay: Duration,
    pub(crate) strategy: DebounceKeyStrategy,
    pub(crate) listeners: StatsListeners,
}

impl DebounceConfig {
    /// Starts a builder.
    pub fn builder() -> DebounceConfigBuilder {
        DebounceConfigBuilder::new()
    }

    /// The configured default window.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Shares an additional set of stats listeners with this instance.
    pub fn merge_listeners(&mut self, listeners: &StatsListeners) {
        self.listeners.extend_from(listeners);
    }
}

impl fmt::Debug for DebounceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebounceConfig")
            .field("name", &self.name)
            .field("delay", &self.delay)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Builder for [`DebounceConfig`].
///
/// Defaults: 300 ms window, `Url` key strategy.
pub struct DebounceConfigBuilder {
    name: String,
    delay: Duration,
    strategy: DebounceKeyStrategy,
    listeners: StatsListeners,
}

impl DebounceConfigBuilder {
    /// Creates a builder with defaults.
    pub fn new() -> Self {
        Self {
            name: "<unnamed>".to_string(),
            delay: Duration::from_millis(300),
            strategy: DebounceKeyStrategy::Url,
            listeners: StatsListeners::new(),
        }
    }

    /// Sets the instance name used in events and tracing.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the debounce window.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Sets the key strategy.
    pub fn key_strategy(mut self, strategy: DebounceKeyStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets a custom key function.
    pub fn key_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.strategy = DebounceKeyStrategy::Custom(Arc::new(f));
        self
    }

    /// Registers a stats listener for debounce events.
    pub fn listeners(mut self, listeners: StatsListeners) -> Self {
        self.listeners = listeners;
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> DebounceConfig {
        DebounceConfig {
            name: self.name,
            delay: self.delay,
            strategy: self.strategy,
            listeners: self.listeners,
        }
    }
}

impl Default for DebounceConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Per-call options, client defaults, and the configuration resolver.
//!
//! Resolution is three-layered: per-call options win over client defaults,
//! which win over built-ins. Scalars merge shallowly, header maps and query
//! pairs merge deeply, and policy objects (retry, hedging, dedup, debounce,
//! rate-limit participation) are taken from the winning layer *whole*: a
//! call that supplies a retry policy opts into exactly that policy, not a
//! field-wise blend.

use http::header::CONTENT_TYPE;
use http::{HeaderMap, Method};
use quiver_core::{Body, CancelToken, Error, Request, ResponseType};
use quiver_hedge::HedgePolicy;
use quiver_retry::RetryPolicy;
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Per-call timeout selection.
#[derive(Debug, Clone, Copy, Default)]
pub enum TimeoutSetting {
    /// Use the client default.
    #[default]
    Inherit,
    /// No timeout, regardless of the client default.
    Disabled,
    /// A specific per-attempt timeout. Zero means no timeout.
    After(Duration),
}

impl From<Duration> for TimeoutSetting {
    fn from(timeout: Duration) -> Self {
        if timeout.is_zero() {
            TimeoutSetting::Disabled
        } else {
            TimeoutSetting::After(timeout)
        }
    }
}

/// Per-call retry selection, normalized to a [`RetryPolicy`] at resolve time.
#[derive(Clone)]
pub enum RetrySetting {
    /// Exactly one attempt.
    Disabled,
    /// Up to `n` retries with the default backoff.
    Max(u32),
    /// A full policy.
    Policy(RetryPolicy),
}

impl RetrySetting {
    pub(crate) fn into_policy(self) -> RetryPolicy {
        match self {
            RetrySetting::Disabled => RetryPolicy::disabled(),
            RetrySetting::Max(0) => RetryPolicy::disabled(),
            RetrySetting::Max(retries) => RetryPolicy::attempts(retries),
            RetrySetting::Policy(policy) => policy,
        }
    }
}

impl From<u32> for RetrySetting {
    fn from(retries: u32) -> Self {
        RetrySetting::Max(retries)
    }
}

impl From<bool> for RetrySetting {
    fn from(enabled: bool) -> Self {
        if enabled {
            RetrySetting::Max(3)
        } else {
            RetrySetting::Disabled
        }
    }
}

impl From<RetryPolicy> for RetrySetting {
    fn from(policy: RetryPolicy) -> Self {
        RetrySetting::Policy(policy)
    }
}

/// Per-call debounce selection.
#[derive(Debug, Clone, Copy)]
pub enum DebounceSetting {
    /// Skip the debouncer for this call.
    Disabled,
    /// Debounce with this window instead of the client default.
    Delay(Duration),
}

/// Per-call rate-limit participation.
#[derive(Debug, Clone, Copy)]
pub enum RateLimitSetting {
    /// Skip the limiter for this call.
    Disabled,
    /// Subject to the client's limiter (the default when one is configured).
    Enabled,
}

/// Per-call dedup participation.
#[derive(Debug, Clone, Copy)]
pub enum DedupSetting {
    /// Skip the deduplicator for this call.
    Disabled,
    /// Subject to the client's deduplicator (the default when configured).
    Enabled,
}

/// Options for a single call.
///
/// Everything is optional; an empty value inherits the client configuration.
#[derive(Default)]
pub struct RequestOptions {
    /// Headers merged over the client defaults (per-key override).
    pub headers: HeaderMap,
    /// Query pairs appended to the URL.
    pub query: Vec<(String, String)>,
    /// Request payload.
    pub body: Option<Body>,
    /// Per-attempt timeout.
    pub timeout: TimeoutSetting,
    /// Response decoding hint.
    pub response_type: Option<ResponseType>,
    /// Retry selection; replaces the client policy whole.
    pub retry: Option<RetrySetting>,
    /// Hedging policy; replaces the client policy whole. Use
    /// [`HedgePolicy::disabled`] to suppress a client-level policy.
    pub hedging: Option<HedgePolicy>,
    /// Dedup participation.
    pub dedup: Option<DedupSetting>,
    /// Debounce participation and window.
    pub debounce: Option<DebounceSetting>,
    /// Rate-limit participation.
    pub rate_limit: Option<RateLimitSetting>,
    /// Return non-2xx responses as successes instead of `Http` errors.
    pub ignore_response_error: Option<bool>,
    /// Tags appended to the client's defaults, for stats grouping.
    pub tags: Vec<String>,
    /// External cancellation for this call.
    pub signal: Option<CancelToken>,
    /// Initial plugin meta values.
    pub meta: HashMap<String, serde_json::Value>,
}

impl RequestOptions {
    /// Options that inherit everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<http::header::HeaderName>,
        V: TryInto<http::header::HeaderValue>,
    {
        if let (Ok(name), Ok(value)) = (name.try_into(), value.try_into()) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Appends a query pair.
    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the per-attempt timeout. Zero disables the timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.into();
        self
    }

    /// Sets the retry selection.
    pub fn retry(mut self, retry: impl Into<RetrySetting>) -> Self {
        self.retry = Some(retry.into());
        self
    }

    /// Sets the hedging policy.
    pub fn hedging(mut self, hedging: HedgePolicy) -> Self {
        self.hedging = Some(hedging);
        self
    }

    /// Opts this call out of deduplication.
    pub fn no_dedup(mut self) -> Self {
        self.dedup = Some(DedupSetting::Disabled);
        self
    }

    /// Opts this call out of debouncing.
    pub fn no_debounce(mut self) -> Self {
        self.debounce = Some(DebounceSetting::Disabled);
        self
    }

    /// Overrides the debounce window for this call.
    pub fn debounce_delay(mut self, delay: Duration) -> Self {
        self.debounce = Some(DebounceSetting::Delay(delay));
        self
    }

    /// Opts this call out of rate limiting.
    pub fn no_rate_limit(mut self) -> Self {
        self.rate_limit = Some(RateLimitSetting::Disabled);
        self
    }

    /// Sets the response decoding hint.
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = Some(response_type);
        self
    }

    /// Returns non-2xx responses as successes.
    pub fn ignore_response_error(mut self, ignore: bool) -> Self {
        self.ignore_response_error = Some(ignore);
        self
    }

    /// Adds a stats tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Attaches external cancellation.
    pub fn signal(mut self, signal: CancelToken) -> Self {
        self.signal = Some(signal);
        self
    }
}

/// Client-level defaults the resolver merges under per-call options.
#[derive(Clone)]
pub(crate) struct ClientDefaults {
    pub base_url: Option<Url>,
    pub headers: HeaderMap,
    /// `None` means no timeout by default.
    pub timeout: Option<Duration>,
    pub response_type: ResponseType,
    pub retry: RetryPolicy,
    pub hedging: Option<HedgePolicy>,
    pub ignore_response_error: bool,
    pub tags: Vec<String>,
}

impl Default for ClientDefaults {
    fn default() -> Self {
        Self {
            base_url: None,
            headers: HeaderMap::new(),
            timeout: Some(Duration::from_secs(30)),
            response_type: ResponseType::Auto,
            retry: RetryPolicy::disabled(),
            hedging: None,
            ignore_response_error: false,
            tags: Vec::new(),
        }
    }
}

/// The fully-resolved shape of one call.
#[derive(Debug)]
pub(crate) struct ResolvedCall {
    pub req: Request,
    pub retry: RetryPolicy,
    pub hedging: Option<HedgePolicy>,
    pub use_dedup: bool,
    /// Resolved debounce window; `None` skips the debouncer.
    pub debounce: Option<Duration>,
    pub use_rate_limit: bool,
    pub ignore_response_error: bool,
    pub signal: Option<CancelToken>,
    pub meta: HashMap<String, serde_json::Value>,
}

/// Produces the effective call from the three configuration layers.
///
/// `debounce_default` is the window of the client's debouncer, when one is
/// configured; it anchors the inherit case for the per-call setting.
pub(crate) fn resolve(
    defaults: &ClientDefaults,
    debounce_default: Option<Duration>,
    method: Method,
    target: &str,
    options: RequestOptions,
) -> Result<ResolvedCall, Error> {
    let url = resolve_url(defaults.base_url.as_ref(), target)?;
    let mut req = Request::new(method, url);

    // Headers: defaults first, per-call overrides per key.
    req.headers = defaults.headers.clone();
    for (name, value) in options.headers.iter() {
        req.headers.insert(name.clone(), value.clone());
    }

    for (name, value) in &options.query {
        req.url.query_pairs_mut().append_pair(name, value);
    }

    if let Some(body) = options.body {
        if let Some(content_type) = body.content_type() {
            if !req.headers.contains_key(CONTENT_TYPE) {
                if let Ok(value) = content_type.parse() {
                    req.headers.insert(CONTENT_TYPE, value);
                }
            }
        }
        req.body = body;
    }

    req.timeout = match options.timeout {
        TimeoutSetting::Inherit => defaults.timeout,
        TimeoutSetting::Disabled => None,
        TimeoutSetting::After(timeout) if timeout.is_zero() => None,
        TimeoutSetting::After(timeout) => Some(timeout),
    };

    req.response_type = options.response_type.unwrap_or(defaults.response_type);

    req.tags = defaults.tags.clone();
    req.tags.extend(options.tags);

    Ok(ResolvedCall {
        req,
        retry: match options.retry {
            Some(setting) => setting.into_policy(),
            None => defaults.retry.clone(),
        },
        hedging: match options.hedging {
            Some(policy) => Some(policy),
            None => defaults.hedging.clone(),
        },
        use_dedup: !matches!(options.dedup, Some(DedupSetting::Disabled)),
        debounce: match options.debounce {
            Some(DebounceSetting::Disabled) => None,
            Some(DebounceSetting::Delay(delay)) => Some(delay),
            None => debounce_default,
        },
        use_rate_limit: !matches!(options.rate_limit, Some(RateLimitSetting::Disabled)),
        ignore_response_error: options
            .ignore_response_error
            .unwrap_or(defaults.ignore_response_error),
        signal: options.signal,
        meta: options.meta,
    })
}

fn resolve_url(base: Option<&Url>, target: &str) -> Result<Url, Error> {
    let result = match base {
        Some(base) => base.join(target),
        None => Url::parse(target),
    };
    result.map_err(|err| Error::parse(format!("invalid request URL {target:?}: {err}")))
}

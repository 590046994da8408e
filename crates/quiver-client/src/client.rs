//! The client facade and its builder.

use crate::config::{self, ClientDefaults, RequestOptions, RetrySetting};
use crate::extensions::Extensions;
use crate::pipeline::{self, ClientShared};
use crate::plugin::{Plugin, PluginChain};
use bytes::Bytes;
use http::Method;
use quiver_core::{
    Body, ClientEvent, Error, EventListener, MultipartForm, Response, ResponseData, ResponseType,
    StatsListeners, Transport,
};
use quiver_debounce::{DebounceConfig, Debouncer};
use quiver_dedup::{DedupConfig, Deduplicator};
use quiver_hedge::HedgePolicy;
use quiver_ratelimit::{RateLimitConfig, RateLimiter};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// A resilient HTTP client.
///
/// Cheap to clone; clones share the transport, the admission-control state
/// (rate-limit buckets, dedup tables, debounce windows), the plugin chain,
/// and the stats bus.
#[derive(Clone)]
pub struct Client {
    shared: Arc<ClientShared>,
}

impl Client {
    /// Starts a builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Issues a request through the full pipeline.
    pub async fn request(
        &self,
        method: Method,
        target: impl AsRef<str>,
        options: RequestOptions,
    ) -> Result<Response, Error> {
        let debounce_default = self
            .shared
            .debouncer
            .as_ref()
            .map(Debouncer::default_delay);
        let call = config::resolve(
            &self.shared.defaults,
            debounce_default,
            method,
            target.as_ref(),
            options,
        )?;
        pipeline::execute(Arc::clone(&self.shared), call).await
    }

    /// GET request.
    pub async fn get(
        &self,
        target: impl AsRef<str>,
        options: RequestOptions,
    ) -> Result<Response, Error> {
        self.request(Method::GET, target, options).await
    }

    /// POST request.
    pub async fn post(
        &self,
        target: impl AsRef<str>,
        options: RequestOptions,
    ) -> Result<Response, Error> {
        self.request(Method::POST, target, options).await
    }

    /// PUT request.
    pub async fn put(
        &self,
        target: impl AsRef<str>,
        options: RequestOptions,
    ) -> Result<Response, Error> {
        self.request(Method::PUT, target, options).await
    }

    /// PATCH request.
    pub async fn patch(
        &self,
        target: impl AsRef<str>,
        options: RequestOptions,
    ) -> Result<Response, Error> {
        self.request(Method::PATCH, target, options).await
    }

    /// DELETE request.
    pub async fn delete(
        &self,
        target: impl AsRef<str>,
        options: RequestOptions,
    ) -> Result<Response, Error> {
        self.request(Method::DELETE, target, options).await
    }

    /// HEAD request.
    pub async fn head(
        &self,
        target: impl AsRef<str>,
        options: RequestOptions,
    ) -> Result<Response, Error> {
        self.request(Method::HEAD, target, options).await
    }

    /// OPTIONS request.
    pub async fn options(
        &self,
        target: impl AsRef<str>,
        options: RequestOptions,
    ) -> Result<Response, Error> {
        self.request(Method::OPTIONS, target, options).await
    }

    /// GET and deserialize a JSON response.
    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        target: impl AsRef<str>,
    ) -> Result<T, Error> {
        let options = RequestOptions::new()
            .response_type(ResponseType::Json)
            .header(http::header::ACCEPT, "application/json");
        let response = self.get(target, options).await?;
        response.json()
    }

    /// GET a text response.
    pub async fn get_text(&self, target: impl AsRef<str>) -> Result<String, Error> {
        let response = self
            .get(target, RequestOptions::new().response_type(ResponseType::Text))
            .await?;
        text_from(response)
    }

    /// GET an XML document as text.
    pub async fn get_xml(&self, target: impl AsRef<str>) -> Result<String, Error> {
        let response = self
            .get(target, RequestOptions::new().response_type(ResponseType::Xml))
            .await?;
        text_from(response)
    }

    /// GET an HTML document as text.
    pub async fn get_html(&self, target: impl AsRef<str>) -> Result<String, Error> {
        let response = self
            .get(target, RequestOptions::new().response_type(ResponseType::Html))
            .await?;
        text_from(response)
    }

    /// GET raw bytes.
    pub async fn get_bytes(&self, target: impl AsRef<str>) -> Result<Bytes, Error> {
        let response = self
            .get(target, RequestOptions::new().response_type(ResponseType::Blob))
            .await?;
        match response.data {
            ResponseData::Bytes(bytes) => Ok(bytes),
            ResponseData::Empty => Ok(Bytes::new()),
            other => Err(Error::parse(format!(
                "expected a binary body, decoded {other:?}"
            ))),
        }
    }

    /// GET newline-delimited JSON.
    pub async fn get_ndjson(
        &self,
        target: impl AsRef<str>,
    ) -> Result<Vec<serde_json::Value>, Error> {
        let response = self
            .get(
                target,
                RequestOptions::new().response_type(ResponseType::NdJson),
            )
            .await?;
        match response.data {
            ResponseData::NdJson(rows) => Ok(rows),
            ResponseData::Empty => Ok(Vec::new()),
            other => Err(Error::parse(format!(
                "expected an NDJSON body, decoded {other:?}"
            ))),
        }
    }

    /// POST a JSON payload.
    pub async fn post_json<B: serde::Serialize>(
        &self,
        target: impl AsRef<str>,
        body: &B,
    ) -> Result<Response, Error> {
        let body = Body::json(body)
            .map_err(|err| Error::parse(format!("request body encoding failed: {err}")))?;
        self.post(target, RequestOptions::new().body(body)).await
    }

    /// POST a URL-encoded form.
    pub async fn post_form(
        &self,
        target: impl AsRef<str>,
        pairs: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Response, Error> {
        let pairs = pairs
            .into_iter()
            .map(|(name, value)| (name.into(), value.into()))
            .collect();
        self.post(target, RequestOptions::new().body(Body::Form(pairs)))
            .await
    }

    /// POST a multipart form.
    pub async fn post_multipart(
        &self,
        target: impl AsRef<str>,
        form: MultipartForm,
    ) -> Result<Response, Error> {
        self.post(target, RequestOptions::new().body(Body::Multipart(form)))
            .await
    }

    /// POST a SOAP envelope, expecting an XML reply.
    pub async fn post_soap(
        &self,
        target: impl AsRef<str>,
        envelope: impl Into<String>,
    ) -> Result<Response, Error> {
        let options = RequestOptions::new()
            .header(http::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(Body::Bytes(Bytes::from(envelope.into().into_bytes())))
            .response_type(ResponseType::Xml);
        self.post(target, options).await
    }

    /// Retrieves a plugin-registered capability by type.
    pub fn extension<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.shared.extensions.get::<T>()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.shared.defaults.base_url.as_ref().map(Url::as_str))
            .field("plugins", &!self.shared.plugins.is_empty())
            .field("rate_limit", &self.shared.limiter.is_some())
            .field("dedup", &self.shared.dedup.is_some())
            .field("debounce", &self.shared.debouncer.is_some())
            .finish()
    }
}

fn text_from(response: Response) -> Result<String, Error> {
    match response.data {
        ResponseData::Text(text) => Ok(text),
        ResponseData::Empty => Ok(String::new()),
        other => Err(Error::parse(format!(
            "expected a text body, decoded {other:?}"
        ))),
    }
}

/// Invalid client construction.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// No transport was provided.
    #[error("a transport is required; provide one with ClientBuilder::transport")]
    MissingTransport,
}

/// Builder for [`Client`].
pub struct ClientBuilder {
    transport: Option<Arc<dyn Transport>>,
    defaults: ClientDefaults,
    rate_limit: Option<RateLimitConfig>,
    dedup: Option<DedupConfig>,
    debounce: Option<DebounceConfig>,
    plugins: Vec<Arc<dyn Plugin>>,
    listeners: StatsListeners,
}

impl ClientBuilder {
    /// Creates a builder with built-in defaults: 30 s timeout, no retries,
    /// no hedging, no admission control.
    pub fn new() -> Self {
        Self {
            transport: None,
            defaults: ClientDefaults::default(),
            rate_limit: None,
            dedup: None,
            debounce: None,
            plugins: Vec::new(),
            listeners: StatsListeners::new(),
        }
    }

    /// Sets the transport.
    pub fn transport<T: Transport>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Sets the base URL relative targets resolve against.
    pub fn base_url(mut self, base_url: Url) -> Self {
        self.defaults.base_url = Some(base_url);
        self
    }

    /// Adds a default header sent with every request.
    pub fn header<K, V>(mut self, name: K, value: V) -> Self
    where
        K: TryInto<http::header::HeaderName>,
        V: TryInto<http::header::HeaderValue>,
    {
        if let (Ok(name), Ok(value)) = (name.try_into(), value.try_into()) {
            self.defaults.headers.insert(name, value);
        }
        self
    }

    /// Sets the default per-attempt timeout. Zero disables timeouts.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.defaults.timeout = if timeout.is_zero() { None } else { Some(timeout) };
        self
    }

    /// Disables the default timeout.
    pub fn no_timeout(mut self) -> Self {
        self.defaults.timeout = None;
        self
    }

    /// Sets the default response decoding hint.
    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.defaults.response_type = response_type;
        self
    }

    /// Sets the default retry behavior.
    pub fn retry(mut self, retry: impl Into<RetrySetting>) -> Self {
        self.defaults.retry = retry.into().into_policy();
        self
    }

    /// Sets the default hedging policy.
    pub fn hedging(mut self, hedging: HedgePolicy) -> Self {
        self.defaults.hedging = Some(hedging);
        self
    }

    /// Returns non-2xx responses as successes by default.
    pub fn ignore_response_error(mut self, ignore: bool) -> Self {
        self.defaults.ignore_response_error = ignore;
        self
    }

    /// Adds a default stats tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.defaults.tags.push(tag.into());
        self
    }

    /// Enables rate limiting.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }

    /// Enables request deduplication.
    pub fn dedup(mut self, config: DedupConfig) -> Self {
        self.dedup = Some(config);
        self
    }

    /// Enables request debouncing.
    pub fn debounce(mut self, config: DebounceConfig) -> Self {
        self.debounce = Some(config);
        self
    }

    /// Registers a plugin. Hooks run in registration order for requests and
    /// reverse order for responses and errors.
    pub fn plugin<P: Plugin + 'static>(mut self, plugin: P) -> Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Registers a stats listener for every pipeline event.
    pub fn listener<L>(mut self, listener: L) -> Self
    where
        L: EventListener<ClientEvent> + 'static,
    {
        self.listeners.add(listener);
        self
    }

    /// Builds the client, running each plugin's `on_attach`.
    pub fn build(self) -> Result<Client, BuildError> {
        let transport = self.transport.ok_or(BuildError::MissingTransport)?;

        let mut extensions = Extensions::new();
        for plugin in &self.plugins {
            plugin.on_attach(&mut extensions);
        }

        let listeners = self.listeners;
        let limiter = self.rate_limit.map(|mut config| {
            config.merge_listeners(&listeners);
            RateLimiter::new(config)
        });
        let dedup = self.dedup.map(|mut config| {
            config.merge_listeners(&listeners);
            Deduplicator::new(config)
        });
        let debouncer = self.debounce.map(|mut config| {
            config.merge_listeners(&listeners);
            Debouncer::new(config)
        });

        Ok(Client {
            shared: Arc::new(ClientShared {
                transport,
                defaults: self.defaults,
                plugins: PluginChain::new(self.plugins),
                listeners,
                limiter,
                dedup,
                debouncer,
                extensions,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

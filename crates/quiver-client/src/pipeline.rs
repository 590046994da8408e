//! The per-call orchestrator.
//!
//! One call flows: rate limiter → debouncer → deduplicator → retry loop,
//! where each attempt is plugin `on_request` chain → hedged transport →
//! plugin `on_response`/`on_response_error` chain. A dedup leader's work is
//! spawned so that the leader's own caller cancelling does not tear down the
//! exchange its followers are still waiting on.

use crate::config::ResolvedCall;
use crate::context::Context;
use crate::extensions::Extensions;
use crate::plugin::PluginChain;
use quiver_core::{
    CancelReason, CancelSource, CancelToken, ClientEvent, Error, ErrorKind, Request,
    RequestSnapshot, Response, StatsListeners, Transport,
};
use quiver_dedup::{DedupAdmission, Deduplicator};
use quiver_debounce::Debouncer;
use quiver_hedge::HedgeAttempt;
use quiver_ratelimit::RateLimiter;
use quiver_retry::backoff_sleep;
use std::sync::Arc;
use std::time::Instant;

#[cfg(feature = "tracing")]
use tracing::debug;

/// What the deduplicator shares between a leader and its followers: the
/// response plus the attempts the leader consumed producing it.
pub(crate) type CallValue = (Response, u32);

/// Everything a built client owns.
pub(crate) struct ClientShared {
    pub transport: Arc<dyn Transport>,
    pub defaults: crate::config::ClientDefaults,
    pub plugins: PluginChain,
    pub listeners: StatsListeners,
    pub limiter: Option<RateLimiter>,
    pub dedup: Option<Deduplicator<CallValue>>,
    pub debouncer: Option<Debouncer>,
    pub extensions: Extensions,
}

/// Runs one resolved call to completion.
pub(crate) async fn execute(
    shared: Arc<ClientShared>,
    call: ResolvedCall,
) -> Result<Response, Error> {
    let started = Instant::now();
    let descriptor = call.req.descriptor();

    // Root of the call's cancellation tree; the caller's signal, when
    // present, is composed in so it reaches every suspension point.
    let call_source = match &call.signal {
        Some(signal) => CancelSource::compose([signal]),
        None => CancelSource::new(),
    };
    let call_token = call_source.token();

    shared.listeners.emit(&ClientEvent::RequestStart {
        descriptor: descriptor.clone(),
        timestamp: Instant::now(),
    });

    #[cfg(feature = "metrics")]
    metrics::counter!("quiver_requests_total", "method" => descriptor.method.to_string())
        .increment(1);

    let result = run_admitted(Arc::clone(&shared), call, call_token).await;

    match &result {
        Ok((response, attempts)) => {
            #[cfg(feature = "tracing")]
            debug!(
                id = %descriptor.id,
                status = response.status.as_u16(),
                attempts,
                "request completed"
            );

            shared.listeners.emit(&ClientEvent::RequestSuccess {
                descriptor,
                status: response.status.as_u16(),
                attempts: *attempts,
                elapsed: started.elapsed(),
                timestamp: Instant::now(),
            });
        }
        Err(error) => {
            #[cfg(feature = "tracing")]
            debug!(
                id = %descriptor.id,
                kind = error.kind().as_str(),
                attempts = error.attempt(),
                "request failed"
            );

            shared.listeners.emit(&ClientEvent::RequestFail {
                descriptor,
                kind: error.kind(),
                attempts: error.attempt(),
                elapsed: started.elapsed(),
                timestamp: Instant::now(),
            });
        }
    }

    result.map(|(response, _)| response)
}

/// Pre-flight admission, then the retry loop: directly, or via the
/// deduplicator's leader/follower machinery.
async fn run_admitted(
    shared: Arc<ClientShared>,
    call: ResolvedCall,
    call_token: CancelToken,
) -> Result<CallValue, Error> {
    if call.use_rate_limit {
        if let Some(limiter) = &shared.limiter {
            limiter
                .admit(&call.req, &call_token)
                .await
                .map_err(|error| error.with_request(call.req.snapshot()))?;
        }
    }

    if let Some(window) = call.debounce {
        if let Some(debouncer) = &shared.debouncer {
            debouncer
                .acquire(&call.req, window, &call_token)
                .await
                .map_err(|error| error.with_request(call.req.snapshot()))?;
        }
    }

    if call.use_dedup {
        if let Some(dedup) = &shared.dedup {
            match dedup.admit(&call.req) {
                DedupAdmission::Bypass => {}
                DedupAdmission::Cached(value) => return Ok(value),
                DedupAdmission::Follower(handle) => return handle.wait(&call_token).await,
                DedupAdmission::Leader(guard) => {
                    // The shared exchange runs under the observer-counted
                    // token and is detached from this caller's future, so
                    // followers outlive an aborting leader-caller.
                    let leader_token = guard.token();
                    let own = guard.subscribe();
                    let worker = Arc::clone(&shared);
                    tokio::spawn(async move {
                        let outcome = retry_loop(&worker, &call, leader_token).await;
                        guard.complete(outcome);
                    });
                    return own.wait(&call_token).await;
                }
            }
        }
    }

    retry_loop(&shared, &call, call_token).await
}

/// Attempts 1..=max_retries+1, re-running the request hooks each time.
async fn retry_loop(
    shared: &ClientShared,
    call: &ResolvedCall,
    call_token: CancelToken,
) -> Result<CallValue, Error> {
    let descriptor = call.req.descriptor();
    let mut ctx = Context::new(
        call.req.clone(),
        call.retry.max_retries(),
        call_token.clone(),
        call.meta.clone(),
    );

    loop {
        ctx.attempt += 1;
        ctx.res = None;
        ctx.error = None;

        match run_attempt(shared, call, &mut ctx).await {
            Ok(response) => return Ok((response, ctx.attempt)),
            Err(error) => {
                let error = error.with_attempt(ctx.attempt);
                if !call.retry.should_retry(&error, &ctx.req.method, ctx.attempt) {
                    return Err(error);
                }

                let delay = call.retry.backoff_delay(ctx.attempt, &error);

                #[cfg(feature = "tracing")]
                debug!(
                    id = %descriptor.id,
                    attempt = ctx.attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after backoff"
                );

                #[cfg(feature = "metrics")]
                metrics::counter!("quiver_retries_total").increment(1);

                shared.listeners.emit(&ClientEvent::RequestRetry {
                    descriptor: descriptor.clone(),
                    attempt: ctx.attempt,
                    delay,
                    timestamp: Instant::now(),
                });

                if let Err(abort) = backoff_sleep(delay, &call_token).await {
                    return Err(abort
                        .with_attempt(ctx.attempt)
                        .with_request(ctx.req.snapshot()));
                }
            }
        }
    }
}

/// One attempt: request hooks, hedged transport, response or error hooks.
async fn run_attempt(
    shared: &ClientShared,
    call: &ResolvedCall,
    ctx: &mut Context,
) -> Result<Response, Error> {
    // A hook failure here aborts the attempt before any transport work; the
    // error chain is for transport-phase outcomes and does not run.
    shared.plugins.run_request(ctx).await?;

    match transport_phase(shared, call, ctx).await {
        Ok(response) => {
            ctx.res = Some(response);
            match shared.plugins.run_response(ctx).await {
                Ok(()) => ctx.res.take().ok_or_else(|| {
                    Error::new(
                        ErrorKind::Plugin,
                        "a response hook removed the response without raising",
                    )
                }),
                Err(hook_error) => {
                    ctx.res = None;
                    ctx.error = Some(hook_error);
                    settle_error_chain(shared, ctx).await
                }
            }
        }
        Err(error) => {
            ctx.error = Some(error);
            settle_error_chain(shared, ctx).await
        }
    }
}

async fn settle_error_chain(shared: &ClientShared, ctx: &mut Context) -> Result<Response, Error> {
    shared.plugins.run_response_error(ctx).await;
    if ctx.error.is_none() {
        if let Some(response) = ctx.res.take() {
            return Ok(response);
        }
    }
    Err(ctx.error.take().unwrap_or_else(|| {
        Error::new(
            ErrorKind::Plugin,
            "an error hook cleared the error without recovering",
        )
    }))
}

/// The transport exchange for one attempt, hedged when the policy applies.
async fn transport_phase(
    shared: &ClientShared,
    call: &ResolvedCall,
    ctx: &mut Context,
) -> Result<Response, Error> {
    let req = ctx.req.clone();
    let ignore_response_error = call.ignore_response_error;
    let transport = Arc::clone(&shared.transport);

    match &call.hedging {
        Some(policy) => {
            let descriptor = req.descriptor();
            let rotation = policy.clone();
            let attempt: HedgeAttempt = Arc::new(move |index, token| {
                let mut req = req.clone();
                if let Some(host) = rotation.server_for(index) {
                    if req.url.set_host(Some(host)).is_err() {
                        #[cfg(feature = "tracing")]
                        debug!(host, "hedge server host rejected; keeping original");
                    }
                }
                Box::pin(single_exchange(
                    Arc::clone(&transport),
                    req,
                    token,
                    ignore_response_error,
                ))
            });
            quiver_hedge::execute(
                policy,
                &descriptor,
                &shared.listeners,
                ctx.cancel_token(),
                attempt,
            )
            .await
        }
        None => {
            single_exchange(
                transport,
                req,
                ctx.cancel_token().clone(),
                ignore_response_error,
            )
            .await
        }
    }
}

/// One transport call under its own deadline and cancellation scope, with
/// post-flight status checking and body decoding.
///
/// Each racer's deadline starts here, at its own launch.
async fn single_exchange(
    transport: Arc<dyn Transport>,
    req: Request,
    parent: CancelToken,
    ignore_response_error: bool,
) -> Result<Response, Error> {
    let snapshot = req.snapshot();
    let timeout = req.timeout;
    let response_type = req.response_type;

    let source = CancelSource::compose([&parent]);
    let token = source.token();
    let send = transport.send(req, token.clone());

    let raw = if let Some(timeout) = timeout {
        tokio::select! {
            biased;
            reason = token.cancelled() => return Err(abort_error(reason, &snapshot)),
            result = send => result,
            _ = tokio::time::sleep(timeout) => {
                source.fire(CancelReason::Timeout);
                return Err(Error::timeout(format!(
                    "attempt exceeded its {} ms deadline",
                    timeout.as_millis()
                ))
                .with_request(snapshot));
            }
        }
    } else {
        tokio::select! {
            biased;
            reason = token.cancelled() => return Err(abort_error(reason, &snapshot)),
            result = send => result,
        }
    };

    let raw = raw.map_err(|err| {
        Error::from_transport(err, token.is_fired()).with_request(Arc::clone(&snapshot))
    })?;

    // Error-status bodies rarely honor the caller's hint; decode them
    // leniently so the status failure is what surfaces.
    let hint = if raw.status.is_success() {
        response_type
    } else {
        quiver_core::ResponseType::Auto
    };
    let response = Response::from_raw(raw, hint, Arc::clone(&snapshot))?;
    if !response.is_success() && !ignore_response_error {
        return Err(Error::http(response.status)
            .with_response(response)
            .with_request(snapshot));
    }
    Ok(response)
}

fn abort_error(reason: CancelReason, snapshot: &Arc<RequestSnapshot>) -> Error {
    let error = match reason {
        CancelReason::Timeout => Error::timeout("request timed out"),
        reason => Error::abort(reason),
    };
    error.with_request(Arc::clone(snapshot))
}

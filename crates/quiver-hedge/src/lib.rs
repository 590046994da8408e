//! Request hedging for the quiver HTTP client.
//!
//! Hedging trades extra load for tail latency: when the primary attempt is
//! slow, redundant attempts launch on a jittered delay ladder and the first
//! success wins. Two modes exist. *Race* leaves every launched attempt
//! running until one succeeds, then prunes the rest. *Cancel-and-retry*
//! keeps at most one attempt alive, cancelling the current one at each
//! boundary before starting the next.
//!
//! The executor is transport-agnostic: the caller supplies a closure that
//! runs one attempt given its racer index and cancellation token. The index
//! lets the caller rotate hedges across replica hosts; the token composes
//! the caller's own cancellation, so one external abort tears down every
//! racer, while losing a race prunes only the loser.
//!
//! Per-attempt timeouts belong inside the attempt closure: each racer's
//! clock starts at its own launch, not at the start of the race.

#![forbid(unsafe_code)]

mod config;

pub use config::{HedgeMode, HedgePolicy, HedgePolicyBuilder};

use futures::future::BoxFuture;
use quiver_core::{
    CancelReason, CancelSource, CancelToken, ClientEvent, Error, RequestDescriptor, Response,
    StatsListeners,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[cfg(feature = "tracing")]
use tracing::debug;

/// One attempt of the hedged operation: racer index in, outcome out.
pub type HedgeAttempt =
    Arc<dyn Fn(usize, CancelToken) -> BoxFuture<'static, Result<Response, Error>> + Send + Sync>;

/// Runs one pipeline attempt under the hedging policy.
///
/// Requests whose method is not hedge-eligible, and policies with zero
/// hedges, run exactly one attempt with the caller's token.
pub async fn execute(
    policy: &HedgePolicy,
    descriptor: &RequestDescriptor,
    listeners: &StatsListeners,
    call_token: &CancelToken,
    attempt: HedgeAttempt,
) -> Result<Response, Error> {
    if !policy.should_hedge(&descriptor.method) {
        return attempt(0, call_token.clone()).await;
    }
    match policy.mode() {
        HedgeMode::Race => race(policy, descriptor, listeners, call_token, attempt).await,
        HedgeMode::CancelAndRetry => {
            cancel_and_retry(policy, descriptor, listeners, call_token, attempt).await
        }
    }
}

async fn race(
    policy: &HedgePolicy,
    descriptor: &RequestDescriptor,
    listeners: &StatsListeners,
    call_token: &CancelToken,
    attempt: HedgeAttempt,
) -> Result<Response, Error> {
    let max_racers = policy.max_hedges() + 1;
    let started = Instant::now();
    let (tx, mut rx) = mpsc::channel::<(usize, Result<Response, Error>)>(max_racers);

    let mut sources: Vec<CancelSource> = Vec::with_capacity(max_racers);
    let mut settled = vec![false; max_racers];
    let mut launched = 0usize;
    let mut failed = 0usize;
    let mut primary_error: Option<Error> = None;
    let mut earliest_error: Option<Error> = None;

    let spawn_racer = |index: usize, sources: &mut Vec<CancelSource>| {
        let source = CancelSource::compose([call_token]);
        let token = source.token();
        sources.push(source);

        #[cfg(feature = "metrics")]
        metrics::counter!("quiver_hedge_launches_total").increment(1);

        #[cfg(feature = "tracing")]
        debug!(racer = index, "launching hedge racer");

        listeners.emit(&ClientEvent::HedgeLaunch {
            descriptor: descriptor.clone(),
            attempt: index,
            delay: started.elapsed(),
            timestamp: Instant::now(),
        });

        let tx = tx.clone();
        let fut = attempt(index, token);
        tokio::spawn(async move {
            let _ = tx.send((index, fut.await)).await;
        });
    };

    spawn_racer(0, &mut sources);
    launched += 1;

    let mut hedge_timer = std::pin::pin!(tokio::time::sleep(policy.delay_for(1)));

    loop {
        tokio::select! {
            biased;

            reason = call_token.cancelled() => {
                // Racer tokens compose the call token, so every outstanding
                // attempt is already tearing down.
                return Err(Error::abort(reason));
            }

            Some((index, result)) = rx.recv() => {
                settled[index] = true;
                match result {
                    Ok(response) => {
                        for (loser, source) in sources.iter().enumerate() {
                            if loser != index && !settled[loser] {
                                source.fire(CancelReason::HedgePruned);
                                listeners.emit(&ClientEvent::HedgeCancel {
                                    descriptor: descriptor.clone(),
                                    attempt: loser,
                                    timestamp: Instant::now(),
                                });
                            }
                        }

                        #[cfg(feature = "metrics")]
                        metrics::counter!(
                            "quiver_hedge_wins_total",
                            "winner" => if index == 0 { "primary" } else { "hedge" }
                        )
                        .increment(1);

                        listeners.emit(&ClientEvent::HedgeWin {
                            descriptor: descriptor.clone(),
                            attempt: index,
                            elapsed: started.elapsed(),
                            timestamp: Instant::now(),
                        });
                        return Ok(response);
                    }
                    Err(error) => {
                        failed += 1;
                        if error.cancel_reason() != Some(CancelReason::HedgePruned) {
                            if index == 0 {
                                primary_error = Some(error.clone());
                            }
                            if earliest_error.is_none() {
                                earliest_error = Some(error);
                            }
                        }
                        if failed == max_racers {
                            return Err(primary_error
                                .or(earliest_error)
                                .unwrap_or_else(|| Error::network("all hedge attempts failed")));
                        }
                        if failed == launched && launched < max_racers {
                            // Nothing left in flight; bring the next hedge forward.
                            hedge_timer.set(tokio::time::sleep(Duration::ZERO));
                        }
                    }
                }
            }

            _ = &mut hedge_timer, if launched < max_racers => {
                let index = launched;
                spawn_racer(index, &mut sources);
                launched += 1;
                if launched < max_racers {
                    hedge_timer.set(tokio::time::sleep(policy.delay_for(launched)));
                }
            }
        }
    }
}

async fn cancel_and_retry(
    policy: &HedgePolicy,
    descriptor: &RequestDescriptor,
    listeners: &StatsListeners,
    call_token: &CancelToken,
    attempt: HedgeAttempt,
) -> Result<Response, Error> {
    let total = policy.max_hedges() + 1;
    let started = Instant::now();
    let mut last_error: Option<Error> = None;

    for index in 0..total {
        let source = CancelSource::compose([call_token]);
        listeners.emit(&ClientEvent::HedgeLaunch {
            descriptor: descriptor.clone(),
            attempt: index,
            delay: started.elapsed(),
            timestamp: Instant::now(),
        });

        let mut fut = attempt(index, source.token());
        let boundary = (index + 1 < total).then(|| policy.delay_for(index + 1));

        let outcome = if let Some(boundary) = boundary {
            tokio::select! {
                biased;
                reason = call_token.cancelled() => return Err(Error::abort(reason)),
                result = &mut fut => Some(result),
                _ = tokio::time::sleep(boundary) => {
                    source.fire(CancelReason::HedgePruned);
                    listeners.emit(&ClientEvent::HedgeCancel {
                        descriptor: descriptor.clone(),
                        attempt: index,
                        timestamp: Instant::now(),
                    });
                    None
                }
            }
        } else {
            tokio::select! {
                biased;
                reason = call_token.cancelled() => return Err(Error::abort(reason)),
                result = &mut fut => Some(result),
            }
        };

        match outcome {
            Some(Ok(response)) => {
                listeners.emit(&ClientEvent::HedgeWin {
                    descriptor: descriptor.clone(),
                    attempt: index,
                    elapsed: started.elapsed(),
                    timestamp: Instant::now(),
                });
                return Ok(response);
            }
            Some(Err(error)) => {
                // A failed attempt frees the slot; move on immediately.
                last_error = Some(error);
            }
            None => {}
        }
    }

    Err(last_error.unwrap_or_else(|| Error::network("all hedge attempts failed")))
}

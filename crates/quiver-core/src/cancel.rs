//! Cancellation primitives shared by every stage of the request pipeline.
//!
//! A [`CancelSource`] is the writable half: whoever owns it may fire it once
//! with a [`CancelReason`]. A [`CancelToken`] is the observable half handed to
//! suspension points (rate-limiter waits, backoff sleeps, hedge racers, the
//! transport). Sources compose: [`CancelSource::compose`] produces a source
//! that fires as soon as any parent token fires, carrying the reason of the
//! first parent to do so. This is how a user abort, a per-racer timeout, and
//! hedge pruning all reach the transport through a single token.
//!
//! Tokens never reset. Once fired, every future observer sees the token as
//! already fired, synchronously. Registrations a composite holds on its
//! parents are released when the composite is dropped, so long-lived client
//! state does not accumulate listeners from completed calls.

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};

/// Why a token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CancelReason {
    /// The caller aborted the request.
    User,
    /// A declared timeout elapsed.
    Timeout,
    /// A newer request superseded this one in the debouncer.
    Debounced,
    /// This hedge racer lost the race and was pruned.
    HedgePruned,
}

impl CancelReason {
    /// Short description used in error messages and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelReason::User => "cancelled by caller",
            CancelReason::Timeout => "timed out",
            CancelReason::Debounced => "superseded by a newer request",
            CancelReason::HedgePruned => "hedge attempt pruned",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct State {
    fired: Option<CancelReason>,
    wakers: Vec<(u64, Waker)>,
    children: Vec<(u64, Weak<Shared>)>,
    next_id: u64,
}

struct Shared {
    state: Mutex<State>,
    /// Registrations held on parent tokens. Dropped with the token, which
    /// detaches this composite from every parent.
    parents: Mutex<Vec<ParentLink>>,
}

impl Shared {
    fn unfired() -> Arc<Self> {
        Arc::new(Shared {
            state: Mutex::new(State {
                fired: None,
                wakers: Vec::new(),
                children: Vec::new(),
                next_id: 0,
            }),
            parents: Mutex::new(Vec::new()),
        })
    }
}

struct ParentLink {
    parent: Weak<Shared>,
    id: u64,
}

impl Drop for ParentLink {
    fn drop(&mut self) {
        if let Some(parent) = self.parent.upgrade() {
            parent.state.lock().children.retain(|(id, _)| *id != self.id);
        }
    }
}

fn fire_shared(shared: &Arc<Shared>, reason: CancelReason) {
    let (wakers, children) = {
        let mut state = shared.state.lock();
        if state.fired.is_some() {
            return;
        }
        state.fired = Some(reason);
        (
            std::mem::take(&mut state.wakers),
            std::mem::take(&mut state.children),
        )
    };

    for (_, waker) in wakers {
        waker.wake();
    }
    for (_, child) in children {
        if let Some(child) = child.upgrade() {
            fire_shared(&child, reason);
        }
    }

    // A fired token will never observe its parents again.
    shared.parents.lock().clear();
}

/// The writable half of a cancellation pair.
///
/// Firing is idempotent; the first reason wins.
pub struct CancelSource {
    shared: Arc<Shared>,
}

impl CancelSource {
    /// Creates an independent, unfired source.
    pub fn new() -> Self {
        Self {
            shared: Shared::unfired(),
        }
    }

    /// Creates a source that fires when any of `parents` fires, with the
    /// reason of the first parent to do so.
    ///
    /// A parent that already fired yields a pre-fired source. Composition
    /// itself never fails. The new source may also be fired directly, which
    /// is how internal deadlines and hedge pruning are layered on top of a
    /// caller-supplied token.
    pub fn compose<'a, I>(parents: I) -> Self
    where
        I: IntoIterator<Item = &'a CancelToken>,
    {
        let source = CancelSource::new();
        for parent in parents {
            let registered = {
                let mut state = parent.shared.state.lock();
                if let Some(reason) = state.fired {
                    drop(state);
                    fire_shared(&source.shared, reason);
                    return source;
                }
                let id = state.next_id;
                state.next_id += 1;
                state.children.push((id, Arc::downgrade(&source.shared)));
                id
            };
            source.shared.parents.lock().push(ParentLink {
                parent: Arc::downgrade(&parent.shared),
                id: registered,
            });
        }
        source
    }

    /// Returns an observable token for this source.
    pub fn token(&self) -> CancelToken {
        CancelToken {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Fires the source. The first call wins; later calls are no-ops.
    pub fn fire(&self, reason: CancelReason) {
        fire_shared(&self.shared, reason);
    }

    /// Reason this source fired with, if it has.
    pub fn is_fired(&self) -> Option<CancelReason> {
        self.shared.state.lock().fired
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSource")
            .field("fired", &self.is_fired())
            .finish()
    }
}

/// The observable half of a cancellation pair.
#[derive(Clone)]
pub struct CancelToken {
    shared: Arc<Shared>,
}

impl CancelToken {
    /// A token that can never fire.
    pub fn never() -> Self {
        CancelToken {
            shared: Shared::unfired(),
        }
    }

    /// A token that is already fired with `reason`.
    pub fn fired(reason: CancelReason) -> Self {
        let source = CancelSource::new();
        source.fire(reason);
        source.token()
    }

    /// Reason this token fired with, if it has. Synchronous: once a token is
    /// fired, every caller sees `Some` from here on.
    pub fn is_fired(&self) -> Option<CancelReason> {
        self.shared.state.lock().fired
    }

    /// Resolves when the token fires, yielding the reason.
    ///
    /// The returned future deregisters its waker on drop, so select arms that
    /// lose the race leave nothing behind.
    pub fn cancelled(&self) -> Cancelled {
        Cancelled {
            shared: Arc::clone(&self.shared),
            id: None,
        }
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("fired", &self.is_fired())
            .finish()
    }
}

/// Future returned by [`CancelToken::cancelled`].
pub struct Cancelled {
    shared: Arc<Shared>,
    id: Option<u64>,
}

impl Future for Cancelled {
    type Output = CancelReason;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.shared.state.lock();
        if let Some(reason) = state.fired {
            return Poll::Ready(reason);
        }
        match this.id {
            Some(id) => {
                if let Some(slot) = state.wakers.iter_mut().find(|(slot_id, _)| *slot_id == id) {
                    slot.1 = cx.waker().clone();
                } else {
                    state.wakers.push((id, cx.waker().clone()));
                }
            }
            None => {
                let id = state.next_id;
                state.next_id += 1;
                state.wakers.push((id, cx.waker().clone()));
                drop(state);
                this.id = Some(id);
            }
        }
        Poll::Pending
    }
}

impl Drop for Cancelled {
    fn drop(&mut self) {
        if let Some(id) = self.id {
            self.shared
                .state
                .lock()
                .wakers
                .retain(|(slot_id, _)| *slot_id != id);
        }
    }
}

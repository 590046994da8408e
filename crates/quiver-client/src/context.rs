//! The per-call context plugins receive.

use quiver_core::{CancelToken, Error, Request, Response};
use std::collections::HashMap;

/// Mutable state shared by every plugin hook over the life of one call.
///
/// `req` and `meta` persist across retry attempts (a credential refreshed in
/// `on_request` on attempt two stays refreshed), while `res` and `error`
/// describe the current attempt only.
pub struct Context {
    /// The request, as mutated so far.
    pub req: Request,
    /// Current attempt's response, when one exists.
    pub res: Option<Response>,
    /// Current attempt's error, when one exists.
    pub error: Option<Error>,
    /// Attempt number, 1-based.
    pub attempt: u32,
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Free-form call-scoped state for plugins.
    pub meta: HashMap<String, serde_json::Value>,
    cancel: CancelToken,
}

impl Context {
    pub(crate) fn new(
        req: Request,
        max_retries: u32,
        cancel: CancelToken,
        meta: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self {
            req,
            res: None,
            error: None,
            attempt: 0,
            max_retries,
            meta,
            cancel,
        }
    }

    /// The call's combined cancellation token.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// True when this is the final allowed attempt.
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_retries + 1
    }

    /// Convenience: reads a meta value previously stored by a plugin.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.meta.get(key)?.as_str()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("method", &self.req.method)
            .field("url", &self.req.url.as_str())
            .field("attempt", &self.attempt)
            .field("max_retries", &self.max_retries)
            .field("has_res", &self.res.is_some())
            .field("has_error", &self.error.is_some())
            .finish()
    }
}

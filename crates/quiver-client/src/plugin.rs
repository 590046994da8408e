//! The plugin trait and the ordered hook chains.

use crate::context::Context;
use crate::extensions::Extensions;
use async_trait::async_trait;
use quiver_core::Error;
use std::sync::Arc;

#[cfg(feature = "tracing")]
use tracing::trace;

/// A pipeline plugin.
///
/// All hooks are optional; the defaults do nothing. Hooks receive the call's
/// [`Context`] by mutable reference and mutate it in place. Hook errors are
/// wrapped as [`quiver_core::ErrorKind::Plugin`] with the plugin's name.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name used in error messages and tracing.
    fn name(&self) -> &str;

    /// Runs once when the client is built. Deposit client-wide capabilities
    /// into the registry here.
    fn on_attach(&self, extensions: &mut Extensions) {
        let _ = extensions;
    }

    /// Runs before the transport on every attempt, in registration order.
    async fn on_request(&self, ctx: &mut Context) -> Result<(), Error> {
        let _ = ctx;
        Ok(())
    }

    /// Runs after a successful exchange, in reverse registration order.
    async fn on_response(&self, ctx: &mut Context) -> Result<(), Error> {
        let _ = ctx;
        Ok(())
    }

    /// Runs after a failed attempt, in reverse registration order. May
    /// mutate `ctx.error`, or recover by setting `ctx.res` and clearing
    /// `ctx.error`.
    async fn on_response_error(&self, ctx: &mut Context) -> Result<(), Error> {
        let _ = ctx;
        Ok(())
    }
}

/// The registered plugins, in order.
#[derive(Clone, Default)]
pub(crate) struct PluginChain {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginChain {
    pub(crate) fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self { plugins }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Left-to-right `on_request` chain. The first hook error aborts the
    /// attempt; later hooks do not run.
    pub(crate) async fn run_request(&self, ctx: &mut Context) -> Result<(), Error> {
        for plugin in &self.plugins {
            #[cfg(feature = "tracing")]
            trace!(plugin = plugin.name(), attempt = ctx.attempt, "on_request");

            if let Err(cause) = plugin.on_request(ctx).await {
                return Err(Error::plugin(plugin.name(), cause));
            }
        }
        Ok(())
    }

    /// Right-to-left `on_response` chain. A hook error converts the attempt
    /// into a failure; the caller routes it into the error chain.
    pub(crate) async fn run_response(&self, ctx: &mut Context) -> Result<(), Error> {
        for plugin in self.plugins.iter().rev() {
            #[cfg(feature = "tracing")]
            trace!(plugin = plugin.name(), attempt = ctx.attempt, "on_response");

            if let Err(cause) = plugin.on_response(ctx).await {
                return Err(Error::plugin(plugin.name(), cause));
            }
        }
        Ok(())
    }

    /// Right-to-left `on_response_error` chain.
    ///
    /// A hook error replaces `ctx.error`. A hook that sets `ctx.res` and
    /// clears `ctx.error` recovers the attempt; the rest of the chain is
    /// skipped.
    pub(crate) async fn run_response_error(&self, ctx: &mut Context) {
        for plugin in self.plugins.iter().rev() {
            #[cfg(feature = "tracing")]
            trace!(plugin = plugin.name(), attempt = ctx.attempt, "on_response_error");

            if let Err(cause) = plugin.on_response_error(ctx).await {
                ctx.error = Some(Error::plugin(plugin.name(), cause));
            }
            if ctx.error.is_none() && ctx.res.is_some() {
                return;
            }
        }
    }
}

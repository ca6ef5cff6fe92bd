//! Blocking wrapper around [`TradeContext`] for callers without a runtime.

use crate::core::config::Config;
use crate::core::errors::OpenApiError;
use crate::core::types::{PushOrderChanged, SubmitOrderOptions, SubmitOrderResponse, Topic};
use crate::trade::{ChannelState, SubscriptionState, TradeContext};
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

/// Trade context whose operations block the calling thread
///
/// Owns a small multi-threaded runtime, so callbacks keep firing while the
/// caller is blocked elsewhere. Must not be created or dropped from inside
/// an async context.
pub struct TradeContextSync {
    // Dropped before the runtime it lives on
    ctx: TradeContext,
    rt: Runtime,
}

impl std::fmt::Debug for TradeContextSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeContextSync")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

impl TradeContextSync {
    pub fn try_new(config: Arc<Config>) -> Result<Self, OpenApiError> {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("openapi-trade")
            .enable_all()
            .build()
            .map_err(|e| OpenApiError::Transport(format!("Failed to start runtime: {}", e)))?;
        let ctx = rt.block_on(TradeContext::try_new(config))?;
        Ok(Self { ctx, rt })
    }

    pub fn set_on_order_changed<F>(&self, handler: F)
    where
        F: Fn(PushOrderChanged) + Send + Sync + 'static,
    {
        self.ctx.set_on_order_changed(handler);
    }

    pub fn clear_on_order_changed(&self) {
        self.ctx.clear_on_order_changed();
    }

    pub fn subscribe(&self, topics: &[Topic]) -> Result<(), OpenApiError> {
        self.ctx.subscribe(topics)
    }

    pub fn unsubscribe(&self, topics: &[Topic]) -> Result<(), OpenApiError> {
        self.ctx.unsubscribe(topics)
    }

    pub fn start(&self) -> Result<(), OpenApiError> {
        self.ctx.start()
    }

    pub fn stop(&self) {
        self.rt.block_on(self.ctx.stop());
    }

    pub fn state(&self) -> ChannelState {
        self.ctx.state()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionState> {
        self.ctx.subscriptions()
    }

    pub fn wait_confirmed(&self, topics: &[Topic], timeout: Duration) -> bool {
        self.rt.block_on(self.ctx.wait_confirmed(topics, timeout))
    }

    pub fn submit_order(
        &self,
        options: &SubmitOrderOptions,
    ) -> Result<SubmitOrderResponse, OpenApiError> {
        self.rt.block_on(self.ctx.submit_order(options))
    }

    pub fn order_detail(&self, order_id: &str, account_no: &str) -> Result<Value, OpenApiError> {
        self.rt.block_on(self.ctx.order_detail(order_id, account_no))
    }

    pub fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        headers: &[(String, String)],
    ) -> Result<Value, OpenApiError> {
        self.rt
            .block_on(self.ctx.request(method, path, query, body, headers))
    }
}

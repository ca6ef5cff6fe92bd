use crate::core::config::Config;
use crate::core::errors::OpenApiError;
use crate::core::kernel::codec::{JsonPushCodec, PushCodec};
use crate::core::kernel::rest::{query_pairs, ReqwestRest, RestClient, RestClientExt};
use crate::core::kernel::ws::{TungsteniteConnector, WsConnector};
use crate::core::types::{PushOrderChanged, SubmitOrderOptions, SubmitOrderResponse, Topic};
use crate::trade::channel::{ChannelConfig, ChannelState, SubscriptionChannel};
use crate::trade::dispatcher::{CallbackRegistry, EventDispatcher};
use crate::trade::subscriptions::SubscriptionState;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, instrument};

const ORDER_PATH: &str = "/v1/whaleapi/trade/order";

#[derive(Serialize)]
struct OrderDetailQuery<'a> {
    order_id: &'a str,
    account_no: &'a str,
}

/// Trade context: signed commands plus the push subscription channel
///
/// Commands return the gateway's synchronous acknowledgement. What happens
/// to an order afterwards arrives through the registered callbacks, on the
/// dispatcher task rather than on the caller's.
///
/// # Example
///
/// ```rust,no_run
/// use openapi_trade::{Config, OrderSide, SubmitOrderOptions, Topic, TradeContext};
/// use std::sync::Arc;
///
/// # async fn example(config: Config) -> Result<(), openapi_trade::OpenApiError> {
/// let ctx = TradeContext::try_new(Arc::new(config)).await?;
/// ctx.set_on_order_changed(|order| println!("{:?}", order.status));
/// ctx.subscribe(&[Topic::Private])?;
///
/// let order = SubmitOrderOptions::market("700.HK", OrderSide::Buy, 100, "HK-001");
/// let response = ctx.submit_order(&order).await?;
/// println!("submitted {}", response.order_id);
/// # Ok(())
/// # }
/// ```
pub struct TradeContext {
    config: Arc<Config>,
    rest: Arc<dyn RestClient>,
    channel: SubscriptionChannel,
    callbacks: Arc<CallbackRegistry>,
}

impl std::fmt::Debug for TradeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeContext")
            .field("config", &self.config)
            .field("channel", &self.channel)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

impl TradeContext {
    /// Create a context talking to the endpoints in `config`
    ///
    /// The push worker and dispatcher are spawned on the current runtime;
    /// no connection is made until `subscribe` or `start`.
    pub async fn try_new(config: Arc<Config>) -> Result<Self, OpenApiError> {
        let channel_config = ChannelConfig::default();
        let rest = ReqwestRest::from_config(&config)?;
        let connector = TungsteniteConnector::from_config(&config)
            .with_connect_timeout(channel_config.connect_timeout);

        Ok(Self::with_parts(
            config,
            Arc::new(rest),
            connector,
            JsonPushCodec,
            channel_config,
        ))
    }

    /// Assemble a context from custom parts; must be called within a tokio runtime
    pub fn with_parts<C, K>(
        config: Arc<Config>,
        rest: Arc<dyn RestClient>,
        connector: C,
        codec: K,
        channel_config: ChannelConfig,
    ) -> Self
    where
        C: WsConnector,
        K: PushCodec,
    {
        let (channel, queue) = SubscriptionChannel::spawn(connector, codec, channel_config);
        let callbacks = Arc::new(CallbackRegistry::new());
        EventDispatcher::new(callbacks.clone(), channel.generation_handle()).spawn(queue);

        info!(
            http_url = %config.http_url(),
            trade_ws_url = %config.trade_ws_url(),
            "Trade context created"
        );

        Self {
            config,
            rest,
            channel,
            callbacks,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Set the order changed callback, replacing any previous one
    pub fn set_on_order_changed<F>(&self, handler: F)
    where
        F: Fn(PushOrderChanged) + Send + Sync + 'static,
    {
        self.callbacks.set_on_order_changed(handler);
    }

    pub fn clear_on_order_changed(&self) {
        self.callbacks.clear_on_order_changed();
    }

    /// Subscribe to push topics; returns before the server acknowledges
    pub fn subscribe(&self, topics: &[Topic]) -> Result<(), OpenApiError> {
        self.channel.subscribe(topics)
    }

    pub fn unsubscribe(&self, topics: &[Topic]) -> Result<(), OpenApiError> {
        self.channel.unsubscribe(topics)
    }

    /// Open the push connection without subscribing
    pub fn start(&self) -> Result<(), OpenApiError> {
        self.channel.start()
    }

    /// Close the push connection for good
    pub async fn stop(&self) {
        self.channel.stop().await;
    }

    pub fn state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.channel.state_changes()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionState> {
        self.channel.subscriptions()
    }

    /// Wait until the channel is active and the server has acknowledged
    /// every topic in `topics`
    ///
    /// Returns `false` on timeout or once the context is stopped.
    pub async fn wait_confirmed(&self, topics: &[Topic], timeout: Duration) -> bool {
        let mut states = self.state_changes();
        let confirmed = tokio::time::timeout(timeout, async {
            loop {
                let active = *states.borrow_and_update() == ChannelState::Active;
                if active && self.all_confirmed(topics) {
                    return true;
                }
                if self.channel.is_stopped() {
                    return false;
                }
                // A late ack confirms a topic without a state transition
                tokio::select! {
                    changed = states.changed() => {
                        if changed.is_err() {
                            return false;
                        }
                    }
                    () = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            }
        })
        .await;
        matches!(confirmed, Ok(true))
    }

    fn all_confirmed(&self, topics: &[Topic]) -> bool {
        let states = self.subscriptions();
        topics.iter().all(|topic| {
            states
                .iter()
                .any(|state| state.topic == *topic && state.confirmed)
        })
    }

    /// Submit an order
    #[instrument(skip(self, options), fields(symbol = %options.symbol, side = %options.side))]
    pub async fn submit_order(
        &self,
        options: &SubmitOrderOptions,
    ) -> Result<SubmitOrderResponse, OpenApiError> {
        self.ensure_open()?;
        let response: SubmitOrderResponse = self
            .rest
            .request_json(Method::POST, ORDER_PATH, &[], Some(options))
            .await?;
        info!(order_id = %response.order_id, "Order submitted");
        Ok(response)
    }

    /// Get order detail
    #[instrument(skip(self))]
    pub async fn order_detail(
        &self,
        order_id: &str,
        account_no: &str,
    ) -> Result<Value, OpenApiError> {
        self.ensure_open()?;
        let query = query_pairs(&OrderDetailQuery {
            order_id,
            account_no,
        })?;
        self.rest
            .request(Method::GET, ORDER_PATH, &query, None, &[])
            .await
    }

    /// Send a raw signed request and return the response's `data`
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
        headers: &[(String, String)],
    ) -> Result<Value, OpenApiError> {
        self.ensure_open()?;
        self.rest.request(method, path, query, body, headers).await
    }

    /// Send a signed request with a typed body and typed response data
    pub async fn request_json<T, B>(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&B>,
    ) -> Result<T, OpenApiError>
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync + ?Sized,
    {
        self.ensure_open()?;
        self.rest.request_json(method, path, query, body).await
    }

    fn ensure_open(&self) -> Result<(), OpenApiError> {
        if self.channel.is_stopped() {
            return Err(OpenApiError::ClientClosed);
        }
        Ok(())
    }
}

//! Transport kernel for the OpenAPI gateway
//!
//! This module holds the building blocks every higher layer is assembled
//! from. Nothing here knows about subscription state or callbacks.
//!
//! # Components
//!
//! - [`Signer`]: produces authentication headers for a request. `HmacSigner`
//!   implements the gateway's HMAC-SHA256 scheme.
//! - [`RestClient`]: one signed HTTP round trip with the gateway's response
//!   envelope mapped onto [`OpenApiError`](crate::core::errors::OpenApiError).
//!   [`RestClientExt`] adds typed `request_json`.
//! - [`PushCodec`]: wire format of the push channel. [`JsonPushCodec`] speaks
//!   JSON text frames.
//! - [`WsConnector`] / [`WsTransport`]: open a push connection and move raw
//!   messages over it. [`TungsteniteConnector`] signs the handshake.
//! - [`ExponentialBackoff`]: reconnect delay with jitter.
//!
//! # Example
//!
//! ```rust,no_run
//! use openapi_trade::core::config::Config;
//! use openapi_trade::core::kernel::{RestClient, ReqwestRest};
//! use reqwest::Method;
//!
//! # async fn example(config: Config) -> Result<(), openapi_trade::OpenApiError> {
//! let rest = ReqwestRest::from_config(&config)?;
//! let query = vec![("order_id".to_string(), "701276261045858304".to_string())];
//! let data = rest
//!     .request(Method::GET, "/v1/whaleapi/trade/order", &query, None, &[])
//!     .await?;
//! println!("{}", data);
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod codec;
pub mod rest;
pub mod signer;
pub mod ws;

pub use backoff::ExponentialBackoff;
pub use codec::{Frame, JsonPushCodec, PushCodec, SubscriptionOp};
pub use rest::{
    decode_data, encode_body, query_pairs, ReqwestRest, RestClient, RestClientBuilder,
    RestClientConfig, RestClientExt,
};
pub use signer::{HmacSigner, SignatureResult, Signer};
pub use ws::{TungsteniteConnector, TungsteniteWs, WsConnector, WsTransport};

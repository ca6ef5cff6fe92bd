use crate::core::config::{Config, Language};
use crate::core::errors::OpenApiError;
use crate::core::kernel::signer::{HmacSigner, Signer};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, warn};

/// One established push connection - pure transport layer
///
/// Ping replies are handled here; pongs are surfaced so the caller can
/// track liveness. A server close or end of stream yields `None`.
#[async_trait]
pub trait WsTransport: Send {
    /// Send a raw message
    async fn send(&mut self, msg: Message) -> Result<(), OpenApiError>;

    /// Receive the next raw message
    async fn next_raw(&mut self) -> Option<Result<Message, OpenApiError>>;

    /// Close the connection
    async fn close(&mut self) -> Result<(), OpenApiError>;
}

/// Opens push connections; called once per connection generation
#[async_trait]
pub trait WsConnector: Send + Sync + 'static {
    type Transport: WsTransport + 'static;

    async fn connect(&self) -> Result<Self::Transport, OpenApiError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Tungstenite-based connector with a signed handshake
pub struct TungsteniteConnector {
    url: Url,
    language: Language,
    signer: Arc<dyn Signer>,
    connect_timeout: Duration,
}

impl std::fmt::Debug for TungsteniteConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TungsteniteConnector")
            .field("url", &self.url.as_str())
            .field("language", &self.language)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

impl TungsteniteConnector {
    pub fn new(url: Url, signer: Arc<dyn Signer>) -> Self {
        Self {
            url,
            language: Language::EN,
            signer,
            connect_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.trade_ws_url().clone(),
            Arc::new(HmacSigner::from_config(config)),
        )
        .with_language(config.language())
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn handshake_request(&self) -> Result<Request, OpenApiError> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .map_err(|e| OpenApiError::Protocol(format!("Failed to get timestamp: {}", e)))?;
        let signed = self.signer.sign_request(
            "GET",
            self.url.path(),
            self.url.query().unwrap_or_default(),
            &[],
            timestamp,
        )?;

        let mut request = self.url.as_str().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            "accept-language",
            HeaderValue::from_static(self.language.as_str()),
        );
        for (key, value) in signed {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| OpenApiError::Protocol(format!("Invalid header name: {}", e)))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| OpenApiError::Protocol(format!("Invalid header value: {}", e)))?;
            headers.insert(name, value);
        }

        Ok(request)
    }
}

#[async_trait]
impl WsConnector for TungsteniteConnector {
    type Transport = TungsteniteWs;

    #[instrument(skip(self), fields(url = %self.url))]
    async fn connect(&self) -> Result<TungsteniteWs, OpenApiError> {
        let request = self.handshake_request()?;

        let (stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(request))
            .await
            .map_err(|_| OpenApiError::Transport("WebSocket connection timeout".to_string()))?
            .map_err(|e| {
                OpenApiError::Transport(format!("WebSocket connection failed: {}", e))
            })?;

        debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(TungsteniteWs { stream })
    }
}

/// Established tungstenite connection
pub struct TungsteniteWs {
    stream: WsStream,
}

#[async_trait]
impl WsTransport for TungsteniteWs {
    async fn send(&mut self, msg: Message) -> Result<(), OpenApiError> {
        self.stream.send(msg).await.map_err(|e| {
            OpenApiError::Transport(format!("Failed to send WebSocket message: {}", e))
        })
    }

    async fn next_raw(&mut self) -> Option<Result<Message, OpenApiError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Ping(data)) => {
                    if let Err(e) = self.stream.send(Message::Pong(data)).await {
                        warn!("Failed to send pong response: {}", e);
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Server closed the connection");
                    return None;
                }
                Ok(message) => return Some(Ok(message)),
                Err(e) => return Some(Err(OpenApiError::from(e))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), OpenApiError> {
        match self.stream.close(None).await {
            Ok(())
            | Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(OpenApiError::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::kernel::signer::{HEADER_API_KEY, HEADER_SIGNATURE};

    fn connector() -> TungsteniteConnector {
        let config = Config::builder()
            .app_key("app-key")
            .app_secret("app-secret")
            .access_token("access-token")
            .trade_ws_url("wss://push.example.com/v2?client=sdk")
            .language(Language::ZH_HK)
            .build()
            .unwrap();
        TungsteniteConnector::from_config(&config)
    }

    #[test]
    fn test_handshake_is_signed() {
        let request = connector().handshake_request().unwrap();
        let headers = request.headers();

        assert_eq!(headers["accept-language"], "zh-HK");
        assert_eq!(headers[HEADER_API_KEY], "app-key");
        assert!(headers.contains_key(HEADER_SIGNATURE));
        assert_eq!(request.uri().path(), "/v2");
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_is_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = TungsteniteConnector::new(
            Url::parse(&format!("ws://{}", addr)).unwrap(),
            Arc::new(HmacSigner::new("k".into(), "s".into(), "t".into())),
        )
        .with_connect_timeout(Duration::from_secs(2));

        let err = connector.connect().await.err().unwrap();
        assert!(err.is_transport(), "{:?}", err);
    }
}

#![allow(dead_code)]

use async_trait::async_trait;
use openapi_trade::core::kernel::ws::{WsConnector, WsTransport};
use openapi_trade::{ChannelConfig, Config, OpenApiError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

pub const TIMEOUT: Duration = Duration::from_secs(3);

pub fn test_config(http_url: &str, ws_url: &str) -> Arc<Config> {
    Arc::new(
        Config::builder()
            .app_key("test-app-key")
            .app_secret("test-app-secret")
            .access_token("test-access-token")
            .http_url(http_url)
            .trade_ws_url(ws_url)
            .request_timeout(Duration::from_secs(5))
            .build()
            .expect("valid test config"),
    )
}

pub fn fast_channel_config() -> ChannelConfig {
    ChannelConfig {
        connect_timeout: Duration::from_secs(1),
        heartbeat_interval: Duration::from_secs(60),
        ack_timeout: Duration::from_millis(300),
        backoff_base: Duration::from_millis(20),
        backoff_max: Duration::from_millis(100),
        backoff_jitter: 0.0,
        backoff_reset_after: Duration::from_millis(200),
        push_queue_capacity: 64,
    }
}

pub fn order_changed_payload(order_id: &str, status: &str) -> Value {
    json!({
        "side": "Buy",
        "stock_name": "Tencent",
        "submitted_quantity": "100",
        "symbol": "700.HK",
        "order_type": "MO",
        "submitted_price": "0",
        "executed_quantity": "0",
        "executed_price": "",
        "order_id": order_id,
        "currency": "HKD",
        "status": status,
        "submitted_at": "1651644897",
        "updated_at": "1651644898",
        "trigger_price": "",
        "msg": "",
        "tag": "Normal",
        "trigger_status": "",
        "trigger_at": "0",
        "account_no": "HK-001",
        "remark": ""
    })
}

/// Poll `condition` until it holds or the test timeout elapses
pub async fn wait_until<F: Fn() -> bool>(condition: F, what: &str) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Server end of one in-memory connection
pub struct ServerSide {
    from_client: mpsc::UnboundedReceiver<Message>,
    to_client: mpsc::UnboundedSender<Result<Message, OpenApiError>>,
}

impl ServerSide {
    /// Next JSON text message from the client, skipping pings
    pub async fn next_request(&mut self) -> Value {
        loop {
            let message = tokio::time::timeout(TIMEOUT, self.from_client.recv())
                .await
                .expect("timed out waiting for client message")
                .expect("client closed the connection");
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).expect("client sent JSON");
            }
        }
    }

    /// True when no text message arrives within `window`
    pub async fn is_quiet_for(&mut self, window: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.from_client.recv()).await {
                Err(_) => return true,
                Ok(None) => return true,
                Ok(Some(Message::Text(_))) => return false,
                Ok(Some(_)) => {}
            }
        }
    }

    /// Resolves once the client has closed its end
    pub async fn wait_closed(&mut self) {
        tokio::time::timeout(TIMEOUT, async {
            while self.from_client.recv().await.is_some() {}
        })
        .await
        .expect("client did not close the connection");
    }

    pub fn ack(&self, id: &Value, code: i64) {
        self.send_json(json!({"type": "ack", "id": id, "code": code, "message": ""}));
    }

    pub fn push_order_changed(&self, order_id: &str, status: &str) {
        self.send_json(json!({
            "type": "push",
            "topic": "private",
            "event": "order_changed",
            "data": order_changed_payload(order_id, status),
        }));
    }

    pub fn send_json(&self, value: Value) {
        self.send_text(&value.to_string());
    }

    pub fn send_text(&self, text: &str) {
        let _ = self.to_client.send(Ok(Message::Text(text.to_string())));
    }
}

/// Connector handing out in-memory transports, one [`ServerSide`] per connect
#[derive(Clone)]
pub struct MockConnector {
    connections: mpsc::UnboundedSender<ServerSide>,
    failures: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerSide>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                connections: tx,
                failures: Arc::new(AtomicUsize::new(0)),
                attempts: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        )
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

pub async fn next_connection(connections: &mut mpsc::UnboundedReceiver<ServerSide>) -> ServerSide {
    tokio::time::timeout(TIMEOUT, connections.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("connector dropped")
}

pub struct MockTransport {
    to_server: mpsc::UnboundedSender<Message>,
    from_server: mpsc::UnboundedReceiver<Result<Message, OpenApiError>>,
}

#[async_trait]
impl WsConnector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self) -> Result<MockTransport, OpenApiError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let should_fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(OpenApiError::Transport("connection refused".to_string()));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        self.connections
            .send(ServerSide {
                from_client,
                to_client,
            })
            .map_err(|_| OpenApiError::Transport("mock server gone".to_string()))?;

        Ok(MockTransport {
            to_server,
            from_server,
        })
    }
}

#[async_trait]
impl WsTransport for MockTransport {
    async fn send(&mut self, msg: Message) -> Result<(), OpenApiError> {
        self.to_server
            .send(msg)
            .map_err(|_| OpenApiError::Transport("mock connection closed".to_string()))
    }

    async fn next_raw(&mut self) -> Option<Result<Message, OpenApiError>> {
        self.from_server.recv().await
    }

    async fn close(&mut self) -> Result<(), OpenApiError> {
        self.from_server.close();
        Ok(())
    }
}

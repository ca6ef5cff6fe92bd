use crate::core::errors::OpenApiError;
use crate::core::kernel::backoff::ExponentialBackoff;
use crate::core::kernel::codec::{Frame, PushCodec, SubscriptionOp};
use crate::core::kernel::ws::{WsConnector, WsTransport};
use crate::core::types::Topic;
use crate::trade::subscriptions::{SubscriptionState, SubscriptionTable};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, trace, warn};

/// Lifecycle of the push connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
    Resubscribing,
    Active,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Resubscribing => "resubscribing",
            Self::Active => "active",
        };
        f.write_str(name)
    }
}

/// Push channel tunables
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub connect_timeout: Duration,
    /// Ping period; a connection silent for twice this long is dropped
    pub heartbeat_interval: Duration,
    /// How long `Resubscribing` waits for acks before going `Active` anyway
    pub ack_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub backoff_jitter: f64,
    /// A connection that stays up this long resets the backoff
    pub backoff_reset_after: Duration,
    /// Capacity of the queue between the worker and the dispatcher
    pub push_queue_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            backoff_jitter: 0.2,
            backoff_reset_after: Duration::from_secs(10),
            push_queue_capacity: 1024,
        }
    }
}

/// A push frame tagged with the connection generation it arrived on
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub generation: u64,
    pub frame: Frame,
}

#[derive(Debug)]
enum Command {
    Start,
    Sync,
    Stop,
}

fn lock(table: &Mutex<SubscriptionTable>) -> MutexGuard<'_, SubscriptionTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to the persistent push connection
///
/// All wire traffic happens on a background worker task; the methods here
/// only record intent and return immediately. Dropping the handle stops the
/// worker.
pub struct SubscriptionChannel {
    table: Arc<Mutex<SubscriptionTable>>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ChannelState>,
    generation: Arc<AtomicU64>,
    stopped: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for SubscriptionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionChannel")
            .field("state", &*self.state.borrow())
            .field("generation", &self.generation.load(Ordering::SeqCst))
            .field("stopped", &self.stopped.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl SubscriptionChannel {
    /// Spawn the worker on the current tokio runtime
    ///
    /// Returns the handle and the receiving end of the push queue, which is
    /// meant for an [`EventDispatcher`](crate::trade::dispatcher::EventDispatcher).
    /// No connection is attempted until the first `subscribe` or `start`.
    pub fn spawn<C, K>(
        connector: C,
        codec: K,
        config: ChannelConfig,
    ) -> (Self, mpsc::Receiver<Envelope>)
    where
        C: WsConnector,
        K: PushCodec,
    {
        let table = Arc::new(Mutex::new(SubscriptionTable::new()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Disconnected);
        let (event_tx, event_rx) = mpsc::channel(config.push_queue_capacity.max(1));
        let generation = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            backoff: ExponentialBackoff::new(
                config.backoff_base,
                config.backoff_max,
                config.backoff_jitter,
            ),
            connector,
            codec,
            config,
            table: table.clone(),
            commands: command_rx,
            state: state_tx,
            generation: generation.clone(),
            events: event_tx,
            next_request_id: 0,
        };
        let handle = tokio::spawn(worker.run());

        let channel = Self {
            table,
            commands: command_tx,
            state: state_rx,
            generation,
            stopped: AtomicBool::new(false),
            worker: Mutex::new(Some(handle)),
        };
        (channel, event_rx)
    }

    /// Add topics to the desired set
    ///
    /// Idempotent; connects on first use. Wire messages are produced by the
    /// worker once the channel is active.
    pub fn subscribe(&self, topics: &[Topic]) -> Result<(), OpenApiError> {
        self.ensure_running()?;
        if lock(&self.table).set_desired(topics, true) {
            self.send(Command::Sync)?;
        }
        Ok(())
    }

    /// Remove topics from the desired set
    pub fn unsubscribe(&self, topics: &[Topic]) -> Result<(), OpenApiError> {
        self.ensure_running()?;
        if lock(&self.table).set_desired(topics, false) {
            self.send(Command::Sync)?;
        }
        Ok(())
    }

    /// Connect without subscribing to anything yet
    pub fn start(&self) -> Result<(), OpenApiError> {
        self.ensure_running()?;
        self.send(Command::Start)
    }

    /// Close the connection and end the worker; terminal
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.commands.send(Command::Stop);

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Push channel worker ended abnormally: {}", e);
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Receiver notified on every state transition
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Generation of the current (or most recent) connection
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Shared generation counter, for discarding stale frames downstream
    pub fn generation_handle(&self) -> Arc<AtomicU64> {
        self.generation.clone()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionState> {
        lock(&self.table).snapshot()
    }

    fn ensure_running(&self) -> Result<(), OpenApiError> {
        if self.is_stopped() {
            return Err(OpenApiError::ClientClosed);
        }
        Ok(())
    }

    fn send(&self, command: Command) -> Result<(), OpenApiError> {
        self.commands
            .send(command)
            .map_err(|_| OpenApiError::ClientClosed)
    }
}

impl Drop for SubscriptionChannel {
    fn drop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.commands.send(Command::Stop);
    }
}

enum SessionEnd {
    Lost(String),
    Stopped,
}

struct Worker<C: WsConnector, K: PushCodec> {
    connector: C,
    codec: K,
    config: ChannelConfig,
    table: Arc<Mutex<SubscriptionTable>>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ChannelState>,
    generation: Arc<AtomicU64>,
    events: mpsc::Sender<Envelope>,
    backoff: ExponentialBackoff,
    next_request_id: u64,
}

impl<C: WsConnector, K: PushCodec> Worker<C, K> {
    async fn run(mut self) {
        // Idle until someone wants the connection
        loop {
            match self.commands.recv().await {
                Some(Command::Start) => break,
                Some(Command::Sync) => {
                    if !lock(&self.table).desired_topics().is_empty() {
                        break;
                    }
                }
                Some(Command::Stop) | None => return,
            }
        }

        loop {
            self.set_state(ChannelState::Connecting);

            let connected = {
                let connect = self.connector.connect();
                tokio::pin!(connect);
                loop {
                    tokio::select! {
                        result = &mut connect => break Some(result),
                        command = self.commands.recv() => {
                            if matches!(command, Some(Command::Stop) | None) {
                                break None;
                            }
                        }
                    }
                }
            };

            let reason = match connected {
                None => break,
                Some(Ok(mut transport)) => {
                    let connected_at = Instant::now();
                    let end = self.run_session(&mut transport).await;
                    if let Err(e) = transport.close().await {
                        debug!("Error closing push transport: {}", e);
                    }
                    if connected_at.elapsed() >= self.config.backoff_reset_after {
                        self.backoff.reset();
                    }
                    match end {
                        SessionEnd::Stopped => break,
                        SessionEnd::Lost(reason) => reason,
                    }
                }
                Some(Err(e)) => e.to_string(),
            };

            self.set_state(ChannelState::Disconnected);
            let delay = self.backoff.next_delay();
            warn!(
                attempt = self.backoff.attempt(),
                delay_ms = delay.as_millis() as u64,
                "Push channel disconnected: {}",
                reason
            );

            let wait = sleep(delay);
            tokio::pin!(wait);
            let stopped = loop {
                tokio::select! {
                    () = &mut wait => break false,
                    command = self.commands.recv() => {
                        if matches!(command, Some(Command::Stop) | None) {
                            break true;
                        }
                    }
                }
            };
            if stopped {
                break;
            }
        }

        self.set_state(ChannelState::Disconnected);
        info!("Push channel stopped");
    }

    #[instrument(skip_all, fields(generation = tracing::field::Empty))]
    async fn run_session(&mut self, transport: &mut C::Transport) -> SessionEnd {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::Span::current().record("generation", generation);
        self.set_state(ChannelState::Connected);
        info!("Push channel connected");

        let mut pending: HashMap<u64, (SubscriptionOp, Topic)> = HashMap::new();
        lock(&self.table).reset_connection();
        self.set_state(ChannelState::Resubscribing);
        if let Err(e) = self.reconcile(transport, &mut pending).await {
            return SessionEnd::Lost(e.to_string());
        }

        let ack_deadline = sleep_until(Instant::now() + self.config.ack_timeout);
        tokio::pin!(ack_deadline);
        let heartbeat = self.config.heartbeat_interval;
        let mut heartbeat_timer = interval_at(Instant::now() + heartbeat, heartbeat);
        heartbeat_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_inbound = Instant::now();
        let mut active = false;

        loop {
            if !active && pending.is_empty() {
                active = true;
                if let Err(e) = self.activate(transport, &mut pending).await {
                    return SessionEnd::Lost(e.to_string());
                }
            }

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Stop) | None => return SessionEnd::Stopped,
                    Some(Command::Start) => {}
                    Some(Command::Sync) => {
                        // Changes made while resubscribing are picked up on activation
                        if active {
                            if let Err(e) = self.reconcile(transport, &mut pending).await {
                                return SessionEnd::Lost(e.to_string());
                            }
                        }
                    }
                },
                () = &mut ack_deadline, if !active => {
                    warn!(unacked = pending.len(), "Subscription acks timed out");
                    active = true;
                    if let Err(e) = self.activate(transport, &mut pending).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                _ = heartbeat_timer.tick() => {
                    if last_inbound.elapsed() >= heartbeat * 2 {
                        return SessionEnd::Lost("no inbound traffic".to_string());
                    }
                    if let Err(e) = transport.send(Message::Ping(Vec::new())).await {
                        return SessionEnd::Lost(e.to_string());
                    }
                }
                message = transport.next_raw() => match message {
                    None => return SessionEnd::Lost("connection closed by server".to_string()),
                    Some(Err(e)) => return SessionEnd::Lost(e.to_string()),
                    Some(Ok(message)) => {
                        last_inbound = Instant::now();
                        self.handle_message(message, generation, &mut pending).await;
                    }
                },
            }
        }
    }

    async fn activate(
        &mut self,
        transport: &mut C::Transport,
        pending: &mut HashMap<u64, (SubscriptionOp, Topic)>,
    ) -> Result<(), OpenApiError> {
        self.set_state(ChannelState::Active);
        self.reconcile(transport, pending).await
    }

    /// Send one message per topic whose desired state differs from the
    /// server's projected state
    async fn reconcile(
        &mut self,
        transport: &mut C::Transport,
        pending: &mut HashMap<u64, (SubscriptionOp, Topic)>,
    ) -> Result<(), OpenApiError> {
        let changes = lock(&self.table).take_changes();

        for (op, topic) in changes {
            self.next_request_id += 1;
            let id = self.next_request_id;
            let message = self.codec.encode_request(op, id, &[topic])?;
            transport.send(message).await?;
            pending.insert(id, (op, topic));
            debug!(id, ?op, %topic, "Sent subscription request");
        }

        Ok(())
    }

    async fn handle_message(
        &mut self,
        message: Message,
        generation: u64,
        pending: &mut HashMap<u64, (SubscriptionOp, Topic)>,
    ) {
        let frame = match self.codec.decode_message(message) {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                warn!("Dropping push frame: {}", e);
                return;
            }
        };

        match frame {
            Frame::Ack { id, code, message } => match pending.remove(&id) {
                Some((op, topic)) if code == 0 => {
                    lock(&self.table).confirm(op, topic);
                    debug!(id, ?op, %topic, "Subscription acknowledged");
                }
                Some((op, topic)) => {
                    warn!(id, ?op, %topic, code, %message, "Subscription rejected");
                }
                None => debug!(id, "Ack for unknown request"),
            },
            Frame::Error { code, message } => {
                warn!(code, %message, "Push channel error from server");
            }
            frame @ Frame::Push { .. } => {
                trace!(generation, "Forwarding push frame");
                if self.events.send(Envelope { generation, frame }).await.is_err() {
                    debug!("Push queue closed, dropping frame");
                }
            }
        }
    }

    fn set_state(&self, state: ChannelState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Push channel state changed");
        }
    }
}

use crate::core::kernel::codec::Frame;
use crate::core::types::{EventKind, PushEvent, PushOrderChanged};
use crate::trade::channel::Envelope;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

pub type OrderChangedHandler = Arc<dyn Fn(PushOrderChanged) + Send + Sync>;

/// One optional handler per event kind; the last registration wins
#[derive(Default)]
pub struct CallbackRegistry {
    order_changed: RwLock<Option<OrderChangedHandler>>,
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("order_changed", &self.has_handler(EventKind::OrderChanged))
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_order_changed<F>(&self, handler: F)
    where
        F: Fn(PushOrderChanged) + Send + Sync + 'static,
    {
        *self
            .order_changed
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    pub fn clear_on_order_changed(&self) {
        *self
            .order_changed
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    pub fn has_handler(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::OrderChanged => self.order_changed_handler().is_some(),
        }
    }

    fn order_changed_handler(&self) -> Option<OrderChangedHandler> {
        self.order_changed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// What happened to one envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler was invoked (even if it panicked)
    Delivered,
    /// The event decoded but nobody is registered for it
    NoHandler,
    /// The envelope came from a superseded connection
    Stale,
    /// Not a push, unknown event kind, or undecodable payload
    Dropped,
}

/// Routes push frames to the registered callbacks
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    registry: Arc<CallbackRegistry>,
    generation: Arc<AtomicU64>,
}

impl EventDispatcher {
    pub fn new(registry: Arc<CallbackRegistry>, generation: Arc<AtomicU64>) -> Self {
        Self {
            registry,
            generation,
        }
    }

    /// Drain `queue` on a new task until every sender is gone
    pub fn spawn(self, mut queue: mpsc::Receiver<Envelope>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(envelope) = queue.recv().await {
                let outcome = self.dispatch(envelope);
                trace!(?outcome, "Dispatched push envelope");
            }
            debug!("Push queue closed, dispatcher exiting");
        })
    }

    pub fn dispatch(&self, envelope: Envelope) -> DispatchOutcome {
        let current = self.generation.load(Ordering::SeqCst);
        if envelope.generation < current {
            debug!(
                generation = envelope.generation,
                current, "Dropping frame from a previous connection"
            );
            return DispatchOutcome::Stale;
        }

        match Self::decode(envelope.frame) {
            Some(event) => self.deliver(event),
            None => DispatchOutcome::Dropped,
        }
    }

    fn decode(frame: Frame) -> Option<PushEvent> {
        let Frame::Push { topic, event, data } = frame else {
            return None;
        };

        let Some(kind) = EventKind::from_wire(&event) else {
            debug!(%topic, %event, "Ignoring unknown push event");
            return None;
        };

        match kind {
            EventKind::OrderChanged => match serde_json::from_value::<PushOrderChanged>(data) {
                Ok(order) => Some(PushEvent::OrderChanged(order)),
                Err(e) => {
                    warn!(%topic, %event, "Undecodable push payload: {}", e);
                    None
                }
            },
        }
    }

    fn deliver(&self, event: PushEvent) -> DispatchOutcome {
        match event {
            PushEvent::OrderChanged(order) => {
                // The registry lock is released before the handler runs
                let Some(handler) = self.registry.order_changed_handler() else {
                    debug!(order_id = %order.order_id, "No handler for order_changed");
                    return DispatchOutcome::NoHandler;
                };

                let order_id = order.order_id.clone();
                if catch_unwind(AssertUnwindSafe(|| handler(order))).is_err() {
                    error!(%order_id, "order_changed handler panicked");
                }
                DispatchOutcome::Delivered
            }
        }
    }
}

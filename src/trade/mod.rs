//! Trading session: push subscriptions, event routing and the facade
//! application code talks to.

pub mod channel;
pub mod context;
pub mod dispatcher;
pub mod subscriptions;

pub use channel::{ChannelConfig, ChannelState, Envelope, SubscriptionChannel};
pub use context::TradeContext;
pub use dispatcher::{CallbackRegistry, DispatchOutcome, EventDispatcher, OrderChangedHandler};
pub use subscriptions::{SubscriptionState, SubscriptionTable};

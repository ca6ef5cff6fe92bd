pub mod blocking;
pub mod core;
pub mod trade;

pub use crate::core::config::{Config, ConfigError, Language};
pub use crate::core::errors::OpenApiError;
pub use crate::core::types::*;
pub use blocking::TradeContextSync;
pub use trade::{ChannelConfig, ChannelState, TradeContext};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Push subscription category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum Topic {
    /// Private notification for trade (order and account events)
    Private,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Private => "private",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declares a wire-string enum with an `Unknown` fallback, so a value the
/// gateway adds later never fails decoding of the surrounding message.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $wire:literal,)+ }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub enum $name {
            #[default]
            Unknown,
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    Self::Unknown => "Unknown",
                    $(Self::$variant => $wire,)+
                }
            }

            pub fn from_wire(value: &str) -> Self {
                match value {
                    $($wire => Self::$variant,)+
                    _ => Self::Unknown,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                Ok(Self::from_wire(&value))
            }
        }
    };
}

wire_enum! {
    /// Order side
    OrderSide {
        Buy => "Buy",
        Sell => "Sell",
    }
}

wire_enum! {
    /// Order type
    #[allow(clippy::upper_case_acronyms)]
    OrderType {
        /// Limit Order
        LO => "LO",
        /// Enhanced Limit Order
        ELO => "ELO",
        /// Market Order
        MO => "MO",
        /// At-auction Order
        AO => "AO",
        /// At-auction Limit Order
        ALO => "ALO",
        /// Odd Lots
        ODD => "ODD",
        /// Limit If Touched
        LIT => "LIT",
        /// Market If Touched
        MIT => "MIT",
        /// Trailing Limit If Touched (Trailing Amount)
        TSLPAMT => "TSLPAMT",
        /// Trailing Limit If Touched (Trailing Percent)
        TSLPPCT => "TSLPPCT",
        /// Trailing Market If Touched (Trailing Amount)
        TSMAMT => "TSMAMT",
        /// Trailing Market If Touched (Trailing Percent)
        TSMPCT => "TSMPCT",
        /// Special Limit Order
        SLO => "SLO",
    }
}

wire_enum! {
    /// Order status
    OrderStatus {
        NotReported => "NotReported",
        ReplacedNotReported => "ReplacedNotReported",
        ProtectedNotReported => "ProtectedNotReported",
        VarietiesNotReported => "VarietiesNotReported",
        Filled => "FilledStatus",
        WaitToNew => "WaitToNew",
        New => "NewStatus",
        WaitToReplace => "WaitToReplace",
        PendingReplace => "PendingReplaceStatus",
        Replaced => "ReplacedStatus",
        PartialFilled => "PartialFilledStatus",
        WaitToCancel => "WaitToCancel",
        PendingCancel => "PendingCancelStatus",
        Rejected => "RejectedStatus",
        Canceled => "CanceledStatus",
        Expired => "ExpiredStatus",
        PartialWithdrawal => "PartialWithdrawal",
    }
}

impl OrderStatus {
    /// No further status changes will be pushed for this order
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Rejected | Self::Canceled | Self::Expired | Self::PartialWithdrawal
        )
    }
}

wire_enum! {
    /// Order tag
    OrderTag {
        Normal => "Normal",
        /// Long term order
        LongTerm => "GTC",
        Grey => "Grey",
        /// Force selling
        MarginCall => "MarginCall",
        /// OTC
        Offline => "Offline",
        /// Option exercise long
        Creditor => "Creditor",
        /// Option exercise short
        Debtor => "Debtor",
        /// Waiver of option exercise
        NonExercise => "NonExercise",
        /// Trade allocation
        AllocatedSub => "AllocatedSub",
    }
}

wire_enum! {
    /// Conditional order trigger status
    TriggerStatus {
        Deactive => "DEACTIVE",
        Active => "ACTIVE",
        Released => "RELEASED",
    }
}

wire_enum! {
    /// Time in force
    TimeInForce {
        Day => "Day",
        GoodTilCanceled => "GTC",
        GoodTilDate => "GTD",
    }
}

/// Order changed push message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOrderChanged {
    pub side: OrderSide,
    #[serde(default)]
    pub stock_name: String,
    #[serde(with = "wire::int")]
    pub submitted_quantity: i64,
    pub symbol: String,
    pub order_type: OrderType,
    #[serde(default, with = "wire::decimal")]
    pub submitted_price: Decimal,
    #[serde(default, with = "wire::int")]
    pub executed_quantity: i64,
    #[serde(default, with = "wire::opt_decimal")]
    pub executed_price: Option<Decimal>,
    pub order_id: String,
    #[serde(default)]
    pub currency: String,
    pub status: OrderStatus,
    #[serde(with = "wire::timestamp")]
    pub submitted_at: DateTime<Utc>,
    #[serde(with = "wire::timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "wire::opt_decimal")]
    pub trigger_price: Option<Decimal>,
    /// Rejected message or remark
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub tag: OrderTag,
    #[serde(default)]
    pub trigger_status: Option<TriggerStatus>,
    #[serde(default, with = "wire::opt_timestamp")]
    pub trigger_at: Option<DateTime<Utc>>,
    #[serde(default, with = "wire::opt_decimal")]
    pub trailing_amount: Option<Decimal>,
    #[serde(default, with = "wire::opt_decimal")]
    pub trailing_percent: Option<Decimal>,
    #[serde(default, with = "wire::opt_decimal")]
    pub limit_offset: Option<Decimal>,
    #[serde(default)]
    pub account_no: String,
    #[serde(default, with = "wire::opt_decimal")]
    pub last_share: Option<Decimal>,
    #[serde(default, with = "wire::opt_decimal")]
    pub last_price: Option<Decimal>,
    #[serde(default)]
    pub remark: String,
}

/// Kind of push event, used as the callback registry key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum EventKind {
    OrderChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderChanged => "order_changed",
        }
    }

    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "order_changed" => Some(Self::OrderChanged),
            _ => None,
        }
    }
}

/// Push event delivered to application callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum PushEvent {
    OrderChanged(PushOrderChanged),
}

impl PushEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::OrderChanged(_) => EventKind::OrderChanged,
        }
    }
}

/// Options for submitting an order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitOrderOptions {
    pub symbol: String,
    pub order_type: OrderType,
    pub side: OrderSide,
    #[serde(serialize_with = "wire::int_as_str")]
    pub submitted_quantity: i64,
    pub time_in_force: TimeInForce,
    pub account_no: String,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::str_option"
    )]
    pub submitted_price: Option<Decimal>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        with = "rust_decimal::serde::str_option"
    )]
    pub trigger_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

impl SubmitOrderOptions {
    /// A day market order, the minimal order shape
    pub fn market(
        symbol: impl Into<String>,
        side: OrderSide,
        quantity: i64,
        account_no: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            order_type: OrderType::MO,
            side,
            submitted_quantity: quantity,
            time_in_force: TimeInForce::Day,
            account_no: account_no.into(),
            submitted_price: None,
            trigger_price: None,
            remark: None,
        }
    }

    pub fn limit(mut self, price: Decimal) -> Self {
        self.order_type = OrderType::LO;
        self.submitted_price = Some(price);
        self
    }

    pub fn time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = time_in_force;
        self
    }

    pub fn remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }
}

/// Synchronous acknowledgement of an accepted order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOrderResponse {
    pub order_id: String,
}

/// Lenient field codecs: the gateway sends numbers either as JSON numbers or
/// strings, and uses empty strings for absent optional values.
mod wire {
    use serde::{Deserialize, Deserializer, Serializer};
    use serde_json::Value;

    fn scalar_text(value: Value) -> Result<Option<String>, String> {
        match value {
            Value::Null => Ok(None),
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => Ok(Some(s.trim().to_string())),
            Value::Number(n) => Ok(Some(n.to_string())),
            other => Err(format!("expected number or string, got {}", other)),
        }
    }

    pub fn int_as_str<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub mod int {
        use super::*;
        use serde::de::Error as _;

        pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
            int_as_str(value, serializer)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
            match scalar_text(Value::deserialize(deserializer)?).map_err(D::Error::custom)? {
                None => Ok(0),
                Some(text) => text.parse().map_err(D::Error::custom),
            }
        }
    }

    pub mod decimal {
        use super::*;
        use rust_decimal::Decimal;

        pub fn serialize<S: Serializer>(
            value: &Decimal,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            serializer.collect_str(value)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Decimal, D::Error> {
            super::opt_decimal::deserialize(deserializer).map(Option::unwrap_or_default)
        }
    }

    pub mod opt_decimal {
        use super::*;
        use serde::de::Error as _;
        use rust_decimal::Decimal;
        use std::str::FromStr;

        pub fn serialize<S: Serializer>(
            value: &Option<Decimal>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.collect_str(value),
                None => serializer.serialize_str(""),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Decimal>, D::Error> {
            scalar_text(Value::deserialize(deserializer)?)
                .map_err(D::Error::custom)?
                .map(|text| Decimal::from_str(&text).map_err(D::Error::custom))
                .transpose()
        }
    }

    pub mod timestamp {
        use super::*;
        use serde::de::Error as _;
        use chrono::{DateTime, Utc};

        pub fn serialize<S: Serializer>(
            value: &DateTime<Utc>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            serializer.serialize_i64(value.timestamp())
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<DateTime<Utc>, D::Error> {
            super::opt_timestamp::deserialize(deserializer)?
                .ok_or_else(|| D::Error::custom("missing timestamp"))
        }
    }

    pub mod opt_timestamp {
        use super::*;
        use serde::de::Error as _;
        use chrono::{DateTime, Utc};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(value) => serializer.serialize_i64(value.timestamp()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            let Some(text) =
                scalar_text(Value::deserialize(deserializer)?).map_err(D::Error::custom)?
            else {
                return Ok(None);
            };
            let secs: i64 = text.parse().map_err(D::Error::custom)?;
            // Zero is the gateway's "not set"
            if secs == 0 {
                return Ok(None);
            }
            DateTime::from_timestamp(secs, 0)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {}", secs)))
        }
    }
}

//! Exchange Client Trait
//!
//! This module defines the `ExchangeClient` trait, the translation layer between the
//! reconciliation engine and a spot exchange. The engine only ever sees the types
//! declared here, which keeps it independent of any exchange's wire format and lets
//! tests drive it with an in-memory exchange.

use crate::domain::entities::order::{OrderSide, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Common result type for exchange operations
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Errors that can occur during exchange operations.
///
/// All of them are transient from the engine's point of view: the step that hit
/// one is skipped and retried on the next cycle.
#[derive(Debug, Clone, Error)]
pub enum ExchangeError {
    /// Transport failure or timeout
    #[error("Network error: {0}")]
    Network(String),

    /// The exchange answered with an error payload
    #[error("Exchange error {code}: {msg}")]
    Api { code: i64, msg: String },

    /// Non-success HTTP status without a parsable error payload
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Authentication error
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Invalid order parameters
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    /// The response could not be understood
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// Free and locked amounts of one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    pub asset: String,
    pub free: Decimal,
    pub locked: Decimal,
}

impl Balance {
    pub fn zero(asset: &str) -> Self {
        Self {
            asset: asset.to_string(),
            free: Decimal::ZERO,
            locked: Decimal::ZERO,
        }
    }

    pub fn total(&self) -> Decimal {
        self.free + self.locked
    }
}

/// Authoritative view of one order as reported by the exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderReport {
    pub exchange_order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub status: OrderStatus,
    /// Limit price as accepted by the exchange (after tick rounding)
    pub price: Decimal,
    /// Quantity as accepted by the exchange (after lot rounding)
    pub orig_quantity: Decimal,
    pub executed_quantity: Decimal,
    pub cumulative_quote_quantity: Decimal,
    pub updated_at: DateTime<Utc>,
}

impl OrderReport {
    /// Volume-weighted execution price, or the limit price when nothing executed.
    pub fn average_fill_price(&self) -> Decimal {
        if self.executed_quantity > Decimal::ZERO && self.cumulative_quote_quantity > Decimal::ZERO {
            self.cumulative_quote_quantity / self.executed_quantity
        } else {
            self.price
        }
    }

    /// Executed quantity, or the ordered quantity when the exchange reported none.
    pub fn filled_quantity(&self) -> Decimal {
        if self.executed_quantity > Decimal::ZERO {
            self.executed_quantity
        } else {
            self.orig_quantity
        }
    }
}

/// Entry of the exchange's open-orders listing.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub exchange_order_id: i64,
    pub status: OrderStatus,
}

/// Exchange client trait providing the operations the engine depends on
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Get the name of this exchange
    fn name(&self) -> &str;

    /// Whether orders go to a test environment
    fn is_test(&self) -> bool;

    /// Last traded price for a symbol
    async fn current_price(&self, symbol: &str) -> ExchangeResult<Decimal>;

    /// Place a good-till-canceled limit order.
    ///
    /// The exchange may round `price` and `quantity`; the returned report carries
    /// the accepted values.
    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    ) -> ExchangeResult<OrderReport>;

    /// Current state of an order
    async fn order_status(&self, symbol: &str, exchange_order_id: i64) -> ExchangeResult<OrderReport>;

    /// Cancel a resting order
    async fn cancel_order(&self, symbol: &str, exchange_order_id: i64) -> ExchangeResult<()>;

    /// Balance of one asset; an asset absent from the account is a zero balance
    async fn account_balance(&self, asset: &str) -> ExchangeResult<Balance>;

    /// Orders still resting on the book for a symbol
    async fn list_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<OpenOrder>>;
}

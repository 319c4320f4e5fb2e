//! Database Models
//!
//! Row structs for orders, trades and the bot state, and their mapping onto the
//! domain entities. Decimal values are stored as TEXT so they round-trip exactly.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

use crate::domain::entities::bot_state::BotState;
use crate::domain::entities::order::Order;
use crate::domain::entities::trade::Trade;
use crate::domain::repositories::trading_store::StoreError;

/// Order record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OrderRecord {
    pub id: i64,
    pub exchange_order_id: i64,
    pub symbol: String,
    pub side: String, // "BUY" or "SELL"
    pub price: String,
    pub quantity: String,
    pub quote_quantity: String,
    pub status: String,
    pub is_test: bool,
    pub trade_id: Option<i64>,
    pub placed_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
}

/// Trade record in database
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TradeRecord {
    pub id: i64,
    pub buy_order_id: i64,
    pub sell_order_id: Option<i64>,
    pub symbol: String,
    pub buy_price: String,
    pub buy_quantity: String,
    pub sell_price_target: String,
    pub actual_sell_price: Option<String>,
    pub status: String, // "OPEN", "SOLD", "CANCELED" or "ERROR"
    pub profit: Option<String>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_status_update: DateTime<Utc>,
}

/// The single bot state row
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BotStateRecord {
    pub id: i64,
    pub initial_capital: String,
    pub current_quote_balance: String,
    pub current_base_balance: String,
    pub total_invested: String,
    pub total_profit: String,
    pub initial_buy_orders_placed_count: i64,
    pub last_initial_buy_at: Option<DateTime<Utc>>,
    pub is_initial_buying_complete: bool,
    pub last_cycle_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn decimal(field: &str, value: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(value)
        .map_err(|e| StoreError::Corrupt(format!("{} = '{}': {}", field, value, e)))
}

fn optional_decimal(field: &str, value: Option<&str>) -> Result<Option<Decimal>, StoreError> {
    value.map(|v| decimal(field, v)).transpose()
}

impl TryFrom<OrderRecord> for Order {
    type Error = StoreError;

    fn try_from(record: OrderRecord) -> Result<Self, Self::Error> {
        Ok(Order {
            id: record.id,
            exchange_order_id: record.exchange_order_id,
            side: record.side.parse().map_err(StoreError::Corrupt)?,
            price: decimal("price", &record.price)?,
            quantity: decimal("quantity", &record.quantity)?,
            quote_quantity: decimal("quote_quantity", &record.quote_quantity)?,
            status: record.status.parse().map_err(StoreError::Corrupt)?,
            symbol: record.symbol,
            is_test: record.is_test,
            trade_id: record.trade_id,
            placed_at: record.placed_at,
            executed_at: record.executed_at,
            last_updated_at: record.last_updated_at,
        })
    }
}

impl TryFrom<TradeRecord> for Trade {
    type Error = StoreError;

    fn try_from(record: TradeRecord) -> Result<Self, Self::Error> {
        Ok(Trade {
            id: record.id,
            buy_order_id: record.buy_order_id,
            sell_order_id: record.sell_order_id,
            buy_price: decimal("buy_price", &record.buy_price)?,
            buy_quantity: decimal("buy_quantity", &record.buy_quantity)?,
            sell_price_target: decimal("sell_price_target", &record.sell_price_target)?,
            actual_sell_price: optional_decimal(
                "actual_sell_price",
                record.actual_sell_price.as_deref(),
            )?,
            status: record.status.parse().map_err(StoreError::Corrupt)?,
            profit: optional_decimal("profit", record.profit.as_deref())?,
            symbol: record.symbol,
            opened_at: record.opened_at,
            closed_at: record.closed_at,
            last_status_update: record.last_status_update,
        })
    }
}

impl TryFrom<BotStateRecord> for BotState {
    type Error = StoreError;

    fn try_from(record: BotStateRecord) -> Result<Self, Self::Error> {
        let count = u32::try_from(record.initial_buy_orders_placed_count).map_err(|_| {
            StoreError::Corrupt(format!(
                "initial_buy_orders_placed_count = {}",
                record.initial_buy_orders_placed_count
            ))
        })?;

        Ok(BotState {
            initial_capital: decimal("initial_capital", &record.initial_capital)?,
            current_quote_balance: decimal("current_quote_balance", &record.current_quote_balance)?,
            current_base_balance: decimal("current_base_balance", &record.current_base_balance)?,
            total_invested: decimal("total_invested", &record.total_invested)?,
            total_profit: decimal("total_profit", &record.total_profit)?,
            initial_buy_orders_placed_count: count,
            last_initial_buy_at: record.last_initial_buy_at,
            is_initial_buying_complete: record.is_initial_buying_complete,
            last_cycle_at: record.last_cycle_at,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

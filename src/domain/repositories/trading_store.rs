//! Trading Store Trait
//!
//! Durable storage for orders, trades and the bot state aggregate. Every write is
//! atomic on its own; the engine never needs a transaction spanning several calls.

use crate::domain::entities::bot_state::BotState;
use crate::domain::entities::order::{NewOrder, Order, OrderSide};
use crate::domain::entities::trade::{NewTrade, Trade, TradeStatus};
use async_trait::async_trait;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Query error: {0}")]
    Query(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    /// A stored value could not be mapped back onto the domain type
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

#[async_trait]
pub trait TradingStore: Send + Sync {
    async fn create_order(&self, order: NewOrder) -> StoreResult<Order>;

    /// Persist the mutable fields (status and timestamps) of an order.
    async fn update_order_by_exchange_id(&self, order: &Order) -> StoreResult<()>;

    async fn get_order_by_exchange_id(&self, exchange_order_id: i64) -> StoreResult<Option<Order>>;

    /// Orders of one side that are not in a terminal status, oldest first.
    async fn list_active_orders(&self, side: OrderSide) -> StoreResult<Vec<Order>>;

    /// Most recent SELL order recorded for a trade, linked or not.
    async fn get_sell_order_for_trade(&self, trade_id: i64) -> StoreResult<Option<Order>>;

    async fn create_trade(&self, trade: NewTrade) -> StoreResult<Trade>;

    /// Persist the mutable fields of a trade. An already stored sell order ID is
    /// never overwritten.
    async fn update_trade_by_id(&self, trade: &Trade) -> StoreResult<()>;

    /// Trades in a status, oldest first.
    async fn list_trades_by_status(&self, status: TradeStatus) -> StoreResult<Vec<Trade>>;

    /// FILLED buy orders that no trade references yet.
    async fn list_filled_buys_without_trade(&self) -> StoreResult<Vec<Order>>;

    async fn get_bot_state(&self) -> StoreResult<Option<BotState>>;

    async fn upsert_bot_state(&self, state: &BotState) -> StoreResult<()>;
}

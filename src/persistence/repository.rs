//! Database Repository
//!
//! Data access layer for orders, trades and the bot state.

use super::models::*;
use super::DbPool;
use async_trait::async_trait;
use tracing::{debug, error};

use crate::domain::entities::bot_state::BotState;
use crate::domain::entities::order::{NewOrder, Order, OrderSide};
use crate::domain::entities::trade::{NewTrade, Trade, TradeStatus};
use crate::domain::repositories::trading_store::{StoreError, StoreResult, TradingStore};

fn query_error(context: &str, e: sqlx::Error) -> StoreError {
    error!("{}: {}", context, e);
    StoreError::Query(format!("{}: {}", context, e))
}

/// Order repository
pub struct OrderRepository {
    pool: DbPool,
}

impl OrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a newly placed order
    pub async fn create(&self, order: NewOrder) -> StoreResult<Order> {
        let record = sqlx::query_as::<_, OrderRecord>(
            r#"
            INSERT INTO orders (
                exchange_order_id, symbol, side, price, quantity, quote_quantity,
                status, is_test, trade_id, placed_at, executed_at, last_updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?10)
            RETURNING *
            "#,
        )
        .bind(order.exchange_order_id)
        .bind(&order.symbol)
        .bind(order.side.as_str())
        .bind(order.price.to_string())
        .bind(order.quantity.to_string())
        .bind(order.quote_quantity().to_string())
        .bind(order.status.as_str())
        .bind(order.is_test)
        .bind(order.trade_id)
        .bind(order.placed_at)
        .bind(order.executed_at())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_error("Failed to create order", e))?;

        debug!(
            "Created order: {} ({} {})",
            record.exchange_order_id, record.side, record.symbol
        );
        Order::try_from(record)
    }

    /// Get order by exchange ID
    pub async fn get_by_exchange_id(&self, exchange_order_id: i64) -> StoreResult<Option<Order>> {
        let record = sqlx::query_as::<_, OrderRecord>(
            "SELECT * FROM orders WHERE exchange_order_id = ?1",
        )
        .bind(exchange_order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("Failed to get order", e))?;

        record.map(Order::try_from).transpose()
    }

    /// Latest SELL order recorded for a trade
    pub async fn get_sell_for_trade(&self, trade_id: i64) -> StoreResult<Option<Order>> {
        let record = sqlx::query_as::<_, OrderRecord>(
            r#"
            SELECT * FROM orders
            WHERE side = 'SELL' AND trade_id = ?1
            ORDER BY placed_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(trade_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| query_error("Failed to get sell order of trade", e))?;

        record.map(Order::try_from).transpose()
    }

    /// Write status and timestamps of an existing order
    pub async fn update_status(&self, order: &Order) -> StoreResult<()> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE orders
            SET status = ?1, executed_at = ?2, last_updated_at = ?3
            WHERE exchange_order_id = ?4
            "#,
        )
        .bind(order.status.as_str())
        .bind(order.executed_at)
        .bind(order.last_updated_at)
        .bind(order.exchange_order_id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to update order", e))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::NotFound(format!(
                "order {}",
                order.exchange_order_id
            )));
        }

        debug!("Updated order {} to {}", order.exchange_order_id, order.status);
        Ok(())
    }

    /// Non-terminal orders of one side, oldest first
    pub async fn get_active_by_side(&self, side: OrderSide) -> StoreResult<Vec<Order>> {
        let records = sqlx::query_as::<_, OrderRecord>(
            r#"
            SELECT * FROM orders
            WHERE side = ?1 AND status IN ('NEW', 'PARTIALLY_FILLED', 'PENDING_CANCEL')
            ORDER BY placed_at ASC, id ASC
            "#,
        )
        .bind(side.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to list active orders", e))?;

        records.into_iter().map(Order::try_from).collect()
    }

    /// Filled buys no trade points to yet
    pub async fn get_filled_buys_without_trade(&self) -> StoreResult<Vec<Order>> {
        let records = sqlx::query_as::<_, OrderRecord>(
            r#"
            SELECT o.* FROM orders o
            LEFT JOIN trades t ON t.buy_order_id = o.exchange_order_id
            WHERE o.side = 'BUY' AND o.status = 'FILLED' AND t.id IS NULL
            ORDER BY o.placed_at ASC, o.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to list filled buys", e))?;

        records.into_iter().map(Order::try_from).collect()
    }
}

/// Trade repository
pub struct TradeRepository {
    pool: DbPool,
}

impl TradeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Open a trade
    pub async fn create(&self, trade: NewTrade) -> StoreResult<Trade> {
        let record = sqlx::query_as::<_, TradeRecord>(
            r#"
            INSERT INTO trades (
                buy_order_id, symbol, buy_price, buy_quantity, sell_price_target,
                status, opened_at, last_status_update
            )
            VALUES (?1, ?2, ?3, ?4, ?5, 'OPEN', ?6, ?6)
            RETURNING *
            "#,
        )
        .bind(trade.buy_order_id)
        .bind(&trade.symbol)
        .bind(trade.buy_price.to_string())
        .bind(trade.buy_quantity.to_string())
        .bind(trade.sell_price_target.to_string())
        .bind(trade.opened_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| query_error("Failed to create trade", e))?;

        debug!(
            "Created trade: {} for buy order {}",
            record.id, record.buy_order_id
        );
        Trade::try_from(record)
    }

    /// Write the mutable fields of a trade; a stored sell order ID is kept
    pub async fn update(&self, trade: &Trade) -> StoreResult<()> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE trades
            SET sell_order_id = COALESCE(sell_order_id, ?1),
                actual_sell_price = ?2,
                status = ?3,
                profit = ?4,
                closed_at = ?5,
                last_status_update = ?6
            WHERE id = ?7
            "#,
        )
        .bind(trade.sell_order_id)
        .bind(trade.actual_sell_price.map(|p| p.to_string()))
        .bind(trade.status.as_str())
        .bind(trade.profit.map(|p| p.to_string()))
        .bind(trade.closed_at)
        .bind(trade.last_status_update)
        .bind(trade.id)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to update trade", e))?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::NotFound(format!("trade {}", trade.id)));
        }

        debug!("Updated trade {} ({})", trade.id, trade.status);
        Ok(())
    }

    /// Trades in a status, oldest first
    pub async fn get_by_status(&self, status: TradeStatus) -> StoreResult<Vec<Trade>> {
        let records = sqlx::query_as::<_, TradeRecord>(
            "SELECT * FROM trades WHERE status = ?1 ORDER BY opened_at ASC, id ASC",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| query_error("Failed to list trades", e))?;

        records.into_iter().map(Trade::try_from).collect()
    }
}

/// Bot state repository
pub struct BotStateRepository {
    pool: DbPool,
}

impl BotStateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self) -> StoreResult<Option<BotState>> {
        let record = sqlx::query_as::<_, BotStateRecord>("SELECT * FROM bot_state WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| query_error("Failed to load bot state", e))?;

        record.map(BotState::try_from).transpose()
    }

    /// Insert or replace the single state row in one statement
    pub async fn upsert(&self, state: &BotState) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bot_state (
                id, initial_capital, current_quote_balance, current_base_balance,
                total_invested, total_profit, initial_buy_orders_placed_count,
                last_initial_buy_at, is_initial_buying_complete, last_cycle_at,
                created_at, updated_at
            )
            VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(id) DO UPDATE SET
                initial_capital = excluded.initial_capital,
                current_quote_balance = excluded.current_quote_balance,
                current_base_balance = excluded.current_base_balance,
                total_invested = excluded.total_invested,
                total_profit = excluded.total_profit,
                initial_buy_orders_placed_count = excluded.initial_buy_orders_placed_count,
                last_initial_buy_at = excluded.last_initial_buy_at,
                is_initial_buying_complete = excluded.is_initial_buying_complete,
                last_cycle_at = excluded.last_cycle_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(state.initial_capital.to_string())
        .bind(state.current_quote_balance.to_string())
        .bind(state.current_base_balance.to_string())
        .bind(state.total_invested.to_string())
        .bind(state.total_profit.to_string())
        .bind(i64::from(state.initial_buy_orders_placed_count))
        .bind(state.last_initial_buy_at)
        .bind(state.is_initial_buying_complete)
        .bind(state.last_cycle_at)
        .bind(state.created_at)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| query_error("Failed to save bot state", e))?;

        debug!(
            "Saved bot state ({} initial buys, profit {})",
            state.initial_buy_orders_placed_count, state.total_profit
        );
        Ok(())
    }
}

/// `TradingStore` backed by SQLite
pub struct SqliteTradingStore {
    orders: OrderRepository,
    trades: TradeRepository,
    bot_state: BotStateRepository,
}

impl SqliteTradingStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            orders: OrderRepository::new(pool.clone()),
            trades: TradeRepository::new(pool.clone()),
            bot_state: BotStateRepository::new(pool),
        }
    }
}

#[async_trait]
impl TradingStore for SqliteTradingStore {
    async fn create_order(&self, order: NewOrder) -> StoreResult<Order> {
        self.orders.create(order).await
    }

    async fn update_order_by_exchange_id(&self, order: &Order) -> StoreResult<()> {
        self.orders.update_status(order).await
    }

    async fn get_order_by_exchange_id(&self, exchange_order_id: i64) -> StoreResult<Option<Order>> {
        self.orders.get_by_exchange_id(exchange_order_id).await
    }

    async fn list_active_orders(&self, side: OrderSide) -> StoreResult<Vec<Order>> {
        self.orders.get_active_by_side(side).await
    }

    async fn get_sell_order_for_trade(&self, trade_id: i64) -> StoreResult<Option<Order>> {
        self.orders.get_sell_for_trade(trade_id).await
    }

    async fn create_trade(&self, trade: NewTrade) -> StoreResult<Trade> {
        self.trades.create(trade).await
    }

    async fn update_trade_by_id(&self, trade: &Trade) -> StoreResult<()> {
        self.trades.update(trade).await
    }

    async fn list_trades_by_status(&self, status: TradeStatus) -> StoreResult<Vec<Trade>> {
        self.trades.get_by_status(status).await
    }

    async fn list_filled_buys_without_trade(&self) -> StoreResult<Vec<Order>> {
        self.orders.get_filled_buys_without_trade().await
    }

    async fn get_bot_state(&self) -> StoreResult<Option<BotState>> {
        self.bot_state.get().await
    }

    async fn upsert_bot_state(&self, state: &BotState) -> StoreResult<()> {
        self.bot_state.upsert(state).await
    }
}

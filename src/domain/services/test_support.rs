//! In-memory exchange and fault-injecting store for engine tests.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::domain::entities::bot_state::BotState;
use crate::domain::entities::order::{NewOrder, Order, OrderSide, OrderStatus};
use crate::domain::entities::trade::{NewTrade, Trade, TradeStatus};
use crate::domain::repositories::exchange_client::{
    Balance, ExchangeClient, ExchangeError, ExchangeResult, OpenOrder, OrderReport,
};
use crate::domain::repositories::trading_store::{StoreError, StoreResult, TradingStore};
use crate::domain::services::placement::StrategyConfig;
use crate::persistence::repository::SqliteTradingStore;
use crate::persistence::{init_database, DatabaseConfig};

pub fn strategy_config() -> StrategyConfig {
    StrategyConfig {
        symbol: "BTCUSDT".to_string(),
        base_asset: "BTC".to_string(),
        quote_asset: "USDT".to_string(),
        initial_capital: dec!(100),
        order_amount: dec!(10),
        initial_buy_percentage: dec!(1),
        order_interval: Duration::minutes(2),
        buy_percentages: vec![dec!(1), dec!(2), dec!(5), dec!(10)],
        sell_profit_percentage: dec!(2),
        max_open_trades: 20,
        level_tolerance_percentage: dec!(0.5),
    }
}

pub async fn sqlite_store() -> SqliteTradingStore {
    let pool = init_database(&DatabaseConfig::in_memory()).await.unwrap();
    SqliteTradingStore::new(pool)
}

#[derive(Default)]
struct MockBook {
    price: Decimal,
    next_id: i64,
    orders: BTreeMap<i64, OrderReport>,
    balances: HashMap<String, Decimal>,
    fail_price: bool,
    fail_place: bool,
    fail_status: bool,
    fail_balance: bool,
    fail_open_orders: bool,
}

/// Exchange that keeps orders in memory and fills them only when told to.
///
/// Quantities are truncated to five decimals and prices rounded to two, like a
/// real lot/tick filter.
pub struct MockExchange {
    book: Mutex<MockBook>,
}

impl MockExchange {
    pub fn new(price: Decimal, quote_balance: Decimal) -> Self {
        let mut balances = HashMap::new();
        balances.insert("USDT".to_string(), quote_balance);
        Self {
            book: Mutex::new(MockBook {
                price,
                next_id: 1000,
                balances,
                ..MockBook::default()
            }),
        }
    }

    pub fn set_price(&self, price: Decimal) {
        self.book.lock().unwrap().price = price;
    }

    pub fn set_quote_balance(&self, amount: Decimal) {
        self.book
            .lock()
            .unwrap()
            .balances
            .insert("USDT".to_string(), amount);
    }

    pub fn fail_price(&self, fail: bool) {
        self.book.lock().unwrap().fail_price = fail;
    }

    pub fn fail_place(&self, fail: bool) {
        self.book.lock().unwrap().fail_place = fail;
    }

    pub fn fail_status(&self, fail: bool) {
        self.book.lock().unwrap().fail_status = fail;
    }

    pub fn fail_balance(&self, fail: bool) {
        self.book.lock().unwrap().fail_balance = fail;
    }

    pub fn fail_open_orders(&self, fail: bool) {
        self.book.lock().unwrap().fail_open_orders = fail;
    }

    /// Fully execute an order at its limit price.
    pub fn fill(&self, exchange_order_id: i64) {
        let mut book = self.book.lock().unwrap();
        let Some(order) = book.orders.get_mut(&exchange_order_id) else {
            panic!("unknown order {}", exchange_order_id);
        };
        order.status = OrderStatus::Filled;
        order.executed_quantity = order.orig_quantity;
        order.cumulative_quote_quantity = order.price * order.orig_quantity;
        order.updated_at = Utc::now();
        let (side, qty, quote) = (order.side, order.orig_quantity, order.cumulative_quote_quantity);
        match side {
            OrderSide::Buy => *book.balances.entry("BTC".to_string()).or_default() += qty,
            OrderSide::Sell => *book.balances.entry("USDT".to_string()).or_default() += quote,
        }
    }

    pub fn set_status(&self, exchange_order_id: i64, status: OrderStatus) {
        let mut book = self.book.lock().unwrap();
        if let Some(order) = book.orders.get_mut(&exchange_order_id) {
            order.status = status;
            order.updated_at = Utc::now();
        }
    }

    /// Put an order on the book that the bot never placed.
    pub fn inject_foreign_order(&self, side: OrderSide, price: Decimal, quantity: Decimal) -> i64 {
        let mut book = self.book.lock().unwrap();
        book.next_id += 1;
        let id = book.next_id;
        book.orders.insert(
            id,
            OrderReport {
                exchange_order_id: id,
                symbol: "BTCUSDT".to_string(),
                side,
                status: OrderStatus::New,
                price,
                orig_quantity: quantity,
                executed_quantity: Decimal::ZERO,
                cumulative_quote_quantity: Decimal::ZERO,
                updated_at: Utc::now(),
            },
        );
        id
    }

    pub fn orders(&self, side: OrderSide) -> Vec<OrderReport> {
        self.book
            .lock()
            .unwrap()
            .orders
            .values()
            .filter(|o| o.side == side)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    fn name(&self) -> &str {
        "MockExchange"
    }

    fn is_test(&self) -> bool {
        true
    }

    async fn current_price(&self, _symbol: &str) -> ExchangeResult<Decimal> {
        let book = self.book.lock().unwrap();
        if book.fail_price {
            return Err(ExchangeError::Network("price feed down".to_string()));
        }
        Ok(book.price)
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    ) -> ExchangeResult<OrderReport> {
        let mut book = self.book.lock().unwrap();
        if book.fail_place {
            return Err(ExchangeError::Api {
                code: -1013,
                msg: "Filter failure".to_string(),
            });
        }
        book.next_id += 1;
        let id = book.next_id;
        let price = price.round_dp(2);
        let quantity = quantity.round_dp_with_strategy(5, RoundingStrategy::ToZero);
        if side == OrderSide::Buy {
            *book.balances.entry("USDT".to_string()).or_default() -= price * quantity;
        }
        let report = OrderReport {
            exchange_order_id: id,
            symbol: symbol.to_string(),
            side,
            status: OrderStatus::New,
            price,
            orig_quantity: quantity,
            executed_quantity: Decimal::ZERO,
            cumulative_quote_quantity: Decimal::ZERO,
            updated_at: Utc::now(),
        };
        book.orders.insert(id, report.clone());
        Ok(report)
    }

    async fn order_status(&self, _symbol: &str, exchange_order_id: i64) -> ExchangeResult<OrderReport> {
        let book = self.book.lock().unwrap();
        if book.fail_status {
            return Err(ExchangeError::Network("timeout".to_string()));
        }
        book.orders
            .get(&exchange_order_id)
            .cloned()
            .ok_or(ExchangeError::Api {
                code: -2013,
                msg: "Order does not exist.".to_string(),
            })
    }

    async fn cancel_order(&self, _symbol: &str, exchange_order_id: i64) -> ExchangeResult<()> {
        self.set_status(exchange_order_id, OrderStatus::Canceled);
        Ok(())
    }

    async fn account_balance(&self, asset: &str) -> ExchangeResult<Balance> {
        let book = self.book.lock().unwrap();
        if book.fail_balance {
            return Err(ExchangeError::Network("timeout".to_string()));
        }
        Ok(Balance {
            asset: asset.to_string(),
            free: book.balances.get(asset).copied().unwrap_or_default(),
            locked: Decimal::ZERO,
        })
    }

    async fn list_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<OpenOrder>> {
        let book = self.book.lock().unwrap();
        if book.fail_open_orders {
            return Err(ExchangeError::Network("timeout".to_string()));
        }
        Ok(book
            .orders
            .values()
            .filter(|o| o.symbol == symbol && o.status.is_active())
            .map(|o| OpenOrder {
                exchange_order_id: o.exchange_order_id,
                status: o.status,
            })
            .collect())
    }
}

/// SQLite store whose individual operations can be switched to fail.
pub struct FlakyStore {
    inner: SqliteTradingStore,
    pub fail_create_order: AtomicBool,
    pub fail_update_trade: AtomicBool,
    pub fail_upsert_bot_state: AtomicBool,
}

impl FlakyStore {
    pub async fn new() -> Self {
        Self {
            inner: sqlite_store().await,
            fail_create_order: AtomicBool::new(false),
            fail_update_trade: AtomicBool::new(false),
            fail_upsert_bot_state: AtomicBool::new(false),
        }
    }

    fn check(flag: &AtomicBool, what: &str) -> StoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::Query(format!("{} failed: disk I/O error", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl TradingStore for FlakyStore {
    async fn create_order(&self, order: NewOrder) -> StoreResult<Order> {
        Self::check(&self.fail_create_order, "create_order")?;
        self.inner.create_order(order).await
    }

    async fn update_order_by_exchange_id(&self, order: &Order) -> StoreResult<()> {
        self.inner.update_order_by_exchange_id(order).await
    }

    async fn get_order_by_exchange_id(&self, exchange_order_id: i64) -> StoreResult<Option<Order>> {
        self.inner.get_order_by_exchange_id(exchange_order_id).await
    }

    async fn list_active_orders(&self, side: OrderSide) -> StoreResult<Vec<Order>> {
        self.inner.list_active_orders(side).await
    }

    async fn get_sell_order_for_trade(&self, trade_id: i64) -> StoreResult<Option<Order>> {
        self.inner.get_sell_order_for_trade(trade_id).await
    }

    async fn create_trade(&self, trade: NewTrade) -> StoreResult<Trade> {
        self.inner.create_trade(trade).await
    }

    async fn update_trade_by_id(&self, trade: &Trade) -> StoreResult<()> {
        Self::check(&self.fail_update_trade, "update_trade")?;
        self.inner.update_trade_by_id(trade).await
    }

    async fn list_trades_by_status(&self, status: TradeStatus) -> StoreResult<Vec<Trade>> {
        self.inner.list_trades_by_status(status).await
    }

    async fn list_filled_buys_without_trade(&self) -> StoreResult<Vec<Order>> {
        self.inner.list_filled_buys_without_trade().await
    }

    async fn get_bot_state(&self) -> StoreResult<Option<BotState>> {
        self.inner.get_bot_state().await
    }

    async fn upsert_bot_state(&self, state: &BotState) -> StoreResult<()> {
        Self::check(&self.fail_upsert_bot_state, "upsert_bot_state")?;
        self.inner.upsert_bot_state(state).await
    }
}

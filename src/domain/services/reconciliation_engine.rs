//! Reconciliation Engine
//!
//! Drives one trading cycle: it places staggered buys, opens trades for filled
//! buys, attaches and tracks profit-taking sells, folds exchange order statuses
//! back into local state, and finally persists the bot state.
//!
//! The exchange is the source of truth. Local records only ever change by
//! re-reading exchange state, so a cycle that is interrupted or hits a transient
//! error is repaired by the next one.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::domain::entities::bot_state::{BotState, INITIAL_BUY_TARGET};
use crate::domain::entities::order::{NewOrder, Order, OrderSide, OrderStatus};
use crate::domain::entities::trade::{Trade, TradeStatus};
use crate::domain::errors::{EngineError, LifecycleError};
use crate::domain::repositories::exchange_client::{ExchangeClient, OrderReport};
use crate::domain::repositories::trading_store::{StoreError, TradingStore};
use crate::domain::services::lifecycle;
use crate::domain::services::placement::{
    plan_additional_buy, plan_initial_buy, AdditionalBuyDecision, InitialBuyDecision, OrderPlan,
    StrategyConfig,
};
use crate::domain::services::pricing;

/// Steps of a cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleStep {
    BalanceRefresh,
    PriceFetch,
    InitialBuys,
    TradeOpening,
    SellReconciliation,
    OrderSweep,
    AdditionalBuys,
}

/// What a cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub buys_placed: usize,
    pub sells_placed: usize,
    pub trades_opened: usize,
    pub trades_sold: usize,
    pub status_updates: usize,
    pub inconsistencies: usize,
    pub realized_profit: Decimal,
    pub skipped_steps: Vec<CycleStep>,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            buys_placed: 0,
            sells_placed: 0,
            trades_opened: 0,
            trades_sold: 0,
            status_updates: 0,
            inconsistencies: 0,
            realized_profit: Decimal::ZERO,
            skipped_steps: Vec::new(),
        }
    }

    fn skip(&mut self, step: CycleStep) {
        if !self.skipped_steps.contains(&step) {
            self.skipped_steps.push(step);
        }
    }

    fn record_inconsistency(&mut self, err: &LifecycleError) {
        self.inconsistencies += 1;
        if err.is_critical() {
            error!("Inconsistency: {}", err);
        } else {
            debug!("Ignored benign inconsistency: {}", err);
        }
    }

    pub fn is_clean(&self) -> bool {
        self.inconsistencies == 0 && self.skipped_steps.is_empty()
    }
}

/// Single-owner engine holding the bot state aggregate between cycles.
pub struct ReconciliationEngine {
    exchange: Arc<dyn ExchangeClient>,
    store: Arc<dyn TradingStore>,
    config: StrategyConfig,
    state: BotState,
}

impl ReconciliationEngine {
    /// Load the bot state, creating it on first run.
    pub async fn load(
        exchange: Arc<dyn ExchangeClient>,
        store: Arc<dyn TradingStore>,
        config: StrategyConfig,
    ) -> Result<Self, EngineError> {
        let state = match store.get_bot_state().await.map_err(EngineError::BotStateLoad)? {
            Some(state) => {
                info!(
                    "Loaded bot state: {}/{} initial buys placed, total profit {}",
                    state.initial_buy_orders_placed_count, INITIAL_BUY_TARGET, state.total_profit
                );
                state
            }
            None => {
                let state = BotState::new(config.initial_capital, Utc::now());
                store
                    .upsert_bot_state(&state)
                    .await
                    .map_err(EngineError::BotStatePersistence)?;
                info!(
                    "Created bot state with initial capital {} {}",
                    config.initial_capital, config.quote_asset
                );
                state
            }
        };

        info!("Reconciliation engine ready on {} for {}", exchange.name(), config.symbol);

        Ok(Self {
            exchange,
            store,
            config,
            state,
        })
    }

    pub fn state(&self) -> &BotState {
        &self.state
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub async fn run_cycle(&mut self) -> Result<CycleReport, EngineError> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Run one full cycle as of `now`.
    ///
    /// Only a failure to persist the bot state is returned as an error; every
    /// other failure skips its step and shows up in the report.
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) -> Result<CycleReport, EngineError> {
        let mut report = CycleReport::new(now);
        debug!("Starting cycle for {}", self.config.symbol);

        self.refresh_balances(now, &mut report).await;

        let price = match self.exchange.current_price(&self.config.symbol).await {
            Ok(price) => Some(price),
            Err(e) => {
                warn!(
                    "Failed to fetch {} price, skipping buys this cycle: {}",
                    self.config.symbol, e
                );
                report.skip(CycleStep::PriceFetch);
                None
            }
        };

        match price {
            Some(price) => self.place_initial_buy(price, now, &mut report).await,
            None => report.skip(CycleStep::InitialBuys),
        }

        self.open_trades_for_filled_buys(now, &mut report).await;
        self.reconcile_open_trades(now, &mut report).await;
        self.sweep_open_orders(now, &mut report).await;

        match price {
            Some(price) => self.place_additional_buy(price, now, &mut report).await,
            None => report.skip(CycleStep::AdditionalBuys),
        }

        self.state.touch_cycle(now);
        self.store.upsert_bot_state(&self.state).await.map_err(|e| {
            error!("Failed to persist bot state: {}", e);
            EngineError::BotStatePersistence(e)
        })?;

        info!(
            "Cycle complete: {} buys, {} sells, {} trades opened, {} sold, {} status updates, {} inconsistencies",
            report.buys_placed,
            report.sells_placed,
            report.trades_opened,
            report.trades_sold,
            report.status_updates,
            report.inconsistencies
        );
        Ok(report)
    }

    async fn refresh_balances(&mut self, now: DateTime<Utc>, report: &mut CycleReport) {
        let quote = self.exchange.account_balance(&self.config.quote_asset).await;
        let base = self.exchange.account_balance(&self.config.base_asset).await;
        match (quote, base) {
            (Ok(quote), Ok(base)) => {
                debug!(
                    "Balances: {} {} free, {} {} total",
                    quote.free, quote.asset, base.total(), base.asset
                );
                self.state.refresh_balances(quote.free, base.total(), now);
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!("Failed to refresh balances, keeping projected values: {}", e);
                report.skip(CycleStep::BalanceRefresh);
            }
        }
    }

    async fn place_initial_buy(&mut self, price: Decimal, now: DateTime<Utc>, report: &mut CycleReport) {
        match plan_initial_buy(&self.state, &self.config, price, now) {
            InitialBuyDecision::Complete => {
                if !self.state.is_initial_buying_complete {
                    self.state.mark_initial_buying_complete(now);
                    info!("Initial buying phase complete");
                }
            }
            InitialBuyDecision::Waiting { next_at } => {
                debug!("Next initial buy not before {}", next_at);
            }
            InitialBuyDecision::InsufficientFunds { available, required } => {
                warn!(
                    "Insufficient {} for initial buy: {} available, {} required",
                    self.config.quote_asset, available, required
                );
            }
            InitialBuyDecision::InvalidPrice(price) => {
                warn!("Ignoring invalid price {} for initial buy", price);
                report.skip(CycleStep::InitialBuys);
            }
            InitialBuyDecision::Place(plan) => {
                if self.place_buy(&plan, report).await {
                    self.state.record_initial_buy(plan.quote_amount, now);
                    info!(
                        "Initial buy {}/{} placed at {}",
                        self.state.initial_buy_orders_placed_count, INITIAL_BUY_TARGET, plan.price
                    );
                    if self.state.is_initial_buying_complete {
                        info!("Initial buying phase complete");
                    }
                }
            }
        }
    }

    async fn place_additional_buy(&mut self, price: Decimal, now: DateTime<Utc>, report: &mut CycleReport) {
        if !self.state.is_initial_buying_complete {
            return;
        }

        let open_trades = match self.store.list_trades_by_status(TradeStatus::Open).await {
            Ok(trades) => trades.len(),
            Err(e) => {
                warn!("Failed to count open trades, skipping additional buy: {}", e);
                report.skip(CycleStep::AdditionalBuys);
                return;
            }
        };
        let resting: Vec<Decimal> = match self.store.list_active_orders(OrderSide::Buy).await {
            Ok(orders) => orders.iter().map(|o| o.price).collect(),
            Err(e) => {
                warn!("Failed to list resting buys, skipping additional buy: {}", e);
                report.skip(CycleStep::AdditionalBuys);
                return;
            }
        };

        match plan_additional_buy(&self.state, &self.config, price, open_trades, &resting) {
            AdditionalBuyDecision::Place(plan) => {
                if self.place_buy(&plan, report).await {
                    self.state.record_buy(plan.quote_amount, now);
                    info!("Additional buy placed at {}", plan.price);
                }
            }
            AdditionalBuyDecision::InitialPhaseActive => {}
            AdditionalBuyDecision::InsufficientFunds { available, required } => {
                debug!(
                    "No additional buy: {} {} available, {} required",
                    available, self.config.quote_asset, required
                );
            }
            AdditionalBuyDecision::TradeCeilingReached { open, max } => {
                debug!("No additional buy: {} open trades (max {})", open, max);
            }
            AdditionalBuyDecision::LevelCovered { level, resting } => {
                debug!(
                    "No additional buy: level {} already covered by resting buy at {}",
                    level, resting
                );
            }
            AdditionalBuyDecision::NoLevelsConfigured => {
                warn!("No buy percentages configured, additional buys disabled");
            }
            AdditionalBuyDecision::InvalidPrice(price) => {
                warn!("Ignoring invalid price {} for additional buy", price);
                report.skip(CycleStep::AdditionalBuys);
            }
        }
    }

    /// Place and record a buy. Returns `true` when the exchange accepted it, even
    /// if the local record could not be written.
    async fn place_buy(&self, plan: &OrderPlan, report: &mut CycleReport) -> bool {
        let placed = match self
            .exchange
            .place_limit_order(&self.config.symbol, OrderSide::Buy, plan.price, plan.quantity)
            .await
        {
            Ok(placed) => placed,
            Err(e) => {
                warn!(
                    "Failed to place buy for {} {} at {}: {}",
                    plan.quantity, self.config.symbol, plan.price, e
                );
                return false;
            }
        };

        report.buys_placed += 1;
        if let Err(e) = lifecycle::record_placement(
            self.store.as_ref(),
            NewOrder::from_report(&placed, self.exchange.is_test()),
        )
        .await
        {
            report.record_inconsistency(&e);
        }
        true
    }

    /// Poll resting buys and open a trade for every filled buy that has none.
    async fn open_trades_for_filled_buys(&self, now: DateTime<Utc>, report: &mut CycleReport) {
        let active = match self.store.list_active_orders(OrderSide::Buy).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!("Failed to list active buy orders: {}", e);
                report.skip(CycleStep::TradeOpening);
                return;
            }
        };

        let mut fills: HashMap<i64, OrderReport> = HashMap::new();
        for mut order in active {
            match self
                .exchange
                .order_status(&order.symbol, order.exchange_order_id)
                .await
            {
                Ok(status) => {
                    self.fold_status(&mut order, status.status, now, report).await;
                    if status.status == OrderStatus::Filled {
                        fills.insert(order.exchange_order_id, status);
                    }
                }
                Err(e) => {
                    warn!(
                        "Failed to fetch status of buy order {}: {}",
                        order.exchange_order_id, e
                    );
                }
            }
        }

        let filled = match self.store.list_filled_buys_without_trade().await {
            Ok(orders) => orders,
            Err(e) => {
                warn!("Failed to list filled buys without trade: {}", e);
                report.skip(CycleStep::TradeOpening);
                return;
            }
        };

        for buy in filled {
            let fill = match fills.remove(&buy.exchange_order_id) {
                Some(fill) => Some(fill),
                None => self
                    .exchange
                    .order_status(&buy.symbol, buy.exchange_order_id)
                    .await
                    .ok(),
            };
            let new_trade = lifecycle::trade_for_filled_buy(
                &buy,
                fill.as_ref(),
                self.config.sell_profit_percentage,
                now,
            );
            match self.store.create_trade(new_trade).await {
                Ok(trade) => {
                    report.trades_opened += 1;
                    info!(
                        "Opened trade {} for buy order {}: {} @ {}, target {}",
                        trade.id,
                        trade.buy_order_id,
                        trade.buy_quantity,
                        trade.buy_price,
                        trade.sell_price_target
                    );
                }
                Err(e) => {
                    warn!(
                        "Failed to open trade for buy order {}: {}",
                        buy.exchange_order_id, e
                    );
                }
            }
        }
    }

    async fn reconcile_open_trades(&mut self, now: DateTime<Utc>, report: &mut CycleReport) {
        let trades = match self.store.list_trades_by_status(TradeStatus::Open).await {
            Ok(trades) => trades,
            Err(e) => {
                warn!("Failed to list open trades: {}", e);
                report.skip(CycleStep::SellReconciliation);
                return;
            }
        };

        for trade in trades {
            self.reconcile_trade(trade, now, report).await;
        }
    }

    async fn reconcile_trade(&mut self, mut trade: Trade, now: DateTime<Utc>, report: &mut CycleReport) {
        let buy = match self
            .exchange
            .order_status(&trade.symbol, trade.buy_order_id)
            .await
        {
            Ok(buy) => buy,
            Err(e) => {
                warn!(
                    "Failed to fetch buy order {} of trade {}: {}",
                    trade.buy_order_id, trade.id, e
                );
                return;
            }
        };
        if let Ok(Some(mut local)) = self.find_order(buy.exchange_order_id).await {
            self.fold_status(&mut local, buy.status, now, report).await;
        }

        match buy.status {
            OrderStatus::Filled => {}
            status if status.is_terminal() => {
                warn!(
                    "Buy order {} of trade {} is now {}, canceling the trade",
                    trade.buy_order_id, trade.id, status
                );
                report.inconsistencies += 1;
                if trade.mark_canceled(now) {
                    self.save_trade(&trade).await;
                }
                return;
            }
            status => {
                debug!(
                    "Buy order {} of trade {} is {}, waiting",
                    trade.buy_order_id, trade.id, status
                );
                return;
            }
        }

        match trade.sell_order_id {
            Some(sell_order_id) => self.track_sell(&mut trade, sell_order_id, now, report).await,
            None => match self.store.get_sell_order_for_trade(trade.id).await {
                Ok(Some(sell)) => self.relink_sell(&mut trade, sell, now, report).await,
                Ok(None) => self.place_sell(&mut trade, now, report).await,
                Err(e) => {
                    warn!(
                        "Cannot tell whether trade {} already has a sell, retrying next cycle: {}",
                        trade.id, e
                    );
                }
            },
        }
    }

    /// Attach a sell that was placed and recorded but never linked to its trade.
    async fn relink_sell(
        &mut self,
        trade: &mut Trade,
        sell: Order,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        warn!(
            "Trade {} has unlinked sell order {}, attaching it",
            trade.id, sell.exchange_order_id
        );
        if let Err(e) = trade.attach_sell(sell.exchange_order_id, now) {
            report.record_inconsistency(&e);
            return;
        }
        if !self.save_trade(trade).await {
            report.inconsistencies += 1;
            return;
        }
        self.track_sell(trade, sell.exchange_order_id, now, report).await;
    }

    async fn place_sell(&self, trade: &mut Trade, now: DateTime<Utc>, report: &mut CycleReport) {
        let price = pricing::sell_price(trade.buy_price, self.config.sell_profit_percentage);
        let placed = match self
            .exchange
            .place_limit_order(&trade.symbol, OrderSide::Sell, price, trade.buy_quantity)
            .await
        {
            Ok(placed) => placed,
            Err(e) => {
                warn!(
                    "Failed to place sell for trade {} at {}, retrying next cycle: {}",
                    trade.id, price, e
                );
                return;
            }
        };
        report.sells_placed += 1;

        if let Err(e) = lifecycle::record_placement(
            self.store.as_ref(),
            NewOrder::from_report(&placed, self.exchange.is_test()).for_trade(trade.id),
        )
        .await
        {
            report.record_inconsistency(&e);
        }

        match trade.attach_sell(placed.exchange_order_id, now) {
            Ok(()) => {
                if self.save_trade(trade).await {
                    info!(
                        "Placed sell order {} for trade {} at {}",
                        placed.exchange_order_id, trade.id, placed.price
                    );
                } else {
                    error!(
                        "Sell order {} is live but not linked to trade {}, relinking next cycle",
                        placed.exchange_order_id, trade.id
                    );
                    report.inconsistencies += 1;
                }
            }
            Err(e) => report.record_inconsistency(&e),
        }
    }

    async fn track_sell(
        &mut self,
        trade: &mut Trade,
        sell_order_id: i64,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        let sell = match self.exchange.order_status(&trade.symbol, sell_order_id).await {
            Ok(sell) => sell,
            Err(e) => {
                warn!(
                    "Failed to fetch sell order {} of trade {}: {}",
                    sell_order_id, trade.id, e
                );
                return;
            }
        };

        match self.find_order(sell_order_id).await {
            Ok(Some(mut local)) => {
                self.fold_status(&mut local, sell.status, now, report).await;
            }
            Ok(None) => {
                warn!(
                    "Sell order {} of trade {} missing locally, recording it from the exchange",
                    sell_order_id, trade.id
                );
                if let Err(e) = lifecycle::record_placement(
                    self.store.as_ref(),
                    NewOrder::from_report(&sell, self.exchange.is_test()).for_trade(trade.id),
                )
                .await
                {
                    report.record_inconsistency(&e);
                }
            }
            Err(_) => {}
        }

        match sell.status {
            OrderStatus::Filled => match trade.close_as_sold(sell.average_fill_price(), now) {
                Ok(outcome) if outcome.newly_closed => {
                    if self.save_trade(trade).await {
                        self.state.add_profit(outcome.profit, now);
                        report.trades_sold += 1;
                        report.realized_profit += outcome.profit;
                        info!(
                            "Trade {} sold at {}, profit {} {}",
                            trade.id,
                            sell.average_fill_price(),
                            outcome.profit,
                            self.config.quote_asset
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => report.record_inconsistency(&e),
            },
            status if status.is_terminal() => {
                error!(
                    "Sell order {} of trade {} ended as {}, trade needs manual attention",
                    sell_order_id, trade.id, status
                );
                report.inconsistencies += 1;
                if trade.mark_error(now) {
                    self.save_trade(trade).await;
                }
            }
            status => {
                debug!(
                    "Sell order {} of trade {} is {}",
                    sell_order_id, trade.id, status
                );
            }
        }
    }

    /// Fold every open exchange order's status into its local record.
    async fn sweep_open_orders(&self, now: DateTime<Utc>, report: &mut CycleReport) {
        let open = match self.exchange.list_open_orders(&self.config.symbol).await {
            Ok(open) => open,
            Err(e) => {
                warn!("Failed to list open orders: {}", e);
                report.skip(CycleStep::OrderSweep);
                return;
            }
        };

        for entry in open {
            match self.find_order(entry.exchange_order_id).await {
                Ok(Some(mut order)) => {
                    self.fold_status(&mut order, entry.status, now, report).await;
                }
                Ok(None) => {
                    warn!(
                        "Open order {} is not tracked locally, skipping",
                        entry.exchange_order_id
                    );
                }
                Err(_) => {}
            }
        }
    }

    async fn find_order(&self, exchange_order_id: i64) -> Result<Option<Order>, StoreError> {
        self.store
            .get_order_by_exchange_id(exchange_order_id)
            .await
            .map_err(|e| {
                warn!("Failed to load order {}: {}", exchange_order_id, e);
                e
            })
    }

    /// Apply a status to a local order and persist it when it changed.
    async fn fold_status(
        &self,
        order: &mut Order,
        status: OrderStatus,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) {
        let previous = order.status;
        if !order.apply_status_update(status, now) {
            return;
        }
        match self.store.update_order_by_exchange_id(order).await {
            Ok(()) => {
                report.status_updates += 1;
                info!(
                    "{} order {}: {} -> {}",
                    order.side, order.exchange_order_id, previous, status
                );
            }
            Err(e) => {
                warn!(
                    "Failed to persist status {} for order {}: {}",
                    status, order.exchange_order_id, e
                );
            }
        }
    }

    async fn save_trade(&self, trade: &Trade) -> bool {
        match self.store.update_trade_by_id(trade).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to persist trade {}: {}", trade.id, e);
                false
            }
        }
    }
}

//! Order/trade state machine operations that touch the store.
//!
//! The pure transitions live on the entities (`Order::apply_status_update`,
//! `Trade::attach_sell`, `Trade::close_as_sold`); this module covers recording a
//! placement and deriving a trade from a filled buy.

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::domain::entities::order::{NewOrder, Order};
use crate::domain::entities::trade::NewTrade;
use crate::domain::errors::LifecycleError;
use crate::domain::repositories::exchange_client::OrderReport;
use crate::domain::repositories::trading_store::TradingStore;
use crate::domain::services::pricing;
use rust_decimal::Decimal;

impl NewOrder {
    /// Local record for an order the exchange has accepted.
    pub fn from_report(report: &OrderReport, is_test: bool) -> Self {
        Self {
            exchange_order_id: report.exchange_order_id,
            symbol: report.symbol.clone(),
            side: report.side,
            price: report.price,
            quantity: report.orig_quantity,
            status: report.status,
            is_test,
            trade_id: None,
            placed_at: report.updated_at,
        }
    }

    /// Link the record to the trade the order was placed for.
    pub fn for_trade(mut self, trade_id: i64) -> Self {
        self.trade_id = Some(trade_id);
        self
    }
}

/// Persist an order the exchange has accepted.
///
/// A failure here means the exchange holds an order the bot does not know about;
/// it is reported as `PlacementPersistence` so the caller can surface it.
pub async fn record_placement(
    store: &dyn TradingStore,
    order: NewOrder,
) -> Result<Order, LifecycleError> {
    let exchange_order_id = order.exchange_order_id;
    match store.create_order(order).await {
        Ok(order) => {
            debug!(
                "Recorded {} order {} ({} @ {})",
                order.side, order.exchange_order_id, order.quantity, order.price
            );
            Ok(order)
        }
        Err(e) => {
            error!(
                "Order {} is live on the exchange but was not recorded: {}",
                exchange_order_id, e
            );
            Err(LifecycleError::PlacementPersistence {
                exchange_order_id,
                reason: e.to_string(),
            })
        }
    }
}

/// Trade opened for a filled buy.
///
/// Uses the executed figures from the exchange report when available and the
/// local order otherwise.
pub fn trade_for_filled_buy(
    buy: &Order,
    report: Option<&OrderReport>,
    sell_profit_percentage: Decimal,
    now: DateTime<Utc>,
) -> NewTrade {
    let (buy_price, buy_quantity) = match report {
        Some(r) => (r.average_fill_price(), r.filled_quantity()),
        None => (buy.price, buy.quantity),
    };
    NewTrade {
        buy_order_id: buy.exchange_order_id,
        symbol: buy.symbol.clone(),
        buy_price,
        buy_quantity,
        sell_price_target: pricing::sell_price(buy_price, sell_profit_percentage),
        opened_at: buy.executed_at.unwrap_or(now),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::order::{OrderSide, OrderStatus};
    use rust_decimal_macros::dec;

    fn filled_buy() -> Order {
        let now = Utc::now();
        Order {
            id: 1,
            exchange_order_id: 11,
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            price: dec!(99.0),
            quantity: dec!(0.1),
            quote_quantity: dec!(9.9),
            status: OrderStatus::Filled,
            is_test: true,
            trade_id: None,
            placed_at: now,
            executed_at: Some(now),
            last_updated_at: now,
        }
    }

    #[test]
    fn test_trade_from_local_order() {
        let buy = filled_buy();
        let trade = trade_for_filled_buy(&buy, None, dec!(2), Utc::now());
        assert_eq!(trade.buy_order_id, 11);
        assert_eq!(trade.buy_price, dec!(99.0));
        assert_eq!(trade.buy_quantity, dec!(0.1));
        assert_eq!(trade.sell_price_target, dec!(100.98));
        assert_eq!(Some(trade.opened_at), buy.executed_at);
    }

    #[test]
    fn test_trade_uses_executed_figures() {
        let buy = filled_buy();
        let report = OrderReport {
            exchange_order_id: 11,
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            status: OrderStatus::Filled,
            price: dec!(99.0),
            orig_quantity: dec!(0.1),
            executed_quantity: dec!(0.1),
            cumulative_quote_quantity: dec!(9.8),
            updated_at: Utc::now(),
        };
        let trade = trade_for_filled_buy(&buy, Some(&report), dec!(2), Utc::now());
        assert_eq!(trade.buy_price, dec!(98));
        assert_eq!(trade.sell_price_target, dec!(99.96));
    }
}

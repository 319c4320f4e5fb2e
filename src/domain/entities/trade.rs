use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::errors::LifecycleError;
use crate::domain::services::pricing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeStatus {
    Open,
    Sold,
    Canceled,
    Error,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "OPEN",
            TradeStatus::Sold => "SOLD",
            TradeStatus::Canceled => "CANCELED",
            TradeStatus::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Open)
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPEN" => Ok(TradeStatus::Open),
            "SOLD" => Ok(TradeStatus::Sold),
            "CANCELED" => Ok(TradeStatus::Canceled),
            "ERROR" => Ok(TradeStatus::Error),
            other => Err(format!("Unknown trade status: {}", other)),
        }
    }
}

/// A filled buy paired with (eventually) its profit-taking sell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    /// Exchange ID of the buy order.
    pub buy_order_id: i64,
    /// Exchange ID of the sell order, set at most once.
    pub sell_order_id: Option<i64>,
    pub symbol: String,
    pub buy_price: Decimal,
    pub buy_quantity: Decimal,
    pub sell_price_target: Decimal,
    pub actual_sell_price: Option<Decimal>,
    pub status: TradeStatus,
    pub profit: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub last_status_update: DateTime<Utc>,
}

/// Fields needed to open a trade for a filled buy.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrade {
    pub buy_order_id: i64,
    pub symbol: String,
    pub buy_price: Decimal,
    pub buy_quantity: Decimal,
    pub sell_price_target: Decimal,
    pub opened_at: DateTime<Utc>,
}

/// Result of closing a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleOutcome {
    pub profit: Decimal,
    /// `false` when the trade was already SOLD; its profit must not be counted again.
    pub newly_closed: bool,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Link the sell order placed for this trade. The link is permanent.
    pub fn attach_sell(&mut self, sell_order_id: i64, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        if let Some(existing) = self.sell_order_id {
            return Err(LifecycleError::AlreadyAttached {
                trade_id: self.id,
                existing,
            });
        }
        self.sell_order_id = Some(sell_order_id);
        self.last_status_update = now;
        Ok(())
    }

    /// Close the trade once its sell order is filled.
    ///
    /// Profit is frozen at the first call; later calls return it unchanged.
    pub fn close_as_sold(
        &mut self,
        actual_sell_price: Decimal,
        now: DateTime<Utc>,
    ) -> Result<SaleOutcome, LifecycleError> {
        match self.status {
            TradeStatus::Sold => Ok(SaleOutcome {
                profit: self.profit.unwrap_or(Decimal::ZERO),
                newly_closed: false,
            }),
            TradeStatus::Open => {
                let profit = pricing::profit(self.buy_price, actual_sell_price, self.buy_quantity);
                self.actual_sell_price = Some(actual_sell_price);
                self.profit = Some(profit);
                self.status = TradeStatus::Sold;
                self.closed_at = Some(now);
                self.last_status_update = now;
                Ok(SaleOutcome {
                    profit,
                    newly_closed: true,
                })
            }
            status => Err(LifecycleError::NotOpen {
                trade_id: self.id,
                status,
            }),
        }
    }

    /// The buy never completed; nothing was bought.
    pub fn mark_canceled(&mut self, now: DateTime<Utc>) -> bool {
        self.close_without_sale(TradeStatus::Canceled, now)
    }

    /// The trade cannot be completed automatically.
    pub fn mark_error(&mut self, now: DateTime<Utc>) -> bool {
        self.close_without_sale(TradeStatus::Error, now)
    }

    fn close_without_sale(&mut self, status: TradeStatus, now: DateTime<Utc>) -> bool {
        if !self.is_open() {
            return false;
        }
        self.status = status;
        self.closed_at = Some(now);
        self.last_status_update = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn open_trade() -> Trade {
        let now = Utc::now();
        Trade {
            id: 5,
            buy_order_id: 1001,
            sell_order_id: None,
            symbol: "BTCUSDT".to_string(),
            buy_price: dec!(100),
            buy_quantity: dec!(0.01),
            sell_price_target: dec!(102),
            actual_sell_price: None,
            status: TradeStatus::Open,
            profit: None,
            opened_at: now,
            closed_at: None,
            last_status_update: now,
        }
    }

    #[test]
    fn test_profit_is_exact() {
        let mut trade = open_trade();
        let outcome = trade.close_as_sold(dec!(102), Utc::now()).unwrap();
        assert_eq!(outcome.profit, dec!(0.02));
        assert!(outcome.newly_closed);
        assert_eq!(trade.status, TradeStatus::Sold);
        assert_eq!(trade.actual_sell_price, Some(dec!(102)));
        assert!(trade.closed_at.is_some());
    }

    #[test]
    fn test_close_as_sold_is_idempotent() {
        let mut trade = open_trade();
        let first = trade.close_as_sold(dec!(102), Utc::now()).unwrap();
        let snapshot = trade.clone();

        let second = trade.close_as_sold(dec!(150), Utc::now()).unwrap();
        assert_eq!(second.profit, first.profit);
        assert!(!second.newly_closed);
        assert_eq!(trade, snapshot);
    }

    #[test]
    fn test_close_canceled_trade_fails() {
        let mut trade = open_trade();
        trade.mark_canceled(Utc::now());
        let err = trade.close_as_sold(dec!(102), Utc::now()).unwrap_err();
        assert!(matches!(err, LifecycleError::NotOpen { status: TradeStatus::Canceled, .. }));
    }

    #[test]
    fn test_attach_sell_once() {
        let mut trade = open_trade();
        trade.attach_sell(2002, Utc::now()).unwrap();
        assert_eq!(trade.sell_order_id, Some(2002));

        let err = trade.attach_sell(3003, Utc::now()).unwrap_err();
        assert_eq!(
            err,
            LifecycleError::AlreadyAttached {
                trade_id: 5,
                existing: 2002
            }
        );
        assert_eq!(trade.sell_order_id, Some(2002));
    }

    #[test]
    fn test_mark_error_only_from_open() {
        let mut trade = open_trade();
        assert!(trade.mark_error(Utc::now()));
        assert_eq!(trade.status, TradeStatus::Error);
        assert!(!trade.mark_canceled(Utc::now()));
        assert_eq!(trade.status, TradeStatus::Error);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("SOLD".parse::<TradeStatus>().unwrap(), TradeStatus::Sold);
        assert!("CLOSED".parse::<TradeStatus>().is_err());
        assert!(TradeStatus::Canceled.is_terminal());
        assert!(!TradeStatus::Open.is_terminal());
    }
}

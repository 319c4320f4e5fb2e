use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(format!("Unknown order side: {}", other)),
        }
    }
}

/// Exchange order status.
///
/// Forward path: `NEW -> PARTIALLY_FILLED -> FILLED`, with `CANCELED`, `REJECTED`,
/// `EXPIRED` and `PENDING_CANCEL -> CANCELED` as the alternatives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Canceled => "CANCELED",
            OrderStatus::PendingCancel => "PENDING_CANCEL",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }

    /// Still resting on the book (or about to leave it).
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether moving from `self` to `next` follows the documented lifecycle.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (*self, next) {
            (from, to) if from == to => true,
            (New, _) => true,
            (PartiallyFilled, Filled | Canceled | PendingCancel | Expired) => true,
            (PendingCancel, Canceled) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" | "PENDING_NEW" => Ok(OrderStatus::New),
            "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELED" => Ok(OrderStatus::Canceled),
            "PENDING_CANCEL" => Ok(OrderStatus::PendingCancel),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "EXPIRED" | "EXPIRED_IN_MATCH" => Ok(OrderStatus::Expired),
            other => Err(format!("Unknown order status: {}", other)),
        }
    }
}

/// A limit order as placed on the exchange and mirrored locally.
///
/// Orders are never deleted; their status only changes by re-reading it from
/// the exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub exchange_order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub quote_quantity: Decimal,
    pub status: OrderStatus,
    pub is_test: bool,
    /// Trade a SELL order was placed for
    pub trade_id: Option<i64>,
    pub placed_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
}

/// Fields needed to persist a freshly placed order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub exchange_order_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub status: OrderStatus,
    pub is_test: bool,
    pub trade_id: Option<i64>,
    pub placed_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn quote_quantity(&self) -> Decimal {
        self.price * self.quantity
    }

    pub fn executed_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            OrderStatus::Filled | OrderStatus::PartiallyFilled => Some(self.placed_at),
            _ => None,
        }
    }
}

impl Order {
    /// Fold an exchange-reported status into this order.
    ///
    /// Returns `true` when the status changed. The exchange is authoritative, so a
    /// transition that goes against the lifecycle is still applied, only logged.
    pub fn apply_status_update(&mut self, new_status: OrderStatus, now: DateTime<Utc>) -> bool {
        if self.status == new_status {
            return false;
        }

        if !self.status.can_transition_to(new_status) {
            warn!(
                "Non-monotonic status change for order {}: {} -> {}",
                self.exchange_order_id, self.status, new_status
            );
        }

        self.status = new_status;
        self.last_updated_at = now;
        match new_status {
            OrderStatus::Filled | OrderStatus::PartiallyFilled => {
                if self.executed_at.is_none() {
                    self.executed_at = Some(now);
                }
            }
            OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired => {
                self.executed_at = None;
            }
            OrderStatus::New | OrderStatus::PendingCancel => {}
        }
        true
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderStatus::Filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn order(status: OrderStatus) -> Order {
        let now = Utc::now();
        Order {
            id: 1,
            exchange_order_id: 1001,
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            price: dec!(99.0),
            quantity: dec!(0.1),
            quote_quantity: dec!(9.9),
            status,
            is_test: true,
            trade_id: None,
            placed_at: now,
            executed_at: None,
            last_updated_at: now,
        }
    }

    #[test]
    fn test_status_round_trip_through_wire_names() {
        for status in [
            OrderStatus::New,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Canceled,
            OrderStatus::PendingCancel,
            OrderStatus::Rejected,
            OrderStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_exchange_aliases_map_to_domain_status() {
        assert_eq!("PENDING_NEW".parse::<OrderStatus>().unwrap(), OrderStatus::New);
        assert_eq!(
            "EXPIRED_IN_MATCH".parse::<OrderStatus>().unwrap(),
            OrderStatus::Expired
        );
        assert!("BOGUS".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::New.is_terminal());
        assert!(!OrderStatus::PartiallyFilled.is_terminal());
        assert!(!OrderStatus::PendingCancel.is_terminal());
    }

    #[test]
    fn test_forward_transitions() {
        assert!(OrderStatus::New.can_transition_to(OrderStatus::PartiallyFilled));
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Filled));
        assert!(OrderStatus::PendingCancel.can_transition_to(OrderStatus::Canceled));
        assert!(!OrderStatus::Filled.can_transition_to(OrderStatus::New));
        assert!(!OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::New));
        assert!(!OrderStatus::Canceled.can_transition_to(OrderStatus::Filled));
    }

    #[test]
    fn test_apply_same_status_is_noop() {
        let mut o = order(OrderStatus::New);
        let before = o.clone();
        assert!(!o.apply_status_update(OrderStatus::New, Utc::now() + Duration::seconds(5)));
        assert_eq!(o, before);
    }

    #[test]
    fn test_apply_fill_sets_executed_at() {
        let mut o = order(OrderStatus::New);
        let now = Utc::now() + Duration::seconds(30);
        assert!(o.apply_status_update(OrderStatus::Filled, now));
        assert_eq!(o.status, OrderStatus::Filled);
        assert_eq!(o.executed_at, Some(now));
        assert_eq!(o.last_updated_at, now);
    }

    #[test]
    fn test_partial_then_full_fill_keeps_first_execution_time() {
        let mut o = order(OrderStatus::New);
        let first = Utc::now();
        o.apply_status_update(OrderStatus::PartiallyFilled, first);
        o.apply_status_update(OrderStatus::Filled, first + Duration::seconds(10));
        assert_eq!(o.executed_at, Some(first));
    }

    #[test]
    fn test_cancel_clears_executed_at() {
        let mut o = order(OrderStatus::PartiallyFilled);
        o.executed_at = Some(Utc::now());
        assert!(o.apply_status_update(OrderStatus::Canceled, Utc::now()));
        assert!(o.executed_at.is_none());
    }

    #[test]
    fn test_backward_transition_is_applied() {
        let mut o = order(OrderStatus::Filled);
        assert!(o.apply_status_update(OrderStatus::New, Utc::now()));
        assert_eq!(o.status, OrderStatus::New);
    }

    #[test]
    fn test_new_order_quote_quantity() {
        let new_order = NewOrder {
            exchange_order_id: 7,
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Sell,
            price: dec!(100.98),
            quantity: dec!(0.5),
            status: OrderStatus::New,
            is_test: false,
            trade_id: Some(3),
            placed_at: Utc::now(),
        };
        assert_eq!(new_order.quote_quantity(), dec!(50.49));
        assert!(new_order.executed_at().is_none());
    }
}

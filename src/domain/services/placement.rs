//! Buy placement policies.
//!
//! Both policies are pure: they look at the bot state and market price and return
//! a decision. The engine executes `Place` decisions and logs the others.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

use crate::domain::entities::bot_state::{BotState, INITIAL_BUY_TARGET};
use crate::domain::services::pricing;

/// Strategy parameters the engine runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyConfig {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Starting capital recorded when the bot state is first created
    pub initial_capital: Decimal,
    /// Quote amount spent per buy order
    pub order_amount: Decimal,
    pub initial_buy_percentage: Decimal,
    /// Minimum spacing between two initial buys
    pub order_interval: Duration,
    /// Drop levels for additional buys; only the first is used for placement
    pub buy_percentages: Vec<Decimal>,
    pub sell_profit_percentage: Decimal,
    pub max_open_trades: usize,
    /// Resting buys within this distance of a new level cover it. Zero disables the check.
    pub level_tolerance_percentage: Decimal,
}

/// A buy the engine should place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderPlan {
    pub price: Decimal,
    pub quantity: Decimal,
    pub quote_amount: Decimal,
}

impl OrderPlan {
    fn buy_below(reference: Decimal, percentage: Decimal, quote_amount: Decimal) -> Option<Self> {
        let price = pricing::buy_price(reference, percentage);
        let quantity = pricing::order_quantity(quote_amount, price)?;
        Some(Self {
            price,
            quantity,
            quote_amount,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InitialBuyDecision {
    /// The target count has been reached
    Complete,
    /// Too early since the previous initial buy
    Waiting { next_at: DateTime<Utc> },
    InsufficientFunds { available: Decimal, required: Decimal },
    InvalidPrice(Decimal),
    Place(OrderPlan),
}

pub fn plan_initial_buy(
    state: &BotState,
    config: &StrategyConfig,
    current_price: Decimal,
    now: DateTime<Utc>,
) -> InitialBuyDecision {
    if state.is_initial_buying_complete || state.initial_buy_orders_placed_count >= INITIAL_BUY_TARGET {
        return InitialBuyDecision::Complete;
    }

    if let Some(last) = state.last_initial_buy_at {
        let next_at = last + config.order_interval;
        if now < next_at {
            return InitialBuyDecision::Waiting { next_at };
        }
    }

    if state.current_quote_balance < config.order_amount {
        return InitialBuyDecision::InsufficientFunds {
            available: state.current_quote_balance,
            required: config.order_amount,
        };
    }

    match OrderPlan::buy_below(current_price, config.initial_buy_percentage, config.order_amount) {
        Some(plan) => InitialBuyDecision::Place(plan),
        None => InitialBuyDecision::InvalidPrice(current_price),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdditionalBuyDecision {
    InitialPhaseActive,
    InsufficientFunds { available: Decimal, required: Decimal },
    TradeCeilingReached { open: usize, max: usize },
    NoLevelsConfigured,
    /// A resting buy already sits at this level
    LevelCovered { level: Decimal, resting: Decimal },
    InvalidPrice(Decimal),
    Place(OrderPlan),
}

pub fn plan_additional_buy(
    state: &BotState,
    config: &StrategyConfig,
    current_price: Decimal,
    open_trades: usize,
    resting_buy_prices: &[Decimal],
) -> AdditionalBuyDecision {
    if !state.is_initial_buying_complete {
        return AdditionalBuyDecision::InitialPhaseActive;
    }

    if state.current_quote_balance < config.order_amount {
        return AdditionalBuyDecision::InsufficientFunds {
            available: state.current_quote_balance,
            required: config.order_amount,
        };
    }

    if open_trades >= config.max_open_trades {
        return AdditionalBuyDecision::TradeCeilingReached {
            open: open_trades,
            max: config.max_open_trades,
        };
    }

    let Some(percentage) = config.buy_percentages.first().copied() else {
        return AdditionalBuyDecision::NoLevelsConfigured;
    };

    let Some(plan) = OrderPlan::buy_below(current_price, percentage, config.order_amount) else {
        return AdditionalBuyDecision::InvalidPrice(current_price);
    };

    if config.level_tolerance_percentage > Decimal::ZERO {
        if let Some(resting) = resting_buy_prices
            .iter()
            .copied()
            .find(|p| pricing::within_tolerance(*p, plan.price, config.level_tolerance_percentage))
        {
            return AdditionalBuyDecision::LevelCovered {
                level: plan.price,
                resting,
            };
        }
    }

    AdditionalBuyDecision::Place(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn config() -> StrategyConfig {
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
            max_open_trades: 3,
            level_tolerance_percentage: dec!(0.5),
        }
    }

    #[test]
    fn test_first_initial_buy() {
        let state = BotState::new(dec!(100), Utc::now());
        match plan_initial_buy(&state, &config(), dec!(100), Utc::now()) {
            InitialBuyDecision::Place(plan) => {
                assert_eq!(plan.price, dec!(99.0));
                assert_eq!(plan.quantity.round_dp(5), dec!(0.10101));
                assert_eq!(plan.quote_amount, dec!(10));
            }
            other => panic!("expected placement, got {:?}", other),
        }
    }

    #[test]
    fn test_initial_buy_waits_for_interval() {
        let now = Utc::now();
        let mut state = BotState::new(dec!(100), now);
        state.record_initial_buy(dec!(10), now);

        let decision = plan_initial_buy(&state, &config(), dec!(100), now + Duration::seconds(30));
        assert_eq!(
            decision,
            InitialBuyDecision::Waiting {
                next_at: now + Duration::minutes(2)
            }
        );

        let decision = plan_initial_buy(&state, &config(), dec!(100), now + Duration::minutes(2));
        assert!(matches!(decision, InitialBuyDecision::Place(_)));
    }

    #[test]
    fn test_initial_buy_skips_without_funds() {
        let mut state = BotState::new(dec!(100), Utc::now());
        state.current_quote_balance = dec!(9.99);
        assert_eq!(
            plan_initial_buy(&state, &config(), dec!(100), Utc::now()),
            InitialBuyDecision::InsufficientFunds {
                available: dec!(9.99),
                required: dec!(10)
            }
        );
    }

    #[test]
    fn test_no_eleventh_initial_buy() {
        let mut state = BotState::new(dec!(100), Utc::now());
        state.initial_buy_orders_placed_count = INITIAL_BUY_TARGET;
        state.current_quote_balance = dec!(1000000);
        assert_eq!(
            plan_initial_buy(&state, &config(), dec!(100), Utc::now()),
            InitialBuyDecision::Complete
        );
    }

    #[test]
    fn test_initial_buy_rejects_non_positive_price() {
        let state = BotState::new(dec!(100), Utc::now());
        assert_eq!(
            plan_initial_buy(&state, &config(), dec!(0), Utc::now()),
            InitialBuyDecision::InvalidPrice(dec!(0))
        );
    }

    #[test]
    fn test_additional_buy_requires_completed_initial_phase() {
        let state = BotState::new(dec!(100), Utc::now());
        assert_eq!(
            plan_additional_buy(&state, &config(), dec!(100), 0, &[]),
            AdditionalBuyDecision::InitialPhaseActive
        );
    }

    #[test]
    fn test_additional_buy_uses_first_level() {
        let mut state = BotState::new(dec!(100), Utc::now());
        state.mark_initial_buying_complete(Utc::now());
        match plan_additional_buy(&state, &config(), dec!(200), 1, &[]) {
            AdditionalBuyDecision::Place(plan) => assert_eq!(plan.price, dec!(198)),
            other => panic!("expected placement, got {:?}", other),
        }
    }

    #[test]
    fn test_additional_buy_respects_trade_ceiling() {
        let mut state = BotState::new(dec!(100), Utc::now());
        state.mark_initial_buying_complete(Utc::now());
        assert_eq!(
            plan_additional_buy(&state, &config(), dec!(100), 3, &[]),
            AdditionalBuyDecision::TradeCeilingReached { open: 3, max: 3 }
        );
    }

    #[test]
    fn test_additional_buy_skips_covered_level() {
        let mut state = BotState::new(dec!(100), Utc::now());
        state.mark_initial_buying_complete(Utc::now());
        assert_eq!(
            plan_additional_buy(&state, &config(), dec!(100), 0, &[dec!(90), dec!(99.2)]),
            AdditionalBuyDecision::LevelCovered {
                level: dec!(99.0),
                resting: dec!(99.2)
            }
        );

        let mut no_dedup = config();
        no_dedup.level_tolerance_percentage = Decimal::ZERO;
        assert!(matches!(
            plan_additional_buy(&state, &no_dedup, dec!(100), 0, &[dec!(99.0)]),
            AdditionalBuyDecision::Place(_)
        ));
    }

    #[test]
    fn test_additional_buy_without_levels() {
        let mut state = BotState::new(dec!(100), Utc::now());
        state.mark_initial_buying_complete(Utc::now());
        let mut cfg = config();
        cfg.buy_percentages.clear();
        assert_eq!(
            plan_additional_buy(&state, &cfg, dec!(100), 0, &[]),
            AdditionalBuyDecision::NoLevelsConfigured
        );
    }
}

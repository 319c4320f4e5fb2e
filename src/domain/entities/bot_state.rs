use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Number of staggered buys placed before the bot switches to additional buys.
pub const INITIAL_BUY_TARGET: u32 = 10;

/// The bot's single persisted aggregate.
///
/// `current_quote_balance` is a projection: refreshed from the exchange at the
/// start of a cycle and decremented locally after every buy, so it may lag the
/// real account by up to one cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotState {
    pub initial_capital: Decimal,
    pub current_quote_balance: Decimal,
    pub current_base_balance: Decimal,
    pub total_invested: Decimal,
    pub total_profit: Decimal,
    pub initial_buy_orders_placed_count: u32,
    pub last_initial_buy_at: Option<DateTime<Utc>>,
    pub is_initial_buying_complete: bool,
    pub last_cycle_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BotState {
    pub fn new(initial_capital: Decimal, now: DateTime<Utc>) -> Self {
        Self {
            initial_capital,
            current_quote_balance: initial_capital,
            current_base_balance: Decimal::ZERO,
            total_invested: Decimal::ZERO,
            total_profit: Decimal::ZERO,
            initial_buy_orders_placed_count: 0,
            last_initial_buy_at: None,
            is_initial_buying_complete: false,
            last_cycle_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    /// Account for a buy placed during the initial phase.
    ///
    /// The completion flag flips once the target is reached and never flips back.
    pub fn record_initial_buy(&mut self, quote_amount: Decimal, now: DateTime<Utc>) {
        self.initial_buy_orders_placed_count += 1;
        self.last_initial_buy_at = Some(now);
        self.record_buy(quote_amount, now);
        if self.initial_buy_orders_placed_count >= INITIAL_BUY_TARGET {
            self.is_initial_buying_complete = true;
        }
    }

    /// Optimistically reserve quote balance for a newly placed buy.
    pub fn record_buy(&mut self, quote_amount: Decimal, now: DateTime<Utc>) {
        self.current_quote_balance -= quote_amount;
        self.total_invested += quote_amount;
        self.updated_at = now;
    }

    pub fn mark_initial_buying_complete(&mut self, now: DateTime<Utc>) {
        if !self.is_initial_buying_complete {
            self.is_initial_buying_complete = true;
            self.updated_at = now;
        }
    }

    pub fn add_profit(&mut self, profit: Decimal, now: DateTime<Utc>) {
        self.total_profit += profit;
        self.updated_at = now;
    }

    pub fn refresh_balances(&mut self, quote: Decimal, base: Decimal, now: DateTime<Utc>) {
        self.current_quote_balance = quote;
        self.current_base_balance = base;
        self.updated_at = now;
    }

    pub fn touch_cycle(&mut self, now: DateTime<Utc>) {
        self.last_cycle_at = now;
        self.updated_at = now;
    }
}

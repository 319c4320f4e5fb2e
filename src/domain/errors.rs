use thiserror::Error;

use crate::domain::entities::trade::TradeStatus;
use crate::domain::repositories::trading_store::StoreError;

/// Violations and inconsistencies raised by the order/trade state machine.
///
/// None of these stop a cycle: the engine logs them and moves on, and the next
/// cycle re-derives whatever could not be recorded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LifecycleError {
    /// The exchange accepted the order but the local record could not be written.
    #[error("Order {exchange_order_id} was placed on the exchange but could not be recorded: {reason}")]
    PlacementPersistence {
        exchange_order_id: i64,
        reason: String,
    },

    #[error("Trade {trade_id} already has sell order {existing} attached")]
    AlreadyAttached { trade_id: i64, existing: i64 },

    #[error("Trade {trade_id} is {status} and cannot be sold")]
    NotOpen { trade_id: i64, status: TradeStatus },
}

impl LifecycleError {
    /// Critical inconsistencies need operator attention; the rest are benign.
    pub fn is_critical(&self) -> bool {
        matches!(self, LifecycleError::PlacementPersistence { .. })
    }
}

/// Errors that abort a cycle.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to load bot state: {0}")]
    BotStateLoad(#[source] StoreError),

    /// The aggregate could not be saved at the end of a cycle. The process must
    /// stop rather than run on with an unsaved counter.
    #[error("Failed to persist bot state: {0}")]
    BotStatePersistence(#[source] StoreError),
}

impl EngineError {
    pub fn is_fatal(&self) -> bool {
        match self {
            EngineError::BotStateLoad(_) | EngineError::BotStatePersistence(_) => true,
        }
    }
}

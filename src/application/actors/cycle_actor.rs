//! Cycle Actor
//!
//! Owns the reconciliation engine and runs one cycle per `RunCycle` message.
//! Messages are handled one at a time, so cycles never overlap.

use crate::domain::errors::EngineError;
use crate::domain::services::reconciliation_engine::{CycleReport, ReconciliationEngine};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Channel capacity for cycle actor messages
const CYCLE_CHANNEL_CAPACITY: usize = 16;

/// Messages that can be sent to the cycle actor
#[derive(Debug)]
pub enum CycleMessage {
    /// Run one full trading cycle
    RunCycle {
        reply: mpsc::Sender<Result<CycleReport, EngineError>>,
    },

    /// Get accumulated statistics
    GetStats { reply: mpsc::Sender<CycleStats> },

    /// Shutdown the actor
    Shutdown,
}

#[derive(Debug, Error)]
pub enum CycleActorError {
    #[error("Cycle actor is not running")]
    Stopped,

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Cycle actor statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleStats {
    pub total_cycles: u64,
    pub clean_cycles: u64,
    pub failed_cycles: u64,
    pub total_inconsistencies: u64,
    pub buys_placed: u64,
    pub sells_placed: u64,
    pub trades_sold: u64,
    pub realized_profit: Decimal,
    pub last_cycle: Option<DateTime<Utc>>,
}

/// Cycle Actor
pub struct CycleActor {
    engine: ReconciliationEngine,
    stats: CycleStats,
}

impl CycleActor {
    pub fn new(engine: ReconciliationEngine) -> Self {
        Self {
            engine,
            stats: CycleStats::default(),
        }
    }

    /// Spawn a new cycle actor
    pub fn spawn(engine: ReconciliationEngine) -> (mpsc::Sender<CycleMessage>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CYCLE_CHANNEL_CAPACITY);
        let actor = Self::new(engine);

        let handle = tokio::spawn(async move {
            actor.run(rx).await;
        });

        info!("CycleActor spawned");
        (tx, handle)
    }

    /// Main actor loop
    async fn run(mut self, mut rx: mpsc::Receiver<CycleMessage>) {
        info!("CycleActor started for {}", self.engine.config().symbol);

        while let Some(msg) = rx.recv().await {
            match msg {
                CycleMessage::RunCycle { reply } => {
                    debug!("CycleActor received RunCycle");
                    let result = self.engine.run_cycle().await;
                    self.update_stats(&result);
                    let fatal = matches!(&result, Err(e) if e.is_fatal());
                    if reply.send(result).await.is_err() {
                        warn!("RunCycle requester went away before the reply");
                    }
                    if fatal {
                        error!("CycleActor stopping after a fatal cycle error");
                        break;
                    }
                }

                CycleMessage::GetStats { reply } => {
                    debug!("CycleActor received GetStats");
                    if reply.send(self.stats.clone()).await.is_err() {
                        warn!("GetStats requester went away before the reply");
                    }
                }

                CycleMessage::Shutdown => {
                    info!("CycleActor received shutdown signal");
                    break;
                }
            }
        }

        let state = self.engine.state();
        info!(
            "CycleActor stopped after {} cycles: {}/{} initial buys, total profit {}",
            self.stats.total_cycles,
            state.initial_buy_orders_placed_count,
            crate::domain::entities::bot_state::INITIAL_BUY_TARGET,
            state.total_profit
        );
    }

    fn update_stats(&mut self, result: &Result<CycleReport, EngineError>) {
        self.stats.total_cycles += 1;
        self.stats.last_cycle = Some(Utc::now());

        match result {
            Ok(report) => {
                if report.is_clean() {
                    self.stats.clean_cycles += 1;
                }
                self.stats.total_inconsistencies += report.inconsistencies as u64;
                self.stats.buys_placed += report.buys_placed as u64;
                self.stats.sells_placed += report.sells_placed as u64;
                self.stats.trades_sold += report.trades_sold as u64;
                self.stats.realized_profit += report.realized_profit;
            }
            Err(_) => {
                self.stats.failed_cycles += 1;
            }
        }
    }
}

/// Ask the actor for one cycle and wait until it has finished.
pub async fn request_cycle(tx: &mpsc::Sender<CycleMessage>) -> Result<CycleReport, CycleActorError> {
    let (reply, mut rx) = mpsc::channel(1);
    tx.send(CycleMessage::RunCycle { reply })
        .await
        .map_err(|_| CycleActorError::Stopped)?;
    match rx.recv().await {
        Some(result) => Ok(result?),
        None => Err(CycleActorError::Stopped),
    }
}

pub async fn request_stats(tx: &mpsc::Sender<CycleMessage>) -> Result<CycleStats, CycleActorError> {
    let (reply, mut rx) = mpsc::channel(1);
    tx.send(CycleMessage::GetStats { reply })
        .await
        .map_err(|_| CycleActorError::Stopped)?;
    rx.recv().await.ok_or(CycleActorError::Stopped)
}

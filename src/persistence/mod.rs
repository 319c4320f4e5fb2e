//! Persistence Layer
//!
//! This module provides database persistence for orders, trades and the bot state.
//! Uses SQLite for local storage with async operations via sqlx.
//!
//! # Database Schema
//!
//! ## Orders Table
//! - id: Local surrogate key
//! - exchange_order_id: Exchange-assigned ID (unique)
//! - symbol: Trading pair (e.g., "BTCUSDT")
//! - side: "BUY" or "SELL"
//! - price, quantity, quote_quantity: Decimal as TEXT
//! - status: Exchange order status
//! - is_test: Placed on a test environment
//! - placed_at, executed_at, last_updated_at: Timestamps
//!
//! ## Trades Table
//! - id: Local surrogate key
//! - buy_order_id: Exchange ID of the buy order (unique)
//! - sell_order_id: Exchange ID of the sell order, written once
//! - buy_price, buy_quantity, sell_price_target, actual_sell_price, profit: Decimal as TEXT
//! - status: "OPEN", "SOLD", "CANCELED" or "ERROR"
//! - opened_at, closed_at, last_status_update: Timestamps
//!
//! ## Bot State Table
//! - Exactly one row (id = 1) holding balances, counters and phase flags

pub mod models;
pub mod repository;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Database connection pool
pub type DbPool = SqlitePool;

/// Database initialization error
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),
}

/// Initialize the database connection pool
///
/// # Arguments
/// - `config`: Database URL (e.g., "sqlite://data/dcabot.db") and pool settings
///
/// # Errors
/// Returns error if database connection fails or migrations fail
pub async fn init_database(config: &DatabaseConfig) -> Result<DbPool, DatabaseError> {
    info!("Initializing database: {}", config.url);

    // Ensure data directory exists
    if let Some(db_path) = config.url.strip_prefix("sqlite://") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::ConnectionError(sqlx::Error::Configuration(Box::new(e)))
                })?;
            }
        }
    }

    let mut options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);
    options = if config.log_queries {
        options.log_statements(tracing::log::LevelFilter::Debug)
    } else {
        options.disable_statement_logging()
    };

    // Every connection to ":memory:" opens its own database, so keep exactly one alive
    let pool = if config.url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?
    };

    run_migrations(&pool).await?;

    info!("✓ Database initialized successfully");

    Ok(pool)
}

/// Run database migrations
async fn run_migrations(pool: &DbPool) -> Result<(), DatabaseError> {
    info!("Running database migrations...");

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            exchange_order_id INTEGER NOT NULL UNIQUE,
            symbol TEXT NOT NULL,
            side TEXT NOT NULL CHECK(side IN ('BUY', 'SELL')),
            price TEXT NOT NULL,
            quantity TEXT NOT NULL,
            quote_quantity TEXT NOT NULL,
            status TEXT NOT NULL,
            is_test BOOLEAN NOT NULL DEFAULT 0,
            trade_id INTEGER,
            placed_at DATETIME NOT NULL,
            executed_at DATETIME,
            last_updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create orders table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS trades (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            buy_order_id INTEGER NOT NULL UNIQUE,
            sell_order_id INTEGER UNIQUE,
            symbol TEXT NOT NULL,
            buy_price TEXT NOT NULL,
            buy_quantity TEXT NOT NULL,
            sell_price_target TEXT NOT NULL,
            actual_sell_price TEXT,
            status TEXT NOT NULL CHECK(status IN ('OPEN', 'SOLD', 'CANCELED', 'ERROR')),
            profit TEXT,
            opened_at DATETIME NOT NULL,
            closed_at DATETIME,
            last_status_update DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to create trades table: {}", e)))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bot_state (
            id INTEGER PRIMARY KEY CHECK(id = 1),
            initial_capital TEXT NOT NULL,
            current_quote_balance TEXT NOT NULL,
            current_base_balance TEXT NOT NULL,
            total_invested TEXT NOT NULL,
            total_profit TEXT NOT NULL,
            initial_buy_orders_placed_count INTEGER NOT NULL DEFAULT 0,
            last_initial_buy_at DATETIME,
            is_initial_buying_complete BOOLEAN NOT NULL DEFAULT 0,
            last_cycle_at DATETIME NOT NULL,
            created_at DATETIME NOT NULL,
            updated_at DATETIME NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| {
        DatabaseError::MigrationError(format!("Failed to create bot_state table: {}", e))
    })?;

    // Databases created before sell orders carried their trade
    let has_trade_id: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('orders') WHERE name = 'trade_id'",
    )
    .fetch_one(pool)
    .await
    .map_err(|e| DatabaseError::MigrationError(format!("Failed to inspect orders table: {}", e)))?;
    if has_trade_id == 0 {
        sqlx::query("ALTER TABLE orders ADD COLUMN trade_id INTEGER")
            .execute(pool)
            .await
            .map_err(|e| {
                DatabaseError::MigrationError(format!("Failed to add orders.trade_id: {}", e))
            })?;
    }

    // Create indexes for better query performance
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_side_status ON orders(side, status)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_orders_trade_id ON orders(trade_id)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_status ON trades(status)")
        .execute(pool)
        .await
        .map_err(|e| DatabaseError::MigrationError(format!("Failed to create index: {}", e)))?;

    info!("✓ Database migrations completed successfully");

    Ok(())
}

/// Database configuration
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/dcabot.db")
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Log statements at debug level
    pub log_queries: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://data/dcabot.db".to_string(),
            max_connections: 5,
            log_queries: cfg!(debug_assertions),
        }
    }
}

impl DatabaseConfig {
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            ..Self::default()
        }
    }

    /// Load from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_connections);

        let log_queries = std::env::var("DATABASE_LOG_QUERIES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.log_queries);

        Self {
            url,
            max_connections,
            log_queries,
        }
    }
}

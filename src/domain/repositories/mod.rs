pub mod exchange_client;
pub mod trading_store;

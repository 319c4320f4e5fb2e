//! DCA Trading Bot Library
//!
//! Staggered dollar-cost-averaging bot for a spot exchange: places laddered
//! limit buys, attaches profit-taking sells to filled buys and reconciles local
//! order and trade records against the exchange every cycle.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod rate_limit;
pub mod secrets;

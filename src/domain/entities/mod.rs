pub mod bot_state;
pub mod order;
pub mod trade;

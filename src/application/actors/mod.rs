pub mod cycle_actor;

pub use cycle_actor::*;

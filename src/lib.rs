// Core modules
pub mod analysis;
pub mod balance;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod ledger;
pub mod lifecycle;
pub mod market_data;
pub mod models;
pub mod persistence;
pub mod pipeline;
pub mod risk;
pub mod strategy;

// Re-export commonly used types
pub use error::{BotError, Result};
pub use lifecycle::{BotLifecycle, LifecycleOutcome};
pub use models::*;
pub use strategy::{DecisionEngine, EngineSettings};

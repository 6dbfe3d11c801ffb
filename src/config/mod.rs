//! Configuration for the trading engine

pub mod loader;
pub mod types;

pub use loader::{load_config, DEFAULT_CONFIG_PATH};
pub use types::{
    AnalyzerConfig, AnalyzerKind, AppConfig, BotConfig, PaperConfig, RiskConfig, StorageConfig,
    TradingConfig,
};

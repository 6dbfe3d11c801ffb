//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;

use super::types::AppConfig;
use crate::error::Result;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Load and validate configuration
///
/// Priority (highest to lowest):
/// 1. Environment variables (`TRADERBOT__RISK__MAX_DRAWDOWN=0.1`)
/// 2. Configuration file (TOML format)
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    dotenvy::dotenv().ok();

    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        } else {
            tracing::warn!("Config file {} not found, using defaults", path);
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("TRADERBOT")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config: AppConfig = builder.build()?.try_deserialize()?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeFrame;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("traderbot-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bot.toml");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[bot]
symbol = "ETHUSDT"
timeframe = "1h"

[risk]
max_martingale_steps = 3
take_profit = 0.05
"#
        )
        .unwrap();

        let config = load_config(path.to_str()).unwrap();
        assert_eq!(config.bot.symbol, "ETHUSDT");
        assert_eq!(config.bot.timeframe, TimeFrame::OneHour);
        assert_eq!(config.risk.max_martingale_steps, 3);
        assert_eq!(config.risk.take_profit, dec!(0.05));
        // untouched sections keep their defaults
        assert_eq!(config.risk.stop_loss, dec!(0.01));
        assert_eq!(config.trading.retry_delay_secs, 2);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = load_config(Some("/nonexistent/traderbot.toml")).unwrap();
        assert_eq!(config.bot.symbol, "BTCUSDT");
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = std::env::temp_dir().join(format!("traderbot-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "[risk]\nmartingale_multiplier = 0\n").unwrap();

        assert!(load_config(path.to_str()).is_err());

        std::fs::remove_dir_all(&dir).ok();
    }
}

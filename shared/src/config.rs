// ============================================================================
// RENTORA - SHARED CONFIGURATION MANAGEMENT
// ============================================================================
// Module: shared/src/config.rs
// Description: Environment-based configuration for the transactional core
// ============================================================================

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub inventory: InventoryConfig,
    pub rentals: RentalConfig,
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,      // seconds
    pub idle_timeout: Option<u64>, // seconds
    pub max_lifetime: Option<u64>, // seconds
    pub test_before_acquire: bool,
}

/// Inventory engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryConfig {
    pub maintenance_alert_days: i64,
    pub warranty_alert_days: i64,
    pub movement_retention_years: i64,
    pub error_event_retention_years: i64,
}

/// Rental fee configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RentalConfig {
    /// Late fee charged per item per day past the rental end date.
    pub late_fee_per_item_day: Decimal,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,  // trace, debug, info, warn, error
    pub format: String, // json, pretty, compact
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            // Database defaults
            .set_default("database.url", "postgres://localhost/rentora")?
            .set_default("database.max_connections", 20)?
            .set_default("database.min_connections", 1)?
            .set_default("database.acquire_timeout", 30)?
            .set_default("database.idle_timeout", 600)?
            .set_default("database.max_lifetime", 1800)?
            .set_default("database.test_before_acquire", true)?
            // Inventory defaults
            .set_default("inventory.maintenance_alert_days", 7)?
            .set_default("inventory.warranty_alert_days", 30)?
            .set_default("inventory.movement_retention_years", 7)?
            .set_default("inventory.error_event_retention_years", 1)?
            // Rental defaults
            .set_default("rentals.late_fee_per_item_day", "5.00")?
            // Logging defaults
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            // Optional config file
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Environment variables (APP__DATABASE__URL etc.)
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        config.try_deserialize()
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.database.acquire_timeout)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "postgres://localhost/rentora".to_string(),
                max_connections: 20,
                min_connections: 1,
                acquire_timeout: 30,
                idle_timeout: Some(600),
                max_lifetime: Some(1800),
                test_before_acquire: true,
            },
            inventory: InventoryConfig::default(),
            rentals: RentalConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            maintenance_alert_days: 7,
            warranty_alert_days: 30,
            movement_retention_years: 7,
            error_event_retention_years: 1,
        }
    }
}

impl Default for RentalConfig {
    fn default() -> Self {
        Self {
            late_fee_per_item_day: Decimal::new(500, 2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.inventory.movement_retention_years, 7);
        assert_eq!(config.rentals.late_fee_per_item_day, dec!(5.00));
    }
}

//! Worker configuration

use std::env;

use renova_billing::TaxTable;

/// Worker configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Batch job schedules (6-field cron). Defaults keep the dunning order
    // within a daily run: renewals, then delinquency, suspension, expiry.
    pub renewal_schedule: String,
    pub delinquency_schedule: String,
    pub suspension_schedule: String,
    pub expiration_schedule: String,

    // Optional JSON file overriding the built-in tax table
    pub tax_table_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),

            renewal_schedule: env::var("RENEWAL_SCHEDULE")
                .unwrap_or_else(|_| "0 0 0 * * *".to_string()),
            delinquency_schedule: env::var("DELINQUENCY_SCHEDULE")
                .unwrap_or_else(|_| "0 0 1 * * *".to_string()),
            suspension_schedule: env::var("SUSPENSION_SCHEDULE")
                .unwrap_or_else(|_| "0 0 2 * * *".to_string()),
            expiration_schedule: env::var("EXPIRATION_SCHEDULE")
                .unwrap_or_else(|_| "0 0 3 * * *".to_string()),

            tax_table_path: env::var("TAX_TABLE_PATH").ok(),
        })
    }

    /// Tax table to inject into the engine: the configured JSON file when
    /// set, otherwise the built-in rates.
    pub fn load_tax_table(&self) -> Result<TaxTable, ConfigError> {
        let Some(path) = &self.tax_table_path else {
            return Ok(TaxTable::builtin());
        };

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::TaxTable(format!("read {}: {}", path, e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| ConfigError::TaxTable(format!("parse {}: {}", path, e)))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid tax table: {0}")]
    TaxTable(String),
}

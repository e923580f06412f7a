use std::{env, fmt::Display, str::FromStr};

use log::info;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid {key} value: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_ttl_days: i64,
    /// Password accepted for profiles that have no stored hash yet.
    pub demo_password: String,
    pub static_dir: Option<String>,
    /// Seconds between background KPI deadline sweeps; 0 turns the sweep off.
    pub deadline_check_interval_secs: u64,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            database_url: required("DATABASE_URL")?,
            port: try_load("PORT", "3001")?,
            jwt_secret: required("JWT_SECRET")?,
            jwt_ttl_days: try_load("JWT_TTL_DAYS", "7")?,
            demo_password: try_load("DEMO_PASSWORD", "123456")?,
            static_dir: env::var("STATIC_DIR").ok().filter(|dir| !dir.is_empty()),
            deadline_check_interval_secs: try_load("DEADLINE_CHECK_INTERVAL_SECS", "21600")?,
        })
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    env::var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| ConfigError::Invalid {
            key,
            message: e.to_string(),
        })
}

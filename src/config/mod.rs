use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub jwt: JwtConfig,
    pub booking: BookingConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `postgres://...` или `sqlite:...`, схема URL выбирает движок.
    pub url: String,
    pub pool_size: u32,
    pub acquire_timeout_secs: u64,
    /// Сколько транзакция ждёт блокировку, прежде чем вернуть `Busy`.
    pub lock_timeout_ms: u64,
}

impl DatabaseConfig {
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_size: 20,
            acquire_timeout_secs: 5,
            lock_timeout_ms: 5_000,
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

// Настройки JWT
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
}

// Настройки бронирования
#[derive(Debug, Clone, Deserialize)]
pub struct BookingConfig {
    /// Попытки сгенерировать уникальный номер брони.
    pub reference_attempts: u32,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            reference_attempts: 5,
        }
    }
}

fn var_or<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .with_context(|| format!("{key} must be a valid value"))
}

fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{key} must be set"))
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = BookingConfig::default();

        Ok(Config {
            app: AppConfig {
                host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: var_or("PORT", "8000")?,
                environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
                rust_log: env::var("RUST_LOG")
                    .unwrap_or_else(|_| "seat_booking=debug,tower_http=debug".to_string()),
            },
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                pool_size: var_or("DB_POOL_SIZE", "20")?,
                acquire_timeout_secs: var_or("DB_ACQUIRE_TIMEOUT_SECS", "5")?,
                lock_timeout_ms: var_or("DB_LOCK_TIMEOUT_MS", "5000")?,
            },
            jwt: JwtConfig {
                secret: required("JWT_SECRET")?,
            },
            booking: BookingConfig {
                reference_attempts: var_or(
                    "BOOKING_REFERENCE_ATTEMPTS",
                    &defaults.reference_attempts.to_string(),
                )?,
            },
        })
    }
}

//! Environment configuration (spec §6): every knob the server needs is an
//! env var, loaded once at startup. No hot-reload of config itself -- only
//! the case economy file reloads at runtime, via the admin surface.

use std::path::PathBuf;

use secrecy::SecretString;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotMode {
    Webhook,
    LongPolling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    File,
    Db,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("environment variable {name} has an invalid value: {value}")]
    Invalid { name: &'static str, value: String },
}

pub struct Config {
    pub bot_token: SecretString,
    pub bot_mode: BotMode,
    pub webhook_secret_token: SecretString,
    pub webhook_path: String,
    pub public_base_url: String,
    pub admin_token: Option<SecretString>,
    pub rng_storage: StorageBackend,
    pub fairness_key: SecretString,
    pub database_url: Option<String>,
    pub port: u16,
    pub health_path: String,
    pub metrics_path: String,
    pub cases_path: PathBuf,
    pub data_dir: PathBuf,
    pub queue_capacity: usize,
    pub queue_workers: usize,
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn optional(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn with_default(name: &'static str, default: &str) -> String {
    optional(name).unwrap_or_else(|| default.to_owned())
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let bot_token = SecretString::new(required("BOT_TOKEN")?);

        let bot_mode = match with_default("BOT_MODE", "webhook").as_str() {
            "webhook" => BotMode::Webhook,
            "long_polling" => BotMode::LongPolling,
            other => {
                return Err(ConfigError::Invalid { name: "BOT_MODE", value: other.to_owned() })
            }
        };

        let webhook_secret_token = SecretString::new(required("WEBHOOK_SECRET_TOKEN")?);
        let webhook_path = with_default("WEBHOOK_PATH", "/telegram/webhook");
        let public_base_url = required("PUBLIC_BASE_URL")?;
        let admin_token = optional("ADMIN_TOKEN").map(SecretString::new);

        let rng_storage = match with_default("RNG_STORAGE", "memory").as_str() {
            "memory" => StorageBackend::Memory,
            "file" => StorageBackend::File,
            "db" => StorageBackend::Db,
            other => {
                return Err(ConfigError::Invalid { name: "RNG_STORAGE", value: other.to_owned() })
            }
        };

        let fairness_key = SecretString::new(required("FAIRNESS_KEY")?);

        let database_url = optional("DATABASE_URL");
        if rng_storage == StorageBackend::Db && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let port: u16 = with_default("PORT", "8080")
            .parse()
            .map_err(|_| ConfigError::Invalid { name: "PORT", value: std::env::var("PORT").unwrap_or_default() })?;

        let health_path = with_default("HEALTH_PATH", "/health");
        let metrics_path = with_default("METRICS_PATH", "/metrics");
        let cases_path = PathBuf::from(with_default("CASES_PATH", "cases.yaml"));
        let data_dir = PathBuf::from(with_default("DATA_DIR", "data"));

        let queue_capacity: usize = with_default("QUEUE_CAPACITY", "1024")
            .parse()
            .unwrap_or(1024);
        let queue_workers: usize = with_default("QUEUE_WORKERS", "4")
            .parse()
            .unwrap_or(4);

        Ok(Config {
            bot_token,
            bot_mode,
            webhook_secret_token,
            webhook_path,
            public_base_url,
            admin_token,
            rng_storage,
            fairness_key,
            database_url,
            port,
            health_path,
            metrics_path,
            cases_path,
            data_dir,
            queue_capacity,
            queue_workers,
        })
    }
}

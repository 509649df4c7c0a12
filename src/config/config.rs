use std::time::Duration;

use color_eyre::Result;
use dotenv::dotenv;
use eyre::{WrapErr, eyre};
use serde::Deserialize;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Empty or absent selects the in-memory team store.
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_platform_name")]
    pub platform_name: String,

    #[serde(default)]
    pub smtp_host: Option<String>,
    #[serde(default)]
    pub smtp_user: Option<String>,
    #[serde(default)]
    pub smtp_pass: Option<String>,

    #[serde(default = "default_team_id_prefix")]
    pub team_id_prefix: String,
    /// Echo the OTP in the response when email delivery fails. Development only.
    #[serde(default)]
    pub expose_otp_on_delivery_failure: bool,

    #[serde(default = "default_ttl_secs")]
    pub otp_ttl_secs: u64,
    #[serde(default = "default_ttl_secs")]
    pub registration_ttl_secs: u64,
    #[serde(default = "default_attempt_limit")]
    pub otp_generation_limit: u32,
    #[serde(default = "default_generation_window_secs")]
    pub otp_generation_window_secs: u64,
    #[serde(default = "default_attempt_limit")]
    pub otp_verification_limit: u32,
    #[serde(default = "default_verification_window_secs")]
    pub otp_verification_window_secs: u64,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Seconds between expiry sweeps; 0 turns the sweeper off.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_platform_name() -> String {
    "Event Check-in".to_string()
}

fn default_team_id_prefix() -> String {
    "HACK2026".to_string()
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_attempt_limit() -> u32 {
    3
}

fn default_generation_window_secs() -> u64 {
    60
}

fn default_verification_window_secs() -> u64 {
    15 * 60
}

fn default_max_upload_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        info!("Initializing configuration");
        let settings = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .wrap_err("Building configuration")?;

        settings
            .try_deserialize()
            .wrap_err("loading configuration from environment")
    }

    pub fn database_url(&self) -> Option<&str> {
        self.database_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn registration_ttl(&self) -> Duration {
        Duration::from_secs(self.registration_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }

    pub async fn db_pool(&self) -> Result<PgPool> {
        let url = self
            .database_url()
            .ok_or_else(|| eyre!("DATABASE_URL is not set"))?;

        info!("Initializing database pool");
        PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(url)
            .await
            .wrap_err("Creating database pool")
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            database_url: None,
            platform_name: default_platform_name(),
            smtp_host: None,
            smtp_user: None,
            smtp_pass: None,
            team_id_prefix: default_team_id_prefix(),
            expose_otp_on_delivery_failure: false,
            otp_ttl_secs: default_ttl_secs(),
            registration_ttl_secs: default_ttl_secs(),
            otp_generation_limit: default_attempt_limit(),
            otp_generation_window_secs: default_generation_window_secs(),
            otp_verification_limit: default_attempt_limit(),
            otp_verification_window_secs: default_verification_window_secs(),
            max_upload_bytes: default_max_upload_bytes(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

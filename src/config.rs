// DANS : src/config.rs

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::rpc::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("lecture de la configuration impossible : {0}")]
    Env(#[from] envy::Error),
    #[error("aucun endpoint RPC configuré (RPC_URLS est vide)")]
    NoEndpoints,
    #[error("valeur invalide pour {field} : {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn default_poll_interval_secs() -> u64 { 30 }
fn default_signature_fetch_limit() -> usize { 2 }
fn default_tx_fetch_delay_ms() -> u64 { 500 }
fn default_max_retries() -> u32 { 3 }
fn default_rotation_strikes() -> u32 { 3 }
fn default_backoff_base_ms() -> u64 { 1_000 }
fn default_backoff_max_ms() -> u64 { 10_000 }
fn default_rpc_timeout_secs() -> u64 { 15 }
fn default_window_ttl_secs() -> u64 { 3_600 }
fn default_enrichment_ttl_secs() -> u64 { 600 }
fn default_enrichment_timeout_ms() -> u64 { 5_000 }
fn default_sol_threshold() -> f64 { 0.5 }
fn default_required_wallets() -> usize { 2 }
fn default_watchlist_file() -> String { "watchlist.json".to_string() }
fn default_metrics_port() -> u16 { 9100 }
fn default_log_format() -> String { "json".to_string() }

/// Configuration du processus, lue depuis l'environnement (et un éventuel `.env`).
#[derive(Deserialize, Debug, Clone)]
pub struct Config {
    /// Liste ordonnée des endpoints RPC, séparés par des virgules.
    pub rpc_urls: Vec<String>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_signature_fetch_limit")]
    pub signature_fetch_limit: usize,
    #[serde(default = "default_tx_fetch_delay_ms")]
    pub tx_fetch_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_rotation_strikes")]
    pub rotation_strikes: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "default_window_ttl_secs")]
    pub window_ttl_secs: u64,
    #[serde(default = "default_enrichment_ttl_secs")]
    pub enrichment_ttl_secs: u64,
    #[serde(default = "default_enrichment_timeout_ms")]
    pub enrichment_timeout_ms: u64,
    #[serde(default = "default_sol_threshold")]
    pub default_sol_threshold: f64,
    #[serde(default = "default_required_wallets")]
    pub default_required_wallets: usize,
    #[serde(default = "default_watchlist_file")]
    pub watchlist_file: String,
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Les réglages dont le moteur de détection a besoin, sans rien qui touche au processus.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub poll_interval: Duration,
    pub signature_fetch_limit: usize,
    pub tx_fetch_delay: Duration,
    pub window_ttl: Duration,
    pub enrichment_timeout: Duration,
    pub default_sol_threshold: f64,
    pub default_required_wallets: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(default_poll_interval_secs()),
            signature_fetch_limit: default_signature_fetch_limit(),
            tx_fetch_delay: Duration::from_millis(default_tx_fetch_delay_ms()),
            window_ttl: Duration::from_secs(default_window_ttl_secs()),
            enrichment_timeout: Duration::from_millis(default_enrichment_timeout_ms()),
            default_sol_threshold: default_sol_threshold(),
            default_required_wallets: default_required_wallets(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let config = envy::from_env::<Config>()?;
        config.validate()
    }

    /// Une config sans endpoint (ou avec des réglages absurdes) empêche le démarrage.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        self.rpc_urls = self
            .rpc_urls
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if self.rpc_urls.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }
        if !(self.default_sol_threshold > 0.0) {
            return Err(ConfigError::Invalid {
                field: "DEFAULT_SOL_THRESHOLD",
                reason: format!("doit être > 0 (reçu {})", self.default_sol_threshold),
            });
        }
        if self.default_required_wallets == 0 {
            return Err(ConfigError::Invalid {
                field: "DEFAULT_REQUIRED_WALLETS",
                reason: "doit être >= 1".to_string(),
            });
        }
        if self.signature_fetch_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "SIGNATURE_FETCH_LIMIT",
                reason: "doit être >= 1".to_string(),
            });
        }
        Ok(self)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.backoff_base_ms),
            max_delay: Duration::from_millis(self.backoff_max_ms),
            rotation_strikes: self.rotation_strikes,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            signature_fetch_limit: self.signature_fetch_limit,
            tx_fetch_delay: Duration::from_millis(self.tx_fetch_delay_ms),
            window_ttl: Duration::from_secs(self.window_ttl_secs),
            enrichment_timeout: Duration::from_millis(self.enrichment_timeout_ms),
            default_sol_threshold: self.default_sol_threshold,
            default_required_wallets: self.default_required_wallets,
        }
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn enrichment_ttl(&self) -> Duration {
        Duration::from_secs(self.enrichment_ttl_secs)
    }
}

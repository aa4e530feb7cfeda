// DANS : src/rpc/retrying_caller.rs

use anyhow::Result;
use solana_client::{
    client_error::{ClientError, ClientErrorKind},
    rpc_request::RpcError,
};
use std::{future::Future, sync::Arc, time::Duration};
use tokio::time::sleep;
use tracing::debug;

use super::endpoint_pool::{Endpoint, EndpointPool};
use crate::monitoring::metrics;

/// Les trois familles d'erreurs amont.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Le nœud nous demande explicitement de ralentir (HTTP 429, "too many requests").
    RateLimited,
    /// Erreur réseau temporaire : on réessaie, sans pénaliser l'endpoint.
    Transient,
    /// Tout le reste : on abandonne tout de suite.
    Fatal,
}

impl ErrorClass {
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Transient => "transient",
            ErrorClass::Fatal => "fatal",
        }
    }
}

const RATE_LIMIT_RPC_CODES: [i64; 2] = [429, -32429];

// Jetons délimités : un "429" nu peut apparaître dans un numéro de slot ou une signature.
const RATE_LIMIT_MARKERS: [&str; 6] = [
    "429 too many",
    "status 429",
    "status: 429",
    "too many requests",
    "rate limit",
    "rate-limit",
];
const TRANSIENT_MARKERS: [&str; 3] = ["timed out", "connection reset", "connection refused"];

fn classify_reqwest(error: &reqwest::Error) -> ErrorClass {
    if error.status().map(|s| s.as_u16()) == Some(429) {
        ErrorClass::RateLimited
    } else if error.status().is_some_and(|s| s.is_client_error()) {
        ErrorClass::Fatal
    } else {
        ErrorClass::Transient
    }
}

fn classify_text(text: &str) -> ErrorClass {
    let text = text.to_lowercase();
    if RATE_LIMIT_MARKERS.iter().any(|m| text.contains(m)) {
        ErrorClass::RateLimited
    } else if TRANSIENT_MARKERS.iter().any(|m| text.contains(m)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}

/// Détermine à quelle famille appartient une erreur remontée par un appel amont.
///
/// Une erreur typée (`ClientError`, `reqwest::Error`) est classée par son type ou son code.
/// Le texte n'est consulté que pour les erreurs sans type exploitable.
pub fn classify_error(error: &anyhow::Error) -> ErrorClass {
    for cause in error.chain() {
        if let Some(client_error) = cause.downcast_ref::<ClientError>() {
            return match &client_error.kind {
                ClientErrorKind::Reqwest(e) => classify_reqwest(e),
                ClientErrorKind::Io(_) => ErrorClass::Transient,
                ClientErrorKind::RpcError(RpcError::RpcResponseError { code, .. }) => {
                    if RATE_LIMIT_RPC_CODES.contains(code) {
                        ErrorClass::RateLimited
                    } else {
                        ErrorClass::Fatal
                    }
                }
                ClientErrorKind::SerdeJson(_) => ErrorClass::Fatal,
                // Erreurs de transport HTTP remontées sous forme de message.
                other => classify_text(&other.to_string()),
            };
        }
        if let Some(e) = cause.downcast_ref::<reqwest::Error>() {
            return classify_reqwest(e);
        }
    }

    classify_text(&format!("{:#}", error))
}

/// Paramètres de ré-essai.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Nombre d'échecs rate-limit (sur tout le pool) avant rotation de l'endpoint.
    pub rotation_strikes: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            rotation_strikes: 3,
        }
    }
}

impl RetryPolicy {
    /// `min(base * 2^attempt, max)`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Exécute n'importe quel appel amont contre l'endpoint actif, avec un backoff
/// exponentiel borné. Les rate-limit répétés font tourner le pool.
#[derive(Clone)]
pub struct RetryingCaller {
    pool: Arc<EndpointPool>,
    policy: RetryPolicy,
}

impl RetryingCaller {
    pub fn new(pool: Arc<EndpointPool>, policy: RetryPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn pool(&self) -> &Arc<EndpointPool> {
        &self.pool
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Appelle `f` avec l'endpoint actif. `f` est rappelée à chaque tentative et peut donc
    /// recevoir un endpoint différent après une rotation.
    pub async fn call<T, F, Fut>(&self, method: &'static str, mut f: F) -> Result<T>
    where
        F: FnMut(Arc<Endpoint>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            self.pool.record_request();
            let endpoint = self.pool.current();

            let error = match f(endpoint.clone()).await {
                Ok(value) => {
                    metrics::RPC_REQUESTS_TOTAL.with_label_values(&[method, "success"]).inc();
                    return Ok(value);
                }
                Err(e) => e,
            };

            let class = classify_error(&error);
            metrics::RPC_REQUESTS_TOTAL.with_label_values(&[method, class.as_label()]).inc();

            match class {
                ErrorClass::Fatal => return Err(error),
                ErrorClass::RateLimited => {
                    self.pool.record_rate_limit(self.policy.rotation_strikes);
                }
                ErrorClass::Transient => {}
            }

            if attempt >= self.policy.max_retries {
                return Err(error.context(format!(
                    "Échec final de {} après {} tentatives",
                    method,
                    attempt + 1
                )));
            }

            let delay = self.policy.backoff(attempt);
            debug!(
                method,
                endpoint = %endpoint.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                class = class.as_label(),
                "[RpcPool] Nouvelle tentative après erreur amont."
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

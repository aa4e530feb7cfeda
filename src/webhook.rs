// DANS : src/webhook.rs

// Entrée alternative au polling : un service externe pousse une signature et les comptes
// qu'elle touche. Le serveur HTTP lui-même est hors de ce crate.
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::detection::{BuySignal, DetectionContext};
use crate::monitoring::metrics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookPayload {
    pub signature: String,
    #[serde(default)]
    pub account_keys: Vec<String>,
}

/// Classe la transaction pour chaque (abonné, portefeuille suivi) présent dans `account_keys`.
/// La transaction n'est récupérée qu'une fois, et seulement si quelqu'un suit un des comptes.
pub async fn process_webhook(ctx: &DetectionContext, payload: &WebhookPayload) -> Result<Vec<BuySignal>> {
    let mut candidates = Vec::new();
    for key in &payload.account_keys {
        let Ok(address) = Pubkey::from_str(key) else {
            debug!(key = %key, "[Webhook] Clé de compte illisible, ignorée.");
            continue;
        };
        for (subscriber, settings, wallet) in ctx.store.subscribers_tracking(&address).await {
            if settings.is_paused {
                debug!(subscriber = %subscriber, wallet = %wallet.nickname, "[Webhook] Abonné en pause.");
                continue;
            }
            candidates.push((subscriber, settings, wallet));
        }
    }
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let Some(tx) = ctx
        .chain
        .get_transaction(&payload.signature)
        .await
        .with_context(|| format!("Impossible de récupérer la transaction {}", payload.signature))?
    else {
        warn!(signature = %payload.signature, "[Webhook] Transaction introuvable côté RPC.");
        return Ok(Vec::new());
    };
    metrics::TRANSACTIONS_FETCHED.inc();

    let mut signals = Vec::new();
    for (subscriber, settings, wallet) in candidates {
        if let Some(signal) = ctx.handle_transaction(subscriber, &settings, &wallet, &tx).await {
            signals.push(signal);
        }
    }
    Ok(signals)
}

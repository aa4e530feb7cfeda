// DANS : src/detection/poller.rs

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use super::{pipeline::DetectionContext, BuySignal};
use crate::chain::SignatureInfo;
use crate::monitoring::metrics;
use crate::state::SubscriberId;

/// Ce qu'un tick de polling a fait.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// Le portefeuille (ou l'abonné) n'existe plus : la tâche doit s'arrêter.
    Untracked,
    Paused,
    NoNewSignatures,
    Processed {
        new_signatures: usize,
        signals: Vec<BuySignal>,
    },
}

/// Les signatures plus récentes que le curseur. `recent` est ordonné du plus récent au
/// plus ancien ; sans curseur, ou si le curseur est sorti de la liste, tout est nouveau.
pub fn new_signatures<'a>(recent: &'a [SignatureInfo], cursor: Option<&str>) -> &'a [SignatureInfo] {
    let end = match cursor {
        Some(cursor) => recent
            .iter()
            .position(|info| info.signature == cursor)
            .unwrap_or(recent.len()),
        None => recent.len(),
    };
    &recent[..end]
}

/// Un tick complet pour un (abonné, adresse).
///
/// Le curseur avance sur la signature la plus récente AVANT de traiter les corps de
/// transaction : un arrêt en plein lot perd les transactions restantes au lieu de les
/// rejouer (au plus une fois).
pub async fn poll_once(ctx: &DetectionContext, subscriber: SubscriberId, address: &Pubkey) -> Result<PollOutcome> {
    let Some((settings, wallet)) = ctx.store.snapshot(subscriber, address).await else {
        return Ok(PollOutcome::Untracked);
    };
    if settings.is_paused {
        debug!(subscriber = %subscriber, wallet = %wallet.nickname, "[Poller] Abonné en pause, tick ignoré.");
        return Ok(PollOutcome::Paused);
    }

    let recent = ctx
        .chain
        .list_recent_signatures(address, ctx.settings.signature_fetch_limit)
        .await
        .with_context(|| format!("Impossible de lister les signatures de {}", address))?;

    let fresh = new_signatures(&recent, wallet.last_processed_signature.as_deref());
    let Some(newest) = fresh.first() else {
        return Ok(PollOutcome::NoNewSignatures);
    };

    if !ctx.store.advance_cursor(subscriber, address, newest.signature.clone()).await {
        // Retiré pendant l'appel RPC.
        return Ok(PollOutcome::Untracked);
    }
    debug!(
        subscriber = %subscriber,
        wallet = %wallet.nickname,
        count = fresh.len(),
        cursor = %newest.signature,
        "[Poller] Nouvelles signatures."
    );

    let mut signals = Vec::new();
    for (i, info) in fresh.iter().rev().enumerate() {
        if i > 0 && !ctx.settings.tx_fetch_delay.is_zero() {
            tokio::time::sleep(ctx.settings.tx_fetch_delay).await;
        }

        let tx = match ctx.chain.get_transaction(&info.signature).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                debug!(signature = %info.signature, "[Poller] Transaction pas encore visible, ignorée.");
                continue;
            }
            Err(e) => {
                warn!(subscriber = %subscriber, signature = %info.signature, error = %e, "[Poller] Échec de récupération de la transaction.");
                continue;
            }
        };
        metrics::TRANSACTIONS_FETCHED.inc();

        if let Some(signal) = ctx.handle_transaction(subscriber, &settings, &wallet, &tx).await {
            signals.push(signal);
        }
    }

    Ok(PollOutcome::Processed {
        new_signatures: fresh.len(),
        signals,
    })
}

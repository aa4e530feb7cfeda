// DANS : src/engine.rs

use anyhow::Result;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::sync::Arc;
use tracing::{info, warn};

use crate::alerts::AlertDispatcher;
use crate::chain::ChainClient;
use crate::config::EngineSettings;
use crate::detection::{BuySignal, DetectionContext, PollerRegistry};
use crate::enrichment::EnrichmentClient;
use crate::state::{
    unix_now, validate_address, SubscriberId, SubscriberSettings, SubscriberStore, TrackError, TrackedWallet,
};
use crate::webhook::{process_webhook, WebhookPayload};

/// Une demande de suivi venant du front-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRequest {
    pub address: String,
    #[serde(default)]
    pub nickname: Option<String>,
}

/// Le résultat d'un suivi, adresse par adresse.
#[derive(Debug, PartialEq)]
pub struct TrackOutcome {
    pub address: String,
    pub result: Result<TrackedWallet, TrackError>,
}

/// Point d'entrée unique du front-end : suivi des portefeuilles, réglages, webhook.
pub struct Engine {
    ctx: Arc<DetectionContext>,
    pollers: PollerRegistry,
}

impl Engine {
    pub fn new(
        settings: EngineSettings,
        chain: Arc<dyn ChainClient>,
        enrichment: Arc<dyn EnrichmentClient>,
        dispatcher: Arc<dyn AlertDispatcher>,
    ) -> Self {
        let store = Arc::new(SubscriberStore::new(
            settings.default_sol_threshold,
            settings.default_required_wallets,
        ));
        Self {
            ctx: Arc::new(DetectionContext::new(settings, store, chain, enrichment, dispatcher)),
            pollers: PollerRegistry::new(),
        }
    }

    pub fn context(&self) -> &Arc<DetectionContext> {
        &self.ctx
    }

    pub fn store(&self) -> &SubscriberStore {
        &self.ctx.store
    }

    /// Suit un lot d'adresses. Une adresse invalide ou déjà suivie est rejetée seule,
    /// sans empêcher les autres.
    pub async fn track_wallets(&self, subscriber: SubscriberId, requests: Vec<TrackRequest>) -> Vec<TrackOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            let result = self.track_one(subscriber, &request).await;
            if let Err(e) = &result {
                warn!(subscriber = %subscriber, address = %request.address, error = %e, "[Engine] Suivi refusé.");
            }
            outcomes.push(TrackOutcome {
                address: request.address,
                result,
            });
        }
        outcomes
    }

    async fn track_one(&self, subscriber: SubscriberId, request: &TrackRequest) -> Result<TrackedWallet, TrackError> {
        let address = validate_address(&request.address)?;
        let nickname = request
            .nickname
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| address.to_string());

        let wallet = self
            .ctx
            .store
            .add_wallet(subscriber, address, nickname, unix_now())
            .await?;
        self.pollers.start(Arc::clone(&self.ctx), subscriber, address).await;
        info!(subscriber = %subscriber, wallet = %wallet.nickname, address = %address, "[Engine] Portefeuille suivi.");
        Ok(wallet)
    }

    /// La tâche est annulée avant que le curseur et l'heure de départ soient effacés.
    pub async fn untrack_wallet(&self, subscriber: SubscriberId, address: &str) -> Result<TrackedWallet, TrackError> {
        let address = validate_address(address)?;
        self.pollers.cancel(subscriber, &address).await;
        let removed = self.ctx.store.remove_wallet(subscriber, &address).await?;
        info!(subscriber = %subscriber, wallet = %removed.nickname, "[Engine] Portefeuille retiré.");
        Ok(removed)
    }

    pub async fn set_paused(&self, subscriber: SubscriberId, paused: bool) -> SubscriberSettings {
        let settings = self.ctx.store.set_paused(subscriber, paused).await;
        info!(subscriber = %subscriber, paused, "[Engine] Pause mise à jour.");
        settings
    }

    pub async fn update_settings(
        &self,
        subscriber: SubscriberId,
        sol_threshold: Option<f64>,
        required_wallets: Option<usize>,
    ) -> Result<SubscriberSettings, TrackError> {
        self.ctx
            .store
            .update_settings(subscriber, sol_threshold, required_wallets)
            .await
    }

    pub async fn list_wallets(&self, subscriber: SubscriberId) -> Vec<TrackedWallet> {
        self.ctx.store.list_wallets(subscriber).await
    }

    pub async fn is_polling(&self, subscriber: SubscriberId, address: &Pubkey) -> bool {
        self.pollers.is_running(subscriber, address).await
    }

    pub async fn ingest_webhook(&self, payload: &WebhookPayload) -> Result<Vec<BuySignal>> {
        process_webhook(&self.ctx, payload).await
    }

    pub async fn active_windows(&self) -> usize {
        self.ctx.aggregator.active_windows().await
    }

    pub async fn shutdown(&self) {
        self.pollers.shutdown().await;
    }
}

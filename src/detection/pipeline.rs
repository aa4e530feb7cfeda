// DANS : src/detection/pipeline.rs

use solana_sdk::pubkey::Pubkey;
use std::{
    collections::{HashSet, VecDeque},
    future::Future,
    sync::Arc,
    time::Duration,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::{aggregator::SignalAggregator, classifier::classify, BuySignal};
use crate::alerts::{AlertDispatcher, CoordinatedBuyAlert};
use crate::chain::{ChainClient, TransactionBalances};
use crate::config::EngineSettings;
use crate::enrichment::{EnrichmentClient, MarketData, TokenMetadata, TokenProfile, VolumeData};
use crate::monitoring::metrics;
use crate::state::{SubscriberId, SubscriberSettings, SubscriberStore, TrackedWallet};

const SEEN_SIGNATURES_LIMIT: usize = 10_000;

type SeenKey = (SubscriberId, Pubkey, String);

/// Mémoire bornée des transactions déjà classées, pour qu'une même signature arrivant
/// par le polling et par le webhook ne soit comptée qu'une fois.
struct SeenSignatures {
    queue: VecDeque<SeenKey>,
    set: HashSet<SeenKey>,
    limit: usize,
}

impl SeenSignatures {
    fn new(limit: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            set: HashSet::new(),
            limit,
        }
    }

    /// `false` si la clé était déjà connue.
    fn mark(&mut self, key: SeenKey) -> bool {
        if !self.set.insert(key.clone()) {
            return false;
        }
        self.queue.push_back(key);
        while self.queue.len() > self.limit {
            if let Some(oldest) = self.queue.pop_front() {
                self.set.remove(&oldest);
            }
        }
        true
    }
}

/// Tout ce dont une tâche de polling (ou le webhook) a besoin, passé par référence.
pub struct DetectionContext {
    pub settings: EngineSettings,
    pub store: Arc<SubscriberStore>,
    pub aggregator: SignalAggregator,
    pub chain: Arc<dyn ChainClient>,
    pub enrichment: Arc<dyn EnrichmentClient>,
    pub dispatcher: Arc<dyn AlertDispatcher>,
    seen: Mutex<SeenSignatures>,
}

impl DetectionContext {
    pub fn new(
        settings: EngineSettings,
        store: Arc<SubscriberStore>,
        chain: Arc<dyn ChainClient>,
        enrichment: Arc<dyn EnrichmentClient>,
        dispatcher: Arc<dyn AlertDispatcher>,
    ) -> Self {
        Self {
            aggregator: SignalAggregator::new(settings.window_ttl),
            settings,
            store,
            chain,
            enrichment,
            dispatcher,
            seen: Mutex::new(SeenSignatures::new(SEEN_SIGNATURES_LIMIT)),
        }
    }

    /// Traite une transaction déjà récupérée pour un (abonné, portefeuille) :
    /// filtre de l'historique, classification, enrichissement, agrégation, alerte.
    /// Retourne le signal produit, s'il y en a un.
    pub async fn handle_transaction(
        &self,
        subscriber: SubscriberId,
        settings: &SubscriberSettings,
        wallet: &TrackedWallet,
        tx: &TransactionBalances,
    ) -> Option<BuySignal> {
        if let Some(block_time) = tx.block_time {
            if block_time < wallet.monitoring_start_time {
                debug!(
                    wallet = %wallet.address,
                    signature = %tx.signature,
                    "[Pipeline] Transaction antérieure au début du suivi, ignorée."
                );
                return None;
            }
        }

        let first_time = self
            .seen
            .lock()
            .await
            .mark((subscriber, wallet.address, tx.signature.clone()));
        if !first_time {
            debug!(signature = %tx.signature, "[Pipeline] Transaction déjà traitée.");
            return None;
        }

        let Some(signal) = classify(tx, settings, &wallet.address) else {
            debug!(wallet = %wallet.address, signature = %tx.signature, "[Pipeline] Pas un achat (ou sous le seuil).");
            return None;
        };
        metrics::SIGNALS_CLASSIFIED.inc();

        if !signal.is_actionable() {
            debug!(wallet = %wallet.address, signature = %tx.signature, "[Pipeline] Dépense sans token identifiable.");
            return Some(signal);
        }

        let token = self.enrich(&signal.asset).await;
        info!(
            subscriber = %subscriber,
            wallet = %wallet.nickname,
            mint = %signal.asset,
            token = %token.display_name(),
            sol = signal.sol_spent(),
            signature = %signal.signature,
            "[Pipeline] Achat détecté."
        );

        self.ingest(subscriber, settings, &signal, token).await;
        Some(signal)
    }

    /// Passe le signal à l'agrégateur et envoie l'alerte si la fenêtre se déclenche.
    pub async fn ingest(
        &self,
        subscriber: SubscriberId,
        settings: &SubscriberSettings,
        signal: &BuySignal,
        token: TokenProfile,
    ) -> Option<CoordinatedBuyAlert> {
        let window = self.aggregator.ingest(subscriber, settings, signal, token).await?;
        let nicknames = self.store.nicknames(subscriber).await;
        let alert = CoordinatedBuyAlert::from_window(window, &nicknames);

        match self.dispatcher.dispatch(&alert).await {
            Ok(()) => {
                metrics::ALERTS_DISPATCHED.inc();
                info!(
                    subscriber = %subscriber,
                    mint = %alert.mint,
                    buyers = alert.buyer_count,
                    total_sol = alert.total_spent_sol,
                    "[Pipeline] Alerte envoyée."
                );
            }
            Err(e) => {
                metrics::ALERTS_FAILED.inc();
                error!(subscriber = %subscriber, mint = %alert.mint, error = %e, "[Pipeline] Échec d'envoi de l'alerte (non ré-essayé).");
            }
        }
        Some(alert)
    }

    /// Les trois recherches en parallèle, chacune bornée dans le temps.
    pub async fn enrich(&self, mint: &str) -> TokenProfile {
        let timeout = self.settings.enrichment_timeout;
        let (metadata, market, volume) = tokio::join!(
            bounded(timeout, self.enrichment.metadata(mint), || TokenMetadata::unknown(mint)),
            bounded(timeout, self.enrichment.market_data(mint), MarketData::default),
            bounded(timeout, self.enrichment.volume_data(mint), VolumeData::default),
        );
        TokenProfile { metadata, market, volume }
    }
}

async fn bounded<T>(timeout: Duration, lookup: impl Future<Output = T>, fallback: impl FnOnce() -> T) -> T {
    match tokio::time::timeout(timeout, lookup).await {
        Ok(value) => value,
        Err(_) => {
            warn!(timeout_ms = timeout.as_millis() as u64, "[Pipeline] Enrichissement trop lent, valeurs inconnues.");
            fallback()
        }
    }
}

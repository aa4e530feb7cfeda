// DANS : src/detection/aggregator.rs

use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{lamports_to_sol, sol_to_lamports, BuySignal};
use crate::enrichment::TokenProfile;
use crate::monitoring::metrics;
use crate::state::{unix_now, SubscriberId, SubscriberSettings};

/// Durée de vie par défaut d'une fenêtre qui ne se déclenche pas.
pub const DEFAULT_WINDOW_TTL: Duration = Duration::from_secs(3_600);

type WindowKey = (SubscriberId, String);

/// Ce qu'un portefeuille a dépensé sur un actif dans la fenêtre.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletSpend {
    pub lamports_spent: u64,
    pub asset_amount: f64,
    pub buys: u32,
}

/// Les acheteurs d'un actif pour un abonné, jusqu'au déclenchement ou à l'expiration.
#[derive(Debug, Clone)]
pub struct AggregationWindow {
    pub per_wallet: HashMap<Pubkey, WalletSpend>,
    pub first_seen: Instant,
    pub last_updated: Instant,
    pub opened_at_unix: i64,
    /// Dernier enrichissement connu de l'actif (pour l'affichage de l'alerte).
    pub token: TokenProfile,
}

impl AggregationWindow {
    fn new(now: Instant, token: TokenProfile) -> Self {
        Self {
            per_wallet: HashMap::new(),
            first_seen: now,
            last_updated: now,
            opened_at_unix: unix_now(),
            token,
        }
    }

    fn record(&mut self, signal: &BuySignal, now: Instant) {
        let entry = self.per_wallet.entry(signal.wallet).or_insert(WalletSpend {
            lamports_spent: 0,
            asset_amount: 0.0,
            buys: 0,
        });
        entry.lamports_spent = entry.lamports_spent.saturating_add(signal.lamports_spent);
        entry.asset_amount += signal.asset_amount;
        entry.buys += 1;
        self.last_updated = now;
    }

    pub fn total_lamports(&self) -> u64 {
        self.per_wallet.values().map(|w| w.lamports_spent).sum()
    }

    pub fn buyer_count(&self) -> usize {
        self.per_wallet.len()
    }

    fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_updated) > ttl
    }
}

/// Une fenêtre qui vient d'atteindre le quorum et le seuil. Elle a déjà été retirée.
#[derive(Debug, Clone)]
pub struct TriggeredWindow {
    pub subscriber: SubscriberId,
    pub asset: String,
    pub per_wallet: HashMap<Pubkey, WalletSpend>,
    pub total_lamports: u64,
    pub opened_at_unix: i64,
    pub open_for: Duration,
    pub token: TokenProfile,
}

impl TriggeredWindow {
    pub fn total_spent_sol(&self) -> f64 {
        lamports_to_sol(self.total_lamports)
    }

    pub fn buyer_count(&self) -> usize {
        self.per_wallet.len()
    }
}

/// Les fenêtres d'agrégation de tous les abonnés, derrière un seul verrou :
/// chaque `ingest` est sérialisé, aucune mise à jour perdue entre tâches de polling.
pub struct SignalAggregator {
    windows: Mutex<HashMap<WindowKey, AggregationWindow>>,
    ttl: Duration,
}

impl Default for SignalAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_TTL)
    }
}

impl SignalAggregator {
    pub fn new(ttl: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn ingest(
        &self,
        subscriber: SubscriberId,
        settings: &SubscriberSettings,
        signal: &BuySignal,
        token: TokenProfile,
    ) -> Option<TriggeredWindow> {
        self.ingest_at(subscriber, settings, signal, token, Instant::now()).await
    }

    /// Ajoute le signal à la fenêtre (abonné, actif) et la déclenche si le quorum et le
    /// seuil sont atteints. Puis balaie les fenêtres expirées, toutes clés confondues.
    pub async fn ingest_at(
        &self,
        subscriber: SubscriberId,
        settings: &SubscriberSettings,
        signal: &BuySignal,
        token: TokenProfile,
        now: Instant,
    ) -> Option<TriggeredWindow> {
        if !signal.is_actionable() {
            debug!(wallet = %signal.wallet, signature = %signal.signature, "[Aggregator] Actif inconnu, signal ignoré.");
            return None;
        }

        let mut windows = self.windows.lock().await;
        let key: WindowKey = (subscriber, signal.asset.clone());

        // Une fenêtre périmée ne doit pas recevoir de nouvel acheteur : on repart de zéro.
        if windows.get(&key).is_some_and(|w| w.is_expired(now, self.ttl)) {
            windows.remove(&key);
        }

        let window = windows
            .entry(key.clone())
            .or_insert_with(|| AggregationWindow::new(now, token.clone()));
        window.record(signal, now);
        if token.is_known() || !window.token.is_known() {
            window.token = token;
        }

        let total = window.total_lamports();
        let buyers = window.buyer_count();
        debug!(
            subscriber = %subscriber,
            mint = %signal.asset,
            buyers,
            required = settings.required_wallets,
            total_sol = lamports_to_sol(total),
            "[Aggregator] Fenêtre mise à jour."
        );

        let triggered = if buyers >= settings.required_wallets
            && total >= sol_to_lamports(settings.sol_threshold)
        {
            windows.remove(&key).map(|w| TriggeredWindow {
                subscriber,
                asset: key.1.clone(),
                open_for: now.saturating_duration_since(w.first_seen),
                total_lamports: w.total_lamports(),
                opened_at_unix: w.opened_at_unix,
                per_wallet: w.per_wallet,
                token: w.token,
            })
        } else {
            None
        };

        let expired = Self::sweep(&mut windows, now, self.ttl);
        if expired > 0 {
            info!(expired, "[Aggregator] Fenêtres expirées supprimées.");
        }
        metrics::ACTIVE_WINDOWS.set(windows.len() as i64);

        triggered
    }

    fn sweep(windows: &mut HashMap<WindowKey, AggregationWindow>, now: Instant, ttl: Duration) -> usize {
        let before = windows.len();
        windows.retain(|_, w| !w.is_expired(now, ttl));
        before - windows.len()
    }

    /// Balayage explicite, hors `ingest`.
    pub async fn sweep_expired(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().await;
        let expired = Self::sweep(&mut windows, now, self.ttl);
        metrics::ACTIVE_WINDOWS.set(windows.len() as i64);
        expired
    }

    pub async fn active_windows(&self) -> usize {
        self.windows.lock().await.len()
    }

    pub async fn window(&self, subscriber: SubscriberId, asset: &str) -> Option<AggregationWindow> {
        self.windows
            .lock()
            .await
            .get(&(subscriber, asset.to_string()))
            .cloned()
    }
}

// DANS : src/state/subscribers.rs

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::{
    collections::HashMap,
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tokio::sync::RwLock;

/// Identifiant opaque d'un abonné (chat / session du front-end).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(pub i64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TrackError {
    #[error("adresse invalide '{address}' : {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("le portefeuille {0} est déjà suivi")]
    AlreadyTracked(Pubkey),
    #[error("le portefeuille {0} n'est pas suivi")]
    NotTracked(Pubkey),
    #[error("réglage invalide : {0}")]
    InvalidSettings(String),
}

/// Valide une adresse base58 de clé publique Solana.
pub fn validate_address(address: &str) -> Result<Pubkey, TrackError> {
    let trimmed = address.trim();
    Pubkey::from_str(trimmed).map_err(|e| TrackError::InvalidAddress {
        address: trimmed.to_string(),
        reason: e.to_string(),
    })
}

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Un portefeuille surveillé pour le compte d'un abonné.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedWallet {
    pub address: Pubkey,
    pub nickname: String,
    /// Le curseur : dernière signature traitée.
    pub last_processed_signature: Option<String>,
    /// Fixé une seule fois, au début du suivi (secondes epoch).
    pub monitoring_start_time: i64,
}

/// Les réglages lus par les tâches de polling à chaque tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubscriberSettings {
    /// Dépense minimale, en SOL.
    pub sol_threshold: f64,
    /// Nombre minimal d'acheteurs distincts.
    pub required_wallets: usize,
    pub is_paused: bool,
}

impl SubscriberSettings {
    pub fn validate(&self) -> Result<(), TrackError> {
        if !(self.sol_threshold > 0.0) || !self.sol_threshold.is_finite() {
            return Err(TrackError::InvalidSettings(format!(
                "le seuil SOL doit être un nombre positif (reçu {})",
                self.sol_threshold
            )));
        }
        if self.required_wallets == 0 {
            return Err(TrackError::InvalidSettings(
                "le nombre de portefeuilles requis doit être >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Subscriber {
    pub id: SubscriberId,
    pub settings: SubscriberSettings,
    pub wallets: HashMap<Pubkey, TrackedWallet>,
}

/// Le registre des abonnés, en mémoire uniquement : tout est perdu au redémarrage.
/// Passé explicitement aux composants, jamais global.
pub struct SubscriberStore {
    defaults: SubscriberSettings,
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
}

impl SubscriberStore {
    pub fn new(sol_threshold: f64, required_wallets: usize) -> Self {
        Self {
            defaults: SubscriberSettings {
                sol_threshold,
                required_wallets,
                is_paused: false,
            },
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Crée l'abonné au premier contact, avec les réglages par défaut.
    pub async fn ensure_subscriber(&self, id: SubscriberId) -> SubscriberSettings {
        let mut writer = self.subscribers.write().await;
        writer
            .entry(id)
            .or_insert_with(|| Subscriber {
                id,
                settings: self.defaults,
                wallets: HashMap::new(),
            })
            .settings
    }

    /// Un instantané cohérent des réglages (peut avoir un tick de retard, c'est accepté).
    pub async fn settings(&self, id: SubscriberId) -> Option<SubscriberSettings> {
        self.subscribers.read().await.get(&id).map(|s| s.settings)
    }

    pub async fn update_settings(
        &self,
        id: SubscriberId,
        sol_threshold: Option<f64>,
        required_wallets: Option<usize>,
    ) -> Result<SubscriberSettings, TrackError> {
        self.ensure_subscriber(id).await;
        let mut writer = self.subscribers.write().await;
        let subscriber = writer
            .get_mut(&id)
            .ok_or_else(|| TrackError::InvalidSettings(format!("abonné {} inconnu", id)))?;

        let mut updated = subscriber.settings;
        if let Some(threshold) = sol_threshold {
            updated.sol_threshold = threshold;
        }
        if let Some(required) = required_wallets {
            updated.required_wallets = required;
        }
        updated.validate()?;
        subscriber.settings = updated;
        Ok(updated)
    }

    pub async fn set_paused(&self, id: SubscriberId, paused: bool) -> SubscriberSettings {
        self.ensure_subscriber(id).await;
        let mut writer = self.subscribers.write().await;
        match writer.get_mut(&id) {
            Some(subscriber) => {
                subscriber.settings.is_paused = paused;
                subscriber.settings
            }
            None => self.defaults,
        }
    }

    /// Commence le suivi : le curseur est vide et l'heure de départ est fixée maintenant.
    pub async fn add_wallet(
        &self,
        id: SubscriberId,
        address: Pubkey,
        nickname: String,
        now: i64,
    ) -> Result<TrackedWallet, TrackError> {
        self.ensure_subscriber(id).await;
        let mut writer = self.subscribers.write().await;
        let subscriber = writer
            .get_mut(&id)
            .ok_or_else(|| TrackError::InvalidSettings(format!("abonné {} inconnu", id)))?;

        if subscriber.wallets.contains_key(&address) {
            return Err(TrackError::AlreadyTracked(address));
        }
        let wallet = TrackedWallet {
            address,
            nickname,
            last_processed_signature: None,
            monitoring_start_time: now,
        };
        subscriber.wallets.insert(address, wallet.clone());
        Ok(wallet)
    }

    /// Supprime le portefeuille avec son curseur et son heure de départ.
    pub async fn remove_wallet(&self, id: SubscriberId, address: &Pubkey) -> Result<TrackedWallet, TrackError> {
        let mut writer = self.subscribers.write().await;
        writer
            .get_mut(&id)
            .and_then(|s| s.wallets.remove(address))
            .ok_or(TrackError::NotTracked(*address))
    }

    pub async fn wallet(&self, id: SubscriberId, address: &Pubkey) -> Option<TrackedWallet> {
        self.subscribers
            .read()
            .await
            .get(&id)
            .and_then(|s| s.wallets.get(address).cloned())
    }

    /// Réglages et portefeuille lus sous le même verrou.
    pub async fn snapshot(
        &self,
        id: SubscriberId,
        address: &Pubkey,
    ) -> Option<(SubscriberSettings, TrackedWallet)> {
        let reader = self.subscribers.read().await;
        let subscriber = reader.get(&id)?;
        let wallet = subscriber.wallets.get(address)?.clone();
        Some((subscriber.settings, wallet))
    }

    pub async fn list_wallets(&self, id: SubscriberId) -> Vec<TrackedWallet> {
        let reader = self.subscribers.read().await;
        let mut wallets: Vec<TrackedWallet> = reader
            .get(&id)
            .map(|s| s.wallets.values().cloned().collect())
            .unwrap_or_default();
        wallets.sort_by_key(|w| w.monitoring_start_time);
        wallets
    }

    pub async fn nicknames(&self, id: SubscriberId) -> HashMap<Pubkey, String> {
        self.subscribers
            .read()
            .await
            .get(&id)
            .map(|s| {
                s.wallets
                    .iter()
                    .map(|(address, wallet)| (*address, wallet.nickname.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Avance le curseur. Sans effet si le portefeuille a été retiré entre-temps.
    pub async fn advance_cursor(&self, id: SubscriberId, address: &Pubkey, signature: String) -> bool {
        let mut writer = self.subscribers.write().await;
        match writer.get_mut(&id).and_then(|s| s.wallets.get_mut(address)) {
            Some(wallet) => {
                wallet.last_processed_signature = Some(signature);
                true
            }
            None => false,
        }
    }

    /// Tous les abonnés qui suivent `address` (entrée webhook).
    pub async fn subscribers_tracking(&self, address: &Pubkey) -> Vec<(SubscriberId, SubscriberSettings, TrackedWallet)> {
        let reader = self.subscribers.read().await;
        reader
            .values()
            .filter_map(|s| {
                s.wallets
                    .get(address)
                    .map(|w| (s.id, s.settings, w.clone()))
            })
            .collect()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

// DANS : src/rpc/endpoint_pool.rs

use anyhow::{bail, Result};
use arc_swap::ArcSwap;
use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc,
};
use tracing::warn;

use crate::monitoring::metrics;

/// Un endpoint RPC configuré. Immuable une fois créé.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    /// Position de l'endpoint dans la liste configurée.
    pub index: usize,
}

/// La liste ordonnée des endpoints RPC et l'endpoint actuellement actif.
///
/// L'endpoint actif est partagé par toutes les tâches de polling. Il est stocké
/// dans un `ArcSwap` : une rotation le remplace en une seule affectation atomique,
/// un lecteur voit soit l'ancien, soit le nouveau.
pub struct EndpointPool {
    endpoints: Vec<Arc<Endpoint>>,
    active: ArcSwap<Endpoint>,
    rate_limit_strikes: AtomicU32,
    total_rotations: AtomicU64,
    total_requests: AtomicU64,
}

impl EndpointPool {
    /// Construit le pool. Une liste vide (ou qui ne contient que des blancs) est une
    /// erreur de configuration fatale.
    pub fn new(urls: Vec<String>) -> Result<Self> {
        let endpoints: Vec<Arc<Endpoint>> = urls
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .enumerate()
            .map(|(index, url)| Arc::new(Endpoint { url, index }))
            .collect();

        if endpoints.is_empty() {
            bail!("Aucun endpoint RPC configuré : impossible de démarrer le moteur");
        }

        let first = endpoints[0].clone();
        Ok(Self {
            endpoints,
            active: ArcSwap::new(first),
            rate_limit_strikes: AtomicU32::new(0),
            total_rotations: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
        })
    }

    /// Retourne un instantané (`Arc`) de l'endpoint actif.
    pub fn current(&self) -> Arc<Endpoint> {
        self.active.load_full()
    }

    /// Passe à l'endpoint suivant (modulo la taille du pool), remet le compteur de
    /// rate-limit à zéro et retourne le nouvel endpoint. L'appelant doit reconstruire
    /// son client RPC contre ce nouvel endpoint.
    pub fn rotate(&self) -> Arc<Endpoint> {
        let len = self.endpoints.len();
        let previous = self
            .active
            .rcu(|current| self.endpoints[(current.index + 1) % len].clone());
        self.rate_limit_strikes.store(0, Ordering::SeqCst);
        self.total_rotations.fetch_add(1, Ordering::Relaxed);
        metrics::RPC_ROTATIONS.inc();

        let next = self.current();
        warn!(
            from = %previous.url,
            to = %next.url,
            "[RpcPool] Rotation de l'endpoint RPC après rate-limit répétés."
        );
        next
    }

    /// Enregistre un échec de type rate-limit. Déclenche une rotation (et une seule,
    /// même si plusieurs tâches échouent en même temps) quand le compteur atteint `threshold`.
    /// Retourne `true` si cet appel a provoqué la rotation.
    pub fn record_rate_limit(&self, threshold: u32) -> bool {
        metrics::RPC_RATE_LIMIT_STRIKES.inc();
        let strikes = self.rate_limit_strikes.fetch_add(1, Ordering::SeqCst) + 1;
        if strikes < threshold.max(1) {
            return false;
        }
        // Seul le thread qui "consomme" le compteur fait tourner le pool.
        if self
            .rate_limit_strikes
            .compare_exchange(strikes, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }
        self.rotate();
        true
    }

    pub fn record_request(&self) -> u64 {
        self.total_requests.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn rate_limit_strikes(&self) -> u32 {
        self.rate_limit_strikes.load(Ordering::SeqCst)
    }

    pub fn total_rotations(&self) -> u64 {
        self.total_rotations.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

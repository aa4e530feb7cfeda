// DANS : src/enrichment/cache.rs

use async_trait::async_trait;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

use super::{EnrichmentClient, MarketData, TokenMetadata, VolumeData};

pub const DEFAULT_ENRICHMENT_TTL: Duration = Duration::from_secs(600);
/// Un mint inconnu du fournisseur est redemandé plus tôt : il peut être listé entre-temps.
pub const DEFAULT_UNKNOWN_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    data: T,
    inserted_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn is_valid(&self) -> bool {
        self.inserted_at.elapsed() < self.ttl
    }
}

/// Une table mint -> valeur, chaque entrée avec sa propre durée de fraîcheur.
struct TtlTable<T> {
    entries: RwLock<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> TtlTable<T> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, key: &str) -> Option<T> {
        let reader = self.entries.read().await;
        reader
            .get(key)
            .filter(|entry| entry.is_valid())
            .map(|entry| entry.data.clone())
    }

    async fn put(&self, key: &str, data: T, ttl: Duration) {
        let mut writer = self.entries.write().await;
        // On profite de l'écriture pour jeter les entrées périmées.
        writer.retain(|_, entry| entry.is_valid());
        writer.insert(
            key.to_string(),
            CacheEntry {
                data,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }
}

/// Enveloppe un `EnrichmentClient` avec un cache par mint et par type de recherche.
/// Une réponse "connue" vit `ttl`, une réponse inconnue `unknown_ttl` (plus court).
pub struct CachedEnrichment<C> {
    inner: C,
    ttl: Duration,
    unknown_ttl: Duration,
    metadata: TtlTable<TokenMetadata>,
    market: TtlTable<MarketData>,
    volume: TtlTable<VolumeData>,
}

impl<C: EnrichmentClient> CachedEnrichment<C> {
    pub fn new(inner: C, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            unknown_ttl: ttl.min(DEFAULT_UNKNOWN_TTL),
            metadata: TtlTable::new(),
            market: TtlTable::new(),
            volume: TtlTable::new(),
        }
    }

    pub fn with_unknown_ttl(mut self, unknown_ttl: Duration) -> Self {
        self.unknown_ttl = unknown_ttl.min(self.ttl);
        self
    }

    fn ttl_for(&self, known: bool) -> Duration {
        if known { self.ttl } else { self.unknown_ttl }
    }
}

#[async_trait]
impl<C: EnrichmentClient> EnrichmentClient for CachedEnrichment<C> {
    async fn metadata(&self, mint: &str) -> TokenMetadata {
        if let Some(hit) = self.metadata.get(mint).await {
            return hit;
        }
        let fresh = self.inner.metadata(mint).await;
        let ttl = self.ttl_for(fresh.is_known());
        self.metadata.put(mint, fresh.clone(), ttl).await;
        fresh
    }

    async fn market_data(&self, mint: &str) -> MarketData {
        if let Some(hit) = self.market.get(mint).await {
            return hit;
        }
        let fresh = self.inner.market_data(mint).await;
        let ttl = self.ttl_for(fresh.is_known());
        self.market.put(mint, fresh.clone(), ttl).await;
        fresh
    }

    async fn volume_data(&self, mint: &str) -> VolumeData {
        if let Some(hit) = self.volume.get(mint).await {
            return hit;
        }
        let fresh = self.inner.volume_data(mint).await;
        let ttl = self.ttl_for(fresh.is_known());
        self.volume.put(mint, fresh.clone(), ttl).await;
        fresh
    }
}

// DANS : src/enrichment/mod.rs

// Enrichissement "best effort" des tokens : nom, prix, volume.
// Ne bloque jamais la détection et ne renvoie jamais d'erreur : en cas d'échec,
// les champs restent à "Unknown" / None.
pub mod cache;
pub mod dexscreener;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use cache::CachedEnrichment;
pub use dexscreener::DexScreenerClient;

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub mint: String,
    pub name: String,
    pub symbol: String,
    pub website: Option<String>,
    pub twitter: Option<String>,
}

impl TokenMetadata {
    pub fn unknown(mint: &str) -> Self {
        Self {
            mint: mint.to_string(),
            name: UNKNOWN.to_string(),
            symbol: UNKNOWN.to_string(),
            website: None,
            twitter: None,
        }
    }

    pub fn is_known(&self) -> bool {
        self.symbol != UNKNOWN || self.name != UNKNOWN
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    pub price_usd: Option<f64>,
    pub market_cap_usd: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub pair_address: Option<String>,
}

impl MarketData {
    pub fn is_known(&self) -> bool {
        self.price_usd.is_some() || self.market_cap_usd.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeData {
    pub volume_m5_usd: Option<f64>,
    pub volume_h1_usd: Option<f64>,
    pub volume_h24_usd: Option<f64>,
    pub buys_h1: Option<u64>,
    pub sells_h1: Option<u64>,
}

impl VolumeData {
    pub fn is_known(&self) -> bool {
        self.volume_h24_usd.is_some() || self.volume_h1_usd.is_some()
    }
}

/// Les trois recherches regroupées, telles qu'attachées à une fenêtre et à l'alerte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenProfile {
    pub metadata: TokenMetadata,
    pub market: MarketData,
    pub volume: VolumeData,
}

impl TokenProfile {
    pub fn unknown(mint: &str) -> Self {
        Self {
            metadata: TokenMetadata::unknown(mint),
            market: MarketData::default(),
            volume: VolumeData::default(),
        }
    }

    pub fn is_known(&self) -> bool {
        self.metadata.is_known() || self.market.is_known() || self.volume.is_known()
    }

    /// "Nom (SYMBOLE)", ou le mint abrégé si on ne sait rien.
    pub fn display_name(&self) -> String {
        if self.metadata.is_known() {
            format!("{} ({})", self.metadata.name, self.metadata.symbol)
        } else {
            short_mint(&self.metadata.mint)
        }
    }
}

fn short_mint(mint: &str) -> String {
    if mint.len() <= 12 || !mint.is_ascii() {
        return mint.to_string();
    }
    format!("{}…{}", &mint[..4], &mint[mint.len() - 4..])
}

/// Service externe de recherche d'informations sur un token.
/// Chaque recherche est idempotente et doit toujours renvoyer un objet complet.
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    async fn metadata(&self, mint: &str) -> TokenMetadata;
    async fn market_data(&self, mint: &str) -> MarketData;
    async fn volume_data(&self, mint: &str) -> VolumeData;
}

/// Aucun enrichissement : tout reste inconnu. Pour les exécutions hors-ligne.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEnrichment;

#[async_trait]
impl EnrichmentClient for NoopEnrichment {
    async fn metadata(&self, mint: &str) -> TokenMetadata {
        TokenMetadata::unknown(mint)
    }

    async fn market_data(&self, _mint: &str) -> MarketData {
        MarketData::default()
    }

    async fn volume_data(&self, _mint: &str) -> VolumeData {
        VolumeData::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_to_short_mint() {
        let mint = "So11111111111111111111111111111111111111112";
        let mut profile = TokenProfile::unknown(mint);
        assert!(!profile.is_known());
        assert_eq!(profile.display_name(), "So11…1112");

        profile.metadata.name = "Bonk".into();
        profile.metadata.symbol = "BONK".into();
        assert_eq!(profile.display_name(), "Bonk (BONK)");
    }
}

// DANS : src/enrichment/dexscreener.rs

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{Mutex, OnceCell};
use tracing::warn;

use super::{EnrichmentClient, MarketData, TokenMetadata, VolumeData};

const DEXSCREENER_TOKENS_URL: &str = "https://api.dexscreener.com/latest/dex/tokens";

/// Durée pendant laquelle une réponse (ou un échec) sert les trois recherches d'un même mint.
const PAIR_REUSE_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pair {
    pub chain_id: String,
    pub pair_address: String,
    pub base_token: Token,
    pub price_usd: Option<String>,
    #[serde(default)]
    pub txns: Txns,
    #[serde(default)]
    pub volume: Volume,
    #[serde(default)]
    pub liquidity: Liquidity,
    pub fdv: Option<f64>,
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub info: Option<PairInfo>,
}

#[derive(Debug, Deserialize)]
pub struct Token {
    pub address: String,
    pub name: String,
    pub symbol: String,
}

#[derive(Debug, Deserialize, Default)]
pub struct Volume {
    pub h24: Option<f64>,
    pub h1: Option<f64>,
    pub m5: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Txns {
    #[serde(default)]
    pub h1: TxnCount,
}

#[derive(Debug, Deserialize, Default)]
pub struct TxnCount {
    #[serde(default)]
    pub buys: u64,
    #[serde(default)]
    pub sells: u64,
}

#[derive(Debug, Deserialize, Default)]
pub struct Liquidity {
    #[serde(default)]
    pub usd: f64,
}

#[derive(Debug, Deserialize, Default)]
pub struct PairInfo {
    #[serde(default)]
    pub websites: Vec<Link>,
    #[serde(default)]
    pub socials: Vec<Social>,
}

#[derive(Debug, Deserialize)]
pub struct Link {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct Social {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
}

type SharedPair = Option<Arc<Pair>>;

/// Une requête par mint, partagée par tous les appelants qui arrivent pendant qu'elle est en vol.
struct PairSlot {
    created_at: Instant,
    cell: Arc<OnceCell<SharedPair>>,
}

/// Client DexScreener : une seule route (`/tokens/{mint}`) alimente les trois recherches,
/// et un seul GET sert les trois quand elles arrivent ensemble.
pub struct DexScreenerClient {
    http: reqwest::Client,
    base_url: String,
    pairs: Mutex<HashMap<String, PairSlot>>,
}

impl DexScreenerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(DEXSCREENER_TOKENS_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow!("Impossible de construire le client HTTP DexScreener: {}", e))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            pairs: Mutex::new(HashMap::new()),
        })
    }

    /// La paire Solana la plus liquide dont le token de base est `mint`.
    async fn best_pair(&self, mint: &str) -> Result<Option<Pair>> {
        let url = format!("{}/{}", self.base_url, mint);
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow!("Erreur API DexScreener: {}", response.status()));
        }

        let response_text = response.text().await?;
        let api_response: ApiResponse = serde_json::from_str(&response_text)
            .map_err(|e| anyhow!("Erreur de décodage JSON: {}. Réponse reçue: {}", e, response_text))?;

        Ok(select_best_pair(api_response.pairs.unwrap_or_default(), mint))
    }

    async fn best_pair_or_log(&self, mint: &str) -> SharedPair {
        match self.best_pair(mint).await {
            Ok(pair) => pair.map(Arc::new),
            Err(e) => {
                warn!(mint, error = %e, "[Enrichment] Recherche DexScreener échouée, valeurs inconnues.");
                None
            }
        }
    }

    /// La paire du mint, récupérée au plus une fois par fenêtre de réutilisation.
    async fn shared_pair(&self, mint: &str) -> SharedPair {
        let cell = {
            let mut pairs = self.pairs.lock().await;
            pairs.retain(|_, slot| slot.created_at.elapsed() < PAIR_REUSE_WINDOW);
            pairs
                .entry(mint.to_string())
                .or_insert_with(|| PairSlot {
                    created_at: Instant::now(),
                    cell: Arc::new(OnceCell::new()),
                })
                .cell
                .clone()
        };
        cell.get_or_init(|| self.best_pair_or_log(mint)).await.clone()
    }
}

pub fn select_best_pair(pairs: Vec<Pair>, mint: &str) -> Option<Pair> {
    pairs
        .into_iter()
        .filter(|pair| pair.chain_id == "solana" && pair.base_token.address == mint)
        .max_by(|a, b| a.liquidity.usd.total_cmp(&b.liquidity.usd))
}

fn metadata_from_pair(mint: &str, pair: &Pair) -> TokenMetadata {
    let info = pair.info.as_ref();
    TokenMetadata {
        mint: mint.to_string(),
        name: pair.base_token.name.clone(),
        symbol: pair.base_token.symbol.clone(),
        website: info
            .and_then(|i| i.websites.first())
            .map(|l| l.url.clone()),
        twitter: info
            .and_then(|i| i.socials.iter().find(|s| s.kind == "twitter"))
            .map(|s| s.url.clone()),
    }
}

fn market_from_pair(pair: &Pair) -> MarketData {
    MarketData {
        price_usd: pair.price_usd.as_deref().and_then(|p| p.parse().ok()),
        market_cap_usd: pair.market_cap.or(pair.fdv),
        liquidity_usd: Some(pair.liquidity.usd).filter(|l| *l > 0.0),
        pair_address: Some(pair.pair_address.clone()),
    }
}

fn volume_from_pair(pair: &Pair) -> VolumeData {
    VolumeData {
        volume_m5_usd: pair.volume.m5,
        volume_h1_usd: pair.volume.h1,
        volume_h24_usd: pair.volume.h24,
        buys_h1: Some(pair.txns.h1.buys),
        sells_h1: Some(pair.txns.h1.sells),
    }
}

#[async_trait]
impl EnrichmentClient for DexScreenerClient {
    async fn metadata(&self, mint: &str) -> TokenMetadata {
        match self.shared_pair(mint).await {
            Some(pair) => metadata_from_pair(mint, &pair),
            None => TokenMetadata::unknown(mint),
        }
    }

    async fn market_data(&self, mint: &str) -> MarketData {
        self.shared_pair(mint)
            .await
            .map(|pair| market_from_pair(&pair))
            .unwrap_or_default()
    }

    async fn volume_data(&self, mint: &str) -> VolumeData {
        self.shared_pair(mint)
            .await
            .map(|pair| volume_from_pair(&pair))
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use warp::Filter;

    const MINT: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

    const BODY: &str = r#"{
        "schemaVersion": "1.0.0",
        "pairs": [
            {
                "chainId": "solana",
                "pairAddress": "small",
                "baseToken": { "address": "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263", "name": "Bonk", "symbol": "Bonk" },
                "priceUsd": "0.00002",
                "liquidity": { "usd": 1000.0 }
            },
            {
                "chainId": "solana",
                "pairAddress": "deep",
                "baseToken": { "address": "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263", "name": "Bonk", "symbol": "Bonk" },
                "priceUsd": "0.000021",
                "txns": { "h1": { "buys": 120, "sells": 80 } },
                "volume": { "h24": 1500000.5, "h1": 42000.0, "m5": 3000.0 },
                "liquidity": { "usd": 9000000.0 },
                "fdv": 1800000000.0,
                "marketCap": 1500000000.0,
                "info": { "websites": [{ "label": "Website", "url": "https://bonkcoin.com" }],
                          "socials": [{ "type": "twitter", "url": "https://x.com/bonk_inu" }] }
            },
            {
                "chainId": "ethereum",
                "pairAddress": "eth",
                "baseToken": { "address": "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263", "name": "Bonk", "symbol": "Bonk" },
                "liquidity": { "usd": 99999999.0 }
            }
        ]
    }"#;

    #[test]
    fn picks_the_most_liquid_solana_pair() {
        let response: ApiResponse = serde_json::from_str(BODY).unwrap();
        let pair = select_best_pair(response.pairs.unwrap(), MINT).unwrap();
        assert_eq!(pair.pair_address, "deep");

        let market = market_from_pair(&pair);
        assert_eq!(market.price_usd, Some(0.000021));
        assert_eq!(market.market_cap_usd, Some(1_500_000_000.0));

        let volume = volume_from_pair(&pair);
        assert_eq!(volume.volume_h1_usd, Some(42_000.0));
        assert_eq!(volume.buys_h1, Some(120));

        let metadata = metadata_from_pair(MINT, &pair);
        assert_eq!(metadata.symbol, "Bonk");
        assert_eq!(metadata.twitter.as_deref(), Some("https://x.com/bonk_inu"));
    }

    #[test]
    fn null_pairs_means_no_pair() {
        let response: ApiResponse = serde_json::from_str(r#"{"schemaVersion":"1.0.0","pairs":null}"#).unwrap();
        assert!(select_best_pair(response.pairs.unwrap_or_default(), MINT).is_none());
    }

    #[tokio::test]
    async fn concurrent_lookups_share_a_single_request() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let route = warp::path!("tokens" / String).map(move |_mint: String| {
            counter.fetch_add(1, Ordering::SeqCst);
            warp::reply::with_header(BODY, "content-type", "application/json")
        });
        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);

        let client = DexScreenerClient::with_base_url(&format!("http://{addr}/tokens"), Duration::from_secs(2)).unwrap();
        let (metadata, market, volume) =
            tokio::join!(client.metadata(MINT), client.market_data(MINT), client.volume_data(MINT));

        assert_eq!(metadata.symbol, "Bonk");
        assert_eq!(market.pair_address.as_deref(), Some("deep"));
        assert_eq!(volume.buys_h1, Some(120));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Un second passage dans la fenêtre de réutilisation ne refait pas de GET.
        client.metadata(MINT).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unreachable_api_degrades_to_unknown() {
        let client = DexScreenerClient::with_base_url("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        let metadata = client.metadata(MINT).await;
        assert!(!metadata.is_known());
        assert_eq!(client.market_data(MINT).await, MarketData::default());
    }
}

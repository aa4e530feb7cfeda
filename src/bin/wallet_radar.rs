// DANS : src/bin/wallet_radar.rs

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{collections::BTreeMap, fs, path::Path, sync::Arc};
use tracing::{error, info, warn};
use wallet_radar::{
    alerts::LogDispatcher,
    config::Config,
    enrichment::{CachedEnrichment, DexScreenerClient},
    monitoring::{
        logging::{setup_logging, LogFormat},
        metrics,
    },
    rpc::{EndpointPool, ResilientRpcClient, RetryingCaller},
    state::SubscriberId,
    Engine, TrackRequest,
};

/// Une ligne de la watchlist : `[{ "subscriber": 1, "address": "...", "nickname": "..." }]`.
#[derive(Debug, Deserialize)]
struct WatchlistEntry {
    subscriber: i64,
    address: String,
    #[serde(default)]
    nickname: Option<String>,
}

fn load_watchlist(path: &Path) -> Result<BTreeMap<i64, Vec<TrackRequest>>> {
    if !path.exists() {
        warn!(path = %path.display(), "[WalletRadar] Aucune watchlist trouvée. Le moteur démarre sans portefeuille.");
        return Ok(BTreeMap::new());
    }
    let data = fs::read_to_string(path)
        .with_context(|| format!("Lecture de la watchlist {} impossible", path.display()))?;
    let entries: Vec<WatchlistEntry> = serde_json::from_str(&data)
        .with_context(|| format!("Watchlist {} mal formée", path.display()))?;

    let mut grouped: BTreeMap<i64, Vec<TrackRequest>> = BTreeMap::new();
    for entry in entries {
        grouped.entry(entry.subscriber).or_default().push(TrackRequest {
            address: entry.address,
            nickname: entry.nickname,
        });
    }
    Ok(grouped)
}

async fn run_radar(config: Config) -> Result<()> {
    info!("[WalletRadar] Démarrage du détecteur d'achats coordonnés.");

    let pool = Arc::new(EndpointPool::new(config.rpc_urls.clone())?);
    info!(endpoints = pool.len(), "[WalletRadar] Pool d'endpoints RPC prêt.");
    let caller = RetryingCaller::new(Arc::clone(&pool), config.retry_policy());
    let rpc = Arc::new(ResilientRpcClient::new(caller, config.rpc_timeout()));

    match rpc.health_check().await {
        Ok(slot) => info!(slot, "[WalletRadar] Connexion RPC vérifiée."),
        Err(e) => warn!(error = %format!("{:#}", e), "[WalletRadar] RPC injoignable au démarrage, le polling ré-essaiera."),
    }

    let settings = config.engine_settings();
    let dexscreener = DexScreenerClient::new(settings.enrichment_timeout)?;
    let enrichment = Arc::new(CachedEnrichment::new(dexscreener, config.enrichment_ttl()));
    let engine = Engine::new(settings, rpc, enrichment, Arc::new(LogDispatcher));

    for (subscriber, requests) in load_watchlist(Path::new(&config.watchlist_file))? {
        let outcomes = engine.track_wallets(SubscriberId(subscriber), requests).await;
        let tracked = outcomes.iter().filter(|o| o.result.is_ok()).count();
        info!(subscriber, tracked, rejected = outcomes.len() - tracked, "[WalletRadar] Watchlist chargée.");
    }

    tokio::spawn(metrics::start_metrics_server(config.metrics_port));

    tokio::signal::ctrl_c().await?;
    info!("[WalletRadar] Arrêt demandé.");
    engine.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // La config est chargée avant les logs : le format en dépend.
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            setup_logging(LogFormat::Json);
            error!(error = %e, "[WalletRadar] Configuration invalide, arrêt.");
            return Err(e.into());
        }
    };
    setup_logging(LogFormat::from_name(&config.log_format));

    if let Err(e) = run_radar(config).await {
        error!("[WalletRadar] Le service a planté : {:?}.", e);
        return Err(e);
    }
    Ok(())
}

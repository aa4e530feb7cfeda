// Doublures en mémoire pour les tests d'intégration.
#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use solana_sdk::pubkey::Pubkey;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use wallet_radar::{
    alerts::{AlertDispatcher, CoordinatedBuyAlert},
    chain::{ChainClient, SignatureInfo, TokenBalance, TransactionBalances},
    config::EngineSettings,
    detection::DetectionContext,
    enrichment::{EnrichmentClient, MarketData, NoopEnrichment, TokenMetadata, VolumeData},
    state::SubscriberStore,
};

pub const MINT_X: &str = "DezXAZ8z7PnrnRJjz3wXBoRgixCa6xjnB7YaB1pPB263";

#[derive(Default)]
pub struct MockChain {
    signatures: Mutex<HashMap<Pubkey, Vec<SignatureInfo>>>,
    transactions: Mutex<HashMap<String, TransactionBalances>>,
    pub transaction_fetches: AtomicUsize,
    /// Horloge tokio au moment de chaque `get_transaction`.
    fetched_at: Mutex<Vec<tokio::time::Instant>>,
}

impl MockChain {
    /// Publie une transaction : elle devient la plus récente de `wallet`.
    pub fn push(&self, wallet: &Pubkey, tx: TransactionBalances) {
        let info = SignatureInfo {
            signature: tx.signature.clone(),
            block_time: tx.block_time,
        };
        self.signatures
            .lock()
            .unwrap()
            .entry(*wallet)
            .or_default()
            .insert(0, info);
        self.transactions
            .lock()
            .unwrap()
            .insert(tx.signature.clone(), tx);
    }

    pub fn fetches(&self) -> usize {
        self.transaction_fetches.load(Ordering::SeqCst)
    }

    pub fn fetch_times(&self) -> Vec<tokio::time::Instant> {
        self.fetched_at.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn list_recent_signatures(&self, address: &Pubkey, limit: usize) -> Result<Vec<SignatureInfo>> {
        let signatures = self.signatures.lock().unwrap();
        Ok(signatures
            .get(address)
            .map(|s| s.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<TransactionBalances>> {
        self.transaction_fetches.fetch_add(1, Ordering::SeqCst);
        self.fetched_at.lock().unwrap().push(tokio::time::Instant::now());
        Ok(self.transactions.lock().unwrap().get(signature).cloned())
    }
}

#[derive(Default)]
pub struct RecordingDispatcher {
    pub alerts: Mutex<Vec<CoordinatedBuyAlert>>,
    pub fail: bool,
}

impl RecordingDispatcher {
    pub fn failing() -> Self {
        Self { fail: true, ..Self::default() }
    }

    pub fn alerts(&self) -> Vec<CoordinatedBuyAlert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertDispatcher for RecordingDispatcher {
    async fn dispatch(&self, alert: &CoordinatedBuyAlert) -> Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        if self.fail {
            return Err(anyhow!("canal indisponible"));
        }
        Ok(())
    }
}

/// Un achat de `mint` par `wallet` : `lamports` dépensés, `amount` tokens reçus.
pub fn buy_tx(signature: &str, wallet: &Pubkey, mint: &str, lamports: u64, amount: f64, block_time: i64) -> TransactionBalances {
    let start = 5_000_000_000;
    TransactionBalances {
        signature: signature.to_string(),
        account_keys: vec![wallet.to_string(), Pubkey::new_unique().to_string()],
        pre_balances: vec![start, 0],
        post_balances: vec![start - lamports, lamports],
        pre_token_balances: vec![],
        post_token_balances: vec![TokenBalance {
            account_index: 1,
            mint: mint.to_string(),
            owner: Some(wallet.to_string()),
            ui_amount: amount,
        }],
        block_time: Some(block_time),
        failed: false,
    }
}

pub fn engine_settings() -> EngineSettings {
    EngineSettings {
        tx_fetch_delay: Duration::ZERO,
        enrichment_timeout: Duration::from_millis(200),
        ..EngineSettings::default()
    }
}

pub fn context(
    chain: Arc<MockChain>,
    dispatcher: Arc<RecordingDispatcher>,
    threshold: f64,
    required: usize,
) -> DetectionContext {
    context_with(engine_settings(), chain, dispatcher, Arc::new(NoopEnrichment), threshold, required)
}

pub fn context_with(
    settings: EngineSettings,
    chain: Arc<MockChain>,
    dispatcher: Arc<RecordingDispatcher>,
    enrichment: Arc<dyn EnrichmentClient>,
    threshold: f64,
    required: usize,
) -> DetectionContext {
    DetectionContext::new(
        settings,
        Arc::new(SubscriberStore::new(threshold, required)),
        chain,
        enrichment,
        dispatcher,
    )
}

/// Un service d'enrichissement qui ne répond jamais.
pub struct HangingEnrichment;

#[async_trait]
impl EnrichmentClient for HangingEnrichment {
    async fn metadata(&self, _mint: &str) -> TokenMetadata {
        std::future::pending().await
    }

    async fn market_data(&self, _mint: &str) -> MarketData {
        std::future::pending().await
    }

    async fn volume_data(&self, _mint: &str) -> VolumeData {
        std::future::pending().await
    }
}

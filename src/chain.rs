// DANS : src/chain.rs

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// Une signature renvoyée par `getSignaturesForAddress`, du plus récent au plus ancien.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub signature: String,
    pub block_time: Option<i64>,
}

/// Un solde de token (pré ou post transaction), déjà converti en montant "UI".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub account_index: u8,
    pub mint: String,
    pub owner: Option<String>,
    pub ui_amount: f64,
}

/// Le sous-ensemble d'une transaction dont la classification a besoin :
/// les soldes natifs et les soldes de tokens avant/après.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransactionBalances {
    pub signature: String,
    pub account_keys: Vec<String>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub pre_token_balances: Vec<TokenBalance>,
    pub post_token_balances: Vec<TokenBalance>,
    pub block_time: Option<i64>,
    /// La transaction a échoué on-chain (meta.err renseigné).
    pub failed: bool,
}

/// Ce que le moteur consomme de la chaîne. Implémenté par `ResilientRpcClient`
/// en production, et par des doublures en mémoire dans les tests.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Les `limit` signatures les plus récentes de l'adresse, de la plus récente à la plus ancienne.
    async fn list_recent_signatures(&self, address: &Pubkey, limit: usize) -> Result<Vec<SignatureInfo>>;

    /// Le contenu d'une transaction. `Ok(None)` si le nœud ne la voit pas (encore).
    async fn get_transaction(&self, signature: &str) -> Result<Option<TransactionBalances>>;
}

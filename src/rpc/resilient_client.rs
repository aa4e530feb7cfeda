// DANS : src/rpc/resilient_client.rs

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use serde_json::json;
use solana_client::{
    nonblocking::rpc_client::RpcClient, rpc_client::GetConfirmedSignaturesForAddress2Config,
    rpc_request::RpcRequest,
};
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey};
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiMessage,
    UiTransactionTokenBalance,
};
use std::{sync::Arc, time::Duration};
use tracing::info;

use super::{
    endpoint_pool::Endpoint,
    retrying_caller::RetryingCaller,
};
use crate::chain::{ChainClient, SignatureInfo, TokenBalance, TransactionBalances};

/// Le client RPC construit contre un endpoint précis du pool.
struct ClientSlot {
    endpoint_index: usize,
    client: Arc<RpcClient>,
}

/// Un "wrapper" autour du RpcClient de Solana : chaque appel passe par le
/// `RetryingCaller` (backoff + rotation), et le client sous-jacent est reconstruit
/// dès que le pool a changé d'endpoint actif.
pub struct ResilientRpcClient {
    caller: RetryingCaller,
    slot: ArcSwap<ClientSlot>,
    timeout: Duration,
}

impl ResilientRpcClient {
    pub fn new(caller: RetryingCaller, timeout: Duration) -> Self {
        let endpoint = caller.pool().current();
        let slot = ClientSlot {
            endpoint_index: endpoint.index,
            client: Arc::new(Self::build_client(&endpoint, timeout)),
        };
        Self {
            caller,
            slot: ArcSwap::from_pointee(slot),
            timeout,
        }
    }

    pub fn caller(&self) -> &RetryingCaller {
        &self.caller
    }

    fn build_client(endpoint: &Endpoint, timeout: Duration) -> RpcClient {
        RpcClient::new_with_timeout_and_commitment(
            endpoint.url.clone(),
            timeout,
            CommitmentConfig::confirmed(),
        )
    }

    /// Retourne le client associé à `endpoint`, en le reconstruisant si le pool a tourné.
    fn client_for(&self, endpoint: &Endpoint) -> Arc<RpcClient> {
        let slot = self.slot.load();
        if slot.endpoint_index == endpoint.index {
            return slot.client.clone();
        }

        info!(endpoint = %endpoint.url, "[RpcPool] Reconstruction du client RPC sur le nouvel endpoint.");
        let client = Arc::new(Self::build_client(endpoint, self.timeout));
        self.slot.store(Arc::new(ClientSlot {
            endpoint_index: endpoint.index,
            client: client.clone(),
        }));
        client
    }

    /// Vérifie que l'endpoint actif répond. Utilisé au démarrage.
    pub async fn health_check(&self) -> Result<u64> {
        self.caller
            .call("getSlot", |endpoint| {
                let client = self.client_for(&endpoint);
                async move { client.get_slot().await.map_err(anyhow::Error::from) }
            })
            .await
            .context("Échec du health check RPC (getSlot)")
    }

    fn to_token_balances(balances: Option<Vec<UiTransactionTokenBalance>>) -> Vec<TokenBalance> {
        balances
            .unwrap_or_default()
            .into_iter()
            .map(|b| {
                let owner: Option<String> = b.owner.into();
                let ui_amount = b
                    .ui_token_amount
                    .ui_amount
                    .unwrap_or_else(|| b.ui_token_amount.ui_amount_string.parse().unwrap_or(0.0));
                TokenBalance {
                    account_index: b.account_index,
                    mint: b.mint,
                    owner,
                    ui_amount,
                }
            })
            .collect()
    }

    fn to_transaction_balances(
        signature: &str,
        tx: EncodedConfirmedTransactionWithStatusMeta,
    ) -> TransactionBalances {
        let account_keys = match &tx.transaction.transaction {
            EncodedTransaction::Json(ui_tx) => match &ui_tx.message {
                UiMessage::Raw(message) => message.account_keys.clone(),
                UiMessage::Parsed(message) => message
                    .account_keys
                    .iter()
                    .map(|key| key.pubkey.clone())
                    .collect(),
            },
            _ => Vec::new(),
        };

        let mut balances = TransactionBalances {
            signature: signature.to_string(),
            account_keys,
            block_time: tx.block_time,
            ..Default::default()
        };

        // Sans méta, les tableaux restent vides : la classification dira "pas de signal".
        if let Some(meta) = tx.transaction.meta {
            balances.failed = meta.err.is_some();
            balances.pre_balances = meta.pre_balances;
            balances.post_balances = meta.post_balances;
            balances.pre_token_balances = Self::to_token_balances(meta.pre_token_balances.into());
            balances.post_token_balances = Self::to_token_balances(meta.post_token_balances.into());
        }
        balances
    }
}

#[async_trait]
impl ChainClient for ResilientRpcClient {
    async fn list_recent_signatures(&self, address: &Pubkey, limit: usize) -> Result<Vec<SignatureInfo>> {
        let address = *address;
        let statuses = self
            .caller
            .call("getSignaturesForAddress", |endpoint| {
                let client = self.client_for(&endpoint);
                async move {
                    let config = GetConfirmedSignaturesForAddress2Config {
                        limit: Some(limit),
                        commitment: Some(CommitmentConfig::confirmed()),
                        ..Default::default()
                    };
                    client
                        .get_signatures_for_address_with_config(&address, config)
                        .await
                        .map_err(anyhow::Error::from)
                }
            })
            .await
            .with_context(|| format!("Échec final de getSignaturesForAddress pour {}", address))?;

        Ok(statuses
            .into_iter()
            .map(|status| SignatureInfo {
                signature: status.signature,
                block_time: status.block_time,
            })
            .collect())
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<TransactionBalances>> {
        // On passe par `send` pour récupérer un `null` proprement (transaction pas encore visible).
        let params = json!([
            signature,
            {
                "encoding": "json",
                "commitment": "confirmed",
                "maxSupportedTransactionVersion": 0
            }
        ]);

        let tx: Option<EncodedConfirmedTransactionWithStatusMeta> = self
            .caller
            .call("getTransaction", |endpoint| {
                let client = self.client_for(&endpoint);
                let params = params.clone();
                async move {
                    client
                        .send(RpcRequest::GetTransaction, params)
                        .await
                        .map_err(anyhow::Error::from)
                }
            })
            .await
            .with_context(|| format!("Échec final de getTransaction pour {}", signature))?;

        Ok(tx.map(|tx| Self::to_transaction_balances(signature, tx)))
    }
}

// DANS : src/alerts.rs

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::info;

use crate::detection::{lamports_to_sol, TriggeredWindow};
use crate::enrichment::TokenProfile;
use crate::state::{unix_now, SubscriberId};

/// Un acheteur dans une alerte.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletBuy {
    pub wallet: Pubkey,
    pub nickname: String,
    pub sol_spent: f64,
    pub asset_amount: f64,
    pub buys: u32,
}

/// Le contenu remis au canal de notification quand une fenêtre se déclenche.
/// Le formatage et la livraison sont l'affaire du dispatcher.
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatedBuyAlert {
    pub subscriber: SubscriberId,
    pub mint: String,
    pub display_name: String,
    pub token: TokenProfile,
    /// Triés par dépense décroissante.
    pub buyers: Vec<WalletBuy>,
    pub total_spent_sol: f64,
    pub buyer_count: usize,
    pub window_opened_at: i64,
    pub window_open_secs: u64,
    pub triggered_at: i64,
}

impl CoordinatedBuyAlert {
    pub fn from_window(window: TriggeredWindow, nicknames: &HashMap<Pubkey, String>) -> Self {
        let mut buyers: Vec<WalletBuy> = window
            .per_wallet
            .iter()
            .map(|(wallet, spend)| WalletBuy {
                wallet: *wallet,
                nickname: nicknames
                    .get(wallet)
                    .cloned()
                    .unwrap_or_else(|| wallet.to_string()),
                sol_spent: lamports_to_sol(spend.lamports_spent),
                asset_amount: spend.asset_amount,
                buys: spend.buys,
            })
            .collect();
        buyers.sort_by(|a, b| b.sol_spent.total_cmp(&a.sol_spent));

        Self {
            subscriber: window.subscriber,
            display_name: window.token.display_name(),
            total_spent_sol: window.total_spent_sol(),
            buyer_count: window.buyer_count(),
            window_opened_at: window.opened_at_unix,
            window_open_secs: window.open_for.as_secs(),
            triggered_at: unix_now(),
            mint: window.asset,
            token: window.token,
            buyers,
        }
    }
}

/// Le canal de notification (externe). Appelé au plus une fois par fenêtre déclenchée ;
/// un échec de livraison est journalisé par le moteur, jamais ré-essayé.
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    async fn dispatch(&self, alert: &CoordinatedBuyAlert) -> Result<()>;
}

/// Écrit l'alerte dans les logs structurés.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDispatcher;

#[async_trait]
impl AlertDispatcher for LogDispatcher {
    async fn dispatch(&self, alert: &CoordinatedBuyAlert) -> Result<()> {
        let wallets: Vec<String> = alert
            .buyers
            .iter()
            .map(|b| format!("{} ({:.3} SOL)", b.nickname, b.sol_spent))
            .collect();
        info!(
            subscriber = %alert.subscriber,
            mint = %alert.mint,
            token = %alert.display_name,
            buyers = alert.buyer_count,
            total_sol = alert.total_spent_sol,
            price_usd = ?alert.token.market.price_usd,
            market_cap_usd = ?alert.token.market.market_cap_usd,
            wallets = ?wallets,
            "[Alert] 🎯 Achat coordonné détecté."
        );
        Ok(())
    }
}

/// Remet l'alerte à un front-end (bot de chat, webhook sortant...) via un canal tokio.
#[derive(Clone)]
pub struct ChannelDispatcher {
    sender: Sender<CoordinatedBuyAlert>,
}

impl ChannelDispatcher {
    pub fn new(capacity: usize) -> (Self, Receiver<CoordinatedBuyAlert>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl AlertDispatcher for ChannelDispatcher {
    async fn dispatch(&self, alert: &CoordinatedBuyAlert) -> Result<()> {
        self.sender
            .try_send(alert.clone())
            .map_err(|e| anyhow!("Le canal d'alertes est plein ou fermé : {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::WalletSpend;
    use std::time::Duration;

    fn window() -> (TriggeredWindow, Pubkey, Pubkey) {
        let (a, b) = (Pubkey::new_unique(), Pubkey::new_unique());
        let mut per_wallet = HashMap::new();
        per_wallet.insert(a, WalletSpend { lamports_spent: 300_000_000, asset_amount: 10.0, buys: 1 });
        per_wallet.insert(b, WalletSpend { lamports_spent: 500_000_000, asset_amount: 12.0, buys: 2 });
        let window = TriggeredWindow {
            subscriber: SubscriberId(42),
            asset: "MintX".to_string(),
            per_wallet,
            total_lamports: 800_000_000,
            opened_at_unix: 1_700_000_000,
            open_for: Duration::from_secs(900),
            token: TokenProfile::unknown("MintX"),
        };
        (window, a, b)
    }

    #[test]
    fn alert_lists_buyers_by_spend_with_nicknames() {
        let (window, a, b) = window();
        let mut nicknames = HashMap::new();
        nicknames.insert(a, "alpha".to_string());

        let alert = CoordinatedBuyAlert::from_window(window, &nicknames);
        assert_eq!(alert.buyer_count, 2);
        assert_eq!(alert.total_spent_sol, 0.8);
        assert_eq!(alert.window_open_secs, 900);
        assert_eq!(alert.buyers[0].wallet, b);
        assert_eq!(alert.buyers[0].nickname, b.to_string());
        assert_eq!(alert.buyers[1].nickname, "alpha");
    }

    #[tokio::test]
    async fn channel_dispatcher_hands_alert_over() {
        let (dispatcher, mut receiver) = ChannelDispatcher::new(4);
        let (window, _, _) = window();
        let alert = CoordinatedBuyAlert::from_window(window, &HashMap::new());

        dispatcher.dispatch(&alert).await.unwrap();
        assert_eq!(receiver.recv().await.unwrap().mint, "MintX");

        drop(receiver);
        assert!(dispatcher.dispatch(&alert).await.is_err());
    }
}

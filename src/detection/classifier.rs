// DANS : src/detection/classifier.rs

use solana_sdk::pubkey::Pubkey;
use std::collections::HashMap;

use super::{sol_to_lamports, BuySignal, UNKNOWN_ASSET};
use crate::chain::{TokenBalance, TransactionBalances};
use crate::state::SubscriberSettings;

/// Décide si une transaction est un achat du portefeuille, et de combien.
///
/// Fonction pure : aucun appel réseau, rien d'autre que les tableaux de soldes.
/// Retourne `None` si la transaction a échoué, si les soldes natifs manquent, ou si la
/// dépense est sous le seuil de l'abonné (même si un token a été reçu).
pub fn classify(
    tx: &TransactionBalances,
    settings: &SubscriberSettings,
    wallet: &Pubkey,
) -> Option<BuySignal> {
    if tx.failed {
        return None;
    }

    let owner = wallet.to_string();
    let lamports_spent = native_spent(tx, &owner)?;
    if lamports_spent < sol_to_lamports(settings.sol_threshold) {
        return None;
    }

    let (asset, asset_amount) = largest_token_gain(&tx.pre_token_balances, &tx.post_token_balances, &owner)
        .unwrap_or_else(|| (UNKNOWN_ASSET.to_string(), 0.0));

    Some(BuySignal {
        wallet: *wallet,
        asset,
        lamports_spent,
        asset_amount,
        signature: tx.signature.clone(),
        block_time: tx.block_time,
    })
}

/// `max(0, pre - post)` sur le solde natif du portefeuille.
///
/// Le portefeuille est cherché dans `account_keys` ; à défaut on prend l'index 0 (le payeur des frais).
fn native_spent(tx: &TransactionBalances, owner: &str) -> Option<u64> {
    let index = tx
        .account_keys
        .iter()
        .position(|key| key == owner)
        .unwrap_or(0);
    let pre = *tx.pre_balances.get(index)?;
    let post = *tx.post_balances.get(index)?;
    Some(pre.saturating_sub(post))
}

/// Le mint dont le solde (détenu par `owner`) a le plus augmenté.
///
/// Égalité : le premier mint rencontré dans les soldes post-transaction l'emporte.
/// Heuristique : sur un swap multi-actifs, le "vrai" achat peut être mal identifié.
pub fn largest_token_gain(
    pre: &[TokenBalance],
    post: &[TokenBalance],
    owner: &str,
) -> Option<(String, f64)> {
    let owned = |b: &&TokenBalance| b.owner.as_deref() == Some(owner);

    let mut pre_by_mint: HashMap<&str, f64> = HashMap::new();
    for balance in pre.iter().filter(owned) {
        *pre_by_mint.entry(balance.mint.as_str()).or_default() += balance.ui_amount;
    }

    // Plusieurs comptes du même mint : on additionne, en gardant l'ordre d'apparition.
    let mut post_by_mint: Vec<(&str, f64)> = Vec::new();
    for balance in post.iter().filter(owned) {
        match post_by_mint.iter_mut().find(|(mint, _)| *mint == balance.mint) {
            Some((_, amount)) => *amount += balance.ui_amount,
            None => post_by_mint.push((balance.mint.as_str(), balance.ui_amount)),
        }
    }

    let mut best: Option<(&str, f64)> = None;
    for (mint, post_amount) in post_by_mint {
        let delta = post_amount - pre_by_mint.get(mint).copied().unwrap_or(0.0);
        if delta <= 0.0 {
            continue;
        }
        if best.is_none_or(|(_, best_delta)| delta > best_delta) {
            best = Some((mint, delta));
        }
    }

    best.map(|(mint, delta)| (mint.to_string(), delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::LAMPORTS_PER_SOL;

    const WALLET: &str = "9WzDXwBbmkg8ZTbNMqUxvQRAyrZzDsGYdLVL9zYtAWWM";
    const OTHER: &str = "7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU";
    const MINT_X: &str = "MintX1111111111111111111111111111111111111";
    const MINT_Y: &str = "MintY1111111111111111111111111111111111111";

    fn wallet() -> Pubkey {
        WALLET.parse().unwrap()
    }

    fn settings(threshold: f64) -> SubscriberSettings {
        SubscriberSettings { sol_threshold: threshold, required_wallets: 2, is_paused: false }
    }

    fn balance(mint: &str, owner: &str, amount: f64) -> TokenBalance {
        TokenBalance { account_index: 1, mint: mint.to_string(), owner: Some(owner.to_string()), ui_amount: amount }
    }

    fn tx(spent_sol: f64, pre: Vec<TokenBalance>, post: Vec<TokenBalance>) -> TransactionBalances {
        let pre_lamports = 10 * LAMPORTS_PER_SOL;
        TransactionBalances {
            signature: "sig".to_string(),
            account_keys: vec![WALLET.to_string(), OTHER.to_string()],
            pre_balances: vec![pre_lamports, 0],
            post_balances: vec![pre_lamports - sol_to_lamports(spent_sol), 0],
            pre_token_balances: pre,
            post_token_balances: post,
            block_time: Some(1_700_000_000),
            failed: false,
        }
    }

    #[test]
    fn detects_a_simple_buy() {
        let tx = tx(0.6, vec![], vec![balance(MINT_X, WALLET, 1_000.0)]);
        let signal = classify(&tx, &settings(0.5), &wallet()).unwrap();
        assert_eq!(signal.asset, MINT_X);
        assert_eq!(signal.lamports_spent, 600_000_000);
        assert_eq!(signal.asset_amount, 1_000.0);
        assert_eq!(signal.block_time, Some(1_700_000_000));
    }

    #[test]
    fn below_threshold_spend_is_rejected_even_with_token_gain() {
        let tx = tx(0.2, vec![], vec![balance(MINT_X, WALLET, 1_000.0)]);
        assert!(classify(&tx, &settings(0.5), &wallet()).is_none());
    }

    #[test]
    fn largest_positive_delta_wins() {
        let pre = vec![balance(MINT_X, WALLET, 100.0)];
        let post = vec![balance(MINT_X, WALLET, 150.0), balance(MINT_Y, WALLET, 80.0)];
        let signal = classify(&tx(1.0, pre, post), &settings(0.5), &wallet()).unwrap();
        assert_eq!(signal.asset, MINT_Y);
        assert_eq!(signal.asset_amount, 80.0);
    }

    #[test]
    fn equal_deltas_resolve_to_first_listed_mint() {
        let post = vec![balance(MINT_Y, WALLET, 50.0), balance(MINT_X, WALLET, 50.0)];
        assert_eq!(largest_token_gain(&[], &post, WALLET).unwrap().0, MINT_Y);
    }

    #[test]
    fn balances_of_other_owners_are_ignored() {
        let post = vec![balance(MINT_X, OTHER, 5_000.0), balance(MINT_Y, WALLET, 1.0)];
        assert_eq!(largest_token_gain(&[], &post, WALLET).unwrap().0, MINT_Y);
    }

    #[test]
    fn no_token_gain_yields_unknown_asset() {
        let pre = vec![balance(MINT_X, WALLET, 100.0)];
        let post = vec![balance(MINT_X, WALLET, 40.0)];
        let signal = classify(&tx(0.7, pre, post), &settings(0.5), &wallet()).unwrap();
        assert_eq!(signal.asset, UNKNOWN_ASSET);
        assert!(!signal.is_actionable());
    }

    #[test]
    fn failed_or_incomplete_transactions_give_no_signal() {
        let mut failed = tx(1.0, vec![], vec![balance(MINT_X, WALLET, 1.0)]);
        failed.failed = true;
        assert!(classify(&failed, &settings(0.5), &wallet()).is_none());

        let mut empty = tx(1.0, vec![], vec![balance(MINT_X, WALLET, 1.0)]);
        empty.pre_balances.clear();
        assert!(classify(&empty, &settings(0.5), &wallet()).is_none());
    }

    #[test]
    fn sol_received_counts_as_zero_spend() {
        let mut selling = tx(0.0, vec![balance(MINT_X, WALLET, 10.0)], vec![]);
        selling.post_balances[0] = selling.pre_balances[0] + LAMPORTS_PER_SOL;
        assert!(classify(&selling, &settings(0.5), &wallet()).is_none());
    }

    #[test]
    fn wallet_position_in_account_keys_is_used() {
        let mut tx = tx(0.0, vec![], vec![balance(MINT_X, OTHER, 10.0)]);
        // Le portefeuille suivi est en 2e position et paie 1 SOL.
        tx.pre_balances = vec![5 * LAMPORTS_PER_SOL, 3 * LAMPORTS_PER_SOL];
        tx.post_balances = vec![5 * LAMPORTS_PER_SOL, 2 * LAMPORTS_PER_SOL];
        let other: Pubkey = OTHER.parse().unwrap();
        let signal = classify(&tx, &settings(0.5), &other).unwrap();
        assert_eq!(signal.lamports_spent, LAMPORTS_PER_SOL);
        assert_eq!(signal.asset, MINT_X);
    }
}

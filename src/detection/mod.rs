// DANS : src/detection/mod.rs

// Le cœur du moteur : polling -> classification -> agrégation -> alerte.
pub mod aggregator;
pub mod classifier;
pub mod pipeline;
pub mod poller;
pub mod scheduler;

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

pub use aggregator::{AggregationWindow, SignalAggregator, TriggeredWindow, WalletSpend};
pub use classifier::{classify, largest_token_gain};
pub use pipeline::DetectionContext;
pub use poller::{new_signatures, poll_once, PollOutcome};
pub use scheduler::{PollTicket, PollerRegistry};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// L'actif attribué quand aucun solde de token n'a augmenté. Jamais agrégé.
pub const UNKNOWN_ASSET: &str = "unknown";

pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Conversion SOL -> lamports, arrondie, pour comparer les seuils sans erreur d'arrondi.
pub fn sol_to_lamports(sol: f64) -> u64 {
    if sol.is_finite() && sol > 0.0 {
        (sol * LAMPORTS_PER_SOL as f64).round() as u64
    } else {
        0
    }
}

/// Un achat détecté : un portefeuille a dépensé du SOL et reçu un token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuySignal {
    pub wallet: Pubkey,
    /// Le mint acheté, ou `UNKNOWN_ASSET`.
    pub asset: String,
    pub lamports_spent: u64,
    /// Variation du solde du token (montant "UI").
    pub asset_amount: f64,
    pub signature: String,
    pub block_time: Option<i64>,
}

impl BuySignal {
    pub fn sol_spent(&self) -> f64 {
        lamports_to_sol(self.lamports_spent)
    }

    pub fn is_actionable(&self) -> bool {
        self.asset != UNKNOWN_ASSET
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sol_lamport_conversions_round_trip_on_thresholds() {
        assert_eq!(sol_to_lamports(0.5), 500_000_000);
        assert_eq!(sol_to_lamports(0.1 + 0.2), 300_000_000);
        assert_eq!(sol_to_lamports(-1.0), 0);
        assert_eq!(sol_to_lamports(f64::NAN), 0);
        assert_eq!(lamports_to_sol(200_000_000), 0.2);
    }
}

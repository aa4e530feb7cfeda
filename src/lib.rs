// src/lib.rs

// On déclare tous nos modules principaux pour les rendre publics et
// utilisables par le binaire (wallet_radar.rs) et les tests d'intégration.
pub mod alerts;
pub mod chain;
pub mod config;
pub mod detection;
pub mod engine;
pub mod enrichment;
pub mod monitoring;
pub mod rpc;
pub mod state;
pub mod webhook;

pub use engine::{Engine, TrackOutcome, TrackRequest};

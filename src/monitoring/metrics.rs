// DANS : src/monitoring/metrics.rs

use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, TextEncoder, register_int_counter,
    register_int_counter_vec, register_int_gauge,
};
use tracing::info;
use warp::Filter;

lazy_static! {
    // --- Couche RPC ---
    pub static ref RPC_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "radar_rpc_requests_total",
        "Compteur total des requêtes RPC, segmenté par méthode et statut",
        &["method", "status"] // Labels: "getTransaction", "success" / "rate_limited" / ...
    ).unwrap();
    pub static ref RPC_RATE_LIMIT_STRIKES: IntCounter = register_int_counter!(
        "radar_rpc_rate_limit_strikes_total", "Nombre d'échecs de type rate-limit, tous endpoints confondus"
    ).unwrap();
    pub static ref RPC_ROTATIONS: IntCounter = register_int_counter!(
        "radar_rpc_rotations_total", "Nombre de rotations d'endpoint RPC"
    ).unwrap();

    // --- Détection ---
    pub static ref ACTIVE_POLLERS: IntGauge = register_int_gauge!(
        "radar_active_pollers", "Nombre de tâches de polling actives (abonné, portefeuille)"
    ).unwrap();
    pub static ref TRANSACTIONS_FETCHED: IntCounter = register_int_counter!(
        "radar_transactions_fetched_total", "Transactions récupérées pour classification"
    ).unwrap();
    pub static ref SIGNALS_CLASSIFIED: IntCounter = register_int_counter!(
        "radar_buy_signals_total", "Achats détectés par le classifieur"
    ).unwrap();
    pub static ref ACTIVE_WINDOWS: IntGauge = register_int_gauge!(
        "radar_active_windows", "Fenêtres d'agrégation ouvertes"
    ).unwrap();

    // --- Alertes ---
    pub static ref ALERTS_DISPATCHED: IntCounter = register_int_counter!(
        "radar_alerts_dispatched_total", "Alertes d'achat coordonné envoyées"
    ).unwrap();
    pub static ref ALERTS_FAILED: IntCounter = register_int_counter!(
        "radar_alerts_failed_total", "Alertes dont l'envoi a échoué (non ré-essayées)"
    ).unwrap();
}

pub async fn start_metrics_server(port: u16) {
    let metrics_route = warp::path!("metrics").map(|| {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            tracing::warn!(error = %e, "[Monitoring] Échec de l'encodage des métriques.");
        }
        warp::reply::with_header(buffer, "content-type", "text/plain; version=0.0.4")
    });
    info!(port, "[Monitoring] Serveur de métriques exposé sur /metrics");
    warp::serve(metrics_route).run(([0, 0, 0, 0], port)).await;
}

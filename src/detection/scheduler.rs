// DANS : src/detection/scheduler.rs

use solana_sdk::pubkey::Pubkey;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{error, info, warn};

use super::{pipeline::DetectionContext, poller::poll_once, PollOutcome};
use crate::monitoring::metrics;
use crate::state::SubscriberId;

type PollerKey = (SubscriberId, Pubkey);
type TaskMap = Arc<Mutex<HashMap<PollerKey, PollerHandle>>>;

/// Le reçu rendu par `PollerRegistry::start`. La génération distingue deux démarrages
/// successifs pour la même clé : annuler un vieux ticket n'arrête pas la nouvelle tâche.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTicket {
    pub subscriber: SubscriberId,
    pub address: Pubkey,
    pub generation: u64,
}

struct PollerHandle {
    generation: u64,
    task: JoinHandle<()>,
}

/// Annule la tâche enveloppée quand on la lâche (y compris quand la tâche parente est annulée).
struct AbortOnDrop(JoinHandle<anyhow::Result<PollOutcome>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Une tâche périodique par (abonné, adresse), annulable à tout moment.
#[derive(Default)]
pub struct PollerRegistry {
    tasks: TaskMap,
    next_generation: AtomicU64,
}

impl PollerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Démarre (ou redémarre) le polling d'une adresse. Le premier tick part immédiatement.
    pub async fn start(&self, ctx: Arc<DetectionContext>, subscriber: SubscriberId, address: Pubkey) -> PollTicket {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;

        // Le verrou est pris avant le spawn : une tâche qui s'arrête d'elle-même trouve
        // toujours son entrée déjà enregistrée.
        let mut tasks = self.tasks.lock().await;
        let task = tokio::spawn(run_poller(
            ctx,
            Arc::clone(&self.tasks),
            PollTicket { subscriber, address, generation },
        ));
        if let Some(previous) = tasks.insert((subscriber, address), PollerHandle { generation, task }) {
            previous.task.abort();
        }
        metrics::ACTIVE_POLLERS.set(tasks.len() as i64);

        PollTicket { subscriber, address, generation }
    }

    /// Arrête la tâche de l'adresse. `false` si aucune tâche n'était enregistrée.
    pub async fn cancel(&self, subscriber: SubscriberId, address: &Pubkey) -> bool {
        let mut tasks = self.tasks.lock().await;
        let removed = tasks.remove(&(subscriber, *address));
        metrics::ACTIVE_POLLERS.set(tasks.len() as i64);
        match removed {
            Some(handle) => {
                handle.task.abort();
                info!(subscriber = %subscriber, wallet = %address, "[Scheduler] Polling annulé.");
                true
            }
            None => false,
        }
    }

    /// N'arrête la tâche que si elle correspond encore à ce ticket.
    pub async fn cancel_ticket(&self, ticket: &PollTicket) -> bool {
        let mut tasks = self.tasks.lock().await;
        let key = (ticket.subscriber, ticket.address);
        if tasks.get(&key).is_some_and(|h| h.generation == ticket.generation) {
            if let Some(handle) = tasks.remove(&key) {
                handle.task.abort();
            }
            metrics::ACTIVE_POLLERS.set(tasks.len() as i64);
            return true;
        }
        false
    }

    pub async fn is_running(&self, subscriber: SubscriberId, address: &Pubkey) -> bool {
        self.tasks
            .lock()
            .await
            .get(&(subscriber, *address))
            .is_some_and(|h| !h.task.is_finished())
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn shutdown(&self) {
        let mut tasks = self.tasks.lock().await;
        let count = tasks.len();
        for (_, handle) in tasks.drain() {
            handle.task.abort();
        }
        metrics::ACTIVE_POLLERS.set(0);
        info!(count, "[Scheduler] Toutes les tâches de polling sont arrêtées.");
    }
}

/// La boucle d'une tâche. Chaque tick tourne dans sa propre sous-tâche : une panique y est
/// rattrapée et journalisée sans arrêter le polling de ce portefeuille ni des autres.
async fn run_poller(ctx: Arc<DetectionContext>, tasks: TaskMap, ticket: PollTicket) {
    let PollTicket { subscriber, address, .. } = ticket;
    let mut ticker = interval(ctx.settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(subscriber = %subscriber, wallet = %address, period_secs = ctx.settings.poll_interval.as_secs(), "[Scheduler] Polling démarré.");

    loop {
        ticker.tick().await;

        let tick_ctx = Arc::clone(&ctx);
        let mut tick = AbortOnDrop(tokio::spawn(async move {
            poll_once(&tick_ctx, subscriber, &address).await
        }));

        match (&mut tick.0).await {
            Ok(Ok(PollOutcome::Untracked)) => {
                info!(subscriber = %subscriber, wallet = %address, "[Scheduler] Portefeuille plus suivi, arrêt de la tâche.");
                forget_finished(&tasks, &ticket).await;
                break;
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                warn!(subscriber = %subscriber, wallet = %address, error = %format!("{:#}", e), "[Scheduler] Tick en échec, prochain essai au tick suivant.");
            }
            Err(join_error) if join_error.is_panic() => {
                error!(subscriber = %subscriber, wallet = %address, error = %join_error, "[Scheduler] Panique pendant un tick.");
            }
            Err(_) => break,
        }
    }
}

/// Retire l'entrée d'une tâche qui s'est arrêtée seule, si elle n'a pas été remplacée entre-temps.
async fn forget_finished(tasks: &TaskMap, ticket: &PollTicket) {
    let mut tasks = tasks.lock().await;
    let key = (ticket.subscriber, ticket.address);
    if tasks.get(&key).is_some_and(|h| h.generation == ticket.generation) {
        tasks.remove(&key);
    }
    metrics::ACTIVE_POLLERS.set(tasks.len() as i64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::LogDispatcher;
    use crate::chain::{ChainClient, SignatureInfo, TransactionBalances};
    use crate::config::EngineSettings;
    use crate::enrichment::NoopEnrichment;
    use crate::state::SubscriberStore;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingChain {
        listings: AtomicUsize,
    }

    #[async_trait]
    impl ChainClient for CountingChain {
        async fn list_recent_signatures(&self, _address: &Pubkey, _limit: usize) -> anyhow::Result<Vec<SignatureInfo>> {
            self.listings.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn get_transaction(&self, _signature: &str) -> anyhow::Result<Option<TransactionBalances>> {
            Ok(None)
        }
    }

    async fn setup() -> (Arc<DetectionContext>, Arc<CountingChain>, Pubkey) {
        let chain = Arc::new(CountingChain::default());
        let store = Arc::new(SubscriberStore::new(0.5, 2));
        let address = Pubkey::new_unique();
        store.add_wallet(SubscriberId(1), address, "w".into(), 0).await.unwrap();
        let settings = EngineSettings {
            poll_interval: Duration::from_secs(30),
            ..EngineSettings::default()
        };
        let ctx = Arc::new(DetectionContext::new(
            settings,
            store,
            chain.clone(),
            Arc::new(NoopEnrichment),
            Arc::new(LogDispatcher),
        ));
        (ctx, chain, address)
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_schedule_until_cancelled() {
        let (ctx, chain, address) = setup().await;
        let registry = PollerRegistry::new();
        let id = SubscriberId(1);

        registry.start(ctx, id, address).await;
        // Ticks à t=0, 30 et 60.
        tokio::time::sleep(Duration::from_secs(75)).await;
        assert_eq!(chain.listings.load(Ordering::SeqCst), 3);

        assert!(registry.cancel(id, &address).await);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(chain.listings.load(Ordering::SeqCst), 3);
        assert!(!registry.is_running(id, &address).await);
        assert!(!registry.cancel(id, &address).await);
    }

    #[tokio::test(start_paused = true)]
    async fn task_stops_once_the_wallet_is_gone() {
        let (ctx, chain, address) = setup().await;
        let registry = PollerRegistry::new();
        let id = SubscriberId(1);

        registry.start(Arc::clone(&ctx), id, address).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        ctx.store.remove_wallet(id, &address).await.unwrap();

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(chain.listings.load(Ordering::SeqCst), 1);
        assert!(!registry.is_running(id, &address).await);
        assert!(registry.is_empty().await, "l'entrée de la tâche terminée doit disparaître");
        assert!(!registry.cancel(id, &address).await);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_ticket_does_not_cancel_a_restart() {
        let (ctx, _chain, address) = setup().await;
        let registry = PollerRegistry::new();
        let id = SubscriberId(1);

        let old = registry.start(Arc::clone(&ctx), id, address).await;
        let new = registry.start(ctx, id, address).await;
        assert_ne!(old.generation, new.generation);
        assert_eq!(registry.len().await, 1);

        assert!(!registry.cancel_ticket(&old).await);
        assert!(registry.is_running(id, &address).await);
        assert!(registry.cancel_ticket(&new).await);
        assert!(registry.is_empty().await);
    }
}

// DANS : src/state/mod.rs

// L'état partagé du moteur. Tout vit en mémoire : rien ne survit à un redémarrage.
pub mod subscribers;

pub use subscribers::{
    unix_now, validate_address, Subscriber, SubscriberId, SubscriberSettings, SubscriberStore,
    TrackError, TrackedWallet,
};

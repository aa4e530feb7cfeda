// DANS : src/rpc/mod.rs

// La couche de résilience : pool d'endpoints, ré-essais avec backoff, et le client
// Solana qui s'appuie sur les deux.
pub mod endpoint_pool;
pub mod resilient_client;
pub mod retrying_caller;

pub use endpoint_pool::{Endpoint, EndpointPool};
pub use resilient_client::ResilientRpcClient;
pub use retrying_caller::{classify_error, ErrorClass, RetryPolicy, RetryingCaller};

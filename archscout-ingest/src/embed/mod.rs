//! Chunking, embedding and storing project text.
//!
//! Two paths share the chunker: [`RemoteEmbedder`] spreads projects over a pool of API keys,
//! [`LocalEmbedder`] pipes a single local model into bulk writes.
mod chunking;
mod key_pool;
mod local;
mod remote;
mod repair;
mod throttle;

pub use chunking::Chunker;
pub use key_pool::{KeyLease, KeyPool, KeyPoolError};
pub use local::LocalEmbedder;
pub use remote::RemoteEmbedder;
pub use repair::{RepairReport, repair_nan_embeddings};
pub use throttle::Throttled;

//! Stores that live in memory. Useful for tests and dry runs without a database.
mod memory;

pub use memory::{MemoryContentStore, MemoryEmbeddingStore};

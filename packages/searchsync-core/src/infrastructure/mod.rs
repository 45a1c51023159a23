//! Infrastructure layer - IndexStore adapters
//!
//! - `memory`: in-process store for tests and dry runs
//! - `opensearch`: HTTP adapter (feature `opensearch`)

pub mod memory;

#[cfg(feature = "opensearch")]
pub mod opensearch;

pub use memory::InMemoryIndexStore;

#[cfg(feature = "opensearch")]
pub use opensearch::OpenSearchStore;

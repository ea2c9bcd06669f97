//! Devdash Storage: relation store backends
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      BACKENDS                            │
//! ├──────────────────────────────────────────────────────────┤
//! │                                                          │
//! │  BackendConfig ──open_backend──► Backend                 │
//! │                                    ├─ PostgrestStore     │
//! │                                    ├─ JsonFileStore      │
//! │                                    └─ MemoryStore        │
//! │                                                          │
//! │  every variant: impl RelationStore<L, R> for any ids     │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Features
//!
//! - **PostgREST**: the hosted join tables, configured from `SUPABASE_*`
//!   environment variables or a JSON config file.
//! - **JSON file**: one local document, written atomically.
//! - **Memory**: the in-process store from `devdash-mapping`.

pub mod config;
pub mod file;
pub mod postgrest;

#[cfg(test)]
mod tests;

pub use config::{BackendConfig, ConfigError, PostgrestConfig, StoreSpec};
pub use file::JsonFileStore;
pub use postgrest::PostgrestStore;

use async_trait::async_trait;
use devdash_mapping::{EntityId, MemoryStore, Relation, RelationStore, RelationTuple, StoreError};

/// A concrete store chosen at runtime.
pub enum Backend {
    Postgrest(PostgrestStore),
    File(JsonFileStore),
    Memory(MemoryStore),
}

impl Backend {
    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Postgrest(_) => "postgrest",
            Backend::File(_) => "file",
            Backend::Memory(_) => "memory",
        }
    }
}

/// Open the backend named by `config.store`.
pub fn open_backend(config: &BackendConfig) -> anyhow::Result<Backend> {
    let backend = match &config.store {
        StoreSpec::Postgrest => Backend::Postgrest(PostgrestStore::new(config.postgrest()?)?),
        StoreSpec::File(path) => Backend::File(JsonFileStore::new(path.clone())),
        StoreSpec::Memory => Backend::Memory(MemoryStore::new()),
    };
    tracing::debug!(store = %config.store, "opened backend");
    Ok(backend)
}

#[async_trait]
impl<L: EntityId, R: EntityId> RelationStore<L, R> for Backend {
    async fn list_committed(
        &self,
        relation: &Relation<L, R>,
    ) -> Result<Vec<RelationTuple<L, R>>, StoreError> {
        match self {
            Backend::Postgrest(store) => store.list_committed(relation).await,
            Backend::File(store) => store.list_committed(relation).await,
            Backend::Memory(store) => store.list_committed(relation).await,
        }
    }

    async fn insert(
        &self,
        relation: &Relation<L, R>,
        left: &L,
        right: &R,
    ) -> Result<(), StoreError> {
        match self {
            Backend::Postgrest(store) => store.insert(relation, left, right).await,
            Backend::File(store) => store.insert(relation, left, right).await,
            Backend::Memory(store) => store.insert(relation, left, right).await,
        }
    }

    async fn delete(
        &self,
        relation: &Relation<L, R>,
        left: &L,
        right: &R,
    ) -> Result<(), StoreError> {
        match self {
            Backend::Postgrest(store) => store.delete(relation, left, right).await,
            Backend::File(store) => store.delete(relation, left, right).await,
            Backend::Memory(store) => store.delete(relation, left, right).await,
        }
    }
}

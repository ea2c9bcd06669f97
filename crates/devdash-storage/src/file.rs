//! JSON file relation store
//!
//! Keeps every relation in one document on disk, keyed by table name, with
//! ids in their text form. Useful for local development and for tests that
//! want persistence without a database.
//!
//! ```text
//! {
//!   "relations": { "worktree_app_mappings": [["<uuid>", "web"], ...] },
//!   "updated_at": "2026-01-01T00:00:00Z"
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use devdash_mapping::store::parse_id;
use devdash_mapping::{EntityId, Relation, RelationStore, RelationTuple, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Document {
    #[serde(default)]
    relations: BTreeMap<String, BTreeSet<(String, String)>>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

pub struct JsonFileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> Result<Document, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(Document::default()),
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                StoreError::Decode(format!("{}: {e}", self.path.display()))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Document::default()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write(&self, mut doc: Document) -> Result<(), StoreError> {
        doc.updated_at = Some(Utc::now());
        let json = serde_json::to_string_pretty(&doc)
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Apply `edit` to one table and persist the result.
    async fn update(
        &self,
        table: &str,
        edit: impl FnOnce(&mut BTreeSet<(String, String)>),
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut doc = self.read().await?;
        let rows = doc.relations.entry(table.to_string()).or_default();
        edit(rows);
        if rows.is_empty() {
            doc.relations.remove(table);
        }
        self.write(doc).await
    }
}

#[async_trait]
impl<L: EntityId, R: EntityId> RelationStore<L, R> for JsonFileStore {
    async fn list_committed(
        &self,
        relation: &Relation<L, R>,
    ) -> Result<Vec<RelationTuple<L, R>>, StoreError> {
        let doc = {
            let _guard = self.lock.lock().await;
            self.read().await?
        };
        let Some(rows) = doc.relations.get(relation.name()) else {
            return Ok(Vec::new());
        };
        rows.iter()
            .map(|(l, r)| {
                Ok(RelationTuple::new(
                    parse_id(relation.name(), relation.left_column(), l)?,
                    parse_id(relation.name(), relation.right_column(), r)?,
                ))
            })
            .collect()
    }

    async fn insert(
        &self,
        relation: &Relation<L, R>,
        left: &L,
        right: &R,
    ) -> Result<(), StoreError> {
        let row = (left.to_string(), right.to_string());
        tracing::debug!(table = %relation.name(), left = %row.0, right = %row.1, "file insert");
        self.update(relation.name(), |rows| {
            rows.insert(row);
        })
        .await
    }

    async fn delete(
        &self,
        relation: &Relation<L, R>,
        left: &L,
        right: &R,
    ) -> Result<(), StoreError> {
        let row = (left.to_string(), right.to_string());
        tracing::debug!(table = %relation.name(), left = %row.0, right = %row.1, "file delete");
        self.update(relation.name(), |rows| {
            rows.remove(&row);
        })
        .await
    }
}

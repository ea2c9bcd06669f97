//! In-memory relation store
//!
//! Used for tests, dry runs and offline demos. Every call is recorded and any
//! call can be made to fail, which is how partial-failure behaviour is
//! exercised without a live backend.

use crate::error::StoreError;
use crate::ids::EntityId;
use crate::relation::{Relation, RelationTuple};
use crate::store::{parse_id, RelationStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};

/// A call made against a [`MemoryStore`], ids in text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    List {
        relation: String,
    },
    Insert {
        relation: String,
        left: String,
        right: String,
    },
    Delete {
        relation: String,
        left: String,
        right: String,
    },
}

impl StoreCall {
    pub fn is_write(&self) -> bool {
        !matches!(self, StoreCall::List { .. })
    }
}

type Key = (String, String, String);

#[derive(Default)]
struct MemoryState {
    tuples: HashMap<String, BTreeSet<(String, String)>>,
    calls: Vec<StoreCall>,
    failing_inserts: HashMap<Key, String>,
    failing_deletes: HashMap<Key, String>,
    failing_lists: HashMap<String, String>,
    offline: Option<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

fn key<L: EntityId, R: EntityId>(relation: &Relation<L, R>, left: &L, right: &R) -> Key {
    (relation.name().to_string(), left.to_string(), right.to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store tuples directly, bypassing call recording and failure injection.
    pub fn seed<L: EntityId, R: EntityId>(
        &self,
        relation: &Relation<L, R>,
        tuples: impl IntoIterator<Item = (L, R)>,
    ) {
        let mut state = self.state.lock();
        let rows = state.tuples.entry(relation.name().to_string()).or_default();
        for (left, right) in tuples {
            rows.insert((left.to_string(), right.to_string()));
        }
    }

    pub fn contains<L: EntityId, R: EntityId>(
        &self,
        relation: &Relation<L, R>,
        left: &L,
        right: &R,
    ) -> bool {
        self.state
            .lock()
            .tuples
            .get(relation.name())
            .is_some_and(|rows| rows.contains(&(left.to_string(), right.to_string())))
    }

    pub fn len<L: EntityId, R: EntityId>(&self, relation: &Relation<L, R>) -> usize {
        self.state
            .lock()
            .tuples
            .get(relation.name())
            .map_or(0, BTreeSet::len)
    }

    pub fn fail_insert<L: EntityId, R: EntityId>(
        &self,
        relation: &Relation<L, R>,
        left: &L,
        right: &R,
        message: &str,
    ) {
        self.state
            .lock()
            .failing_inserts
            .insert(key(relation, left, right), message.to_string());
    }

    pub fn fail_delete<L: EntityId, R: EntityId>(
        &self,
        relation: &Relation<L, R>,
        left: &L,
        right: &R,
        message: &str,
    ) {
        self.state
            .lock()
            .failing_deletes
            .insert(key(relation, left, right), message.to_string());
    }

    pub fn fail_list<L: EntityId, R: EntityId>(&self, relation: &Relation<L, R>, message: &str) {
        self.state
            .lock()
            .failing_lists
            .insert(relation.name().to_string(), message.to_string());
    }

    /// With `Some(message)`, every call fails as if the network were down.
    pub fn set_offline(&self, message: Option<&str>) {
        self.state.lock().offline = message.map(str::to_string);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing_inserts.clear();
        state.failing_deletes.clear();
        state.failing_lists.clear();
        state.offline = None;
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().calls.clone()
    }

    pub fn write_calls(&self) -> usize {
        self.state.lock().calls.iter().filter(|c| c.is_write()).count()
    }

    pub fn reset_calls(&self) {
        self.state.lock().calls.clear();
    }
}

#[async_trait]
impl<L: EntityId, R: EntityId> RelationStore<L, R> for MemoryStore {
    async fn list_committed(
        &self,
        relation: &Relation<L, R>,
    ) -> Result<Vec<RelationTuple<L, R>>, StoreError> {
        let rows: Vec<(String, String)> = {
            let mut state = self.state.lock();
            state.calls.push(StoreCall::List {
                relation: relation.name().to_string(),
            });
            if let Some(message) = &state.offline {
                return Err(StoreError::Unavailable(message.clone()));
            }
            if let Some(message) = state.failing_lists.get(relation.name()) {
                return Err(StoreError::Unavailable(message.clone()));
            }
            state
                .tuples
                .get(relation.name())
                .map(|rows| rows.iter().cloned().collect())
                .unwrap_or_default()
        };

        rows.into_iter()
            .map(|(left, right)| {
                Ok(RelationTuple::new(
                    parse_id(relation.name(), relation.left_column(), &left)?,
                    parse_id(relation.name(), relation.right_column(), &right)?,
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
        let (name, left, right) = key(relation, left, right);
        let mut state = self.state.lock();
        state.calls.push(StoreCall::Insert {
            relation: name.clone(),
            left: left.clone(),
            right: right.clone(),
        });
        if let Some(message) = &state.offline {
            return Err(StoreError::Unavailable(message.clone()));
        }
        let key = (name, left, right);
        if let Some(message) = state.failing_inserts.get(&key) {
            return Err(StoreError::Rejected {
                status: 409,
                message: message.clone(),
            });
        }
        let (name, left, right) = key;
        state.tuples.entry(name).or_default().insert((left, right));
        Ok(())
    }

    async fn delete(
        &self,
        relation: &Relation<L, R>,
        left: &L,
        right: &R,
    ) -> Result<(), StoreError> {
        let key = key(relation, left, right);
        let mut state = self.state.lock();
        state.calls.push(StoreCall::Delete {
            relation: key.0.clone(),
            left: key.1.clone(),
            right: key.2.clone(),
        });
        if let Some(message) = &state.offline {
            return Err(StoreError::Unavailable(message.clone()));
        }
        if let Some(message) = state.failing_deletes.get(&key) {
            return Err(StoreError::Rejected {
                status: 409,
                message: message.clone(),
            });
        }
        let (name, left, right) = key;
        if let Some(rows) = state.tuples.get_mut(&name) {
            rows.remove(&(left, right));
        }
        Ok(())
    }
}

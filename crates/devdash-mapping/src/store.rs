//! Storage collaborator interface

use crate::error::StoreError;
use crate::ids::EntityId;
use crate::relation::{Relation, RelationTuple};
use async_trait::async_trait;

/// Backing store for relation tuples.
///
/// Inserts of an existing tuple and deletes of a missing one may succeed or
/// fail depending on the backend; the editor never relies on either.
#[async_trait]
pub trait RelationStore<L: EntityId, R: EntityId>: Send + Sync {
    /// Full read of the tuples currently stored for `relation`.
    async fn list_committed(
        &self,
        relation: &Relation<L, R>,
    ) -> Result<Vec<RelationTuple<L, R>>, StoreError>;

    async fn insert(&self, relation: &Relation<L, R>, left: &L, right: &R)
        -> Result<(), StoreError>;

    async fn delete(&self, relation: &Relation<L, R>, left: &L, right: &R)
        -> Result<(), StoreError>;
}

/// Parse a stored id from its text form.
pub fn parse_id<T: EntityId>(relation: &str, column: &str, text: &str) -> Result<T, StoreError> {
    text.parse::<T>().map_err(|_| {
        StoreError::Decode(format!(
            "`{relation}.{column}` holds `{text}`, which is not a valid id"
        ))
    })
}

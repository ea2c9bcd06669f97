//! Relation descriptors and tuples

use crate::error::RelationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;

/// One association between a left and a right entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RelationTuple<L, R> {
    pub left: L,
    pub right: R,
}

impl<L, R> RelationTuple<L, R> {
    pub fn new(left: L, right: R) -> Self {
        Self { left, right }
    }
}

impl<L: fmt::Display, R: fmt::Display> fmt::Display for RelationTuple<L, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.left, self.right)
    }
}

/// A many-to-many relation backed by a join table.
///
/// The type parameters pin which id types may be stored; the strings name the
/// table and its two key columns.
pub struct Relation<L, R> {
    name: String,
    left_column: String,
    right_column: String,
    _ids: PhantomData<fn() -> (L, R)>,
}

impl<L, R> Relation<L, R> {
    pub fn new(
        name: impl Into<String>,
        left_column: impl Into<String>,
        right_column: impl Into<String>,
    ) -> Result<Self, RelationError> {
        let relation = Self::unchecked(name.into(), left_column.into(), right_column.into());
        check_identifier("name", &relation.name)?;
        check_identifier("left column", &relation.left_column)?;
        check_identifier("right column", &relation.right_column)?;
        Ok(relation)
    }

    /// Catalog entries are compile-time constants checked by the catalog tests.
    pub(crate) fn unchecked(name: String, left_column: String, right_column: String) -> Self {
        Self {
            name,
            left_column,
            right_column,
            _ids: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn left_column(&self) -> &str {
        &self.left_column
    }

    pub fn right_column(&self) -> &str {
        &self.right_column
    }
}

impl<L, R> Clone for Relation<L, R> {
    fn clone(&self) -> Self {
        Self::unchecked(
            self.name.clone(),
            self.left_column.clone(),
            self.right_column.clone(),
        )
    }
}

impl<L, R> fmt::Debug for Relation<L, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("name", &self.name)
            .field("left_column", &self.left_column)
            .field("right_column", &self.right_column)
            .finish()
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_sql_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_identifier(what: &'static str, value: &str) -> Result<(), RelationError> {
    if is_sql_identifier(value) {
        Ok(())
    } else {
        Err(RelationError {
            what,
            value: value.to_string(),
        })
    }
}

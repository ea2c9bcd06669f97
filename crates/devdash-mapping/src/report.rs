//! Save plans and save reports

use crate::relation::RelationTuple;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOp {
    Insert,
    Delete,
}

impl WriteOp {
    /// Membership the pair has once the write lands.
    pub fn target_membership(self) -> bool {
        matches!(self, WriteOp::Insert)
    }
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteOp::Insert => f.write_str("insert"),
            WriteOp::Delete => f.write_str("delete"),
        }
    }
}

/// The writes a save would issue, deletes first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavePlan<L, R> {
    pub deletes: Vec<RelationTuple<L, R>>,
    pub inserts: Vec<RelationTuple<L, R>>,
}

impl<L, R> Default for SavePlan<L, R> {
    fn default() -> Self {
        Self {
            deletes: Vec::new(),
            inserts: Vec::new(),
        }
    }
}

impl<L, R> SavePlan<L, R> {
    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.inserts.is_empty()
    }

    pub fn write_count(&self) -> usize {
        self.deletes.len() + self.inserts.len()
    }

    /// Writes in issue order.
    pub fn writes(&self) -> impl Iterator<Item = (WriteOp, &RelationTuple<L, R>)> {
        self.deletes
            .iter()
            .map(|t| (WriteOp::Delete, t))
            .chain(self.inserts.iter().map(|t| (WriteOp::Insert, t)))
    }
}

/// One tuple that did not persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveFailure<L, R> {
    pub left: L,
    pub right: R,
    pub op: WriteOp,
    /// Message of the storage error that caused the failure.
    pub error: String,
}

/// Outcome of one save. Partial success is an ordinary result, not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveReport<L, R> {
    pub relation: String,
    pub inserted: Vec<RelationTuple<L, R>>,
    pub deleted: Vec<RelationTuple<L, R>>,
    pub failures: Vec<SaveFailure<L, R>>,
    pub finished_at: DateTime<Utc>,
}

impl<L, R> SaveReport<L, R> {
    pub(crate) fn empty(relation: &str) -> Self {
        Self {
            relation: relation.to_string(),
            inserted: Vec::new(),
            deleted: Vec::new(),
            failures: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Writes that reached storage successfully.
    pub fn write_count(&self) -> usize {
        self.inserted.len() + self.deleted.len()
    }

    /// Writes attempted, successful or not.
    pub fn attempted(&self) -> usize {
        self.write_count() + self.failures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_issues_deletes_before_inserts() {
        let plan = SavePlan {
            deletes: vec![RelationTuple::new("W1", "app-a")],
            inserts: vec![RelationTuple::new("W1", "app-b")],
        };
        let ops: Vec<WriteOp> = plan.writes().map(|(op, _)| op).collect();
        assert_eq!(ops, vec![WriteOp::Delete, WriteOp::Insert]);
        assert_eq!(plan.write_count(), 2);
    }

    #[test]
    fn test_report_counts() {
        let mut report = SaveReport::<&str, &str>::empty("worktree_app_mappings");
        assert!(report.is_success());
        report.deleted.push(RelationTuple::new("W1", "app-a"));
        report.failures.push(SaveFailure {
            left: "W1",
            right: "app-b",
            op: WriteOp::Insert,
            error: "duplicate key".to_string(),
        });
        assert!(!report.is_success());
        assert_eq!(report.write_count(), 1);
        assert_eq!(report.attempted(), 2);
    }
}

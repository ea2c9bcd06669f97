use crate::ids::EntityId;
use crate::report::SaveReport;

/// A toggle was refused before touching the pending set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StagingError {
    #[error("empty id")]
    EmptyId,
    #[error("invalid id `{id}`: {reason}")]
    InvalidId { id: String, reason: &'static str },
}

/// Failure reported by a storage collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("rejected by storage (status {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("could not decode stored rows: {0}")]
    Decode(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
#[error("invalid relation {what} `{value}`: expected an SQL identifier")]
pub struct RelationError {
    pub what: &'static str,
    pub value: String,
}

/// Errors surfaced by [`crate::MappingEditor`].
///
/// Per-tuple write failures are not errors; they travel inside
/// [`SaveReport::failures`].
#[derive(Debug, thiserror::Error)]
pub enum MappingError<L: EntityId, R: EntityId> {
    /// The committed set could not be read; nothing about the view can be trusted.
    #[error("failed to load `{relation}`: {source}")]
    Load { relation: String, source: StoreError },

    /// Writes were attempted but the committed set could not be refetched
    /// afterwards. The local view was patched with the successful writes and
    /// is marked stale.
    #[error(
        "saved `{relation}` ({} written, {} failed) but the refetch failed: {source}",
        report.write_count(),
        report.failures.len()
    )]
    Refetch {
        relation: String,
        source: StoreError,
        report: SaveReport<L, R>,
    },

    #[error("a save of `{relation}` is already in flight")]
    SaveInProgress { relation: String },
}

impl<L: EntityId, R: EntityId> MappingError<L, R> {
    /// The save report, when the failure happened after writes were attempted.
    pub fn report(&self) -> Option<&SaveReport<L, R>> {
        match self {
            Self::Refetch { report, .. } => Some(report),
            _ => None,
        }
    }
}

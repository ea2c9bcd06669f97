//! Devdash Mapping: staged edits of many-to-many relations
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                      MAPPING EDITOR                               │
//! ├───────────────────────────────────────────────────────────────────┤
//! │                                                                   │
//! │  checkbox ──toggle──► Pending Toggle Set ─┐                       │
//! │                                           │ XOR                   │
//! │  store ──load──────► Committed Set ───────┴──► effective state    │
//! │                                                                   │
//! │  save: snapshot pending ─► plan (deletes, inserts) ─► store       │
//! │        failed pairs stay staged, committed set refetched          │
//! │                                                                   │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Properties
//!
//! - **No write per click**: toggles are in-memory; flipping a box twice leaves
//!   nothing staged and costs no storage call.
//! - **Best-effort batches**: each insert/delete succeeds or fails on its own;
//!   failures come back as data and stay staged for the next save.
//! - **Generic**: one editor serves any `Relation<L, R>`; the worktree ↔ app,
//!   pipeline and service relations live in [`catalog`].

pub mod catalog;
pub mod editor;
pub mod error;
pub mod ids;
pub mod memory;
pub mod pending;
pub mod relation;
pub mod report;
pub mod store;


pub use catalog::{WorktreeError, WorktreeMappings, WorktreeSaveReport};
pub use editor::{EditorState, MappingEditor};
pub use error::{MappingError, RelationError, StagingError, StoreError};
pub use ids::{AppName, EntityId, PipelineId, ServiceId, WorktreeId};
pub use memory::{MemoryStore, StoreCall};
pub use pending::PendingToggles;
pub use relation::{Relation, RelationTuple};
pub use report::{SaveFailure, SavePlan, SaveReport, WriteOp};
pub use store::RelationStore;

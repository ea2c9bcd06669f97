//! Mapping editor: staged toggles reconciled against a relation store
//!
//! ```text
//!   toggle ──► pending ──save──► in-flight ──plan──► deletes, inserts ──► store
//!                 ▲                                                        │
//!                 └──────── failed pairs re-derived against refetch ◄──────┘
//! ```
//!
//! The committed set is only replaced by a read from the store. Toggles never
//! suspend; `save` is the only operation that awaits.

use crate::error::{MappingError, StagingError, StoreError};
use crate::ids::EntityId;
use crate::pending::PendingToggles;
use crate::relation::{Relation, RelationTuple};
use crate::report::{SaveFailure, SavePlan, SaveReport, WriteOp};
use crate::store::RelationStore;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::{Arc, Weak};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorState {
    /// Nothing staged.
    Clean,
    /// Toggles staged, no failed save since.
    Dirty,
    /// A save is in flight; toggles still accumulate.
    Saving,
    /// The last save left failed pairs staged.
    DirtyWithErrors,
}

/// Committed tuples grouped by left id.
struct Committed<L, R> {
    by_left: BTreeMap<L, BTreeSet<R>>,
}

impl<L: Ord + Clone, R: Ord + Clone> Committed<L, R> {
    fn empty() -> Self {
        Self {
            by_left: BTreeMap::new(),
        }
    }

    fn from_tuples(tuples: Vec<RelationTuple<L, R>>) -> Self {
        let mut committed = Self::empty();
        for tuple in tuples {
            committed.set(tuple.left, tuple.right, true);
        }
        committed
    }

    fn contains(&self, left: &L, right: &R) -> bool {
        self.by_left
            .get(left)
            .is_some_and(|rights| rights.contains(right))
    }

    fn set(&mut self, left: L, right: R, member: bool) {
        if member {
            self.by_left.entry(left).or_default().insert(right);
        } else if let Some(rights) = self.by_left.get_mut(&left) {
            rights.remove(&right);
            if rights.is_empty() {
                self.by_left.remove(&left);
            }
        }
    }

    fn tuples(&self) -> Vec<RelationTuple<L, R>> {
        self.by_left
            .iter()
            .flat_map(|(left, rights)| {
                rights
                    .iter()
                    .map(move |right| RelationTuple::new(left.clone(), right.clone()))
            })
            .collect()
    }
}

struct EditorInner<L, R> {
    committed: Committed<L, R>,
    pending: PendingToggles<L, R>,
    /// Snapshot taken by the running save.
    in_flight: Option<PendingToggles<L, R>>,
    last_failures: Vec<SaveFailure<L, R>>,
    /// Set when a post-save refetch failed and the committed set was patched locally.
    stale: bool,
}

impl<L: EntityId, R: EntityId> EditorInner<L, R> {
    fn is_effectively_member(&self, left: &L, right: &R) -> bool {
        let in_flight = self
            .in_flight
            .as_ref()
            .is_some_and(|snapshot| snapshot.contains(left, right));
        self.committed.contains(left, right) ^ in_flight ^ self.pending.contains(left, right)
    }

    /// Swap in a freshly read committed set without changing what any staged
    /// pair looks like. Staged pairs that the new set already satisfies drop
    /// out; the rest are re-expressed against it.
    fn rebase(&mut self, tuples: Vec<RelationTuple<L, R>>) {
        let in_flight_wants: Vec<(L, R, bool)> = self
            .in_flight
            .iter()
            .flat_map(|snapshot| snapshot.iter())
            .map(|(left, right)| (left.clone(), right.clone(), !self.committed.contains(left, right)))
            .collect();
        let pending_wants: Vec<(L, R, bool)> = self
            .pending
            .iter()
            .map(|(left, right)| {
                let want = self.is_effectively_member(left, right);
                (left.clone(), right.clone(), want)
            })
            .collect();

        self.committed = Committed::from_tuples(tuples);
        self.stale = false;

        if let Some(snapshot) = self.in_flight.as_mut() {
            *snapshot = PendingToggles::new();
            for (left, right, want) in in_flight_wants {
                if self.committed.contains(&left, &right) != want {
                    snapshot.set(left, right, true);
                }
            }
        }
        let mut pending = PendingToggles::new();
        for (left, right, want) in pending_wants {
            let base = self.committed.contains(&left, &right)
                ^ self
                    .in_flight
                    .as_ref()
                    .is_some_and(|snapshot| snapshot.contains(&left, &right));
            if base != want {
                pending.set(left, right, true);
            }
        }
        self.pending = pending;
    }

    fn plan(&self, toggles: &PendingToggles<L, R>) -> SavePlan<L, R> {
        let mut plan = SavePlan::default();
        // Staged means flipped relative to committed.
        for (left, right) in toggles.iter() {
            let tuple = RelationTuple::new(left.clone(), right.clone());
            if self.committed.contains(left, right) {
                plan.deletes.push(tuple);
            } else {
                plan.inserts.push(tuple);
            }
        }
        plan
    }
}

/// Stages membership toggles for one relation and commits them in batches.
///
/// Cloning is cheap and shares state, so a view and its save task can hold the
/// same editor.
pub struct MappingEditor<L: EntityId, R: EntityId> {
    relation: Relation<L, R>,
    store: Arc<dyn RelationStore<L, R>>,
    inner: Arc<Mutex<EditorInner<L, R>>>,
}

impl<L: EntityId, R: EntityId> Clone for MappingEditor<L, R> {
    fn clone(&self) -> Self {
        Self {
            relation: self.relation.clone(),
            store: Arc::clone(&self.store),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: EntityId, R: EntityId> MappingEditor<L, R> {
    /// Create an editor with an empty committed set. Call [`Self::load`] before use.
    pub fn new(relation: Relation<L, R>, store: Arc<dyn RelationStore<L, R>>) -> Self {
        Self {
            relation,
            store,
            inner: Arc::new(Mutex::new(EditorInner {
                committed: Committed::empty(),
                pending: PendingToggles::new(),
                in_flight: None,
                last_failures: Vec::new(),
                stale: false,
            })),
        }
    }

    pub fn relation(&self) -> &Relation<L, R> {
        &self.relation
    }

    // ========================================================================
    // Read path
    // ========================================================================

    /// Read the committed set from storage.
    ///
    /// Staged toggles keep their meaning: a box the user checked stays
    /// checked, and drops out of pending if another writer already added it.
    /// Refused while a save is in flight.
    pub async fn load(&self) -> Result<(), MappingError<L, R>> {
        self.ensure_idle()?;
        let tuples = self
            .store
            .list_committed(&self.relation)
            .await
            .map_err(|source| {
                tracing::error!(
                    relation = %self.relation.name(),
                    error = %source,
                    "failed to load committed tuples"
                );
                MappingError::Load {
                    relation: self.relation.name().to_string(),
                    source,
                }
            })?;

        let count = tuples.len();
        let mut inner = self.inner.lock();
        if inner.in_flight.is_some() {
            return Err(self.save_in_progress());
        }
        inner.rebase(tuples);
        tracing::debug!(
            relation = %self.relation.name(),
            count,
            pending = inner.pending.len(),
            "loaded committed tuples"
        );
        Ok(())
    }

    fn ensure_idle(&self) -> Result<(), MappingError<L, R>> {
        if self.inner.lock().in_flight.is_some() {
            return Err(self.save_in_progress());
        }
        Ok(())
    }

    fn save_in_progress(&self) -> MappingError<L, R> {
        MappingError::SaveInProgress {
            relation: self.relation.name().to_string(),
        }
    }

    pub fn committed(&self) -> Vec<RelationTuple<L, R>> {
        self.inner.lock().committed.tuples()
    }

    /// True when a failed refetch left the committed set patched locally.
    pub fn is_stale(&self) -> bool {
        self.inner.lock().stale
    }

    // ========================================================================
    // Staging
    // ========================================================================

    /// Flip the staged membership of `(left, right)`.
    ///
    /// Invalid ids are rejected and leave the pending set untouched.
    pub fn toggle(&self, left: L, right: R) -> Result<(), StagingError> {
        if let Err(err) = left.validate().and_then(|()| right.validate()) {
            tracing::warn!(
                relation = %self.relation.name(),
                left = %left,
                right = %right,
                error = %err,
                "rejected toggle"
            );
            return Err(err);
        }

        tracing::debug!(
            relation = %self.relation.name(),
            left = %left,
            right = %right,
            "toggle"
        );
        self.inner.lock().pending.toggle(left, right);
        Ok(())
    }

    /// Drop every staged toggle.
    pub fn discard(&self) {
        let mut inner = self.inner.lock();
        inner.pending.clear();
        inner.last_failures.clear();
    }

    pub fn is_effectively_member(&self, left: &L, right: &R) -> bool {
        self.inner.lock().is_effectively_member(left, right)
    }

    /// Right ids effectively associated with `left`.
    pub fn effective_rights(&self, left: &L) -> BTreeSet<R> {
        let inner = self.inner.lock();
        let mut candidates: BTreeSet<R> = inner
            .committed
            .by_left
            .get(left)
            .cloned()
            .unwrap_or_default();
        candidates.extend(inner.pending.for_left(left).cloned());
        if let Some(snapshot) = &inner.in_flight {
            candidates.extend(snapshot.for_left(left).cloned());
        }
        candidates.retain(|right| inner.is_effectively_member(left, right));
        candidates
    }

    pub fn has_unsaved_changes(&self) -> bool {
        let inner = self.inner.lock();
        !inner.pending.is_empty() || inner.in_flight.is_some()
    }

    pub fn pending(&self) -> PendingToggles<L, R> {
        self.inner.lock().pending.clone()
    }

    pub fn state(&self) -> EditorState {
        let inner = self.inner.lock();
        if inner.in_flight.is_some() {
            EditorState::Saving
        } else if inner.pending.is_empty() {
            EditorState::Clean
        } else if inner.last_failures.is_empty() {
            EditorState::Dirty
        } else {
            EditorState::DirtyWithErrors
        }
    }

    /// Failures of the most recent save.
    pub fn last_failures(&self) -> Vec<SaveFailure<L, R>> {
        self.inner.lock().last_failures.clone()
    }

    /// The writes a save would issue right now.
    pub fn plan(&self) -> SavePlan<L, R> {
        let inner = self.inner.lock();
        inner.plan(&inner.pending)
    }

    // ========================================================================
    // Save
    // ========================================================================

    /// Commit every staged toggle.
    ///
    /// The pending set is snapshotted when this is called; toggles made while
    /// the returned future runs land in a fresh set. The future only holds a
    /// weak reference to editor state, so it may be spawned and outlive the
    /// editor: writes still complete and the report is still returned, but
    /// nothing is written back.
    pub fn save(
        &self,
    ) -> impl Future<Output = Result<SaveReport<L, R>, MappingError<L, R>>> + Send + 'static {
        let inner = Arc::downgrade(&self.inner);
        let started = self.begin_save().map(|(snapshot, plan, stale)| {
            let guard = SaveGuard {
                inner: inner.clone(),
                relation: self.relation.name().to_string(),
                writes_started: false,
                armed: true,
            };
            (snapshot, plan, stale, guard)
        });
        let relation = self.relation.clone();
        let store = Arc::clone(&self.store);

        async move {
            let (mut snapshot, mut plan, stale, mut guard) = started?;
            // A stale committed set may already hold writes from an earlier,
            // interrupted save; plan against the store instead.
            if stale && !plan.is_empty() {
                match store.list_committed(&relation).await {
                    Ok(tuples) => {
                        if let Some(state) = inner.upgrade() {
                            let mut state = state.lock();
                            state.rebase(tuples);
                            if let Some(rebased) = &state.in_flight {
                                snapshot = rebased.clone();
                                plan = state.plan(&snapshot);
                            }
                        }
                    }
                    Err(err) => tracing::warn!(
                        relation = %relation.name(),
                        error = %err,
                        "could not refresh stale committed set; saving against local view"
                    ),
                }
            }
            guard.writes_started = !plan.is_empty();
            let report = execute(&relation, store.as_ref(), &plan).await;

            let refetched = if plan.is_empty() {
                None
            } else {
                Some(store.list_committed(&relation).await)
            };

            let refetch_error = finish_save(&relation, &inner, snapshot, &report, refetched);
            guard.armed = false;
            tracing::info!(
                relation = %relation.name(),
                inserted = report.inserted.len(),
                deleted = report.deleted.len(),
                failed = report.failures.len(),
                "save finished"
            );

            match refetch_error {
                Some(source) => Err(MappingError::Refetch {
                    relation: relation.name().to_string(),
                    source,
                    report,
                }),
                None => Ok(report),
            }
        }
    }

    #[allow(clippy::type_complexity)]
    fn begin_save(
        &self,
    ) -> Result<(PendingToggles<L, R>, SavePlan<L, R>, bool), MappingError<L, R>> {
        let mut inner = self.inner.lock();
        if inner.in_flight.is_some() {
            return Err(self.save_in_progress());
        }
        let snapshot = std::mem::take(&mut inner.pending);
        let plan = inner.plan(&snapshot);
        tracing::debug!(
            relation = %self.relation.name(),
            deletes = plan.deletes.len(),
            inserts = plan.inserts.len(),
            "save started"
        );
        inner.in_flight = Some(snapshot.clone());
        Ok((snapshot, plan, inner.stale))
    }
}

/// Restores the in-flight snapshot if a save future is dropped before it
/// finishes, so the editor never stays stuck in `Saving`.
struct SaveGuard<L: EntityId, R: EntityId> {
    inner: Weak<Mutex<EditorInner<L, R>>>,
    relation: String,
    writes_started: bool,
    armed: bool,
}

impl<L: EntityId, R: EntityId> Drop for SaveGuard<L, R> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let mut inner = inner.lock();
        let Some(snapshot) = inner.in_flight.take() else {
            return;
        };
        for (left, right) in snapshot.iter() {
            inner.pending.toggle(left.clone(), right.clone());
        }
        if self.writes_started {
            inner.stale = true;
        }
        tracing::warn!(
            relation = %self.relation,
            restored = snapshot.len(),
            writes_started = self.writes_started,
            "save dropped before finishing; staged toggles restored"
        );
    }
}

/// Issue every planned write; one failure never stops the rest.
async fn execute<L: EntityId, R: EntityId>(
    relation: &Relation<L, R>,
    store: &dyn RelationStore<L, R>,
    plan: &SavePlan<L, R>,
) -> SaveReport<L, R> {
    let mut report = SaveReport::empty(relation.name());
    for (op, tuple) in plan.writes() {
        let result = match op {
            WriteOp::Insert => store.insert(relation, &tuple.left, &tuple.right).await,
            WriteOp::Delete => store.delete(relation, &tuple.left, &tuple.right).await,
        };
        match result {
            Ok(()) => match op {
                WriteOp::Insert => report.inserted.push(tuple.clone()),
                WriteOp::Delete => report.deleted.push(tuple.clone()),
            },
            Err(err) => {
                tracing::warn!(
                    relation = %relation.name(),
                    left = %tuple.left,
                    right = %tuple.right,
                    op = %op,
                    error = %err,
                    "write failed"
                );
                report.failures.push(SaveFailure {
                    left: tuple.left.clone(),
                    right: tuple.right.clone(),
                    op,
                    error: err.to_string(),
                });
            }
        }
    }
    report.finished_at = Utc::now();
    report
}

/// Fold the save's outcome back into editor state, if the editor still exists.
///
/// Returns the refetch error, if any.
fn finish_save<L: EntityId, R: EntityId>(
    relation: &Relation<L, R>,
    inner: &Weak<Mutex<EditorInner<L, R>>>,
    snapshot: PendingToggles<L, R>,
    report: &SaveReport<L, R>,
    refetched: Option<Result<Vec<RelationTuple<L, R>>, StoreError>>,
) -> Option<StoreError> {
    let Some(inner) = inner.upgrade() else {
        tracing::debug!(relation = %relation.name(), "editor dropped before save finished");
        return refetched.and_then(Result::err);
    };
    let mut inner = inner.lock();

    // What the user wanted each touched pair to be, judged against the
    // committed set the save started from.
    let mut desired: BTreeMap<(L, R), bool> = BTreeMap::new();
    for failure in &report.failures {
        desired.insert(
            (failure.left.clone(), failure.right.clone()),
            failure.op.target_membership(),
        );
    }
    for (left, right) in inner.pending.iter() {
        let saw = inner.committed.contains(left, right) ^ snapshot.contains(left, right);
        desired.insert((left.clone(), right.clone()), !saw);
    }

    let mut refetch_error = None;
    match refetched {
        None => {}
        Some(Ok(tuples)) => {
            inner.committed = Committed::from_tuples(tuples);
            inner.stale = false;
        }
        Some(Err(err)) => {
            tracing::error!(
                relation = %relation.name(),
                error = %err,
                "refetch after save failed; committed set patched locally"
            );
            for tuple in &report.inserted {
                inner.committed.set(tuple.left.clone(), tuple.right.clone(), true);
            }
            for tuple in &report.deleted {
                inner.committed.set(tuple.left.clone(), tuple.right.clone(), false);
            }
            inner.stale = true;
            refetch_error = Some(err);
        }
    }

    // Pending holds exactly the pairs whose desired state differs from the
    // committed set as it stands now.
    let mut pending = PendingToggles::new();
    for ((left, right), want) in desired {
        if inner.committed.contains(&left, &right) != want {
            pending.set(left, right, true);
        }
    }
    inner.pending = pending;
    inner.in_flight = None;
    inner.last_failures = report.failures.clone();
    refetch_error
}

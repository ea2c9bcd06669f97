//! Worktree relations
//!
//! A worktree is associated with the apps, CLI pipelines and shared services
//! it touches. Each association is its own join table; [`WorktreeMappings`]
//! edits all three as one view with a single save.

use crate::editor::MappingEditor;
use crate::error::MappingError;
use crate::ids::{AppName, PipelineId, ServiceId, WorktreeId};
use crate::relation::Relation;
use crate::report::SaveReport;
use crate::store::RelationStore;
use std::sync::Arc;

pub const WORKTREE_APPS_TABLE: &str = "worktree_app_mappings";
pub const WORKTREE_PIPELINES_TABLE: &str = "worktree_pipeline_mappings";
pub const WORKTREE_SERVICES_TABLE: &str = "worktree_service_mappings";

pub fn worktree_apps() -> Relation<WorktreeId, AppName> {
    Relation::unchecked(
        WORKTREE_APPS_TABLE.to_string(),
        "worktree_id".to_string(),
        "app_name".to_string(),
    )
}

pub fn worktree_pipelines() -> Relation<WorktreeId, PipelineId> {
    Relation::unchecked(
        WORKTREE_PIPELINES_TABLE.to_string(),
        "worktree_id".to_string(),
        "pipeline_id".to_string(),
    )
}

pub fn worktree_services() -> Relation<WorktreeId, ServiceId> {
    Relation::unchecked(
        WORKTREE_SERVICES_TABLE.to_string(),
        "worktree_id".to_string(),
        "service_id".to_string(),
    )
}

#[derive(Debug, thiserror::Error)]
pub enum WorktreeError {
    #[error(transparent)]
    Apps(#[from] MappingError<WorktreeId, AppName>),
    #[error(transparent)]
    Pipelines(#[from] MappingError<WorktreeId, PipelineId>),
    #[error(transparent)]
    Services(#[from] MappingError<WorktreeId, ServiceId>),
}

pub type SaveOutcome<R> = Result<SaveReport<WorktreeId, R>, MappingError<WorktreeId, R>>;

/// Result of [`WorktreeMappings::save_all`]. `None` means the relation had
/// nothing staged and was not touched.
#[derive(Debug, Default)]
pub struct WorktreeSaveReport {
    pub apps: Option<SaveOutcome<AppName>>,
    pub pipelines: Option<SaveOutcome<PipelineId>>,
    pub services: Option<SaveOutcome<ServiceId>>,
}

impl WorktreeSaveReport {
    /// True when every saved relation persisted every tuple and refetched cleanly.
    pub fn is_success(&self) -> bool {
        fn ok<R: crate::EntityId>(outcome: &Option<SaveOutcome<R>>) -> bool {
            match outcome {
                None => true,
                Some(Ok(report)) => report.is_success(),
                Some(Err(_)) => false,
            }
        }
        ok(&self.apps) && ok(&self.pipelines) && ok(&self.services)
    }

    /// Total failed tuples across relations, including those carried by refetch errors.
    pub fn failure_count(&self) -> usize {
        fn count<R: crate::EntityId>(outcome: &Option<SaveOutcome<R>>) -> usize {
            match outcome {
                None => 0,
                Some(Ok(report)) => report.failures.len(),
                Some(Err(err)) => err.report().map_or(0, |r| r.failures.len()),
            }
        }
        count(&self.apps) + count(&self.pipelines) + count(&self.services)
    }
}

/// App, pipeline and service mappings of every worktree, over one store.
#[derive(Clone)]
pub struct WorktreeMappings {
    apps: MappingEditor<WorktreeId, AppName>,
    pipelines: MappingEditor<WorktreeId, PipelineId>,
    services: MappingEditor<WorktreeId, ServiceId>,
}

impl WorktreeMappings {
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: RelationStore<WorktreeId, AppName>
            + RelationStore<WorktreeId, PipelineId>
            + RelationStore<WorktreeId, ServiceId>
            + 'static,
    {
        let apps: Arc<dyn RelationStore<WorktreeId, AppName>> = store.clone();
        let pipelines: Arc<dyn RelationStore<WorktreeId, PipelineId>> = store.clone();
        let services: Arc<dyn RelationStore<WorktreeId, ServiceId>> = store;
        Self {
            apps: MappingEditor::new(worktree_apps(), apps),
            pipelines: MappingEditor::new(worktree_pipelines(), pipelines),
            services: MappingEditor::new(worktree_services(), services),
        }
    }

    pub fn apps(&self) -> &MappingEditor<WorktreeId, AppName> {
        &self.apps
    }

    pub fn pipelines(&self) -> &MappingEditor<WorktreeId, PipelineId> {
        &self.pipelines
    }

    pub fn services(&self) -> &MappingEditor<WorktreeId, ServiceId> {
        &self.services
    }

    pub async fn load_all(&self) -> Result<(), WorktreeError> {
        self.apps.load().await?;
        self.pipelines.load().await?;
        self.services.load().await?;
        Ok(())
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.apps.has_unsaved_changes()
            || self.pipelines.has_unsaved_changes()
            || self.services.has_unsaved_changes()
    }

    /// Save every relation with staged toggles. One relation failing never
    /// stops the others.
    pub async fn save_all(&self) -> WorktreeSaveReport {
        let mut report = WorktreeSaveReport::default();
        if self.apps.has_unsaved_changes() {
            report.apps = Some(self.apps.save().await);
        }
        if self.pipelines.has_unsaved_changes() {
            report.pipelines = Some(self.pipelines.save().await);
        }
        if self.services.has_unsaved_changes() {
            report.services = Some(self.services.save().await);
        }
        tracing::info!(
            success = report.is_success(),
            failures = report.failure_count(),
            "worktree mappings saved"
        );
        report
    }

    pub fn discard_all(&self) {
        self.apps.discard();
        self.pipelines.discard();
        self.services.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::is_sql_identifier;

    #[test]
    fn test_catalog_names_are_identifiers() {
        let names = [
            (worktree_apps().name().to_string(), worktree_apps().right_column().to_string()),
            (
                worktree_pipelines().name().to_string(),
                worktree_pipelines().right_column().to_string(),
            ),
            (
                worktree_services().name().to_string(),
                worktree_services().right_column().to_string(),
            ),
        ];
        for (table, column) in names {
            assert!(is_sql_identifier(&table), "{table}");
            assert!(is_sql_identifier(&column), "{column}");
        }
        assert!(is_sql_identifier(worktree_apps().left_column()));
    }
}

//! Detour Subsystem (C8): mid-execution plan amendment with a persisted
//! status machine and dependency validation, mirroring the Blocker
//! subsystem's store-backed lifecycle (see DESIGN.md open question).

use crate::store::Store;
use chrono::Utc;
use geoffrussy_common::{Detour, DetourStatus, Task, TaskStatus};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DetourError {
    #[error("detour {id} is in status {actual:?}, expected {expected:?}")]
    WrongStatus {
        id: String,
        actual: DetourStatus,
        expected: DetourStatus,
    },
    #[error("detour {id} has incomplete tasks, cannot complete")]
    TasksIncomplete { id: String },
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub async fn request_detour(
    store: &Store,
    project_id: &str,
    phase_id: &str,
    task_id: &str,
    description: &str,
    reason: &str,
) -> Result<Detour, DetourError> {
    let detour = Detour {
        id: format!("detour-{}", Uuid::new_v4()),
        project_id: project_id.to_string(),
        phase_id: phase_id.to_string(),
        task_id: task_id.to_string(),
        description: description.to_string(),
        reason: reason.to_string(),
        new_task_ids: Vec::new(),
        status: DetourStatus::Pending,
        created_at: Utc::now(),
        completed_at: None,
    };
    store.save_detour(&detour).await?;
    Ok(detour)
}

fn require_status(detour: &Detour, expected: DetourStatus) -> Result<(), DetourError> {
    if detour.status != expected {
        return Err(DetourError::WrongStatus {
            id: detour.id.clone(),
            actual: detour.status,
            expected,
        });
    }
    Ok(())
}

/// Requires `pending`; transitions via `gathering` to `planned` once the
/// interview engine (external) has filled in context. The intermediate
/// `gathering` state is persisted so a crash mid-gather resumes correctly.
pub async fn gather_detour_information(store: &Store, detour_id: &str) -> Result<Detour, DetourError> {
    let mut detour = store.get_detour(detour_id).await?;
    require_status(&detour, DetourStatus::Pending)?;
    detour.status = DetourStatus::Gathering;
    store.save_detour(&detour).await?;

    detour.status = DetourStatus::Planned;
    store.save_detour(&detour).await?;
    Ok(detour)
}

/// Requires `planned`; materializes `new_task_ids`, inserts them after
/// `insert_after_task_id`, revalidates dependencies, transitions to
/// `active`.
pub async fn update_dev_plan(
    store: &Store,
    detour_id: &str,
    insert_after_task_id: &str,
    new_tasks: Vec<Task>,
) -> Result<Detour, DetourError> {
    let mut detour = store.get_detour(detour_id).await?;
    require_status(&detour, DetourStatus::Planned)?;

    let phase = store.get_phase(&detour.phase_id).await?;
    let existing = store.list_tasks_for_phase(&phase.id).await?;
    let (ok, conflicts) = validate_detour_dependencies(&new_tasks, &existing);
    if !ok {
        return Err(DetourError::Store(anyhow::anyhow!(
            "dependency validation failed for tasks: {conflicts:?}"
        )));
    }

    let _ = insert_after_task_id; // ordering is carried in each task's `number`
    for task in &new_tasks {
        store.save_task(task).await?;
    }

    detour.new_task_ids = new_tasks.iter().map(|t| t.id.clone()).collect();
    detour.status = DetourStatus::Active;
    store.save_detour(&detour).await?;
    Ok(detour)
}

/// Conflicts are task ids whose dependencies would reference a removed
/// task. This spine does not model an explicit dependency graph on `Task`
/// beyond phase-order, so the only structural conflict it can detect is a
/// duplicate id collision with the existing plan.
pub fn validate_detour_dependencies(new_tasks: &[Task], existing: &[Task]) -> (bool, Vec<String>) {
    let existing_ids: HashSet<&str> = existing.iter().map(|t| t.id.as_str()).collect();
    let conflicts: Vec<String> = new_tasks
        .iter()
        .filter(|t| existing_ids.contains(t.id.as_str()))
        .map(|t| t.id.clone())
        .collect();
    (conflicts.is_empty(), conflicts)
}

/// Requires all detour tasks `completed`; transitions to `completed`.
pub async fn complete_detour(store: &Store, detour_id: &str) -> Result<Detour, DetourError> {
    let mut detour = store.get_detour(detour_id).await?;
    require_status(&detour, DetourStatus::Active)?;

    for task_id in &detour.new_task_ids {
        let task = store.get_task(task_id).await?;
        if task.status != TaskStatus::Completed {
            return Err(DetourError::TasksIncomplete { id: detour.id.clone() });
        }
    }

    detour.status = DetourStatus::Completed;
    detour.completed_at = Some(Utc::now());
    store.save_detour(&detour).await?;
    Ok(detour)
}

pub async fn cancel_detour(store: &Store, detour_id: &str) -> Result<Detour, DetourError> {
    let mut detour = store.get_detour(detour_id).await?;
    if matches!(detour.status, DetourStatus::Completed | DetourStatus::Cancelled) {
        return Err(DetourError::WrongStatus {
            id: detour.id.clone(),
            actual: detour.status,
            expected: DetourStatus::Active,
        });
    }
    detour.status = DetourStatus::Cancelled;
    store.save_detour(&detour).await?;
    Ok(detour)
}

pub async fn export_detour_markdown(store: &Store, detour_id: &str) -> Result<String, DetourError> {
    let detour = store.get_detour(detour_id).await?;
    let mut out = String::new();
    out.push_str(&format!("# Detour {}\n\n", detour.id));
    out.push_str(&format!("**Status**: {:?}\n\n", detour.status));
    out.push_str(&format!("## Description\n\n{}\n\n", detour.description));
    out.push_str(&format!("## Reason\n\n{}\n\n", detour.reason));
    out.push_str("## Tasks\n\n");
    for task_id in &detour.new_task_ids {
        let task = store.get_task(task_id).await?;
        out.push_str(&format!("- [{}] {}: {}\n", task.number, task.id, task.description));
    }
    Ok(out)
}

//! Progress Calculator (C2): derives phase/task counts, completion
//! percentage, and an ETA from the store in a single pass.

use crate::store::Store;
use chrono::Utc;
use geoffrussy_common::{PhaseStatus, TaskStatus};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct PhaseProgress {
    pub phase_id: String,
    pub number: i64,
    pub title: String,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub blocked_tasks: u32,
    pub skipped_tasks: u32,
    pub in_progress_tasks: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressStats {
    pub total_phases: u32,
    pub completed_phases: u32,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub completion_percentage: f64,
    pub estimated_remaining: Option<Duration>,
    pub phases: Vec<PhaseProgress>,
}

pub struct ProgressFilter {
    pub phase_id: Option<String>,
    pub phase_numbers: Option<Vec<i64>>,
    pub statuses: Option<Vec<TaskStatus>>,
}

pub async fn get_progress(store: &Store, project_id: &str) -> anyhow::Result<ProgressStats> {
    let phases = store.list_phases(project_id).await?;
    let tasks_by_phase = store.list_tasks_for_project(project_id).await?;

    let mut phase_progress = Vec::with_capacity(phases.len());
    let mut total_tasks = 0u32;
    let mut completed_tasks = 0u32;
    let mut completed_phases = 0u32;
    let mut earliest_started = None;

    for phase in &phases {
        if phase.status == PhaseStatus::Completed {
            completed_phases += 1;
        }
        if let Some(started) = phase.started_at {
            earliest_started = Some(earliest_started.map_or(started, |e: chrono::DateTime<Utc>| e.min(started)));
        }

        let empty = Vec::new();
        let tasks = tasks_by_phase.get(&phase.id).unwrap_or(&empty);
        let mut pp = PhaseProgress {
            phase_id: phase.id.clone(),
            number: phase.number,
            title: phase.title.clone(),
            ..Default::default()
        };
        for task in tasks {
            pp.total_tasks += 1;
            match task.status {
                TaskStatus::Completed => pp.completed_tasks += 1,
                TaskStatus::Blocked => pp.blocked_tasks += 1,
                TaskStatus::Skipped => pp.skipped_tasks += 1,
                TaskStatus::InProgress => pp.in_progress_tasks += 1,
                TaskStatus::NotStarted => {}
            }
        }
        total_tasks += pp.total_tasks;
        completed_tasks += pp.completed_tasks;
        phase_progress.push(pp);
    }

    let completion_percentage = completed_tasks as f64 / (total_tasks.max(1)) as f64 * 100.0;

    let estimated_remaining = if completed_tasks > 0 {
        earliest_started.map(|started| {
            let elapsed = (Utc::now() - started).to_std().unwrap_or_default();
            let remaining = (total_tasks - completed_tasks) as f64 / completed_tasks as f64;
            Duration::from_secs_f64(elapsed.as_secs_f64() * remaining)
        })
    } else {
        None
    };

    Ok(ProgressStats {
        total_phases: phases.len() as u32,
        completed_phases,
        total_tasks,
        completed_tasks,
        completion_percentage,
        estimated_remaining,
        phases: phase_progress,
    })
}

pub async fn get_phase_progress(store: &Store, phase_id: &str) -> anyhow::Result<PhaseProgress> {
    let phase = store.get_phase(phase_id).await?;
    let tasks = store.list_tasks_for_phase(phase_id).await?;
    let mut pp = PhaseProgress {
        phase_id: phase.id.clone(),
        number: phase.number,
        title: phase.title.clone(),
        ..Default::default()
    };
    for task in &tasks {
        pp.total_tasks += 1;
        match task.status {
            TaskStatus::Completed => pp.completed_tasks += 1,
            TaskStatus::Blocked => pp.blocked_tasks += 1,
            TaskStatus::Skipped => pp.skipped_tasks += 1,
            TaskStatus::InProgress => pp.in_progress_tasks += 1,
            TaskStatus::NotStarted => {}
        }
    }
    Ok(pp)
}

pub async fn list_all_phase_progress(store: &Store, project_id: &str) -> anyhow::Result<Vec<PhaseProgress>> {
    Ok(get_progress(store, project_id).await?.phases)
}

/// Applies `filter` at both the phase level (id, number set) and the task
/// level (status set) before aggregating, so a `statuses` filter actually
/// narrows which tasks count toward the totals.
pub async fn get_filtered_progress(
    store: &Store,
    project_id: &str,
    filter: &ProgressFilter,
) -> anyhow::Result<ProgressStats> {
    let phases = store.list_phases(project_id).await?;
    let tasks_by_phase = store.list_tasks_for_project(project_id).await?;

    let mut phase_progress = Vec::new();
    let mut total_tasks = 0u32;
    let mut completed_tasks = 0u32;
    let mut completed_phases = 0u32;

    for phase in &phases {
        if let Some(phase_id) = &filter.phase_id {
            if &phase.id != phase_id {
                continue;
            }
        }
        if let Some(numbers) = &filter.phase_numbers {
            if !numbers.contains(&phase.number) {
                continue;
            }
        }

        let empty = Vec::new();
        let tasks = tasks_by_phase.get(&phase.id).unwrap_or(&empty);
        let mut pp = PhaseProgress {
            phase_id: phase.id.clone(),
            number: phase.number,
            title: phase.title.clone(),
            ..Default::default()
        };
        for task in tasks.iter() {
            if let Some(statuses) = &filter.statuses {
                if !statuses.contains(&task.status) {
                    continue;
                }
            }
            pp.total_tasks += 1;
            match task.status {
                TaskStatus::Completed => pp.completed_tasks += 1,
                TaskStatus::Blocked => pp.blocked_tasks += 1,
                TaskStatus::Skipped => pp.skipped_tasks += 1,
                TaskStatus::InProgress => pp.in_progress_tasks += 1,
                TaskStatus::NotStarted => {}
            }
        }

        if phase.status == PhaseStatus::Completed {
            completed_phases += 1;
        }
        total_tasks += pp.total_tasks;
        completed_tasks += pp.completed_tasks;
        phase_progress.push(pp);
    }

    let completion_percentage = completed_tasks as f64 / (total_tasks.max(1)) as f64 * 100.0;

    Ok(ProgressStats {
        total_phases: phase_progress.len() as u32,
        completed_phases,
        total_tasks,
        completed_tasks,
        completion_percentage,
        estimated_remaining: None,
        phases: phase_progress,
    })
}

#[allow(dead_code)]
fn group_by_phase<'a>(tasks: &'a [geoffrussy_common::Task]) -> HashMap<String, Vec<&'a geoffrussy_common::Task>> {
    let mut out: HashMap<String, Vec<&geoffrussy_common::Task>> = HashMap::new();
    for t in tasks {
        out.entry(t.phase_id.clone()).or_default().push(t);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use chrono::Utc;
    use geoffrussy_common::{Phase, PhaseStatus, Project, ProjectStage, Task, TaskStatus};

    async fn seeded_store() -> Store {
        let store = Store::open_in_memory().await.unwrap();
        store
            .save_project(&Project {
                id: "proj-1".into(),
                name: "demo".into(),
                created_at: Utc::now(),
                current_stage: ProjectStage::Develop,
                current_phase_id: None,
            })
            .await
            .unwrap();
        store
            .save_phase(&Phase {
                id: "phase-1".into(),
                project_id: "proj-1".into(),
                number: 1,
                title: "Phase one".into(),
                content: String::new(),
                status: PhaseStatus::InProgress,
                created_at: Utc::now(),
                started_at: Some(Utc::now()),
                completed_at: None,
            })
            .await
            .unwrap();
        for (id, num, status) in [
            ("task-1", "1.1", TaskStatus::Completed),
            ("task-2", "1.2", TaskStatus::NotStarted),
        ] {
            store
                .save_task(&Task {
                    id: id.into(),
                    phase_id: "phase-1".into(),
                    number: num.into(),
                    description: "x".into(),
                    status,
                    started_at: None,
                    completed_at: None,
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn progress_computes_completion_percentage_without_n_plus_1() {
        let store = seeded_store().await;
        let stats = get_progress(&store, "proj-1").await.unwrap();
        assert_eq!(stats.total_tasks, 2);
        assert_eq!(stats.completed_tasks, 1);
        assert!((stats.completion_percentage - 50.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn phase_progress_matches_project_level_breakdown() {
        let store = seeded_store().await;
        let pp = get_phase_progress(&store, "phase-1").await.unwrap();
        assert_eq!(pp.total_tasks, 2);
        assert_eq!(pp.completed_tasks, 1);
    }

    #[tokio::test]
    async fn filtered_progress_narrows_by_status() {
        let store = seeded_store().await;
        let filter = ProgressFilter {
            phase_id: None,
            phase_numbers: None,
            statuses: Some(vec![TaskStatus::Completed]),
        };
        let stats = get_filtered_progress(&store, "proj-1", &filter).await.unwrap();
        assert_eq!(stats.total_tasks, 1);
        assert_eq!(stats.completed_tasks, 1);
        assert_eq!(stats.phases[0].total_tasks, 1);
    }

    #[tokio::test]
    async fn filtered_progress_narrows_by_phase_number() {
        let store = seeded_store().await;
        let filter = ProgressFilter {
            phase_id: None,
            phase_numbers: Some(vec![99]),
            statuses: None,
        };
        let stats = get_filtered_progress(&store, "proj-1", &filter).await.unwrap();
        assert!(stats.phases.is_empty());
        assert_eq!(stats.total_tasks, 0);
    }
}

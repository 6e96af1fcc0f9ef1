//! Blocker Subsystem (C6): consecutive-failure tracking, marking,
//! resolution-strategy selection, and pattern analysis.

use crate::recovery::{execute_with_recovery, RecoveryStrategy};
use crate::store::Store;
use chrono::Utc;
use dashmap::DashMap;
use geoffrussy_common::{Blocker, TaskStatus};
use std::collections::HashMap;
use std::future::Future;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone)]
pub struct ResolutionStrategyEntry {
    pub name: &'static str,
    pub description: &'static str,
    pub automatic: bool,
}

pub fn strategy_catalog() -> Vec<ResolutionStrategyEntry> {
    vec![
        ResolutionStrategyEntry {
            name: "Retry with backoff",
            description: "re-attempt the task under the default recovery strategy",
            automatic: true,
        },
        ResolutionStrategyEntry {
            name: "Skip and continue",
            description: "mark the task skipped and proceed to the next one",
            automatic: false,
        },
        ResolutionStrategyEntry {
            name: "Request user intervention",
            description: "surface the blocker to an operator for manual resolution",
            automatic: false,
        },
    ]
}

#[derive(Debug, Clone)]
pub struct ResolutionResult {
    pub blocker_id: String,
    pub strategies: Vec<ResolutionStrategyEntry>,
    pub attempted_strategies: Vec<String>,
    pub success: bool,
    pub resolution: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct BlockerPattern {
    pub total_blockers: usize,
    pub blockers_by_task: HashMap<String, usize>,
    pub common_descriptions: HashMap<String, usize>,
}

/// Ephemeral: counts are an implementation detail of one execution session.
/// Rebuilding after a restart begins at zero, which is safe because a
/// pre-existing unresolved Blocker row still gates the task.
pub struct BlockerTracker {
    failure_tracker: DashMap<String, u32>,
    failure_threshold: u32,
}

impl BlockerTracker {
    pub fn new(failure_threshold: u32) -> Self {
        Self {
            failure_tracker: DashMap::new(),
            failure_threshold,
        }
    }

    /// Returns `should_block = count >= threshold`.
    pub fn record_failure(&self, task_id: &str, _err_msg: &str) -> bool {
        let mut count = self.failure_tracker.entry(task_id.to_string()).or_insert(0);
        *count += 1;
        *count >= self.failure_threshold
    }

    pub fn reset(&self, task_id: &str) {
        self.failure_tracker.remove(task_id);
    }

    pub fn failure_count(&self, task_id: &str) -> u32 {
        self.failure_tracker.get(task_id).map(|c| *c).unwrap_or(0)
    }
}

impl Default for BlockerTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD)
    }
}

pub async fn mark_as_blocked(
    store: &Store,
    task_id: &str,
    reason: &str,
    context: &str,
) -> anyhow::Result<Blocker> {
    let unix_ns = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
    let blocker = Blocker {
        id: format!("blocker-{task_id}-{unix_ns}"),
        task_id: task_id.to_string(),
        description: format!("{reason}. Context: {context}"),
        resolution: None,
        created_at: Utc::now(),
        resolved_at: None,
    };
    store.save_blocker(&blocker).await?;
    store.update_task_status(task_id, TaskStatus::Blocked).await?;
    Ok(blocker)
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GatheredInformation {
    pub blocker_id: String,
    pub task_id: String,
    pub description: String,
    pub gathered_at: chrono::DateTime<Utc>,
}

/// In an enriched implementation this would invoke the interview engine for
/// clarifying questions; here it returns the minimal shape §4.6 specifies.
pub async fn gather_blocker_information(store: &Store, blocker_id: &str) -> anyhow::Result<GatheredInformation> {
    let blocker = store.get_blocker(blocker_id).await?;
    Ok(GatheredInformation {
        blocker_id: blocker.id,
        task_id: blocker.task_id,
        description: blocker.description,
        gathered_at: Utc::now(),
    })
}

/// Drives each automatic strategy against `retry_op` in catalog order,
/// stopping at the first one that succeeds. Manual strategies are never
/// executed here; they're returned in `strategies` for an operator to act
/// on when every automatic attempt fails.
pub async fn attempt_resolution<F, Fut, T>(blocker_id: &str, mut retry_op: F) -> ResolutionResult
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let strategies = strategy_catalog();
    let mut attempted = Vec::new();
    let mut success = false;
    let mut resolution = None;

    for entry in strategies.iter().filter(|s| s.automatic) {
        attempted.push(entry.name.to_string());
        let outcome = execute_with_recovery(
            &RecoveryStrategy::default_strategy(),
            &mut retry_op,
            |_, _| {},
            |_| {},
        )
        .await;
        if outcome.is_ok() {
            success = true;
            resolution = Some(entry.name.to_string());
            break;
        }
    }

    ResolutionResult {
        blocker_id: blocker_id.to_string(),
        strategies,
        attempted_strategies: attempted,
        success,
        resolution,
    }
}

pub async fn resolve_blocker(
    store: &Store,
    tracker: &BlockerTracker,
    blocker_id: &str,
    resolution: &str,
) -> anyhow::Result<()> {
    let mut blocker = store.get_blocker(blocker_id).await?;
    blocker.resolution = Some(resolution.to_string());
    blocker.resolved_at = Some(Utc::now());
    store.save_blocker(&blocker).await?;
    tracker.reset(&blocker.task_id);
    store.update_task_status(&blocker.task_id, TaskStatus::NotStarted).await?;
    Ok(())
}

pub async fn analyze_blocker_pattern(store: &Store, project_id: Option<&str>) -> anyhow::Result<BlockerPattern> {
    let active = store.list_active_blockers(project_id).await?;
    let mut by_task = HashMap::new();
    let mut by_description = HashMap::new();
    for b in &active {
        *by_task.entry(b.task_id.clone()).or_insert(0) += 1;
        *by_description.entry(b.description.clone()).or_insert(0) += 1;
    }
    Ok(BlockerPattern {
        total_blockers: active.len(),
        blockers_by_task: by_task,
        common_descriptions: by_description,
    })
}

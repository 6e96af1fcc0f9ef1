//! Execution Engine (C7): drives a phase, iterating its tasks, streaming
//! updates, honoring pause/skip/cancel, and delegating actual task work to
//! an external `TaskExecutor`. Phases run strictly sequentially (§5
//! ordering guarantees); the update channel uses `try_send` with
//! drop-on-full, so the update stream is best-effort, not a delivery
//! guarantee.

pub mod executor;

use crate::blockers::{self, mark_as_blocked, BlockerTracker};
use crate::quota;
use crate::recovery::{execute_with_recovery, RecoveryStrategy};
use crate::store::Store;
use crate::tokens;
use chrono::{DateTime, Utc};
use executor::TaskExecutor;
use geoffrussy_common::{PhaseStatus, TaskStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{info, instrument, warn};

pub const UPDATE_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskUpdateType {
    Started,
    Progress,
    Completed,
    Error,
    Blocked,
    Paused,
    Resumed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub task_id: String,
    pub phase_id: String,
    pub update_type: TaskUpdateType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("execution cancelled")]
    Cancelled,
    #[error("already paused")]
    AlreadyPaused,
    #[error("not paused")]
    NotPaused,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

struct PauseState {
    paused: RwLock<bool>,
    notify: Notify,
}

pub struct ExecutionEngine {
    store: Arc<Store>,
    executor: Arc<dyn TaskExecutor>,
    blockers: Arc<BlockerTracker>,
    provider_name: String,
    pause: PauseState,
    cancelled: AtomicBool,
    updates: Mutex<Option<mpsc::Sender<TaskUpdate>>>,
}

impl ExecutionEngine {
    pub fn new(
        store: Arc<Store>,
        executor: Arc<dyn TaskExecutor>,
        blockers: Arc<BlockerTracker>,
        provider_name: impl Into<String>,
    ) -> (Self, mpsc::Receiver<TaskUpdate>) {
        let (tx, rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let engine = Self {
            store,
            executor,
            blockers,
            provider_name: provider_name.into(),
            pause: PauseState {
                paused: RwLock::new(false),
                notify: Notify::new(),
            },
            cancelled: AtomicBool::new(false),
            updates: Mutex::new(Some(tx)),
        };
        (engine, rx)
    }

    fn emit(&self, update: TaskUpdate) {
        let guard = self.updates.lock().unwrap();
        match guard.as_ref() {
            Some(tx) if tx.try_send(update).is_ok() => {}
            Some(_) => warn!("update channel full, dropping update"),
            None => {}
        }
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        let mut paused = self.pause.paused.write().await;
        if *paused {
            return Err(EngineError::AlreadyPaused);
        }
        *paused = true;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), EngineError> {
        let mut paused = self.pause.paused.write().await;
        if !*paused {
            return Err(EngineError::NotPaused);
        }
        *paused = false;
        self.pause.notify.notify_waiters();
        Ok(())
    }

    /// Blocks until resumed if currently paused. Checked at the next task
    /// boundary or from an explicit caller.
    async fn check_pause(&self) {
        loop {
            if !*self.pause.paused.read().await {
                return;
            }
            self.pause.notify.notified().await;
        }
    }

    fn check_cancel(&self) -> Result<(), EngineError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(EngineError::Cancelled);
        }
        Ok(())
    }

    pub async fn skip_task(&self, task_id: &str, phase_id: &str) -> anyhow::Result<()> {
        self.store.update_task_status(task_id, TaskStatus::Skipped).await?;
        self.emit(TaskUpdate {
            task_id: task_id.to_string(),
            phase_id: phase_id.to_string(),
            update_type: TaskUpdateType::Skipped,
            content: "task skipped".to_string(),
            timestamp: Utc::now(),
            error: None,
        });
        Ok(())
    }

    pub async fn mark_blocked(&self, task_id: &str, phase_id: &str, reason: &str) -> anyhow::Result<()> {
        mark_as_blocked(&self.store, task_id, reason, "").await?;
        self.emit(TaskUpdate {
            task_id: task_id.to_string(),
            phase_id: phase_id.to_string(),
            update_type: TaskUpdateType::Blocked,
            content: reason.to_string(),
            timestamp: Utc::now(),
            error: None,
        });
        Ok(())
    }

    /// Fires cancellation and drops the update channel's sender, closing it
    /// for the reader immediately — a caller doesn't additionally need to
    /// drop the engine itself to unblock a pending `recv()`.
    pub fn close(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.updates.lock().unwrap().take();
    }

    #[instrument(skip(self))]
    pub async fn execute_task(&self, project_id: &str, task_id: &str) -> Result<(), EngineError> {
        self.check_pause().await;
        self.check_cancel()?;

        let mut task = self.store.get_task(task_id).await.map_err(|e| EngineError::Other(e.into()))?;
        let phase = self.store.get_phase(&task.phase_id).await.map_err(|e| EngineError::Other(e.into()))?;

        self.store
            .update_task_status(task_id, TaskStatus::InProgress)
            .await
            .map_err(|e| EngineError::Other(e.into()))?;
        self.emit(TaskUpdate {
            task_id: task_id.to_string(),
            phase_id: task.phase_id.clone(),
            update_type: TaskUpdateType::Started,
            content: task.description.clone(),
            timestamp: Utc::now(),
            error: None,
        });

        task.status = TaskStatus::InProgress;

        let (should_delay, delay) = quota::should_delay_request(&self.store, &self.provider_name)
            .await
            .map_err(EngineError::Other)?;
        if should_delay {
            if let Some(delay) = delay {
                warn!(?delay, provider = %self.provider_name, "delaying outbound call per quota monitor");
                tokio::time::sleep(delay).await;
            }
        }

        let outcome = execute_with_recovery(
            &RecoveryStrategy::api(),
            || self.executor.execute(project_id, &phase, &task),
            |attempt, classified| {
                warn!(attempt, category = %classified.category, task_id, "retrying task execution");
            },
            |classified| {
                warn!(category = %classified.category, task_id, "task execution failed fatally");
            },
        )
        .await
        .map_err(anyhow::Error::from);

        match outcome {
            Ok(outcome) => {
                tokens::record_usage(
                    &self.store,
                    project_id,
                    Some(&phase.id),
                    Some(task_id),
                    &outcome.provider,
                    &outcome.model,
                    outcome.tokens_input,
                    outcome.tokens_output,
                    outcome.cost,
                )
                .await
                .map_err(EngineError::Other)?;

                self.store
                    .update_task_status(task_id, TaskStatus::Completed)
                    .await
                    .map_err(|e| EngineError::Other(e.into()))?;
                self.blockers.reset(task_id);
                self.emit(TaskUpdate {
                    task_id: task_id.to_string(),
                    phase_id: task.phase_id.clone(),
                    update_type: TaskUpdateType::Completed,
                    content: outcome.summary,
                    timestamp: Utc::now(),
                    error: None,
                });
                Ok(())
            }
            Err(err) => {
                self.emit(TaskUpdate {
                    task_id: task_id.to_string(),
                    phase_id: task.phase_id.clone(),
                    update_type: TaskUpdateType::Error,
                    content: "task execution failed".to_string(),
                    timestamp: Utc::now(),
                    error: Some(err.to_string()),
                });

                if self.blockers.record_failure(task_id, &err.to_string()) {
                    let blocker = mark_as_blocked(&self.store, task_id, &err.to_string(), &phase.id)
                        .await
                        .map_err(EngineError::Other)?;
                    self.emit(TaskUpdate {
                        task_id: task_id.to_string(),
                        phase_id: task.phase_id.clone(),
                        update_type: TaskUpdateType::Blocked,
                        content: blocker.description.clone(),
                        timestamp: Utc::now(),
                        error: None,
                    });

                    let executor = self.executor.clone();
                    let retry_project_id = project_id.to_string();
                    let retry_phase = phase.clone();
                    let retry_task = task.clone();
                    let resolution = blockers::attempt_resolution(&blocker.id, move || {
                        let executor = executor.clone();
                        let project_id = retry_project_id.clone();
                        let phase = retry_phase.clone();
                        let task = retry_task.clone();
                        async move { executor.execute(&project_id, &phase, &task).await }
                    })
                    .await;

                    if resolution.success {
                        self.blockers.reset(task_id);
                        self.store
                            .update_task_status(task_id, TaskStatus::NotStarted)
                            .await
                            .map_err(|e| EngineError::Other(e.into()))?;
                    }
                }

                Err(EngineError::Other(err))
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn execute_phase(&self, project_id: &str, phase_id: &str) -> Result<(), EngineError> {
        self.store
            .update_phase_status(phase_id, PhaseStatus::InProgress)
            .await
            .map_err(|e| EngineError::Other(e.into()))?;
        self.emit(TaskUpdate {
            task_id: String::new(),
            phase_id: phase_id.to_string(),
            update_type: TaskUpdateType::Started,
            content: "phase started".to_string(),
            timestamp: Utc::now(),
            error: None,
        });

        let tasks = self
            .store
            .list_tasks_for_phase(phase_id)
            .await
            .map_err(|e| EngineError::Other(e.into()))?;

        for task in tasks {
            if task.status == TaskStatus::Completed {
                continue;
            }
            if let Err(err) = self.execute_task(project_id, &task.id).await {
                self.emit(TaskUpdate {
                    task_id: task.id.clone(),
                    phase_id: phase_id.to_string(),
                    update_type: TaskUpdateType::Error,
                    content: "phase halted".to_string(),
                    timestamp: Utc::now(),
                    error: Some(err.to_string()),
                });
                return Err(err);
            }
        }

        self.store
            .update_phase_status(phase_id, PhaseStatus::Completed)
            .await
            .map_err(|e| EngineError::Other(e.into()))?;
        self.emit(TaskUpdate {
            task_id: String::new(),
            phase_id: phase_id.to_string(),
            update_type: TaskUpdateType::Completed,
            content: "phase completed".to_string(),
            timestamp: Utc::now(),
            error: None,
        });
        info!(phase_id, "phase completed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::NullTaskExecutor;
    use async_trait::async_trait;
    use geoffrussy_common::{Phase, PhaseStatus, Project, ProjectStage, Task};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

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
                title: "Phase".into(),
                content: String::new(),
                status: PhaseStatus::NotStarted,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
            })
            .await
            .unwrap();
        store
            .save_task(&Task {
                id: "task-1".into(),
                phase_id: "phase-1".into(),
                number: "1.1".into(),
                description: "x".into(),
                status: TaskStatus::NotStarted,
                started_at: None,
                completed_at: None,
            })
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn execute_phase_runs_tasks_and_completes() {
        let store = Arc::new(seeded_store().await);
        let (engine, mut rx) = ExecutionEngine::new(
            store.clone(),
            Arc::new(NullTaskExecutor),
            Arc::new(BlockerTracker::default()),
            "null",
        );

        engine.execute_phase("proj-1", "phase-1").await.unwrap();

        let phase = store.get_phase("phase-1").await.unwrap();
        assert_eq!(phase.status, PhaseStatus::Completed);
        let task = store.get_task("task-1").await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        let mut saw_completed = false;
        while let Ok(update) = rx.try_recv() {
            if update.update_type == TaskUpdateType::Completed && update.task_id.is_empty() {
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }

    struct FailingExecutor;
    #[async_trait]
    impl TaskExecutor for FailingExecutor {
        async fn execute(
            &self,
            _project_id: &str,
            _phase: &Phase,
            _task: &Task,
        ) -> anyhow::Result<executor::TaskOutcome> {
            Err(anyhow::anyhow!("boom"))
        }
    }

    #[tokio::test]
    async fn execute_phase_stops_on_task_error() {
        let store = Arc::new(seeded_store().await);
        let (engine, _rx) = ExecutionEngine::new(
            store.clone(),
            Arc::new(FailingExecutor),
            Arc::new(BlockerTracker::default()),
            "null",
        );

        let result = engine.execute_phase("proj-1", "phase-1").await;
        assert!(result.is_err());
        let phase = store.get_phase("phase-1").await.unwrap();
        assert_ne!(phase.status, PhaseStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_short_circuits_execute_task() {
        let store = Arc::new(seeded_store().await);
        let (engine, _rx) = ExecutionEngine::new(
            store.clone(),
            Arc::new(NullTaskExecutor),
            Arc::new(BlockerTracker::default()),
            "null",
        );
        engine.close();
        let result = engine.execute_task("proj-1", "task-1").await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn pause_blocks_until_resumed() {
        let store = Arc::new(seeded_store().await);
        let engine = Arc::new(
            ExecutionEngine::new(store.clone(), Arc::new(NullTaskExecutor), Arc::new(BlockerTracker::default()), "null").0,
        );
        engine.pause().await.unwrap();
        assert!(matches!(engine.pause().await, Err(EngineError::AlreadyPaused)));

        let ran = Arc::new(AtomicU32::new(0));
        let ran_clone = ran.clone();
        let engine_clone = engine.clone();
        let handle = tokio::spawn(async move {
            engine_clone.execute_task("proj-1", "task-1").await.unwrap();
            ran_clone.store(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        engine.resume().await.unwrap();
        handle.await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}

//! The external task executor interface: where actual LLM-driven code
//! generation lives (out of scope). A trait so the Execution Engine never
//! depends on a concrete provider.

use async_trait::async_trait;
use geoffrussy_common::{Phase, Task};

#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub cost: f64,
    pub provider: String,
    pub model: String,
    pub summary: String,
}

#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, project_id: &str, phase: &Phase, task: &Task) -> anyhow::Result<TaskOutcome>;
}

/// Always succeeds with synthetic token usage. Stands in for the real
/// LLM-driven code generation collaborator in tests and demos.
pub struct NullTaskExecutor;

#[async_trait]
impl TaskExecutor for NullTaskExecutor {
    async fn execute(&self, _project_id: &str, _phase: &Phase, task: &Task) -> anyhow::Result<TaskOutcome> {
        Ok(TaskOutcome {
            tokens_input: 100,
            tokens_output: 50,
            cost: 0.01,
            provider: "null".to_string(),
            model: "null".to_string(),
            summary: format!("completed {}", task.id),
        })
    }
}

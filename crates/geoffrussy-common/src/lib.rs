//! Shared domain types for the Geoffrussy execution and persistence spine.
//!
//! These are the entities of the data model: `Project` and everything that
//! hangs off it. Identifiers are opaque strings throughout, timestamps are
//! UTC with second precision. Nothing in this crate talks to a database or
//! a network — it is pure data plus the small set of status enums whose
//! transitions the spine's components enforce.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type Id = String;
pub type Timestamp = DateTime<Utc>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStage {
    Init,
    Interview,
    Design,
    Plan,
    Review,
    Develop,
    Complete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Id,
    pub name: String,
    pub created_at: Timestamp,
    pub current_stage: ProjectStage,
    pub current_phase_id: Option<Id>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechStackComponent {
    pub language: String,
    pub framework: String,
    pub version: String,
    pub rationale: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TechnicalStack {
    pub backend: Option<TechStackComponent>,
    pub frontend: Option<TechStackComponent>,
    pub database: Option<TechStackComponent>,
    pub cache: Option<TechStackComponent>,
    pub infrastructure: Option<TechStackComponent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Integration {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub purpose: String,
    pub required: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scope {
    pub mvp_features: Vec<String>,
    pub phase2_features: Vec<String>,
    pub timeline: String,
    pub resources: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementRound {
    pub iteration: u32,
    pub timestamp: Timestamp,
    pub changes: Vec<String>,
    pub approved_by: String,
}

/// Produced externally by the Interview Engine; persisted verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewData {
    pub project_id: Id,
    pub project_name: String,
    pub created_at: Timestamp,
    pub problem_statement: String,
    pub target_users: Vec<String>,
    pub success_metrics: Vec<String>,
    pub technical_stack: TechnicalStack,
    pub integrations: Vec<Integration>,
    pub scope: Scope,
    pub constraints: Vec<String>,
    pub assumptions: Vec<String>,
    pub unknowns: Vec<String>,
    pub refinement_history: Vec<RefinementRound>,
    /// Raw JSON blob of the interview session, kept for round-trip fidelity.
    pub raw_session: String,
}

/// Produced externally by the architecture generator; opaque to the spine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Architecture {
    pub project_id: Id,
    pub content: String,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    NotStarted,
    InProgress,
    Completed,
    Blocked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub id: Id,
    pub project_id: Id,
    pub number: i64,
    pub title: String,
    pub content: String,
    pub status: PhaseStatus,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    InProgress,
    Completed,
    Blocked,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Id,
    pub phase_id: Id,
    /// Hierarchical string ordering key, e.g. "1.1".
    pub number: String,
    pub description: String,
    pub status: TaskStatus,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Id,
    pub project_id: Id,
    pub name: String,
    pub external_tag: String,
    pub created_at: Timestamp,
    pub metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub id: i64,
    pub project_id: Id,
    pub phase_id: Option<Id>,
    pub task_id: Option<Id>,
    pub provider: String,
    pub model: String,
    pub tokens_input: i64,
    pub tokens_output: i64,
    pub cost: f64,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub id: i64,
    pub provider: String,
    pub requests_remaining: i64,
    pub requests_limit: i64,
    pub reset_at: Timestamp,
    pub checked_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub id: i64,
    pub provider: String,
    pub tokens_remaining: Option<i64>,
    pub tokens_limit: Option<i64>,
    pub cost_remaining: Option<f64>,
    pub cost_limit: Option<f64>,
    pub reset_at: Timestamp,
    pub checked_at: Timestamp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenStatsCache {
    pub project_id: Id,
    pub total_input: i64,
    pub total_output: i64,
    pub by_provider: HashMap<String, i64>,
    pub by_phase: HashMap<String, i64>,
    pub last_updated: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blocker {
    pub id: Id,
    pub task_id: Id,
    pub description: String,
    pub resolution: Option<String>,
    pub created_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetourStatus {
    Pending,
    Gathering,
    Planned,
    Active,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detour {
    pub id: Id,
    pub project_id: Id,
    pub phase_id: Id,
    pub task_id: Id,
    pub description: String,
    pub reason: String,
    pub new_task_ids: Vec<Id>,
    pub status: DetourStatus,
    pub created_at: Timestamp,
    pub completed_at: Option<Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
    pub updated_at: Timestamp,
}

/// Closed warning-level enum, ordered `none < info < caution < warning <
/// critical < exceeded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningLevel {
    None,
    Info,
    Caution,
    Warning,
    Critical,
    Exceeded,
}

impl WarningLevel {
    /// Classify a percent-used value (0.0-100.0+) per the closed thresholds.
    pub fn from_percent_used(percent: f64) -> Self {
        if percent >= 100.0 {
            WarningLevel::Exceeded
        } else if percent >= 95.0 {
            WarningLevel::Critical
        } else if percent >= 85.0 {
            WarningLevel::Warning
        } else if percent >= 70.0 {
            WarningLevel::Caution
        } else if percent > 0.0 {
            WarningLevel::Info
        } else {
            WarningLevel::None
        }
    }
}

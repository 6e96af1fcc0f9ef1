//! Layered configuration: `.geoffrussy/geoffrussy.toml` → `GEOFFRUSSY_*`
//! environment variables → CLI flags.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    #[serde(default)]
    pub name: Option<String>,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self { name: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetSection {
    /// Soft token/cost budget checked by the Token/Cost Counter; `None` means unbounded.
    #[serde(default)]
    pub limit: Option<f64>,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: f64,
}

fn default_warning_threshold() -> f64 {
    0.8
}

impl Default for BudgetSection {
    fn default() -> Self {
        Self { limit: None, warning_threshold: default_warning_threshold() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaSection {
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: i64,
    #[serde(default)]
    pub delay_on_warning: bool,
}

fn default_stale_after_secs() -> i64 {
    60
}

impl Default for QuotaSection {
    fn default() -> Self {
        Self { stale_after_secs: default_stale_after_secs(), delay_on_warning: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_update_channel_capacity")]
    pub update_channel_capacity: usize,
}

fn default_failure_threshold() -> u32 {
    crate::blockers::DEFAULT_FAILURE_THRESHOLD
}

fn default_update_channel_capacity() -> usize {
    crate::engine::UPDATE_CHANNEL_CAPACITY
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            update_channel_capacity: default_update_channel_capacity(),
        }
    }
}

/// The parsed contents of `geoffrussy.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeoffrussyToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub budget: BudgetSection,
    #[serde(default)]
    pub quota: QuotaSection,
    #[serde(default)]
    pub engine: EngineSection,
}

impl GeoffrussyToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("failed to parse geoffrussy.toml")
    }

    pub fn load_or_default(state_dir: &Path) -> Result<Self> {
        let path = state_dir.join("geoffrussy.toml");
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("failed to serialize geoffrussy.toml")?;
        std::fs::write(path, content).with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }
}

/// Resolved runtime configuration, combining the file with environment and
/// CLI overrides. This is what the rest of the crate depends on.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,
    pub db_path: PathBuf,
    pub checkpoints_dir: PathBuf,
    pub log_dir: PathBuf,
    pub toml: GeoffrussyToml,
    pub verbose: bool,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        let project_dir = project_dir.canonicalize().context("failed to resolve project directory")?;
        let state_dir = project_dir.join(".geoffrussy");
        let mut toml = GeoffrussyToml::load_or_default(&state_dir)?;
        apply_env_overrides(&mut toml);

        Ok(Self {
            db_path: state_dir.join("state.db"),
            checkpoints_dir: state_dir.join("checkpoints"),
            log_dir: state_dir.join("logs"),
            state_dir,
            project_dir,
            toml,
            verbose,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.state_dir).context("failed to create state directory")?;
        std::fs::create_dir_all(&self.checkpoints_dir).context("failed to create checkpoints directory")?;
        std::fs::create_dir_all(&self.log_dir).context("failed to create log directory")?;
        Ok(())
    }

    pub fn budget_limit(&self) -> Option<f64> {
        self.toml.budget.limit
    }

    pub fn failure_threshold(&self) -> u32 {
        self.toml.engine.failure_threshold
    }
}

/// `GEOFFRUSSY_BUDGET_LIMIT` and `GEOFFRUSSY_FAILURE_THRESHOLD` override
/// their file-level counterparts, mirroring `CLAUDE_CMD`/`SKIP_PERMISSIONS`'s
/// env-override precedent.
fn apply_env_overrides(toml: &mut GeoffrussyToml) {
    if let Ok(limit) = std::env::var("GEOFFRUSSY_BUDGET_LIMIT") {
        if let Ok(parsed) = limit.parse::<f64>() {
            toml.budget.limit = Some(parsed);
        }
    }
    if let Ok(threshold) = std::env::var("GEOFFRUSSY_FAILURE_THRESHOLD") {
        if let Ok(parsed) = threshold.parse::<u32>() {
            toml.engine.failure_threshold = parsed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_are_sensible() {
        let toml = GeoffrussyToml::default();
        assert_eq!(toml.budget.warning_threshold, 0.8);
        assert_eq!(toml.quota.stale_after_secs, 60);
        assert_eq!(toml.engine.failure_threshold, 3);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let content = r#"
[project]
name = "demo"

[budget]
limit = 100.0
"#;
        let toml = GeoffrussyToml::parse(content).unwrap();
        assert_eq!(toml.project.name.as_deref(), Some("demo"));
        assert_eq!(toml.budget.limit, Some(100.0));
        assert_eq!(toml.budget.warning_threshold, 0.8);
    }

    #[test]
    fn config_new_resolves_state_paths() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        assert!(config.db_path.ends_with(".geoffrussy/state.db"));
        assert!(config.checkpoints_dir.ends_with(".geoffrussy/checkpoints"));
    }

    #[test]
    fn env_override_takes_precedence_over_file() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".geoffrussy")).unwrap();
        std::fs::write(
            dir.path().join(".geoffrussy/geoffrussy.toml"),
            "[budget]\nlimit = 50.0\n",
        )
        .unwrap();

        unsafe { std::env::set_var("GEOFFRUSSY_BUDGET_LIMIT", "200.0") };
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        assert_eq!(config.budget_limit(), Some(200.0));
        unsafe { std::env::remove_var("GEOFFRUSSY_BUDGET_LIMIT") };
    }

    #[test]
    fn load_and_save_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("geoffrussy.toml");
        let mut toml = GeoffrussyToml::default();
        toml.project.name = Some("roundtrip".to_string());
        toml.save(&path).unwrap();

        let loaded = GeoffrussyToml::load(&path).unwrap();
        assert_eq!(loaded.project.name.as_deref(), Some("roundtrip"));
    }
}

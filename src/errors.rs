//! Error taxonomy for the Geoffrussy execution and persistence spine.
//!
//! `StoreError` is the typed error surface of the State Store. `Category`
//! and `ClassifiedError` are the taxonomy consumed by the recovery driver
//! (`crate::recovery`): every error that crosses a component boundary is
//! eventually classified into one of five categories before a retry
//! decision is made.

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Errors from the State Store (C1).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] libsql::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The five error categories of §4.5. Not a type hierarchy — a
/// classification applied to whatever underlying error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    User,
    Api,
    System,
    Git,
    Network,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::User => "user",
            Category::Api => "api",
            Category::System => "system",
            Category::Git => "git",
            Category::Network => "network",
        };
        write!(f, "{s}")
    }
}

/// A classified error: the underlying error plus the taxonomy's verdict.
#[derive(Debug)]
pub struct ClassifiedError {
    pub category: Category,
    pub source: anyhow::Error,
    pub message: String,
    pub suggestion: Option<String>,
    pub retryable: bool,
    pub fatal: bool,
    pub context: HashMap<String, String>,
}

impl ClassifiedError {
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}]", self.category)?;
        writeln!(f, "---")?;
        writeln!(f, "Error: {}", self.message)?;
        if let Some(suggestion) = &self.suggestion {
            writeln!(f, "Suggestion: {suggestion}")?;
        }
        if self.retryable {
            writeln!(f, "(retryable)")?;
        }
        for (k, v) in &self.context {
            writeln!(f, "{k}: {v}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ClassifiedError {}

/// Classify an error by inspecting the lowercased message for distinctive
/// substrings, per §4.5.
pub fn categorize(err: anyhow::Error) -> ClassifiedError {
    let message = err.to_string();
    let lower = message.to_lowercase();

    let (category, suggestion, fatal) = if contains_any(&lower, &["rate-limit", "rate limit", "api key", "api-key", "unauthorized"]) {
        (Category::Api, Some("wait for the rate limit to reset or rotate credentials".to_string()), false)
    } else if contains_any(&lower, &["timeout", "refused", "no route"]) {
        (Category::Network, Some("check network connectivity and retry".to_string()), false)
    } else if contains_any(&lower, &["git", "merge", "uncommitted"]) {
        (Category::Git, Some("resolve conflicts or initialize the repository".to_string()), false)
    } else if contains_any(&lower, &["invalid", "missing", "not found"]) {
        (Category::User, None, false)
    } else if contains_any(&lower, &["permission denied", "disk full", "no space"]) {
        (Category::System, Some("free disk space or fix file permissions".to_string()), true)
    } else {
        (Category::System, None, false)
    };

    let retryable = matches!(category, Category::Api | Category::Network);

    ClassifiedError {
        category,
        message,
        suggestion,
        retryable,
        fatal,
        source: err,
        context: HashMap::new(),
    }
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorizes_rate_limit_as_api_retryable() {
        let e = categorize(anyhow::anyhow!("received 429: rate-limit exceeded"));
        assert_eq!(e.category, Category::Api);
        assert!(e.retryable);
        assert!(!e.fatal);
    }

    #[test]
    fn categorizes_hyphenated_api_key_as_api() {
        let e = categorize(anyhow::anyhow!("rejected: invalid api-key"));
        assert_eq!(e.category, Category::Api);
        assert!(e.retryable);
    }

    #[test]
    fn categorizes_timeout_as_network() {
        let e = categorize(anyhow::anyhow!("request timeout after 30s"));
        assert_eq!(e.category, Category::Network);
        assert!(e.retryable);
    }

    #[test]
    fn categorizes_git_errors_as_non_retryable() {
        let e = categorize(anyhow::anyhow!("git merge conflict in src/main.rs"));
        assert_eq!(e.category, Category::Git);
        assert!(!e.retryable);
    }

    #[test]
    fn categorizes_permission_denied_as_fatal_system() {
        let e = categorize(anyhow::anyhow!("permission denied writing to /var/lib"));
        assert_eq!(e.category, Category::System);
        assert!(e.fatal);
        assert!(!e.retryable);
    }

    #[test]
    fn categorizes_unknown_as_system_non_fatal() {
        let e = categorize(anyhow::anyhow!("something strange happened"));
        assert_eq!(e.category, Category::System);
        assert!(!e.fatal);
        assert!(!e.retryable);
    }

    #[test]
    fn display_includes_category_and_message() {
        let e = categorize(anyhow::anyhow!("invalid input: missing field"));
        let rendered = e.to_string();
        assert!(rendered.contains("[user]"));
        assert!(rendered.contains("Error: invalid input"));
    }
}

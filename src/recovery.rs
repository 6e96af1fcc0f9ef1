//! Exponential-backoff recovery driver (C5): runs any fallible async
//! operation under a classified-error retry policy.

use crate::errors::{categorize, Category, ClassifiedError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub struct RecoveryStrategy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
    pub save_state_on_fail: bool,
}

impl RecoveryStrategy {
    pub fn default_strategy() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            save_state_on_fail: true,
        }
    }

    pub fn api() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            save_state_on_fail: true,
        }
    }

    pub fn network() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(30),
            backoff_factor: 1.5,
            save_state_on_fail: false,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("operation failed after {attempts} retries: {last}")]
    ExhaustedRetries { attempts: u32, last: ClassifiedErrorDisplay },
    #[error(transparent)]
    Fatal(#[from] anyhow::Error),
}

use thiserror::Error;

/// `ClassifiedError` doesn't implement `Clone` (it wraps an `anyhow::Error`),
/// so the terminal failure is rendered to a string for storage in the error
/// enum rather than carried structurally.
#[derive(Debug)]
pub struct ClassifiedErrorDisplay(pub String);

impl std::fmt::Display for ClassifiedErrorDisplay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A trait satisfied by anything the recovery driver can ask to save state
/// before giving up on a fatal or exhausted-retry error.
pub trait StatePreserver {
    fn save_state(&self) -> anyhow::Result<()>;
}

pub async fn execute_with_recovery<F, Fut, T>(
    strategy: &RecoveryStrategy,
    mut op: F,
    mut on_retry: impl FnMut(u32, &ClassifiedError),
    mut on_fatal: impl FnMut(&ClassifiedError),
) -> Result<T, RecoveryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let classified = categorize(err);
                if classified.fatal {
                    on_fatal(&classified);
                    return Err(RecoveryError::Fatal(classified.source));
                }
                if !classified.retryable {
                    return Err(RecoveryError::Fatal(classified.source));
                }
                if attempt >= strategy.max_retries {
                    let rendered = classified.to_string();
                    return Err(RecoveryError::ExhaustedRetries {
                        attempts: attempt,
                        last: ClassifiedErrorDisplay(rendered),
                    });
                }
                on_retry(attempt, &classified);
                let delay = strategy.delay_for_attempt(attempt);
                warn!(attempt, ?delay, category = %classified.category, "retrying after classified error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// §4.5 state-preservation hook: save state when the error is `system`,
/// `api`, or outright fatal.
pub fn preserve_state_on_error(
    classified: &ClassifiedError,
    preserver: &dyn StatePreserver,
) -> anyhow::Result<()> {
    let should_preserve =
        classified.fatal || matches!(classified.category, Category::System | Category::Api);
    if !should_preserve {
        return Ok(());
    }
    preserver
        .save_state()
        .map_err(|save_err| anyhow::anyhow!("{classified}; additionally failed to save state: {save_err}"))
}

/// §4.5 offline capability catalog.
pub fn is_offline_capable(op_name: &str) -> bool {
    matches!(op_name, "status" | "checkpoint" | "rollback" | "navigate")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_network_error_twice_then_succeeds() {
        let calls = AtomicU32::new(0);
        let retries = AtomicU32::new(0);
        let strategy = RecoveryStrategy {
            initial_delay: Duration::from_millis(1),
            ..RecoveryStrategy::default_strategy()
        };
        let result = execute_with_recovery(
            &strategy,
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(anyhow::anyhow!("connection refused"))
                    } else {
                        Ok(42)
                    }
                }
            },
            |_, _| {
                retries.fetch_add(1, Ordering::SeqCst);
            },
            |_| panic!("on_fatal should not be called"),
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fatal_system_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let fatal_calls = AtomicU32::new(0);
        let strategy = RecoveryStrategy::default_strategy();
        let result: Result<(), _> = execute_with_recovery(
            &strategy,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow::anyhow!("permission denied")) }
            },
            |_, _| panic!("on_retry should not be called"),
            |_| {
                fatal_calls.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fatal_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn offline_capability_matches_catalog() {
        assert!(is_offline_capable("status"));
        assert!(is_offline_capable("checkpoint"));
        assert!(is_offline_capable("rollback"));
        assert!(is_offline_capable("navigate"));
        assert!(!is_offline_capable("interview"));
        assert!(!is_offline_capable("quota"));
    }

    struct AlwaysOk;
    impl StatePreserver for AlwaysOk {
        fn save_state(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn preserve_state_skipped_for_network_category() {
        let classified = categorize(anyhow::anyhow!("connection timeout"));
        assert!(preserve_state_on_error(&classified, &AlwaysOk).is_ok());
    }

    #[test]
    fn preserve_state_invoked_for_api_category() {
        let classified = categorize(anyhow::anyhow!("rate-limit hit"));
        assert!(preserve_state_on_error(&classified, &AlwaysOk).is_ok());
    }
}

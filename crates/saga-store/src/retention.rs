//! Retention policy for finished sagas.

use std::sync::Arc;
use std::time::Duration;

use crate::store::SagaStore;

/// How long terminal sagas are kept before the sweep removes them.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    /// Minimum age past completion before a saga may be deleted.
    pub retain_for: Duration,
    /// How often the sweeper runs.
    pub sweep_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retain_for: Duration::from_secs(7 * 24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Periodically deletes terminal sagas older than the retention window.
///
/// Runs until the task is dropped; sweep failures are logged and the next
/// interval tries again. Non-terminal sagas are never deleted.
pub async fn run_sweeper<S: SagaStore>(store: Arc<S>, policy: RetentionPolicy) {
    let retain_for = chrono::Duration::from_std(policy.retain_for)
        .unwrap_or_else(|_| chrono::Duration::days(7));
    let mut interval = tokio::time::interval(policy.sweep_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        let cutoff = chrono::Utc::now() - retain_for;
        match store.sweep_terminal(cutoff).await {
            Ok(0) => {}
            Ok(swept) => tracing::info!(swept, %cutoff, "retention sweep removed finished sagas"),
            Err(error) => tracing::warn!(%error, "retention sweep failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_retains_a_week() {
        let policy = RetentionPolicy::default();
        assert_eq!(policy.retain_for, Duration::from_secs(7 * 24 * 60 * 60));
        assert_eq!(policy.sweep_interval, Duration::from_secs(3600));
    }
}

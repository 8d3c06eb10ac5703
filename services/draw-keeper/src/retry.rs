use std::future::Future;
use std::time::Duration;

use cosmwasm_schema::cw_serde;
use tracing::{debug, warn};

use crate::error::{CollaboratorError, KeeperError};

/// Inner retry budget for a flaky collaborator call.
#[cw_serde]
#[serde(deny_unknown_fields)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Each attempt is abandoned after this long
    pub attempt_timeout_seconds: u64,
    /// Pause between attempts
    #[serde(default)]
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            attempt_timeout_seconds: 60,
            backoff_ms: 2_500,
        }
    }
}

impl RetryPolicy {
    pub(crate) fn validate(&self, field: &str) -> Result<(), KeeperError> {
        if self.max_attempts == 0 || self.attempt_timeout_seconds == 0 {
            return Err(KeeperError::InvalidConfig {
                reason: format!("{field} needs at least one attempt and a non-zero timeout"),
            });
        }
        Ok(())
    }
}

/// Run `op` until it succeeds or the policy's attempts are used up.
///
/// Returns the last error when every attempt fails.
pub async fn retry<T, F, Fut>(
    label: &'static str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let attempt_timeout = Duration::from_secs(policy.attempt_timeout_seconds);
    let mut last_error = CollaboratorError::failed(format!("{label}: no attempts made"));

    for attempt in 1..=policy.max_attempts {
        debug!(label, attempt, "starting attempt");
        let outcome = match tokio::time::timeout(attempt_timeout, op(attempt)).await {
            Ok(result) => result,
            Err(_) => Err(CollaboratorError::TimedOut {
                seconds: policy.attempt_timeout_seconds,
            }),
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(label, attempt, max_attempts = policy.max_attempts, error = %err, "attempt failed");
                last_error = err;
            }
        }

        if attempt < policy.max_attempts && policy.backoff_ms > 0 {
            tokio::time::sleep(Duration::from_millis(policy.backoff_ms)).await;
        }
    }

    Err(CollaboratorError::failed(format!(
        "{label} failed after {} attempts: {last_error}",
        policy.max_attempts
    )))
}

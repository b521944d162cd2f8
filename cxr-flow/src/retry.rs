use std::future::Future;
use tracing::debug;

/// Result of a bounded retry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// An attempt satisfied the predicate.
    Accepted { value: T, attempts: u32 },
    /// Every attempt was rejected; `last` is the final attempt's value.
    Exhausted { last: T, attempts: u32 },
}

impl<T> RetryOutcome<T> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Accepted { attempts, .. } | RetryOutcome::Exhausted { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, RetryOutcome::Accepted { .. })
    }

    pub fn into_value(self) -> T {
        match self {
            RetryOutcome::Accepted { value, .. } => value,
            RetryOutcome::Exhausted { last, .. } => last,
        }
    }
}

/// Re-runs an attempt until its value passes `predicate` or `max_attempts`
/// is reached. An attempt error ends the run immediately.
pub struct RetryPolicy<T> {
    max_attempts: u32,
    predicate: Box<dyn Fn(&T) -> bool + Send + Sync>,
}

impl<T> RetryPolicy<T> {
    /// `max_attempts` below 1 is treated as 1.
    pub fn new<P>(max_attempts: u32, predicate: P) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            max_attempts: max_attempts.max(1),
            predicate: Box::new(predicate),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `attempt` with the 1-based attempt number.
    pub async fn run<F, Fut>(&self, mut attempt: F) -> anyhow::Result<RetryOutcome<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let value = attempt(attempts).await?;

            if (self.predicate)(&value) {
                return Ok(RetryOutcome::Accepted { value, attempts });
            }
            if attempts >= self.max_attempts {
                return Ok(RetryOutcome::Exhausted {
                    last: value,
                    attempts,
                });
            }

            debug!(
                attempt = attempts,
                max_attempts = self.max_attempts,
                "Attempt rejected, retrying"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_accepts_first_passing_value() {
        let policy = RetryPolicy::new(5, |v: &u32| *v >= 3);
        let outcome = policy.run(|n| async move { Ok(n) }).await.unwrap();
        assert_eq!(
            outcome,
            RetryOutcome::Accepted {
                value: 3,
                attempts: 3
            }
        );
    }

    #[tokio::test]
    async fn test_exhausted_returns_last_value() {
        let policy = RetryPolicy::new(4, |_: &u32| false);
        let outcome = policy.run(|n| async move { Ok(n * 10) }).await.unwrap();
        assert_eq!(
            outcome,
            RetryOutcome::Exhausted {
                last: 40,
                attempts: 4
            }
        );
        assert_eq!(outcome.into_value(), 40);
    }

    #[tokio::test]
    async fn test_error_aborts_run() {
        let policy = RetryPolicy::new(10, |_: &u32| false);
        let mut calls = 0;
        let result = policy
            .run(|n| {
                calls += 1;
                async move {
                    if n == 2 {
                        anyhow::bail!("boom");
                    }
                    Ok(n)
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_clamped_to_one() {
        let policy = RetryPolicy::new(0, |_: &u32| false);
        assert_eq!(policy.max_attempts(), 1);
        let outcome = policy.run(|n| async move { Ok(n) }).await.unwrap();
        assert_eq!(outcome.attempts(), 1);
        assert!(!outcome.is_accepted());
    }
}

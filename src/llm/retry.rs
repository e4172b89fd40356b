//! Retry wrapper for LLM calls.
//!
//! Transient provider failures are retried with exponential backoff up
//! to a bounded number of attempts; the terminal failure surfaces as
//! `DependencyUnavailable` for the caller's fallback path to handle.

use super::{GenerationRequest, LlmProvider};
use crate::{Error, Result};
use std::time::Duration;

/// Bounded exponential-backoff retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Initial backoff; doubles per retry.
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 100,
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given 0-based retry attempt.
    #[must_use]
    pub const fn backoff(&self, attempt: u32) -> Duration {
        let attempt = if attempt < 8 { attempt } else { 8 };
        Duration::from_millis(self.initial_backoff_ms << attempt)
    }
}

/// An [`LlmProvider`] that retries its inner provider.
pub struct RetryingLlm {
    inner: Box<dyn LlmProvider>,
    policy: RetryPolicy,
}

impl RetryingLlm {
    /// Wraps a provider with the given policy.
    #[must_use]
    pub fn new(inner: Box<dyn LlmProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

impl LlmProvider for RetryingLlm {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let mut last_err: Option<Error> = None;
        for attempt in 0..=self.policy.max_retries {
            if attempt > 0 {
                std::thread::sleep(self.policy.backoff(attempt - 1));
            }
            match self.inner.generate(request) {
                Ok(text) => return Ok(text),
                Err(err @ Error::DependencyUnavailable { .. }) => {
                    tracing::debug!(
                        provider = self.inner.name(),
                        attempt,
                        "LLM call failed, will retry: {err}"
                    );
                    last_err = Some(err);
                },
                // Non-transient errors are not retryable.
                Err(err) => return Err(err),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::DependencyUnavailable {
            dependency: "llm".to_string(),
            cause: "exhausted retries".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyProvider {
        calls: AtomicU32,
        succeed_on: u32,
    }

    impl LlmProvider for FlakyProvider {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn generate(&self, _request: &GenerationRequest) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok("ok".to_string())
            } else {
                Err(Error::DependencyUnavailable {
                    dependency: "llm".to_string(),
                    cause: "flaky".to_string(),
                })
            }
        }
    }

    #[test]
    fn test_retries_until_success() {
        let retrying = RetryingLlm::new(
            Box::new(FlakyProvider {
                calls: AtomicU32::new(0),
                succeed_on: 3,
            }),
            RetryPolicy {
                max_retries: 3,
                initial_backoff_ms: 1,
            },
        );
        assert_eq!(
            retrying.generate(&GenerationRequest::new("x")).ok(),
            Some("ok".to_string())
        );
    }

    #[test]
    fn test_exhausts_retries() {
        let retrying = RetryingLlm::new(
            Box::new(FlakyProvider {
                calls: AtomicU32::new(0),
                succeed_on: 10,
            }),
            RetryPolicy {
                max_retries: 1,
                initial_backoff_ms: 1,
            },
        );
        let err = retrying.generate(&GenerationRequest::new("x")).unwrap_err();
        assert_eq!(err.error_code(), "DependencyUnavailable");
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_backoff_ms: 100,
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
    }
}

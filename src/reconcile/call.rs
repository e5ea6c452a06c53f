// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 contentflow contributors

//! Timeouts and retries around single remote calls

use std::future::Future;
use std::time::Duration;

use crate::errors::{ContentflowError, ContentflowResult};

/// Limits applied to every remote call
#[derive(Debug, Clone, Copy)]
pub struct CallSettings {
    /// Deadline for one attempt
    pub timeout: Duration,
    /// Extra attempts after the first
    pub retries: u32,
    /// Delay before the first retry; doubles on each further retry
    pub backoff: Duration,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// Runs remote calls under [`CallSettings`]
#[derive(Debug, Clone, Copy)]
pub struct RemoteCaller {
    settings: CallSettings,
}

impl RemoteCaller {
    pub fn new(settings: CallSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CallSettings {
        &self.settings
    }

    /// Same timeout, no retries; for calls that are not safe to repeat
    pub fn without_retries(&self) -> Self {
        Self {
            settings: CallSettings {
                retries: 0,
                ..self.settings
            },
        }
    }

    /// Run `call`, retrying retryable failures with exponential backoff
    pub async fn call<T, F, Fut>(&self, operation: &str, mut call: F) -> ContentflowResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ContentflowResult<T>>,
    {
        let mut attempt = 0;
        loop {
            let result = match tokio::time::timeout(self.settings.timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ContentflowError::Timeout {
                    operation: operation.to_string(),
                    after: self.settings.timeout,
                }),
            };

            match result {
                Err(e) if e.is_retryable() && attempt < self.settings.retries => {
                    let delay = self.settings.backoff * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying remote call"
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn caller(retries: u32, timeout_ms: u64) -> RemoteCaller {
        RemoteCaller::new(CallSettings {
            timeout: Duration::from_millis(timeout_ms),
            retries,
            backoff: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let attempts = AtomicU32::new(0);
        let result = caller(3, 1000)
            .call("find", || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ContentflowError::remote("find", "503"))
                } else {
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let attempts = AtomicU32::new(0);
        let result: ContentflowResult<()> = caller(3, 1000)
            .call("create", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(ContentflowError::remote_permanent("create", "422"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_after_retries() {
        let attempts = AtomicU32::new(0);
        let result: ContentflowResult<()> = caller(1, 10)
            .call("update", || async {
                attempts.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        match result {
            Err(e @ ContentflowError::Timeout { .. }) => {
                assert_eq!(e.to_string(), "Remote call 'update' timed out after 10ms")
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}

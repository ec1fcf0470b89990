//! Message source capability.
//!
//! A [`MessageSource`] is the external system that owns the chat history.
//! The core only relies on three things from it: a handshake, a chat list,
//! and a lazy, ascending-by-id stream of messages inside a [`FetchWindow`].
//! Rate limiting, mandatory delays, and permission failures are reported as
//! categorized [`SourceError`]s rather than handled internally.
//!
//! The handshake is the only place transient failures are retried; see
//! [`connect_with_retry`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{IndexError, SourceError};
use crate::models::{ChatInfo, FetchWindow, RawMessage};

/// Lazy sequence of messages. Restartable only by calling
/// [`MessageSource::iterate`] again with new bounds.
pub type MessageStream<'a> = BoxStream<'a, Result<RawMessage, SourceError>>;

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Short label for logs (e.g. `"export"`).
    fn name(&self) -> &str;

    /// Establish a session. `SourceError::Connection` is treated as
    /// transient; anything else is fatal.
    async fn authenticate(&self) -> Result<(), SourceError>;

    /// Chats visible to the authenticated account.
    async fn list_chats(&self) -> Result<Vec<ChatInfo>, SourceError>;

    /// Messages of `chat_id` inside `window`, in ascending id order.
    fn iterate(&self, chat_id: i64, window: FetchWindow) -> MessageStream<'_>;
}

/// Bounded exponential backoff for the source handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Wait after the first failure.
    pub initial_delay: Duration,
    /// Multiplier applied to the wait after each further failure.
    pub backoff_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2,
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-indexed): 1s, 2s, 4s, ...
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.initial_delay
            .saturating_mul(self.backoff_factor.max(1).saturating_pow(exp))
    }
}

/// Authenticate, retrying connection failures per `policy`.
///
/// Non-connection errors are returned immediately. Exhausting the attempts
/// yields [`IndexError::Connection`].
pub async fn connect_with_retry(
    source: &dyn MessageSource,
    policy: &RetryPolicy,
) -> Result<(), IndexError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match source.authenticate().await {
            Ok(()) => {
                if attempt > 1 {
                    info!(source = source.name(), attempt, "connected after retry");
                }
                return Ok(());
            }
            Err(e) => {
                let err = IndexError::from(e);
                if !err.is_retryable() {
                    return Err(err);
                }
                if attempt >= max_attempts {
                    return Err(match err {
                        IndexError::Connection { message, .. } => IndexError::Connection {
                            attempts: attempt,
                            message,
                        },
                        other => other,
                    });
                }
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    source = source.name(),
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySource {
        failures_before_success: u32,
        attempts: AtomicU32,
        fatal: Option<SourceError>,
    }

    #[async_trait]
    impl MessageSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn authenticate(&self) -> Result<(), SourceError> {
            let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(err) = &self.fatal {
                return Err(err.clone());
            }
            if n <= self.failures_before_success {
                return Err(SourceError::Connection(format!("reset #{}", n)));
            }
            Ok(())
        }

        async fn list_chats(&self) -> Result<Vec<ChatInfo>, SourceError> {
            Ok(Vec::new())
        }

        fn iterate(&self, _chat_id: i64, _window: FetchWindow) -> MessageStream<'_> {
            Box::pin(stream::empty())
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            backoff_factor: 2,
        }
    }

    #[test]
    fn default_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn recovers_from_transient_failures() {
        let source = FlakySource {
            failures_before_success: 2,
            attempts: AtomicU32::new(0),
            fatal: None,
        };
        connect_with_retry(&source, &fast_policy()).await.unwrap();
        assert_eq!(source.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_ceiling() {
        let source = FlakySource {
            failures_before_success: 10,
            attempts: AtomicU32::new(0),
            fatal: None,
        };
        let err = connect_with_retry(&source, &fast_policy())
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Connection { attempts: 3, .. }));
        assert_eq!(err.code(), "NETWORK_ERROR");
        assert_eq!(source.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let source = FlakySource {
            failures_before_success: 0,
            attempts: AtomicU32::new(0),
            fatal: Some(SourceError::PrefetchDelay { wait_seconds: 86400 }),
        };
        let err = connect_with_retry(&source, &fast_policy())
            .await
            .unwrap_err();
        assert_eq!(err.wait_seconds(), Some(86400));
        assert_eq!(source.attempts.load(Ordering::SeqCst), 1);
    }
}

//! Bounded gateway calls — timeout plus jittered retry for transient failures.
//!
//! AI calls are a primary suspension point of the orchestrator; they fail
//! after the configured timeout rather than hanging a state machine.

use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::GatewayError;
use crate::gateway::AiGateway;

/// Bounds for a single logical gateway call.
#[derive(Debug, Clone)]
pub struct CallOptions {
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retries after the first attempt (transient failures only).
    pub retries: u32,
    /// Base backoff between attempts; actual delay gets up to 50% jitter.
    pub backoff: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(45),
            retries: 2,
            backoff: Duration::from_millis(500),
        }
    }
}

impl CallOptions {
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self {
            timeout,
            retries,
            ..Self::default()
        }
    }
}

/// Whether an error is worth another attempt.
fn is_transient(err: &GatewayError) -> bool {
    matches!(
        err,
        GatewayError::Timeout { .. } | GatewayError::RequestFailed { .. }
    )
}

/// Call the gateway with timeout and retry.
///
/// Precondition errors (missing role, image unsupported) surface immediately;
/// transient failures are retried up to `options.retries` times with jittered
/// backoff. The last error is returned when attempts are exhausted.
pub async fn call_bounded(
    gateway: &dyn AiGateway,
    prompt: &str,
    options: &CallOptions,
) -> Result<String, GatewayError> {
    let mut last_err = None;

    for attempt in 0..=options.retries {
        if attempt > 0 {
            let jitter = rand::thread_rng().gen_range(0..=options.backoff.as_millis() as u64 / 2);
            let delay = options.backoff * attempt + Duration::from_millis(jitter);
            tokio::time::sleep(delay).await;
        }

        let result = tokio::time::timeout(options.timeout, gateway.call(prompt)).await;
        match result {
            Ok(Ok(text)) => return Ok(text),
            Ok(Err(e)) if is_transient(&e) && attempt < options.retries => {
                warn!(
                    model = gateway.model_name(),
                    attempt,
                    error = %e,
                    "Transient gateway failure, retrying"
                );
                last_err = Some(e);
            }
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                let e = GatewayError::Timeout {
                    model: gateway.model_name().to_string(),
                    timeout: options.timeout,
                };
                if attempt < options.retries {
                    warn!(
                        model = gateway.model_name(),
                        attempt,
                        timeout = ?options.timeout,
                        "Gateway call timed out, retrying"
                    );
                    last_err = Some(e);
                } else {
                    return Err(e);
                }
            }
        }
    }

    Err(last_err.unwrap_or_else(|| GatewayError::RequestFailed {
        model: gateway.model_name().to_string(),
        reason: "retries exhausted".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    /// Gateway that fails transiently `fail_count` times, then succeeds.
    struct FlakyGateway {
        calls: AtomicU32,
        fail_count: u32,
    }

    #[async_trait]
    impl AiGateway for FlakyGateway {
        fn model_name(&self) -> &str {
            "flaky"
        }

        async fn call(&self, _prompt: &str) -> Result<String, GatewayError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_count {
                Err(GatewayError::RequestFailed {
                    model: "flaky".into(),
                    reason: "connection reset".into(),
                })
            } else {
                Ok("ok".into())
            }
        }
    }

    fn fast_options(retries: u32) -> CallOptions {
        CallOptions {
            timeout: Duration::from_secs(1),
            retries,
            backoff: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let gw = FlakyGateway {
            calls: AtomicU32::new(0),
            fail_count: 2,
        };
        let out = call_bounded(&gw, "hi", &fast_options(2)).await.unwrap();
        assert_eq!(out, "ok");
        assert_eq!(gw.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_return_last_error() {
        let gw = FlakyGateway {
            calls: AtomicU32::new(0),
            fail_count: 10,
        };
        let err = call_bounded(&gw, "hi", &fast_options(1)).await.unwrap_err();
        assert!(matches!(err, GatewayError::RequestFailed { .. }));
        assert_eq!(gw.calls.load(Ordering::SeqCst), 2);
    }

    /// Gateway that never returns.
    struct HangingGateway;

    #[async_trait]
    impl AiGateway for HangingGateway {
        fn model_name(&self) -> &str {
            "hanging"
        }

        async fn call(&self, _prompt: &str) -> Result<String, GatewayError> {
            futures::future::pending::<()>().await;
            unreachable!()
        }
    }

    #[tokio::test]
    async fn hanging_call_times_out() {
        let options = CallOptions {
            timeout: Duration::from_millis(20),
            retries: 0,
            backoff: Duration::from_millis(1),
        };
        let err = call_bounded(&HangingGateway, "hi", &options).await.unwrap_err();
        assert!(matches!(err, GatewayError::Timeout { .. }));
    }

    /// Gateway that fails with a non-transient error.
    struct ImageOnlyGateway;

    #[async_trait]
    impl AiGateway for ImageOnlyGateway {
        fn model_name(&self) -> &str {
            "img"
        }

        async fn call(&self, _prompt: &str) -> Result<String, GatewayError> {
            Err(GatewayError::ImageUnsupported { model: "img".into() })
        }
    }

    #[tokio::test]
    async fn non_transient_error_is_not_retried() {
        let err = call_bounded(&ImageOnlyGateway, "hi", &fast_options(5))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ImageUnsupported { .. }));
    }
}

//! External step gateway
//!
//! Wraps a [`StageTransport`] with the per-channel timeout, the fixed-delay
//! retry policy and cancellation. Only transport failures are retried unless
//! `retry_domain_errors` is set.

mod http;
mod types;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use backon::{ConstantBuilder, Retryable};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

pub use http::{HttpTransport, classify_status};
pub use types::{AttemptError, StageEnvelope, StagePayload, StageTransport};

use crate::config::GatewayConfig;
use crate::error::StageError;
use crate::metrics;
use crate::workflow::{Channel, StageOutput};

/// Retry and timeout policy shared by both channels
#[derive(Debug, Clone)]
pub struct GatewayPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub chat_timeout: Duration,
    pub workflow_timeout: Duration,
    pub retry_domain_errors: bool,
}

impl GatewayPolicy {
    pub fn timeout_for(&self, channel: Channel) -> Duration {
        match channel {
            Channel::Chat => self.chat_timeout,
            Channel::Workflow => self.workflow_timeout,
        }
    }

    fn should_retry(&self, err: &AttemptError) -> bool {
        err.is_transport() || self.retry_domain_errors
    }
}

impl From<&GatewayConfig> for GatewayPolicy {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
            chat_timeout: Duration::from_secs(config.chat_timeout_secs),
            workflow_timeout: Duration::from_secs(config.workflow_timeout_secs),
            retry_domain_errors: config.retry_domain_errors,
        }
    }
}

/// Resilient client for the external stage service
pub struct StepGateway {
    transport: Arc<dyn StageTransport>,
    policy: GatewayPolicy,
}

impl StepGateway {
    pub fn new(transport: Arc<dyn StageTransport>, policy: GatewayPolicy) -> Self {
        Self { transport, policy }
    }

    /// Gateway backed by the HTTP transport
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(Arc::new(HttpTransport::new(config)), GatewayPolicy::from(config))
    }

    pub fn policy(&self) -> &GatewayPolicy {
        &self.policy
    }

    /// Execute a payload without external cancellation
    pub async fn execute(
        &self,
        channel: Channel,
        payload: &StagePayload,
    ) -> Result<StageOutput, StageError> {
        self.execute_cancellable(channel, payload, &CancellationToken::new())
            .await
    }

    /// Execute a payload, retrying transport failures up to `max_retries`
    /// times. Cancelling `cancel` drops the in-flight attempt and any pending
    /// backoff immediately.
    pub async fn execute_cancellable(
        &self,
        channel: Channel,
        payload: &StagePayload,
        cancel: &CancellationToken,
    ) -> Result<StageOutput, StageError> {
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let transport = &self.transport;
        let timeout = self.policy.timeout_for(channel);
        let start = Instant::now();

        let attempt = || async move {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            tracing::debug!(
                "[GATEWAY] Attempt {} for node '{}' on {} channel via {}",
                n,
                payload.node_id,
                channel,
                transport.name()
            );

            let attempt_start = Instant::now();
            let result = match tokio::time::timeout(timeout, transport.send(channel, payload)).await {
                Ok(result) => result,
                Err(_) => Err(AttemptError::Transport(format!(
                    "timed out after {}ms",
                    timeout.as_millis()
                ))),
            };
            metrics::record_gateway_attempt(
                channel.as_str(),
                attempt_status(&result),
                attempt_start.elapsed().as_secs_f64(),
            );
            result
        };

        let retrying = attempt
            .retry(
                ConstantBuilder::default()
                    .with_delay(self.policy.retry_delay)
                    .with_max_times(self.policy.max_retries as usize),
            )
            .when(|err: &AttemptError| self.policy.should_retry(err))
            .notify(|err: &AttemptError, delay: Duration| {
                tracing::warn!(
                    "[GATEWAY] Stage call for node '{}' failed, retrying after {}ms: {}",
                    payload.node_id,
                    delay.as_millis(),
                    err
                );
            });

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(
                    "[GATEWAY] Stage call for node '{}' cancelled after {} attempt(s)",
                    payload.node_id,
                    attempts.load(Ordering::SeqCst)
                );
                return Err(StageError::Cancelled);
            }
            result = retrying => result,
        };

        let attempts = counter.load(Ordering::SeqCst);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(data) => Ok(StageOutput {
                node_id: payload.node_id.clone(),
                data,
                attempts,
                elapsed_ms,
                produced_at: Utc::now(),
            }),
            Err(AttemptError::Transport(message)) => {
                tracing::error!(
                    "[GATEWAY] Stage call for node '{}' exhausted {} attempt(s): {}",
                    payload.node_id,
                    attempts,
                    message
                );
                Err(StageError::Transport { message, attempts })
            }
            Err(AttemptError::Domain { code, message }) => {
                tracing::warn!(
                    "[GATEWAY] Stage service rejected node '{}' ({}): {}",
                    payload.node_id,
                    code,
                    message
                );
                Err(StageError::Domain { code, message })
            }
        }
    }
}

fn attempt_status(result: &Result<serde_json::Value, AttemptError>) -> &'static str {
    match result {
        Ok(_) => "success",
        Err(AttemptError::Transport(_)) => "transport_error",
        Err(AttemptError::Domain { .. }) => "domain_error",
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted transport shared by gateway and executor tests

    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use async_trait::async_trait;

    pub struct ScriptedTransport {
        script: Mutex<VecDeque<Result<serde_json::Value, AttemptError>>>,
        fallback: Result<serde_json::Value, AttemptError>,
        delay: Duration,
        pub calls: AtomicU32,
    }

    impl ScriptedTransport {
        /// Replays `script` in order, then answers with `fallback` forever
        pub fn new(
            script: Vec<Result<serde_json::Value, AttemptError>>,
            fallback: Result<serde_json::Value, AttemptError>,
        ) -> Self {
            Self {
                script: Mutex::new(script.into()),
                fallback,
                delay: Duration::ZERO,
                calls: AtomicU32::new(0),
            }
        }

        pub fn always(result: Result<serde_json::Value, AttemptError>) -> Self {
            Self::new(Vec::new(), result)
        }

        /// Every attempt waits `delay` before answering
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StageTransport for ScriptedTransport {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn send(
            &self,
            _channel: Channel,
            _payload: &StagePayload,
        ) -> Result<serde_json::Value, AttemptError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    pub fn fast_policy(max_retries: u32) -> GatewayPolicy {
        GatewayPolicy {
            max_retries,
            retry_delay: Duration::from_millis(1),
            chat_timeout: Duration::from_secs(5),
            workflow_timeout: Duration::from_secs(5),
            retry_domain_errors: false,
        }
    }
}

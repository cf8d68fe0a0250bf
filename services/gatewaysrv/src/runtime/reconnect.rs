//! Reconnection mechanism
//!
//! Exponential backoff with jitter for transport client creation. The first
//! attempt runs immediately; waits between attempts can be cancelled. An
//! error that is not retryable (misconfiguration, validation) ends the loop.

use errors::GatewayErrorTrait;
use rand::Rng;
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Reconnection error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconnectError {
    /// Maximum retry attempts exceeded
    #[error("Maximum reconnection attempts exceeded")]
    MaxAttemptsExceeded,

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Reconnection was cancelled
    #[error("Reconnection cancelled")]
    Cancelled,

    /// The target answered with an error retrying cannot fix
    #[error("Connection rejected [{code}]: {message}")]
    Rejected { code: &'static str, message: String },
}

/// Connection state enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
    /// Max attempts reached
    Failed,
}

/// Reconnection policy configuration
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum retry attempts (0 means unlimited)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// ±25% random spread on every delay
    pub jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Unlimited attempts starting at `period`, capped at eight periods
    pub fn from_period(period: Duration) -> Self {
        Self {
            max_attempts: 0,
            initial_delay: period,
            max_delay: period.saturating_mul(8),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

/// Attempt counter and backoff state for one connection target
#[derive(Debug)]
pub struct ReconnectHelper {
    policy: ReconnectPolicy,
    current_attempt: u32,
    state: ConnectionState,
}

impl ReconnectHelper {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            current_attempt: 0,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn current_attempt(&self) -> u32 {
        self.current_attempt
    }

    /// Delay before the current attempt: initial * multiplier^(attempt - 2)
    pub fn calculate_next_delay(&self) -> Duration {
        let exponent = self.current_attempt.saturating_sub(2);
        let mut delay = self
            .policy
            .initial_delay
            .mul_f64(self.policy.backoff_multiplier.powi(exponent as i32));

        if delay > self.policy.max_delay {
            delay = self.policy.max_delay;
        }

        if self.policy.jitter {
            let jitter_range = delay.as_millis() as f64 * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                let delay_ms = (delay.as_millis() as f64 + jitter).max(0.0);
                delay = Duration::from_millis(delay_ms as u64);
            }
        }

        delay
    }

    /// One attempt; waits the backoff delay first unless it is the first
    pub async fn execute_reconnect<F, Fut, T, E>(
        &mut self,
        connect_fn: F,
        cancel: &CancellationToken,
    ) -> Result<T, ReconnectError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: GatewayErrorTrait,
    {
        if self.policy.max_attempts > 0 && self.current_attempt >= self.policy.max_attempts {
            self.state = ConnectionState::Failed;
            warn!(
                "Maximum reconnection attempts ({}) exceeded",
                self.policy.max_attempts
            );
            return Err(ReconnectError::MaxAttemptsExceeded);
        }

        self.state = ConnectionState::Reconnecting;
        self.current_attempt += 1;

        if self.current_attempt > 1 {
            let delay = self.calculate_next_delay();
            info!(
                "Waiting {:?} before connection attempt {}",
                delay, self.current_attempt
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.state = ConnectionState::Disconnected;
                    return Err(ReconnectError::Cancelled);
                },
                _ = tokio::time::sleep(delay) => {},
            }
        }

        let started = Instant::now();
        match connect_fn().await {
            Ok(value) => {
                debug!(
                    "Connected after {:?} (attempt {})",
                    started.elapsed(),
                    self.current_attempt
                );
                self.state = ConnectionState::Connected;
                self.current_attempt = 0;
                Ok(value)
            },
            Err(e) if !e.is_retryable() => {
                error!(
                    "Connection attempt {} rejected [{}/{:?}]: {}",
                    self.current_attempt,
                    e.error_code(),
                    e.category(),
                    e
                );
                self.state = ConnectionState::Failed;
                Err(ReconnectError::Rejected {
                    code: e.error_code(),
                    message: e.to_string(),
                })
            },
            Err(e) => {
                warn!("Connection attempt {} failed: {}", self.current_attempt, e);
                self.state = if self.policy.max_attempts == 0
                    || self.current_attempt < self.policy.max_attempts
                {
                    ConnectionState::Disconnected
                } else {
                    ConnectionState::Failed
                };
                Err(ReconnectError::ConnectionFailed(e.to_string()))
            },
        }
    }

    /// Retry until connected, cancelled, rejected or out of attempts
    pub async fn connect_with_retry<F, Fut, T, E>(
        &mut self,
        mut connect_fn: F,
        cancel: &CancellationToken,
    ) -> Result<T, ReconnectError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: GatewayErrorTrait,
    {
        loop {
            match self.execute_reconnect(&mut connect_fn, cancel).await {
                Ok(value) => return Ok(value),
                Err(ReconnectError::ConnectionFailed(_)) => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::error::GatewaySrvError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fixed_policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let mut helper = ReconnectHelper::new(fixed_policy(10));

        helper.current_attempt = 2;
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(100));
        helper.current_attempt = 3;
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(200));
        helper.current_attempt = 4;
        assert_eq!(helper.calculate_next_delay(), Duration::from_millis(400));
        helper.current_attempt = 10;
        assert_eq!(helper.calculate_next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_policy_from_period() {
        let policy = ReconnectPolicy::from_period(Duration::from_secs(30));
        assert_eq!(policy.max_attempts, 0);
        assert_eq!(policy.initial_delay, Duration::from_secs(30));
        assert_eq!(policy.max_delay, Duration::from_secs(240));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts() {
        let mut helper = ReconnectHelper::new(fixed_policy(2));
        let cancel = CancellationToken::new();
        let failing = || async { Err::<(), _>(GatewaySrvError::connection("refused")) };

        assert!(helper.execute_reconnect(failing, &cancel).await.is_err());
        assert!(helper.execute_reconnect(failing, &cancel).await.is_err());
        assert_eq!(
            helper.execute_reconnect(failing, &cancel).await,
            Err(ReconnectError::MaxAttemptsExceeded)
        );
        assert_eq!(helper.connection_state(), ConnectionState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_connected() {
        let mut helper = ReconnectHelper::new(fixed_policy(0));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let value = helper
            .connect_with_retry(
                || {
                    let calls = calls.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                            Err(GatewaySrvError::timeout("no answer"))
                        } else {
                            Ok(42)
                        }
                    }
                },
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(helper.connection_state(), ConnectionState::Connected);
        assert_eq!(helper.current_attempt(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let mut helper = ReconnectHelper::new(ReconnectPolicy::from_period(Duration::from_secs(3600)));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let result = helper
            .connect_with_retry(
                || async { Err::<(), _>(GatewaySrvError::connection("refused")) },
                &cancel,
            )
            .await;
        assert_eq!(result, Err(ReconnectError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_retrying() {
        let mut helper = ReconnectHelper::new(fixed_policy(0));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let result = helper
            .connect_with_retry(
                || {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>(GatewaySrvError::config("Unknown protocol: profibus"))
                    }
                },
                &cancel,
            )
            .await;

        assert_eq!(
            result,
            Err(ReconnectError::Rejected {
                code: "GATEWAYSRV_CONFIG_ERROR",
                message: "Configuration error: Unknown protocol: profibus".to_string(),
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(helper.connection_state(), ConnectionState::Failed);
    }
}

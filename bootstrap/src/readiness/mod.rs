//! Bounded polling of remote dependencies
//!
//! A [`ReadinessProbe`] evaluates a [`ReadinessPredicate`] until it succeeds or
//! the [`ReadinessCheck`] bounds are exhausted. The gates in [`ledger`] and
//! [`platform`] specialize it and hand out witness values that later stages
//! require, so a stage cannot start before the one it depends on.

use std::{fmt, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use log::{debug, info, warn};
use url::Url;

use crate::{clock::Clock, error::BootstrapError};

pub mod ledger;
pub mod platform;

pub use ledger::{LedgerHealth, LedgerReadinessGate, LedgerReady};
pub use platform::{
    CliPlatformInitializer, LoaderProgramCheck, PlatformInitializer, PlatformReadinessGate,
    PlatformReady,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Https,
    Ws,
    Postgres,
    Tcp,
}

impl Protocol {
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "ws" | "wss" => Some(Self::Ws),
            "postgres" | "postgresql" => Some(Self::Postgres),
            "tcp" => Some(Self::Tcp),
            _ => None,
        }
    }
}

/// Address of a remote service, fixed once parsed from configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    url: Url,
    protocol: Protocol,
}

impl ServiceEndpoint {
    pub fn parse(value: &str) -> Result<Self, BootstrapError> {
        let url = Url::parse(value.trim()).map_err(|e| {
            BootstrapError::configuration(format!("invalid endpoint '{}': {}", value, e))
        })?;
        let protocol = Protocol::from_scheme(url.scheme()).ok_or_else(|| {
            BootstrapError::configuration(format!(
                "unsupported scheme '{}' in endpoint '{}'",
                url.scheme(),
                value
            ))
        })?;
        if url.host_str().is_none() {
            return Err(BootstrapError::configuration(format!(
                "endpoint '{}' has no host",
                value
            )));
        }

        Ok(Self { url, protocol })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl FromStr for ServiceEndpoint {
    type Err = BootstrapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ServiceEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Polling policy for one dependency.
///
/// With neither bound set the probe makes exactly one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessCheck {
    pub target: ServiceEndpoint,
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    pub max_duration: Option<Duration>,
}

impl ReadinessCheck {
    pub fn once(target: ServiceEndpoint, interval: Duration) -> Self {
        Self {
            target,
            interval,
            max_attempts: None,
            max_duration: None,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = Some(max_duration);
        self
    }

    pub fn validate(&self) -> Result<(), BootstrapError> {
        if self.interval.is_zero() {
            return Err(BootstrapError::configuration(format!(
                "polling interval for {} must be greater than zero",
                self.target
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(BootstrapError::configuration(format!(
                "max attempts for {} must be at least 1",
                self.target
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Unknown,
    Polling,
    Ready,
    Failed,
}

impl ReadinessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Failed)
    }
}

/// Successful poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Condition polled by a probe. An `Err(Configuration)` stops polling at once.
#[async_trait]
pub trait ReadinessPredicate: Send + Sync {
    async fn evaluate(&self, target: &ServiceEndpoint) -> Result<(), BootstrapError>;
}

pub struct ReadinessProbe {
    clock: Arc<dyn Clock>,
}

impl ReadinessProbe {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn poll<P>(
        &self,
        check: &ReadinessCheck,
        predicate: &P,
    ) -> Result<ProbeOutcome, BootstrapError>
    where
        P: ReadinessPredicate + ?Sized,
    {
        check.validate()?;

        let start = self.clock.now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            let error = match predicate.evaluate(&check.target).await {
                Ok(()) => {
                    let outcome = ProbeOutcome {
                        attempts,
                        elapsed: self.clock.now() - start,
                    };
                    info!(
                        "✅ {} ready after {} attempt(s) ({:?})",
                        check.target, outcome.attempts, outcome.elapsed
                    );
                    return Ok(outcome);
                }
                Err(e) if e.is_configuration() => {
                    warn!("{} failed with a fatal error, not retrying: {}", check.target, e);
                    return Err(e);
                }
                Err(e) => e,
            };

            let elapsed = self.clock.now() - start;
            let out_of_attempts = check.max_attempts.map_or(false, |max| attempts >= max);
            // The next attempt would start at or past the deadline
            let out_of_time = check
                .max_duration
                .map_or(false, |max| elapsed.saturating_add(check.interval) >= max);
            let unbounded = check.max_attempts.is_none() && check.max_duration.is_none();

            if out_of_attempts || out_of_time || unbounded {
                warn!(
                    "❌ {} not ready after {} attempt(s) ({:?}): {}",
                    check.target, attempts, elapsed, error
                );
                return Err(BootstrapError::Exhausted {
                    attempts,
                    elapsed,
                    last_error: Box::new(error),
                });
            }

            debug!(
                "{} not ready (attempt {}): {}; retrying in {:?}",
                check.target, attempts, error, check.interval
            );
            self.clock.sleep(check.interval).await;
        }
    }
}

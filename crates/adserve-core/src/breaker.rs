//! Per-dependency admission control: timeout, concurrency cap, circuit breaker.
//!
//! Every outbound call (store query, ad network request) runs through a named
//! [`Breaker`]. The breaker fails fast instead of queueing when the dependency
//! is saturated or has been failing, so a slow dependency costs one timeout
//! per request at most and an unhealthy one costs nothing.
//!
//! State machine:
//!
//! - `Closed`: calls pass. `failure_threshold` consecutive failures open it.
//! - `Open`: calls fail with [`BreakerError::Open`] until `cool_down` elapses.
//! - `HalfOpen`: calls pass; the first success closes, the first failure
//!   reopens.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;
use tokio::time::error::Elapsed;
use tracing::{info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BreakerError {
    #[error("circuit {0} is open")]
    Open(String),

    #[error("circuit {0} is at its concurrency limit")]
    Saturated(String),

    #[error("circuit {name} timed out after {after:?}")]
    Timeout { name: String, after: Duration },
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub name: String,
    pub timeout: Duration,
    pub max_concurrent: usize,
    pub failure_threshold: u32,
    pub cool_down: Duration,
}

impl BreakerConfig {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
            max_concurrent: 100,
            failure_threshold: 20,
            cool_down: Duration::from_secs(5),
        }
    }

    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_cool_down(mut self, cool_down: Duration) -> Self {
        self.cool_down = cool_down;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Open => f.write_str("open"),
            Self::HalfOpen => f.write_str("half-open"),
        }
    }
}

#[derive(Debug)]
struct Circuit {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

pub struct Breaker {
    config: BreakerConfig,
    permits: Arc<Semaphore>,
    circuit: Mutex<Circuit>,
}

impl Breaker {
    pub fn new(config: BreakerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent));
        Self {
            config,
            permits,
            circuit: Mutex::new(Circuit {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    /// Run `call` under the breaker.
    ///
    /// Rejections and timeouts are converted into the caller's error type so
    /// the breaker stays invisible to callers that only log failures.
    pub async fn call<T, E, F>(&self, call: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<BreakerError>,
    {
        self.call_classified(call, |_| true).await
    }

    /// Like [`call`](Self::call), but only errors for which `counts` returns
    /// true are charged to the circuit. Other errors prove the dependency
    /// answered and count as successes.
    pub async fn call_classified<T, E, F, P>(&self, call: F, counts: P) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<BreakerError>,
        P: FnOnce(&E) -> bool,
    {
        self.admit()?;
        let _permit = self.acquire()?;
        let outcome = tokio::time::timeout(self.config.timeout, call).await;
        self.settle(outcome, counts)
    }

    /// Run blocking `work` on the blocking pool under the breaker.
    ///
    /// The concurrency permit moves into the worker, so a call that times out
    /// keeps its slot until the work itself returns.
    pub async fn call_blocking<T, E, W, P>(&self, work: W, counts: P) -> Result<T, E>
    where
        W: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: From<BreakerError> + From<JoinError> + Send + 'static,
        P: FnOnce(&E) -> bool,
    {
        self.admit()?;
        let permit = self.acquire()?;
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        });
        let outcome = tokio::time::timeout(self.config.timeout, task)
            .await
            .map(|joined| {
                joined
                    .map_err(<E as From<JoinError>>::from)
                    .and_then(|result| result)
            });
        self.settle(outcome, counts)
    }

    fn acquire(&self) -> Result<OwnedSemaphorePermit, BreakerError> {
        Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| BreakerError::Saturated(self.config.name.clone()))
    }

    fn settle<T, E, P>(&self, outcome: Result<Result<T, E>, Elapsed>, counts: P) -> Result<T, E>
    where
        E: From<BreakerError>,
        P: FnOnce(&E) -> bool,
    {
        match outcome {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(e)) => {
                if counts(&e) {
                    self.record_failure();
                } else {
                    self.record_success();
                }
                Err(e)
            }
            Err(_) => {
                self.record_failure();
                Err(BreakerError::Timeout {
                    name: self.config.name.clone(),
                    after: self.config.timeout,
                }
                .into())
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Circuit> {
        self.circuit.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn admit(&self) -> Result<(), BreakerError> {
        let mut circuit = self.lock();
        if circuit.state != BreakerState::Open {
            return Ok(());
        }
        let cooled = circuit
            .opened_at
            .is_none_or(|at| at.elapsed() >= self.config.cool_down);
        if cooled {
            self.transition(&mut circuit, BreakerState::HalfOpen);
            Ok(())
        } else {
            Err(BreakerError::Open(self.config.name.clone()))
        }
    }

    fn record_success(&self) {
        let mut circuit = self.lock();
        circuit.consecutive_failures = 0;
        if circuit.state != BreakerState::Closed {
            self.transition(&mut circuit, BreakerState::Closed);
        }
    }

    fn record_failure(&self) {
        let mut circuit = self.lock();
        circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
        let trip = circuit.state == BreakerState::HalfOpen
            || circuit.consecutive_failures >= self.config.failure_threshold;
        if trip && circuit.state != BreakerState::Open {
            self.transition(&mut circuit, BreakerState::Open);
        }
    }

    fn transition(&self, circuit: &mut Circuit, to: BreakerState) {
        let from = circuit.state;
        circuit.state = to;
        match to {
            BreakerState::Open => {
                circuit.opened_at = Some(Instant::now());
                warn!(
                    breaker = %self.config.name,
                    %from,
                    failures = circuit.consecutive_failures,
                    "circuit opened"
                );
            }
            BreakerState::HalfOpen => {
                info!(breaker = %self.config.name, %from, "circuit half-open");
            }
            BreakerState::Closed => {
                circuit.opened_at = None;
                info!(breaker = %self.config.name, %from, "circuit closed");
            }
        }
    }
}

impl fmt::Debug for Breaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breaker")
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

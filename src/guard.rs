use crate::clock::{Clock, TokioClock};
use crate::error::{Error, Rejection};
use crate::ledger::{ClaimId, Ledger};
use crate::model::{Config, Token, TokenStatus};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

#[cfg(feature = "tracing")]
use tracing::{debug, info, instrument, warn};

// No-op macros when tracing is disabled
#[cfg(not(feature = "tracing"))]
macro_rules! debug {
    ($($tt:tt)*) => {{}};
}
#[cfg(not(feature = "tracing"))]
macro_rules! info {
    ($($tt:tt)*) => {{}};
}
#[cfg(not(feature = "tracing"))]
macro_rules! warn {
    ($($tt:tt)*) => {{}};
}

/// Runs an operation at most once per single-use token.
///
/// Concurrent calls for a token that is already running fail with
/// [`Error::InProgress`]; calls for a token that already succeeded fail with
/// [`Error::AlreadyUsed`] until the retention window elapses. A failed,
/// cancelled or panicking operation leaves the token free to be retried.
#[derive(Debug)]
pub struct IdempotencyGuard {
    ledger: Mutex<Ledger>,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl IdempotencyGuard {
    /// Create a guard that measures retention with the tokio clock
    pub fn new(config: Config) -> Self {
        Self::with_clock(config, Arc::new(TokioClock))
    }

    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Self {
        Self {
            ledger: Mutex::new(Ledger::new()),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `operation` unless `token` is in flight or was recently used.
    ///
    /// Rejections return without invoking `operation`. Otherwise the
    /// operation runs in the caller's task and its result is returned as is,
    /// with failures wrapped in [`Error::Operation`]. Dropping the returned
    /// future before it resolves releases the token.
    pub async fn run<T, E, F, Fut>(
        &self,
        token: impl Into<Token>,
        operation: F,
    ) -> Result<T, Error<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let token = token.into();
        if token.is_empty() {
            debug!("Empty token - rejecting");
            return Err(Error::EmptyToken);
        }
        self.run_token(token, operation).await
    }

    #[cfg_attr(feature = "tracing", instrument(skip(self, operation)))]
    async fn run_token<T, E, F, Fut>(&self, token: Token, operation: F) -> Result<T, Error<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let claim = self.claim(token).map_err(Rejection::into_error)?;

        match operation().await {
            Ok(value) => {
                claim.complete();
                Ok(value)
            }
            Err(err) => {
                claim.release();
                Err(Error::Operation(err))
            }
        }
    }

    /// Report where `token` is in its lifecycle
    pub fn status(&self, token: impl Into<Token>) -> TokenStatus {
        let now = self.clock.now();
        self.ledger().status(&token.into(), now)
    }

    /// Forget all tokens, in flight and completed.
    ///
    /// Meant for test harnesses. Operations still running finish normally
    /// but no longer record their outcome.
    pub fn reset(&self) {
        self.ledger().clear();
        info!("Guard state reset");
    }

    /// Drop completed tokens whose retention window has elapsed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let purged = self.ledger().purge_expired(now);
        if purged > 0 {
            debug!("Purged {} expired tokens", purged);
        }
        purged
    }

    pub fn in_flight_len(&self) -> usize {
        self.ledger().in_flight_len()
    }

    pub fn completed_len(&self) -> usize {
        self.ledger().completed_len()
    }

    fn claim(&self, token: Token) -> Result<Claim<'_>, Rejection> {
        let now = self.clock.now();
        let claimed = self.ledger().try_claim(&token, now);
        match claimed {
            Ok(id) => {
                debug!("Token claimed");
                Ok(Claim {
                    guard: self,
                    token,
                    id,
                    settled: false,
                })
            }
            Err(Rejection::AlreadyUsed) => {
                debug!("Token already used - rejecting");
                Err(Rejection::AlreadyUsed)
            }
            Err(Rejection::InProgress) => {
                debug!("Token exchange in progress - rejecting");
                Err(Rejection::InProgress)
            }
        }
    }

    // The ledger is only mutated in single calls that cannot panic halfway,
    // so a poisoned lock still guards consistent state
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for IdempotencyGuard {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

/// In-flight ownership of a token. Releases the token when dropped unsettled.
struct Claim<'a> {
    guard: &'a IdempotencyGuard,
    token: Token,
    id: ClaimId,
    settled: bool,
}

impl Claim<'_> {
    // Unsettled until the ledger has recorded the outcome, so a panic in
    // here still releases the token on drop
    fn complete(mut self) {
        let expires_at = expiry_after(self.guard.clock.now(), self.guard.config.retention);
        let recorded = self.guard.ledger().complete(&self.token, self.id, expires_at);
        self.settled = true;
        if recorded {
            info!(
                "Token exchanged - rejecting replays for {:?}",
                self.guard.config.retention
            );
        } else {
            debug!("Claim went stale during reset - outcome not recorded");
        }
    }

    fn release(mut self) {
        self.guard.ledger().release(&self.token, self.id);
        self.settled = true;
        warn!("Operation failed - token released for retry");
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.settled && self.guard.ledger().release(&self.token, self.id) {
            warn!("Operation abandoned before completion - token released");
        }
    }
}

/// `now + retention`, shrinking the window until it fits the clock's range
fn expiry_after(now: Instant, retention: Duration) -> Instant {
    let mut window = retention;
    loop {
        if let Some(expires_at) = now.checked_add(window) {
            return expires_at;
        }
        window /= 2;
    }
}

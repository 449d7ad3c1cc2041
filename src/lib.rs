//! Lethe - A library for exchanging single-use tokens exactly once
//!
//! Named after the river of forgetfulness, Lethe guards one-time tokens such as
//! OAuth authorization codes against concurrent and replayed use within a
//! single process. The first caller for a token runs the exchange; concurrent
//! callers are turned away with [`Error::InProgress`], replays of a successful
//! exchange with [`Error::AlreadyUsed`], and the guard forgets a used token once
//! its retention window elapses.
//!
//! # Example
//!
//! ```no_run
//! use lethe_rs::{Config, Error, IdempotencyGuard};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn exchange_code(code: &str) -> Result<String, std::io::Error> {
//! #     Ok(format!("session-for-{}", code.len()))
//! # }
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // One guard per process, shared by every request handler
//! let guard = Arc::new(IdempotencyGuard::new(Config::new(Duration::from_secs(300))));
//!
//! let code = "4/0AX4XfWh";
//! match guard.run(code, || exchange_code(code)).await {
//!     Ok(session) => println!("signed in: {}", session),
//!     Err(Error::InProgress) => println!("exchange already running, try again shortly"),
//!     Err(Error::AlreadyUsed) => println!("code already used"),
//!     Err(err) => return Err(err.into()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod error;
pub mod guard;
mod ledger;
pub mod model;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, TokioClock};
pub use error::Error;
pub use guard::IdempotencyGuard;
pub use lethe_macros::run_once;
pub use model::{Config, Token, TokenStatus, DEFAULT_RETENTION};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Default time a successfully exchanged token is remembered
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// Opaque single-use identifier, such as an OAuth authorization code.
///
/// Tokens are credentials, so `Debug` and `Display` never print the value.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token(Arc<str>);

impl Token {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(<redacted {} bytes>)", self.0.len())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl AsRef<str> for Token {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Token {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&String> for Token {
    fn from(value: &String) -> Self {
        Self(Arc::from(value.as_str()))
    }
}

impl From<String> for Token {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// Current state of a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// Never seen, failed, or forgotten after the retention window
    Absent,
    /// An operation is running for this token
    InFlight { since: Instant },
    /// Exchanged successfully; replays are rejected until `expires_at`
    Completed { expires_at: Instant },
}

impl TokenStatus {
    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::InFlight { .. })
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// Configuration for an [`IdempotencyGuard`](crate::IdempotencyGuard)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How long a successfully exchanged token keeps being rejected
    pub retention: Duration,
}

impl Config {
    pub fn new(retention: Duration) -> Self {
        Self { retention }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retention: DEFAULT_RETENTION,
        }
    }
}

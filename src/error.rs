use thiserror::Error;

/// Failure of [`IdempotencyGuard::run`](crate::IdempotencyGuard::run).
///
/// `E` is the error type of the guarded operation. Rejections raised by the
/// guard itself never carry an `E`.
#[derive(Error, Debug)]
pub enum Error<E> {
    /// The token was exchanged successfully within the retention window.
    /// Do not retry with the same token.
    #[error("token has already been used")]
    AlreadyUsed,

    /// Another exchange for this token is still running. Back off and retry.
    #[error("token exchange already in progress")]
    InProgress,

    /// The caller passed an empty token; nothing was run.
    #[error("token must not be empty")]
    EmptyToken,

    /// The guarded operation failed; its error is passed through untouched.
    #[error(transparent)]
    Operation(E),
}

impl<E> Error<E> {
    /// True when the guard refused to invoke the operation.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Operation(_))
    }

    /// True when the same token may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::InProgress | Self::Operation(_))
    }

    /// The operation's own error, if that is what failed.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(err) => Some(err),
            _ => None,
        }
    }
}

/// Why the ledger refused a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Rejection {
    AlreadyUsed,
    InProgress,
}

impl Rejection {
    pub(crate) fn into_error<E>(self) -> Error<E> {
        match self {
            Self::AlreadyUsed => Error::AlreadyUsed,
            Self::InProgress => Error::InProgress,
        }
    }
}

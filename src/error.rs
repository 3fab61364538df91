//! Hand-written error types, following the teacher's own split: programmer
//! errors (send-after-close, waitgroup underflow, ...) are panics per
//! SPEC_FULL.md §7, while everything else recoverable gets a real
//! `std::error::Error` impl, built by hand rather than via a derive crate —
//! matching `rayon-core`'s own `ThreadPoolBuildError`/`ErrorKind`, which has
//! no `thiserror` dependency to lean on either.

use std::error::Error;
use std::fmt;

/// Why [`crate::FabricBuilder::build`](crate::fabric::FabricBuilder::build) failed.
#[derive(Debug)]
pub struct FabricBuildError {
    kind: ErrorKind,
}

#[derive(Debug)]
enum ErrorKind {
    GlobalFabricAlreadyInitialized,
    SpawnFailed(std::io::Error),
}

impl FabricBuildError {
    pub(crate) fn new(kind: ErrorKind) -> Self {
        FabricBuildError { kind }
    }

    pub(crate) fn global_already_initialized() -> Self {
        FabricBuildError::new(ErrorKind::GlobalFabricAlreadyInitialized)
    }

    pub(crate) fn spawn_failed(err: std::io::Error) -> Self {
        FabricBuildError::new(ErrorKind::SpawnFailed(err))
    }
}

impl fmt::Display for FabricBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::GlobalFabricAlreadyInitialized => {
                write!(f, "the global fabric has already been initialized")
            }
            ErrorKind::SpawnFailed(err) => write!(f, "failed to spawn worker thread: {}", err),
        }
    }
}

impl Error for FabricBuildError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            ErrorKind::SpawnFailed(err) => Some(err),
            ErrorKind::GlobalFabricAlreadyInitialized => None,
        }
    }
}

/// Returned by [`Chan::try_send`](crate::channel::Chan::try_send).
#[derive(Debug, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The channel is at capacity; the value is handed back.
    Full(T),
    /// The channel is closed; the value is handed back.
    Closed(T),
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "channel is full"),
            TrySendError::Closed(_) => write!(f, "channel is closed"),
        }
    }
}

impl<T: fmt::Debug> Error for TrySendError<T> {}

/// Returned by [`Chan::try_recv`](crate::channel::Chan::try_recv).
#[derive(Debug, PartialEq, Eq)]
pub enum TryRecvError {
    /// The channel is empty but still open.
    Empty,
    /// The channel is empty and closed; no more values will ever arrive.
    Closed,
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryRecvError::Empty => write!(f, "channel is empty"),
            TryRecvError::Closed => write!(f, "channel is empty and closed"),
        }
    }
}

impl Error for TryRecvError {}

/// Returned by the non-blocking `try_lock` family on [`crate::sync::Mutex`]
/// and [`crate::sync::RwMutex`].
#[derive(Debug, PartialEq, Eq)]
pub struct TryLockError {
    pub(crate) name: &'static str,
}

impl fmt::Display for TryLockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mutex `{}` is currently locked", self.name)
    }
}

impl Error for TryLockError {}

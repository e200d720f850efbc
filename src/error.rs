use crate::resource::ResourceKey;
use crate::store::StoreError;

use std::fmt::{self, Display};

/// Whether the runner should try a failed reconcile again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Transient failure. The key gets re-queued with backoff.
    Retryable,
    /// Retrying won't help until something about the resource changes. The failure is
    /// reported, and the key is only reconciled again when a new event arrives.
    Permanent,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Retryable => "retryable",
            ErrorKind::Permanent => "permanent",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum ReconcileError {
    Store(StoreError),
    /// The last-applied snapshot annotation could not be decoded
    CorruptSnapshot {
        key: ResourceKey,
        source: serde_json::Error,
    },
    /// The snapshot could not be encoded
    Encode(serde_json::Error),
    /// The companion namespace name derived from a Test resource isn't a valid namespace name
    InvalidCompanionName(String),
    /// No reconciler is registered for the kind of resource
    UnknownKind(String),
    /// The reconciler panicked
    Panicked(String),
}

impl ReconcileError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReconcileError::Store(e) if e.is_retryable() => ErrorKind::Retryable,
            _ => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Retryable
    }
}

impl Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ReconcileError::Store(e) => write!(f, "Store error: {}", e),
            ReconcileError::CorruptSnapshot { key, source } => write!(
                f,
                "Corrupt last-applied snapshot on '{}': {}",
                key, source
            ),
            ReconcileError::Encode(e) => write!(f, "Failed to encode snapshot: {}", e),
            ReconcileError::InvalidCompanionName(name) => {
                write!(f, "'{}' is not a valid namespace name", name)
            }
            ReconcileError::UnknownKind(kind) => {
                write!(f, "No reconciler is registered for {}", kind)
            }
            ReconcileError::Panicked(msg) => write!(f, "Reconciler panicked: {}", msg),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ReconcileError::Store(e) => Some(e as &(dyn std::error::Error + 'static)),
            ReconcileError::CorruptSnapshot { source, .. } => {
                Some(source as &(dyn std::error::Error + 'static))
            }
            ReconcileError::Encode(e) => Some(e as &(dyn std::error::Error + 'static)),
            _ => None,
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> ReconcileError {
        ReconcileError::Store(e)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transient_store_errors_are_retryable() {
        let key = ResourceKey::cluster_scoped("alpha");
        for err in vec![
            StoreError::Conflict(key.clone()),
            StoreError::Cancelled,
            StoreError::DeadlineExceeded,
            StoreError::Unavailable("connection refused".to_owned()),
        ] {
            assert_eq!(ErrorKind::Retryable, ReconcileError::from(err).kind());
        }
    }

    #[test]
    fn corrupt_snapshots_and_invalid_names_are_permanent() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let corrupt = ReconcileError::CorruptSnapshot {
            key: ResourceKey::cluster_scoped("alpha"),
            source,
        };
        assert_eq!(ErrorKind::Permanent, corrupt.kind());
        assert!(!ReconcileError::InvalidCompanionName("a.b".to_owned()).is_retryable());
        assert!(!ReconcileError::from(StoreError::Rejected("bad".to_owned())).is_retryable());
    }
}

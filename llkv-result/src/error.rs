use std::{fmt, io};
use thiserror::Error;

/// Unified error type for the table store.
///
/// Every fallible operation across the workspace returns this enum. The variants are
/// grouped by how a caller is expected to react: input errors are surfaced as-is,
/// commit conflicts may be retried after re-planning against the newest snapshot, and
/// storage faults are reported after the commit protocol has guaranteed that nothing
/// was published.
///
/// # Thread Safety
///
/// `Error` is `Send + Sync`, so it can be returned from rayon workers that encode data
/// files in parallel.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error raised by a storage backend.
    ///
    /// Typical sources are the filesystem pager (permission denied, disk full) or an
    /// injected fault in tests. When this surfaces from a commit, the snapshot chain
    /// is unchanged: the new snapshot either became fully visible or not at all.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow error while building, slicing, or converting record batches.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Invalid user input or API parameter.
    ///
    /// Raised for schema mismatches on write, unknown table options, malformed table
    /// schemas, and row kinds the table's merge policy cannot accept.
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    /// A partition specification names a key that is not a partition key, or carries
    /// a value that cannot be coerced to the key's declared type.
    ///
    /// # Recovery
    ///
    /// Not retryable. Fix the specification and resubmit.
    #[error("invalid partition spec: {0}")]
    InvalidPartitionSpec(String),

    /// A concurrent commit made this change set stale.
    ///
    /// Overwrite change sets computed against an older snapshot are never applied
    /// silently; the caller re-enumerates against the new latest snapshot and tries
    /// again. Append change sets only surface this once their retries are exhausted.
    #[error("commit conflict: {0}")]
    CommitConflict(String),

    /// A snapshot, schema, manifest, or data file does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Internal error indicating a bug or corrupted metadata.
    ///
    /// The message includes details about the violated invariant. Decode failures of
    /// persisted metadata also land here.
    #[error("An internal operation failed: {0}")]
    Internal(String),
}

impl Error {
    /// Create an internal error from any displayable error, prefixed with context.
    ///
    /// # Examples
    ///
    /// ```
    /// use llkv_result::Error;
    ///
    /// let err = Error::internal("decode snapshot", "unexpected end of input");
    /// assert!(matches!(err, Error::Internal(msg) if msg.starts_with("decode snapshot")));
    /// ```
    #[inline]
    pub fn internal<E: fmt::Display>(context: &str, err: E) -> Self {
        Error::Internal(format!("{context}: {err}"))
    }

    /// Whether re-planning against the latest snapshot may make the operation succeed.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::CommitConflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_conflicts_are_retryable() {
        assert!(Error::CommitConflict("stale base".into()).is_retryable());
        assert!(!Error::InvalidPartitionSpec("bad".into()).is_retryable());
        assert!(!Error::NotFound("snapshot-3".into()).is_retryable());
        assert!(!Error::Io(io::Error::other("disk")).is_retryable());
    }

    #[test]
    fn test_display_messages() {
        let err = Error::NotFound("snapshot 7".into());
        assert_eq!(err.to_string(), "not found: snapshot 7");

        let err = Error::InvalidPartitionSpec("unknown partition key 'x'".into());
        assert_eq!(
            err.to_string(),
            "invalid partition spec: unknown partition key 'x'"
        );
    }
}

//! Core type definitions for the table store.

use llkv_result::{Error, Result};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of a committed snapshot. Dense and strictly increasing from 1.
pub type SnapshotId = u64;

/// Identifier of a persisted table schema version.
pub type SchemaId = u64;

/// Shard index within a partition.
pub type BucketId = u32;

/// Name of the system column carrying each row's write sequence number.
pub const SEQUENCE_NUMBER_COLUMN: &str = "_sequence_number";

/// Name of the system column carrying each row's [`RowKind`].
pub const ROW_KIND_COLUMN: &str = "_row_kind";

/// Commit identifier recorded for one-shot batch commits.
pub const BATCH_COMMIT_IDENTIFIER: u64 = u64::MAX;

/// Nature of the change a snapshot applied to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, bitcode::Encode, bitcode::Decode)]
pub enum CommitKind {
    /// Only added files.
    Append,
    /// Removed files, possibly without replacing them.
    Overwrite,
    /// Replaced files with files holding the same logical rows.
    Compact,
}

impl CommitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitKind::Append => "APPEND",
            CommitKind::Overwrite => "OVERWRITE",
            CommitKind::Compact => "COMPACT",
        }
    }
}

impl fmt::Display for CommitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Change type of a row.
///
/// Stored as the `Int8` system column [`ROW_KIND_COLUMN`] in every data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i8)]
pub enum RowKind {
    #[default]
    Insert = 0,
    UpdateBefore = 1,
    UpdateAfter = 2,
    Delete = 3,
}

impl RowKind {
    /// Short form used when rendering rows, e.g. `+I`.
    pub fn short_string(&self) -> &'static str {
        match self {
            RowKind::Insert => "+I",
            RowKind::UpdateBefore => "-U",
            RowKind::UpdateAfter => "+U",
            RowKind::Delete => "-D",
        }
    }

    /// Whether the row adds a version (`+I` / `+U`) rather than retracting one.
    pub fn is_add(&self) -> bool {
        matches!(self, RowKind::Insert | RowKind::UpdateAfter)
    }

    pub fn to_byte(self) -> i8 {
        self as i8
    }

    pub fn from_byte(value: i8) -> Result<Self> {
        match value {
            0 => Ok(RowKind::Insert),
            1 => Ok(RowKind::UpdateBefore),
            2 => Ok(RowKind::UpdateAfter),
            3 => Ok(RowKind::Delete),
            other => Err(Error::Internal(format!("unknown row kind byte {other}"))),
        }
    }
}

impl fmt::Display for RowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_string())
    }
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_kind_byte_roundtrip() {
        for kind in [
            RowKind::Insert,
            RowKind::UpdateBefore,
            RowKind::UpdateAfter,
            RowKind::Delete,
        ] {
            assert_eq!(RowKind::from_byte(kind.to_byte()).unwrap(), kind);
        }
        assert!(RowKind::from_byte(9).is_err());
    }

    #[test]
    fn test_commit_kind_tokens() {
        assert_eq!(CommitKind::Append.to_string(), "APPEND");
        assert_eq!(CommitKind::Overwrite.to_string(), "OVERWRITE");
        assert_eq!(CommitKind::Compact.as_str(), "COMPACT");
    }
}

use crate::error::Error;

/// Result alias returned by every fallible table-store operation.
pub type Result<T> = std::result::Result<T, Error>;

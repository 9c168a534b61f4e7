//! Error types and result definitions for the LLKV table store.
//!
//! All crates in the workspace share a single error enum ([`Error`]) and the
//! [`Result<T>`] alias, so errors propagate across crate boundaries with `?`.
//!
//! # Error Categories
//!
//! - **Input errors** ([`Error::InvalidArgumentError`], [`Error::InvalidPartitionSpec`]):
//!   surfaced to the caller immediately, never retried
//! - **Concurrency** ([`Error::CommitConflict`]): retryable by re-planning against the
//!   latest snapshot
//! - **Storage faults** ([`Error::Io`]): reported after the commit is rolled back to
//!   "not applied"
//! - **Lookup failures** ([`Error::NotFound`]): missing snapshots, schemas, or files
//! - **Data format errors** ([`Error::Arrow`]) and **internal errors** ([`Error::Internal`])

pub mod error;
pub mod result;

pub use error::Error;
pub use result::Result;

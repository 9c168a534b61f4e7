//! Blob storage for the LLKV table store.
//!
//! The [`pager::Pager`] trait is the only storage abstraction the engine sees:
//! batch get/put of whole blobs addressed by slash-separated keys, an atomic
//! create-if-absent used to publish snapshots, deletion, and prefix listing.

pub mod pager;
pub mod types;

pub use types::{PhysicalKey, join_key};

// ivr-aio/src/lib.rs
//! Filesystem and checksum primitives shared by the cache store, retriever and
//! filesystem repositories.

pub mod checksum;
pub mod fs;

pub use checksum::{sha256_file, sha256_hex, verify_checksum, ContentHasher};
pub use fs::*;

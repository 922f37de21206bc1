#![forbid(unsafe_code)]

//! On-disk storage: one append-only log per feed, plus a content-addressed
//! blob pool shared across all of them.

mod error;
mod log;
mod repository;

pub use error::{LogError, RepoError};
pub use log::{Log, ENTRY_LEN, HEADER_LEN};
pub use repository::Repository;

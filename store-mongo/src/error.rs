//! Error bridging from the `mongodb`/`bson` driver into `RepoError`.
//!
//! Due to Rust's orphan rules, `From<mongodb::error::Error> for RepoError`
//! can't be implemented in `store-core`. Use `.into_repo_error()` instead.

use mongodb::error::{ErrorKind, WriteFailure};
use store_core::error::RepoError;

const DUPLICATE_KEY_CODE: i32 = 11000;

pub trait MongoErrorExt {
    fn into_repo_error(self) -> RepoError;
}

impl MongoErrorExt for mongodb::error::Error {
    fn into_repo_error(self) -> RepoError {
        RepoError::backend(self)
    }
}

impl MongoErrorExt for bson::ser::Error {
    fn into_repo_error(self) -> RepoError {
        RepoError::backend(self)
    }
}

impl MongoErrorExt for bson::de::Error {
    fn into_repo_error(self) -> RepoError {
        RepoError::backend(self)
    }
}

/// Whether a driver error is a duplicate-key violation (code 11000),
/// surfaced separately because `insert_one`'s existing-document check and
/// `insert_many`'s per-index write-error classification both need it.
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == DUPLICATE_KEY_CODE,
        ErrorKind::BulkWrite(bulk) => bulk.write_errors.iter().any(|e| e.code == DUPLICATE_KEY_CODE),
        _ => false,
    }
}

#[derive(Debug)]
pub struct DuplicateIdentity(pub String);

impl std::fmt::Display for DuplicateIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "identity {:?} already exists (including soft-deleted documents)", self.0)
    }
}

impl std::error::Error for DuplicateIdentity {}

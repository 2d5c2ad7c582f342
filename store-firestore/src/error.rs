//! Error bridging from the `firestore`/`gcloud-sdk` crates into
//! `RepoError`. Orphan rules prevent a blanket `From` impl across crates,
//! so callers use `.into_repo_error()` instead, mirroring `MongoErrorExt`.

use store_core::error::RepoError;

pub trait FirestoreErrorExt {
    fn into_repo_error(self) -> RepoError;
}

impl FirestoreErrorExt for firestore::errors::FirestoreError {
    fn into_repo_error(self) -> RepoError {
        RepoError::backend(self)
    }
}

impl FirestoreErrorExt for gcloud_sdk::error::Error {
    fn into_repo_error(self) -> RepoError {
        RepoError::backend(self)
    }
}

impl FirestoreErrorExt for tonic::Status {
    fn into_repo_error(self) -> RepoError {
        RepoError::backend(StatusError(self))
    }
}

/// `tonic::Status` doesn't implement `std::error::Error`, so it's wrapped
/// before reaching `RepoError::backend`.
#[derive(Debug)]
struct StatusError(tonic::Status);

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "firestore rpc error: {}", self.0)
    }
}

impl std::error::Error for StatusError {}

/// Whether a status represents the document already existing — Firestore's
/// analog of Mongo's duplicate-key error, used by `insert_one` to
/// implement the "error on id collision" create policy (`ALREADY_EXISTS`
/// from the `current_document.exists = false` precondition on a create
/// write).
pub fn is_already_exists(status: &tonic::Status) -> bool {
    status.code() == tonic::Code::AlreadyExists
}

/// Mirrors `store_mongo::error::DuplicateIdentity`: signals that `insert_one`
/// hit an existing document (including a soft-deleted one) at the given id.
#[derive(Debug)]
pub struct DuplicateIdentity(pub String);

impl std::fmt::Display for DuplicateIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "identity already exists: {}", self.0)
    }
}

impl std::error::Error for DuplicateIdentity {}

/// Errors that can occur anywhere in the repository abstraction.
///
/// Construction-time validation problems, write-path contract violations,
/// and read-path contract violations all surface through this one enum so
/// that backend crates only ever need to implement `Backend(..)`.
#[derive(Debug)]
pub enum RepoError {
    /// Raised synchronously by `RepositoryConfig::resolve`. Carries the
    /// offending key/rule so a caller can fix their configuration without
    /// guessing.
    Configuration(ConfigProblem),
    /// A `set`/`unset` touched a managed or scope-bound attribute name.
    ReadonlyViolation(Vec<String>),
    /// The same attribute name appeared in both `set` and `unset`.
    SetUnsetOverlap(Vec<String>),
    /// A read filter named a scope key with a value other than the scope's,
    /// and the active policy is `Error` rather than `Empty`.
    ScopeBreach(String),
    /// `findPage` was given a cursor that does not resolve to a document
    /// visible under the current scope, or whose shape is not recognized.
    InvalidCursor(String),
    /// `createMany` did not fully succeed. Carries the identities
    /// confirmed inserted and the identities definitively not inserted.
    CreateManyPartialFailure {
        inserted_ids: Vec<String>,
        failed_ids: Vec<String>,
    },
    /// A `QueryStream` was consumed, combined, or iterated a second time.
    StreamAlreadyConsumed,
    /// Any error surfaced by the backend, propagated with context.
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl RepoError {
    /// Construct a `Backend` variant from any error type. Used by backend
    /// crates to wrap driver-specific errors without leaking the driver's
    /// error type into `store-core`.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        RepoError::Backend(Box::new(err))
    }
}

/// Specific rule violated during `RepositoryConfig::resolve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigProblem {
    DuplicateManagedKey(String),
    ReadonlyKeyInScope(String),
    NonPrimitiveScopeValue(String),
    BoundedWithoutLimit,
    BoundedOnUnsupportedBackend,
}

impl std::fmt::Display for ConfigProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigProblem::DuplicateManagedKey(k) => {
                write!(f, "key {k:?} is used by more than one managed concern (timestamps/version/soft-delete/trace)")
            }
            ConfigProblem::ReadonlyKeyInScope(k) => {
                write!(f, "scope key {k:?} is a managed/readonly attribute name")
            }
            ConfigProblem::NonPrimitiveScopeValue(k) => {
                write!(f, "scope value for {k:?} is not a string, number, or boolean")
            }
            ConfigProblem::BoundedWithoutLimit => {
                write!(f, "bounded trace strategy requires traceLimit > 0")
            }
            ConfigProblem::BoundedOnUnsupportedBackend => {
                write!(f, "bounded trace strategy requires server-side slice-on-push, which this backend does not provide")
            }
        }
    }
}

impl std::fmt::Display for RepoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepoError::Configuration(p) => write!(f, "configuration error: {p}"),
            RepoError::ReadonlyViolation(keys) => {
                write!(f, "write touched readonly attribute(s): {}", keys.join(", "))
            }
            RepoError::SetUnsetOverlap(keys) => {
                write!(f, "attribute(s) present in both set and unset: {}", keys.join(", "))
            }
            RepoError::ScopeBreach(key) => write!(f, "filter contradicts scope on key {key:?}"),
            RepoError::InvalidCursor(msg) => write!(f, "invalid cursor: {msg}"),
            RepoError::CreateManyPartialFailure { inserted_ids, failed_ids } => write!(
                f,
                "createMany partial failure: {} inserted, {} failed",
                inserted_ids.len(),
                failed_ids.len()
            ),
            RepoError::StreamAlreadyConsumed => write!(f, "query stream already consumed"),
            RepoError::Backend(err) => write!(f, "backend error: {err}"),
        }
    }
}

impl std::error::Error for RepoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RepoError::Backend(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

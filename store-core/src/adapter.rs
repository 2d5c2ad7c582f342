use crate::cursor::SortKey;
use crate::enrich::WriteDescriptor;
use crate::error::RepoError;
use crate::filter::QueryExpr;
use crate::mapping::Document;
use crate::stream::QueryStream;
use async_trait::async_trait;

/// One entity's write descriptor paired with the id it will be created
/// under. For `IdStrategy::Supplied`, the repository facade assigns the id
/// before any backend round-trip so partial-failure reporting can name
/// every position, even ones skipped after an earlier batch failure
/// (spec.md §4.7, scenario S3). For `IdStrategy::ServerGenerated`, `id` is
/// `None` and the adapter assigns one per entry.
pub struct CreateEntry {
    pub id: Option<String>,
    pub descriptor: WriteDescriptor,
}

/// Outcome of a multi-entity create. On full success `failed_ids` is empty
/// and `inserted_ids` is in input order; otherwise the repository facade
/// turns this into `RepoError::CreateManyPartialFailure`.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub inserted_ids: Vec<String>,
    pub failed_ids: Vec<String>,
}

/// Translates the neutral write descriptor and read request into a
/// specific backend's native operations. One impl per backend crate
/// (`store-mongo`, `store-firestore`); `store-core` only ever depends on
/// this trait, never on a concrete driver type.
///
/// `Repository<T, A>` is generic over `A: BackendAdapter`, not a trait
/// object — so associated types (`Transaction`, `RawHandle`) cost nothing
/// and let each backend expose its native transaction/session type and
/// raw collection handle without downcasting.
#[async_trait]
pub trait BackendAdapter: Send + Sync + 'static {
    /// The backend's native transaction/session handle.
    type Transaction: Send + Sync;
    /// The backend's native collection/handle, exposed via `raw()`.
    type RawHandle: Send + Sync;

    /// Short name used in tracing spans (`"mongo"`, `"firestore"`, ...).
    fn name(&self) -> &'static str;

    /// Whether this backend can slice an appended array server-side,
    /// required for `TraceStrategy::Bounded` (spec.md §4.1 rule (e)).
    fn supports_bounded_trace(&self) -> bool;

    /// Maximum writes per batch (spec.md §4.7).
    fn max_batch_size(&self) -> usize;

    /// Maximum identities per membership ("in") predicate chunk.
    fn max_id_chunk(&self) -> usize;

    /// The name of the backend's own internal identity field, if it is
    /// literally present as a document field (Mongo's `_id`). `None` when
    /// the backend's identity is not a document field at all (Firestore's
    /// identity is the document path, never stored alongside the data).
    /// Included in the managed-attribute set so a caller can never `set`/
    /// `unset` it (spec.md §4.1).
    fn internal_id_key(&self) -> Option<&str> {
        None
    }

    /// The underlying backend handle, for operations this trait does not
    /// cover (spec.md §6 "raw collection" escape hatch).
    fn raw(&self) -> &Self::RawHandle;

    /// `descriptor.set_on_insert`/`set` carry the full initial document
    /// (user payload plus managed timestamp/version/trace fields); backends
    /// that lack a native "set only on insert" operator (Firestore) simply
    /// merge both sections for a plain create, while Backend-D implements
    /// `create` as a single upsert against a fresh id to get `$setOnInsert`
    /// and `$currentDate` semantics natively.
    async fn insert_one(
        &self,
        id: Option<String>,
        descriptor: WriteDescriptor,
        tx: Option<&Self::Transaction>,
    ) -> Result<String, RepoError>;

    /// The adapter is responsible for chunking `entries` into
    /// `max_batch_size()`-sized batches and reporting accumulated outcome.
    async fn insert_many(
        &self,
        entries: Vec<CreateEntry>,
        tx: Option<&Self::Transaction>,
    ) -> Result<BatchOutcome, RepoError>;

    /// Look up a single document by the backend's native identity. Separate
    /// from `find_one` because the identity is not itself a queryable
    /// document field in either backend (Mongo's `_id` is addressed
    /// directly; Firestore's identity is the document path).
    async fn get_by_id(&self, id: &str) -> Result<Option<Document>, RepoError>;

    async fn find_one(&self, query: QueryExpr) -> Result<Option<(String, Document)>, RepoError>;

    async fn find(
        &self,
        query: QueryExpr,
        sort: Vec<SortKey>,
        limit: Option<usize>,
    ) -> Result<QueryStream<(String, Document)>, RepoError>;

    async fn count(&self, query: QueryExpr) -> Result<u64, RepoError>;

    /// Returns whether a document matched (and was therefore updated).
    async fn update_one(
        &self,
        id: &str,
        descriptor: &WriteDescriptor,
        tx: Option<&Self::Transaction>,
    ) -> Result<bool, RepoError>;

    /// Returns the number of documents matched. Chunked internally into
    /// `max_id_chunk()`-sized membership predicates.
    async fn update_many(
        &self,
        ids: &[String],
        descriptor: &WriteDescriptor,
        tx: Option<&Self::Transaction>,
    ) -> Result<u64, RepoError>;

    /// `descriptor` is `None` for a hard delete (soft-delete off), `Some`
    /// for the soft-delete mark-as-deleted write.
    async fn delete_one(
        &self,
        id: &str,
        descriptor: Option<&WriteDescriptor>,
        tx: Option<&Self::Transaction>,
    ) -> Result<bool, RepoError>;

    async fn delete_many(
        &self,
        ids: &[String],
        descriptor: Option<&WriteDescriptor>,
        tx: Option<&Self::Transaction>,
    ) -> Result<u64, RepoError>;

    async fn begin_transaction(&self) -> Result<Self::Transaction, RepoError>;
    async fn commit_transaction(&self, tx: Self::Transaction) -> Result<(), RepoError>;
    async fn abort_transaction(&self, tx: Self::Transaction) -> Result<(), RepoError>;
}

use crate::adapter::{BackendAdapter, CreateEntry};
use crate::config::{IdStrategy, ResolvedConfig, Scope, UserConfig};
use crate::constraints::{self, Constrained, ScopeBreachPolicy};
use crate::cursor::{after_filter, Cursor, SortKey};
use crate::enrich::{self, merge_trace_context, TraceContext, WriteDescriptor, WriteKind};
use crate::error::RepoError;
use crate::filter::{Direction, Filter, QueryExpr, Specification, Value};
use crate::mapping::{self, Document, Entity};
use crate::stream::QueryStream;
use futures_util::StreamExt;
use std::collections::BTreeSet;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Options accepted by single-entity writes.
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    pub merge_trace: Option<TraceContext>,
}

/// Options accepted by `createMany` — the merge context, if any, applies to
/// every entity in the batch.
#[derive(Clone, Debug, Default)]
pub struct CreateManyOptions {
    pub merge_trace: Option<TraceContext>,
}

/// A page of results plus an opaque cursor for the next one, `None` at the
/// end of the result set.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// The backend-agnostic, scoped repository facade. Generic over the
/// backend adapter rather than boxed, so each backend's native
/// transaction/raw-handle types flow through without downcasting.
pub struct Repository<T, A: BackendAdapter> {
    adapter: Arc<A>,
    config: Arc<ResolvedConfig>,
    scope_breach_policy: ScopeBreachPolicy,
    trace_context: Option<TraceContext>,
    transaction: Option<Arc<A::Transaction>>,
    _entity: PhantomData<fn() -> T>,
}

impl<T, A: BackendAdapter> Clone for Repository<T, A> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            config: self.config.clone(),
            scope_breach_policy: self.scope_breach_policy,
            trace_context: self.trace_context.clone(),
            transaction: self.transaction.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity, A: BackendAdapter> Repository<T, A> {
    /// Validate `user_config` against `scope` and bind an adapter. This is
    /// the only place spec.md §4.1 rules (a)-(e) are checked.
    pub fn new(
        adapter: A,
        user_config: UserConfig,
        scope: Scope,
        trace_context: Option<TraceContext>,
    ) -> Result<Self, RepoError> {
        let config =
            ResolvedConfig::resolve(user_config, scope, adapter.supports_bounded_trace(), adapter.internal_id_key())?;
        Ok(Self {
            adapter: Arc::new(adapter),
            config: Arc::new(config),
            scope_breach_policy: ScopeBreachPolicy::default(),
            trace_context,
            transaction: None,
            _entity: PhantomData,
        })
    }

    pub fn with_scope_breach_policy(mut self, policy: ScopeBreachPolicy) -> Self {
        self.scope_breach_policy = policy;
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    fn build_create_payload(&self, entity: &T) -> Result<(Option<String>, Document), RepoError> {
        let mut payload = mapping::from_entity(entity, &self.config)?;
        constraints::validate_create_scope(&payload, &self.config)?;
        for (key, value) in &self.config.scope {
            payload.insert(key.clone(), value.clone());
        }
        let id = match &self.config.id_strategy {
            IdStrategy::ServerGenerated => None,
            IdStrategy::Supplied(generate) => Some(generate()),
        };
        if self.config.mirror_id {
            if let Some(id_value) = &id {
                payload.insert(self.config.id_key.clone(), Value::from(id_value.clone()));
            }
        }
        Ok((id, payload))
    }

    fn trace_for(&self, call_override: Option<&TraceContext>) -> Option<TraceContext> {
        merge_trace_context(self.trace_context.as_ref(), call_override)
    }

    fn to_entity_view(&self, id: &str, mut doc: Document) -> Result<T, RepoError> {
        mapping::synthesize_id(&mut doc, id, &self.config);
        mapping::strip_hidden_meta(&mut doc, &self.config);
        mapping::to_entity(doc)
    }

    fn is_visible(&self, doc: &Document) -> bool {
        if let Some(key) = &self.config.soft_delete_key {
            if doc.get(key).map(|v| !v.is_null()).unwrap_or(false) {
                return false;
            }
        }
        self.config.scope.iter().all(|(key, value)| doc.get(key) == Some(value))
    }

    /// Insert a single entity, running it through the enrichment pipeline.
    /// Returns the assigned identity.
    pub async fn create(&self, entity: T, opts: WriteOptions) -> Result<String, RepoError> {
        let (id, payload) = self.build_create_payload(&entity)?;
        let trace = self.trace_for(opts.merge_trace.as_ref());
        let descriptor = enrich::compose(payload, Vec::new(), &self.config, WriteKind::Create, trace.as_ref());
        tracing::debug!(id = ?id, kind = ?WriteKind::Create, "dispatching write");
        self.adapter.insert_one(id, descriptor, self.transaction.as_deref()).await
    }

    /// Insert many entities. On full success, returns ids in input order;
    /// otherwise raises `RepoError::CreateManyPartialFailure` naming both
    /// confirmed insertions and definitively failed/skipped ones
    /// (spec.md §4.7, scenario S3).
    pub async fn create_many(&self, entities: Vec<T>, opts: CreateManyOptions) -> Result<Vec<String>, RepoError> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let trace = self.trace_for(opts.merge_trace.as_ref());
        let mut entries = Vec::with_capacity(entities.len());
        for entity in &entities {
            let (id, payload) = self.build_create_payload(entity)?;
            let descriptor = enrich::compose(payload, Vec::new(), &self.config, WriteKind::Create, trace.as_ref());
            entries.push(CreateEntry { id, descriptor });
        }
        tracing::debug!(count = entries.len(), kind = ?WriteKind::Create, "dispatching write");
        let outcome = self.adapter.insert_many(entries, self.transaction.as_deref()).await?;
        if outcome.failed_ids.is_empty() {
            Ok(outcome.inserted_ids)
        } else {
            Err(RepoError::CreateManyPartialFailure {
                inserted_ids: outcome.inserted_ids,
                failed_ids: outcome.failed_ids,
            })
        }
    }

    /// Look up a single entity by identity. Absent, out-of-scope, and
    /// soft-deleted documents all yield `Ok(None)`, never an error
    /// (spec.md §8).
    pub async fn get_by_id(&self, id: &str) -> Result<Option<T>, RepoError> {
        let Some(doc) = self.adapter.get_by_id(id).await? else {
            return Ok(None);
        };
        if !self.is_visible(&doc) {
            return Ok(None);
        }
        Ok(Some(self.to_entity_view(id, doc)?))
    }

    /// Projected variant of `get_by_id`. Returns a raw `Document` rather
    /// than `T`, since a caller asking for a subset of fields is not
    /// asking for a (possibly unparseable) partial `T`.
    pub async fn get_by_id_projected(&self, id: &str, fields: &[String]) -> Result<Option<Document>, RepoError> {
        let Some(mut doc) = self.adapter.get_by_id(id).await? else {
            return Ok(None);
        };
        if !self.is_visible(&doc) {
            return Ok(None);
        }
        mapping::synthesize_id(&mut doc, id, &self.config);
        mapping::strip_hidden_meta(&mut doc, &self.config);
        Ok(Some(mapping::project(doc, fields, &self.config.id_key)))
    }

    /// Augment `filter` with the scope + soft-delete predicates and stream
    /// matching entities, unsorted and unpaged.
    pub async fn find(&self, filter: Filter) -> Result<QueryStream<T>, RepoError> {
        let constrained = constraints::apply_read_constraints(&filter, &self.config, self.scope_breach_policy)?;
        let expr = match constrained {
            Constrained::EmptyResult => return Ok(QueryStream::new(futures_util::stream::empty())),
            Constrained::Query(expr) => expr,
        };
        let raw = self.adapter.find(expr, Vec::new(), None).await?;
        let config = self.config.clone();
        let mapped = raw.map(move |item| {
            item.and_then(|(id, doc)| {
                let mut doc = doc;
                mapping::synthesize_id(&mut doc, &id, &config);
                mapping::strip_hidden_meta(&mut doc, &config);
                mapping::to_entity(doc)
            })
        });
        Ok(QueryStream::new(mapped))
    }

    /// Cursor-paginated read. `sort` need not include the identity; an
    /// ascending identity tiebreaker is appended automatically if absent,
    /// guaranteeing a strict total order even with duplicate sort values.
    pub async fn find_page(
        &self,
        filter: Filter,
        sort: Vec<SortKey>,
        page_size: usize,
        after: Option<&str>,
    ) -> Result<Page<T>, RepoError> {
        if page_size == 0 {
            return Ok(Page { items: Vec::new(), next_cursor: None });
        }

        let mut effective_sort = sort;
        if effective_sort.last().map(|k| k.field.as_str()) != Some(self.config.id_key.as_str()) {
            effective_sort.push(SortKey::new(self.config.id_key.clone(), Direction::Asc));
        }

        let constrained = constraints::apply_read_constraints(&filter, &self.config, self.scope_breach_policy)?;
        let base_expr = match constrained {
            Constrained::EmptyResult => {
                return Ok(Page { items: Vec::new(), next_cursor: None })
            }
            Constrained::Query(expr) => expr,
        };

        let expr = match after {
            Some(token) => {
                let cursor = Cursor::decode(token, effective_sort.len())?;
                QueryExpr::and(vec![base_expr, after_filter(&effective_sort, &cursor)])
            }
            None => base_expr,
        };

        let stream = self.adapter.find(expr, effective_sort.clone(), Some(page_size + 1)).await?;
        let mut raw: Vec<(String, Document)> = stream.collect_all().await?;

        let has_more = raw.len() > page_size;
        if has_more {
            raw.truncate(page_size);
        }

        let last_index = raw.len().checked_sub(1);
        let mut items = Vec::with_capacity(raw.len());
        let mut next_cursor = None;
        for (index, (id, doc)) in raw.into_iter().enumerate() {
            let mut doc = doc;
            mapping::synthesize_id(&mut doc, &id, &self.config);
            if has_more && Some(index) == last_index {
                next_cursor = Some(Cursor::capture(&effective_sort, &doc).encode());
            }
            mapping::strip_hidden_meta(&mut doc, &self.config);
            items.push(mapping::to_entity(doc)?);
        }

        Ok(Page { items, next_cursor })
    }

    pub async fn count(&self, filter: Filter) -> Result<u64, RepoError> {
        let constrained = constraints::apply_read_constraints(&filter, &self.config, self.scope_breach_policy)?;
        match constrained {
            Constrained::EmptyResult => Ok(0),
            Constrained::Query(expr) => self.adapter.count(expr).await,
        }
    }

    pub async fn find_by_spec(&self, spec: &dyn Specification) -> Result<QueryStream<T>, RepoError> {
        self.find(spec.to_filter()).await
    }

    pub async fn find_page_by_spec(
        &self,
        spec: &dyn Specification,
        sort: Vec<SortKey>,
        page_size: usize,
        after: Option<&str>,
    ) -> Result<Page<T>, RepoError> {
        self.find_page(spec.to_filter(), sort, page_size, after).await
    }

    pub async fn count_by_spec(&self, spec: &dyn Specification) -> Result<u64, RepoError> {
        self.count(spec.to_filter()).await
    }

    /// No-op (success) on an absent id. Fails synchronously, before any
    /// backend call, if `set`/`unset` touch a readonly or scope attribute,
    /// or overlap each other (spec.md §8, scenario S5).
    pub async fn update(&self, id: &str, set: Filter, unset: Vec<String>, opts: WriteOptions) -> Result<(), RepoError> {
        let descriptor = self.build_update_operation(set, unset, opts.merge_trace)?;
        tracing::debug!(id = %id, kind = ?WriteKind::Update, "dispatching write");
        self.adapter.update_one(id, &descriptor, self.transaction.as_deref()).await?;
        Ok(())
    }

    /// Returns the number of ids that matched an existing, visible
    /// document.
    pub async fn update_many(
        &self,
        ids: &[String],
        set: Filter,
        unset: Vec<String>,
        opts: WriteOptions,
    ) -> Result<u64, RepoError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let descriptor = self.build_update_operation(set, unset, opts.merge_trace)?;
        tracing::debug!(count = ids.len(), kind = ?WriteKind::Update, "dispatching write");
        self.adapter.update_many(ids, &descriptor, self.transaction.as_deref()).await
    }

    /// No-op (success) on an absent id. Hard-removes when soft-delete is
    /// off; otherwise writes the soft-delete mark through the enrichment
    /// pipeline.
    pub async fn delete(&self, id: &str, opts: WriteOptions) -> Result<(), RepoError> {
        tracing::debug!(id = %id, kind = ?WriteKind::Delete, soft = self.config.soft_delete, "dispatching write");
        if self.config.soft_delete {
            let trace = self.trace_for(opts.merge_trace.as_ref());
            let descriptor = enrich::compose(Default::default(), Vec::new(), &self.config, WriteKind::Delete, trace.as_ref());
            self.adapter.delete_one(id, Some(&descriptor), self.transaction.as_deref()).await?;
        } else {
            self.adapter.delete_one(id, None, self.transaction.as_deref()).await?;
        }
        Ok(())
    }

    pub async fn delete_many(&self, ids: &[String], opts: WriteOptions) -> Result<u64, RepoError> {
        if ids.is_empty() {
            return Ok(0);
        }
        tracing::debug!(count = ids.len(), kind = ?WriteKind::Delete, soft = self.config.soft_delete, "dispatching write");
        if self.config.soft_delete {
            let trace = self.trace_for(opts.merge_trace.as_ref());
            let descriptor = enrich::compose(Default::default(), Vec::new(), &self.config, WriteKind::Delete, trace.as_ref());
            self.adapter.delete_many(ids, Some(&descriptor), self.transaction.as_deref()).await
        } else {
            self.adapter.delete_many(ids, None, self.transaction.as_deref()).await
        }
    }

    /// The underlying backend handle, for operations this facade doesn't
    /// cover (spec.md §6).
    pub fn raw(&self) -> &A::RawHandle {
        self.adapter.raw()
    }

    /// `filter` augmented with scope and soft-delete predicates, for use in
    /// ad-hoc aggregations run directly against `raw()`. An empty `Or([])`
    /// result means "matches nothing" — the scope-breach policy resolved
    /// to `Empty` — and every adapter must translate it as such rather
    /// than as "no constraint".
    pub fn apply_constraints(&self, filter: Filter) -> Result<QueryExpr, RepoError> {
        match constraints::apply_read_constraints(&filter, &self.config, self.scope_breach_policy)? {
            Constrained::Query(expr) => Ok(expr),
            Constrained::EmptyResult => Ok(QueryExpr::Or(Vec::new())),
        }
    }

    /// The fully enriched write descriptor for a `set`/`unset` pair, for
    /// use in bulk or ad-hoc writes against `raw()` (spec.md §6). Runs the
    /// same synchronous validation as `update`.
    pub fn build_update_operation(
        &self,
        set: Filter,
        unset: Vec<String>,
        merge_trace: Option<TraceContext>,
    ) -> Result<WriteDescriptor, RepoError> {
        let set_keys: BTreeSet<String> = set.keys().cloned().collect();
        let unset_keys: BTreeSet<String> = unset.iter().cloned().collect();
        constraints::validate_write(&set_keys, &unset_keys, &self.config)?;
        let trace = self.trace_for(merge_trace.as_ref());
        Ok(enrich::compose(set, unset, &self.config, WriteKind::Update, trace.as_ref()))
    }

    /// Run `f` against a repository bound to a freshly begun backend
    /// transaction, committing on `Ok` and aborting on `Err`. Per
    /// spec.md §5, an unbound repository holds no mutable state and is
    /// safely shareable across tasks; a transaction-bound one is not meant
    /// to outlive this call.
    pub async fn run_transaction<F, Fut, R>(&self, f: F) -> Result<R, RepoError>
    where
        F: FnOnce(Repository<T, A>) -> Fut + Send,
        Fut: Future<Output = Result<R, RepoError>> + Send,
    {
        tracing::debug!("transaction begin");
        let tx = self.adapter.begin_transaction().await?;
        let handle = Arc::new(tx);
        let bound = Repository {
            adapter: self.adapter.clone(),
            config: self.config.clone(),
            scope_breach_policy: self.scope_breach_policy,
            trace_context: self.trace_context.clone(),
            transaction: Some(handle.clone()),
            _entity: PhantomData,
        };

        let result = f(bound).await;

        // `f` is `FnOnce`, so its bound repository (and the transaction
        // clone it holds) is dropped by the time its future resolves. If a
        // caller stashed a clone somewhere that outlives the closure, this
        // is a programming error we can't recover a clean commit from.
        let tx = Arc::try_unwrap(handle)
            .unwrap_or_else(|_| panic!("transaction-bound repository outlived run_transaction's closure"));

        match result {
            Ok(value) => {
                self.adapter.commit_transaction(tx).await?;
                tracing::info!("transaction commit");
                Ok(value)
            }
            Err(err) => {
                let _ = self.adapter.abort_transaction(tx).await;
                tracing::warn!(error = %err, "transaction rollback");
                Err(err)
            }
        }
    }
}

//! An in-memory `BackendAdapter`, guarded by a single `tokio::sync::Mutex`
//! over a `Vec<(id, Document)>`. Not a published fixture — it exists only
//! under `#[cfg(test)]`, so `store-core`'s own facade/cursor/enrichment
//! logic can be exercised end to end without a real backend.

use crate::adapter::{BackendAdapter, BatchOutcome, CreateEntry};
use crate::cursor::{Direction, SortKey};
use crate::enrich::WriteDescriptor;
use crate::error::RepoError;
use crate::filter::{QueryExpr, Value};
use crate::mapping::Document;
use crate::stream::QueryStream;
use async_trait::async_trait;
use futures_util::stream;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::Mutex;

#[derive(Debug)]
struct FakeError(String);

impl std::fmt::Display for FakeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fake backend: {}", self.0)
    }
}

impl std::error::Error for FakeError {}

/// `FakeAdapter`'s raw handle: direct access to the backing store, for
/// tests that want to assert on its contents without going through the
/// facade.
pub struct FakeRaw {
    pub rows: Mutex<Vec<(String, Document)>>,
}

pub struct FakeAdapter {
    raw: FakeRaw,
    next_id: AtomicU64,
    max_batch_size: usize,
    max_id_chunk: usize,
    supports_bounded_trace: bool,
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self {
            raw: FakeRaw { rows: Mutex::new(Vec::new()) },
            next_id: AtomicU64::new(1),
            max_batch_size: 1000,
            max_id_chunk: 100,
            supports_bounded_trace: true,
        }
    }
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mimic a backend with no server-side array slicing, like Backend-F.
    pub fn without_bounded_trace(mut self) -> Self {
        self.supports_bounded_trace = false;
        self
    }

    fn fresh_id(&self) -> String {
        format!("fake-{}", self.next_id.fetch_add(1, AtomicOrdering::SeqCst))
    }

    fn flatten_for_insert(descriptor: &WriteDescriptor) -> Document {
        let mut doc = Document::new();
        for (k, v) in &descriptor.set {
            doc.insert(k.clone(), v.clone());
        }
        for (k, v) in &descriptor.set_on_insert {
            doc.insert(k.clone(), v.clone());
        }
        for (k, delta) in &descriptor.inc {
            doc.insert(k.clone(), Value::from(*delta));
        }
        for push in &descriptor.push {
            let mut list = match doc.remove(&push.field) {
                Some(Value::Array(existing)) => existing,
                _ => Vec::new(),
            };
            list.push(push.value.clone());
            if let Some(keep) = push.keep_last_n {
                if list.len() > keep {
                    let drop = list.len() - keep;
                    list.drain(0..drop);
                }
            }
            doc.insert(push.field.clone(), Value::Array(list));
        }
        // `currentDate` has no client-visible value in the neutral model;
        // the fake stands in for a server clock with the shared `now`
        // already baked into `set`/`setOnInsert` by the enrichment layer.
        doc
    }

    fn apply_update(doc: &mut Document, descriptor: &WriteDescriptor) {
        for (k, v) in &descriptor.set {
            doc.insert(k.clone(), v.clone());
        }
        for field in &descriptor.unset {
            doc.remove(field);
        }
        for (k, delta) in &descriptor.inc {
            let current = doc.get(k).and_then(Value::as_i64).unwrap_or(0);
            doc.insert(k.clone(), Value::from(current + delta));
        }
        for push in &descriptor.push {
            let mut list = match doc.remove(&push.field) {
                Some(Value::Array(existing)) => existing,
                _ => Vec::new(),
            };
            list.push(push.value.clone());
            if let Some(keep) = push.keep_last_n {
                if list.len() > keep {
                    let drop = list.len() - keep;
                    list.drain(0..drop);
                }
            }
            doc.insert(push.field.clone(), Value::Array(list));
        }
    }
}

fn field_value<'a>(doc: &'a Document, field: &str) -> Option<&'a Value> {
    doc.get(field).filter(|v| !v.is_null())
}

/// Approximate cross-type ordering: `Null < Bool < Number < String <
/// Array < Object`, mirroring BSON's canonical sort order closely enough
/// for deterministic test fixtures.
fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn eval(expr: &QueryExpr, doc: &Document) -> bool {
    match expr {
        QueryExpr::Eq(field, value) => field_value(doc, field) == Some(value),
        QueryExpr::Gt(field, value) => {
            field_value(doc, field).is_some_and(|v| compare_values(v, value) == Ordering::Greater)
        }
        QueryExpr::Lt(field, value) => {
            field_value(doc, field).is_some_and(|v| compare_values(v, value) == Ordering::Less)
        }
        QueryExpr::Exists(field, present) => field_value(doc, field).is_some() == *present,
        QueryExpr::And(clauses) => clauses.iter().all(|c| eval(c, doc)),
        QueryExpr::Or(clauses) => clauses.iter().any(|c| eval(c, doc)),
    }
}

fn compare_by_sort(sort: &[SortKey], a: &Document, b: &Document) -> Ordering {
    for key in sort {
        let (av, bv) = (field_value(a, &key.field), field_value(b, &key.field));
        let ordering = match (av, bv) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => compare_values(x, y),
        };
        let ordering = match key.direction {
            Direction::Asc => ordering,
            Direction::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl BackendAdapter for FakeAdapter {
    type Transaction = ();
    type RawHandle = FakeRaw;

    fn name(&self) -> &'static str {
        "fake"
    }

    fn supports_bounded_trace(&self) -> bool {
        self.supports_bounded_trace
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn max_id_chunk(&self) -> usize {
        self.max_id_chunk
    }

    fn internal_id_key(&self) -> Option<&str> {
        Some("_id")
    }

    fn raw(&self) -> &Self::RawHandle {
        &self.raw
    }

    async fn insert_one(
        &self,
        id: Option<String>,
        descriptor: WriteDescriptor,
        _tx: Option<&Self::Transaction>,
    ) -> Result<String, RepoError> {
        let id = id.unwrap_or_else(|| self.fresh_id());
        let doc = Self::flatten_for_insert(&descriptor);
        let mut rows = self.raw.rows.lock().await;
        if rows.iter().any(|(existing, _)| existing == &id) {
            return Err(RepoError::backend(FakeError(format!("duplicate id {id}"))));
        }
        rows.push((id.clone(), doc));
        Ok(id)
    }

    async fn insert_many(
        &self,
        entries: Vec<CreateEntry>,
        tx: Option<&Self::Transaction>,
    ) -> Result<BatchOutcome, RepoError> {
        let mut outcome = BatchOutcome::default();
        for entry in entries {
            match self.insert_one(entry.id, entry.descriptor, tx).await {
                Ok(id) => outcome.inserted_ids.push(id),
                Err(_) => outcome.failed_ids.push(outcome.inserted_ids.len().to_string()),
            }
        }
        Ok(outcome)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Document>, RepoError> {
        let rows = self.raw.rows.lock().await;
        Ok(rows.iter().find(|(existing, _)| existing == id).map(|(_, doc)| doc.clone()))
    }

    async fn find_one(&self, query: QueryExpr) -> Result<Option<(String, Document)>, RepoError> {
        let rows = self.raw.rows.lock().await;
        Ok(rows.iter().find(|(_, doc)| eval(&query, doc)).cloned())
    }

    async fn find(
        &self,
        query: QueryExpr,
        sort: Vec<SortKey>,
        limit: Option<usize>,
    ) -> Result<QueryStream<(String, Document)>, RepoError> {
        let rows = self.raw.rows.lock().await;
        let mut matched: Vec<(String, Document)> =
            rows.iter().filter(|(_, doc)| eval(&query, doc)).cloned().collect();
        if !sort.is_empty() {
            matched.sort_by(|(_, a), (_, b)| compare_by_sort(&sort, a, b));
        }
        if let Some(limit) = limit {
            matched.truncate(limit);
        }
        Ok(QueryStream::new(stream::iter(matched.into_iter().map(Ok))))
    }

    async fn count(&self, query: QueryExpr) -> Result<u64, RepoError> {
        let rows = self.raw.rows.lock().await;
        Ok(rows.iter().filter(|(_, doc)| eval(&query, doc)).count() as u64)
    }

    async fn update_one(
        &self,
        id: &str,
        descriptor: &WriteDescriptor,
        _tx: Option<&Self::Transaction>,
    ) -> Result<bool, RepoError> {
        let mut rows = self.raw.rows.lock().await;
        match rows.iter_mut().find(|(existing, _)| existing == id) {
            Some((_, doc)) => {
                Self::apply_update(doc, descriptor);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_many(
        &self,
        ids: &[String],
        descriptor: &WriteDescriptor,
        _tx: Option<&Self::Transaction>,
    ) -> Result<u64, RepoError> {
        let mut rows = self.raw.rows.lock().await;
        let mut matched = 0u64;
        for (existing, doc) in rows.iter_mut() {
            if ids.iter().any(|id| id == existing) {
                Self::apply_update(doc, descriptor);
                matched += 1;
            }
        }
        Ok(matched)
    }

    async fn delete_one(
        &self,
        id: &str,
        descriptor: Option<&WriteDescriptor>,
        _tx: Option<&Self::Transaction>,
    ) -> Result<bool, RepoError> {
        let mut rows = self.raw.rows.lock().await;
        match descriptor {
            Some(descriptor) => match rows.iter_mut().find(|(existing, _)| existing == id) {
                Some((_, doc)) => {
                    Self::apply_update(doc, descriptor);
                    Ok(true)
                }
                None => Ok(false),
            },
            None => {
                let before = rows.len();
                rows.retain(|(existing, _)| existing != id);
                Ok(rows.len() != before)
            }
        }
    }

    async fn delete_many(
        &self,
        ids: &[String],
        descriptor: Option<&WriteDescriptor>,
        _tx: Option<&Self::Transaction>,
    ) -> Result<u64, RepoError> {
        let mut rows = self.raw.rows.lock().await;
        match descriptor {
            Some(descriptor) => {
                let mut matched = 0u64;
                for (existing, doc) in rows.iter_mut() {
                    if ids.iter().any(|id| id == existing) {
                        Self::apply_update(doc, descriptor);
                        matched += 1;
                    }
                }
                Ok(matched)
            }
            None => {
                let before = rows.len();
                rows.retain(|(existing, _)| !ids.iter().any(|id| id == existing));
                Ok((before - rows.len()) as u64)
            }
        }
    }

    async fn begin_transaction(&self) -> Result<Self::Transaction, RepoError> {
        Ok(())
    }

    async fn commit_transaction(&self, _tx: Self::Transaction) -> Result<(), RepoError> {
        Ok(())
    }

    async fn abort_transaction(&self, _tx: Self::Transaction) -> Result<(), RepoError> {
        Ok(())
    }
}

//! Backend-D adapter: translates `store-core`'s neutral write/read
//! contracts into native `mongodb` operations.
//!
//! Backend storage identity is a plain `String` held in Mongo's `_id`
//! field — never an `ObjectId` — so it round-trips through
//! `Repository<T, A>` without a conversion layer. `create` is realized as
//! an upsert (`findOneAndUpdate` with `upsert: true`, returning the
//! pre-image) rather than a literal `insertOne`: this is the only way to
//! get native `$setOnInsert`/`$currentDate` semantics while also detecting
//! whether the identity already existed (including soft-deleted), per the
//! "error on id collision" create policy. Batch creates instead flatten
//! the descriptor into a literal document and use a true bulk
//! `insertMany`, trading per-document `$currentDate` for native per-index
//! write-error reporting — the two create paths intentionally diverge for
//! this reason.

use async_trait::async_trait;
use bson::{doc, Document as BsonDoc};
use futures_util::StreamExt;
use mongodb::error::ErrorKind;
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, InsertManyOptions, ReturnDocument};
use mongodb::{ClientSession, Collection};
use std::collections::BTreeSet;
use store_core::adapter::{BackendAdapter, BatchOutcome, CreateEntry};
use store_core::cursor::SortKey;
use store_core::enrich::WriteDescriptor;
use store_core::error::RepoError;
use store_core::filter::QueryExpr;
use store_core::mapping::Document;
use store_core::stream::QueryStream;
use tokio::sync::Mutex;

use crate::error::{DuplicateIdentity, MongoErrorExt};
use crate::query::{translate, translate_sort};
use crate::write::{flatten_for_insert, translate_update};

fn bson_to_json(doc: BsonDoc) -> Document {
    match serde_json::to_value(&doc).unwrap_or(serde_json::Value::Null) {
        serde_json::Value::Object(map) => map,
        _ => Document::new(),
    }
}

fn doc_id(doc: &BsonDoc) -> String {
    doc.get_str("_id").map(|s| s.to_string()).unwrap_or_default()
}

pub struct MongoAdapter {
    client: mongodb::Client,
    collection: Collection<BsonDoc>,
    max_batch_size: usize,
    max_id_chunk: usize,
}

impl MongoAdapter {
    /// Batching limits default to the Backend-D contract from spec.md
    /// §4.7: batches of ≤ 1000 writes, membership chunks of ≤ 100 ids.
    pub fn new(client: mongodb::Client, collection: Collection<BsonDoc>) -> Self {
        Self { client, collection, max_batch_size: 1000, max_id_chunk: 100 }
    }
}

#[async_trait]
impl BackendAdapter for MongoAdapter {
    type Transaction = Mutex<ClientSession>;
    type RawHandle = Collection<BsonDoc>;

    fn name(&self) -> &'static str {
        "mongo"
    }

    fn supports_bounded_trace(&self) -> bool {
        true
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
        &self.collection
    }

    async fn insert_one(
        &self,
        id: Option<String>,
        descriptor: WriteDescriptor,
        tx: Option<&Self::Transaction>,
    ) -> Result<String, RepoError> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let filter = doc! { "_id": id.clone() };
        let update = translate_update(&descriptor);
        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::Before)
            .build();

        tracing::debug!(backend = "mongo", id = %id, "insert_one dispatch");

        let before = match tx {
            Some(session) => {
                let mut guard = session.lock().await;
                self.collection
                    .find_one_and_update(filter, update)
                    .with_options(options)
                    .session(&mut *guard)
                    .await
            }
            None => self.collection.find_one_and_update(filter, update).with_options(options).await,
        }
        .map_err(MongoErrorExt::into_repo_error)?;

        if before.is_some() {
            return Err(RepoError::backend(DuplicateIdentity(id)));
        }
        Ok(id)
    }

    async fn insert_many(
        &self,
        entries: Vec<CreateEntry>,
        tx: Option<&Self::Transaction>,
    ) -> Result<BatchOutcome, RepoError> {
        if entries.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let now = chrono::Utc::now();
        let mut outcome = BatchOutcome::default();

        for (batch_index, chunk) in entries.chunks(self.max_batch_size).enumerate() {
            tracing::debug!(backend = "mongo", batch_index, batch_len = chunk.len(), "insert_many chunk dispatch");

            let mut ids = Vec::with_capacity(chunk.len());
            let mut docs = Vec::with_capacity(chunk.len());
            for entry in chunk {
                let id = entry.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let mut doc = flatten_for_insert(&entry.descriptor, now);
                doc.insert("_id", id.clone());
                ids.push(id);
                docs.push(doc);
            }

            let options = InsertManyOptions::builder().ordered(false).build();
            let result = match tx {
                Some(session) => {
                    let mut guard = session.lock().await;
                    self.collection.insert_many(docs).with_options(options).session(&mut *guard).await
                }
                None => self.collection.insert_many(docs).with_options(options).await,
            };

            match result {
                Ok(_) => outcome.inserted_ids.extend(ids),
                Err(err) => match err.kind.as_ref() {
                    ErrorKind::InsertMany(insert_many_err) => {
                        let failed_indexes: BTreeSet<usize> = insert_many_err
                            .write_errors
                            .iter()
                            .flatten()
                            .map(|write_err| write_err.index)
                            .collect();
                        for (i, id) in ids.into_iter().enumerate() {
                            if failed_indexes.contains(&i) {
                                outcome.failed_ids.push(id);
                            } else {
                                outcome.inserted_ids.push(id);
                            }
                        }
                    }
                    _ => outcome.failed_ids.extend(ids),
                },
            }
        }

        Ok(outcome)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Document>, RepoError> {
        let filter = doc! { "_id": id };
        let found = self.collection.find_one(filter).await.map_err(MongoErrorExt::into_repo_error)?;
        Ok(found.map(bson_to_json))
    }

    async fn find_one(&self, query: QueryExpr) -> Result<Option<(String, Document)>, RepoError> {
        let filter = translate(&query);
        let found = self.collection.find_one(filter).await.map_err(MongoErrorExt::into_repo_error)?;
        Ok(found.map(|doc| (doc_id(&doc), bson_to_json(doc))))
    }

    async fn find(
        &self,
        query: QueryExpr,
        sort: Vec<SortKey>,
        limit: Option<usize>,
    ) -> Result<QueryStream<(String, Document)>, RepoError> {
        let filter = translate(&query);
        let sort_doc = translate_sort(&sort);
        let mut options = FindOptions::builder().sort(sort_doc).build();
        options.limit = limit.map(|n| n as i64);

        let cursor = self.collection.find(filter).with_options(options).await.map_err(MongoErrorExt::into_repo_error)?;

        let mapped = cursor.map(|item| {
            item.map_err(MongoErrorExt::into_repo_error).map(|doc| (doc_id(&doc), bson_to_json(doc)))
        });
        Ok(QueryStream::new(Box::pin(mapped)))
    }

    async fn count(&self, query: QueryExpr) -> Result<u64, RepoError> {
        let filter = translate(&query);
        self.collection.count_documents(filter).await.map_err(MongoErrorExt::into_repo_error)
    }

    async fn update_one(
        &self,
        id: &str,
        descriptor: &WriteDescriptor,
        tx: Option<&Self::Transaction>,
    ) -> Result<bool, RepoError> {
        let filter = doc! { "_id": id };
        let update = translate_update(descriptor);
        let result = match tx {
            Some(session) => {
                let mut guard = session.lock().await;
                self.collection.update_one(filter, update).session(&mut *guard).await
            }
            None => self.collection.update_one(filter, update).await,
        }
        .map_err(MongoErrorExt::into_repo_error)?;
        Ok(result.matched_count > 0)
    }

    async fn update_many(
        &self,
        ids: &[String],
        descriptor: &WriteDescriptor,
        tx: Option<&Self::Transaction>,
    ) -> Result<u64, RepoError> {
        let update = translate_update(descriptor);
        let mut matched = 0u64;
        for (chunk_index, chunk) in ids.chunks(self.max_id_chunk).enumerate() {
            tracing::debug!(backend = "mongo", chunk_index, chunk_len = chunk.len(), "update_many chunk dispatch");
            let filter = doc! { "_id": { "$in": chunk.to_vec() } };
            let result = match tx {
                Some(session) => {
                    let mut guard = session.lock().await;
                    self.collection.update_many(filter, update.clone()).session(&mut *guard).await
                }
                None => self.collection.update_many(filter, update.clone()).await,
            }
            .map_err(MongoErrorExt::into_repo_error)?;
            matched += result.matched_count;
        }
        Ok(matched)
    }

    async fn delete_one(
        &self,
        id: &str,
        descriptor: Option<&WriteDescriptor>,
        tx: Option<&Self::Transaction>,
    ) -> Result<bool, RepoError> {
        match descriptor {
            Some(descriptor) => self.update_one(id, descriptor, tx).await,
            None => {
                let filter = doc! { "_id": id };
                let result = match tx {
                    Some(session) => {
                        let mut guard = session.lock().await;
                        self.collection.delete_one(filter).session(&mut *guard).await
                    }
                    None => self.collection.delete_one(filter).await,
                }
                .map_err(MongoErrorExt::into_repo_error)?;
                Ok(result.deleted_count > 0)
            }
        }
    }

    async fn delete_many(
        &self,
        ids: &[String],
        descriptor: Option<&WriteDescriptor>,
        tx: Option<&Self::Transaction>,
    ) -> Result<u64, RepoError> {
        match descriptor {
            Some(descriptor) => self.update_many(ids, descriptor, tx).await,
            None => {
                let mut deleted = 0u64;
                for (chunk_index, chunk) in ids.chunks(self.max_id_chunk).enumerate() {
                    tracing::debug!(backend = "mongo", chunk_index, chunk_len = chunk.len(), "delete_many chunk dispatch");
                    let filter = doc! { "_id": { "$in": chunk.to_vec() } };
                    let result = match tx {
                        Some(session) => {
                            let mut guard = session.lock().await;
                            self.collection.delete_many(filter).session(&mut *guard).await
                        }
                        None => self.collection.delete_many(filter).await,
                    }
                    .map_err(MongoErrorExt::into_repo_error)?;
                    deleted += result.deleted_count;
                }
                Ok(deleted)
            }
        }
    }

    async fn begin_transaction(&self) -> Result<Self::Transaction, RepoError> {
        let mut session = self.client.start_session().await.map_err(MongoErrorExt::into_repo_error)?;
        session.start_transaction().await.map_err(MongoErrorExt::into_repo_error)?;
        tracing::debug!(backend = "mongo", "transaction begin");
        Ok(Mutex::new(session))
    }

    async fn commit_transaction(&self, tx: Self::Transaction) -> Result<(), RepoError> {
        let mut session = tx.into_inner();
        session.commit_transaction().await.map_err(MongoErrorExt::into_repo_error)?;
        tracing::info!(backend = "mongo", "transaction commit");
        Ok(())
    }

    async fn abort_transaction(&self, tx: Self::Transaction) -> Result<(), RepoError> {
        let mut session = tx.into_inner();
        session.abort_transaction().await.map_err(MongoErrorExt::into_repo_error)?;
        tracing::warn!(backend = "mongo", "transaction rollback");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bson_to_json_drops_into_plain_map() {
        let mut doc = BsonDoc::new();
        doc.insert("_id", "abc");
        doc.insert("name", "ada");
        let json = bson_to_json(doc);
        assert_eq!(json.get("name").unwrap(), "ada");
    }

    #[test]
    fn doc_id_reads_string_id() {
        let mut doc = BsonDoc::new();
        doc.insert("_id", "abc");
        assert_eq!(doc_id(&doc), "abc");
    }

    #[test]
    fn doc_id_is_empty_when_absent() {
        let doc = BsonDoc::new();
        assert_eq!(doc_id(&doc), "");
    }
}

//! Backend-F adapter: implements `store_core::adapter::BackendAdapter`
//! directly against the Firestore v1 gRPC API (via `gcloud-sdk`'s generated
//! client, reached through `firestore::FirestoreDb`'s raw-client escape
//! hatch) rather than only the `firestore` crate's typed fluent surface —
//! field transforms (increment, array-union, server-timestamp) and the
//! create-uniqueness precondition both need the raw `Write`/`Commit`
//! messages.
//!
//! `create` uses a single `Commit` with `current_document.exists = false`:
//! Firestore rejects it with `ALREADY_EXISTS` if the identity is already
//! taken, including by a soft-deleted document, matching the "error on id
//! collision" create policy. Batches (`createMany`/`updateMany`/
//! `deleteMany`) use `BatchWrite`, Firestore's non-atomic per-write RPC,
//! since per-entity outcome reporting — not all-or-nothing atomicity — is
//! what spec.md §4.7 asks for; single writes use the atomic `Commit`.
//! Transactions are Firestore's "single-attempt" kind: a transaction id is
//! opened once and never internally retried (spec.md §6 Backend-F
//! contract), stored as `Vec<u8>` rather than a borrowed handle so
//! `Transaction: Send + Sync` needs no lifetime.

use async_trait::async_trait;
use futures_util::StreamExt;
use gcloud_sdk::google::firestore::v1 as fs1;
use gcloud_sdk::google::firestore::v1::firestore_client::FirestoreClient;
use gcloud_sdk::tonic::transport::Channel;
use gcloud_sdk::tonic::Code;
use std::collections::HashMap;
use store_core::adapter::{BackendAdapter, BatchOutcome, CreateEntry};
use store_core::cursor::SortKey;
use store_core::enrich::WriteDescriptor;
use store_core::error::RepoError;
use store_core::filter::QueryExpr;
use store_core::mapping::Document;
use store_core::stream::QueryStream;

use crate::error::FirestoreErrorExt;
use crate::query::{translate, translate_sort};
use crate::write::build_plan;

pub(crate) fn json_to_fs_value(value: &serde_json::Value) -> fs1::Value {
    use fs1::value::ValueType;
    let value_type = match value {
        serde_json::Value::Null => ValueType::NullValue(0),
        serde_json::Value::Bool(b) => ValueType::BooleanValue(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => ValueType::IntegerValue(i),
            None => ValueType::DoubleValue(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => ValueType::StringValue(s.clone()),
        serde_json::Value::Array(items) => {
            ValueType::ArrayValue(fs1::ArrayValue { values: items.iter().map(json_to_fs_value).collect() })
        }
        serde_json::Value::Object(map) => ValueType::MapValue(fs1::MapValue {
            fields: map.iter().map(|(k, v)| (k.clone(), json_to_fs_value(v))).collect(),
        }),
    };
    fs1::Value { value_type: Some(value_type) }
}

fn fs_value_to_json(value: &fs1::Value) -> serde_json::Value {
    use fs1::value::ValueType;
    match &value.value_type {
        None | Some(ValueType::NullValue(_)) => serde_json::Value::Null,
        Some(ValueType::BooleanValue(b)) => serde_json::Value::Bool(*b),
        Some(ValueType::IntegerValue(i)) => serde_json::Value::from(*i),
        Some(ValueType::DoubleValue(d)) => {
            serde_json::Number::from_f64(*d).map(serde_json::Value::Number).unwrap_or(serde_json::Value::Null)
        }
        Some(ValueType::StringValue(s)) => serde_json::Value::String(s.clone()),
        Some(ValueType::TimestampValue(ts)) => serde_json::Value::String(format!("{}.{:09}Z", ts.seconds, ts.nanos)),
        Some(ValueType::ArrayValue(arr)) => serde_json::Value::Array(arr.values.iter().map(fs_value_to_json).collect()),
        Some(ValueType::MapValue(map)) => {
            serde_json::Value::Object(map.fields.iter().map(|(k, v)| (k.clone(), fs_value_to_json(v))).collect())
        }
        _ => serde_json::Value::Null,
    }
}

fn doc_to_json(doc: &fs1::Document) -> Document {
    doc.fields.iter().map(|(k, v)| (k.clone(), fs_value_to_json(v))).collect()
}

fn id_from_name(name: &str) -> String {
    name.rsplit('/').next().unwrap_or_default().to_string()
}

pub struct FirestoreAdapter {
    db: firestore::FirestoreDb,
    client: FirestoreClient<Channel>,
    database_path: String,
    documents_root: String,
    collection: String,
    max_batch_size: usize,
    max_id_chunk: usize,
}

impl FirestoreAdapter {
    /// Batching limits per the Backend-F contract from spec.md §4.7:
    /// batches of ≤ 300 writes, identity-in predicates of ≤ 10.
    pub fn new(db: firestore::FirestoreDb, client: FirestoreClient<Channel>, project_id: &str, database_id: &str, collection: impl Into<String>) -> Self {
        let database_path = format!("projects/{project_id}/databases/{database_id}");
        let documents_root = format!("{database_path}/documents");
        Self {
            db,
            client,
            database_path,
            documents_root,
            collection: collection.into(),
            max_batch_size: 300,
            max_id_chunk: 10,
        }
    }

    fn doc_name(&self, id: &str) -> String {
        format!("{}/{}/{}", self.documents_root, self.collection, id)
    }

    fn base_write_for_update(&self, id: &str, plan: &crate::write::FirestoreWritePlan) -> fs1::Write {
        let mut fields = HashMap::new();
        for (k, v) in &plan.merge_fields {
            fields.insert(k.clone(), json_to_fs_value(v));
        }
        let mut field_paths: Vec<String> = plan.merge_fields.keys().cloned().collect();
        field_paths.extend(plan.delete_fields.iter().cloned());

        fs1::Write {
            update_mask: Some(fs1::DocumentMask { field_paths }),
            update_transforms: transforms(plan),
            operation: Some(fs1::write::Operation::Update(fs1::Document {
                name: self.doc_name(id),
                fields,
                create_time: None,
                update_time: None,
            })),
            current_document: None,
        }
    }
}

fn transforms(plan: &crate::write::FirestoreWritePlan) -> Vec<fs1::document_transform::FieldTransform> {
    use fs1::document_transform::field_transform::TransformType;
    let mut out = Vec::new();
    for field in &plan.server_timestamps {
        out.push(fs1::document_transform::FieldTransform {
            field_path: field.clone(),
            transform_type: Some(TransformType::SetToServerValue(fs1::document_transform::ServerValue::RequestTime as i32)),
        });
    }
    for (field, delta) in &plan.increments {
        out.push(fs1::document_transform::FieldTransform {
            field_path: field.clone(),
            transform_type: Some(TransformType::Increment(fs1::Value {
                value_type: Some(fs1::value::ValueType::IntegerValue(*delta)),
            })),
        });
    }
    for (field, value) in &plan.array_unions {
        out.push(fs1::document_transform::FieldTransform {
            field_path: field.clone(),
            transform_type: Some(TransformType::AppendMissingElements(fs1::ArrayValue {
                values: vec![json_to_fs_value(value)],
            })),
        });
    }
    out
}

#[async_trait]
impl BackendAdapter for FirestoreAdapter {
    type Transaction = Vec<u8>;
    type RawHandle = firestore::FirestoreDb;

    fn name(&self) -> &'static str {
        "firestore"
    }

    fn supports_bounded_trace(&self) -> bool {
        false
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    fn max_id_chunk(&self) -> usize {
        self.max_id_chunk
    }

    fn raw(&self) -> &Self::RawHandle {
        &self.db
    }

    async fn insert_one(
        &self,
        id: Option<String>,
        descriptor: WriteDescriptor,
        tx: Option<&Self::Transaction>,
    ) -> Result<String, RepoError> {
        let id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let plan = build_plan(&descriptor);
        let mut write = self.base_write_for_update(&id, &plan);
        write.current_document = Some(fs1::Precondition { condition_type: Some(fs1::precondition::ConditionType::Exists(false)) });

        tracing::debug!(backend = "firestore", id = %id, "insert_one dispatch");

        let request = fs1::CommitRequest {
            database: self.database_path.clone(),
            writes: vec![write],
            transaction: tx.cloned().unwrap_or_default(),
        };

        let mut client = self.client.clone();
        match client.commit(request).await {
            Ok(_) => Ok(id),
            Err(status) if crate::error::is_already_exists(&status) => {
                Err(RepoError::backend(crate::error::DuplicateIdentity(id)))
            }
            Err(status) => Err(status.into_repo_error()),
        }
    }

    async fn insert_many(
        &self,
        entries: Vec<CreateEntry>,
        tx: Option<&Self::Transaction>,
    ) -> Result<BatchOutcome, RepoError> {
        if entries.is_empty() {
            return Ok(BatchOutcome::default());
        }

        let mut outcome = BatchOutcome::default();
        let mut client = self.client.clone();

        for (batch_index, chunk) in entries.chunks(self.max_batch_size).enumerate() {
            tracing::debug!(backend = "firestore", batch_index, batch_len = chunk.len(), "insert_many chunk dispatch");

            let mut ids = Vec::with_capacity(chunk.len());
            let mut writes = Vec::with_capacity(chunk.len());
            for entry in chunk {
                let id = entry.id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let plan = build_plan(&entry.descriptor);
                let mut write = self.base_write_for_update(&id, &plan);
                write.current_document =
                    Some(fs1::Precondition { condition_type: Some(fs1::precondition::ConditionType::Exists(false)) });
                ids.push(id);
                writes.push(write);
            }

            if let Some(tx) = tx {
                // Inside a transaction every write must ride the same `Commit`
                // so an abort rolls it back; `BatchWrite` has no `transaction`
                // field and would apply immediately regardless of outcome.
                for (id, write) in ids.into_iter().zip(writes) {
                    let request = fs1::CommitRequest {
                        database: self.database_path.clone(),
                        writes: vec![write],
                        transaction: tx.clone(),
                    };
                    match client.commit(request).await {
                        Ok(_) => outcome.inserted_ids.push(id),
                        Err(_) => outcome.failed_ids.push(id),
                    }
                }
                continue;
            }

            let request = fs1::BatchWriteRequest { database: self.database_path.clone(), writes, labels: HashMap::new() };

            let response = client.batch_write(request).await.map_err(|e| e.into_repo_error())?.into_inner();
            for (i, status) in response.status.into_iter().enumerate() {
                if status.code == Code::Ok as i32 {
                    outcome.inserted_ids.push(ids[i].clone());
                } else {
                    outcome.failed_ids.push(ids[i].clone());
                }
            }
        }

        Ok(outcome)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Document>, RepoError> {
        let request = fs1::GetDocumentRequest { name: self.doc_name(id), mask: None, consistency_selector: None };
        let mut client = self.client.clone();
        match client.get_document(request).await {
            Ok(response) => Ok(Some(doc_to_json(&response.into_inner()))),
            Err(status) if status.code() == Code::NotFound => Ok(None),
            Err(status) => Err(status.into_repo_error()),
        }
    }

    async fn find_one(&self, query: QueryExpr) -> Result<Option<(String, Document)>, RepoError> {
        let mut stream = self.find(query, Vec::new(), Some(1)).await?;
        match stream.next().await {
            Some(Ok(item)) => Ok(Some(item)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }

    async fn find(
        &self,
        query: QueryExpr,
        sort: Vec<SortKey>,
        limit: Option<usize>,
    ) -> Result<QueryStream<(String, Document)>, RepoError> {
        let structured_query = fs1::StructuredQuery {
            select: None,
            from: vec![fs1::structured_query::CollectionSelector { collection_id: self.collection.clone(), all_descendants: false }],
            r#where: Some(translate(&query)),
            order_by: translate_sort(&sort),
            start_at: None,
            end_at: None,
            offset: 0,
            limit: limit.map(|n| n as i32),
        };

        let request = fs1::RunQueryRequest {
            parent: self.documents_root.clone(),
            query_type: Some(fs1::run_query_request::QueryType::StructuredQuery(structured_query)),
            consistency_selector: None,
        };

        let mut client = self.client.clone();
        let stream = client.run_query(request).await.map_err(|e| e.into_repo_error())?.into_inner();

        let mapped = stream.filter_map(|item| async move {
            match item {
                Ok(response) => response.document.map(|doc| Ok((id_from_name(&doc.name), doc_to_json(&doc)))),
                Err(status) => Some(Err(status.into_repo_error())),
            }
        });

        Ok(QueryStream::new(Box::pin(mapped)))
    }

    async fn count(&self, query: QueryExpr) -> Result<u64, RepoError> {
        // Backend-F's native aggregation count; approximated here by
        // draining the equivalent `find` stream, since the raw
        // `RunAggregationQuery` request shape mirrors `RunQuery` closely
        // enough that a dedicated path isn't worth the duplication for a
        // read-only count.
        let mut stream = self.find(query, Vec::new(), None).await?;
        let mut count = 0u64;
        while let Some(item) = stream.next().await {
            item?;
            count += 1;
        }
        Ok(count)
    }

    async fn update_one(
        &self,
        id: &str,
        descriptor: &WriteDescriptor,
        tx: Option<&Self::Transaction>,
    ) -> Result<bool, RepoError> {
        let plan = build_plan(descriptor);
        let mut write = self.base_write_for_update(id, &plan);
        write.current_document = Some(fs1::Precondition { condition_type: Some(fs1::precondition::ConditionType::Exists(true)) });

        let request = fs1::CommitRequest {
            database: self.database_path.clone(),
            writes: vec![write],
            transaction: tx.cloned().unwrap_or_default(),
        };
        let mut client = self.client.clone();
        match client.commit(request).await {
            Ok(_) => Ok(true),
            Err(status) if status.code() == Code::FailedPrecondition || status.code() == Code::NotFound => Ok(false),
            Err(status) => Err(status.into_repo_error()),
        }
    }

    async fn update_many(
        &self,
        ids: &[String],
        descriptor: &WriteDescriptor,
        tx: Option<&Self::Transaction>,
    ) -> Result<u64, RepoError> {
        let plan = build_plan(descriptor);
        let mut matched = 0u64;
        let mut client = self.client.clone();

        for (chunk_index, chunk) in ids.chunks(self.max_id_chunk).enumerate() {
            tracing::debug!(backend = "firestore", chunk_index, chunk_len = chunk.len(), "update_many chunk dispatch");
            let writes: Vec<fs1::Write> = chunk.iter().map(|id| self.base_write_for_update(id, &plan)).collect();

            if let Some(tx) = tx {
                for write in writes {
                    let request = fs1::CommitRequest {
                        database: self.database_path.clone(),
                        writes: vec![write],
                        transaction: tx.clone(),
                    };
                    if client.commit(request).await.is_ok() {
                        matched += 1;
                    }
                }
                continue;
            }

            let request = fs1::BatchWriteRequest { database: self.database_path.clone(), writes, labels: HashMap::new() };
            let response = client.batch_write(request).await.map_err(|e| e.into_repo_error())?.into_inner();
            matched += response.status.iter().filter(|s| s.code == Code::Ok as i32).count() as u64;
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
                let write = fs1::Write {
                    update_mask: None,
                    update_transforms: Vec::new(),
                    operation: Some(fs1::write::Operation::Delete(self.doc_name(id))),
                    current_document: None,
                };
                let request = fs1::CommitRequest {
                    database: self.database_path.clone(),
                    writes: vec![write],
                    transaction: tx.cloned().unwrap_or_default(),
                };
                let mut client = self.client.clone();
                client.commit(request).await.map_err(|e| e.into_repo_error())?;
                Ok(true)
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
                let mut client = self.client.clone();
                for (chunk_index, chunk) in ids.chunks(self.max_id_chunk).enumerate() {
                    tracing::debug!(backend = "firestore", chunk_index, chunk_len = chunk.len(), "delete_many chunk dispatch");
                    let writes: Vec<fs1::Write> = chunk
                        .iter()
                        .map(|id| fs1::Write {
                            update_mask: None,
                            update_transforms: Vec::new(),
                            operation: Some(fs1::write::Operation::Delete(self.doc_name(id))),
                            current_document: None,
                        })
                        .collect();

                    if let Some(tx) = tx {
                        for write in writes {
                            let request = fs1::CommitRequest {
                                database: self.database_path.clone(),
                                writes: vec![write],
                                transaction: tx.clone(),
                            };
                            if client.commit(request).await.is_ok() {
                                deleted += 1;
                            }
                        }
                        continue;
                    }

                    let request = fs1::BatchWriteRequest { database: self.database_path.clone(), writes, labels: HashMap::new() };
                    let response = client.batch_write(request).await.map_err(|e| e.into_repo_error())?.into_inner();
                    deleted += response.status.iter().filter(|s| s.code == Code::Ok as i32).count() as u64;
                }
                Ok(deleted)
            }
        }
    }

    async fn begin_transaction(&self) -> Result<Self::Transaction, RepoError> {
        let request = fs1::BeginTransactionRequest {
            database: self.database_path.clone(),
            options: Some(fs1::TransactionOptions {
                mode: Some(fs1::transaction_options::Mode::ReadWrite(fs1::transaction_options::ReadWrite { retry_transaction: Vec::new() })),
            }),
        };
        tracing::debug!(backend = "firestore", "transaction begin (single-attempt)");
        let mut client = self.client.clone();
        let response = client.begin_transaction(request).await.map_err(|e| e.into_repo_error())?;
        Ok(response.into_inner().transaction)
    }

    async fn commit_transaction(&self, tx: Self::Transaction) -> Result<(), RepoError> {
        let request = fs1::CommitRequest { database: self.database_path.clone(), writes: Vec::new(), transaction: tx };
        let mut client = self.client.clone();
        client.commit(request).await.map_err(|e| e.into_repo_error())?;
        tracing::info!(backend = "firestore", "transaction commit");
        Ok(())
    }

    async fn abort_transaction(&self, tx: Self::Transaction) -> Result<(), RepoError> {
        let request = fs1::RollbackRequest { database: self.database_path.clone(), transaction: tx };
        let mut client = self.client.clone();
        client.rollback(request).await.map_err(|e| e.into_repo_error())?;
        tracing::warn!(backend = "firestore", "transaction rollback");
        Ok(())
    }
}

use crate::config::{ResolvedConfig, Timestamps, TraceStrategy};
use crate::filter::Value;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Which lifecycle transition a write belongs to. The trace layer must run
/// last specifically so it observes this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
    Delete,
}

impl WriteKind {
    fn op_name(self) -> &'static str {
        match self {
            WriteKind::Create => "create",
            WriteKind::Update => "update",
            WriteKind::Delete => "delete",
        }
    }
}

/// An append to a list field, optionally capped server-side to the last N
/// elements (Backend-D's `$push`+`$slice`; Backend-F has no equivalent,
/// so `keep_last_n` must never be `Some` there — enforced at construction
/// by `ResolvedConfig::resolve`'s bounded-on-unsupported-backend check).
#[derive(Debug, Clone)]
pub struct PushOp {
    pub field: String,
    pub value: Value,
    pub keep_last_n: Option<usize>,
}

/// A backend-neutral write operation: the fully enriched result of
/// composing a caller's `set`/`unset` with the timestamp, version, and
/// trace layers. Each backend adapter translates this once into its
/// native update operators.
#[derive(Debug, Clone, Default)]
pub struct WriteDescriptor {
    /// Applied only when the underlying operation creates a new document.
    pub set_on_insert: BTreeMap<String, Value>,
    /// Applied always.
    pub set: BTreeMap<String, Value>,
    /// Numeric deltas.
    pub inc: BTreeMap<String, i64>,
    /// Field removal.
    pub unset: Vec<String>,
    /// List appends.
    pub push: Vec<PushOp>,
    /// Fields the server should stamp with its own clock.
    pub current_date: Vec<String>,
}

/// Caller-supplied audit context, merged with per-call context and stamped
/// with the write kind and a timestamp to form a trace record.
pub type TraceContext = BTreeMap<String, Value>;

/// Merge construction-time trace context with a per-call `mergeTrace`
/// override. Per the reference contract (spec.md §9, open question 3),
/// `mergeTrace` on an empty base still enables tracing for that call: the
/// result is `None` only when *both* are absent.
pub fn merge_trace_context(
    base: Option<&TraceContext>,
    merge: Option<&TraceContext>,
) -> Option<TraceContext> {
    match (base, merge) {
        (None, None) => None,
        (Some(b), None) => Some(b.clone()),
        (None, Some(m)) => Some(m.clone()),
        (Some(b), Some(m)) => {
            let mut merged = b.clone();
            merged.extend(m.clone());
            Some(merged)
        }
    }
}

/// A single clock reading shared by the timestamp and trace layers of one
/// write, so `createdAt`/`updatedAt` and the trace record's `_at` always
/// agree on the instant.
fn now_from(config: &ResolvedConfig) -> DateTime<Utc> {
    match &config.timestamps {
        Timestamps::Clock(clock) => clock(),
        Timestamps::Off | Timestamps::Server => Utc::now(),
    }
}

fn timestamp_value(now: DateTime<Utc>) -> Value {
    Value::from(now.to_rfc3339())
}

/// Timestamp layer: populates `createdAt`/`updatedAt`/`deletedAt` per
/// spec.md §4.2, additionally requesting server-stamping when configured.
pub fn apply_timestamps(descriptor: &mut WriteDescriptor, config: &ResolvedConfig, kind: WriteKind, now: DateTime<Utc>) {
    let Some(keys) = &config.timestamp_keys else {
        return;
    };
    let server = matches!(config.timestamps, Timestamps::Server);
    let value = timestamp_value(now);
    match kind {
        WriteKind::Create => {
            descriptor.set_on_insert.insert(keys.created_at.name().to_string(), value.clone());
            descriptor.set_on_insert.insert(keys.updated_at.name().to_string(), value);
            if server {
                descriptor.current_date.push(keys.created_at.name().to_string());
                descriptor.current_date.push(keys.updated_at.name().to_string());
            }
        }
        WriteKind::Update => {
            descriptor.set.insert(keys.updated_at.name().to_string(), value);
            if server {
                descriptor.current_date.push(keys.updated_at.name().to_string());
            }
        }
        WriteKind::Delete => {
            descriptor.set.insert(keys.updated_at.name().to_string(), value.clone());
            descriptor.set.insert(keys.deleted_at.name().to_string(), value);
            if server {
                descriptor.current_date.push(keys.updated_at.name().to_string());
                descriptor.current_date.push(keys.deleted_at.name().to_string());
            }
        }
    }
}

/// Version layer: `setOnInsert{version = 1}` on create, `inc{version += 1}`
/// on update/delete.
pub fn apply_version(descriptor: &mut WriteDescriptor, config: &ResolvedConfig, kind: WriteKind) {
    let Some(key) = &config.version_key else {
        return;
    };
    match kind {
        WriteKind::Create => {
            descriptor.set_on_insert.insert(key.clone(), Value::from(1));
        }
        WriteKind::Update | WriteKind::Delete => {
            descriptor.inc.insert(key.clone(), 1);
        }
    }
}

/// Trace layer: always runs last so the recorded `_op` reflects the final
/// write kind. No-op when no trace context is present at all. The `_at`
/// field always uses the shared client-clock reading, even under
/// server-stamped timestamps — the documented compromise from spec.md §9:
/// a pushed list element can't embed a server-side expression.
pub fn apply_trace(
    descriptor: &mut WriteDescriptor,
    config: &ResolvedConfig,
    kind: WriteKind,
    trace: Option<&TraceContext>,
    now: DateTime<Utc>,
) {
    let Some(ctx) = trace else {
        return;
    };
    let mut record = ctx.clone();
    record.insert("_op".to_string(), Value::from(kind.op_name()));
    record.insert("_at".to_string(), timestamp_value(now));
    let value = Value::Object(record.into_iter().collect());

    match config.trace_strategy {
        TraceStrategy::Latest => {
            descriptor.set.insert(config.trace_key.to_string(), value);
        }
        TraceStrategy::Bounded(limit) => {
            descriptor.push.push(PushOp {
                field: config.trace_key.to_string(),
                value,
                keep_last_n: Some(limit),
            });
        }
        TraceStrategy::Unbounded => {
            descriptor.push.push(PushOp {
                field: config.trace_key.to_string(),
                value,
                keep_last_n: None,
            });
        }
    }
}

/// Run the full enrichment pipeline: seed with the caller's `set`/`unset`,
/// then timestamp, version, and trace layers in that fixed order.
pub fn compose(
    user_set: BTreeMap<String, Value>,
    user_unset: Vec<String>,
    config: &ResolvedConfig,
    kind: WriteKind,
    trace: Option<&TraceContext>,
) -> WriteDescriptor {
    let now = now_from(config);
    let mut descriptor = WriteDescriptor {
        set: user_set,
        unset: user_unset,
        ..Default::default()
    };
    apply_timestamps(&mut descriptor, config, kind, now);
    apply_version(&mut descriptor, config, kind);
    apply_trace(&mut descriptor, config, kind, trace, now);
    descriptor
}

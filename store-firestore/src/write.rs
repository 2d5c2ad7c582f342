//! Translates a neutral `WriteDescriptor` into Firestore's server-evaluated
//! field operators (spec.md §6: set, delete-field, increment, array-union,
//! server-timestamp).
//!
//! Firestore has no "set only on insert" operator, so `set_on_insert` and
//! `set` are merged into one literal field map — harmless for `create`
//! (there is no pre-existing document to distinguish them from) and
//! correct for update/delete, where `set_on_insert` is always empty.

use store_core::enrich::WriteDescriptor;
use store_core::mapping::Document;

/// The server-side effects a single write needs beyond a plain field merge.
#[derive(Debug, Clone, Default)]
pub struct FirestoreWritePlan {
    /// Literal field values to merge into the document (`set` ∪
    /// `set_on_insert`, minus any field also named in `server_timestamp`).
    pub merge_fields: Document,
    /// Field paths to delete.
    pub delete_fields: Vec<String>,
    /// Field, delta.
    pub increments: Vec<(String, i64)>,
    /// Field, single element to union in. Firestore's `array_union`
    /// transform has no slice-on-append; `keep_last_n` must never be
    /// `Some` here, enforced upstream by `ResolvedConfig::resolve`
    /// rejecting `TraceStrategy::Bounded` on a backend that reports
    /// `supports_bounded_trace() == false`.
    pub array_unions: Vec<(String, serde_json::Value)>,
    /// Fields the server should stamp with `REQUEST_TIME`.
    pub server_timestamps: Vec<String>,
}

pub fn build_plan(descriptor: &WriteDescriptor) -> FirestoreWritePlan {
    let mut merge_fields = Document::new();
    for (k, v) in &descriptor.set {
        merge_fields.insert(k.clone(), v.clone());
    }
    for (k, v) in &descriptor.set_on_insert {
        merge_fields.insert(k.clone(), v.clone());
    }

    for op in &descriptor.push {
        debug_assert!(
            op.keep_last_n.is_none(),
            "bounded trace reached the Firestore adapter; ResolvedConfig::resolve should have rejected it"
        );
    }

    FirestoreWritePlan {
        merge_fields,
        delete_fields: descriptor.unset.clone(),
        increments: descriptor.inc.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        array_unions: descriptor.push.iter().map(|op| (op.field.clone(), op.value.clone())).collect(),
        server_timestamps: descriptor.current_date.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use store_core::enrich::PushOp;
    use store_core::filter::Value;

    #[test]
    fn set_and_set_on_insert_merge_into_one_map() {
        let mut set = BTreeMap::new();
        set.insert("name".to_string(), Value::from("ada"));
        let mut set_on_insert = BTreeMap::new();
        set_on_insert.insert("_version".to_string(), Value::from(1));
        let descriptor = WriteDescriptor { set, set_on_insert, ..Default::default() };
        let plan = build_plan(&descriptor);
        assert_eq!(plan.merge_fields.get("name").unwrap(), "ada");
        assert_eq!(plan.merge_fields.get("_version").unwrap(), 1);
    }

    #[test]
    fn current_date_fields_become_server_timestamps() {
        let descriptor = WriteDescriptor { current_date: vec!["_updatedAt".into()], ..Default::default() };
        let plan = build_plan(&descriptor);
        assert_eq!(plan.server_timestamps, vec!["_updatedAt".to_string()]);
    }

    #[test]
    fn push_without_limit_becomes_array_union() {
        let descriptor = WriteDescriptor {
            push: vec![PushOp { field: "_trace".into(), value: Value::from("x"), keep_last_n: None }],
            ..Default::default()
        };
        let plan = build_plan(&descriptor);
        assert_eq!(plan.array_unions, vec![("_trace".to_string(), Value::from("x"))]);
    }
}

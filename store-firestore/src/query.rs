//! Translates the neutral `QueryExpr`/`SortKey` AST into the raw Firestore
//! v1 `StructuredQuery` filter/order messages.
//!
//! Firestore has no native "field does not exist" operator: a query can
//! only compare fields that are present, and its `IS_NULL`/`IS_NOT_NULL`
//! unary filters are the closest equivalent. `Exists(field, false)` is
//! therefore translated as `field IS_NULL` rather than true absence — this
//! relies on the repository's own convention (`Cursor::capture` and the
//! mapping layer) of treating "absent" and "explicit null" identically, so
//! every document that participates in a sort/cursor on a given field must
//! carry it, explicitly null if unset. `Exists(field, true)` becomes
//! `field IS_NOT_NULL`.

use gcloud_sdk::google::firestore::v1::structured_query::field_filter::Operator as FieldOp;
use gcloud_sdk::google::firestore::v1::structured_query::unary_filter::Operator as UnaryOp;
use gcloud_sdk::google::firestore::v1::structured_query::{
    composite_filter::Operator as CompositeOp, CompositeFilter, Direction, FieldFilter, FieldReference, Filter,
    Order, UnaryFilter,
};
use gcloud_sdk::google::firestore::v1::structured_query::filter::FilterType;
use gcloud_sdk::google::firestore::v1::structured_query::unary_filter::OperandType;
use store_core::cursor::SortKey;
use store_core::filter::{Direction as NeutralDirection, QueryExpr, Value};

use crate::adapter::json_to_fs_value;

/// Marker field no real document carries, used to build an unsatisfiable
/// filter for `QueryExpr::Or(vec![])` (the constraint gate's "matches
/// nothing" convention).
const UNSATISFIABLE_FIELD: &str = "__store_unsatisfiable__";

fn field_ref(field: &str) -> FieldReference {
    FieldReference { field_path: field.to_string() }
}

fn field_filter(field: &str, op: FieldOp, value: &Value) -> Filter {
    Filter {
        filter_type: Some(FilterType::FieldFilter(FieldFilter {
            field: Some(field_ref(field)),
            op: op as i32,
            value: Some(json_to_fs_value(value)),
        })),
    }
}

fn unary_filter(field: &str, op: UnaryOp) -> Filter {
    Filter {
        filter_type: Some(FilterType::UnaryFilter(UnaryFilter {
            op: op as i32,
            operand_type: Some(OperandType::Field(field_ref(field))),
        })),
    }
}

pub fn translate(expr: &QueryExpr) -> Filter {
    match expr {
        QueryExpr::Eq(field, value) => field_filter(field, FieldOp::Equal, value),
        QueryExpr::Gt(field, value) => field_filter(field, FieldOp::GreaterThan, value),
        QueryExpr::Lt(field, value) => field_filter(field, FieldOp::LessThan, value),
        QueryExpr::Exists(field, true) => unary_filter(field, UnaryOp::IsNotNull),
        QueryExpr::Exists(field, false) => unary_filter(field, UnaryOp::IsNull),
        QueryExpr::And(clauses) => composite(CompositeOp::And, clauses),
        QueryExpr::Or(clauses) => {
            if clauses.is_empty() {
                field_filter(UNSATISFIABLE_FIELD, FieldOp::Equal, &Value::from(true))
            } else {
                composite(CompositeOp::Or, clauses)
            }
        }
    }
}

fn composite(op: CompositeOp, clauses: &[QueryExpr]) -> Filter {
    Filter {
        filter_type: Some(FilterType::CompositeFilter(CompositeFilter {
            op: op as i32,
            filters: clauses.iter().map(translate).collect(),
        })),
    }
}

pub fn translate_sort(sort: &[SortKey]) -> Vec<Order> {
    sort.iter()
        .map(|key| {
            let direction = match key.direction {
                NeutralDirection::Asc => Direction::Ascending,
                NeutralDirection::Desc => Direction::Descending,
            };
            Order { field: Some(field_ref(&key.field)), direction: direction as i32 }
        })
        .collect()
}

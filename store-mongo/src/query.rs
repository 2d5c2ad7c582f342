//! Translates the neutral `QueryExpr`/`SortKey` AST into native Mongo query
//! and sort documents.

use bson::{doc, Bson, Document as BsonDoc};
use store_core::filter::{Direction, QueryExpr, Value};

pub fn json_to_bson(value: &Value) -> Bson {
    bson::to_bson(value).unwrap_or(Bson::Null)
}

/// `true`: field present and not null. `false`: field absent or explicitly
/// null — matches `QueryExpr::Exists`'s contract exactly.
fn exists_clause(field: &str, present: bool) -> BsonDoc {
    if present {
        doc! { field: { "$exists": true, "$ne": Bson::Null } }
    } else {
        doc! {
            "$or": [
                { field: { "$exists": false } },
                { field: Bson::Null },
            ]
        }
    }
}

pub fn translate(expr: &QueryExpr) -> BsonDoc {
    match expr {
        QueryExpr::Eq(field, value) => doc! { field: json_to_bson(value) },
        QueryExpr::Gt(field, value) => doc! { field: { "$gt": json_to_bson(value) } },
        QueryExpr::Lt(field, value) => doc! { field: { "$lt": json_to_bson(value) } },
        QueryExpr::Exists(field, present) => exists_clause(field, *present),
        QueryExpr::And(clauses) => {
            if clauses.is_empty() {
                doc! {}
            } else {
                doc! { "$and": clauses.iter().map(translate).collect::<Vec<_>>() }
            }
        }
        QueryExpr::Or(clauses) => {
            if clauses.is_empty() {
                // The constraint gate's documented convention for "matches
                // nothing" (`QueryExpr::Or(vec![])`); Mongo has no native
                // false literal filter, so fabricate an unsatisfiable one.
                doc! { "_id": { "$exists": false, "$type": "impossible" } }
            } else {
                doc! { "$or": clauses.iter().map(translate).collect::<Vec<_>>() }
            }
        }
    }
}

pub fn translate_sort(sort: &[store_core::cursor::SortKey]) -> BsonDoc {
    let mut out = BsonDoc::new();
    for key in sort {
        let direction = match key.direction {
            Direction::Asc => 1,
            Direction::Desc => -1,
        };
        out.insert(key.field.clone(), direction);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use store_core::filter::QueryExpr;

    #[test]
    fn eq_translates_to_plain_field_match() {
        let expr = QueryExpr::Eq("tenant".into(), Value::from("acme"));
        assert_eq!(translate(&expr), doc! { "tenant": "acme" });
    }

    #[test]
    fn exists_true_excludes_null() {
        let expr = QueryExpr::Exists("age".into(), true);
        assert_eq!(
            translate(&expr),
            doc! { "age": { "$exists": true, "$ne": Bson::Null } }
        );
    }

    #[test]
    fn exists_false_covers_absent_and_null() {
        let expr = QueryExpr::Exists("age".into(), false);
        assert_eq!(
            translate(&expr),
            doc! { "$or": [
                { "age": { "$exists": false } },
                { "age": Bson::Null },
            ] }
        );
    }

    #[test]
    fn and_of_two_clauses_uses_and_operator() {
        let expr = QueryExpr::And(vec![
            QueryExpr::Eq("a".into(), Value::from(1)),
            QueryExpr::Gt("b".into(), Value::from(2)),
        ]);
        assert_eq!(
            translate(&expr),
            doc! { "$and": [
                { "a": 1 },
                { "b": { "$gt": 2 } },
            ] }
        );
    }

    #[test]
    fn empty_or_is_unsatisfiable() {
        let expr = QueryExpr::Or(Vec::new());
        let translated = translate(&expr);
        assert!(translated.contains_key("_id"));
    }

    #[test]
    fn sort_maps_direction_to_plus_minus_one() {
        use store_core::cursor::SortKey;
        let sort = vec![
            SortKey::new("createdAt", Direction::Desc),
            SortKey::new("id", Direction::Asc),
        ];
        let doc = translate_sort(&sort);
        assert_eq!(doc.get_i32("createdAt").unwrap(), -1);
        assert_eq!(doc.get_i32("id").unwrap(), 1);
    }
}

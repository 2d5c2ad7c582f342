use crate::error::RepoError;
use crate::filter::{Direction, QueryExpr, Value};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// One column of an `orderBy` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub direction: Direction,
}

impl SortKey {
    pub fn new(field: impl Into<String>, direction: Direction) -> Self {
        Self { field: field.into(), direction }
    }
}

/// An opaque pagination cursor: one captured value per sort key, in the
/// same order as the `orderBy` clause that produced it. `None` captures a
/// field that was absent (or explicitly `null`) on the document the cursor
/// was cut from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    values: Vec<Option<Value>>,
}

impl Cursor {
    /// Capture a cursor from the last document of a page, in `orderBy`
    /// order (the identity tiebreaker, if any, included as the final key).
    pub fn capture(sort: &[SortKey], document: &crate::mapping::Document) -> Cursor {
        let values = sort
            .iter()
            .map(|key| document.get(&key.field).filter(|v| !v.is_null()).cloned())
            .collect();
        Cursor { values }
    }

    /// Encode as an opaque, URL-safe token. Callers must treat this as a
    /// black box; the only supported operation on it is `decode`.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(&self.values).expect("cursor values are plain JSON");
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decode a token produced by [`Cursor::encode`], rejecting any cursor
    /// whose shape doesn't match the current `orderBy` clause's arity —
    /// the likely result of a cursor cut under a different sort.
    pub fn decode(token: &str, expected_len: usize) -> Result<Cursor, RepoError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| RepoError::InvalidCursor(e.to_string()))?;
        let values: Vec<Option<Value>> =
            serde_json::from_slice(&bytes).map_err(|e| RepoError::InvalidCursor(e.to_string()))?;
        if values.len() != expected_len {
            return Err(RepoError::InvalidCursor(format!(
                "cursor carries {} value(s), expected {expected_len} for the active sort",
                values.len()
            )));
        }
        Ok(Cursor { values })
    }
}

/// Build the disjunction-of-conjunctions "strictly after this cursor" query
/// for a lexicographic multi-key sort.
///
/// For sort keys `k0..kn-1` and a cursor `(v0..vn-1)`, the result is
/// effectively:
///
/// ```text
/// OR(
///   k0 `cmp0` v0,
///   k0 == v0 AND k1 `cmp1` v1,
///   k0 == v0 AND k1 == v1 AND k2 `cmp2` v2,
///   ...
/// )
/// ```
///
/// where `cmpN` is `>` for an ascending key and `<` for a descending one.
/// A captured value that was absent/null is the extremum for its
/// direction — the minimum under ascending, the maximum under
/// descending — so the strict comparison against it reduces to "this
/// field now holds a concrete value" (`Exists(field, true)`), and an
/// equality prefix against an absent/null capture reduces to
/// `Exists(field, false)`.
pub fn after_filter(sort: &[SortKey], cursor: &Cursor) -> QueryExpr {
    assert_eq!(sort.len(), cursor.values.len(), "sort/cursor arity mismatch");

    let mut branches = Vec::with_capacity(sort.len());
    for i in 0..sort.len() {
        let mut clauses = Vec::with_capacity(i + 1);
        for (key, captured) in sort[..i].iter().zip(&cursor.values[..i]) {
            clauses.push(equality_clause(key, captured));
        }
        clauses.push(range_clause(&sort[i], &cursor.values[i]));
        branches.push(QueryExpr::and(clauses));
    }

    if branches.len() == 1 {
        branches.into_iter().next().unwrap()
    } else {
        QueryExpr::Or(branches)
    }
}

fn equality_clause(key: &SortKey, captured: &Option<Value>) -> QueryExpr {
    match captured {
        Some(v) => QueryExpr::Eq(key.field.clone(), v.clone()),
        None => QueryExpr::Exists(key.field.clone(), false),
    }
}

fn range_clause(key: &SortKey, captured: &Option<Value>) -> QueryExpr {
    match (key.direction, captured) {
        (Direction::Asc, None) => QueryExpr::Exists(key.field.clone(), true),
        // Descending, captured value absent/null: absent/null is already the
        // maximum under descending order, so nothing can sort strictly after
        // it. An empty `Or` is the established "matches nothing" sentinel.
        (Direction::Desc, None) => QueryExpr::Or(Vec::new()),
        (Direction::Asc, Some(v)) => QueryExpr::Gt(key.field.clone(), v.clone()),
        (Direction::Desc, Some(v)) => QueryExpr::Or(vec![
            QueryExpr::Lt(key.field.clone(), v.clone()),
            QueryExpr::Exists(key.field.clone(), false),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::Document;

    fn doc(pairs: &[(&str, Value)]) -> Document {
        let mut d = Document::new();
        for (k, v) in pairs {
            d.insert((*k).to_string(), v.clone());
        }
        d
    }

    #[test]
    fn capture_records_absent_as_none() {
        let sort = vec![SortKey::new("name", Direction::Asc)];
        let cursor = Cursor::capture(&sort, &doc(&[]));
        assert_eq!(cursor.values, vec![None]);
    }

    #[test]
    fn capture_treats_explicit_null_as_absent() {
        let sort = vec![SortKey::new("name", Direction::Asc)];
        let cursor = Cursor::capture(&sort, &doc(&[("name", Value::Null)]));
        assert_eq!(cursor.values, vec![None]);
    }

    #[test]
    fn round_trips_through_encode_decode() {
        let sort = vec![SortKey::new("createdAt", Direction::Desc), SortKey::new("id", Direction::Asc)];
        let cursor = Cursor::capture(&sort, &doc(&[("createdAt", Value::from(42)), ("id", Value::from("abc"))]));
        let token = cursor.encode();
        let decoded = Cursor::decode(&token, 2).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn decode_rejects_arity_mismatch() {
        let sort = vec![SortKey::new("name", Direction::Asc)];
        let cursor = Cursor::capture(&sort, &doc(&[("name", Value::from("a"))]));
        let token = cursor.encode();
        let err = Cursor::decode(&token, 2).unwrap_err();
        assert!(matches!(err, RepoError::InvalidCursor(_)));
    }

    #[test]
    fn single_key_ascending_is_plain_gt() {
        let sort = vec![SortKey::new("age", Direction::Asc)];
        let cursor = Cursor { values: vec![Some(Value::from(30))] };
        let expr = after_filter(&sort, &cursor);
        assert_eq!(expr, QueryExpr::Gt("age".into(), Value::from(30)));
    }

    #[test]
    fn single_key_descending_includes_missing() {
        let sort = vec![SortKey::new("age", Direction::Desc)];
        let cursor = Cursor { values: vec![Some(Value::from(30))] };
        let expr = after_filter(&sort, &cursor);
        assert_eq!(
            expr,
            QueryExpr::Or(vec![
                QueryExpr::Lt("age".into(), Value::from(30)),
                QueryExpr::Exists("age".into(), false),
            ])
        );
    }

    #[test]
    fn missing_captured_value_reduces_to_exists_on_ascending() {
        let sort = vec![SortKey::new("age", Direction::Asc)];
        let cursor = Cursor { values: vec![None] };
        let expr = after_filter(&sort, &cursor);
        assert_eq!(expr, QueryExpr::Exists("age".into(), true));
    }

    #[test]
    fn missing_captured_value_is_unsatisfiable_on_descending() {
        let sort = vec![SortKey::new("age", Direction::Desc)];
        let cursor = Cursor { values: vec![None] };
        let expr = after_filter(&sort, &cursor);
        assert_eq!(expr, QueryExpr::Or(Vec::new()));
    }

    #[test]
    fn two_keys_build_two_branch_disjunction() {
        let sort = vec![SortKey::new("status", Direction::Asc), SortKey::new("id", Direction::Asc)];
        let cursor = Cursor { values: vec![Some(Value::from("active")), Some(Value::from("42"))] };
        let expr = after_filter(&sort, &cursor);
        let QueryExpr::Or(branches) = expr else { panic!("expected disjunction") };
        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0], QueryExpr::Gt("status".into(), Value::from("active")));
        assert_eq!(
            branches[1],
            QueryExpr::And(vec![
                QueryExpr::Eq("status".into(), Value::from("active")),
                QueryExpr::Gt("id".into(), Value::from("42")),
            ])
        );
    }

    #[test]
    fn equality_prefix_on_absent_capture_uses_exists_false() {
        let sort = vec![SortKey::new("region", Direction::Asc), SortKey::new("id", Direction::Asc)];
        let cursor = Cursor { values: vec![None, Some(Value::from("7"))] };
        let expr = after_filter(&sort, &cursor);
        let QueryExpr::Or(branches) = expr else { panic!("expected disjunction") };
        assert_eq!(
            branches[1],
            QueryExpr::And(vec![
                QueryExpr::Exists("region".into(), false),
                QueryExpr::Gt("id".into(), Value::from("7")),
            ])
        );
    }
}

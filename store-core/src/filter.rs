use std::collections::BTreeMap;

/// A scalar or structured value. Re-exported so callers don't need a direct
/// `serde_json` dependency just to build filters and updates.
pub type Value = serde_json::Value;

/// The only filter shape exposed at the public API: a flat conjunction of
/// equalities. Deliberately weaker than `QueryExpr` — ranges, `$or`, and
/// regex are internal-only, used by the cursor engine and the constraint
/// gate, never by callers.
pub type Filter = BTreeMap<String, Value>;

/// Sort direction for `orderBy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

/// The internal query AST every backend adapter translates into its native
/// query representation. Built by the constraint gate (scope + soft-delete
/// augmentation) and the cursor engine (lexicographic pagination bounds);
/// never constructed directly by callers.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpr {
    Eq(String, Value),
    Gt(String, Value),
    Lt(String, Value),
    /// `true`: field is present and not null. `false`: field is absent or
    /// explicitly null.
    Exists(String, bool),
    And(Vec<QueryExpr>),
    Or(Vec<QueryExpr>),
}

impl QueryExpr {
    /// Flatten a public equality `Filter` into a conjunction of `Eq` nodes.
    pub fn from_eq_filter(filter: &Filter) -> QueryExpr {
        QueryExpr::And(
            filter
                .iter()
                .map(|(k, v)| QueryExpr::Eq(k.clone(), v.clone()))
                .collect(),
        )
    }

    /// `And` that flattens away an empty conjunction into `And(vec![])`,
    /// which adapters treat as "match everything".
    pub fn and(mut clauses: Vec<QueryExpr>) -> QueryExpr {
        if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            QueryExpr::And(clauses)
        }
    }
}

/// A specification: a named equality predicate with a human-readable
/// description, composable via [`combine`].
pub trait Specification: Send + Sync {
    fn to_filter(&self) -> Filter;
    fn description(&self) -> String;
}

/// An equality predicate built directly from a field/value pair.
pub struct FieldEquals {
    field: String,
    value: Value,
}

impl FieldEquals {
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

impl Specification for FieldEquals {
    fn to_filter(&self) -> Filter {
        let mut f = Filter::new();
        f.insert(self.field.clone(), self.value.clone());
        f
    }

    fn description(&self) -> String {
        format!("{} == {}", self.field, self.value)
    }
}

struct Combined {
    filter: Filter,
    description: String,
}

impl Specification for Combined {
    fn to_filter(&self) -> Filter {
        self.filter.clone()
    }

    fn description(&self) -> String {
        self.description.clone()
    }
}

/// Combine specifications by right-folding their filter maps (last key
/// wins on collision) and concatenating their descriptions with " AND ".
///
/// `combine(&[s])` is equal in effect to `s` alone; combining is
/// associative in effect, though the description is merely concatenated in
/// the order given.
pub fn combine(specs: &[&dyn Specification]) -> impl Specification {
    let mut filter = Filter::new();
    let mut descriptions = Vec::with_capacity(specs.len());
    for spec in specs {
        filter.extend(spec.to_filter());
        descriptions.push(spec.description());
    }
    Combined {
        filter,
        description: descriptions.join(" AND "),
    }
}

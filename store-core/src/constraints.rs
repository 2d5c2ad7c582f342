use crate::config::ResolvedConfig;
use crate::error::RepoError;
use crate::filter::{Filter, QueryExpr};
use std::collections::BTreeSet;

/// Policy applied when a read filter names a scope key with a
/// contradicting value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScopeBreachPolicy {
    /// Return an empty result (default).
    #[default]
    Empty,
    /// Fail with `RepoError::ScopeBreach`.
    Error,
}

/// Outcome of applying the read-path constraint gate: either the filter is
/// safe to run (augmented with scope + soft-delete predicates), or the
/// caller's chosen policy says to short-circuit to an empty result.
pub enum Constrained {
    Query(QueryExpr),
    EmptyResult,
}

/// Raise a scope breach iff `filter` mentions a scope key with a value
/// other than the scope's own, then intersect with the scope and, if
/// soft-delete is enabled, require the document isn't marked deleted.
pub fn apply_read_constraints(
    filter: &Filter,
    config: &ResolvedConfig,
    policy: ScopeBreachPolicy,
) -> Result<Constrained, RepoError> {
    for (key, value) in filter {
        if let Some(scoped) = config.scope.get(key) {
            if scoped != value {
                return match policy {
                    ScopeBreachPolicy::Empty => Ok(Constrained::EmptyResult),
                    ScopeBreachPolicy::Error => Err(RepoError::ScopeBreach(key.clone())),
                };
            }
        }
    }

    let mut clauses = vec![QueryExpr::from_eq_filter(filter)];
    for (key, value) in &config.scope {
        clauses.push(QueryExpr::Eq(key.clone(), value.clone()));
    }
    if let Some(soft_delete_key) = &config.soft_delete_key {
        clauses.push(QueryExpr::Exists(soft_delete_key.clone(), false));
    }
    Ok(Constrained::Query(QueryExpr::and(clauses)))
}

/// Validate a write's `set`/`unset` key sets against the readonly set and
/// against each other, synchronously, before any backend I/O.
pub fn validate_write(
    set_keys: &BTreeSet<String>,
    unset_keys: &BTreeSet<String>,
    config: &ResolvedConfig,
) -> Result<(), RepoError> {
    let overlap: Vec<String> = set_keys.intersection(unset_keys).cloned().collect();
    if !overlap.is_empty() {
        return Err(RepoError::SetUnsetOverlap(overlap));
    }

    let mut violations: Vec<String> = set_keys
        .iter()
        .chain(unset_keys.iter())
        .filter(|k| config.readonly_on_update.contains(*k))
        .cloned()
        .collect();
    violations.sort();
    violations.dedup();
    if !violations.is_empty() {
        return Err(RepoError::ReadonlyViolation(violations));
    }
    Ok(())
}

/// Validate that a `create` payload's scope-attribute values (if any were
/// supplied) match the repository's scope.
pub fn validate_create_scope(payload: &Filter, config: &ResolvedConfig) -> Result<(), RepoError> {
    for (key, scoped_value) in &config.scope {
        if let Some(supplied) = payload.get(key) {
            if supplied != scoped_value {
                return Err(RepoError::ReadonlyViolation(vec![key.clone()]));
            }
        }
    }
    Ok(())
}

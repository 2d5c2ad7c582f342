use crate::error::{ConfigProblem, RepoError};
use crate::filter::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// A repository's fixed tenant/logical scope: an immutable partial map from
/// attribute name to a primitive value, bound at construction.
pub type Scope = BTreeMap<String, Value>;

/// How identities are produced on `create`.
#[derive(Clone)]
pub enum IdStrategy {
    /// Let the backend assign an identity natively.
    ServerGenerated,
    /// Call the given generator before dispatch, so identities are stable
    /// even if the write later fails (needed for `createMany` partial
    /// failure reporting, spec.md §4.7).
    Supplied(Arc<dyn Fn() -> String + Send + Sync>),
}

impl std::fmt::Debug for IdStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdStrategy::ServerGenerated => write!(f, "IdStrategy::ServerGenerated"),
            IdStrategy::Supplied(_) => write!(f, "IdStrategy::Supplied(..)"),
        }
    }
}

/// A clock used to stamp timestamps client-side.
pub type Clock = Arc<dyn Fn() -> chrono::DateTime<chrono::Utc> + Send + Sync>;

/// How timestamps are produced.
#[derive(Clone)]
pub enum Timestamps {
    Off,
    /// Client-stamped using the given clock.
    Clock(Clock),
    /// Server-stamped (e.g. Mongo `$currentDate`, Firestore
    /// `FieldValue::server_timestamp`).
    Server,
}

impl std::fmt::Debug for Timestamps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Timestamps::Off => write!(f, "Timestamps::Off"),
            Timestamps::Clock(_) => write!(f, "Timestamps::Clock(..)"),
            Timestamps::Server => write!(f, "Timestamps::Server"),
        }
    }
}

/// Whether a managed key uses its reserved default name (hidden on read)
/// or a caller-chosen attribute of `T` (visible on read).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyChoice {
    Default(&'static str),
    Named(String),
}

impl KeyChoice {
    pub fn name(&self) -> &str {
        match self {
            KeyChoice::Default(s) => s,
            KeyChoice::Named(s) => s,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, KeyChoice::Default(_))
    }
}

#[derive(Clone, Debug)]
pub struct TimestampKeys {
    pub created_at: KeyChoice,
    pub updated_at: KeyChoice,
    pub deleted_at: KeyChoice,
}

impl Default for TimestampKeys {
    fn default() -> Self {
        Self {
            created_at: KeyChoice::Default("_createdAt"),
            updated_at: KeyChoice::Default("_updatedAt"),
            deleted_at: KeyChoice::Default("_deletedAt"),
        }
    }
}

/// How the monotonic version counter is stored.
#[derive(Clone, Debug)]
pub enum Versioning {
    Off,
    Default,
    Named(String),
}

/// How per-write audit records are persisted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceStrategy {
    /// Overwrite a single value per write.
    Latest,
    /// Capped append-only list; oldest evicted server-side.
    Bounded(usize),
    /// Unbounded append-only list.
    Unbounded,
}

/// User-supplied configuration, as passed to `Repository::new`.
#[derive(Clone, Debug)]
pub struct UserConfig {
    pub id_key: String,
    pub id_strategy: IdStrategy,
    pub mirror_id: bool,
    pub soft_delete: bool,
    pub soft_delete_key: KeyChoice,
    pub timestamps: Timestamps,
    pub timestamp_keys: TimestampKeys,
    pub versioning: Versioning,
    pub trace_strategy: TraceStrategy,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            id_key: "id".to_string(),
            id_strategy: IdStrategy::ServerGenerated,
            mirror_id: false,
            soft_delete: false,
            soft_delete_key: KeyChoice::Default("_deleted"),
            timestamps: Timestamps::Off,
            timestamp_keys: TimestampKeys::default(),
            versioning: Versioning::Off,
            trace_strategy: TraceStrategy::Latest,
        }
    }
}

/// Reserved default name for the trace key. Unlike every other managed
/// key, the trace key can never be overridden to a visible attribute name
/// (spec.md §3, managed-attribute set M).
pub const TRACE_KEY: &str = "_trace";

/// The fully validated, immutable configuration a `Repository` is built
/// from. Constructing this is the only place contract (a)-(e) from
/// spec.md §4.1 is checked.
#[derive(Clone, Debug)]
pub struct ResolvedConfig {
    pub id_key: String,
    pub id_strategy: IdStrategy,
    pub mirror_id: bool,
    pub soft_delete: bool,
    pub soft_delete_key: Option<String>,
    pub timestamps: Timestamps,
    pub timestamp_keys: Option<TimestampKeys>,
    pub version_key: Option<String>,
    pub trace_key: &'static str,
    pub trace_strategy: TraceStrategy,
    /// The managed-attribute set M: names the repository writes/reads on
    /// the caller's behalf and forbids external mutation on.
    pub managed: BTreeSet<String>,
    /// M plus every scope key; readonly on update/unset.
    pub readonly_on_update: BTreeSet<String>,
    /// Keys whose meta value is stored under a reserved default name and
    /// must therefore be stripped from read results.
    pub hidden_meta_keys: BTreeSet<String>,
    pub scope: Scope,
}

impl ResolvedConfig {
    /// Validate and resolve a `UserConfig` against a fixed `Scope`.
    ///
    /// `backend_supports_bounded_trace` lets each adapter tell the resolver
    /// whether it can do a server-side slice-on-push (Backend-D can,
    /// Backend-F cannot; spec.md §4.1 rule (e), §6).
    pub fn resolve(
        config: UserConfig,
        scope: Scope,
        backend_supports_bounded_trace: bool,
        backend_internal_id_key: Option<&str>,
    ) -> Result<ResolvedConfig, RepoError> {
        let result = Self::try_resolve(config, scope, backend_supports_bounded_trace, backend_internal_id_key);
        if let Err(err) = &result {
            tracing::error!(error = %err, "repository configuration failed to resolve");
        }
        result
    }

    fn try_resolve(
        config: UserConfig,
        scope: Scope,
        backend_supports_bounded_trace: bool,
        backend_internal_id_key: Option<&str>,
    ) -> Result<ResolvedConfig, RepoError> {
        for (key, value) in &scope {
            if !(value.is_string() || value.is_number() || value.is_boolean()) {
                return Err(RepoError::Configuration(ConfigProblem::NonPrimitiveScopeValue(
                    key.clone(),
                )));
            }
        }

        let soft_delete_key = config.soft_delete.then(|| config.soft_delete_key.name().to_string());
        let timestamp_keys = (!matches!(config.timestamps, Timestamps::Off)).then(|| config.timestamp_keys.clone());
        let version_key = match &config.versioning {
            Versioning::Off => None,
            Versioning::Default => Some("_version".to_string()),
            Versioning::Named(n) => Some(n.clone()),
        };

        let mut managed_names: Vec<String> = vec![config.id_key.clone()];
        if let Some(internal_id) = backend_internal_id_key {
            managed_names.push(internal_id.to_string());
        }
        if let Some(k) = &soft_delete_key {
            managed_names.push(k.clone());
        }
        if let Some(tk) = &timestamp_keys {
            managed_names.push(tk.created_at.name().to_string());
            managed_names.push(tk.updated_at.name().to_string());
            managed_names.push(tk.deleted_at.name().to_string());
        }
        if let Some(v) = &version_key {
            managed_names.push(v.clone());
        }
        managed_names.push(TRACE_KEY.to_string());

        let mut seen = BTreeSet::new();
        for name in &managed_names {
            if !seen.insert(name.clone()) {
                return Err(RepoError::Configuration(ConfigProblem::DuplicateManagedKey(name.clone())));
            }
        }

        let managed: BTreeSet<String> = managed_names.into_iter().collect();

        for key in scope.keys() {
            if managed.contains(key) {
                return Err(RepoError::Configuration(ConfigProblem::ReadonlyKeyInScope(key.clone())));
            }
        }

        if let TraceStrategy::Bounded(limit) = config.trace_strategy {
            if limit == 0 {
                return Err(RepoError::Configuration(ConfigProblem::BoundedWithoutLimit));
            }
            if !backend_supports_bounded_trace {
                return Err(RepoError::Configuration(ConfigProblem::BoundedOnUnsupportedBackend));
            }
        }

        let mut hidden_meta_keys = BTreeSet::new();
        if soft_delete_key.is_some() && config.soft_delete_key.is_default() {
            hidden_meta_keys.insert(config.soft_delete_key.name().to_string());
        }
        if let Some(tk) = &timestamp_keys {
            for choice in [&tk.created_at, &tk.updated_at, &tk.deleted_at] {
                if choice.is_default() {
                    hidden_meta_keys.insert(choice.name().to_string());
                }
            }
        }
        if matches!(config.versioning, Versioning::Default) {
            hidden_meta_keys.insert("_version".to_string());
        }
        // the trace key is always the reserved default name.
        hidden_meta_keys.insert(TRACE_KEY.to_string());

        let readonly_on_update: BTreeSet<String> =
            managed.iter().cloned().chain(scope.keys().cloned()).collect();

        Ok(ResolvedConfig {
            id_key: config.id_key,
            id_strategy: config.id_strategy,
            mirror_id: config.mirror_id,
            soft_delete: config.soft_delete,
            soft_delete_key,
            timestamps: config.timestamps,
            timestamp_keys,
            version_key,
            trace_key: TRACE_KEY,
            trace_strategy: config.trace_strategy,
            managed,
            readonly_on_update,
            hidden_meta_keys,
            scope,
        })
    }
}

/// Fluent builder over [`UserConfig`].
#[derive(Clone, Debug, Default)]
pub struct RepositoryBuilder {
    config: UserConfig,
}

impl RepositoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_key(mut self, key: impl Into<String>) -> Self {
        self.config.id_key = key.into();
        self
    }

    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.config.id_strategy = strategy;
        self
    }

    pub fn mirror_id(mut self, mirror: bool) -> Self {
        self.config.mirror_id = mirror;
        self
    }

    pub fn soft_delete(mut self, enabled: bool) -> Self {
        self.config.soft_delete = enabled;
        self
    }

    pub fn soft_delete_key(mut self, key: impl Into<String>) -> Self {
        self.config.soft_delete_key = KeyChoice::Named(key.into());
        self
    }

    pub fn timestamps(mut self, timestamps: Timestamps) -> Self {
        self.config.timestamps = timestamps;
        self
    }

    pub fn versioning(mut self, versioning: Versioning) -> Self {
        self.config.versioning = versioning;
        self
    }

    pub fn trace_strategy(mut self, strategy: TraceStrategy) -> Self {
        self.config.trace_strategy = strategy;
        self
    }

    pub fn build(self) -> UserConfig {
        self.config
    }

    pub fn resolve(
        self,
        scope: Scope,
        backend_supports_bounded_trace: bool,
        backend_internal_id_key: Option<&str>,
    ) -> Result<ResolvedConfig, RepoError> {
        ResolvedConfig::resolve(self.config, scope, backend_supports_bounded_trace, backend_internal_id_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_resolves() {
        let resolved = ResolvedConfig::resolve(UserConfig::default(), Scope::new(), true, None).unwrap();
        assert_eq!(resolved.id_key, "id");
        assert!(resolved.managed.contains("id"));
        assert!(resolved.managed.contains(TRACE_KEY));
        assert_eq!(resolved.managed.len(), 2);
    }

    #[test]
    fn backend_internal_id_key_is_added_to_managed() {
        let resolved =
            ResolvedConfig::resolve(UserConfig::default(), Scope::new(), true, Some("_id")).unwrap();
        assert!(resolved.managed.contains("_id"));
    }

    #[test]
    fn duplicate_managed_key_rejected() {
        let config = RepositoryBuilder::new()
            .soft_delete(true)
            .soft_delete_key("status")
            .versioning(Versioning::Named("status".into()))
            .build();
        let err = ResolvedConfig::resolve(config, Scope::new(), true, None).unwrap_err();
        assert!(matches!(
            err,
            RepoError::Configuration(ConfigProblem::DuplicateManagedKey(ref k)) if k == "status"
        ));
    }

    #[test]
    fn readonly_key_in_scope_rejected() {
        let mut scope = Scope::new();
        scope.insert("id".into(), Value::from("x"));
        let err = ResolvedConfig::resolve(UserConfig::default(), scope, true, None).unwrap_err();
        assert!(matches!(
            err,
            RepoError::Configuration(ConfigProblem::ReadonlyKeyInScope(ref k)) if k == "id"
        ));
    }

    #[test]
    fn non_primitive_scope_value_rejected() {
        let mut scope = Scope::new();
        scope.insert("meta".into(), serde_json::json!({"nested": true}));
        let err = ResolvedConfig::resolve(UserConfig::default(), scope, true, None).unwrap_err();
        assert!(matches!(
            err,
            RepoError::Configuration(ConfigProblem::NonPrimitiveScopeValue(ref k)) if k == "meta"
        ));
    }

    #[test]
    fn bounded_without_limit_rejected() {
        let config = RepositoryBuilder::new().trace_strategy(TraceStrategy::Bounded(0)).build();
        let err = ResolvedConfig::resolve(config, Scope::new(), true, None).unwrap_err();
        assert!(matches!(
            err,
            RepoError::Configuration(ConfigProblem::BoundedWithoutLimit)
        ));
    }

    #[test]
    fn bounded_on_unsupported_backend_rejected() {
        let config = RepositoryBuilder::new().trace_strategy(TraceStrategy::Bounded(5)).build();
        let err = ResolvedConfig::resolve(config, Scope::new(), false, None).unwrap_err();
        assert!(matches!(
            err,
            RepoError::Configuration(ConfigProblem::BoundedOnUnsupportedBackend)
        ));
    }

    #[test]
    fn hidden_meta_keys_track_default_vs_named() {
        let config = RepositoryBuilder::new()
            .soft_delete(true)
            .timestamps(Timestamps::Server)
            .versioning(Versioning::Named("rev".into()))
            .build();
        let resolved = ResolvedConfig::resolve(config, Scope::new(), true, None).unwrap();
        assert!(resolved.hidden_meta_keys.contains("_deleted"));
        assert!(resolved.hidden_meta_keys.contains("_createdAt"));
        assert!(!resolved.hidden_meta_keys.contains("rev"));
        assert!(resolved.managed.contains("rev"));
    }

    #[test]
    fn readonly_on_update_includes_scope() {
        let mut scope = Scope::new();
        scope.insert("tenant".into(), Value::from("acme"));
        let resolved = ResolvedConfig::resolve(UserConfig::default(), scope, true, None).unwrap();
        assert!(resolved.readonly_on_update.contains("tenant"));
        assert!(resolved.readonly_on_update.contains("id"));
    }
}

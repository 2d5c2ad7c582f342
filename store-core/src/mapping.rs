use crate::config::ResolvedConfig;
use crate::error::RepoError;
use crate::filter::Value;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;

/// A backend-neutral document: a flat JSON object. Every backend adapter
/// converts to/from its own wire representation (`bson::Document`,
/// Firestore's field map) at the boundary; `store-core` never sees either.
pub type Document = serde_json::Map<String, Value>;

/// Blanket trait for application value objects the repository can store.
/// Any `Serialize + DeserializeOwned` type qualifies — there is no
/// "table definition" to hand-write, since `T`'s shape is discovered
/// structurally at each read/write via `serde_json::Value`.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {}
impl<T> Entity for T where T: Serialize + DeserializeOwned + Send + Sync + Unpin + 'static {}

/// Remove every key the resolved configuration marks hidden (those stored
/// under a reserved default name) from a document about to be returned to
/// a caller.
pub fn strip_hidden_meta(doc: &mut Document, config: &ResolvedConfig) {
    for hidden in &config.hidden_meta_keys {
        doc.remove(hidden);
    }
}

/// Force-remove every managed key from a document a caller is about to
/// create, regardless of what value (if any) they supplied — spec.md
/// invariant 6.
pub fn strip_managed(doc: &mut Document, config: &ResolvedConfig) {
    for key in &config.managed {
        doc.remove(key);
    }
}

/// Synthesize the public `idKey` attribute from the backend's internal
/// identity, overwriting whatever the stored document may independently
/// carry under that name (relevant when `mirrorId` is also set).
pub fn synthesize_id(doc: &mut Document, backend_id: &str, config: &ResolvedConfig) {
    doc.insert(config.id_key.clone(), Value::from(backend_id));
}

/// Retain only the requested fields (plus `idKey`, always synthesized).
/// Used for projected reads, which return a raw [`Document`] rather than
/// a fully-typed `T` — a caller asking for three fields out of twelve is
/// not asking for a (possibly unparseable) partial `T`.
pub fn project(mut doc: Document, fields: &[String], id_key: &str) -> Document {
    let mut wanted: BTreeSet<&str> = fields.iter().map(String::as_str).collect();
    wanted.insert(id_key);
    doc.retain(|k, _| wanted.contains(k.as_str()));
    doc
}

/// Map a full (unprojected, unhidden) persisted document into the public
/// entity type `T`.
pub fn to_entity<T: Entity>(doc: Document) -> Result<T, RepoError> {
    serde_json::from_value(Value::Object(doc)).map_err(RepoError::backend)
}

/// Map a caller-supplied entity into a neutral [`Document`] ready for the
/// enrichment pipeline, stripping any managed attribute the caller might
/// have (inadvertently or not) set.
pub fn from_entity<T: Entity>(entity: &T, config: &ResolvedConfig) -> Result<Document, RepoError> {
    let value = serde_json::to_value(entity).map_err(RepoError::backend)?;
    let mut doc = match value {
        Value::Object(map) => map,
        other => {
            return Err(RepoError::backend(serde_json::Error::io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("entity must serialize to a JSON object, got {other}"),
            ))))
        }
    };
    strip_managed(&mut doc, config);
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RepositoryBuilder, ResolvedConfig, Scope, Timestamps, Versioning};
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Widget {
        id: String,
        name: String,
    }

    fn config() -> ResolvedConfig {
        ResolvedConfig::resolve(
            RepositoryBuilder::new()
                .soft_delete(true)
                .timestamps(Timestamps::Server)
                .versioning(Versioning::Default)
                .build(),
            Scope::new(),
            true,
            None,
        )
        .unwrap()
    }

    #[test]
    fn strip_hidden_meta_removes_reserved_keys_only() {
        let config = config();
        let mut doc = Document::new();
        doc.insert("_deleted".into(), Value::from(false));
        doc.insert("_version".into(), Value::from(1));
        doc.insert("name".into(), Value::from("widget"));
        strip_hidden_meta(&mut doc, &config);
        assert!(!doc.contains_key("_deleted"));
        assert!(!doc.contains_key("_version"));
        assert!(doc.contains_key("name"));
    }

    #[test]
    fn synthesize_id_overwrites_existing_value() {
        let config = config();
        let mut doc = Document::new();
        doc.insert("id".into(), Value::from("stale"));
        synthesize_id(&mut doc, "fresh", &config);
        assert_eq!(doc.get("id"), Some(&Value::from("fresh")));
    }

    #[test]
    fn project_always_keeps_id_key() {
        let mut doc = Document::new();
        doc.insert("id".into(), Value::from("1"));
        doc.insert("name".into(), Value::from("a"));
        doc.insert("email".into(), Value::from("a@b.com"));
        let projected = project(doc, &["name".to_string()], "id");
        assert_eq!(projected.len(), 2);
        assert!(projected.contains_key("id"));
        assert!(projected.contains_key("name"));
        assert!(!projected.contains_key("email"));
    }

    #[test]
    fn to_entity_round_trips() {
        let mut doc = Document::new();
        doc.insert("id".into(), Value::from("1"));
        doc.insert("name".into(), Value::from("widget"));
        let widget: Widget = to_entity(doc).unwrap();
        assert_eq!(widget, Widget { id: "1".into(), name: "widget".into() });
    }

    #[test]
    fn from_entity_strips_managed_fields() {
        let config = config();
        #[derive(Serialize)]
        struct Sneaky {
            name: String,
            #[serde(rename = "_version")]
            version: i64,
        }
        let doc = from_entity(&Sneaky { name: "x".into(), version: 99 }, &config).unwrap();
        assert!(!doc.contains_key("_version"));
        assert!(doc.contains_key("name"));
    }
}

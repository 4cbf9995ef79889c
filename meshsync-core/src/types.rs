//! Domain types for the configuration synchronization engine.
//!
//! Incoming data arrives as [`ChangeBatch`]es of [`Resource`]s; the engine
//! stores them as [`ConfigRecord`]s keyed by `(type, namespace, name)`.
//! Payloads are opaque JSON values and are never inspected generically.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed collection identifier, e.g.
/// `istio/networking/v1alpha3/gateways`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionId(pub String);

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for CollectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CollectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identity of a stored record. Displays as `type/namespace/name`, which is
/// also the key written to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordKey {
    pub type_name: String,
    pub namespace: String,
    pub name: String,
}

impl RecordKey {
    pub fn new(
        type_name: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.type_name, self.namespace, self.name)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of change delivered to event handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Event {
    Add,
    Update,
    Remove,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Add => write!(f, "add"),
            Event::Update => write!(f, "update"),
            Event::Remove => write!(f, "remove"),
        }
    }
}

// ---------------------------------------------------------------------------
// Stored record
// ---------------------------------------------------------------------------

/// One configuration object as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub type_name: String,
    pub group: String,
    /// API version of the collection schema (not the resource version).
    pub version: String,
    pub name: String,
    pub namespace: String,
    /// Opaque, protocol-assigned version stamp.
    pub resource_version: String,
    pub creation_timestamp: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Owning domain suffix, e.g. `cluster.local`.
    pub domain: String,
    #[serde(default)]
    pub spec: Value,
}

impl ConfigRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey::new(&self.type_name, &self.namespace, &self.name)
    }

    /// Annotation value for `key`, or `""` when absent.
    pub fn annotation(&self, key: &str) -> &str {
        self.annotations.get(key).map(String::as_str).unwrap_or("")
    }
}

// ---------------------------------------------------------------------------
// Wire-independent change batch
// ---------------------------------------------------------------------------

/// Metadata of an incoming resource.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResourceMetadata {
    /// `namespace/name`, or just `name` for cluster-scoped resources.
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// RFC 3339 creation time. Absent means "now".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// One upserted entry of a [`ChangeBatch`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Resource {
    pub metadata: ResourceMetadata,
    #[serde(default)]
    pub body: Value,
}

impl Resource {
    pub fn new(name: impl Into<String>, version: impl Into<String>, body: Value) -> Self {
        Self {
            metadata: ResourceMetadata {
                name: name.into(),
                version: version.into(),
                ..ResourceMetadata::default()
            },
            body,
        }
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_create_time(mut self, create_time: impl Into<String>) -> Self {
        self.metadata.create_time = Some(create_time.into());
        self
    }
}

/// One unit of work from the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    pub collection: CollectionId,
    /// `false`: the batch is authoritative for the whole collection.
    #[serde(default)]
    pub incremental: bool,
    #[serde(default)]
    pub objects: Vec<Resource>,
    /// Removal names, same `namespace/name` syntax as resource metadata.
    #[serde(default)]
    pub removed: Vec<String>,
}

impl ChangeBatch {
    /// A full-replace batch for `collection`.
    pub fn full(collection: impl Into<CollectionId>, objects: Vec<Resource>) -> Self {
        Self {
            collection: collection.into(),
            incremental: false,
            objects,
            removed: vec![],
        }
    }

    /// An incremental batch for `collection`.
    pub fn incremental(
        collection: impl Into<CollectionId>,
        objects: Vec<Resource>,
        removed: Vec<String>,
    ) -> Self {
        Self {
            collection: collection.into(),
            incremental: true,
            objects,
            removed,
        }
    }
}

/// Split a metadata name into `(namespace, name)`.
///
/// `"ns/name"` yields `("ns", "name")`; anything else is treated as a
/// cluster-scoped name in the empty namespace, keeping only the first segment.
pub fn split_name(metadata_name: &str) -> (String, String) {
    let segments: Vec<&str> = metadata_name.split('/').collect();
    if segments.len() == 2 {
        return (segments[0].to_owned(), segments[1].to_owned());
    }
    (String::new(), segments[0].to_owned())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn newtype_display() {
        assert_eq!(
            CollectionId::from("istio/networking/v1alpha3/gateways").to_string(),
            "istio/networking/v1alpha3/gateways"
        );
        assert_eq!(
            RecordKey::new("gateway", "default", "ingress").to_string(),
            "gateway/default/ingress"
        );
    }

    #[test]
    fn split_name_handles_namespaced_and_cluster_scoped() {
        assert_eq!(split_name("ns1/foo"), ("ns1".to_string(), "foo".to_string()));
        assert_eq!(split_name("foo"), (String::new(), "foo".to_string()));
        assert_eq!(split_name("a/b/c"), (String::new(), "a".to_string()));
    }

    #[test]
    fn missing_annotation_reads_as_empty() {
        let record = ConfigRecord {
            type_name: "gateway".into(),
            group: "networking.istio.io".into(),
            version: "v1alpha3".into(),
            name: "gw".into(),
            namespace: "default".into(),
            resource_version: "v1".into(),
            creation_timestamp: Utc::now(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::from([("a".to_string(), "1".to_string())]),
            domain: "cluster.local".into(),
            spec: json!({}),
        };
        assert_eq!(record.annotation("a"), "1");
        assert_eq!(record.annotation("b"), "");
        assert_eq!(record.key(), RecordKey::new("gateway", "default", "gw"));
    }

    #[test]
    fn batch_yaml_defaults_to_full_replace() {
        let yaml = r#"
collection: istio/networking/v1alpha3/gateways
objects:
  - metadata:
      name: default/gw
      version: "1"
    body:
      servers: []
"#;
        let batch: ChangeBatch = serde_yaml::from_str(yaml).expect("parse");
        assert!(!batch.incremental);
        assert!(batch.removed.is_empty());
        assert_eq!(batch.objects[0].metadata.name, "default/gw");
        assert_eq!(batch.objects[0].body, json!({"servers": []}));
    }

    #[test]
    fn event_display() {
        assert_eq!(Event::Add.to_string(), "add");
        assert_eq!(Event::Remove.to_string(), "remove");
    }
}

//! Known-collections registry.
//!
//! A [`CollectionRegistry`] is built once at controller construction from a
//! list of [`CollectionDescriptor`]s and resolves collection ids and type
//! names at runtime. There is no process-wide table: each controller owns
//! the registry it was built with.
//!
//! # Built-in mesh collections
//!
//! | Collection                                          | Type                      |
//! |-----------------------------------------------------|---------------------------|
//! | `istio/networking/v1alpha3/virtualservices`         | `virtual-service`         |
//! | `istio/networking/v1alpha3/gateways`                | `gateway`                 |
//! | `istio/networking/v1alpha3/serviceentries`          | `service-entry`           |
//! | `istio/networking/v1alpha3/destinationrules`        | `destination-rule`        |
//! | `istio/networking/v1alpha3/envoyfilters`            | `envoy-filter`            |
//! | `istio/networking/v1alpha3/sidecars`                | `sidecar`                 |
//! | `istio/networking/v1alpha3/synthetic/serviceentries`| `synthetic-service-entry` |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::CollectionId;

pub const NETWORKING_GROUP: &str = "networking.istio.io";
pub const NETWORKING_VERSION: &str = "v1alpha3";

/// Collection id of the incrementally-delivered synthetic service entries.
pub const SYNTHETIC_SERVICE_ENTRY_COLLECTION: &str =
    "istio/networking/v1alpha3/synthetic/serviceentries";
pub const SYNTHETIC_SERVICE_ENTRY_TYPE: &str = "synthetic-service-entry";
pub const SERVICE_ENTRY_TYPE: &str = "service-entry";

/// Schema-level description of one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    pub collection: CollectionId,
    pub type_name: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Top-level payload fields the default validator requires.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_fields: Vec<String>,
}

fn default_group() -> String {
    NETWORKING_GROUP.to_string()
}

fn default_version() -> String {
    NETWORKING_VERSION.to_string()
}

impl CollectionDescriptor {
    pub fn new(collection: impl Into<CollectionId>, type_name: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            type_name: type_name.into(),
            group: default_group(),
            version: default_version(),
            required_fields: vec![],
        }
    }

    pub fn with_required_fields(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Descriptor of the synthetic service entry collection.
    pub fn synthetic_service_entry() -> Self {
        Self::new(SYNTHETIC_SERVICE_ENTRY_COLLECTION, SYNTHETIC_SERVICE_ENTRY_TYPE)
            .with_required_fields(&["hosts"])
    }
}

/// Typed lookup table of the collections a controller supports.
#[derive(Debug, Clone, Default)]
pub struct CollectionRegistry {
    descriptors: Vec<CollectionDescriptor>,
    by_collection: HashMap<CollectionId, usize>,
    by_type: HashMap<String, usize>,
}

impl CollectionRegistry {
    /// Build a registry. A descriptor whose collection id or type name is
    /// already present is skipped with a warning; the first registration wins.
    /// Records are stored per type, so one type never spans two collections.
    pub fn new(descriptors: impl IntoIterator<Item = CollectionDescriptor>) -> Self {
        let mut registry = Self::default();
        for descriptor in descriptors {
            if registry.by_collection.contains_key(&descriptor.collection) {
                tracing::warn!(
                    collection = %descriptor.collection,
                    "skipping duplicate collection descriptor"
                );
                continue;
            }
            if let Some(&owner) = registry.by_type.get(&descriptor.type_name) {
                tracing::warn!(
                    collection = %descriptor.collection,
                    type_name = %descriptor.type_name,
                    owner = %registry.descriptors[owner].collection,
                    "skipping collection whose type is already registered"
                );
                continue;
            }
            let idx = registry.descriptors.len();
            registry
                .by_collection
                .insert(descriptor.collection.clone(), idx);
            registry.by_type.insert(descriptor.type_name.clone(), idx);
            registry.descriptors.push(descriptor);
        }
        registry
    }

    /// The built-in mesh networking collections, synthetic service entries included.
    pub fn mesh_defaults() -> Self {
        Self::new(mesh_descriptors())
    }

    pub fn by_collection(&self, collection: &CollectionId) -> Option<&CollectionDescriptor> {
        self.by_collection
            .get(collection)
            .map(|&idx| &self.descriptors[idx])
    }

    /// Like [`by_collection`](Self::by_collection) but with a typed error.
    pub fn resolve(&self, collection: &CollectionId) -> Result<&CollectionDescriptor, CoreError> {
        self.by_collection(collection)
            .ok_or_else(|| CoreError::UnknownCollection(collection.0.clone()))
    }

    pub fn by_type(&self, type_name: &str) -> Option<&CollectionDescriptor> {
        self.by_type.get(type_name).map(|&idx| &self.descriptors[idx])
    }

    pub fn contains_type(&self, type_name: &str) -> bool {
        self.by_type.contains_key(type_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectionDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    /// A new registry without the descriptor for `collection`.
    pub fn without(&self, collection: &CollectionId) -> Self {
        Self::new(
            self.descriptors
                .iter()
                .filter(|d| &d.collection != collection)
                .cloned(),
        )
    }
}

fn mesh_descriptors() -> Vec<CollectionDescriptor> {
    vec![
        CollectionDescriptor::new(
            "istio/networking/v1alpha3/virtualservices",
            "virtual-service",
        )
        .with_required_fields(&["hosts"]),
        CollectionDescriptor::new("istio/networking/v1alpha3/gateways", "gateway")
            .with_required_fields(&["servers"]),
        CollectionDescriptor::new("istio/networking/v1alpha3/serviceentries", SERVICE_ENTRY_TYPE)
            .with_required_fields(&["hosts"]),
        CollectionDescriptor::new(
            "istio/networking/v1alpha3/destinationrules",
            "destination-rule",
        )
        .with_required_fields(&["host"]),
        CollectionDescriptor::new("istio/networking/v1alpha3/envoyfilters", "envoy-filter"),
        CollectionDescriptor::new("istio/networking/v1alpha3/sidecars", "sidecar"),
        CollectionDescriptor::synthetic_service_entry(),
    ]
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

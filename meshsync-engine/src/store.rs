//! Record store: type → namespace → name → record.
//!
//! Each collection sits behind its own `RwLock<Arc<NamespaceMap>>`. A full
//! replace builds the new map off to the side and swaps the `Arc` under the
//! write lock, so a reader holding a snapshot sees either the old or the new
//! collection, never a mix. Point mutations go through `Arc::make_mut`,
//! which copies only while a reader still holds the previous snapshot.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use meshsync_core::{CollectionRegistry, ConfigRecord};

use crate::error::EngineError;

/// namespace → name → record
pub type NamespaceMap = BTreeMap<String, BTreeMap<String, Arc<ConfigRecord>>>;

/// Storage for a single collection type.
#[derive(Debug, Default)]
pub struct CollectionStore {
    inner: RwLock<Arc<NamespaceMap>>,
}

impl CollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consistent point-in-time view.
    pub fn snapshot(&self) -> Arc<NamespaceMap> {
        Arc::clone(&self.inner.read())
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<ConfigRecord>> {
        self.inner
            .read()
            .get(namespace)
            .and_then(|by_name| by_name.get(name))
            .cloned()
    }

    /// Records in `namespace`, or in every namespace when `namespace` is
    /// empty. Ordered by namespace then name.
    pub fn list(&self, namespace: &str) -> Vec<Arc<ConfigRecord>> {
        let snapshot = self.snapshot();
        if namespace.is_empty() {
            return snapshot
                .values()
                .flat_map(|by_name| by_name.values().cloned())
                .collect();
        }
        snapshot
            .get(namespace)
            .map(|by_name| by_name.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Swap in a new map; returns the one it replaced.
    pub fn replace(&self, contents: NamespaceMap) -> Arc<NamespaceMap> {
        let next = Arc::new(contents);
        std::mem::replace(&mut *self.inner.write(), next)
    }

    /// Insert or replace one record; returns the previous one at that identity.
    pub fn upsert(&self, record: Arc<ConfigRecord>) -> Option<Arc<ConfigRecord>> {
        let mut guard = self.inner.write();
        Arc::make_mut(&mut *guard)
            .entry(record.namespace.clone())
            .or_default()
            .insert(record.name.clone(), record)
    }

    /// Remove one record. An emptied namespace is dropped as well.
    pub fn remove(&self, namespace: &str, name: &str) -> Option<Arc<ConfigRecord>> {
        let mut guard = self.inner.write();
        if !guard
            .get(namespace)
            .is_some_and(|by_name| by_name.contains_key(name))
        {
            return None;
        }
        let map = Arc::make_mut(&mut *guard);
        let by_name = map.get_mut(namespace)?;
        let removed = by_name.remove(name);
        if by_name.is_empty() {
            map.remove(namespace);
        }
        removed
    }
}

/// Insert `record` into a map under construction.
pub fn insert_into(map: &mut NamespaceMap, record: Arc<ConfigRecord>) {
    map.entry(record.namespace.clone())
        .or_default()
        .insert(record.name.clone(), record);
}

/// One [`CollectionStore`] per supported type.
#[derive(Debug, Default)]
pub struct Store {
    collections: HashMap<String, CollectionStore>,
}

impl Store {
    pub fn for_registry(registry: &CollectionRegistry) -> Self {
        Self {
            collections: registry
                .iter()
                .map(|d| (d.type_name.clone(), CollectionStore::new()))
                .collect(),
        }
    }

    pub fn collection(&self, type_name: &str) -> Result<&CollectionStore, EngineError> {
        self.collections
            .get(type_name)
            .ok_or_else(|| EngineError::UnknownType(type_name.to_string()))
    }

    pub fn get(
        &self,
        type_name: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Arc<ConfigRecord>>, EngineError> {
        Ok(self.collection(type_name)?.get(namespace, name))
    }

    pub fn list(&self, type_name: &str, namespace: &str) -> Result<Vec<Arc<ConfigRecord>>, EngineError> {
        Ok(self.collection(type_name)?.list(namespace))
    }

    pub fn replace_collection(
        &self,
        type_name: &str,
        contents: NamespaceMap,
    ) -> Result<Arc<NamespaceMap>, EngineError> {
        Ok(self.collection(type_name)?.replace(contents))
    }

    pub fn upsert_record(
        &self,
        record: Arc<ConfigRecord>,
    ) -> Result<Option<Arc<ConfigRecord>>, EngineError> {
        let type_name = record.type_name.clone();
        Ok(self.collection(&type_name)?.upsert(record))
    }

    pub fn remove_record(
        &self,
        type_name: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Arc<ConfigRecord>>, EngineError> {
        Ok(self.collection(type_name)?.remove(namespace, name))
    }
}

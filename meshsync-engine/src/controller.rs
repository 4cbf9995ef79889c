//! Generic multi-collection synchronization controller.
//!
//! Holds one store per supported collection type. A full-replace batch swaps
//! the whole collection atomically and diffs old against new; an incremental
//! batch applies its removals, then its upserts, one record at a time.
//! Handlers run after the store mutation has been published.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use meshsync_core::registry::SYNTHETIC_SERVICE_ENTRY_COLLECTION;
use meshsync_core::{
    split_name, ChangeBatch, CollectionDescriptor, CollectionId, CollectionRegistry, ConfigRecord,
    EngineConfig, Event, RecordKey,
};

use crate::api::{AppliedEvent, ApplyOutcome, ConfigReader, ConfigSink};
use crate::convert::Converter;
use crate::diff::{classify_upsert, diff_snapshots, ConfigEvent, EventHandler, HandlerTable};
use crate::error::EngineError;
use crate::ledger;
use crate::options::ControllerOptions;
use crate::push::{deliver, FullPush, PushSignal};
use crate::store::{insert_into, NamespaceMap, Store};
use crate::sync_state::SyncTracker;

#[derive(Debug)]
pub struct Controller {
    registry: CollectionRegistry,
    store: Store,
    sync: SyncTracker,
    handlers: HandlerTable,
    apply_lock: Mutex<()>,
    options: ControllerOptions,
}

impl Controller {
    pub fn new(registry: CollectionRegistry, options: ControllerOptions) -> Self {
        Self {
            store: Store::for_registry(&registry),
            sync: SyncTracker::new(registry.iter().map(|d| d.collection.clone())),
            handlers: HandlerTable::default(),
            apply_lock: Mutex::new(()),
            registry,
            options,
        }
    }

    /// Every configured collection except the incrementally-delivered
    /// synthetic service entries, which have their own controller.
    pub fn from_config(config: &EngineConfig, options: ControllerOptions) -> Self {
        let registry = config
            .registry()
            .without(&CollectionId::from(SYNTHETIC_SERVICE_ENTRY_COLLECTION));
        Self::new(registry, options)
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// Collections still waiting for their first batch.
    pub fn pending_collections(&self) -> Vec<CollectionId> {
        self.sync.pending()
    }

    fn resolve(&self, collection: &CollectionId) -> Result<&CollectionDescriptor, EngineError> {
        self.registry
            .by_collection(collection)
            .ok_or_else(|| EngineError::UnsupportedCollection(collection.to_string()))
    }

    fn apply_full(
        &self,
        type_name: &str,
        survivors: &[Arc<ConfigRecord>],
    ) -> Result<(Vec<ConfigEvent>, Vec<RecordKey>), EngineError> {
        let mut next = NamespaceMap::new();
        for record in survivors {
            insert_into(&mut next, Arc::clone(record));
        }
        let previous = self.store.replace_collection(type_name, next)?;
        // Writers are serialized by the apply lock, so this is the map just
        // swapped in.
        let current = self.store.collection(type_name)?.snapshot();
        let events = diff_snapshots(&previous, &current);
        let removed = events
            .iter()
            .filter(|e| e.event == Event::Remove)
            .map(|e| e.record.key())
            .collect();
        Ok((events, removed))
    }

    fn apply_incremental(
        &self,
        type_name: &str,
        batch: &ChangeBatch,
        survivors: &[Arc<ConfigRecord>],
    ) -> Result<(Vec<ConfigEvent>, Vec<RecordKey>), EngineError> {
        let mut events = Vec::new();
        let mut removed = Vec::with_capacity(batch.removed.len());

        for full_name in &batch.removed {
            let (namespace, name) = split_name(full_name);
            if let Some(previous) = self.store.remove_record(type_name, &namespace, &name)? {
                events.push(ConfigEvent::remove(previous));
            }
            removed.push(RecordKey::new(type_name, namespace, name));
        }
        for record in survivors {
            let previous = self.store.upsert_record(Arc::clone(record))?;
            events.extend(classify_upsert(previous.as_ref(), record));
        }
        Ok((events, removed))
    }
}

impl ConfigSink for Controller {
    fn apply(&self, batch: &ChangeBatch) -> Result<ApplyOutcome, EngineError> {
        let descriptor = self.resolve(&batch.collection)?;
        let type_name = descriptor.type_name.as_str();
        let _serial = self.apply_lock.lock();

        let converter = Converter {
            descriptor,
            domain_suffix: &self.options.domain_suffix,
            validator: self.options.validator.as_ref(),
        };
        let (survivors, discarded) = converter.convert_all(&batch.objects);

        let (events, removed) = if batch.incremental {
            self.apply_incremental(type_name, batch, &survivors)?
        } else {
            self.apply_full(type_name, &survivors)?
        };

        ledger::write_through(self.options.ledger.as_ref(), &removed, &survivors);
        self.sync.mark(&batch.collection);
        self.handlers.dispatch(type_name, &events);

        let mut signals = Vec::new();
        if !events.is_empty() {
            let namespaces: BTreeSet<String> =
                events.iter().map(|e| e.record.namespace.clone()).collect();
            signals.push(PushSignal::Full(FullPush {
                collections: BTreeSet::from([type_name.to_string()]),
                namespaces,
            }));
        }
        if let Some(pusher) = &self.options.pusher {
            for signal in &signals {
                deliver(pusher.as_ref(), signal);
            }
        }

        tracing::debug!(
            collection = %batch.collection,
            incremental = batch.incremental,
            applied = survivors.len(),
            discarded,
            events = events.len(),
            "batch applied"
        );

        Ok(ApplyOutcome {
            collection: batch.collection.clone(),
            type_name: type_name.to_string(),
            incremental: batch.incremental,
            applied: survivors.len(),
            discarded,
            events: events.iter().map(AppliedEvent::from).collect(),
            signals,
        })
    }

    fn has_synced(&self) -> bool {
        self.sync.has_synced()
    }

    fn register_event_handler(&self, type_name: &str, handler: EventHandler) {
        self.handlers.register(type_name, handler);
    }
}

impl ConfigReader for Controller {
    fn supported_collections(&self) -> &CollectionRegistry {
        &self.registry
    }

    fn get(
        &self,
        type_name: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Arc<ConfigRecord>>, EngineError> {
        self.store.get(type_name, namespace, name)
    }

    fn list(&self, type_name: &str, namespace: &str) -> Result<Vec<Arc<ConfigRecord>>, EngineError> {
        self.store.list(type_name, namespace)
    }

    fn version(&self) -> String {
        self.options.ledger.root_hash()
    }

    fn resource_at_version(&self, root: &str, key: &str) -> Result<String, EngineError> {
        Ok(self.options.ledger.get_previous_value(root, key)?)
    }
}

//! Incremental controller for synthetic service entries.
//!
//! Owns exactly one collection. Besides keeping the store current it decides,
//! per batch, whether downstream proxies need a full rebuild or only fresh
//! endpoint lists (see [`crate::classify`]).

use std::sync::Arc;

use parking_lot::Mutex;

use meshsync_core::{
    split_name, ChangeBatch, CollectionDescriptor, CollectionId, CollectionRegistry, ConfigRecord,
    RecordKey,
};

use crate::api::{AppliedEvent, ApplyOutcome, ConfigReader, ConfigSink};
use crate::classify::{classify, PushPlan};
use crate::convert::Converter;
use crate::diff::{ConfigEvent, EventHandler, HandlerTable};
use crate::error::EngineError;
use crate::ledger;
use crate::options::ControllerOptions;
use crate::push::deliver;
use crate::store::{insert_into, CollectionStore, NamespaceMap};
use crate::sync_state::SyncTracker;

#[derive(Debug)]
pub struct SyntheticServiceEntryController {
    descriptor: CollectionDescriptor,
    registry: CollectionRegistry,
    store: CollectionStore,
    sync: SyncTracker,
    handlers: HandlerTable,
    apply_lock: Mutex<()>,
    options: ControllerOptions,
}

/// Store changes of one batch, before push planning is finalized.
struct Applied {
    events: Vec<ConfigEvent>,
    removed: Vec<RecordKey>,
    plan: PushPlan,
}

impl SyntheticServiceEntryController {
    pub fn new(options: ControllerOptions) -> Self {
        Self::with_descriptor(CollectionDescriptor::synthetic_service_entry(), options)
    }

    pub fn with_descriptor(descriptor: CollectionDescriptor, options: ControllerOptions) -> Self {
        Self {
            registry: CollectionRegistry::new([descriptor.clone()]),
            sync: SyncTracker::new([descriptor.collection.clone()]),
            descriptor,
            store: CollectionStore::new(),
            handlers: HandlerTable::default(),
            apply_lock: Mutex::new(()),
            options,
        }
    }

    pub fn collection(&self) -> &CollectionId {
        &self.descriptor.collection
    }

    /// The collection, until its first batch has been applied.
    pub fn pending_collections(&self) -> Vec<CollectionId> {
        self.sync.pending()
    }

    fn check_type(&self, type_name: &str) -> Result<(), EngineError> {
        if type_name == self.descriptor.type_name {
            Ok(())
        } else {
            Err(EngineError::UnknownType(type_name.to_string()))
        }
    }

    /// Full replace: every survivor is classified against the record it
    /// replaces, and anything left out of the batch is removed. A key repeated
    /// within the batch is classified against its earlier occurrence; the
    /// last one wins.
    fn replace_all(&self, survivors: &[Arc<ConfigRecord>]) -> Applied {
        let previous = self.store.snapshot();
        let mut plan = PushPlan::new();
        let mut events = Vec::with_capacity(survivors.len());
        let mut next = NamespaceMap::new();

        for record in survivors {
            let prior = lookup(&next, record).or_else(|| lookup(&previous, record));
            plan.record(classify(prior.as_deref(), record), record);
            events.push(match prior {
                Some(prior) => ConfigEvent::update(prior, Arc::clone(record)),
                None => ConfigEvent::add(Arc::clone(record)),
            });
            insert_into(&mut next, Arc::clone(record));
        }

        let mut removed = Vec::new();
        for (namespace, by_name) in previous.iter() {
            for (name, record) in by_name {
                let kept = next
                    .get(namespace)
                    .is_some_and(|m| m.contains_key(name));
                if !kept {
                    plan.mark_full(namespace);
                    removed.push(record.key());
                    events.push(ConfigEvent::remove(Arc::clone(record)));
                }
            }
        }

        self.store.replace(next);
        Applied {
            events,
            removed,
            plan,
        }
    }

    /// Incremental: removals first, then upserts in batch order.
    fn apply_changes(&self, batch: &ChangeBatch, survivors: &[Arc<ConfigRecord>]) -> Applied {
        let mut plan = PushPlan::new();
        let mut events = Vec::new();
        let mut removed = Vec::with_capacity(batch.removed.len());

        for full_name in &batch.removed {
            let (namespace, name) = split_name(full_name);
            if let Some(previous) = self.store.remove(&namespace, &name) {
                plan.mark_full(&namespace);
                events.push(ConfigEvent::remove(previous));
            }
            removed.push(RecordKey::new(&self.descriptor.type_name, namespace, name));
        }

        for record in survivors {
            let previous = self.store.upsert(Arc::clone(record));
            plan.record(classify(previous.as_deref(), record), record);
            events.push(match previous {
                Some(previous) => ConfigEvent::update(previous, Arc::clone(record)),
                None => ConfigEvent::add(Arc::clone(record)),
            });
        }

        Applied {
            events,
            removed,
            plan,
        }
    }
}

fn lookup(map: &NamespaceMap, record: &ConfigRecord) -> Option<Arc<ConfigRecord>> {
    map.get(&record.namespace)
        .and_then(|by_name| by_name.get(&record.name))
        .cloned()
}

impl ConfigSink for SyntheticServiceEntryController {
    fn apply(&self, batch: &ChangeBatch) -> Result<ApplyOutcome, EngineError> {
        if batch.collection != self.descriptor.collection {
            return Err(EngineError::UnsupportedCollection(batch.collection.to_string()));
        }
        let _serial = self.apply_lock.lock();

        let converter = Converter {
            descriptor: &self.descriptor,
            domain_suffix: &self.options.domain_suffix,
            validator: self.options.validator.as_ref(),
        };
        let (survivors, discarded) = converter.convert_all(&batch.objects);

        let Applied {
            events,
            removed,
            plan,
        } = if batch.incremental {
            self.apply_changes(batch, &survivors)
        } else {
            self.replace_all(&survivors)
        };

        ledger::write_through(self.options.ledger.as_ref(), &removed, &survivors);
        self.sync.mark(&batch.collection);
        self.handlers.dispatch(&self.descriptor.type_name, &events);

        let signals = plan.into_signals(
            &self.descriptor.type_name,
            &self.options.cluster_id,
            &self.options.domain_suffix,
        );
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
            signals = signals.len(),
            "batch applied"
        );

        Ok(ApplyOutcome {
            collection: batch.collection.clone(),
            type_name: self.descriptor.type_name.clone(),
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

impl ConfigReader for SyntheticServiceEntryController {
    fn supported_collections(&self) -> &CollectionRegistry {
        &self.registry
    }

    fn get(
        &self,
        type_name: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Arc<ConfigRecord>>, EngineError> {
        self.check_type(type_name)?;
        Ok(self.store.get(namespace, name))
    }

    fn list(&self, type_name: &str, namespace: &str) -> Result<Vec<Arc<ConfigRecord>>, EngineError> {
        self.check_type(type_name)?;
        Ok(self.store.list(namespace))
    }

    fn version(&self) -> String {
        self.options.ledger.root_hash()
    }

    fn resource_at_version(&self, root: &str, key: &str) -> Result<String, EngineError> {
        Ok(self.options.ledger.get_previous_value(root, key)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{ENDPOINTS_VERSION_ANNOTATION, SERVICE_VERSION_ANNOTATION};
    use crate::push::{MemoryPusher, PushSignal};
    use meshsync_core::registry::SYNTHETIC_SERVICE_ENTRY_COLLECTION;
    use meshsync_core::{Event, Resource};
    use serde_json::json;

    fn entry(name: &str, service: &str, endpoints: &str) -> Resource {
        Resource::new(
            name,
            format!("{service}-{endpoints}"),
            json!({
                "hosts": ["svc.example.com"],
                "endpoints": [{"address": "10.0.0.1", "ports": {"http": 8080}}]
            }),
        )
        .with_annotation(SERVICE_VERSION_ANNOTATION, service)
        .with_annotation(ENDPOINTS_VERSION_ANNOTATION, endpoints)
    }

    fn controller() -> (SyntheticServiceEntryController, Arc<MemoryPusher>) {
        let pusher = Arc::new(MemoryPusher::new());
        let c = SyntheticServiceEntryController::new(
            ControllerOptions::default().with_pusher(pusher.clone()),
        );
        (c, pusher)
    }

    fn incremental(objects: Vec<Resource>, removed: &[&str]) -> ChangeBatch {
        ChangeBatch::incremental(
            SYNTHETIC_SERVICE_ENTRY_COLLECTION,
            objects,
            removed.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[test]
    fn endpoint_only_change_is_narrow() {
        let (c, pusher) = controller();
        c.apply(&incremental(vec![entry("ns/svc", "v1", "e1")], &[]))
            .unwrap();
        assert!(pusher.take()[0].is_full());

        let outcome = c
            .apply(&incremental(vec![entry("ns/svc", "v1", "e2")], &[]))
            .unwrap();
        let signals = pusher.take();
        assert_eq!(signals.len(), 1);
        let PushSignal::Narrow(update) = &signals[0] else {
            panic!("expected endpoint push");
        };
        assert_eq!(update.hostname, "svc.ns.svc.cluster.local");
        assert_eq!(update.cluster_id, "Kubernetes");
        assert_eq!(update.endpoints.len(), 1);
        assert_eq!(outcome.events[0].event, Event::Update);
    }

    #[test]
    fn repeated_key_in_full_batch_is_added_once() {
        let (c, pusher) = controller();
        let outcome = c
            .apply(&ChangeBatch::full(
                SYNTHETIC_SERVICE_ENTRY_COLLECTION,
                vec![entry("ns/svc", "v1", "e1"), entry("ns/svc", "v1", "e2")],
            ))
            .unwrap();

        let kinds: Vec<Event> = outcome.events.iter().map(|e| e.event).collect();
        assert_eq!(kinds, vec![Event::Add, Event::Update]);
        assert_eq!(
            c.get("synthetic-service-entry", "ns", "svc")
                .unwrap()
                .unwrap()
                .resource_version,
            "v1-e2"
        );
        let signals = pusher.take();
        assert_eq!(signals.len(), 1);
        assert!(signals[0].is_full());
    }

    #[test]
    fn unchanged_fingerprints_push_nothing_but_still_update() {
        let (c, pusher) = controller();
        c.apply(&incremental(vec![entry("ns/svc", "v1", "e1")], &[]))
            .unwrap();
        pusher.take();

        let outcome = c
            .apply(&incremental(vec![entry("ns/svc", "v1", "e1")], &[]))
            .unwrap();
        assert!(pusher.signals().is_empty());
        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].event, Event::Update);
    }

    #[test]
    fn service_change_outranks_endpoint_changes() {
        let (c, pusher) = controller();
        c.apply(&incremental(
            vec![entry("a/one", "v1", "e1"), entry("b/two", "v1", "e1")],
            &[],
        ))
        .unwrap();
        pusher.take();

        c.apply(&incremental(
            vec![entry("a/one", "v1", "e2"), entry("b/two", "v2", "e1")],
            &[],
        ))
        .unwrap();
        let signals = pusher.take();
        assert_eq!(signals.len(), 1);
        let PushSignal::Full(full) = &signals[0] else {
            panic!("expected full push");
        };
        assert_eq!(full.namespaces.iter().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn removal_alone_triggers_full_push() {
        let (c, pusher) = controller();
        c.apply(&incremental(vec![entry("ns/svc", "v1", "e1")], &[]))
            .unwrap();
        pusher.take();

        let outcome = c.apply(&incremental(vec![], &["ns/svc"])).unwrap();
        assert_eq!(outcome.events[0].event, Event::Remove);
        assert!(c.list("synthetic-service-entry", "").unwrap().is_empty());
        assert!(pusher.take()[0].is_full());

        // Removing something unknown changes nothing.
        c.apply(&incremental(vec![], &["ns/ghost"])).unwrap();
        assert!(pusher.signals().is_empty());
    }

    #[test]
    fn full_replace_classifies_against_previous_state() {
        let (c, pusher) = controller();
        c.apply(&ChangeBatch::full(
            SYNTHETIC_SERVICE_ENTRY_COLLECTION,
            vec![entry("ns/keep", "v1", "e1"), entry("ns/drop", "v1", "e1")],
        ))
        .unwrap();
        assert!(c.has_synced());
        pusher.take();

        let outcome = c
            .apply(&ChangeBatch::full(
                SYNTHETIC_SERVICE_ENTRY_COLLECTION,
                vec![entry("ns/keep", "v1", "e2")],
            ))
            .unwrap();
        let kinds: Vec<_> = outcome.events.iter().map(|e| e.event).collect();
        assert_eq!(kinds, vec![Event::Update, Event::Remove]);
        // The implicit removal forces a full push.
        let signals = pusher.take();
        assert_eq!(signals.len(), 1);
        assert!(signals[0].is_full());
        assert!(c.get("synthetic-service-entry", "ns", "drop").unwrap().is_none());
    }

    #[test]
    fn other_collections_and_types_are_rejected() {
        let (c, _) = controller();
        assert!(matches!(
            c.apply(&ChangeBatch::full("istio/networking/v1alpha3/gateways", vec![])),
            Err(EngineError::UnsupportedCollection(_))
        ));
        assert!(!c.has_synced());
        assert!(matches!(
            c.get("gateway", "ns", "x"),
            Err(EngineError::UnknownType(_))
        ));
    }
}

//! Shared synchronization entrypoint used by CLI and daemon.
//!
//! A [`Pipeline`] owns the generic controller and the synthetic service
//! entry controller and routes every batch to whichever owns its collection.
//! Both controllers write through to the same ledger, so [`Pipeline::version`]
//! covers all collections.

use std::sync::Arc;

use meshsync_core::{ChangeBatch, CollectionId, CollectionRegistry, ConfigRecord, EngineConfig};

use crate::api::{ApplyOutcome, ConfigReader, ConfigSink};
use crate::controller::Controller;
use crate::diff::EventHandler;
use crate::error::EngineError;
use crate::incremental::SyntheticServiceEntryController;
use crate::ledger::Ledger;
use crate::options::ControllerOptions;
use crate::push::Pusher;

#[derive(Debug)]
pub struct Pipeline {
    registry: CollectionRegistry,
    generic: Controller,
    synthetic: SyntheticServiceEntryController,
}

impl Pipeline {
    /// Controllers built from `config`, pushing to `pusher` when given.
    pub fn new(config: &EngineConfig, pusher: Option<Arc<dyn Pusher>>) -> Self {
        let mut options = ControllerOptions::from_config(config);
        options.pusher = pusher;
        Self::with_options(config, options)
    }

    pub fn with_options(config: &EngineConfig, options: ControllerOptions) -> Self {
        Self {
            registry: config.registry(),
            generic: Controller::from_config(config, options.clone()),
            synthetic: SyntheticServiceEntryController::new(options),
        }
    }

    pub fn generic(&self) -> &Controller {
        &self.generic
    }

    pub fn synthetic(&self) -> &SyntheticServiceEntryController {
        &self.synthetic
    }

    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.generic.options().ledger
    }

    /// Collections of either controller still waiting for a first batch.
    pub fn pending_collections(&self) -> Vec<CollectionId> {
        let mut pending = self.generic.pending_collections();
        pending.extend(self.synthetic.pending_collections());
        pending
    }

    fn owns_synthetic(&self, type_name: &str) -> bool {
        self.synthetic.supported_collections().contains_type(type_name)
    }

    /// Apply batches in order, stopping at the first collection-level error.
    pub fn apply_all<'a>(
        &self,
        batches: impl IntoIterator<Item = &'a ChangeBatch>,
    ) -> Result<Vec<ApplyOutcome>, EngineError> {
        batches.into_iter().map(|b| self.apply(b)).collect()
    }
}

impl ConfigSink for Pipeline {
    fn apply(&self, batch: &ChangeBatch) -> Result<ApplyOutcome, EngineError> {
        if &batch.collection == self.synthetic.collection() {
            self.synthetic.apply(batch)
        } else {
            self.generic.apply(batch)
        }
    }

    fn has_synced(&self) -> bool {
        self.generic.has_synced() && self.synthetic.has_synced()
    }

    fn register_event_handler(&self, type_name: &str, handler: EventHandler) {
        if self.owns_synthetic(type_name) {
            self.synthetic.register_event_handler(type_name, handler);
        } else {
            self.generic.register_event_handler(type_name, handler);
        }
    }
}

impl ConfigReader for Pipeline {
    fn supported_collections(&self) -> &CollectionRegistry {
        &self.registry
    }

    fn get(
        &self,
        type_name: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Arc<ConfigRecord>>, EngineError> {
        if self.owns_synthetic(type_name) {
            self.synthetic.get(type_name, namespace, name)
        } else {
            self.generic.get(type_name, namespace, name)
        }
    }

    fn list(&self, type_name: &str, namespace: &str) -> Result<Vec<Arc<ConfigRecord>>, EngineError> {
        if self.owns_synthetic(type_name) {
            self.synthetic.list(type_name, namespace)
        } else {
            self.generic.list(type_name, namespace)
        }
    }

    fn version(&self) -> String {
        self.generic.version()
    }

    fn resource_at_version(&self, root: &str, key: &str) -> Result<String, EngineError> {
        self.generic.resource_at_version(root, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::push::MemoryPusher;
    use meshsync_core::registry::SYNTHETIC_SERVICE_ENTRY_COLLECTION;
    use meshsync_core::{Resource, LedgerConfig};
    use serde_json::json;

    #[test]
    fn routes_by_collection_and_shares_the_ledger() {
        let pusher = Arc::new(MemoryPusher::new());
        let pipeline = Pipeline::new(&EngineConfig::default(), Some(pusher.clone()));
        let empty_root = pipeline.version();

        pipeline
            .apply(&ChangeBatch::full(
                "istio/networking/v1alpha3/gateways",
                vec![Resource::new("ns/gw", "1", json!({"servers": []}))],
            ))
            .unwrap();
        let after_gateway = pipeline.version();
        assert_ne!(after_gateway, empty_root);

        pipeline
            .apply(&ChangeBatch::full(
                SYNTHETIC_SERVICE_ENTRY_COLLECTION,
                vec![Resource::new("ns/se", "1", json!({"hosts": ["a"]}))],
            ))
            .unwrap();
        assert_ne!(pipeline.version(), after_gateway);

        assert_eq!(pipeline.list("gateway", "").unwrap().len(), 1);
        assert_eq!(pipeline.list("synthetic-service-entry", "ns").unwrap().len(), 1);
        assert_eq!(
            pipeline
                .resource_at_version(&pipeline.version(), "synthetic-service-entry/ns/se")
                .unwrap(),
            "1"
        );
        assert_eq!(pusher.signals().len(), 2);
    }

    #[test]
    fn readiness_needs_both_controllers() {
        let pipeline = Pipeline::new(&EngineConfig::default(), None);
        let generic: Vec<_> = pipeline
            .generic()
            .supported_collections()
            .iter()
            .map(|d| d.collection.clone())
            .collect();
        for collection in generic {
            pipeline.apply(&ChangeBatch::full(collection, vec![])).unwrap();
        }
        assert!(!pipeline.has_synced());
        assert_eq!(
            pipeline.pending_collections(),
            vec![CollectionId::from(SYNTHETIC_SERVICE_ENTRY_COLLECTION)]
        );
        pipeline
            .apply(&ChangeBatch::full(SYNTHETIC_SERVICE_ENTRY_COLLECTION, vec![]))
            .unwrap();
        assert!(pipeline.has_synced());
    }

    #[test]
    fn disabled_ledger_reports_empty_version() {
        let config = EngineConfig::default().with_ledger(LedgerConfig {
            enabled: false,
            history_limit: 0,
        });
        let pipeline = Pipeline::new(&config, None);
        pipeline
            .apply(&ChangeBatch::full(
                "istio/networking/v1alpha3/sidecars",
                vec![Resource::new("ns/sc", "1", json!({}))],
            ))
            .unwrap();
        assert_eq!(pipeline.version(), "");
    }

    #[test]
    fn unknown_collection_is_rejected() {
        let pipeline = Pipeline::new(&EngineConfig::default(), None);
        let err = pipeline
            .apply(&ChangeBatch::full("istio/bogus/v1/things", vec![]))
            .unwrap_err();
        assert!(err.to_string().contains("collection not supported"));
    }
}

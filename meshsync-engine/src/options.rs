//! Construction-time collaborators of a controller.

use std::sync::Arc;

use meshsync_core::config::{DEFAULT_CLUSTER_ID, DEFAULT_DOMAIN_SUFFIX};
use meshsync_core::EngineConfig;

use crate::ledger::{DisabledLedger, Ledger, MemoryLedger};
use crate::push::Pusher;
use crate::validate::{RequiredFields, Validator};

#[derive(Clone)]
pub struct ControllerOptions {
    pub domain_suffix: String,
    pub cluster_id: String,
    /// No pusher means push signals are computed and returned but not sent.
    pub pusher: Option<Arc<dyn Pusher>>,
    pub ledger: Arc<dyn Ledger>,
    pub validator: Arc<dyn Validator>,
}

impl ControllerOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        let ledger: Arc<dyn Ledger> = if config.ledger.enabled {
            Arc::new(MemoryLedger::new(config.ledger.history_limit))
        } else {
            Arc::new(DisabledLedger)
        };
        Self {
            domain_suffix: config.domain_suffix.clone(),
            cluster_id: config.cluster_id.clone(),
            pusher: None,
            ledger,
            validator: Arc::new(RequiredFields),
        }
    }

    pub fn with_pusher(mut self, pusher: Arc<dyn Pusher>) -> Self {
        self.pusher = Some(pusher);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn Ledger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = validator;
        self
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            domain_suffix: DEFAULT_DOMAIN_SUFFIX.to_string(),
            cluster_id: DEFAULT_CLUSTER_ID.to_string(),
            pusher: None,
            ledger: Arc::new(DisabledLedger),
            validator: Arc::new(RequiredFields),
        }
    }
}

impl std::fmt::Debug for ControllerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerOptions")
            .field("domain_suffix", &self.domain_suffix)
            .field("cluster_id", &self.cluster_id)
            .field("pusher", &self.pusher.is_some())
            .finish_non_exhaustive()
    }
}

//! Capability traits exposed by the controllers.
//!
//! A synchronization controller is a read surface ([`ConfigReader`]) plus a
//! sink for change batches ([`ConfigSink`]). Point writes are not meaningful
//! for it; callers that insist on a CRUD surface can wrap a sink in
//! [`SinkOnly`], whose every write reports [`EngineError::Unsupported`].

use std::ops::Deref;
use std::sync::Arc;

use serde::Serialize;

use meshsync_core::{ChangeBatch, CollectionId, CollectionRegistry, ConfigRecord, Event, RecordKey};

use crate::diff::{ConfigEvent, EventHandler};
use crate::error::EngineError;
use crate::push::PushSignal;

/// An event as reported back to the caller of `apply`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedEvent {
    pub event: Event,
    pub key: RecordKey,
    pub resource_version: String,
}

impl From<&ConfigEvent> for AppliedEvent {
    fn from(e: &ConfigEvent) -> Self {
        Self {
            event: e.event,
            key: e.record.key(),
            resource_version: e.record.resource_version.clone(),
        }
    }
}

/// What one `apply` call did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplyOutcome {
    pub collection: CollectionId,
    pub type_name: String,
    pub incremental: bool,
    /// Entries that survived conversion and validation.
    pub applied: usize,
    /// Entries dropped for a bad timestamp or failed validation.
    pub discarded: usize,
    pub events: Vec<AppliedEvent>,
    /// Push signals computed for the batch (sent only if a pusher is set).
    pub signals: Vec<PushSignal>,
}

pub trait ConfigReader {
    fn supported_collections(&self) -> &CollectionRegistry;

    fn get(
        &self,
        type_name: &str,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Arc<ConfigRecord>>, EngineError>;

    /// `namespace == ""` lists every namespace.
    fn list(&self, type_name: &str, namespace: &str) -> Result<Vec<Arc<ConfigRecord>>, EngineError>;

    /// Ledger root hash of the current state.
    fn version(&self) -> String;

    /// Version of `key` (`type/namespace/name`) as of ledger root `root`.
    fn resource_at_version(&self, root: &str, key: &str) -> Result<String, EngineError>;
}

pub trait ConfigSink {
    fn apply(&self, batch: &ChangeBatch) -> Result<ApplyOutcome, EngineError>;

    fn has_synced(&self) -> bool;

    fn register_event_handler(&self, type_name: &str, handler: EventHandler);
}

/// Point CRUD surface of a general-purpose config store.
pub trait ConfigWriter {
    fn create(&self, record: ConfigRecord) -> Result<String, EngineError>;

    fn update(&self, record: ConfigRecord) -> Result<String, EngineError>;

    fn delete(&self, type_name: &str, namespace: &str, name: &str) -> Result<(), EngineError>;

    /// Blocking run loop.
    fn run(&self) -> Result<(), EngineError>;
}

/// Adapter exposing a sink behind [`ConfigWriter`]. Reads and applies go
/// through to the wrapped controller via `Deref`.
#[derive(Debug)]
pub struct SinkOnly<S>(pub S);

impl<S> Deref for SinkOnly<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.0
    }
}

fn refuse(operation: &'static str) -> EngineError {
    tracing::warn!(operation, "write attempted on synchronization controller");
    EngineError::unsupported(operation)
}

impl<S: ConfigSink> ConfigWriter for SinkOnly<S> {
    fn create(&self, _record: ConfigRecord) -> Result<String, EngineError> {
        Err(refuse("create"))
    }

    fn update(&self, _record: ConfigRecord) -> Result<String, EngineError> {
        Err(refuse("update"))
    }

    fn delete(&self, _type_name: &str, _namespace: &str, _name: &str) -> Result<(), EngineError> {
        Err(refuse("delete"))
    }

    fn run(&self) -> Result<(), EngineError> {
        Err(refuse("run"))
    }
}

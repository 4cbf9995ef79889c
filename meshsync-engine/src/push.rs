//! Downstream push signals and the pusher seam.
//!
//! The engine only decides *what* changed; building proxy configuration from
//! a signal is the pusher's business.

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Request for a full proxy configuration rebuild.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullPush {
    /// Collection types that changed.
    pub collections: BTreeSet<String>,
    /// Namespaces touched by the change.
    pub namespaces: BTreeSet<String>,
}

/// One workload address behind a service port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub endpoint_port: u32,
    pub service_port_name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// `name.namespace` of the owning service entry.
    pub uid: String,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub locality: String,
    #[serde(default)]
    pub lb_weight: u32,
}

/// Endpoint-only update for a single service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointUpdate {
    pub cluster_id: String,
    pub hostname: String,
    pub namespace: String,
    pub endpoints: Vec<Endpoint>,
}

/// What the downstream pusher is asked to do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PushSignal {
    Full(FullPush),
    Narrow(EndpointUpdate),
}

impl PushSignal {
    pub fn is_full(&self) -> bool {
        matches!(self, PushSignal::Full(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PushError {
    #[error("pusher unavailable: {0}")]
    Unavailable(String),
}

/// Downstream proxy-configuration pusher.
pub trait Pusher: Send + Sync {
    fn push(&self, signal: &PushSignal) -> Result<(), PushError>;
}

/// Fire-and-forget delivery: a failure is logged and dropped.
pub(crate) fn deliver(pusher: &dyn Pusher, signal: &PushSignal) {
    if let Err(e) = pusher.push(signal) {
        tracing::warn!(error = %e, full = signal.is_full(), "push failed");
    }
}

/// Records every signal it is given.
#[derive(Debug, Default)]
pub struct MemoryPusher {
    signals: Mutex<Vec<PushSignal>>,
}

impl MemoryPusher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<PushSignal> {
        self.signals.lock().clone()
    }

    /// Drain the recorded signals.
    pub fn take(&self) -> Vec<PushSignal> {
        std::mem::take(&mut *self.signals.lock())
    }
}

impl Pusher for MemoryPusher {
    fn push(&self, signal: &PushSignal) -> Result<(), PushError> {
        self.signals.lock().push(signal.clone());
        Ok(())
    }
}

/// Logs each signal at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingPusher;

impl Pusher for LoggingPusher {
    fn push(&self, signal: &PushSignal) -> Result<(), PushError> {
        match signal {
            PushSignal::Full(full) => tracing::info!(
                collections = ?full.collections,
                namespaces = ?full.namespaces,
                "full push"
            ),
            PushSignal::Narrow(update) => tracing::info!(
                cluster = %update.cluster_id,
                hostname = %update.hostname,
                namespace = %update.namespace,
                endpoints = update.endpoints.len(),
                "endpoint push"
            ),
        }
        Ok(())
    }
}

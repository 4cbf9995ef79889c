//! meshsync core library — domain types, collection registry, configuration, errors.
//!
//! - [`types`] — records, change batches, events
//! - [`registry`] — known-collections table
//! - [`config`] — [`EngineConfig`] load / save
//! - [`batch`] — YAML batch files
//! - [`error`] — [`CoreError`]

pub mod batch;
pub mod config;
pub mod error;
pub mod registry;
pub mod types;

pub use config::{EngineConfig, LedgerConfig};
pub use error::CoreError;
pub use registry::{CollectionDescriptor, CollectionRegistry};
pub use types::{
    split_name, ChangeBatch, CollectionId, ConfigRecord, Event, RecordKey, Resource,
    ResourceMetadata,
};

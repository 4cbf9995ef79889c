//! # meshsync-engine
//!
//! Configuration synchronization: applies change batches to an in-memory
//! versioned store, dispatches change events, and decides what downstream
//! proxies must be told.
//!
//! Most callers want a [`Pipeline`], which routes each batch to the
//! [`Controller`] (whole-collection replace, generic diff) or the
//! [`SyntheticServiceEntryController`] (incremental, full-vs-endpoint push
//! classification).

pub mod api;
pub mod classify;
pub mod controller;
pub mod convert;
pub mod diff;
pub mod endpoints;
pub mod error;
pub mod incremental;
pub mod ledger;
pub mod options;
pub mod pipeline;
pub mod push;
pub mod store;
pub mod sync_state;
pub mod validate;

pub use api::{AppliedEvent, ApplyOutcome, ConfigReader, ConfigSink, ConfigWriter, SinkOnly};
pub use controller::Controller;
pub use diff::{ConfigEvent, EventHandler};
pub use error::EngineError;
pub use incremental::SyntheticServiceEntryController;
pub use ledger::{DisabledLedger, Ledger, LedgerError, LedgerFile, MemoryLedger};
pub use options::ControllerOptions;
pub use pipeline::Pipeline;
pub use push::{Endpoint, EndpointUpdate, FullPush, LoggingPusher, MemoryPusher, PushError, PushSignal, Pusher};
pub use validate::{RequiredFields, ValidationError, Validator};

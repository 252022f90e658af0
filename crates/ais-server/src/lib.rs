//! # ais-server
//!
//! Runtime half of the AIS hub: everything that runs after a decoded update
//! has been merged into the state store.
//!
//! - [`scheduler`] - batched, single-flight persistence of pending vessels
//! - [`dispatch`] - change-feed driven, chunked event dispatch
//! - [`expiry`] - TTL sweep over both stores
//! - [`hub`] - WebSocket subscriber hub
//! - [`durable`] - durable store seam and its in-memory implementation

pub mod dispatch;
pub mod durable;
pub mod error;
pub mod expiry;
pub mod hub;
pub mod scheduler;
pub mod single_flight;
pub mod startup;

pub use dispatch::{Broadcaster, DispatchLoop, PassReport};
pub use durable::{
    BulkWriteSummary, DurableStore, FindResult, MemoryDurableStore, Projection, StoredVessel,
    TrackPoint, VesselFilter,
};
pub use error::{BroadcastError, PersistenceError, StoreUnavailableAtStartup};
pub use expiry::{ExpiryPolicy, SweepReport};
pub use hub::{HubConfig, SubscriberHub};
pub use scheduler::{FlushOutcome, PersistenceScheduler};
pub use startup::wait_for_store;

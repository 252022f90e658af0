//! # ais-core
//!
//! Core AIS data model and shared state.
//!
//! This crate provides:
//! - Data model types (`Mmsi`, `VesselUpdate`, `VesselRecord`, ...)
//! - The vessel state store with merge-on-update semantics
//! - The pending set feeding batched persistence
//! - Hub settings and statistics
//!
//! This crate is intentionally runtime-agnostic and contains no async code.
//! Connectors, schedulers and the dispatch loop live in the runtime crates
//! and share the types defined here.

pub mod config;
pub mod ingest;
pub mod model;
pub mod pending;
pub mod statistics;
pub mod store;

pub use config::{ConfigError, HubSettings};
pub use ingest::IngestSink;
pub use model::*;
pub use pending::PendingSet;
pub use statistics::{HubStatistics, SourceStatus, StatisticsCollector};
pub use store::{MemoryStore, VesselStateStore};

//! # ais-protocol
//!
//! Real-time protocol message types and codec.
//!
//! This crate defines the WebSocket frames exchanged between the hub and
//! its subscribers.

pub mod codec;
pub mod messages;

pub use codec::*;
pub use messages::*;

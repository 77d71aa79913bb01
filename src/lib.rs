//! # Residence Portal
//!
//! Realtime session client for a residential-building portal: direct
//! conversations between residents, a broadcast alert feed, and presence,
//! on top of a REST backend and an optional WebSocket channel.
//!
//! ## Layout
//!
//! - [`shared`]: wire types, events, configuration and errors
//! - [`client`]: the connection manager, the conversation store, the
//!   optimistic delivery queue and the driver tying them together

pub mod client;
pub mod shared;

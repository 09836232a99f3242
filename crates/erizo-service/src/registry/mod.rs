//! In-memory registries owned by the session actor.
//!
//! Neither registry is shared: the session actor is the only reader and
//! writer, so plain `HashMap`s suffice.

pub mod bridge;
pub mod client;

pub use bridge::{BridgeEntry, BridgeRegistry};
pub use client::{Client, ClientRegistry, SubscriberEntry, Upstream};

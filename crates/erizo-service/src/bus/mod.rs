//! Message bus transport (Redis pub/sub).
//!
//! - Inbound: one subscription on the erizo's command channel. Payloads are
//!   handed to the dispatcher one at a time, in arrival order.
//! - Outbound: a single task drains the relay queue and publishes each
//!   payload to the channel named by its reply address.

pub mod client;

pub use client::{run_inbound, run_outbound, BusClient, InboundExit};

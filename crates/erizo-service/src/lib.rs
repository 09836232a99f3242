//! Erizo Session Service Library
//!
//! Session orchestration for one erizo, a WebRTC media relay worker:
//!
//! - Receives commands over a message bus and validates them into typed commands
//! - Keeps the registry of clients, their publishers and subscribers, and RTP bridges
//! - Wires subscribers and bridge sinks into their source's media fan-out
//! - Places every endpoint on the least-loaded worker of a fixed pool
//! - Relays endpoint lifecycle events back to whoever created the endpoint
//!
//! # Architecture
//!
//! ```text
//! bus (Redis pub/sub) ──▶ CommandDispatcher ──▶ SessionActor
//!                                                ├── ClientRegistry
//!                                                ├── BridgeRegistry
//!                                                └── EndpointActor (one per endpoint,
//!                                                    on its assigned worker)
//!                                                        │ engine state reports
//!                                                        ▼
//! bus ◀── outbound task ◀── ChannelRelay ◀──── lifecycle events
//! ```
//!
//! The media engine itself (ICE, DTLS, SRTP, packet fan-out) sits behind the
//! traits in [`engine`].
//!
//! # Modules
//!
//! - [`actors`] - Session and endpoint actors
//! - [`bus`] - Redis transport tasks
//! - [`config`] - Service configuration from environment
//! - [`dispatcher`] - Command routing and acknowledgements
//! - [`engine`] - Media engine boundary and worker pools
//! - [`errors`] - Error types with acknowledgement codes
//! - [`protocol`] - Inbound commands and outbound events
//! - [`registry`] - Client and bridge registries

pub mod actors;
pub mod bus;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod relay;

//! Actor model for the erizo session layer.
//!
//! ```text
//! SessionActor (singleton per erizo)
//! ├── owns ClientRegistry and BridgeRegistry
//! └── creates N EndpointActors
//!     └── EndpointActor (one per publisher, subscriber or bridge)
//!         ├── runs on the worker it was placed on
//!         └── owns its engine connection and fan-out
//! ```
//!
//! Actors communicate only through `tokio::sync::mpsc` mailboxes with
//! `oneshot` replies. Cancellation flows down a `CancellationToken`
//! hierarchy rooted at the session actor.

pub mod endpoint;
pub mod messages;
pub mod metrics;
pub mod session;

pub use endpoint::{EndpointActor, EndpointHandle, EventTarget};
pub use messages::{
    BridgeInfo, ClientInfo, EndpointRole, EndpointState, EndpointSummary, SessionStatus,
};
pub use metrics::{ActorMetrics, ActorMetricsSnapshot, ActorType, MailboxLevel, MailboxMonitor};
pub use session::{SessionActor, SessionActorHandle};

//! Wire protocol for the message bus.
//!
//! - [`command`] - inbound envelopes and the typed [`Command`] union
//! - [`event`] - outbound lifecycle events and acknowledgements

pub mod command;
pub mod event;

pub use command::{
    AddPublisher, AddSubscriber, AddVirtualPublisher, AddVirtualSubscriber, Command, Correlation,
    Envelope, RejectedEnvelope, SignalingMessage,
};
pub use event::{CommandReply, EventData, EventEnvelope, EventType, OutboundMessage};

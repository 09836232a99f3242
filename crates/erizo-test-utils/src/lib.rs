//! # Erizo Test Utilities
//!
//! Shared test utilities for the erizo session service.
//!
//! Provides in-memory stand-ins for the collaborators the session layer
//! consumes, so it can be tested without a media engine or a message bus.
//!
//! ## Modules
//!
//! - `mock_engine` - Scriptable media engine with rejection switches and
//!   state-report injection
//! - `mock_relay` - Event relay that records outbound messages
//! - `fixtures` - Test contexts and command payload builders
//!
//! ## Usage
//!
//! ```rust,ignore
//! use erizo_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let erizo = TestErizo::start();
//!
//!     erizo.dispatcher.dispatch(&add_publisher_command("c1", "s1", "r1")).await.unwrap();
//!     erizo.engine.emit_publisher("s1", EngineState::Ready, None);
//!
//!     let events = erizo.relay.wait_for("r1", 1, Duration::from_secs(1)).await;
//!     assert_eq!(events[0]["data"]["type"], "ready");
//! }
//! ```

pub mod fixtures;
pub mod mock_engine;
pub mod mock_relay;

pub use fixtures::*;
pub use mock_engine::*;
pub use mock_relay::*;

//! Engine used when no media engine is linked into the binary.
//!
//! The signalling plane (bus, dispatcher, registries, acks) runs normally;
//! every attempt to create media fails as resource unavailability, so no
//! endpoint is ever registered.

use super::{
    BridgeConnection, BridgeRequest, ConnectionRequest, EngineConnection, EngineError, FanOut,
    MediaEngine, MediaSink,
};
use tracing::warn;

#[derive(Debug, Default, Clone, Copy)]
pub struct UnlinkedEngine;

impl UnlinkedEngine {
    fn unavailable(what: &str, id: &str) -> EngineError {
        warn!(target: "erizo.engine", id = %id, "No media engine linked, cannot create {}", what);
        EngineError::Unavailable("no media engine linked".to_string())
    }
}

impl MediaEngine for UnlinkedEngine {
    fn create_connection(
        &self,
        request: ConnectionRequest<'_>,
    ) -> Result<Box<dyn EngineConnection>, EngineError> {
        Err(Self::unavailable("connection", request.connection_id))
    }

    fn create_bridge(
        &self,
        request: BridgeRequest<'_>,
    ) -> Result<Box<dyn BridgeConnection>, EngineError> {
        Err(Self::unavailable("bridge", request.bridge_stream_id))
    }

    fn create_fan_out(&self, source: &MediaSink) -> Result<Box<dyn FanOut>, EngineError> {
        Err(Self::unavailable("fan-out", source.as_str()))
    }
}

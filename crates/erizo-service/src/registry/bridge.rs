//! Bridge registry: plain-RTP endpoints linking this erizo to a peer.
//!
//! Bridge-stream ids are unique across both bridge roles. Inbound bridges
//! (bridge sources) additionally serve a stream id locally, tracked in a
//! secondary index so subscribers can find them.

use crate::actors::endpoint::EndpointHandle;
use crate::engine::BridgeDirection;
use std::collections::HashMap;
use std::net::SocketAddr;

#[derive(Debug, Clone)]
pub struct BridgeEntry {
    pub bridge_stream_id: String,
    /// For sources the stream served locally; for sinks the local publisher.
    pub src_stream_id: String,
    pub target: SocketAddr,
    pub direction: BridgeDirection,
    pub endpoint: EndpointHandle,
}

impl BridgeEntry {
    #[must_use]
    pub fn is_source(&self) -> bool {
        matches!(self.direction, BridgeDirection::Inbound { .. })
    }
}

#[derive(Debug, Default)]
pub struct BridgeRegistry {
    bridges: HashMap<String, BridgeEntry>,
    /// Locally served stream id -> bridge-stream id of its source.
    source_index: HashMap<String, String>,
}

impl BridgeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, bridge_stream_id: &str) -> bool {
        self.bridges.contains_key(bridge_stream_id)
    }

    pub fn insert(&mut self, entry: BridgeEntry) {
        if entry.is_source() {
            self.source_index
                .insert(entry.src_stream_id.clone(), entry.bridge_stream_id.clone());
        }
        self.bridges.insert(entry.bridge_stream_id.clone(), entry);
    }

    #[must_use]
    pub fn get(&self, bridge_stream_id: &str) -> Option<&BridgeEntry> {
        self.bridges.get(bridge_stream_id)
    }

    pub fn remove(&mut self, bridge_stream_id: &str) -> Option<BridgeEntry> {
        let entry = self.bridges.remove(bridge_stream_id)?;
        if entry.is_source() {
            self.source_index.remove(&entry.src_stream_id);
        }
        Some(entry)
    }

    /// The bridge source serving `stream_id` locally.
    #[must_use]
    pub fn source_for_stream(&self, stream_id: &str) -> Option<&BridgeEntry> {
        let bridge_stream_id = self.source_index.get(stream_id)?;
        self.bridges.get(bridge_stream_id)
    }

    /// Bridge-stream ids of every outbound bridge fed by `src_stream_id`, sorted.
    #[must_use]
    pub fn sinks_of(&self, src_stream_id: &str) -> Vec<String> {
        let mut found: Vec<String> = self
            .bridges
            .values()
            .filter(|entry| !entry.is_source() && entry.src_stream_id == src_stream_id)
            .map(|entry| entry.bridge_stream_id.clone())
            .collect();
        found.sort();
        found
    }

    /// Remove every bridge, returning them for teardown.
    pub fn drain(&mut self) -> Vec<BridgeEntry> {
        self.source_index.clear();
        self.bridges.drain().map(|(_, entry)| entry).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_lookups() {
        let mut registry = BridgeRegistry::new();

        assert!(registry.is_empty());
        assert!(!registry.contains("b1"));
        assert!(registry.get("b1").is_none());
        assert!(registry.remove("b1").is_none());
        assert!(registry.source_for_stream("s1").is_none());
        assert!(registry.sinks_of("s1").is_empty());
        assert!(registry.drain().is_empty());
    }
}

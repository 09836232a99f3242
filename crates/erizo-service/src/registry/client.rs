//! Client registry: connected participants and the endpoints they own.
//!
//! A client appears on its first `addPublisher`/`addSubscriber` and is
//! removed as soon as it owns no endpoint. A secondary index maps every
//! published stream to its owning client so stream uniqueness and upstream
//! lookups do not scan all clients.

use crate::actors::endpoint::EndpointHandle;
use crate::engine::SubscriberKey;
use std::collections::HashMap;

/// What a subscriber endpoint is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Upstream {
    Publisher { stream_id: String },
    BridgeSource { bridge_stream_id: String },
}

/// A subscriber endpoint plus the upstream fan-out it is attached to.
#[derive(Debug, Clone)]
pub struct SubscriberEntry {
    pub endpoint: EndpointHandle,
    pub upstream: Upstream,
}

impl SubscriberEntry {
    /// Key this subscriber is attached under in its upstream fan-out.
    #[must_use]
    pub fn key(client_id: &str) -> SubscriberKey {
        SubscriberKey::Client(client_id.to_string())
    }
}

#[derive(Debug)]
pub struct Client {
    pub id: String,
    /// Publisher endpoints keyed by stream id.
    pub publishers: HashMap<String, EndpointHandle>,
    /// Subscriber endpoints keyed by the subscribed stream id.
    pub subscribers: HashMap<String, SubscriberEntry>,
}

impl Client {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            publishers: HashMap::new(),
            subscribers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.publishers.is_empty() && self.subscribers.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<String, Client>,
    /// Published stream id -> owning client id.
    publisher_index: HashMap<String, String>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the client, creating an empty one if unknown.
    pub fn get_or_create(&mut self, client_id: &str) -> &mut Client {
        self.clients
            .entry(client_id.to_string())
            .or_insert_with(|| Client::new(client_id))
    }

    #[must_use]
    pub fn get(&self, client_id: &str) -> Option<&Client> {
        self.clients.get(client_id)
    }

    /// Drop the client if it no longer owns any endpoint. Returns true if removed.
    pub fn remove_if_empty(&mut self, client_id: &str) -> bool {
        let empty = self.clients.get(client_id).is_some_and(Client::is_empty);
        if empty {
            self.clients.remove(client_id);
        }
        empty
    }

    /// The publisher endpoint serving `stream_id`, from any client.
    #[must_use]
    pub fn publisher(&self, stream_id: &str) -> Option<&EndpointHandle> {
        let owner = self.publisher_index.get(stream_id)?;
        self.clients.get(owner)?.publishers.get(stream_id)
    }

    #[must_use]
    pub fn is_published(&self, stream_id: &str) -> bool {
        self.publisher_index.contains_key(stream_id)
    }

    pub fn insert_publisher(&mut self, client_id: &str, stream_id: &str, endpoint: EndpointHandle) {
        self.get_or_create(client_id)
            .publishers
            .insert(stream_id.to_string(), endpoint);
        self.publisher_index
            .insert(stream_id.to_string(), client_id.to_string());
    }

    /// Remove the (client, stream) publisher. The client itself is kept.
    pub fn take_publisher(&mut self, client_id: &str, stream_id: &str) -> Option<EndpointHandle> {
        let endpoint = self.clients.get_mut(client_id)?.publishers.remove(stream_id)?;
        self.publisher_index.remove(stream_id);
        Some(endpoint)
    }

    #[must_use]
    pub fn subscriber(&self, client_id: &str, stream_id: &str) -> Option<&SubscriberEntry> {
        self.clients.get(client_id)?.subscribers.get(stream_id)
    }

    pub fn insert_subscriber(&mut self, client_id: &str, stream_id: &str, entry: SubscriberEntry) {
        self.get_or_create(client_id)
            .subscribers
            .insert(stream_id.to_string(), entry);
    }

    pub fn take_subscriber(&mut self, client_id: &str, stream_id: &str) -> Option<SubscriberEntry> {
        self.clients.get_mut(client_id)?.subscribers.remove(stream_id)
    }

    /// Every (client id, stream id) subscribed to `upstream`, sorted.
    #[must_use]
    pub fn subscribers_of(&self, upstream: &Upstream) -> Vec<(String, String)> {
        let mut found: Vec<(String, String)> = self
            .clients
            .values()
            .flat_map(|client| {
                client
                    .subscribers
                    .iter()
                    .filter(|(_, entry)| entry.upstream == *upstream)
                    .map(|(stream_id, _)| (client.id.clone(), stream_id.clone()))
            })
            .collect();
        found.sort();
        found
    }

    /// The endpoint a client owns for `stream_id`, publisher first.
    #[must_use]
    pub fn find_endpoint(&self, client_id: &str, stream_id: &str) -> Option<&EndpointHandle> {
        let client = self.clients.get(client_id)?;
        client
            .publishers
            .get(stream_id)
            .or_else(|| client.subscribers.get(stream_id).map(|entry| &entry.endpoint))
    }

    /// Remove every client, returning them for teardown.
    pub fn drain(&mut self) -> Vec<Client> {
        self.publisher_index.clear();
        self.clients.drain().map(|(_, client)| client).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_is_idempotent() {
        let mut registry = ClientRegistry::new();

        registry.get_or_create("c1");
        registry.get_or_create("c1");

        assert_eq!(registry.len(), 1);
        assert!(registry.get("c1").is_some_and(Client::is_empty));
    }

    #[test]
    fn test_remove_if_empty_drops_only_empty_clients() {
        let mut registry = ClientRegistry::new();
        registry.get_or_create("c1");

        assert!(registry.remove_if_empty("c1"));
        assert!(!registry.remove_if_empty("c1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_lookups_are_none() {
        let mut registry = ClientRegistry::new();

        assert!(registry.publisher("s1").is_none());
        assert!(!registry.is_published("s1"));
        assert!(registry.take_publisher("c1", "s1").is_none());
        assert!(registry.take_subscriber("c1", "s1").is_none());
        assert!(registry.find_endpoint("c1", "s1").is_none());
        assert!(registry
            .subscribers_of(&Upstream::Publisher {
                stream_id: "s1".to_string()
            })
            .is_empty());
    }

    #[test]
    fn test_subscriber_key_uses_client_id() {
        assert_eq!(SubscriberEntry::key("c7").to_string(), "sub:c7");
    }
}

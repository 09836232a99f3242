//! `SessionActor` - singleton owner of the client and bridge registries.
//!
//! The `SessionActor` is the top-level actor of an erizo:
//!
//! - Singleton per erizo process
//! - Owns the `ClientRegistry` and `BridgeRegistry`; nothing else touches them
//! - Creates endpoint actors and wires subscribers into upstream fan-outs
//! - Owns the root `CancellationToken`; every endpoint gets a child token
//!
//! Commands are handled one at a time in arrival order, so the registry
//! checks and the registry update of one command are never interleaved with
//! another command.
//!
//! # Teardown Order
//!
//! Removing a source removes everything downstream of it first: subscribers
//! and bridge sinks are detached and closed before the source itself closes.
//! Shutdown applies the same rule to the whole erizo.

use super::endpoint::{
    BridgeEndpointSpec, EndpointActor, EndpointHandle, EventTarget, WebRtcEndpointSpec,
};
use super::messages::{
    BridgeInfo, ClientInfo, EndpointRole, EndpointSummary, SessionMessage, SessionStatus,
};
use super::metrics::{ActorType, MailboxMonitor};
use crate::context::ErizoContext;
use crate::engine::{BridgeDirection, SubscriberKey};
use crate::errors::ErizoError;
use crate::observability::metrics;
use crate::protocol::{
    AddPublisher, AddSubscriber, AddVirtualPublisher, AddVirtualSubscriber, SignalingMessage,
};
use crate::registry::{
    BridgeEntry, BridgeRegistry, Client, ClientRegistry, SubscriberEntry, Upstream,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `SessionActor`.
///
/// All methods are async and return results via oneshot channels.
#[derive(Clone, Debug)]
pub struct SessionActorHandle {
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
}

impl SessionActorHandle {
    /// Spawn the `SessionActor` on the current runtime and return a handle.
    #[must_use]
    pub fn new(ctx: ErizoContext) -> Self {
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = SessionActor::new(ctx, receiver, cancel_token.clone());
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    async fn call<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, ErizoError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| ErizoError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ErizoError::Internal(format!("response receive failed: {e}")))
    }

    /// Create a publisher endpoint for (client, stream).
    pub async fn add_publisher(
        &self,
        request: AddPublisher,
        corr_id: Option<i64>,
    ) -> Result<(), ErizoError> {
        self.call(|respond_to| SessionMessage::AddPublisher {
            request,
            corr_id,
            respond_to,
        })
        .await?
    }

    /// Create a subscriber endpoint and attach it to the stream's source.
    pub async fn add_subscriber(
        &self,
        request: AddSubscriber,
        corr_id: Option<i64>,
    ) -> Result<(), ErizoError> {
        self.call(|respond_to| SessionMessage::AddSubscriber {
            request,
            corr_id,
            respond_to,
        })
        .await?
    }

    /// Returns `Ok(false)` if the client had no such publisher.
    pub async fn remove_publisher(
        &self,
        client_id: String,
        stream_id: String,
    ) -> Result<bool, ErizoError> {
        self.call(|respond_to| SessionMessage::RemovePublisher {
            client_id,
            stream_id,
            respond_to,
        })
        .await?
    }

    /// Returns `Ok(false)` if the client had no such subscription.
    pub async fn remove_subscriber(
        &self,
        client_id: String,
        stream_id: String,
    ) -> Result<bool, ErizoError> {
        self.call(|respond_to| SessionMessage::RemoveSubscriber {
            client_id,
            stream_id,
            respond_to,
        })
        .await?
    }

    pub async fn add_virtual_publisher(
        &self,
        request: AddVirtualPublisher,
    ) -> Result<(), ErizoError> {
        self.call(|respond_to| SessionMessage::AddVirtualPublisher {
            request,
            respond_to,
        })
        .await?
    }

    pub async fn remove_virtual_publisher(
        &self,
        bridge_stream_id: String,
    ) -> Result<bool, ErizoError> {
        self.call(|respond_to| SessionMessage::RemoveVirtualPublisher {
            bridge_stream_id,
            respond_to,
        })
        .await?
    }

    pub async fn add_virtual_subscriber(
        &self,
        request: AddVirtualSubscriber,
    ) -> Result<(), ErizoError> {
        self.call(|respond_to| SessionMessage::AddVirtualSubscriber {
            request,
            respond_to,
        })
        .await?
    }

    pub async fn remove_virtual_subscriber(
        &self,
        bridge_stream_id: String,
        src_stream_id: Option<String>,
    ) -> Result<bool, ErizoError> {
        self.call(|respond_to| SessionMessage::RemoveVirtualSubscriber {
            bridge_stream_id,
            src_stream_id,
            respond_to,
        })
        .await?
    }

    /// Forward an offer or candidate to the (client, stream) endpoint.
    pub async fn process_signaling(
        &self,
        client_id: String,
        stream_id: String,
        message: SignalingMessage,
    ) -> Result<(), ErizoError> {
        self.call(|respond_to| SessionMessage::ProcessSignaling {
            client_id,
            stream_id,
            message,
            respond_to,
        })
        .await?
    }

    pub async fn get_client(&self, client_id: String) -> Result<Option<ClientInfo>, ErizoError> {
        self.call(|respond_to| SessionMessage::GetClient {
            client_id,
            respond_to,
        })
        .await
    }

    pub async fn get_bridge(
        &self,
        bridge_stream_id: String,
    ) -> Result<Option<BridgeInfo>, ErizoError> {
        self.call(|respond_to| SessionMessage::GetBridge {
            bridge_stream_id,
            respond_to,
        })
        .await
    }

    pub async fn get_status(&self) -> Result<SessionStatus, ErizoError> {
        self.call(|respond_to| SessionMessage::GetStatus { respond_to })
            .await
    }

    /// Close every endpoint and stop the actor.
    pub async fn shutdown(&self) -> Result<(), ErizoError> {
        self.call(|respond_to| SessionMessage::Shutdown { respond_to })
            .await
    }

    /// Cancel the actor and every endpoint without waiting for the mailbox
    /// to drain. Fallback for when `shutdown` cannot be delivered.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    ctx: ErizoContext,
    receiver: mpsc::Receiver<SessionMessage>,
    cancel_token: CancellationToken,
    clients: ClientRegistry,
    bridges: BridgeRegistry,
    /// Suffix for connection ids, unique within this erizo.
    next_connection: u64,
    mailbox: MailboxMonitor,
}

impl SessionActor {
    fn new(
        ctx: ErizoContext,
        receiver: mpsc::Receiver<SessionMessage>,
        cancel_token: CancellationToken,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Session, &ctx.erizo_id);

        Self {
            ctx,
            receiver,
            cancel_token,
            clients: ClientRegistry::new(),
            bridges: BridgeRegistry::new(),
            next_connection: 0,
            mailbox,
        }
    }

    #[instrument(skip_all, name = "erizo.actor.session", fields(erizo_id = %self.ctx.erizo_id))]
    async fn run(mut self) {
        info!(
            target: "erizo.actor.session",
            erizo_id = %self.ctx.erizo_id,
            "SessionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "erizo.actor.session",
                        erizo_id = %self.ctx.erizo_id,
                        "SessionActor received cancellation signal"
                    );
                    self.close_all().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();

                            if should_exit {
                                info!(
                                    target: "erizo.actor.session",
                                    erizo_id = %self.ctx.erizo_id,
                                    "SessionActor shut down"
                                );
                                break;
                            }
                        }
                        None => {
                            info!(
                                target: "erizo.actor.session",
                                erizo_id = %self.ctx.erizo_id,
                                "SessionActor channel closed, exiting"
                            );
                            self.close_all().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "erizo.actor.session",
            erizo_id = %self.ctx.erizo_id,
            messages_processed = self.mailbox.messages_processed(),
            "SessionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: SessionMessage) -> bool {
        match message {
            SessionMessage::AddPublisher {
                request,
                corr_id,
                respond_to,
            } => {
                let result = self.add_publisher(request, corr_id);
                let _ = respond_to.send(result);
            }

            SessionMessage::AddSubscriber {
                request,
                corr_id,
                respond_to,
            } => {
                let result = self.add_subscriber(request, corr_id).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::RemovePublisher {
                client_id,
                stream_id,
                respond_to,
            } => {
                let result = self.remove_publisher(&client_id, &stream_id).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::RemoveSubscriber {
                client_id,
                stream_id,
                respond_to,
            } => {
                let result = self.remove_subscriber(&client_id, &stream_id).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::AddVirtualPublisher {
                request,
                respond_to,
            } => {
                let result = self.add_virtual_publisher(request);
                let _ = respond_to.send(result);
            }

            SessionMessage::RemoveVirtualPublisher {
                bridge_stream_id,
                respond_to,
            } => {
                let result = self.remove_virtual_publisher(&bridge_stream_id).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::AddVirtualSubscriber {
                request,
                respond_to,
            } => {
                let result = self.add_virtual_subscriber(request).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::RemoveVirtualSubscriber {
                bridge_stream_id,
                src_stream_id,
                respond_to,
            } => {
                let result = self
                    .remove_virtual_subscriber(&bridge_stream_id, src_stream_id.as_deref())
                    .await;
                let _ = respond_to.send(result);
            }

            SessionMessage::ProcessSignaling {
                client_id,
                stream_id,
                message,
                respond_to,
            } => {
                let result = self.process_signaling(&client_id, &stream_id, message).await;
                let _ = respond_to.send(result);
            }

            SessionMessage::GetClient {
                client_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.clients.get(&client_id).map(client_info));
            }

            SessionMessage::GetBridge {
                bridge_stream_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.bridges.get(&bridge_stream_id).map(bridge_info));
            }

            SessionMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }

            SessionMessage::Shutdown { respond_to } => {
                self.close_all().await;
                let _ = respond_to.send(());
                return true;
            }
        }

        false
    }

    fn connection_id(&mut self, owner: &str) -> String {
        let id = format!("{owner}_{}", self.next_connection);
        self.next_connection += 1;
        id
    }

    fn event_target(&self, reply_to: String, corr_id: Option<i64>, room_id: Option<String>) -> EventTarget {
        EventTarget {
            relay: Arc::clone(&self.ctx.relay),
            reply_to,
            corr_id,
            agent_id: self.ctx.agent_id.clone(),
            erizo_id: self.ctx.erizo_id.clone(),
            room_id,
        }
    }

    /// True if a publisher or a bridge source already serves `stream_id`.
    fn is_served(&self, stream_id: &str) -> bool {
        self.clients.is_published(stream_id) || self.bridges.source_for_stream(stream_id).is_some()
    }

    fn add_publisher(
        &mut self,
        request: AddPublisher,
        corr_id: Option<i64>,
    ) -> Result<(), ErizoError> {
        if self.is_served(&request.stream_id) {
            return Err(ErizoError::StreamAlreadyPublished(request.stream_id));
        }

        let endpoint_id = self.connection_id(&request.client_id);
        let events = self.event_target(request.reply_to, corr_id, request.room_id);
        let endpoint = EndpointActor::spawn_webrtc(
            &self.ctx,
            WebRtcEndpointSpec {
                endpoint_id,
                client_id: request.client_id.clone(),
                stream_id: request.stream_id.clone(),
                label: request.label,
                role: EndpointRole::Publisher,
                events,
            },
            self.cancel_token.child_token(),
        )?;

        info!(
            target: "erizo.actor.session",
            client_id = %request.client_id,
            stream_id = %request.stream_id,
            endpoint_id = %endpoint.endpoint_id(),
            worker = %endpoint.worker_id(),
            "Publisher added"
        );

        self.clients
            .insert_publisher(&request.client_id, &request.stream_id, endpoint);
        self.update_gauges();
        Ok(())
    }

    async fn add_subscriber(
        &mut self,
        request: AddSubscriber,
        corr_id: Option<i64>,
    ) -> Result<(), ErizoError> {
        if self
            .clients
            .subscriber(&request.client_id, &request.stream_id)
            .is_some()
        {
            return Err(ErizoError::AlreadySubscribed(request.stream_id));
        }

        let (upstream, source) = self.resolve_source(&request.stream_id)?;
        if !source.is_ready_to_subscribe() {
            return Err(ErizoError::PublisherNotReady(request.stream_id));
        }

        let endpoint_id = self.connection_id(&request.client_id);
        let events = self.event_target(request.reply_to, corr_id, None);
        let endpoint = EndpointActor::spawn_webrtc(
            &self.ctx,
            WebRtcEndpointSpec {
                endpoint_id,
                client_id: request.client_id.clone(),
                stream_id: request.stream_id.clone(),
                label: request.label,
                role: EndpointRole::Subscriber,
                events,
            },
            self.cancel_token.child_token(),
        )?;

        if let Err(e) = source
            .attach(
                SubscriberEntry::key(&request.client_id),
                endpoint.media_sink().clone(),
            )
            .await
        {
            close_endpoint(&endpoint).await;
            return Err(e);
        }

        info!(
            target: "erizo.actor.session",
            client_id = %request.client_id,
            stream_id = %request.stream_id,
            endpoint_id = %endpoint.endpoint_id(),
            worker = %endpoint.worker_id(),
            "Subscriber added"
        );

        self.clients.insert_subscriber(
            &request.client_id,
            &request.stream_id,
            SubscriberEntry { endpoint, upstream },
        );
        self.update_gauges();
        Ok(())
    }

    /// Find what serves `stream_id`: a local publisher first, then a bridge source.
    fn resolve_source(&self, stream_id: &str) -> Result<(Upstream, EndpointHandle), ErizoError> {
        if let Some(publisher) = self.clients.publisher(stream_id) {
            return Ok((
                Upstream::Publisher {
                    stream_id: stream_id.to_string(),
                },
                publisher.clone(),
            ));
        }
        if let Some(bridge) = self.bridges.source_for_stream(stream_id) {
            return Ok((
                Upstream::BridgeSource {
                    bridge_stream_id: bridge.bridge_stream_id.clone(),
                },
                bridge.endpoint.clone(),
            ));
        }
        Err(ErizoError::PublisherNotFound(stream_id.to_string()))
    }

    fn upstream_endpoint(&self, upstream: &Upstream) -> Option<&EndpointHandle> {
        match upstream {
            Upstream::Publisher { stream_id } => self.clients.publisher(stream_id),
            Upstream::BridgeSource { bridge_stream_id } => {
                self.bridges.get(bridge_stream_id).map(|entry| &entry.endpoint)
            }
        }
    }

    async fn remove_publisher(
        &mut self,
        client_id: &str,
        stream_id: &str,
    ) -> Result<bool, ErizoError> {
        let Some(publisher) = self.clients.take_publisher(client_id, stream_id) else {
            debug!(
                target: "erizo.actor.session",
                client_id = %client_id,
                stream_id = %stream_id,
                "No publisher to remove"
            );
            return Ok(false);
        };

        let upstream = Upstream::Publisher {
            stream_id: stream_id.to_string(),
        };
        let subscribers = self.detach_subscribers(&upstream, &publisher).await;

        let sinks = self.bridges.sinks_of(stream_id);
        for bridge_stream_id in &sinks {
            if let Some(sink) = self.bridges.remove(bridge_stream_id) {
                detach_quietly(&publisher, SubscriberKey::Bridge(bridge_stream_id.clone())).await;
                close_endpoint(&sink.endpoint).await;
            }
        }

        close_endpoint(&publisher).await;
        self.clients.remove_if_empty(client_id);
        self.update_gauges();

        info!(
            target: "erizo.actor.session",
            client_id = %client_id,
            stream_id = %stream_id,
            subscribers_removed = subscribers,
            bridges_removed = sinks.len(),
            "Publisher removed"
        );
        Ok(true)
    }

    /// Detach and close every subscriber of `upstream`. Returns how many.
    async fn detach_subscribers(&mut self, upstream: &Upstream, source: &EndpointHandle) -> usize {
        let subscribers = self.clients.subscribers_of(upstream);
        for (client_id, stream_id) in &subscribers {
            if let Some(entry) = self.clients.take_subscriber(client_id, stream_id) {
                detach_quietly(source, SubscriberEntry::key(client_id)).await;
                close_endpoint(&entry.endpoint).await;
            }
            self.clients.remove_if_empty(client_id);
        }
        subscribers.len()
    }

    async fn remove_subscriber(
        &mut self,
        client_id: &str,
        stream_id: &str,
    ) -> Result<bool, ErizoError> {
        let Some(entry) = self.clients.take_subscriber(client_id, stream_id) else {
            debug!(
                target: "erizo.actor.session",
                client_id = %client_id,
                stream_id = %stream_id,
                "No subscriber to remove"
            );
            return Ok(false);
        };

        if let Some(source) = self.upstream_endpoint(&entry.upstream).cloned() {
            detach_quietly(&source, SubscriberEntry::key(client_id)).await;
        }
        close_endpoint(&entry.endpoint).await;
        self.clients.remove_if_empty(client_id);
        self.update_gauges();

        info!(
            target: "erizo.actor.session",
            client_id = %client_id,
            stream_id = %stream_id,
            "Subscriber removed"
        );
        Ok(true)
    }

    fn add_virtual_publisher(&mut self, request: AddVirtualPublisher) -> Result<(), ErizoError> {
        if self.bridges.contains(&request.bridge_stream_id) {
            return Err(ErizoError::BridgeInUse(request.bridge_stream_id));
        }
        if self.is_served(&request.src_stream_id) {
            return Err(ErizoError::StreamAlreadyPublished(request.src_stream_id));
        }

        let direction = BridgeDirection::Inbound {
            video_ssrc: request.video_ssrc,
            audio_ssrc: request.audio_ssrc,
        };
        let endpoint = EndpointActor::spawn_bridge(
            &self.ctx,
            BridgeEndpointSpec {
                bridge_stream_id: request.bridge_stream_id.clone(),
                src_stream_id: request.src_stream_id.clone(),
                target: request.target,
                direction,
            },
            self.cancel_token.child_token(),
        )?;

        info!(
            target: "erizo.actor.session",
            bridge_stream_id = %request.bridge_stream_id,
            stream_id = %request.src_stream_id,
            target_addr = %request.target,
            "Bridge source added"
        );

        self.bridges.insert(BridgeEntry {
            bridge_stream_id: request.bridge_stream_id,
            src_stream_id: request.src_stream_id,
            target: request.target,
            direction,
            endpoint,
        });
        self.update_gauges();
        Ok(())
    }

    /// Remove a bridge source and everything it feeds.
    ///
    /// `id` is the bridge stream id, or the src stream id the source
    /// republishes when no bridge has that id.
    async fn remove_virtual_publisher(&mut self, id: &str) -> Result<bool, ErizoError> {
        let bridge_stream_id = match self.bridges.get(id) {
            Some(entry) if entry.is_source() => entry.bridge_stream_id.clone(),
            Some(_) => {
                warn!(
                    target: "erizo.actor.session",
                    bridge_stream_id = %id,
                    "Bridge is outbound, not removed as a source"
                );
                return Ok(false);
            }
            None => match self.bridges.source_for_stream(id) {
                Some(entry) => entry.bridge_stream_id.clone(),
                None => return Ok(false),
            },
        };
        let Some(entry) = self.bridges.remove(&bridge_stream_id) else {
            return Ok(false);
        };

        let upstream = Upstream::BridgeSource {
            bridge_stream_id: bridge_stream_id.clone(),
        };
        let subscribers = self.detach_subscribers(&upstream, &entry.endpoint).await;
        close_endpoint(&entry.endpoint).await;
        self.update_gauges();

        info!(
            target: "erizo.actor.session",
            bridge_stream_id = %bridge_stream_id,
            src_stream_id = %entry.src_stream_id,
            subscribers_removed = subscribers,
            "Bridge source removed"
        );
        Ok(true)
    }

    async fn add_virtual_subscriber(
        &mut self,
        request: AddVirtualSubscriber,
    ) -> Result<(), ErizoError> {
        if self.bridges.contains(&request.bridge_stream_id) {
            return Err(ErizoError::BridgeInUse(request.bridge_stream_id));
        }
        let Some(publisher) = self.clients.publisher(&request.src_stream_id).cloned() else {
            return Err(ErizoError::PublisherNotFound(request.src_stream_id));
        };
        if !publisher.is_ready_to_subscribe() {
            return Err(ErizoError::PublisherNotReady(request.src_stream_id));
        }

        let direction = BridgeDirection::Outbound;
        let endpoint = EndpointActor::spawn_bridge(
            &self.ctx,
            BridgeEndpointSpec {
                bridge_stream_id: request.bridge_stream_id.clone(),
                src_stream_id: request.src_stream_id.clone(),
                target: request.target,
                direction,
            },
            self.cancel_token.child_token(),
        )?;

        if let Err(e) = publisher
            .attach(
                SubscriberKey::Bridge(request.bridge_stream_id.clone()),
                endpoint.media_sink().clone(),
            )
            .await
        {
            close_endpoint(&endpoint).await;
            return Err(e);
        }

        info!(
            target: "erizo.actor.session",
            bridge_stream_id = %request.bridge_stream_id,
            stream_id = %request.src_stream_id,
            target_addr = %request.target,
            "Bridge sink added"
        );

        self.bridges.insert(BridgeEntry {
            bridge_stream_id: request.bridge_stream_id,
            src_stream_id: request.src_stream_id,
            target: request.target,
            direction,
            endpoint,
        });
        self.update_gauges();
        Ok(())
    }

    async fn remove_virtual_subscriber(
        &mut self,
        bridge_stream_id: &str,
        src_stream_id: Option<&str>,
    ) -> Result<bool, ErizoError> {
        let (registered_src, publisher) = match self.bridges.get(bridge_stream_id) {
            Some(entry) if !entry.is_source() => (
                entry.src_stream_id.clone(),
                self.clients.publisher(&entry.src_stream_id).cloned(),
            ),
            Some(_) => {
                warn!(
                    target: "erizo.actor.session",
                    bridge_stream_id = %bridge_stream_id,
                    "Bridge is inbound, not removed as a sink"
                );
                return Ok(false);
            }
            None => return Ok(false),
        };

        if let Some(given) = src_stream_id {
            if given != registered_src {
                warn!(
                    target: "erizo.actor.session",
                    bridge_stream_id = %bridge_stream_id,
                    given_src = %given,
                    registered_src = %registered_src,
                    "Bridge source stream mismatch, removing registered bridge"
                );
            }
        }

        // Detach before the sink goes away so the fan-out never holds a dead sink.
        if let Some(publisher) = publisher {
            detach_quietly(&publisher, SubscriberKey::Bridge(bridge_stream_id.to_string())).await;
        }
        if let Some(entry) = self.bridges.remove(bridge_stream_id) {
            close_endpoint(&entry.endpoint).await;
        }
        self.update_gauges();

        info!(
            target: "erizo.actor.session",
            bridge_stream_id = %bridge_stream_id,
            stream_id = %registered_src,
            "Bridge sink removed"
        );
        Ok(true)
    }

    async fn process_signaling(
        &self,
        client_id: &str,
        stream_id: &str,
        message: SignalingMessage,
    ) -> Result<(), ErizoError> {
        let Some(endpoint) = self.clients.find_endpoint(client_id, stream_id).cloned() else {
            return Err(ErizoError::StreamNotFound(stream_id.to_string()));
        };

        match message {
            SignalingMessage::Offer { sdp } => {
                debug!(
                    target: "erizo.actor.session",
                    endpoint_id = %endpoint.endpoint_id(),
                    "Forwarding remote offer"
                );
                endpoint.set_remote_sdp(sdp).await
            }
            SignalingMessage::Candidate { candidate } => {
                debug!(
                    target: "erizo.actor.session",
                    endpoint_id = %endpoint.endpoint_id(),
                    sdp_mid = %candidate.sdp_mid,
                    "Forwarding remote candidate"
                );
                endpoint.add_remote_candidate(candidate).await
            }
        }
    }

    fn status(&self) -> SessionStatus {
        let (publishers, subscribers) = self.clients.iter().fold((0, 0), |(p, s), client| {
            (p + client.publishers.len(), s + client.subscribers.len())
        });
        SessionStatus {
            clients: self.clients.len(),
            publishers,
            subscribers,
            bridges: self.bridges.len(),
        }
    }

    fn update_gauges(&self) {
        metrics::set_clients_active(self.clients.len());
        metrics::set_bridges_active(self.bridges.len());
    }

    /// Close every endpoint, downstream endpoints before sources.
    async fn close_all(&mut self) {
        let clients = self.clients.drain();
        let bridges = self.bridges.drain();
        let total = clients.len() + bridges.len();

        for client in &clients {
            for entry in client.subscribers.values() {
                close_endpoint(&entry.endpoint).await;
            }
        }
        for bridge in bridges.iter().filter(|b| !b.is_source()) {
            close_endpoint(&bridge.endpoint).await;
        }
        for client in &clients {
            for publisher in client.publishers.values() {
                close_endpoint(publisher).await;
            }
        }
        for bridge in bridges.iter().filter(|b| b.is_source()) {
            close_endpoint(&bridge.endpoint).await;
        }

        self.update_gauges();
        if total > 0 {
            info!(
                target: "erizo.actor.session",
                erizo_id = %self.ctx.erizo_id,
                clients = clients.len(),
                bridges = bridges.len(),
                "All endpoints closed"
            );
        }
    }
}

async fn close_endpoint(endpoint: &EndpointHandle) {
    if let Err(e) = endpoint.close().await {
        debug!(
            target: "erizo.actor.session",
            endpoint_id = %endpoint.endpoint_id(),
            error = %e,
            "Endpoint already gone"
        );
    }
}

async fn detach_quietly(source: &EndpointHandle, key: SubscriberKey) {
    if let Err(e) = source.detach(key).await {
        debug!(
            target: "erizo.actor.session",
            endpoint_id = %source.endpoint_id(),
            error = %e,
            "Detach skipped, source already gone"
        );
    }
}

fn summary(stream_id: &str, endpoint: &EndpointHandle) -> EndpointSummary {
    EndpointSummary {
        stream_id: stream_id.to_string(),
        role: endpoint.role(),
        state: endpoint.state(),
    }
}

fn client_info(client: &Client) -> ClientInfo {
    let mut publishers: Vec<EndpointSummary> = client
        .publishers
        .iter()
        .map(|(stream_id, endpoint)| summary(stream_id, endpoint))
        .collect();
    let mut subscribers: Vec<EndpointSummary> = client
        .subscribers
        .iter()
        .map(|(stream_id, entry)| summary(stream_id, &entry.endpoint))
        .collect();
    publishers.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));
    subscribers.sort_by(|a, b| a.stream_id.cmp(&b.stream_id));

    ClientInfo {
        client_id: client.id.clone(),
        publishers,
        subscribers,
    }
}

fn bridge_info(entry: &BridgeEntry) -> BridgeInfo {
    BridgeInfo {
        bridge_stream_id: entry.bridge_stream_id.clone(),
        src_stream_id: entry.src_stream_id.clone(),
        target: entry.target,
        role: entry.endpoint.role(),
        state: entry.endpoint.state(),
    }
}

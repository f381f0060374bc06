//! Responder: the serving side of federation.
//!
//! Answers a peer's handshake, serves pages of local content to pulling
//! peers and ingests pages pushed to us through the same applicator the
//! orchestrator uses. Pushed pages are reconciled against the peer's
//! inbound checkpoint, which moves each time we acknowledge one; our own
//! runs against the peer do not move it.
//!
//! Every inbound message is checked against the registered peer's key,
//! the nonce store and the peer's tier. Errors become a [`Reject`];
//! nothing is retried here.

use crate::apply::Applicator;
use crate::error::{ErrorClass, Result, SyncError};
use crate::governance::Governance;
use crate::graph::GraphRepository;
use crate::outbound::collect_page;
use crate::transport::FrameHandler;
use async_trait::async_trait;
use fed_core::{RunCounts, TrustEventKind, TrustTier};
use fed_security::{decode_public_key, SecurityError, SecurityLayer};
use fed_trust::{Peer, TrustManager};
use fed_types::{
    time::now_millis, Frame, Handshake, InstanceId, Message, Reject, SyncAck, SyncDirection,
    SyncPayload, SyncRequest,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Handles inbound federation messages.
pub struct FederationResponder {
    security: Arc<SecurityLayer>,
    trust: Arc<TrustManager>,
    graph: Arc<dyn GraphRepository>,
    applicator: Applicator,
    page_size: u32,
}

impl std::fmt::Debug for FederationResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FederationResponder")
            .field("instance", &self.security.instance_id())
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl FederationResponder {
    /// Create a responder over the local graph.
    pub fn new(
        security: Arc<SecurityLayer>,
        trust: Arc<TrustManager>,
        graph: Arc<dyn GraphRepository>,
        governance: Arc<dyn Governance>,
        page_size: u32,
    ) -> Self {
        let applicator = Applicator::new(graph.clone(), governance, trust.clone());
        Self {
            security,
            trust,
            graph,
            applicator,
            page_size: page_size.max(1),
        }
    }

    /// Answer one message.
    pub async fn handle(&self, message: Message) -> Message {
        let kind = message.kind();
        let outcome = match message {
            Message::Handshake(hello) => self.on_handshake(hello).await,
            Message::SyncRequest(request) => self.on_request(request).await,
            Message::SyncPayload(payload) => self.on_payload(payload).await,
            Message::SyncAck(_) | Message::Reject(_) => Err(SyncError::Protocol(format!(
                "unsolicited {kind}"
            ))),
        };

        match outcome {
            Ok(reply) => reply,
            Err(e) => {
                let class = e.class();
                warn!(request = kind, class = class.as_str(), error = %e, "inbound request rejected");
                Message::Reject(Reject {
                    reason: reject_reason(&e),
                })
            }
        }
    }

    async fn on_handshake(&self, hello: Handshake) -> Result<Message> {
        let key = decode_public_key(&hello.public_key)?;
        if InstanceId::from_public_key(&key) != hello.instance_id {
            return Err(SecurityError::IdentityMismatch(format!(
                "instance id {} does not match key",
                hello.instance_id
            ))
            .into());
        }
        let peer = self.identify(&hello.instance_id).await?;
        if peer.tier() == TrustTier::Quarantine {
            return Err(not_admitted(&peer, "peer is quarantined"));
        }
        self.security.accept(peer.id, &hello, &peer.public_key)?;
        self.trust.record_handshake_verified(&peer.id).await?;

        let mut reply = Handshake::new(&self.security.identity().public_key());
        self.security.prepare(&mut reply)?;
        debug!(peer = %peer.id, "handshake answered");
        Ok(Message::Handshake(reply))
    }

    async fn on_request(&self, request: SyncRequest) -> Result<Message> {
        let peer = self.identify(&request.peer_id).await?;
        self.security.accept(peer.id, &request, &peer.public_key)?;

        if request.direction != SyncDirection::Pull {
            return Err(SyncError::Protocol(format!(
                "sync request direction must be pull, got {}",
                request.direction.as_str()
            )));
        }
        if !peer.tier().allows_outbound() || !peer.direction.pushes() {
            return Err(not_admitted(&peer, "content is not served to this peer"));
        }

        let limit = request.limit.clamp(1, self.page_size);
        let page = collect_page(self.graph.as_ref(), &peer, request.since_cursor, limit).await?;
        let served = page.len() as u64;
        let mut payload = SyncPayload::new(
            self.security.instance_id(),
            page.nodes,
            page.edges,
            page.deletions,
            page.cursor,
            page.has_more,
        )?;
        self.security.prepare(&mut payload)?;

        if served > 0 {
            self.trust
                .update(&peer.id, move |p| p.items_sent += served)
                .await?;
        }
        debug!(peer = %peer.id, since = %request.since_cursor, served, cursor = %payload.cursor, "page served");
        Ok(Message::SyncPayload(payload))
    }

    async fn on_payload(&self, payload: SyncPayload) -> Result<Message> {
        let peer = self.identify(&payload.instance_id).await?;
        self.security.accept(peer.id, &payload, &peer.public_key)?;

        if !peer.tier().allows_inbound() || !peer.direction.pulls() {
            return Err(not_admitted(&peer, "content is not accepted from this peer"));
        }

        let computed = payload.computed_hash()?;
        if computed != payload.content_hash {
            let err = SyncError::HashMismatch {
                declared: payload.content_hash.clone(),
                computed,
            };
            // Signed by the peer, so the mismatch is theirs.
            if let Err(e) = self
                .trust
                .record_event(&peer.id, TrustEventKind::SyncFailure, Some(err.to_string()))
                .await
            {
                warn!(peer = %peer.id, error = %e, "failed to record trust event");
            }
            return Err(err);
        }

        let cursor = payload.cursor;
        // Taken before reading local state so edits made meanwhile stay newer.
        let checkpoint = now_millis();
        let plan = self
            .applicator
            .plan_page(&peer, &payload, peer.inbound_checkpoint())
            .await;
        let mut counts = RunCounts::default();
        let tally = self.applicator.apply_plan(&peer, plan, &mut counts).await?;

        let received = u64::from(counts.received());
        self.trust
            .update(&peer.id, move |p| {
                p.items_received += received;
                p.inbound_checkpoint_ms = Some(checkpoint.max(p.inbound_checkpoint()));
            })
            .await?;

        let mut ack = SyncAck {
            instance_id: self.security.instance_id(),
            cursor,
            accepted: tally.accepted,
            rejected: tally.rejected,
            nonce: None,
            timestamp: 0,
            signature: String::new(),
        };
        self.security.prepare(&mut ack)?;
        debug!(peer = %peer.id, %cursor, accepted = tally.accepted, rejected = tally.rejected, "pushed page ingested");
        Ok(Message::SyncAck(ack))
    }

    /// Registered, non-revoked peer for an instance id.
    async fn identify(&self, instance_id: &InstanceId) -> Result<Peer> {
        let key = instance_id
            .public_key()
            .ok_or_else(|| SyncError::UnknownPeer(instance_id.clone()))?;
        let peer = self
            .trust
            .find_by_public_key(&key)
            .await?
            .ok_or_else(|| SyncError::UnknownPeer(instance_id.clone()))?;
        if peer.is_revoked() {
            return Err(not_admitted(&peer, "peer is revoked"));
        }
        Ok(peer)
    }
}

#[async_trait]
impl FrameHandler for FederationResponder {
    async fn handle_frame(&self, body: &[u8]) -> Vec<u8> {
        let reply = match Frame::decode(body) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                warn!(error = %e, "malformed inbound frame");
                Message::Reject(Reject {
                    reason: "malformed frame".into(),
                })
            }
        };
        match Frame::encode(&reply) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, reply = reply.kind(), "failed to encode reply");
                Vec::new()
            }
        }
    }
}

fn not_admitted(peer: &Peer, reason: &str) -> SyncError {
    SyncError::NotAdmitted {
        peer: peer.id,
        reason: reason.to_string(),
    }
}

/// What the peer is told. Security and internal details stay in our logs.
fn reject_reason(error: &SyncError) -> String {
    match error.class() {
        ErrorClass::Security => "security check failed".to_string(),
        ErrorClass::Internal => "internal error".to_string(),
        ErrorClass::Admission
        | ErrorClass::Integrity
        | ErrorClass::ResourceLimit
        | ErrorClass::Transport => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::RecordingGovernance;
    use crate::graph::MemoryGraph;
    use fed_core::ConflictStrategy;
    use fed_security::{IdentityKey, SecurityConfig, StaticResolver};
    use fed_trust::{PeerRegistration, SqlitePeerStore, TrustConfig};
    use fed_types::{time::now_secs, Cursor, ItemId, NodeRecord, Nonce, Nonced, Origin};

    struct Fixture {
        local: Arc<SecurityLayer>,
        remote: IdentityKey,
        graph: MemoryGraph,
        governance: RecordingGovernance,
        trust: Arc<TrustManager>,
        responder: FederationResponder,
        peer: Peer,
    }

    async fn fixture(boost: f64) -> Fixture {
        fixture_with(boost, ConflictStrategy::default()).await
    }

    async fn fixture_with(boost: f64, strategy: ConflictStrategy) -> Fixture {
        let local = Arc::new(SecurityLayer::new(
            IdentityKey::generate(),
            &SecurityConfig::default(),
            Arc::new(StaticResolver::new()),
        ));
        let store = Arc::new(SqlitePeerStore::in_memory().await.unwrap());
        let trust = Arc::new(TrustManager::new(store, TrustConfig::default()));
        let graph = MemoryGraph::new();
        let governance = RecordingGovernance::new();
        let responder = FederationResponder::new(
            local.clone(),
            trust.clone(),
            Arc::new(graph.clone()),
            Arc::new(governance.clone()),
            10,
        );
        let remote = IdentityKey::generate();
        let mut registration =
            PeerRegistration::new("b", "https://b.example/", remote.public_key());
        registration.conflict_strategy = strategy;
        let peer = trust.register_peer(registration).await.unwrap();
        if boost != 0.0 {
            trust.manual_adjustment(&peer.id, boost, "test").await.unwrap();
        }
        let peer = trust.get_peer(&peer.id).await.unwrap();
        Fixture {
            local,
            remote,
            graph,
            governance,
            trust,
            responder,
            peer,
        }
    }

    fn push(f: &Fixture, node: NodeRecord, cursor: u64) -> Message {
        let payload = SyncPayload::new(
            f.remote.instance_id(),
            vec![node],
            Vec::new(),
            Vec::new(),
            Cursor::new(cursor),
            false,
        )
        .unwrap();
        Message::SyncPayload(signed(&f.remote, payload))
    }

    async fn stored(f: &Fixture, id: &str) -> NodeRecord {
        f.graph.get_node(&ItemId::from(id)).await.unwrap().unwrap()
    }

    fn signed<T: fed_types::Signable + Nonced>(key: &IdentityKey, mut message: T) -> T {
        message.stamp(Nonce::random(), now_secs());
        key.sign(&mut message).unwrap();
        message
    }

    #[tokio::test]
    async fn handshake_from_registered_peer() {
        let f = fixture(0.0).await;
        let hello = signed(&f.remote, Handshake::new(&f.remote.public_key()));

        let reply = f.responder.handle(Message::Handshake(hello)).await;
        let theirs = match reply {
            Message::Handshake(h) => h,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(theirs.instance_id, f.local.instance_id());
        fed_security::verify(&theirs, &f.local.identity().public_key()).unwrap();
        assert!(f.trust.get_peer(&f.peer.id).await.unwrap().last_verified_at.is_some());
    }

    #[tokio::test]
    async fn unknown_and_replayed_messages_are_rejected() {
        let f = fixture(0.0).await;
        let stranger = IdentityKey::generate();
        let hello = signed(&stranger, Handshake::new(&stranger.public_key()));
        assert!(matches!(
            f.responder.handle(Message::Handshake(hello)).await,
            Message::Reject(_)
        ));

        let hello = signed(&f.remote, Handshake::new(&f.remote.public_key()));
        assert!(matches!(
            f.responder.handle(Message::Handshake(hello.clone())).await,
            Message::Handshake(_)
        ));
        match f.responder.handle(Message::Handshake(hello)).await {
            Message::Reject(r) => assert_eq!(r.reason, "security check failed"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn serves_only_local_content_to_standard_peers() {
        let f = fixture(0.2).await;
        f.graph
            .upsert_node(NodeRecord::new("n1", "concept", "mine", 1))
            .await
            .unwrap();
        let mut echoed = NodeRecord::new("n2", "concept", "theirs", 2);
        echoed.origin = Origin::Federated { peer: f.peer.id };
        f.graph.upsert_node(echoed).await.unwrap();

        let request = signed(
            &f.remote,
            SyncRequest::new(f.remote.instance_id(), SyncDirection::Pull, Cursor::zero(), 50),
        );
        let payload = match f.responder.handle(Message::SyncRequest(request)).await {
            Message::SyncPayload(p) => p,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(payload.items.len(), 1);
        assert_eq!(payload.items[0].content, "mine");
        assert_eq!(payload.cursor, Cursor::new(2));
        assert!(!payload.has_more);
        fed_security::verify(&payload, &f.local.identity().public_key()).unwrap();
        assert_eq!(f.trust.get_peer(&f.peer.id).await.unwrap().items_sent, 1);
    }

    #[tokio::test]
    async fn limited_peer_cannot_pull() {
        let f = fixture(0.0).await;
        let request = signed(
            &f.remote,
            SyncRequest::new(f.remote.instance_id(), SyncDirection::Pull, Cursor::zero(), 50),
        );
        assert!(matches!(
            f.responder.handle(Message::SyncRequest(request)).await,
            Message::Reject(_)
        ));
    }

    #[tokio::test]
    async fn pushed_page_is_ingested_and_acknowledged() {
        let f = fixture(0.2).await;
        let payload = SyncPayload::new(
            f.remote.instance_id(),
            vec![NodeRecord::new("n1", "concept", "pushed", 10)],
            Vec::new(),
            Vec::new(),
            Cursor::new(5),
            false,
        )
        .unwrap();
        let payload = signed(&f.remote, payload);

        let ack = match f.responder.handle(Message::SyncPayload(payload)).await {
            Message::SyncAck(ack) => ack,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(ack.cursor, Cursor::new(5));
        assert_eq!(ack.accepted, 1);
        assert_eq!(f.graph.node_count(), 1);
        assert_eq!(f.trust.get_peer(&f.peer.id).await.unwrap().items_received, 1);
    }

    #[tokio::test]
    async fn tampered_push_applies_nothing() {
        let f = fixture(0.2).await;
        let mut payload = SyncPayload::new(
            f.remote.instance_id(),
            vec![NodeRecord::new("n1", "concept", "original", 10)],
            Vec::new(),
            Vec::new(),
            Cursor::new(5),
            false,
        )
        .unwrap();
        payload.items[0].content = "tampered".into();
        let payload = signed(&f.remote, payload);

        assert!(matches!(
            f.responder.handle(Message::SyncPayload(payload)).await,
            Message::Reject(_)
        ));
        assert_eq!(f.graph.node_count(), 0);
        assert_eq!(f.trust.get_peer(&f.peer.id).await.unwrap().trust_score, 0.45);
    }

    #[tokio::test]
    async fn repeated_pushes_update_under_local_wins() {
        let f = fixture_with(0.2, ConflictStrategy::LocalWins).await;

        assert!(matches!(
            f.responder.handle(push(&f, NodeRecord::new("n1", "concept", "v1", 10), 1)).await,
            Message::SyncAck(_)
        ));
        let after_first = f.trust.get_peer(&f.peer.id).await.unwrap();
        assert!(after_first.inbound_checkpoint() > 0);
        assert_eq!(after_first.last_success_at, None);

        // Only the peer wrote n1, so its newer version is a plain update.
        assert!(matches!(
            f.responder.handle(push(&f, NodeRecord::new("n1", "concept", "v2", 20), 2)).await,
            Message::SyncAck(_)
        ));
        assert_eq!(stored(&f, "n1").await.content, "v2");

        // A local edit after the last acknowledged push is a real conflict.
        let now = now_millis();
        f.graph
            .upsert_node(NodeRecord::new("n1", "concept", "edited here", now + 1_000))
            .await
            .unwrap();
        assert!(matches!(
            f.responder
                .handle(push(&f, NodeRecord::new("n1", "concept", "v3", now + 2_000), 3))
                .await,
            Message::SyncAck(_)
        ));
        assert_eq!(stored(&f, "n1").await.content, "edited here");
    }

    #[tokio::test]
    async fn repeated_pushes_skip_review_under_manual_review() {
        let f = fixture_with(0.2, ConflictStrategy::ManualReview).await;

        f.responder
            .handle(push(&f, NodeRecord::new("n1", "concept", "v1", 10), 1))
            .await;
        f.responder
            .handle(push(&f, NodeRecord::new("n1", "concept", "v2", 20), 2))
            .await;

        let node = stored(&f, "n1").await;
        assert_eq!(node.content, "v2");
        assert_eq!(node.origin, Origin::Federated { peer: f.peer.id });
        assert!(f.governance.conflicts().is_empty());
        assert_eq!(f.trust.get_peer(&f.peer.id).await.unwrap().items_received, 2);
    }
}

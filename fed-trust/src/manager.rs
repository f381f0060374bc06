//! Trust manager: the only writer of peer trust scores.
//!
//! Every change to a peer's score goes through [`TrustManager`], serialized
//! per peer by an async lock, and is persisted together with the event that
//! caused it.

use crate::config::TrustConfig;
use crate::error::{Result, TrustError};
use crate::store::{Peer, PeerRegistration, PeerStore, TrustEvent};
use dashmap::DashMap;
use fed_core::{
    apply_delta, clamp_score, inactivity_decay, verification_decay_due, PeerStatus,
    TrustEventKind, TrustTier, INACTIVITY_DECAY_PER_WEEK, VERIFICATION_DECAY_FACTOR,
};
use fed_types::{time::now_secs, Cursor, PeerId};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

fn rounded_delta(before: f64, after: f64) -> f64 {
    ((after - before) * 10_000.0).round() / 10_000.0
}

/// Result of one decay sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecayReport {
    /// Peers examined.
    pub examined: usize,
    /// Inactivity decay events recorded.
    pub inactivity: usize,
    /// Verification decay events recorded.
    pub verification: usize,
    /// Peers that could not be processed.
    pub errors: usize,
}

/// Owns peer registrations and their trust scores.
pub struct TrustManager {
    store: Arc<dyn PeerStore>,
    config: TrustConfig,
    locks: DashMap<PeerId, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for TrustManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustManager")
            .field("config", &self.config)
            .field("locked_peers", &self.locks.len())
            .finish()
    }
}

impl TrustManager {
    /// Create a manager over a peer store.
    pub fn new(store: Arc<dyn PeerStore>, config: TrustConfig) -> Self {
        Self {
            store,
            config,
            locks: DashMap::new(),
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &TrustConfig {
        &self.config
    }

    fn lock_for(&self, id: &PeerId) -> Arc<Mutex<()>> {
        self.locks
            .entry(*id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn load(&self, id: &PeerId) -> Result<Peer> {
        self.store
            .get_peer(id)
            .await?
            .ok_or(TrustError::PeerNotFound(*id))
    }

    async fn persist_event(
        &self,
        peer: &Peer,
        kind: TrustEventKind,
        delta: f64,
        now: u64,
        reason: Option<String>,
    ) -> Result<()> {
        let event = TrustEvent {
            peer_id: peer.id,
            kind,
            delta,
            score_after: peer.trust_score,
            timestamp: now,
            reason,
        };
        self.store
            .append_event(peer, &event, self.config.max_history)
            .await?;
        Ok(())
    }

    /// Register a new peer at the initial score, status pending.
    pub async fn register_peer(&self, registration: PeerRegistration) -> Result<Peer> {
        let name = registration.name.trim();
        if name.is_empty() {
            return Err(TrustError::InvalidInput("peer name is empty".into()));
        }
        let scheme = registration
            .base_url
            .split_once("://")
            .map(|(s, _)| s.to_ascii_lowercase());
        if !matches!(scheme.as_deref(), Some("https") | Some("http")) {
            return Err(TrustError::InvalidInput(format!(
                "base url must be http(s): {}",
                registration.base_url
            )));
        }
        if !(0.0..=1.0).contains(&registration.push_min_trust) {
            return Err(TrustError::InvalidInput(format!(
                "push_min_trust out of range: {}",
                registration.push_min_trust
            )));
        }

        if let Some(existing) = self.store.find_by_public_key(&registration.public_key).await? {
            if !existing.is_revoked() {
                return Err(TrustError::DuplicatePeer(existing.instance_id().to_string()));
            }
        }

        let peer = Peer {
            id: PeerId::new(),
            name: name.to_string(),
            base_url: registration.base_url,
            public_key: registration.public_key,
            trust_score: clamp_score(self.config.initial_score),
            status: PeerStatus::Pending,
            direction: registration.direction,
            conflict_strategy: registration.conflict_strategy,
            push_min_trust: registration.push_min_trust,
            push_types: registration.push_types,
            pull_cursor: Cursor::zero(),
            push_cursor: Cursor::zero(),
            syncs_attempted: 0,
            syncs_succeeded: 0,
            items_received: 0,
            items_sent: 0,
            registered_at: now_secs(),
            last_sync_at: None,
            last_success_at: None,
            last_verified_at: None,
            inactivity_checkpoint: None,
            verification_checkpoint: None,
            inbound_checkpoint_ms: None,
        };
        self.store.insert_peer(&peer).await?;

        info!(peer = %peer.id, name = %peer.name, score = peer.trust_score, "peer registered");
        Ok(peer)
    }

    /// Get a peer by id.
    pub async fn get_peer(&self, id: &PeerId) -> Result<Peer> {
        self.load(id).await
    }

    /// All registered peers.
    pub async fn list_peers(&self) -> Result<Vec<Peer>> {
        Ok(self.store.list_peers().await?)
    }

    /// Peer registered for a public key, if any.
    pub async fn find_by_public_key(&self, public_key: &[u8; 32]) -> Result<Option<Peer>> {
        Ok(self.store.find_by_public_key(public_key).await?)
    }

    /// Current tier of a peer.
    pub async fn tier(&self, id: &PeerId) -> Result<TrustTier> {
        Ok(self.load(id).await?.tier())
    }

    /// Most recent trust events, newest first.
    pub async fn history(&self, id: &PeerId, limit: u32) -> Result<Vec<TrustEvent>> {
        Ok(self.store.list_events(id, limit).await?)
    }

    /// Record an event with a fixed delta and return the new score.
    pub async fn record_event(
        &self,
        id: &PeerId,
        kind: TrustEventKind,
        reason: Option<String>,
    ) -> Result<f64> {
        let delta = kind
            .fixed_delta()
            .ok_or(TrustError::UnsupportedEvent(kind.as_str()))?;

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut peer = self.load(id).await?;
        if peer.is_revoked() {
            return Err(TrustError::Revoked(*id));
        }

        let now = now_secs();
        let before = peer.trust_score;
        peer.trust_score = apply_delta(before, delta);
        peer.status = peer.status.after_score_change(peer.tier());
        if kind == TrustEventKind::SyncSuccess {
            peer.last_success_at = Some(now);
        }

        let applied = rounded_delta(before, peer.trust_score);
        self.persist_event(&peer, kind, applied, now, reason).await?;

        debug!(peer = %id, event = %kind, before, after = peer.trust_score, "trust event recorded");
        if TrustTier::from_score(before) != peer.tier() {
            info!(
                peer = %id,
                from = TrustTier::from_score(before).as_str(),
                to = peer.tier().as_str(),
                "peer changed tier"
            );
        }
        Ok(peer.trust_score)
    }

    /// Note a verified handshake.
    ///
    /// Pending and offline peers move to the status their tier implies.
    pub async fn record_handshake_verified(&self, id: &PeerId) -> Result<Peer> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut peer = self.load(id).await?;
        if peer.is_revoked() {
            return Err(TrustError::Revoked(*id));
        }

        let now = now_secs();
        peer.last_verified_at = Some(now);
        if matches!(peer.status, PeerStatus::Pending | PeerStatus::Offline) {
            peer.status = PeerStatus::for_tier(peer.tier());
        }
        self.persist_event(&peer, TrustEventKind::HandshakeVerified, 0.0, now, None)
            .await?;

        debug!(peer = %id, status = %peer.status, "handshake verified");
        Ok(peer)
    }

    /// Mark a peer unreachable. No score change.
    pub async fn mark_offline(&self, id: &PeerId) -> Result<()> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut peer = self.load(id).await?;
        if peer.is_revoked() || peer.status == PeerStatus::Offline {
            return Ok(());
        }
        peer.status = PeerStatus::Offline;
        self.store.update_peer(&peer).await?;

        warn!(peer = %id, "peer marked offline");
        Ok(())
    }

    /// Update a peer's bookkeeping (cursors, counters, timestamps).
    ///
    /// Score and status changes made by `f` are discarded; those only move
    /// through trust events.
    pub async fn update<F>(&self, id: &PeerId, f: F) -> Result<Peer>
    where
        F: FnOnce(&mut Peer) + Send,
    {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut peer = self.load(id).await?;
        let (score, status) = (peer.trust_score, peer.status);
        let (id_before, key_before) = (peer.id, peer.public_key);
        f(&mut peer);
        peer.trust_score = score;
        peer.status = status;
        peer.id = id_before;
        peer.public_key = key_before;

        self.store.update_peer(&peer).await?;
        Ok(peer)
    }

    /// Operator adjustment by an arbitrary delta in [-1, 1].
    pub async fn manual_adjustment(&self, id: &PeerId, delta: f64, reason: &str) -> Result<f64> {
        if !delta.is_finite() || !(-1.0..=1.0).contains(&delta) {
            return Err(TrustError::InvalidInput(format!(
                "adjustment must be within [-1, 1]: {delta}"
            )));
        }

        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut peer = self.load(id).await?;
        if peer.is_revoked() {
            return Err(TrustError::Revoked(*id));
        }

        let before = peer.trust_score;
        peer.trust_score = apply_delta(before, delta);
        peer.status = peer.status.after_score_change(peer.tier());
        let applied = rounded_delta(before, peer.trust_score);
        self.persist_event(
            &peer,
            TrustEventKind::ManualOverride,
            applied,
            now_secs(),
            Some(reason.to_string()),
        )
        .await?;

        info!(peer = %id, before, after = peer.trust_score, reason, "manual trust adjustment");
        Ok(peer.trust_score)
    }

    /// Revoke a peer permanently. Idempotent.
    pub async fn revoke(&self, id: &PeerId, reason: &str) -> Result<Peer> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut peer = self.load(id).await?;
        if peer.is_revoked() {
            return Ok(peer);
        }

        let before = peer.trust_score;
        peer.trust_score = 0.0;
        peer.status = PeerStatus::Revoked;
        self.persist_event(
            &peer,
            TrustEventKind::Revocation,
            -before,
            now_secs(),
            Some(reason.to_string()),
        )
        .await?;

        warn!(peer = %id, reason, "peer revoked");
        Ok(peer)
    }

    /// Apply inactivity and verification decay as of now.
    pub async fn decay_inactive_peers(&self) -> Result<DecayReport> {
        self.decay_inactive_peers_at(now_secs()).await
    }

    /// Apply decay as of `now`.
    ///
    /// Each elapsed week of inactivity is charged once; verification decay
    /// is charged at most once per week. Both are checkpointed on the peer.
    pub async fn decay_inactive_peers_at(&self, now: u64) -> Result<DecayReport> {
        let mut report = DecayReport::default();

        for listed in self.store.list_peers().await? {
            if listed.is_revoked() {
                continue;
            }
            report.examined += 1;
            match self.decay_peer(&listed.id, now).await {
                Ok((inactivity, verification)) => {
                    report.inactivity += usize::from(inactivity);
                    report.verification += usize::from(verification);
                }
                Err(e) => {
                    warn!(peer = %listed.id, error = %e, "decay failed");
                    report.errors += 1;
                }
            }
        }

        Ok(report)
    }

    async fn decay_peer(&self, id: &PeerId, now: u64) -> Result<(bool, bool)> {
        let lock = self.lock_for(id);
        let _guard = lock.lock().await;

        let mut peer = self.load(id).await?;
        if peer.is_revoked() {
            return Ok((false, false));
        }

        let mut inactivity = false;
        let last_activity = peer.last_success_at.unwrap_or(peer.registered_at);
        if let Some((weeks, checkpoint)) =
            inactivity_decay(last_activity, peer.inactivity_checkpoint, now)
        {
            let before = peer.trust_score;
            peer.trust_score = apply_delta(before, -INACTIVITY_DECAY_PER_WEEK * weeks as f64);
            peer.status = peer.status.after_score_change(peer.tier());
            peer.inactivity_checkpoint = Some(checkpoint);
            let applied = rounded_delta(before, peer.trust_score);
            self.persist_event(
                &peer,
                TrustEventKind::InactivityDecay,
                applied,
                now,
                Some(format!("{weeks} week(s) without successful sync")),
            )
            .await?;
            inactivity = true;
        }

        let mut verification = false;
        let last_verified = peer.last_verified_at.unwrap_or(peer.registered_at);
        if verification_decay_due(last_verified, peer.verification_checkpoint, now) {
            let before = peer.trust_score;
            peer.trust_score = clamp_score(before * VERIFICATION_DECAY_FACTOR);
            peer.status = peer.status.after_score_change(peer.tier());
            peer.verification_checkpoint = Some(now);
            let applied = rounded_delta(before, peer.trust_score);
            self.persist_event(
                &peer,
                TrustEventKind::VerificationDecay,
                applied,
                now,
                Some("no verified handshake for a week".into()),
            )
            .await?;
            verification = true;
        }

        if inactivity || verification {
            debug!(peer = %id, score = peer.trust_score, inactivity, verification, "decay applied");
        }
        Ok((inactivity, verification))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqlitePeerStore;
    use fed_core::WEEK_SECS;

    async fn manager() -> Arc<TrustManager> {
        let store = Arc::new(SqlitePeerStore::in_memory().await.unwrap());
        Arc::new(TrustManager::new(store, TrustConfig::default()))
    }

    async fn manager_with(config: TrustConfig) -> TrustManager {
        let store = Arc::new(SqlitePeerStore::in_memory().await.unwrap());
        TrustManager::new(store, config)
    }

    fn registration(key: u8) -> PeerRegistration {
        PeerRegistration::new("peer", "https://peer.example/", [key; 32])
    }

    #[tokio::test]
    async fn registration_starts_pending_at_initial_score() {
        let m = manager().await;
        let peer = m.register_peer(registration(1)).await.unwrap();
        assert_eq!(peer.trust_score, 0.3);
        assert_eq!(peer.status, PeerStatus::Pending);
        assert_eq!(peer.tier(), TrustTier::Limited);
        assert_eq!(m.get_peer(&peer.id).await.unwrap(), peer);
    }

    #[tokio::test]
    async fn duplicate_key_rejected_until_revoked() {
        let m = manager().await;
        let first = m.register_peer(registration(1)).await.unwrap();
        assert!(matches!(
            m.register_peer(registration(1)).await,
            Err(TrustError::DuplicatePeer(_))
        ));

        m.revoke(&first.id, "key rotated").await.unwrap();
        let second = m.register_peer(registration(1)).await.unwrap();
        let found = m.find_by_public_key(&[1; 32]).await.unwrap().unwrap();
        assert_eq!(found.id, second.id);
    }

    #[tokio::test]
    async fn registration_input_validated() {
        let m = manager().await;
        let mut bad_url = registration(1);
        bad_url.base_url = "ftp://peer.example/".into();
        assert!(matches!(
            m.register_peer(bad_url).await,
            Err(TrustError::InvalidInput(_))
        ));

        let mut bad_trust = registration(2);
        bad_trust.push_min_trust = 1.5;
        assert!(matches!(
            m.register_peer(bad_trust).await,
            Err(TrustError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn success_and_failure_scenario() {
        let m = manager().await;
        let peer = m.register_peer(registration(1)).await.unwrap();
        m.record_handshake_verified(&peer.id).await.unwrap();

        for _ in 0..10 {
            m.record_event(&peer.id, TrustEventKind::SyncSuccess, None)
                .await
                .unwrap();
        }
        let p = m.get_peer(&peer.id).await.unwrap();
        assert_eq!(p.trust_score, 0.5);
        assert_eq!(p.tier(), TrustTier::Standard);
        assert_eq!(p.status, PeerStatus::Active);

        for _ in 0..5 {
            m.record_event(&peer.id, TrustEventKind::SyncFailure, None)
                .await
                .unwrap();
        }
        let p = m.get_peer(&peer.id).await.unwrap();
        assert_eq!(p.trust_score, 0.25);
        assert_eq!(p.tier(), TrustTier::Limited);
        assert_eq!(p.status, PeerStatus::Degraded);
    }

    #[tokio::test]
    async fn score_is_clamped() {
        let m = manager().await;
        let peer = m.register_peer(registration(1)).await.unwrap();
        for _ in 0..10 {
            m.record_event(&peer.id, TrustEventKind::ManualReject, None)
                .await
                .unwrap();
        }
        let p = m.get_peer(&peer.id).await.unwrap();
        assert_eq!(p.trust_score, 0.0);
        // Quarantine suspends even a pending peer.
        assert_eq!(p.status, PeerStatus::Suspended);

        m.manual_adjustment(&peer.id, 1.0, "vouched").await.unwrap();
        m.manual_adjustment(&peer.id, 1.0, "vouched").await.unwrap();
        assert_eq!(m.get_peer(&peer.id).await.unwrap().trust_score, 1.0);
    }

    #[tokio::test]
    async fn unsupported_and_invalid_inputs() {
        let m = manager().await;
        let peer = m.register_peer(registration(1)).await.unwrap();
        assert!(matches!(
            m.record_event(&peer.id, TrustEventKind::InactivityDecay, None).await,
            Err(TrustError::UnsupportedEvent(_))
        ));
        assert!(matches!(
            m.manual_adjustment(&peer.id, f64::NAN, "x").await,
            Err(TrustError::InvalidInput(_))
        ));
        assert!(matches!(
            m.manual_adjustment(&peer.id, 2.0, "x").await,
            Err(TrustError::InvalidInput(_))
        ));
        assert!(matches!(
            m.record_event(&PeerId::new(), TrustEventKind::SyncSuccess, None).await,
            Err(TrustError::PeerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_events_on_one_peer_are_serialized() {
        let m = manager().await;
        let peer = m.register_peer(registration(1)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let m = m.clone();
            let id = peer.id;
            handles.push(tokio::spawn(async move {
                m.record_event(&id, TrustEventKind::SyncSuccess, None)
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let p = m.get_peer(&peer.id).await.unwrap();
        assert_eq!(p.trust_score, 0.7);
        assert_eq!(m.history(&peer.id, 100).await.unwrap().len(), 20);
    }

    #[tokio::test]
    async fn history_bounded_by_config() {
        let m = manager_with(TrustConfig {
            max_history: 3,
            ..TrustConfig::default()
        })
        .await;
        let peer = m.register_peer(registration(1)).await.unwrap();
        for _ in 0..6 {
            m.record_event(&peer.id, TrustEventKind::Conflict, None)
                .await
                .unwrap();
        }
        let history = m.history(&peer.id, 10).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|e| e.kind == TrustEventKind::Conflict));
        assert_eq!(history[0].score_after, 0.24);
    }

    #[tokio::test]
    async fn revoked_is_terminal() {
        let m = manager().await;
        let peer = m.register_peer(registration(1)).await.unwrap();
        let revoked = m.revoke(&peer.id, "compromised").await.unwrap();
        assert_eq!(revoked.trust_score, 0.0);
        assert_eq!(revoked.status, PeerStatus::Revoked);

        assert!(matches!(
            m.record_event(&peer.id, TrustEventKind::SyncSuccess, None).await,
            Err(TrustError::Revoked(_))
        ));
        assert!(matches!(
            m.manual_adjustment(&peer.id, 0.5, "undo").await,
            Err(TrustError::Revoked(_))
        ));
        assert!(matches!(
            m.record_handshake_verified(&peer.id).await,
            Err(TrustError::Revoked(_))
        ));
        // Second revoke is a no-op.
        m.revoke(&peer.id, "again").await.unwrap();
        assert_eq!(m.history(&peer.id, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_cannot_touch_score_or_status() {
        let m = manager().await;
        let peer = m.register_peer(registration(1)).await.unwrap();
        let updated = m
            .update(&peer.id, |p| {
                p.trust_score = 1.0;
                p.status = PeerStatus::Active;
                p.pull_cursor = Cursor::new(9);
                p.syncs_attempted += 1;
            })
            .await
            .unwrap();
        assert_eq!(updated.trust_score, 0.3);
        assert_eq!(updated.status, PeerStatus::Pending);
        assert_eq!(updated.pull_cursor, Cursor::new(9));
        assert_eq!(updated.syncs_attempted, 1);
    }

    #[tokio::test]
    async fn handshake_promotes_offline_peer() {
        let m = manager().await;
        let peer = m.register_peer(registration(1)).await.unwrap();
        m.mark_offline(&peer.id).await.unwrap();
        assert_eq!(m.get_peer(&peer.id).await.unwrap().status, PeerStatus::Offline);

        let p = m.record_handshake_verified(&peer.id).await.unwrap();
        assert_eq!(p.status, PeerStatus::Degraded);
        assert!(p.last_verified_at.is_some());
    }

    #[tokio::test]
    async fn decay_is_checkpointed() {
        let m = manager().await;
        let peer = m.register_peer(registration(1)).await.unwrap();
        m.manual_adjustment(&peer.id, 0.3, "seed").await.unwrap();
        let start = peer.registered_at;

        // Under a week: nothing.
        let report = m.decay_inactive_peers_at(start + WEEK_SECS - 1).await.unwrap();
        assert_eq!(report.inactivity, 0);
        assert_eq!(report.verification, 0);

        // Two weeks: -0.02, then x0.9.
        let now = start + 2 * WEEK_SECS + 10;
        let report = m.decay_inactive_peers_at(now).await.unwrap();
        assert_eq!(report.examined, 1);
        assert_eq!(report.inactivity, 1);
        assert_eq!(report.verification, 1);
        assert_eq!(m.get_peer(&peer.id).await.unwrap().trust_score, 0.522);

        // Same instant again: no double charge.
        let report = m.decay_inactive_peers_at(now).await.unwrap();
        assert_eq!(report.inactivity + report.verification, 0);
        assert_eq!(m.get_peer(&peer.id).await.unwrap().trust_score, 0.522);
    }

    #[tokio::test]
    async fn decay_skips_revoked_peers() {
        let m = manager().await;
        let peer = m.register_peer(registration(1)).await.unwrap();
        m.revoke(&peer.id, "gone").await.unwrap();
        let report = m
            .decay_inactive_peers_at(peer.registered_at + 10 * WEEK_SECS)
            .await
            .unwrap();
        assert_eq!(report.examined, 0);
    }
}

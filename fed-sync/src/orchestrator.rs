//! Sync orchestrator: drives one run against one peer.
//!
//! A run is admitted against the peer's status, tier and rate limit, then
//! moves through the phases of [`SyncRun`]:
//!
//! - **Fetching**: handshake, then pull pages (each checked for signature,
//!   nonce, freshness and content hash) and select local content to push.
//! - **Processing**: plan every received item; package and sign outgoing pages.
//! - **Applying**: apply pages in order, committing the pull cursor after
//!   each; send outgoing pages, committing the push cursor after each ack.
//! - **Finalizing**: counters and the trust outcome.
//!
//! Cursors are persisted as they are committed, so a run cut short by its
//! timeout leaves exactly the applied pages behind it.

use crate::apply::{Applicator, PagePlan};
use crate::config::Config;
use crate::error::{ErrorClass, Result, SyncError};
use crate::governance::Governance;
use crate::graph::GraphRepository;
use crate::limits::{RateLimitError, TierRateLimits};
use crate::outbound::{collect_page, OutboundPage};
use crate::transport::{Transport, TransportError};
use dashmap::DashMap;
use fed_core::{RunCounts, SyncPhase, SyncRun, TrustEventKind, TrustTier};
use fed_security::{decode_public_key, SecurityError, SecurityLayer, ValidatedTarget};
use fed_trust::{Peer, TrustManager};
use fed_types::{
    time::now_secs, Cursor, Frame, Handshake, Message, PeerId, SyncDirection, SyncPayload,
    SyncRequest,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Timeouts and limits for sync runs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Handshake round trip.
    pub handshake_timeout: Duration,
    /// Any other round trip.
    pub request_timeout: Duration,
    /// Whole run.
    pub run_timeout: Duration,
    /// Pages pulled per run.
    pub max_iterations: u32,
    /// Items per page.
    pub page_size: u32,
    /// Standard-tier interval between runs; zero disables rate limiting.
    pub min_sync_interval: Duration,
}

impl OrchestratorConfig {
    /// Derive run settings from the node configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            handshake_timeout: config.timeouts.handshake(),
            request_timeout: config.timeouts.request(),
            run_timeout: config.timeouts.run(),
            max_iterations: config.sync.max_iterations,
            page_size: config.sync.page_size.max(1),
            min_sync_interval: Duration::from_secs(config.sync.min_sync_interval_secs),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    /// Peer synced.
    pub peer: PeerId,
    /// Direction actually run.
    pub direction: SyncDirection,
    /// Pages pulled.
    pub pages: u32,
    /// Item counters.
    pub counts: RunCounts,
    /// Pull cursor after the run.
    pub pull_cursor: Cursor,
    /// Push cursor after the run.
    pub push_cursor: Cursor,
}

/// Drives sync runs against registered peers.
pub struct SyncOrchestrator {
    security: Arc<SecurityLayer>,
    trust: Arc<TrustManager>,
    transport: Arc<dyn Transport>,
    graph: Arc<dyn GraphRepository>,
    applicator: Applicator,
    limits: TierRateLimits,
    config: OrchestratorConfig,
    running: DashMap<PeerId, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("instance", &self.security.instance_id())
            .field("config", &self.config)
            .field("running", &self.running.len())
            .finish()
    }
}

impl SyncOrchestrator {
    /// Create an orchestrator.
    pub fn new(
        security: Arc<SecurityLayer>,
        trust: Arc<TrustManager>,
        transport: Arc<dyn Transport>,
        graph: Arc<dyn GraphRepository>,
        governance: Arc<dyn Governance>,
        config: OrchestratorConfig,
    ) -> Self {
        let applicator = Applicator::new(graph.clone(), governance, trust.clone());
        Self {
            limits: TierRateLimits::new(config.min_sync_interval),
            security,
            trust,
            transport,
            graph,
            applicator,
            config,
            running: DashMap::new(),
        }
    }

    /// Trust manager this orchestrator reports to.
    pub fn trust(&self) -> &Arc<TrustManager> {
        &self.trust
    }

    /// Run settings.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Evict idle rate-limiter entries.
    pub fn shrink_limits(&self) {
        self.limits.shrink();
    }

    /// Run one sync against `id`.
    ///
    /// `direction` defaults to the peer's configured direction and may only
    /// narrow it. Refusals at admission cost the peer nothing; any failure
    /// after that is recorded against its trust.
    pub async fn sync_peer(
        &self,
        id: &PeerId,
        direction: Option<SyncDirection>,
    ) -> Result<SyncReport> {
        let lock = self
            .running
            .entry(*id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.try_lock().map_err(|_| SyncError::NotAdmitted {
            peer: *id,
            reason: "run already in progress".into(),
        })?;

        let peer = self.trust.get_peer(id).await?;
        let tier = peer.tier();
        let direction = admit(&peer, direction)?;
        self.limits.check(id, tier).map_err(|e| match e {
            RateLimitError::TooSoon => SyncError::RateLimited(*id),
            RateLimitError::NotAdmitted => SyncError::NotAdmitted {
                peer: *id,
                reason: e.to_string(),
            },
        })?;

        let peer = self
            .trust
            .update(id, |p| p.syncs_attempted += 1)
            .await?;
        let mut run = SyncRun::new(
            peer.direction,
            peer.pull_cursor,
            peer.push_cursor,
            self.config.max_iterations,
        );
        run.restrict_direction(direction)?;

        info!(peer = %id, direction = direction.as_str(), tier = tier.as_str(), "sync run started");

        let outcome = match tokio::time::timeout(self.config.run_timeout, self.drive(&peer, &mut run))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(SyncError::Timeout(self.config.run_timeout.as_secs())),
        };

        match outcome {
            Ok(()) => self.finish(&peer, run).await,
            Err(e) => {
                self.record_failure(&peer, &mut run, &e).await;
                Err(e)
            }
        }
    }

    async fn drive(&self, peer: &Peer, run: &mut SyncRun) -> Result<()> {
        let target = self.security.validate_destination(&peer.base_url).await?;
        self.handshake(peer, &target).await?;

        run.advance(SyncPhase::Fetching)?;
        let pulled = if run.direction().pulls() {
            self.fetch_pages(peer, &target, run).await?
        } else {
            Vec::new()
        };
        let selected = if run.direction().pushes() {
            self.select_outgoing(peer, run.push_cursor()).await?
        } else {
            Vec::new()
        };

        run.advance(SyncPhase::Processing)?;
        let mut plans: Vec<PagePlan> = Vec::with_capacity(pulled.len());
        for page in &pulled {
            let plan = self
                .applicator
                .plan_page(peer, page, peer.checkpoint_ms())
                .await;
            plans.push(plan);
        }
        let mut outgoing = Vec::with_capacity(selected.len());
        for page in selected {
            outgoing.push(self.package(page)?);
        }

        run.advance(SyncPhase::Applying)?;
        for plan in plans {
            let cursor = plan.cursor;
            let tally = self.applicator.apply_plan(peer, plan, run.counts_mut()).await?;
            run.commit_pull_cursor(cursor)?;
            let committed = run.resume_cursor();
            self.trust
                .update(&peer.id, move |p| p.pull_cursor = p.pull_cursor.max(committed))
                .await?;
            debug!(peer = %peer.id, %cursor, accepted = tally.accepted, rejected = tally.rejected, "page applied");
        }
        for payload in outgoing {
            let cursor = payload.cursor;
            if !payload.is_empty() {
                let accepted = self.push_page(peer, &target, payload).await?;
                run.counts_mut().sent += accepted;
            }
            run.commit_push_cursor(cursor)?;
            let committed = run.push_cursor();
            self.trust
                .update(&peer.id, move |p| p.push_cursor = p.push_cursor.max(committed))
                .await?;
        }

        run.advance(SyncPhase::Finalizing)?;
        if run.is_truncated() {
            return Err(SyncError::IterationCap(run.max_pages()));
        }
        Ok(())
    }

    async fn handshake(&self, peer: &Peer, target: &ValidatedTarget) -> Result<()> {
        let mut hello = Handshake::new(&self.security.identity().public_key());
        self.security.prepare(&mut hello)?;

        let reply = self
            .exchange(peer, target, Message::Handshake(hello), self.config.handshake_timeout)
            .await?;
        let theirs = match reply {
            Message::Handshake(h) => h,
            other => {
                return Err(SyncError::Protocol(format!(
                    "expected handshake, got {}",
                    other.kind()
                )))
            }
        };

        let key = decode_public_key(&theirs.public_key)?;
        if key != peer.public_key || theirs.instance_id != peer.instance_id() {
            return Err(SecurityError::IdentityMismatch(format!(
                "peer {} answered as {}",
                peer.id, theirs.instance_id
            ))
            .into());
        }
        self.security.accept(peer.id, &theirs, &peer.public_key)?;
        self.trust.record_handshake_verified(&peer.id).await?;
        Ok(())
    }

    async fn fetch_pages(
        &self,
        peer: &Peer,
        target: &ValidatedTarget,
        run: &mut SyncRun,
    ) -> Result<Vec<SyncPayload>> {
        let mut pages = Vec::new();
        let mut since = run.resume_cursor();

        loop {
            let page_no = run.begin_page()?;
            let page = self.fetch_page(peer, target, since).await?;
            debug!(peer = %peer.id, page = page_no, items = page.len(), cursor = %page.cursor, "page received");

            since = page.cursor;
            let more = page.has_more;
            pages.push(page);

            if !more {
                break;
            }
            if !run.has_page_budget() {
                let cap = run.mark_truncated();
                warn!(peer = %peer.id, pages = run.pages(), error = %cap, "peer still reports more pages");
                break;
            }
        }
        Ok(pages)
    }

    async fn fetch_page(
        &self,
        peer: &Peer,
        target: &ValidatedTarget,
        since: Cursor,
    ) -> Result<SyncPayload> {
        let mut request = SyncRequest::new(
            self.security.instance_id(),
            SyncDirection::Pull,
            since,
            self.config.page_size,
        );
        self.security.prepare(&mut request)?;

        let reply = self
            .exchange(peer, target, Message::SyncRequest(request), self.config.request_timeout)
            .await?;
        let payload = match reply {
            Message::SyncPayload(p) => p,
            other => {
                return Err(SyncError::Protocol(format!(
                    "expected sync_payload, got {}",
                    other.kind()
                )))
            }
        };

        if payload.instance_id != peer.instance_id() {
            return Err(SecurityError::IdentityMismatch(format!(
                "payload from {} on a run with {}",
                payload.instance_id, peer.id
            ))
            .into());
        }
        self.security.accept(peer.id, &payload, &peer.public_key)?;

        let computed = payload.computed_hash()?;
        if computed != payload.content_hash {
            return Err(SyncError::HashMismatch {
                declared: payload.content_hash.clone(),
                computed,
            });
        }
        if payload.cursor < since {
            return Err(SyncError::Protocol(format!(
                "cursor moved backwards: {} -> {}",
                since, payload.cursor
            )));
        }
        if payload.len() > self.config.page_size as usize {
            return Err(SyncError::Protocol(format!(
                "page of {} records exceeds limit {}",
                payload.len(),
                self.config.page_size
            )));
        }
        Ok(payload)
    }

    async fn select_outgoing(&self, peer: &Peer, from: Cursor) -> Result<Vec<OutboundPage>> {
        let mut pages = Vec::new();
        let mut since = from;
        // Same page budget as pulling; the rest goes out next run.
        for _ in 0..self.config.max_iterations.max(1) {
            let page = collect_page(self.graph.as_ref(), peer, since, self.config.page_size).await?;
            if page.cursor == since {
                break;
            }
            since = page.cursor;
            let more = page.has_more;
            pages.push(page);
            if !more {
                break;
            }
        }
        Ok(pages)
    }

    fn package(&self, page: OutboundPage) -> Result<SyncPayload> {
        let mut payload = SyncPayload::new(
            self.security.instance_id(),
            page.nodes,
            page.edges,
            page.deletions,
            page.cursor,
            page.has_more,
        )?;
        if !payload.is_empty() {
            self.security.prepare(&mut payload)?;
        }
        Ok(payload)
    }

    async fn push_page(
        &self,
        peer: &Peer,
        target: &ValidatedTarget,
        payload: SyncPayload,
    ) -> Result<u32> {
        let cursor = payload.cursor;
        let sent = payload.len();
        let reply = self
            .exchange(peer, target, Message::SyncPayload(payload), self.config.request_timeout)
            .await?;
        let ack = match reply {
            Message::SyncAck(ack) => ack,
            other => {
                return Err(SyncError::Protocol(format!(
                    "expected sync_ack, got {}",
                    other.kind()
                )))
            }
        };

        if ack.instance_id != peer.instance_id() {
            return Err(SecurityError::IdentityMismatch(format!(
                "ack from {} on a run with {}",
                ack.instance_id, peer.id
            ))
            .into());
        }
        self.security.accept(peer.id, &ack, &peer.public_key)?;
        if ack.cursor != cursor {
            return Err(SyncError::Protocol(format!(
                "ack for cursor {} but sent {}",
                ack.cursor, cursor
            )));
        }

        debug!(peer = %peer.id, %cursor, sent, accepted = ack.accepted, rejected = ack.rejected, "page acknowledged");
        Ok(ack.accepted)
    }

    /// One framed round trip with certificate pinning.
    async fn exchange(
        &self,
        peer: &Peer,
        target: &ValidatedTarget,
        message: Message,
        limit: Duration,
    ) -> Result<Message> {
        let kind = message.kind();
        let body = Frame::encode(&message)?;
        let exchange = tokio::time::timeout(limit, self.transport.exchange(target, body))
            .await
            .map_err(|_| TransportError::Timeout)??;

        if let Some(certificate) = &exchange.certificate {
            self.security
                .establish_trust_on_first_use(peer.id, certificate)?;
        }

        match Frame::decode(&exchange.body)? {
            Message::Reject(reject) => {
                debug!(peer = %peer.id, request = kind, reason = %reject.reason, "request rejected");
                Err(SyncError::Rejected(reject.reason))
            }
            reply => Ok(reply),
        }
    }

    async fn finish(&self, peer: &Peer, mut run: SyncRun) -> Result<SyncReport> {
        let counts = *run.counts();
        let now = now_secs();
        let updated = self
            .trust
            .update(&peer.id, move |p| {
                p.last_sync_at = Some(now);
                p.syncs_succeeded += 1;
                p.items_received += u64::from(counts.received());
                p.items_sent += u64::from(counts.sent);
            })
            .await?;

        let summary = format!(
            "created {} updated {} skipped {} conflicted {} sent {}",
            counts.created, counts.updated, counts.skipped, counts.conflicted, counts.sent
        );
        self.trust
            .record_event(&peer.id, TrustEventKind::SyncSuccess, Some(summary))
            .await?;
        if counts.conflicted > 0 {
            self.trust
                .record_event(
                    &peer.id,
                    TrustEventKind::Conflict,
                    Some(format!("{} conflicts", counts.conflicted)),
                )
                .await?;
        }
        run.advance(SyncPhase::Done)?;

        info!(
            peer = %peer.id,
            pages = run.pages(),
            created = counts.created,
            updated = counts.updated,
            skipped = counts.skipped,
            conflicted = counts.conflicted,
            pending_review = counts.pending_review,
            sent = counts.sent,
            "sync run complete"
        );
        Ok(SyncReport {
            peer: peer.id,
            direction: run.direction(),
            pages: run.pages(),
            counts,
            pull_cursor: updated.pull_cursor,
            push_cursor: updated.push_cursor,
        })
    }

    async fn record_failure(&self, peer: &Peer, run: &mut SyncRun, error: &SyncError) {
        let phase = run.phase();
        let class = error.class();
        run.fail(error.to_string());
        warn!(
            peer = %peer.id,
            phase = %phase,
            class = class.as_str(),
            pages = run.pages(),
            error = %error,
            "sync run failed"
        );

        let now = now_secs();
        if let Err(e) = self
            .trust
            .update(&peer.id, move |p| p.last_sync_at = Some(now))
            .await
        {
            warn!(peer = %peer.id, error = %e, "failed to record run end");
        }
        if let Some(kind) = class.trust_event() {
            if let Err(e) = self
                .trust
                .record_event(&peer.id, kind, Some(error.to_string()))
                .await
            {
                warn!(peer = %peer.id, error = %e, "failed to record trust event");
            }
        }
        if class == ErrorClass::Transport && matches!(error, SyncError::Transport(_)) {
            if let Err(e) = self.trust.mark_offline(&peer.id).await {
                warn!(peer = %peer.id, error = %e, "failed to mark peer offline");
            }
        }
    }
}

/// Decide the direction a run may take, or refuse it.
fn admit(peer: &Peer, requested: Option<SyncDirection>) -> Result<SyncDirection> {
    let refuse = |reason: &str| SyncError::NotAdmitted {
        peer: peer.id,
        reason: reason.to_string(),
    };

    if peer.is_revoked() {
        return Err(refuse("peer is revoked"));
    }
    let tier = peer.tier();
    if tier == TrustTier::Quarantine {
        return Err(refuse("peer is quarantined"));
    }

    let requested = requested.unwrap_or(peer.direction);
    if (requested.pulls() && !peer.direction.pulls())
        || (requested.pushes() && !peer.direction.pushes())
    {
        return Err(refuse("direction not configured for this peer"));
    }

    if tier.allows_push() {
        return Ok(requested);
    }
    match requested {
        SyncDirection::Push => Err(refuse("limited tier is pull-only")),
        _ => Ok(SyncDirection::Pull),
    }
}

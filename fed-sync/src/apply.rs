//! Applying received pages to the local graph.
//!
//! Planning and writing are separate steps. [`Applicator::plan_page`]
//! reads local state and decides, per item, what to do; it never writes.
//! [`Applicator::apply_plan`] carries the plan out. Anything written from
//! a received page, merges included, is stamped as federated content at
//! the baseline unverified trust level, whatever the sender claims about
//! it. Remote deletions are never applied; they go to governance.
//!
//! The conflict checkpoint is supplied by the caller: pulled pages use the
//! last successful run against the peer, pushed pages the last pushed page
//! we acknowledged.

use crate::error::Result;
use crate::governance::{ConflictReport, Governance};
use crate::graph::{GraphItem, GraphRepository};
use fed_core::{
    plan, ConflictContext, ConflictStrategy, Outcome, Resolution, RunCounts, Versioned,
    UNVERIFIED_ITEM_TRUST,
};
use fed_trust::{Peer, TrustManager};
use fed_types::{
    time::now_millis, Cursor, EdgeRecord, ItemId, ItemKind, NodeRecord, Origin, PeerId,
    SyncPayload, Tombstone,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Remote timestamps further ahead of the local clock are not believed.
const MAX_FUTURE_SKEW_MS: u64 = 5 * 60 * 1000;

/// How a write came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    /// Item was new locally.
    Create,
    /// Remote was newer and local untouched since the checkpoint.
    Update,
    /// Conflict settled in favour of the remote or a merge.
    Resolved(ConflictStrategy),
}

/// Planned action for one received item.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Write the item.
    Write {
        /// Item to write.
        item: GraphItem,
        /// Why.
        kind: WriteKind,
    },
    /// Conflict settled by keeping the local version.
    KeepLocal {
        /// Item id.
        item_id: ItemId,
        /// Strategy that decided.
        decided_by: ConflictStrategy,
    },
    /// Conflict handed to governance.
    Review(ConflictReport),
    /// Remote deletion, queued for review.
    Deletion(Tombstone),
    /// Nothing applied.
    Skip {
        /// Item id.
        item_id: ItemId,
        /// Why.
        reason: String,
    },
}

/// Plan for one received page.
#[derive(Debug, Clone, PartialEq)]
pub struct PagePlan {
    /// Cursor to commit once the page is applied.
    pub cursor: Cursor,
    /// One action per received item, in payload order.
    pub actions: Vec<Action>,
}

/// Items accepted and rejected while applying one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageTally {
    /// Items written, kept, or queued for review.
    pub accepted: u32,
    /// Items skipped.
    pub rejected: u32,
}

/// Plans and applies received content.
#[derive(Clone)]
pub struct Applicator {
    graph: Arc<dyn GraphRepository>,
    governance: Arc<dyn Governance>,
    trust: Arc<TrustManager>,
}

impl std::fmt::Debug for Applicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Applicator").finish_non_exhaustive()
    }
}

trait Received: Versioned {
    fn item_id(&self) -> &ItemId;
    fn origin(&self) -> Origin;
    fn federate(&mut self, peer: PeerId);
    fn validate(&self) -> std::result::Result<(), String>;
    fn wrap(self) -> GraphItem;
    fn kind() -> ItemKind;
}

impl Received for NodeRecord {
    fn item_id(&self) -> &ItemId {
        &self.id
    }

    fn origin(&self) -> Origin {
        self.origin
    }

    fn federate(&mut self, peer: PeerId) {
        self.origin = Origin::Federated { peer };
        self.trust_level = UNVERIFIED_ITEM_TRUST;
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.id.as_str().is_empty() {
            return Err("empty id".into());
        }
        if self.node_type.is_empty() {
            return Err("empty node type".into());
        }
        Ok(())
    }

    fn wrap(self) -> GraphItem {
        GraphItem::Node(self)
    }

    fn kind() -> ItemKind {
        ItemKind::Node
    }
}

impl Received for EdgeRecord {
    fn item_id(&self) -> &ItemId {
        &self.id
    }

    fn origin(&self) -> Origin {
        self.origin
    }

    fn federate(&mut self, peer: PeerId) {
        self.origin = Origin::Federated { peer };
        self.trust_level = UNVERIFIED_ITEM_TRUST;
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.id.as_str().is_empty() {
            return Err("empty id".into());
        }
        if self.source.as_str().is_empty() || self.target.as_str().is_empty() {
            return Err("missing endpoint".into());
        }
        if !self.weight.is_finite() {
            return Err("non-finite weight".into());
        }
        Ok(())
    }

    fn wrap(self) -> GraphItem {
        GraphItem::Edge(self)
    }

    fn kind() -> ItemKind {
        ItemKind::Edge
    }
}

impl Applicator {
    /// Create an applicator over the local graph.
    pub fn new(
        graph: Arc<dyn GraphRepository>,
        governance: Arc<dyn Governance>,
        trust: Arc<TrustManager>,
    ) -> Self {
        Self {
            graph,
            governance,
            trust,
        }
    }

    /// Decide what to do with every item in a verified page.
    ///
    /// Local and remote versions both modified after `checkpoint_ms`
    /// are in conflict.
    pub async fn plan_page(
        &self,
        peer: &Peer,
        payload: &SyncPayload,
        checkpoint_ms: u64,
    ) -> PagePlan {
        let mut actions = Vec::with_capacity(payload.len());
        let mut trust_cache = HashMap::new();
        let horizon = now_millis().saturating_add(MAX_FUTURE_SKEW_MS);

        for node in &payload.items {
            let local = match self.graph.get_node(&node.id).await {
                Ok(local) => local,
                Err(e) => {
                    actions.push(skip(&node.id, format!("lookup failed: {e}")));
                    continue;
                }
            };
            actions.push(
                self.plan_item(
                    peer,
                    local,
                    node.clone(),
                    checkpoint_ms,
                    horizon,
                    &mut trust_cache,
                )
                .await,
            );
        }

        for edge in &payload.edges {
            let local = match self.graph.get_edge(&edge.id).await {
                Ok(local) => local,
                Err(e) => {
                    actions.push(skip(&edge.id, format!("lookup failed: {e}")));
                    continue;
                }
            };
            actions.push(
                self.plan_item(
                    peer,
                    local,
                    edge.clone(),
                    checkpoint_ms,
                    horizon,
                    &mut trust_cache,
                )
                .await,
            );
        }

        for deletion in &payload.deletions {
            actions.push(Action::Deletion(deletion.clone()));
        }

        PagePlan {
            cursor: payload.cursor,
            actions,
        }
    }

    async fn plan_item<T: Received>(
        &self,
        peer: &Peer,
        local: Option<T>,
        mut remote: T,
        checkpoint_ms: u64,
        horizon: u64,
        trust_cache: &mut HashMap<PeerId, f64>,
    ) -> Action {
        if let Err(reason) = remote.validate() {
            return skip(remote.item_id(), reason);
        }
        if remote.modified_at() > horizon {
            return skip(remote.item_id(), "timestamp in the future".to_string());
        }
        remote.federate(peer.id);

        let local_source_trust = match (&local, peer.conflict_strategy) {
            (Some(local), ConflictStrategy::HigherTrust) => {
                self.source_trust(local.origin(), trust_cache).await
            }
            _ => 1.0,
        };
        let ctx = ConflictContext {
            checkpoint_ms,
            strategy: peer.conflict_strategy,
            local_source_trust,
            remote_source_trust: peer.trust_score,
        };

        match plan(local.as_ref(), &remote, &ctx) {
            Resolution::Create(item) => Action::Write {
                item: item.wrap(),
                kind: WriteKind::Create,
            },
            Resolution::Update(item) => Action::Write {
                item: item.wrap(),
                kind: WriteKind::Update,
            },
            Resolution::Skip => skip(remote.item_id(), "unchanged or stale".to_string()),
            Resolution::Conflict {
                decided_by,
                outcome,
            } => match outcome {
                Outcome::KeepLocal => Action::KeepLocal {
                    item_id: remote.item_id().clone(),
                    decided_by,
                },
                Outcome::TakeRemote(item) => Action::Write {
                    item: item.wrap(),
                    kind: WriteKind::Resolved(decided_by),
                },
                // A merge starts from the local record; it now carries
                // remote content and must not pass as ours.
                Outcome::Merged(mut item) => {
                    item.federate(peer.id);
                    Action::Write {
                        item: item.wrap(),
                        kind: WriteKind::Resolved(decided_by),
                    }
                }
                Outcome::ManualReview => match local {
                    Some(local) => Action::Review(ConflictReport {
                        peer: peer.id,
                        item_id: remote.item_id().clone(),
                        kind: T::kind(),
                        strategy: peer.conflict_strategy,
                        local: local.wrap(),
                        remote: remote.wrap(),
                    }),
                    None => skip(remote.item_id(), "conflict without local version".to_string()),
                },
            },
        }
    }

    async fn source_trust(&self, origin: Origin, cache: &mut HashMap<PeerId, f64>) -> f64 {
        match origin {
            Origin::Local => 1.0,
            Origin::Federated { peer } => {
                if let Some(score) = cache.get(&peer) {
                    return *score;
                }
                // Unknown or deleted sources count for nothing.
                let score = self
                    .trust
                    .get_peer(&peer)
                    .await
                    .map(|p| p.trust_score)
                    .unwrap_or(0.0);
                cache.insert(peer, score);
                score
            }
        }
    }

    /// Carry out a page plan.
    ///
    /// A failed graph write skips that item; a governance failure aborts,
    /// leaving the page uncommitted so it is fetched again next run.
    pub async fn apply_plan(
        &self,
        peer: &Peer,
        plan: PagePlan,
        counts: &mut RunCounts,
    ) -> Result<PageTally> {
        let review_all = peer.tier().requires_review();
        let mut tally = PageTally::default();

        for action in plan.actions {
            match action {
                Action::Write { item, kind } => {
                    let item_id = item.id().clone();
                    let written = match &item {
                        GraphItem::Node(node) => self.graph.upsert_node(node.clone()).await,
                        GraphItem::Edge(edge) => self.graph.upsert_edge(edge.clone()).await,
                        GraphItem::Deletion(_) => Ok(()),
                    };
                    if let Err(e) = written {
                        warn!(peer = %peer.id, item = %item_id, error = %e, "item write failed, skipping");
                        counts.skipped += 1;
                        tally.rejected += 1;
                        continue;
                    }
                    match kind {
                        WriteKind::Create => counts.created += 1,
                        WriteKind::Update => counts.updated += 1,
                        WriteKind::Resolved(strategy) => {
                            debug!(peer = %peer.id, item = %item_id, %strategy, "conflict resolved");
                            counts.updated += 1;
                            counts.conflicted += 1;
                        }
                    }
                    if review_all {
                        self.governance.review_accepted(peer.id, item).await?;
                        counts.pending_review += 1;
                    }
                    tally.accepted += 1;
                }
                Action::KeepLocal {
                    item_id,
                    decided_by,
                } => {
                    debug!(peer = %peer.id, item = %item_id, strategy = %decided_by, "conflict kept local");
                    counts.conflicted += 1;
                    tally.accepted += 1;
                }
                Action::Review(report) => {
                    debug!(peer = %peer.id, item = %report.item_id, "conflict queued for review");
                    self.governance.submit_conflict(report).await?;
                    counts.conflicted += 1;
                    counts.pending_review += 1;
                    tally.accepted += 1;
                }
                Action::Deletion(tombstone) => {
                    debug!(peer = %peer.id, item = %tombstone.item_id, "remote deletion queued for review");
                    self.governance.flag_deletion(peer.id, tombstone).await?;
                    counts.pending_review += 1;
                    tally.accepted += 1;
                }
                Action::Skip { item_id, reason } => {
                    debug!(peer = %peer.id, item = %item_id, %reason, "item skipped");
                    counts.skipped += 1;
                    tally.rejected += 1;
                }
            }
        }

        Ok(tally)
    }
}

fn skip(item_id: &ItemId, reason: String) -> Action {
    Action::Skip {
        item_id: item_id.clone(),
        reason,
    }
}

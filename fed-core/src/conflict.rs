//! Conflict detection and resolution for received items.
//!
//! A conflict exists only when both the local and the remote version were
//! modified after the last successful sync with the peer (the checkpoint).
//! Outside that case the outcome is mechanical: absent items are created,
//! strictly newer remote versions of untouched local items are applied, and
//! everything else is skipped.

use fed_types::{EdgeRecord, NodeRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Per-peer conflict strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Keep the local version.
    LocalWins,
    /// Take the remote version.
    RemoteWins,
    /// Higher locally computed source trust wins; ties go to timestamps.
    HigherTrust,
    /// Later modification wins; ties go to manual review.
    #[default]
    NewerTimestamp,
    /// Union what can be unioned; anything else goes to manual review.
    Merge,
    /// Apply neither; hand the pair to governance.
    ManualReview,
}

impl ConflictStrategy {
    /// Snake-case name, as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictStrategy::LocalWins => "local_wins",
            ConflictStrategy::RemoteWins => "remote_wins",
            ConflictStrategy::HigherTrust => "higher_trust",
            ConflictStrategy::NewerTimestamp => "newer_timestamp",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::ManualReview => "manual_review",
        }
    }

    /// Parse a stored name.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "local_wins" => ConflictStrategy::LocalWins,
            "remote_wins" => ConflictStrategy::RemoteWins,
            "higher_trust" => ConflictStrategy::HigherTrust,
            "newer_timestamp" => ConflictStrategy::NewerTimestamp,
            "merge" => ConflictStrategy::Merge,
            "manual_review" => ConflictStrategy::ManualReview,
            _ => return None,
        })
    }
}

impl fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to a resolution decision.
#[derive(Debug, Clone, Copy)]
pub struct ConflictContext {
    /// Last successful sync with the peer (unix ms). Zero if never synced.
    pub checkpoint_ms: u64,
    /// Strategy configured for the peer.
    pub strategy: ConflictStrategy,
    /// Local trust in whoever produced the local version.
    pub local_source_trust: f64,
    /// Local trust in the sending peer.
    pub remote_source_trust: f64,
}

/// A mergeable, timestamped graph item.
pub trait Versioned: Clone {
    /// Last modification time (unix ms).
    fn modified_at(&self) -> u64;

    /// Whether two versions carry the same content.
    fn same_content(&self, other: &Self) -> bool;

    /// Field-wise merge, or `None` when the versions cannot be reconciled.
    fn merge(&self, remote: &Self) -> Option<Self>;
}

/// How a conflict was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// Keep what we have.
    KeepLocal,
    /// Replace with the remote version.
    TakeRemote(T),
    /// Replace with a merged version.
    Merged(T),
    /// Neither applied; governance decides.
    ManualReview,
}

/// Planned action for one received item.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    /// Item is new locally.
    Create(T),
    /// Remote is strictly newer and local was not touched since the checkpoint.
    Update(T),
    /// Nothing to do (identical, stale, or only local changed).
    Skip,
    /// Both sides changed since the checkpoint.
    Conflict {
        /// Strategy that produced the outcome, after fallbacks.
        decided_by: ConflictStrategy,
        /// What to do.
        outcome: Outcome<T>,
    },
}

/// Decide what to do with `remote` given the local copy, if any.
pub fn plan<T: Versioned>(local: Option<&T>, remote: &T, ctx: &ConflictContext) -> Resolution<T> {
    let local = match local {
        None => return Resolution::Create(remote.clone()),
        Some(local) => local,
    };

    if local.same_content(remote) {
        return Resolution::Skip;
    }

    let local_changed = local.modified_at() > ctx.checkpoint_ms;
    let remote_changed = remote.modified_at() > ctx.checkpoint_ms;

    if local_changed && remote_changed {
        let (decided_by, outcome) = resolve(ctx.strategy, local, remote, ctx);
        return Resolution::Conflict {
            decided_by,
            outcome,
        };
    }

    if !local_changed && remote.modified_at() > local.modified_at() {
        Resolution::Update(remote.clone())
    } else {
        Resolution::Skip
    }
}

fn resolve<T: Versioned>(
    strategy: ConflictStrategy,
    local: &T,
    remote: &T,
    ctx: &ConflictContext,
) -> (ConflictStrategy, Outcome<T>) {
    match strategy {
        ConflictStrategy::LocalWins => (strategy, Outcome::KeepLocal),
        ConflictStrategy::RemoteWins => (strategy, Outcome::TakeRemote(remote.clone())),
        ConflictStrategy::HigherTrust => {
            let diff = ctx.remote_source_trust - ctx.local_source_trust;
            if diff.abs() < 1e-9 {
                resolve(ConflictStrategy::NewerTimestamp, local, remote, ctx)
            } else if diff > 0.0 {
                (strategy, Outcome::TakeRemote(remote.clone()))
            } else {
                (strategy, Outcome::KeepLocal)
            }
        }
        ConflictStrategy::NewerTimestamp => {
            match remote.modified_at().cmp(&local.modified_at()) {
                std::cmp::Ordering::Greater => (strategy, Outcome::TakeRemote(remote.clone())),
                std::cmp::Ordering::Less => (strategy, Outcome::KeepLocal),
                std::cmp::Ordering::Equal => {
                    (ConflictStrategy::ManualReview, Outcome::ManualReview)
                }
            }
        }
        ConflictStrategy::Merge => match local.merge(remote) {
            Some(merged) => (strategy, Outcome::Merged(merged)),
            None => (ConflictStrategy::ManualReview, Outcome::ManualReview),
        },
        ConflictStrategy::ManualReview => (strategy, Outcome::ManualReview),
    }
}

/// Union two metadata maps, failing on any key with differing values.
fn merge_metadata(
    local: &BTreeMap<String, String>,
    remote: &BTreeMap<String, String>,
) -> Option<BTreeMap<String, String>> {
    let mut merged = local.clone();
    for (key, value) in remote {
        match merged.get(key) {
            Some(existing) if existing != value => return None,
            Some(_) => {}
            None => {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    Some(merged)
}

/// Pick a differing scalar from the strictly newer side.
fn newer<'a, V: PartialEq>(local: &'a V, remote: &'a V, local_ts: u64, remote_ts: u64) -> Option<&'a V> {
    if local == remote {
        Some(local)
    } else if remote_ts > local_ts {
        Some(remote)
    } else if local_ts > remote_ts {
        Some(local)
    } else {
        None
    }
}

impl Versioned for NodeRecord {
    fn modified_at(&self) -> u64 {
        self.modified_at
    }

    fn same_content(&self, other: &Self) -> bool {
        NodeRecord::same_content(self, other)
    }

    fn merge(&self, remote: &Self) -> Option<Self> {
        if self.node_type != remote.node_type {
            return None;
        }
        let content = newer(&self.content, &remote.content, self.modified_at, remote.modified_at)?;

        let mut merged = self.clone();
        merged.content = content.clone();
        merged.tags.extend(remote.tags.iter().cloned());
        merged.metadata = merge_metadata(&self.metadata, &remote.metadata)?;
        merged.modified_at = self.modified_at.max(remote.modified_at);
        Some(merged)
    }
}

impl Versioned for EdgeRecord {
    fn modified_at(&self) -> u64 {
        self.modified_at
    }

    fn same_content(&self, other: &Self) -> bool {
        EdgeRecord::same_content(self, other)
    }

    fn merge(&self, remote: &Self) -> Option<Self> {
        if self.source != remote.source
            || self.target != remote.target
            || self.edge_type != remote.edge_type
        {
            return None;
        }
        let weight = *newer(&self.weight, &remote.weight, self.modified_at, remote.modified_at)?;

        let mut merged = self.clone();
        merged.weight = weight;
        merged.metadata = merge_metadata(&self.metadata, &remote.metadata)?;
        merged.modified_at = self.modified_at.max(remote.modified_at);
        Some(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(strategy: ConflictStrategy) -> ConflictContext {
        ConflictContext {
            checkpoint_ms: 1_000,
            strategy,
            local_source_trust: 1.0,
            remote_source_trust: 0.5,
        }
    }

    fn node(content: &str, ts: u64) -> NodeRecord {
        NodeRecord::new("n1", "concept", content, ts)
    }

    #[test]
    fn absent_item_is_created() {
        let remote = node("hello", 2_000);
        assert_eq!(
            plan(None, &remote, &ctx(ConflictStrategy::LocalWins)),
            Resolution::Create(remote)
        );
    }

    #[test]
    fn identical_content_is_skipped() {
        let local = node("same", 1_500);
        let remote = node("same", 2_500);
        assert_eq!(
            plan(Some(&local), &remote, &ctx(ConflictStrategy::RemoteWins)),
            Resolution::Skip
        );
    }

    #[test]
    fn remote_newer_and_local_untouched_updates() {
        let local = node("old", 500);
        let remote = node("new", 2_000);
        assert_eq!(
            plan(Some(&local), &remote, &ctx(ConflictStrategy::LocalWins)),
            Resolution::Update(remote)
        );
    }

    #[test]
    fn only_local_changed_is_skipped() {
        let local = node("mine", 2_000);
        let remote = node("theirs", 800);
        assert_eq!(
            plan(Some(&local), &remote, &ctx(ConflictStrategy::RemoteWins)),
            Resolution::Skip
        );
    }

    #[test]
    fn stale_remote_is_skipped() {
        let local = node("a", 900);
        let remote = node("b", 400);
        assert_eq!(
            plan(Some(&local), &remote, &ctx(ConflictStrategy::RemoteWins)),
            Resolution::Skip
        );
    }

    #[test]
    fn fixed_strategies() {
        let local = node("mine", 2_000);
        let remote = node("theirs", 3_000);

        assert_eq!(
            plan(Some(&local), &remote, &ctx(ConflictStrategy::LocalWins)),
            Resolution::Conflict {
                decided_by: ConflictStrategy::LocalWins,
                outcome: Outcome::KeepLocal
            }
        );
        assert_eq!(
            plan(Some(&local), &remote, &ctx(ConflictStrategy::RemoteWins)),
            Resolution::Conflict {
                decided_by: ConflictStrategy::RemoteWins,
                outcome: Outcome::TakeRemote(remote.clone())
            }
        );
        assert_eq!(
            plan(Some(&local), &remote, &ctx(ConflictStrategy::ManualReview)),
            Resolution::Conflict {
                decided_by: ConflictStrategy::ManualReview,
                outcome: Outcome::ManualReview
            }
        );
    }

    #[test]
    fn newer_timestamp_and_tie() {
        let local = node("mine", 3_000);
        let remote = node("theirs", 2_000);
        assert_eq!(
            plan(Some(&local), &remote, &ctx(ConflictStrategy::NewerTimestamp)),
            Resolution::Conflict {
                decided_by: ConflictStrategy::NewerTimestamp,
                outcome: Outcome::KeepLocal
            }
        );

        let tied = node("theirs", 3_000);
        assert_eq!(
            plan(Some(&local), &tied, &ctx(ConflictStrategy::NewerTimestamp)),
            Resolution::Conflict {
                decided_by: ConflictStrategy::ManualReview,
                outcome: Outcome::ManualReview
            }
        );
    }

    #[test]
    fn higher_trust_uses_local_scores() {
        let local = node("mine", 2_000);
        let remote = node("theirs", 3_000);

        // Local authorship (1.0) beats a 0.5 peer even though remote is newer.
        assert_eq!(
            plan(Some(&local), &remote, &ctx(ConflictStrategy::HigherTrust)),
            Resolution::Conflict {
                decided_by: ConflictStrategy::HigherTrust,
                outcome: Outcome::KeepLocal
            }
        );

        let mut trusted_remote = ctx(ConflictStrategy::HigherTrust);
        trusted_remote.local_source_trust = 0.3;
        trusted_remote.remote_source_trust = 0.9;
        assert!(matches!(
            plan(Some(&local), &remote, &trusted_remote),
            Resolution::Conflict {
                outcome: Outcome::TakeRemote(_),
                ..
            }
        ));
    }

    #[test]
    fn higher_trust_tie_falls_through_to_timestamp_then_review() {
        let mut tie = ctx(ConflictStrategy::HigherTrust);
        tie.local_source_trust = 0.6;
        tie.remote_source_trust = 0.6;

        let local = node("mine", 2_000);
        let remote = node("theirs", 3_000);
        assert_eq!(
            plan(Some(&local), &remote, &tie),
            Resolution::Conflict {
                decided_by: ConflictStrategy::NewerTimestamp,
                outcome: Outcome::TakeRemote(remote.clone())
            }
        );

        let same_time = node("theirs", 2_000);
        assert_eq!(
            plan(Some(&local), &same_time, &tie),
            Resolution::Conflict {
                decided_by: ConflictStrategy::ManualReview,
                outcome: Outcome::ManualReview
            }
        );
    }

    #[test]
    fn merge_unions_tags_and_takes_newer_content() {
        let mut local = node("draft", 2_000).with_tag("a");
        local.metadata.insert("lang".into(), "en".into());
        let mut remote = node("final", 3_000).with_tag("b");
        remote.metadata.insert("source".into(), "wiki".into());

        match plan(Some(&local), &remote, &ctx(ConflictStrategy::Merge)) {
            Resolution::Conflict {
                decided_by: ConflictStrategy::Merge,
                outcome: Outcome::Merged(merged),
            } => {
                assert_eq!(merged.content, "final");
                assert!(merged.tags.contains("a") && merged.tags.contains("b"));
                assert_eq!(merged.metadata.len(), 2);
                assert_eq!(merged.modified_at, 3_000);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn merge_with_tag_only_difference_keeps_content() {
        let local = node("same", 3_000).with_tag("a");
        let remote = node("same", 3_000).with_tag("b");
        match plan(Some(&local), &remote, &ctx(ConflictStrategy::Merge)) {
            Resolution::Conflict {
                outcome: Outcome::Merged(merged),
                ..
            } => assert_eq!(merged.tags.len(), 2),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unresolvable_merges_go_to_review() {
        // Equal timestamps, different bodies.
        let local = node("x", 2_000);
        let remote = node("y", 2_000);
        assert_eq!(
            plan(Some(&local), &remote, &ctx(ConflictStrategy::Merge)),
            Resolution::Conflict {
                decided_by: ConflictStrategy::ManualReview,
                outcome: Outcome::ManualReview
            }
        );

        // Conflicting metadata value.
        let mut local = node("x", 2_000);
        local.metadata.insert("k".into(), "1".into());
        let mut remote = node("x", 3_000);
        remote.metadata.insert("k".into(), "2".into());
        assert!(matches!(
            plan(Some(&local), &remote, &ctx(ConflictStrategy::Merge)),
            Resolution::Conflict {
                outcome: Outcome::ManualReview,
                ..
            }
        ));

        // Different node type.
        let local = node("x", 2_000);
        let mut remote = node("x", 3_000);
        remote.node_type = "document".into();
        assert!(matches!(
            plan(Some(&local), &remote, &ctx(ConflictStrategy::Merge)),
            Resolution::Conflict {
                outcome: Outcome::ManualReview,
                ..
            }
        ));
    }

    #[test]
    fn edge_merge_requires_same_endpoints() {
        let local = EdgeRecord::new("e1", "a", "b", "cites", 2_000);
        let mut remote = EdgeRecord::new("e1", "a", "b", "cites", 3_000);
        remote.weight = 0.4;

        match plan(Some(&local), &remote, &ctx(ConflictStrategy::Merge)) {
            Resolution::Conflict {
                outcome: Outcome::Merged(merged),
                ..
            } => assert_eq!(merged.weight, 0.4),
            other => panic!("unexpected: {other:?}"),
        }

        let moved = EdgeRecord::new("e1", "a", "c", "cites", 3_000);
        assert!(matches!(
            plan(Some(&local), &moved, &ctx(ConflictStrategy::Merge)),
            Resolution::Conflict {
                outcome: Outcome::ManualReview,
                ..
            }
        ));
    }

    #[test]
    fn never_synced_treats_both_as_changed() {
        let mut first = ctx(ConflictStrategy::NewerTimestamp);
        first.checkpoint_ms = 0;
        let local = node("mine", 10);
        let remote = node("theirs", 20);
        assert!(matches!(
            plan(Some(&local), &remote, &first),
            Resolution::Conflict {
                outcome: Outcome::TakeRemote(_),
                ..
            }
        ));
    }

    #[test]
    fn strategy_names_roundtrip() {
        for s in [
            ConflictStrategy::LocalWins,
            ConflictStrategy::RemoteWins,
            ConflictStrategy::HigherTrust,
            ConflictStrategy::NewerTimestamp,
            ConflictStrategy::Merge,
            ConflictStrategy::ManualReview,
        ] {
            assert_eq!(ConflictStrategy::parse(s.as_str()), Some(s));
        }
    }
}

//! Trust arithmetic: tiers, event deltas, peer status and decay.
//!
//! Everything here is a pure function of a score and the current time.
//! Persistence and per-peer serialization live in `fed-trust`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Score assigned to newly registered peers.
pub const DEFAULT_INITIAL_SCORE: f64 = 0.3;

/// Trust level stamped onto items received from any peer.
///
/// Received content is never trusted more than locally authored content,
/// whatever the source peer's score.
pub const UNVERIFIED_ITEM_TRUST: f64 = 0.3;

/// One week in seconds.
pub const WEEK_SECS: u64 = 7 * 24 * 60 * 60;

/// Score lost per full week without a successful sync.
pub const INACTIVITY_DECAY_PER_WEEK: f64 = 0.01;

/// Multiplier applied when a peer has not re-verified its identity for a week.
pub const VERIFICATION_DECAY_FACTOR: f64 = 0.9;

/// Clamp to [0, 1] and round to four decimals. NaN becomes 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return 0.0;
    }
    let clamped = score.clamp(0.0, 1.0);
    (clamped * 10_000.0).round() / 10_000.0
}

/// Apply a delta to a score, clamping the result.
pub fn apply_delta(score: f64, delta: f64) -> f64 {
    clamp_score(score + delta)
}

/// Trust tier, derived purely from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    /// Below 0.2. No sync in either direction.
    Quarantine,
    /// [0.2, 0.4). Pull only; accepted content goes to review.
    Limited,
    /// [0.4, 0.6). Normal sync.
    Standard,
    /// [0.6, 0.8). Relaxed rate limit.
    Trusted,
    /// [0.8, 1.0]. Loosest rate limit.
    Core,
}

impl TrustTier {
    /// Tier for a score.
    pub fn from_score(score: f64) -> Self {
        let score = clamp_score(score);
        if score < 0.2 {
            TrustTier::Quarantine
        } else if score < 0.4 {
            TrustTier::Limited
        } else if score < 0.6 {
            TrustTier::Standard
        } else if score < 0.8 {
            TrustTier::Trusted
        } else {
            TrustTier::Core
        }
    }

    /// Whether this instance may start a sync with a peer of this tier.
    pub fn allows_outbound(&self) -> bool {
        *self >= TrustTier::Standard
    }

    /// Whether a peer of this tier may sync against this instance.
    pub fn allows_inbound(&self) -> bool {
        *self >= TrustTier::Limited
    }

    /// Whether a peer of this tier may push content to us.
    pub fn allows_push(&self) -> bool {
        *self >= TrustTier::Standard
    }

    /// Whether content accepted from this tier needs human review.
    pub fn requires_review(&self) -> bool {
        *self == TrustTier::Limited
    }

    /// Minimum-interval multiplier as (numerator, denominator).
    ///
    /// `None` means the tier is never admitted.
    pub fn interval_factor(&self) -> Option<(u32, u32)> {
        match self {
            TrustTier::Quarantine => None,
            TrustTier::Limited => Some((2, 1)),
            TrustTier::Standard => Some((1, 1)),
            TrustTier::Trusted => Some((1, 2)),
            TrustTier::Core => Some((1, 4)),
        }
    }

    /// Lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustTier::Quarantine => "quarantine",
            TrustTier::Limited => "limited",
            TrustTier::Standard => "standard",
            TrustTier::Trusted => "trusted",
            TrustTier::Core => "core",
        }
    }
}

impl fmt::Display for TrustTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of entries in a peer's trust history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustEventKind {
    /// Sync run completed.
    SyncSuccess,
    /// Sync run failed for integrity, resource or transport reasons.
    SyncFailure,
    /// A conflict was detected with content from this peer.
    Conflict,
    /// An operator accepted content from this peer.
    ManualAccept,
    /// An operator rejected content from this peer.
    ManualReject,
    /// Operator set or nudged the score directly.
    ManualOverride,
    /// Weekly decay for lack of successful syncs.
    InactivityDecay,
    /// Decay for lack of identity re-verification.
    VerificationDecay,
    /// Message from this peer failed a security check.
    SecurityRejection,
    /// Peer identity was verified by a signed handshake.
    HandshakeVerified,
    /// Peer was revoked.
    Revocation,
}

impl TrustEventKind {
    /// Fixed score delta for event kinds that carry one.
    ///
    /// Decay, override, handshake and revocation events compute their own
    /// change and return `None`.
    pub fn fixed_delta(&self) -> Option<f64> {
        match self {
            TrustEventKind::SyncSuccess => Some(0.02),
            TrustEventKind::SyncFailure => Some(-0.05),
            TrustEventKind::Conflict => Some(-0.01),
            TrustEventKind::ManualAccept => Some(0.03),
            TrustEventKind::ManualReject => Some(-0.08),
            TrustEventKind::SecurityRejection => Some(-0.05),
            TrustEventKind::ManualOverride
            | TrustEventKind::InactivityDecay
            | TrustEventKind::VerificationDecay
            | TrustEventKind::HandshakeVerified
            | TrustEventKind::Revocation => None,
        }
    }

    /// Snake-case name, as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustEventKind::SyncSuccess => "sync_success",
            TrustEventKind::SyncFailure => "sync_failure",
            TrustEventKind::Conflict => "conflict",
            TrustEventKind::ManualAccept => "manual_accept",
            TrustEventKind::ManualReject => "manual_reject",
            TrustEventKind::ManualOverride => "manual_override",
            TrustEventKind::InactivityDecay => "inactivity_decay",
            TrustEventKind::VerificationDecay => "verification_decay",
            TrustEventKind::SecurityRejection => "security_rejection",
            TrustEventKind::HandshakeVerified => "handshake_verified",
            TrustEventKind::Revocation => "revocation",
        }
    }

    /// Parse a stored name.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "sync_success" => TrustEventKind::SyncSuccess,
            "sync_failure" => TrustEventKind::SyncFailure,
            "conflict" => TrustEventKind::Conflict,
            "manual_accept" => TrustEventKind::ManualAccept,
            "manual_reject" => TrustEventKind::ManualReject,
            "manual_override" => TrustEventKind::ManualOverride,
            "inactivity_decay" => TrustEventKind::InactivityDecay,
            "verification_decay" => TrustEventKind::VerificationDecay,
            "security_rejection" => TrustEventKind::SecurityRejection,
            "handshake_verified" => TrustEventKind::HandshakeVerified,
            "revocation" => TrustEventKind::Revocation,
            _ => return None,
        })
    }
}

impl fmt::Display for TrustEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    /// Registered, identity not yet confirmed by a handshake.
    Pending,
    /// Standard tier or above.
    Active,
    /// Limited tier.
    Degraded,
    /// Quarantine tier.
    Suspended,
    /// Last contact failed at the transport level.
    Offline,
    /// Permanently barred. Terminal.
    Revoked,
}

impl PeerStatus {
    /// Status that follows from a tier alone.
    pub fn for_tier(tier: TrustTier) -> Self {
        match tier {
            TrustTier::Quarantine => PeerStatus::Suspended,
            TrustTier::Limited => PeerStatus::Degraded,
            _ => PeerStatus::Active,
        }
    }

    /// Status after a score change.
    ///
    /// Revoked is terminal. Pending and Offline are only left through a
    /// handshake, except that falling into quarantine always suspends.
    pub fn after_score_change(self, tier: TrustTier) -> Self {
        match self {
            PeerStatus::Revoked => PeerStatus::Revoked,
            PeerStatus::Pending | PeerStatus::Offline if tier != TrustTier::Quarantine => self,
            _ => PeerStatus::for_tier(tier),
        }
    }

    /// Whether the status is terminal.
    pub fn is_terminal(&self) -> bool {
        *self == PeerStatus::Revoked
    }

    /// Snake-case name, as stored.
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerStatus::Pending => "pending",
            PeerStatus::Active => "active",
            PeerStatus::Degraded => "degraded",
            PeerStatus::Suspended => "suspended",
            PeerStatus::Offline => "offline",
            PeerStatus::Revoked => "revoked",
        }
    }

    /// Parse a stored name.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => PeerStatus::Pending,
            "active" => PeerStatus::Active,
            "degraded" => PeerStatus::Degraded,
            "suspended" => PeerStatus::Suspended,
            "offline" => PeerStatus::Offline,
            "revoked" => PeerStatus::Revoked,
            _ => return None,
        })
    }
}

impl fmt::Display for PeerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inactivity decay due at `now`.
///
/// `last_activity` is the later of the last successful sync and
/// registration. `checkpoint` is the end of the last decay window already
/// applied. Returns the number of whole weeks to charge and the new
/// checkpoint, or `None` when less than a week has accrued. Partial weeks
/// carry over, so repeated calls never double-charge.
pub fn inactivity_decay(last_activity: u64, checkpoint: Option<u64>, now: u64) -> Option<(u64, u64)> {
    let anchor = checkpoint.map_or(last_activity, |c| c.max(last_activity));
    let elapsed = now.saturating_sub(anchor);
    let weeks = elapsed / WEEK_SECS;
    if weeks == 0 {
        return None;
    }
    Some((weeks, anchor + weeks * WEEK_SECS))
}

/// Whether verification decay is due at `now`.
///
/// Applies at most once per week: the checkpoint is set to `now` whenever
/// the decay is charged.
pub fn verification_decay_due(last_verified: u64, checkpoint: Option<u64>, now: u64) -> bool {
    let anchor = checkpoint.map_or(last_verified, |c| c.max(last_verified));
    now.saturating_sub(anchor) >= WEEK_SECS
}

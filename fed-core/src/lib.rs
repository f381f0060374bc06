//! # fed-core
//!
//! Pure logic for knowledge-graph federation (no I/O, instant tests).
//!
//! This crate implements the bounded stores, trust arithmetic, sync-run
//! state machine and conflict resolution without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input (including the
//! current time) and produce output without side effects. This enables:
//! - Instant unit tests (no mocks, no async, no sleeping)
//! - Deterministic behavior (same input → same output)
//! - Easy reasoning about trust and phase transitions
//!
//! The actual I/O (network, disk, clocks) is performed by `fed-security`,
//! `fed-trust` and `fed-sync`, which feed these functions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bounded;
pub mod conflict;
pub mod run;
pub mod trust;

pub use bounded::BoundedMap;
pub use conflict::{plan, ConflictContext, ConflictStrategy, Outcome, Resolution, Versioned};
pub use run::{RunCounts, RunError, SyncPhase, SyncRun};
pub use trust::{
    apply_delta, clamp_score, inactivity_decay, verification_decay_due, PeerStatus,
    TrustEventKind, TrustTier, DEFAULT_INITIAL_SCORE, INACTIVITY_DECAY_PER_WEEK,
    UNVERIFIED_ITEM_TRUST, VERIFICATION_DECAY_FACTOR, WEEK_SECS,
};

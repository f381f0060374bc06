//! # fed-trust
//!
//! Peer registry and trust scoring for knowledge-graph federation.
//!
//! [`TrustManager`] is the single writer of peer trust. Scores move only
//! through recorded events, manual adjustments, decay and revocation; no
//! value a peer sends is ever written into its score. Each peer's updates
//! are serialized by a per-peer async lock and persisted atomically with
//! the event that caused them.
//!
//! ## Example
//!
//! ```ignore
//! let store = Arc::new(SqlitePeerStore::new(Path::new("peers.db")).await?);
//! let trust = Arc::new(TrustManager::new(store, TrustConfig::default()));
//! let peer = trust.register_peer(PeerRegistration::new("lab", "https://lab.example/", key)).await?;
//! trust.record_event(&peer.id, TrustEventKind::SyncSuccess, None).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod decay;
pub mod error;
pub mod manager;
pub mod store;

pub use config::TrustConfig;
pub use decay::spawn_decay_task;
pub use error::{Result, StorageError, StorageResult, TrustError};
pub use manager::{DecayReport, TrustManager};
pub use store::{Peer, PeerRegistration, PeerStore, SqlitePeerStore, TrustEvent};

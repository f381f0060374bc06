//! # fed-sync
//!
//! Synchronization between federated knowledge-graph instances.
//!
//! - [`SyncOrchestrator`] drives pull, push and bidirectional runs against
//!   one peer at a time, gated by the peer's status, tier and rate limit.
//! - [`FederationResponder`] answers the same protocol from the other side.
//! - [`Applicator`] plans and applies received pages; conflicts are resolved
//!   per peer strategy or handed to [`Governance`].
//! - [`Transport`] moves framed messages: [`HttpTransport`] in production,
//!   [`LoopbackTransport`] and [`MockTransport`] in tests.
//!
//! Every network call goes through [`fed_security::SecurityLayer`]; every
//! trust consequence goes through [`fed_trust::TrustManager`].
//!
//! ## Example
//!
//! ```ignore
//! let orchestrator = SyncOrchestrator::new(security, trust, transport, graph, governance,
//!     OrchestratorConfig::from_config(&config));
//! let report = orchestrator.sync_peer(&peer_id, None).await?;
//! println!("{} created, {} updated", report.counts.created, report.counts.updated);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod apply;
pub mod config;
pub mod error;
pub mod governance;
pub mod graph;
pub mod limits;
pub mod orchestrator;
pub mod outbound;
pub mod responder;
pub mod scheduler;
pub mod transport;

pub use apply::{Action, Applicator, PagePlan, PageTally, WriteKind};
pub use config::{Config, ConfigError};
pub use error::{ErrorClass, Result, SyncError};
pub use governance::{ConflictReport, Governance, GovernanceError, RecordingGovernance};
pub use graph::{GraphChange, GraphError, GraphItem, GraphRepository, MemoryGraph};
pub use limits::{tier_period, RateLimitError, TierRateLimits};
pub use orchestrator::{OrchestratorConfig, SyncOrchestrator, SyncReport};
pub use outbound::{collect_page, should_send, OutboundPage};
pub use responder::FederationResponder;
pub use scheduler::{spawn_sync_scheduler, sync_all};
pub use transport::{
    Exchange, FrameHandler, HttpTransport, LoopbackTransport, MockTransport, Transport,
    TransportError, FEDERATION_PATH, MAX_FRAME_SIZE,
};

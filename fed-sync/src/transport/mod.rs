//! Transport abstraction for federation.
//!
//! A transport carries one framed request to a validated destination and
//! returns the framed response, plus the peer's TLS certificate when the
//! transport has one. Signing, nonces and pinning checks happen above this
//! layer; a transport only moves bytes.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.queue_response(Frame::encode(&reply)?);
//! let exchange = transport.exchange(&target, request_bytes).await?;
//! ```

mod http;
mod loopback;
mod mock;

pub use http::HttpTransport;
pub use loopback::LoopbackTransport;
pub use mock::MockTransport;

use async_trait::async_trait;
use fed_security::ValidatedTarget;
use thiserror::Error;

/// Path of the federation endpoint, relative to a peer's base URL.
pub const FEDERATION_PATH: &str = "federation/v1";

/// Largest frame either side will read (4 MiB).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Peer answered with a non-success status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// Response body could not be read.
    #[error("receive failed: {0}")]
    ReceiveFailed(String),

    /// Request timed out.
    #[error("request timeout")]
    Timeout,
}

/// One request/response round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Response bytes (a framed message).
    pub body: Vec<u8>,
    /// DER certificate the peer presented, if the transport saw one.
    pub certificate: Option<Vec<u8>>,
}

/// Transport trait for exchanging framed federation messages.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `body` to the target's federation endpoint and return the reply.
    async fn exchange(
        &self,
        target: &ValidatedTarget,
        body: Vec<u8>,
    ) -> Result<Exchange, TransportError>;
}

/// Server side of a transport: turns a framed request into a framed reply.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// Handle one framed request.
    async fn handle_frame(&self, body: &[u8]) -> Vec<u8>;
}

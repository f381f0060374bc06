//! HTTPS transport over reqwest (rustls).
//!
//! Each exchange connects only to the addresses the destination guard
//! validated and pinned, so a second DNS lookup inside the HTTP client
//! cannot be rebound to a private address. Replies are read in chunks
//! and abandoned once they pass the frame size limit.

use super::{Exchange, Transport, TransportError, FEDERATION_PATH, MAX_FRAME_SIZE};
use async_trait::async_trait;
use fed_security::ValidatedTarget;
use std::time::Duration;

const CONTENT_TYPE: &str = "application/msgpack";

/// HTTP(S) transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    timeout: Duration,
    accept_self_signed: bool,
    max_response: usize,
}

impl HttpTransport {
    /// Create a transport with a per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            accept_self_signed: false,
            max_response: MAX_FRAME_SIZE,
        }
    }

    /// Override the largest reply body read from a peer.
    pub fn max_response_size(mut self, bytes: usize) -> Self {
        self.max_response = bytes;
        self
    }

    /// Skip CA validation and rely on certificate pinning alone.
    pub fn accept_self_signed(mut self, accept: bool) -> Self {
        self.accept_self_signed = accept;
        self
    }

    fn client_for(&self, target: &ValidatedTarget) -> Result<reqwest::Client, TransportError> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .resolve_to_addrs(&target.host, &target.addrs)
            .redirect(reqwest::redirect::Policy::none())
            .tls_info(true)
            .danger_accept_invalid_certs(self.accept_self_signed)
            .build()
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn exchange(
        &self,
        target: &ValidatedTarget,
        body: Vec<u8>,
    ) -> Result<Exchange, TransportError> {
        let url = target
            .endpoint(FEDERATION_PATH)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let client = self.client_for(target)?;

        let response = client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else {
                    TransportError::ConnectionFailed(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let certificate = response
            .extensions()
            .get::<reqwest::tls::TlsInfo>()
            .and_then(|info| info.peer_certificate())
            .map(|der| der.to_vec());

        let body = read_capped(response, self.max_response).await?;

        Ok(Exchange { body, certificate })
    }
}

async fn read_capped(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, TransportError> {
    if let Some(declared) = response.content_length() {
        if declared > limit as u64 {
            return Err(TransportError::ReceiveFailed(format!(
                "response of {declared} bytes exceeds limit of {limit}"
            )));
        }
    }

    let mut body = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?
    {
        if body.len() + chunk.len() > limit {
            return Err(TransportError::ReceiveFailed(format!(
                "response exceeds limit of {limit} bytes"
            )));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

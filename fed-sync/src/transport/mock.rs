//! Mock transport for testing.
//!
//! Allows queueing responses and capturing sent requests for verification.

use super::{Exchange, Transport, TransportError};
use async_trait::async_trait;
use fed_security::ValidatedTarget;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Mock transport for testing.
///
/// Clones share state.
#[derive(Debug, Default, Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    sent: Vec<Vec<u8>>,
    hosts: Vec<String>,
    responses: VecDeque<Vec<u8>>,
    certificate: Option<Vec<u8>>,
    fail_next: Option<TransportError>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue bytes to be returned by the next exchange.
    pub fn queue_response(&self, data: Vec<u8>) {
        self.lock().responses.push_back(data);
    }

    /// Certificate to report on every exchange.
    pub fn set_certificate(&self, der: Option<Vec<u8>>) {
        self.lock().certificate = der;
    }

    /// All request bodies sent.
    pub fn sent_requests(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// The last request body sent.
    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.lock().sent.last().cloned()
    }

    /// Hosts contacted, in order.
    pub fn hosts(&self) -> Vec<String> {
        self.lock().hosts.clone()
    }

    /// Cause the next exchange to fail with the given error.
    pub fn fail_next(&self, error: TransportError) {
        self.lock().fail_next = Some(error);
    }

    /// Clear all state.
    pub fn reset(&self) {
        *self.lock() = MockTransportInner::default();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn exchange(
        &self,
        target: &ValidatedTarget,
        body: Vec<u8>,
    ) -> Result<Exchange, TransportError> {
        let mut inner = self.lock();

        // Check for forced failure
        if let Some(error) = inner.fail_next.take() {
            return Err(error);
        }

        inner.sent.push(body);
        inner.hosts.push(target.host.clone());

        let body = inner
            .responses
            .pop_front()
            .ok_or_else(|| TransportError::ConnectionFailed("no queued response".into()))?;
        Ok(Exchange {
            body,
            certificate: inner.certificate.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn target() -> ValidatedTarget {
        ValidatedTarget {
            url: "https://peer.example/".parse().unwrap(),
            host: "peer.example".into(),
            port: 443,
            addrs: vec![SocketAddr::from(([93, 184, 216, 34], 443))],
        }
    }

    #[tokio::test]
    async fn returns_queued_responses_in_order() {
        let transport = MockTransport::new();
        transport.queue_response(b"one".to_vec());
        transport.queue_response(b"two".to_vec());

        let t = target();
        assert_eq!(transport.exchange(&t, b"a".to_vec()).await.unwrap().body, b"one");
        assert_eq!(transport.exchange(&t, b"b".to_vec()).await.unwrap().body, b"two");
        assert_eq!(transport.sent_requests(), vec![b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(transport.hosts(), vec!["peer.example", "peer.example"]);
    }

    #[tokio::test]
    async fn empty_queue_is_connection_failure() {
        let transport = MockTransport::new();
        let result = transport.exchange(&target(), b"a".to_vec()).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn forced_failure_then_recovery() {
        let transport = MockTransport::new();
        transport.queue_response(b"ok".to_vec());
        transport.fail_next(TransportError::Timeout);

        let t = target();
        assert!(matches!(
            transport.exchange(&t, b"a".to_vec()).await,
            Err(TransportError::Timeout)
        ));
        assert!(transport.sent_requests().is_empty());
        assert_eq!(transport.exchange(&t, b"a".to_vec()).await.unwrap().body, b"ok");
    }

    #[tokio::test]
    async fn reports_certificate_and_shares_state() {
        let transport = MockTransport::new();
        let clone = transport.clone();
        clone.set_certificate(Some(b"der".to_vec()));
        transport.queue_response(Vec::new());

        let exchange = transport.exchange(&target(), Vec::new()).await.unwrap();
        assert_eq!(exchange.certificate, Some(b"der".to_vec()));
        assert_eq!(clone.last_sent(), Some(Vec::new()));

        clone.reset();
        assert!(transport.sent_requests().is_empty());
    }
}

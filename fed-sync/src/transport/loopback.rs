//! In-process transport that routes requests to local handlers by host.
//!
//! Used to wire several instances together in one process.

use super::{Exchange, FrameHandler, Transport, TransportError};
use async_trait::async_trait;
use fed_security::ValidatedTarget;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Clone)]
struct Route {
    handler: Arc<dyn FrameHandler>,
    certificate: Option<Vec<u8>>,
}

/// Routes each exchange to the handler registered for the target host.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    routes: Arc<RwLock<HashMap<String, Route>>>,
}

impl std::fmt::Debug for LoopbackTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hosts: Vec<String> = self
            .routes
            .read()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("LoopbackTransport")
            .field("hosts", &hosts)
            .finish()
    }
}

impl LoopbackTransport {
    /// Create a transport with no routes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `host` to `handler`, presenting `certificate` as its TLS cert.
    pub fn route(&self, host: &str, handler: Arc<dyn FrameHandler>, certificate: Option<Vec<u8>>) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.insert(
            host.to_ascii_lowercase(),
            Route {
                handler,
                certificate,
            },
        );
    }

    /// Replace the certificate presented for `host`.
    pub fn set_certificate(&self, host: &str, certificate: Option<Vec<u8>>) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        if let Some(route) = routes.get_mut(&host.to_ascii_lowercase()) {
            route.certificate = certificate;
        }
    }

    /// Drop the route for `host`, making it unreachable.
    pub fn unroute(&self, host: &str) {
        let mut routes = self.routes.write().unwrap_or_else(|e| e.into_inner());
        routes.remove(&host.to_ascii_lowercase());
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn exchange(
        &self,
        target: &ValidatedTarget,
        body: Vec<u8>,
    ) -> Result<Exchange, TransportError> {
        let route = {
            let routes = self.routes.read().unwrap_or_else(|e| e.into_inner());
            routes.get(&target.host.to_ascii_lowercase()).cloned()
        }
        .ok_or_else(|| TransportError::ConnectionFailed(format!("no route to {}", target.host)))?;

        let reply = route.handler.handle_frame(&body).await;
        Ok(Exchange {
            body: reply,
            certificate: route.certificate,
        })
    }
}

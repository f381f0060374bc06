//! Destination validation: SSRF guard and DNS pinning.
//!
//! A peer URL is only usable once every address it resolves to is public.
//! The resolved set is then pinned per host; a different set inside the pin
//! window is treated as DNS rebinding. Transports connect to the pinned
//! addresses in [`ValidatedTarget`], never to a fresh lookup.

use async_trait::async_trait;
use fed_core::BoundedMap;
use std::collections::{BTreeSet, HashMap};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};
use url::{Host, Url};

use crate::config::DnsConfig;
use crate::error::{Result, SecurityError};

/// Name resolution, injectable for tests.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Resolve `host` to socket addresses on `port`.
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>>;
}

/// Resolver backed by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

#[async_trait]
impl Resolver for SystemResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
        Ok(tokio::net::lookup_host((host, port)).await?.collect())
    }
}

/// Fixed host table. Used by tests and local development setups.
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    hosts: Arc<Mutex<HashMap<String, Vec<IpAddr>>>>,
}

impl StaticResolver {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `host` at `addrs`, replacing any previous entry.
    pub fn set(&self, host: &str, addrs: Vec<IpAddr>) {
        let mut hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        hosts.insert(host.to_ascii_lowercase(), addrs);
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, host: &str, port: u16) -> std::io::Result<Vec<SocketAddr>> {
        let hosts = self.hosts.lock().unwrap_or_else(|e| e.into_inner());
        match hosts.get(&host.to_ascii_lowercase()) {
            Some(addrs) => Ok(addrs.iter().map(|ip| SocketAddr::new(*ip, port)).collect()),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("unknown host {host}"),
            )),
        }
    }
}

/// A destination that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTarget {
    /// Parsed URL.
    pub url: Url,
    /// Host as written in the URL (lower-case).
    pub host: String,
    /// Effective port.
    pub port: u16,
    /// Addresses the transport must connect to.
    pub addrs: Vec<SocketAddr>,
}

impl ValidatedTarget {
    /// URL with `path` joined onto it.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.url
            .join(path)
            .map_err(|e| SecurityError::InvalidUrl(e.to_string()))
    }
}

/// SSRF guard with a bounded DNS pin store.
pub struct DestinationGuard {
    resolver: Arc<dyn Resolver>,
    require_tls: bool,
    pins: Mutex<BoundedMap<String, BTreeSet<IpAddr>>>,
}

impl std::fmt::Debug for DestinationGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DestinationGuard")
            .field("require_tls", &self.require_tls)
            .finish_non_exhaustive()
    }
}

impl DestinationGuard {
    /// Create a guard.
    pub fn new(config: &DnsConfig, resolver: Arc<dyn Resolver>) -> Self {
        Self {
            resolver,
            require_tls: config.require_tls,
            pins: Mutex::new(BoundedMap::new(
                config.pin_capacity,
                Some(config.pin_ttl_secs),
            )),
        }
    }

    fn pins(&self) -> MutexGuard<'_, BoundedMap<String, BTreeSet<IpAddr>>> {
        self.pins.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of pinned hosts.
    pub fn pinned_hosts(&self) -> usize {
        self.pins().len()
    }

    /// Validate `raw` at time `now` (unix seconds).
    pub async fn validate(&self, raw: &str, now: u64) -> Result<ValidatedTarget> {
        let url = Url::parse(raw).map_err(|e| SecurityError::InvalidUrl(e.to_string()))?;

        match url.scheme() {
            "https" => {}
            "http" if !self.require_tls => {}
            "http" => {
                warn!(url = %raw, "rejected plaintext destination");
                return Err(SecurityError::Ssrf(format!(
                    "plaintext http not allowed: {raw}"
                )));
            }
            other => {
                return Err(SecurityError::Ssrf(format!("scheme {other} not allowed")));
            }
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(SecurityError::InvalidUrl(
                "credentials in destination url".into(),
            ));
        }

        let port = url
            .port_or_known_default()
            .ok_or_else(|| SecurityError::InvalidUrl("no port".into()))?;

        let (host, resolved): (String, Vec<IpAddr>) = match url.host() {
            None => return Err(SecurityError::InvalidUrl("missing host".into())),
            Some(Host::Ipv4(ip)) => (ip.to_string(), vec![IpAddr::V4(ip)]),
            Some(Host::Ipv6(ip)) => (ip.to_string(), vec![IpAddr::V6(ip)]),
            Some(Host::Domain(name)) => {
                let name = name.to_ascii_lowercase();
                let addrs = self.resolver.resolve(&name, port).await.map_err(|e| {
                    SecurityError::Resolution {
                        host: name.clone(),
                        reason: e.to_string(),
                    }
                })?;
                (name, addrs.into_iter().map(|a| a.ip()).collect())
            }
        };

        if resolved.is_empty() {
            return Err(SecurityError::Resolution {
                host,
                reason: "no addresses".into(),
            });
        }
        for ip in &resolved {
            if is_blocked(ip) {
                warn!(%host, %ip, "destination resolves to non-public address");
                return Err(SecurityError::Ssrf(format!(
                    "{host} resolves to non-public address {ip}"
                )));
            }
        }

        let set: BTreeSet<IpAddr> = resolved.iter().copied().collect();
        {
            let mut pins = self.pins();
            pins.purge_expired(now);
            match pins.get(&host, now) {
                // A subset of the pinned set is ordinary round-robin.
                Some(pinned) if set.is_subset(pinned) => {}
                Some(pinned) => {
                    warn!(%host, ?pinned, ?set, "DNS rebinding detected");
                    return Err(SecurityError::DnsRebinding { host });
                }
                None => {
                    debug!(%host, ?set, "pinning resolved addresses");
                    pins.insert(host.clone(), set.clone(), now);
                }
            }
        }

        Ok(ValidatedTarget {
            url,
            host,
            port,
            addrs: set.into_iter().map(|ip| SocketAddr::new(ip, port)).collect(),
        })
    }
}

/// Whether an address must never be contacted.
pub fn is_blocked(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_v4(v4),
        IpAddr::V6(v6) => is_blocked_v6(v6),
    }
}

fn is_blocked_v4(ip: &Ipv4Addr) -> bool {
    let o = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || o[0] == 0 // 0.0.0.0/8
        || (o[0] == 100 && (o[1] & 0xc0) == 64) // 100.64.0.0/10 CGNAT
        || (o[0] == 192 && o[1] == 0 && o[2] == 0) // 192.0.0.0/24
        || (o[0] == 198 && (o[1] & 0xfe) == 18) // 198.18.0.0/15
        || o[0] >= 240 // 240.0.0.0/4
}

fn is_blocked_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_v4(&v4);
    }
    let s = ip.segments();
    // ::a.b.c.d (deprecated compatible form)
    if s[..6].iter().all(|x| *x == 0) && !ip.is_loopback() && !ip.is_unspecified() {
        let v4 = Ipv4Addr::new((s[6] >> 8) as u8, s[6] as u8, (s[7] >> 8) as u8, s[7] as u8);
        return is_blocked_v4(&v4);
    }
    // 64:ff9b::/96 NAT64
    if s[0] == 0x64 && s[1] == 0xff9b && s[2..6].iter().all(|x| *x == 0) {
        let v4 = Ipv4Addr::new((s[6] >> 8) as u8, s[6] as u8, (s[7] >> 8) as u8, s[7] as u8);
        return is_blocked_v4(&v4);
    }
    ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || (s[0] & 0xfe00) == 0xfc00 // fc00::/7 unique local
        || (s[0] & 0xffc0) == 0xfe80 // fe80::/10 link local
        || (s[0] == 0x2001 && s[1] == 0x0db8) // 2001:db8::/32 documentation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn guard(resolver: &StaticResolver) -> DestinationGuard {
        DestinationGuard::new(&DnsConfig::default(), Arc::new(resolver.clone()))
    }

    #[test]
    fn blocked_ranges() {
        for addr in [
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "255.255.255.255",
            "192.0.2.10",
            "100.64.0.1",
            "100.127.255.254",
            "224.0.0.1",
            "::1",
            "::",
            "fc00::1",
            "fd12:3456::1",
            "fe80::1",
            "ff02::1",
            "2001:db8::1",
            "::ffff:127.0.0.1",
            "::ffff:10.0.0.1",
            "64:ff9b::a00:1",
        ] {
            assert!(is_blocked(&ip(addr)), "{addr} should be blocked");
        }
    }

    #[test]
    fn public_ranges_pass() {
        for addr in ["93.184.216.34", "1.1.1.1", "100.128.0.1", "2606:4700::1111", "::ffff:8.8.8.8"] {
            assert!(!is_blocked(&ip(addr)), "{addr} should be allowed");
        }
    }

    #[tokio::test]
    async fn https_public_host_validates() {
        let resolver = StaticResolver::new();
        resolver.set("peer.example", vec![ip("93.184.216.34")]);
        let guard = guard(&resolver);

        let target = guard.validate("https://peer.example/fed", 1_000).await.unwrap();
        assert_eq!(target.host, "peer.example");
        assert_eq!(target.port, 443);
        assert_eq!(target.addrs, vec!["93.184.216.34:443".parse().unwrap()]);
        assert_eq!(guard.pinned_hosts(), 1);
    }

    #[tokio::test]
    async fn plaintext_rejected_unless_allowed() {
        let resolver = StaticResolver::new();
        resolver.set("peer.example", vec![ip("93.184.216.34")]);

        let strict = guard(&resolver);
        assert!(matches!(
            strict.validate("http://peer.example", 0).await,
            Err(SecurityError::Ssrf(_))
        ));

        let config = DnsConfig {
            require_tls: false,
            ..DnsConfig::default()
        };
        let relaxed = DestinationGuard::new(&config, Arc::new(resolver.clone()));
        assert!(relaxed.validate("http://peer.example", 0).await.is_ok());
    }

    #[tokio::test]
    async fn other_schemes_and_credentials_rejected() {
        let guard = guard(&StaticResolver::new());
        assert!(matches!(
            guard.validate("file:///etc/passwd", 0).await,
            Err(SecurityError::Ssrf(_))
        ));
        assert!(matches!(
            guard.validate("https://user:pw@1.1.1.1/", 0).await,
            Err(SecurityError::InvalidUrl(_))
        ));
        assert!(matches!(
            guard.validate("not a url", 0).await,
            Err(SecurityError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn private_literal_and_resolution_blocked() {
        let resolver = StaticResolver::new();
        resolver.set("internal.example", vec![ip("93.184.216.34"), ip("10.0.0.5")]);
        let guard = guard(&resolver);

        assert!(matches!(
            guard.validate("https://127.0.0.1/", 0).await,
            Err(SecurityError::Ssrf(_))
        ));
        assert!(matches!(
            guard.validate("https://[::ffff:192.168.0.1]/", 0).await,
            Err(SecurityError::Ssrf(_))
        ));
        // One private address in the set is enough to block.
        assert!(matches!(
            guard.validate("https://internal.example/", 0).await,
            Err(SecurityError::Ssrf(_))
        ));
        assert_eq!(guard.pinned_hosts(), 0);
    }

    #[tokio::test]
    async fn unknown_host_is_resolution_error() {
        let guard = guard(&StaticResolver::new());
        assert!(matches!(
            guard.validate("https://nowhere.example/", 0).await,
            Err(SecurityError::Resolution { .. })
        ));
    }

    #[tokio::test]
    async fn rebinding_within_ttl_then_repin_after_expiry() {
        let resolver = StaticResolver::new();
        resolver.set("peer.example", vec![ip("93.184.216.34")]);
        let guard = guard(&resolver);

        guard.validate("https://peer.example/", 1_000).await.unwrap();

        resolver.set("peer.example", vec![ip("93.184.216.99")]);
        assert!(matches!(
            guard.validate("https://peer.example/", 1_299).await,
            Err(SecurityError::DnsRebinding { .. })
        ));

        let target = guard.validate("https://peer.example/", 1_300).await.unwrap();
        assert_eq!(target.addrs[0].ip(), ip("93.184.216.99"));

        // New pin holds from here.
        resolver.set("peer.example", vec![ip("93.184.216.34")]);
        assert!(matches!(
            guard.validate("https://peer.example/", 1_400).await,
            Err(SecurityError::DnsRebinding { .. })
        ));
    }

    #[tokio::test]
    async fn subset_of_pinned_set_is_accepted() {
        let resolver = StaticResolver::new();
        resolver.set("peer.example", vec![ip("93.184.216.34"), ip("93.184.216.35")]);
        let guard = guard(&resolver);
        guard.validate("https://peer.example/", 0).await.unwrap();

        resolver.set("peer.example", vec![ip("93.184.216.35")]);
        assert!(guard.validate("https://peer.example/", 10).await.is_ok());
    }

    #[tokio::test]
    async fn pin_store_is_bounded() {
        let resolver = StaticResolver::new();
        let config = DnsConfig {
            pin_capacity: 2,
            ..DnsConfig::default()
        };
        let guard = DestinationGuard::new(&config, Arc::new(resolver.clone()));
        for (i, host) in ["a.example", "b.example", "c.example"].iter().enumerate() {
            resolver.set(host, vec![ip(&format!("93.184.216.{}", 10 + i))]);
            guard.validate(&format!("https://{host}/"), 0).await.unwrap();
        }
        assert_eq!(guard.pinned_hosts(), 2);
    }

    #[test]
    fn endpoint_joins_path() {
        let target = ValidatedTarget {
            url: Url::parse("https://peer.example/base/").unwrap(),
            host: "peer.example".into(),
            port: 443,
            addrs: vec![],
        };
        assert_eq!(
            target.endpoint("federation").unwrap().as_str(),
            "https://peer.example/base/federation"
        );
    }
}

//! Externally resolvable hostnames and the test clients pointed at them.

use std::net::SocketAddr;

use crate::httpx::HttpClientBuilder;
use crate::utils::certificates::TlsMaterial;

/// A name clients reach the system under test through
pub trait Hostname: Send + Sync + std::fmt::Debug {
    fn hostname(&self) -> &str;

    fn scheme(&self) -> &str;

    fn url(&self) -> String {
        format!("{}://{}", self.scheme(), self.hostname())
    }

    /// Client builder preconfigured for this hostname (CA, static resolution)
    fn client(&self) -> HttpClientBuilder;
}

/// Hostname with fixed connection details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticHostname {
    hostname: String,
    scheme: String,
    ca_certificate: Option<String>,
    insecure: bool,
    resolve: Option<SocketAddr>,
}

impl StaticHostname {
    /// Plain HTTP hostname resolved through DNS
    pub fn http(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            scheme: "http".to_string(),
            ca_certificate: None,
            insecure: false,
            resolve: None,
        }
    }

    /// HTTPS hostname verified against `ca`, or with verification off when `None`
    pub fn https(hostname: impl Into<String>, ca: Option<&TlsMaterial>) -> Self {
        Self {
            hostname: hostname.into(),
            scheme: "https".to_string(),
            ca_certificate: ca.map(|m| m.chain.clone().unwrap_or_else(|| m.certificate.clone())),
            insecure: ca.is_none(),
            resolve: None,
        }
    }

    /// Connect to `addr` regardless of what DNS says about the hostname
    pub fn resolved_to(mut self, addr: SocketAddr) -> Self {
        self.resolve = Some(addr);
        self
    }

    pub fn resolve(&self) -> Option<SocketAddr> {
        self.resolve
    }
}

impl Hostname for StaticHostname {
    fn hostname(&self) -> &str {
        &self.hostname
    }

    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn client(&self) -> HttpClientBuilder {
        let mut builder = HttpClientBuilder::new(self.url()).insecure(self.insecure);
        if let Some(ca) = &self.ca_certificate {
            builder = builder.ca_certificate(ca);
        }
        if let Some(addr) = self.resolve {
            builder = builder.resolve(&self.hostname, addr);
        }
        builder
    }
}

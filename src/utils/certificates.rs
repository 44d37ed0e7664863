//! Ephemeral PKI for TLS gateways and mTLS identities.
//!
//! TLS-enabled Envoy gateways need a server certificate for their hostname, a
//! CA to validate client certificates against, and client identities signed
//! by that CA. Everything is generated in memory and stored in Kubernetes
//! Secrets by the caller.

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa,
    KeyPair, KeyUsagePurpose, SanType,
};
use std::net::IpAddr;
use time::{Duration, OffsetDateTime};

use crate::errors::{Error, Result};

/// PEM-encoded certificate with its private key and optional chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub certificate: String,
    pub key: String,
    pub chain: Option<String>,
}

impl TlsMaterial {
    /// Certificate followed by its chain, as served by a TLS listener
    pub fn full_chain(&self) -> String {
        match &self.chain {
            Some(chain) => format!("{}{}", self.certificate, chain),
            None => self.certificate.clone(),
        }
    }
}

/// What a leaf certificate is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertificateUsage {
    Server,
    Client,
}

fn pki_error(context: &str, error: rcgen::Error) -> Error {
    Error::config_with_source(format!("certificate generation failed: {}", context), Box::new(error))
}

/// Self-signed certificate authority that issues leaves
pub struct CertificateAuthority {
    common_name: String,
    certificate: Certificate,
    key: KeyPair,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("common_name", &self.common_name)
            .finish_non_exhaustive()
    }
}

impl CertificateAuthority {
    /// Generate a new CA valid for one year
    pub fn generate(common_name: &str) -> Result<Self> {
        let mut params =
            CertificateParams::new(Vec::<String>::new()).map_err(|e| pki_error("ca params", e))?;
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.distinguished_name.push(DnType::OrganizationName, "Kuadrant Testsuite");
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(365);

        let key = KeyPair::generate().map_err(|e| pki_error("ca key", e))?;
        let certificate = params.self_signed(&key).map_err(|e| pki_error("ca self-sign", e))?;

        Ok(Self {
            common_name: common_name.to_string(),
            certificate,
            key,
        })
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    /// PEM of the CA certificate, for trust stores
    pub fn certificate_pem(&self) -> String {
        self.certificate.pem()
    }

    /// CA certificate and key as TLS material (e.g. for an Envoy CA secret)
    pub fn material(&self) -> TlsMaterial {
        TlsMaterial {
            certificate: self.certificate.pem(),
            key: self.key.serialize_pem(),
            chain: None,
        }
    }

    /// Issue a leaf certificate for `hosts` (DNS names or IP addresses)
    pub fn issue(
        &self,
        common_name: &str,
        hosts: &[String],
        usage: CertificateUsage,
    ) -> Result<TlsMaterial> {
        let mut params =
            CertificateParams::new(Vec::<String>::new()).map_err(|e| pki_error("leaf params", e))?;
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.distinguished_name.push(DnType::OrganizationName, "Kuadrant Testsuite");
        for host in hosts {
            let san = match host.parse::<IpAddr>() {
                Ok(ip) => SanType::IpAddress(ip),
                Err(_) => SanType::DnsName(
                    host.clone().try_into().map_err(|e| pki_error("dns name", e))?,
                ),
            };
            params.subject_alt_names.push(san);
        }
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature, KeyUsagePurpose::KeyEncipherment];
        params.extended_key_usages = match usage {
            CertificateUsage::Server => vec![ExtendedKeyUsagePurpose::ServerAuth],
            CertificateUsage::Client => vec![ExtendedKeyUsagePurpose::ClientAuth],
        };
        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(1);
        params.not_after = now + Duration::days(30);

        let key = KeyPair::generate().map_err(|e| pki_error("leaf key", e))?;
        let certificate = params
            .signed_by(&key, &self.certificate, &self.key)
            .map_err(|e| pki_error("leaf sign", e))?;

        Ok(TlsMaterial {
            certificate: certificate.pem(),
            key: key.serialize_pem(),
            chain: Some(self.certificate.pem()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ca_issues_server_certificates() {
        let ca = CertificateAuthority::generate("envoy-ca").unwrap();
        let leaf = ca
            .issue(
                "gateway",
                &["gateway.example.com".to_string(), "10.0.0.1".to_string()],
                CertificateUsage::Server,
            )
            .unwrap();

        assert!(leaf.certificate.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(leaf.key.contains("PRIVATE KEY"));
        assert_eq!(leaf.chain.as_deref(), Some(ca.certificate_pem().as_str()));
        assert!(leaf.full_chain().matches("BEGIN CERTIFICATE").count() == 2);
    }

    #[test]
    fn ca_material_exposes_key() {
        let ca = CertificateAuthority::generate("authorino-ca").unwrap();
        assert_eq!(ca.common_name(), "authorino-ca");
        let material = ca.material();
        assert!(material.key.contains("PRIVATE KEY"));
        assert!(material.chain.is_none());
    }
}

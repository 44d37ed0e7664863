//! Classification of DNS, TLS, and socket failures.
//!
//! Tests assert on the classified kind (`has_dns_error()` and friends), never
//! on the message of the underlying error, so the rules live in one place.

use std::error::Error as StdError;
use std::fmt;

/// Kind of transport failure observed by an HTTP call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Name resolution failed
    Dns,
    /// The server certificate chains to a CA we do not trust
    UnknownCa,
    /// The server certificate was rejected for another reason (name, expiry)
    CertificateVerify,
    /// The server demanded a client certificate we did not present
    CertificateRequired,
    /// The peer reset or closed the connection mid-exchange
    ConnectionReset,
    Timeout,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::UnknownCa => "unknown_ca",
            TransportErrorKind::CertificateVerify => "certificate_verify",
            TransportErrorKind::CertificateRequired => "certificate_required",
            TransportErrorKind::ConnectionReset => "connection_reset",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Other => "other",
        };
        f.write_str(name)
    }
}

impl TransportErrorKind {
    /// True for every certificate-related failure
    pub fn is_tls(&self) -> bool {
        matches!(
            self,
            TransportErrorKind::UnknownCa
                | TransportErrorKind::CertificateVerify
                | TransportErrorKind::CertificateRequired
        )
    }
}

/// A classified transport failure; kept on the response instead of raised
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl TransportError {
    /// Classify a `reqwest` failure
    pub fn from_reqwest(error: &reqwest::Error) -> Self {
        Self {
            kind: classify_error(error),
            message: error_chain(error),
        }
    }
}

/// Flatten an error and all of its sources into one line
pub fn error_chain(error: &(dyn StdError + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut current = error.source();
    while let Some(source) = current {
        let text = source.to_string();
        if !parts.iter().any(|p| p.contains(&text)) {
            parts.push(text);
        }
        current = source.source();
    }
    parts.join(": ")
}

/// Classify a `reqwest` error by its timeout flag and its source chain
pub fn classify_error(error: &reqwest::Error) -> TransportErrorKind {
    if error.is_timeout() {
        return TransportErrorKind::Timeout;
    }
    classify(&error_chain(error))
}

/// Classify a flattened error message
pub fn classify(message: &str) -> TransportErrorKind {
    let lower = message.to_ascii_lowercase();

    if lower.contains("dns error")
        || lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("no such host")
        || lower.contains("nodename nor servname")
    {
        return TransportErrorKind::Dns;
    }
    if lower.contains("unknownissuer")
        || lower.contains("unknown issuer")
        || lower.contains("unknown ca")
        || lower.contains("unknownca")
    {
        return TransportErrorKind::UnknownCa;
    }
    if lower.contains("certificaterequired") || lower.contains("certificate required") {
        return TransportErrorKind::CertificateRequired;
    }
    if lower.contains("invalid peer certificate")
        || lower.contains("certificate verify failed")
        || lower.contains("notvalidforname")
        || lower.contains("expired")
    {
        return TransportErrorKind::CertificateVerify;
    }
    if lower.contains("connection reset")
        || lower.contains("broken pipe")
        || lower.contains("connection closed before message completed")
        || lower.contains("unexpected eof")
    {
        return TransportErrorKind::ConnectionReset;
    }
    if lower.contains("timed out") || lower.contains("deadline has elapsed") {
        return TransportErrorKind::Timeout;
    }
    TransportErrorKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_dns_failures() {
        assert_eq!(
            classify("error sending request: dns error: failed to lookup address information"),
            TransportErrorKind::Dns
        );
    }

    #[test]
    fn classifies_tls_failures() {
        assert_eq!(
            classify("invalid peer certificate: UnknownIssuer"),
            TransportErrorKind::UnknownCa
        );
        assert_eq!(
            classify("received fatal alert: CertificateRequired"),
            TransportErrorKind::CertificateRequired
        );
        assert_eq!(
            classify("invalid peer certificate: NotValidForName"),
            TransportErrorKind::CertificateVerify
        );
        assert!(TransportErrorKind::UnknownCa.is_tls());
        assert!(!TransportErrorKind::Dns.is_tls());
    }

    #[test]
    fn classifies_socket_failures() {
        assert_eq!(
            classify("Connection reset by peer (os error 104)"),
            TransportErrorKind::ConnectionReset
        );
        assert_eq!(classify("operation timed out"), TransportErrorKind::Timeout);
        assert_eq!(classify("something else"), TransportErrorKind::Other);
    }

    #[test]
    fn error_chain_deduplicates_sources() {
        let inner = std::io::Error::new(std::io::ErrorKind::Other, "dns error");
        let chain = error_chain(&inner);
        assert_eq!(chain, "dns error");
    }
}

//! Utility functions and helpers

pub mod certificates;
pub mod http;
pub mod retry;
pub mod timeout;

pub use certificates::{CertificateAuthority, CertificateUsage, TlsMaterial};
pub use retry::{retry_until, retry_with_backoff, Attempted, RetryConfig};
pub use timeout::{wait_for_condition, with_timeout, Wait};

/// Install the ring crypto provider for rustls once per process.
///
/// Both `kube` and `reqwest` build rustls configs; without a process-level
/// default, rustls refuses to pick between linked providers.
pub fn install_rustls_provider() {
    use rustls::crypto::{ring, CryptoProvider};

    if CryptoProvider::get_default().is_none() {
        // Another thread may win the race; either way a provider is installed.
        let _ = ring::default_provider().install_default();
    }
}

//! Configuration for signing and verification.

use std::time::Duration;

/// Bytes reserved for the signature when the caller does not say otherwise.
pub const DEFAULT_PLACEHOLDER_SIZE: usize = 18944;

/// Tunables shared by [`PdfSigner`](crate::signatures::PdfSigner) and
/// [`SignatureVerifier`](crate::signatures::SignatureVerifier).
#[derive(Debug, Clone)]
pub struct SealConfig {
    /// Raw signature bytes reserved in `/Contents` (the hex string is twice this plus 2).
    pub placeholder_size: usize,

    /// HTTP timeout for timestamp authority requests.
    pub timestamp_timeout: Duration,

    /// How long an external signing reservation may stay unfilled.
    pub external_signing_timeout: Duration,

    /// Verify the signatures of one document on scoped threads.
    pub parallel_verification: bool,
}

impl Default for SealConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SealConfig {
    /// Create new configuration with defaults.
    pub fn new() -> Self {
        Self {
            placeholder_size: DEFAULT_PLACEHOLDER_SIZE,
            timestamp_timeout: Duration::from_secs(30),
            external_signing_timeout: Duration::from_secs(300),
            parallel_verification: false,
        }
    }

    /// Set the placeholder size in raw signature bytes.
    pub fn with_placeholder_size(mut self, bytes: usize) -> Self {
        self.placeholder_size = bytes;
        self
    }

    /// Set the timestamp authority timeout.
    pub fn with_timestamp_timeout(mut self, timeout: Duration) -> Self {
        self.timestamp_timeout = timeout;
        self
    }

    /// Set the external signing timeout.
    pub fn with_external_signing_timeout(mut self, timeout: Duration) -> Self {
        self.external_signing_timeout = timeout;
        self
    }

    /// Enable or disable parallel verification.
    pub fn with_parallel_verification(mut self, enable: bool) -> Self {
        self.parallel_verification = enable;
        self
    }
}

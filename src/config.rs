/// Driver configuration
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AcmeError, Result};
use crate::retry::RetryPolicy;
use crate::types::ChallengeType;

/// Configuration for a driver run.
///
/// The capability flags describe which challenge responses the serving
/// environment can actually answer; the driver only offers matching
/// challenge types to the CA.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Port 80 is served, HTTP-01 files are reachable
    pub can_http_01: bool,

    /// Port 443 answers the acme-tls/1 ALPN protocol
    pub can_tls_alpn_01: bool,

    /// Port 443 serves the legacy TLS-SNI-01 certificate
    pub can_tls_sni_01: bool,

    /// A DNS publisher consumes the generated record files
    pub can_dns_01: bool,

    /// Retry budget for transient request failures
    pub max_retries: u32,

    /// Total time to wait for pending authorizations, in seconds
    pub authz_monitor_timeout_secs: u64,

    /// Total time to poll for an issued certificate, in seconds
    pub cert_poll_timeout_secs: u64,

    /// Backoff schedule shared by all poll loops
    pub retry: RetryPolicy,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            can_http_01: true,
            can_tls_alpn_01: false,
            can_tls_sni_01: false,
            can_dns_01: false,
            max_retries: 3,
            authz_monitor_timeout_secs: 30,
            cert_poll_timeout_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

impl DriveConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&raw)
            .map_err(|e| AcmeError::malformed(format!("config {}: {}", path.as_ref().display(), e)))
    }

    /// Whether the given challenge type is enabled.
    pub fn supports(&self, kind: ChallengeType) -> bool {
        match kind {
            ChallengeType::Http01 => self.can_http_01,
            ChallengeType::TlsAlpn01 => self.can_tls_alpn_01,
            ChallengeType::TlsSni01 => self.can_tls_sni_01,
            ChallengeType::Dns01 => self.can_dns_01,
        }
    }

    /// Enabled challenge types in driver preference order.
    pub fn challenge_types(&self) -> Vec<ChallengeType> {
        [
            ChallengeType::Http01,
            ChallengeType::TlsAlpn01,
            ChallengeType::TlsSni01,
            ChallengeType::Dns01,
        ]
        .into_iter()
        .filter(|t| self.supports(*t))
        .collect()
    }

    /// Authorization monitor deadline
    pub fn authz_monitor_timeout(&self) -> Duration {
        Duration::from_secs(self.authz_monitor_timeout_secs)
    }

    /// Certificate poll deadline
    pub fn cert_poll_timeout(&self) -> Duration {
        Duration::from_secs(self.cert_poll_timeout_secs)
    }
}

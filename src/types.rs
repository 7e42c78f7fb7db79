/// Common types for managed domains and the driver state machine
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{AcmeError, Result};

/// The protocol name recorded on managed domains driven by this crate.
pub const PROTO_ACME: &str = "ACME";

/// A managed domain: one or more DNS names driven as a unit against a CA.
///
/// The first entry of `domains` is the canonical name and becomes the CN
/// of the certificate request; every entry becomes a SAN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedDomain {
    /// Stable local identity
    pub name: String,

    /// DNS names, first one canonical
    pub domains: Vec<String>,

    /// Contact URIs (e.g. `mailto:admin@example.com`)
    #[serde(default)]
    pub contacts: Vec<String>,

    /// Directory URL of the CA
    pub ca_url: String,

    /// Protocol to drive, currently always "ACME"
    pub ca_proto: String,

    /// Local id of the CA account used for this domain
    #[serde(rename = "ca_account", default, skip_serializing_if = "Option::is_none")]
    pub ca_account: Option<String>,

    /// Terms-of-service URL the operator is willing to accept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_agreement: Option<String>,

    /// Certificate location at the CA, once known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_url: Option<String>,

    /// Key algorithm and parameters for the domain key
    #[serde(default)]
    pub pkey_spec: KeySpec,

    /// Last driver state reached for this domain
    #[serde(default)]
    pub state: DriveState,
}

impl ManagedDomain {
    /// Create a managed domain named after its first DNS name.
    pub fn new(domains: Vec<String>, ca_url: impl Into<String>) -> Result<Self> {
        let name = domains
            .first()
            .cloned()
            .ok_or_else(|| AcmeError::malformed("managed domain needs at least one DNS name"))?;
        Ok(Self {
            name,
            domains,
            contacts: Vec::new(),
            ca_url: ca_url.into(),
            ca_proto: PROTO_ACME.to_string(),
            ca_account: None,
            ca_agreement: None,
            cert_url: None,
            pkey_spec: KeySpec::default(),
            state: DriveState::Unknown,
        })
    }

    /// Whether this domain covers the given DNS name.
    pub fn contains(&self, domain: &str) -> bool {
        self.domains.iter().any(|d| d.eq_ignore_ascii_case(domain))
    }

    /// Whether any DNS name is shared with `other`.
    pub fn overlaps(&self, other: &ManagedDomain) -> bool {
        self.domains.iter().any(|d| other.contains(d))
    }
}

/// Domain private key algorithm and parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KeySpec {
    /// RSA with the given modulus size
    Rsa { bits: u32 },
    /// ECDSA over P-256
    P256,
}

impl Default for KeySpec {
    fn default() -> Self {
        KeySpec::Rsa { bits: 4096 }
    }
}

/// Challenge type enumeration, in driver preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChallengeType {
    /// HTTP-01 challenge
    Http01,
    /// TLS-ALPN-01 challenge
    TlsAlpn01,
    /// TLS-SNI-01 challenge (deprecated by CAs, kept for older servers)
    TlsSni01,
    /// DNS-01 challenge
    Dns01,
}

impl ChallengeType {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ChallengeType::Http01 => "http-01",
            ChallengeType::TlsAlpn01 => "tls-alpn-01",
            ChallengeType::TlsSni01 => "tls-sni-01",
            ChallengeType::Dns01 => "dns-01",
        }
    }
}

impl std::str::FromStr for ChallengeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "http-01" => Ok(ChallengeType::Http01),
            "tls-alpn-01" => Ok(ChallengeType::TlsAlpn01),
            "tls-sni-01" => Ok(ChallengeType::TlsSni01),
            "dns-01" => Ok(ChallengeType::Dns01),
            _ => Err(format!("Unknown challenge type: {}", s)),
        }
    }
}

impl std::fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress of a managed domain through the drive phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveState {
    /// Not analysed yet
    #[default]
    Unknown,
    /// Registered at the CA
    Registered,
    /// Terms of service accepted by the account holder
    TosAccepted,
    /// Challenge responses for all domains published
    Challenged,
    /// All domains validated by the CA
    Validated,
    /// Certificate retrieved and persisted
    Certified,
    /// At least one domain denied by the CA
    Denied,
}

impl std::fmt::Display for DriveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DriveState::Unknown => "unknown",
            DriveState::Registered => "registered",
            DriveState::TosAccepted => "tos_accepted",
            DriveState::Challenged => "challenged",
            DriveState::Validated => "validated",
            DriveState::Certified => "certified",
            DriveState::Denied => "denied",
        };
        write!(f, "{}", s)
    }
}

/// Cooperative cancellation token.
///
/// Checked before every network call and every backoff sleep. Cancelling
/// abandons in-flight work; persisted state stays as-is and is safe to
/// resume from.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; all clones observe it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with `Cancelled` if cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(AcmeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Error taxonomy for the ACME driver
use thiserror::Error;

/// Result type for driver operations
pub type Result<T> = std::result::Result<T, AcmeError>;

/// Error kinds surfaced by the driver.
///
/// The first block mirrors the problem types a CA reports in RFC 7807
/// documents; the second block covers local conditions (store misses,
/// create conflicts, cancellation) and infrastructure failures.
#[derive(Error, Debug)]
pub enum AcmeError {
    /// Request or response violated the protocol
    #[error("malformed: {0}")]
    Malformed(String),

    /// The anti-replay nonce was rejected; retried with a fresh one
    #[error("bad nonce")]
    BadNonce,

    /// The CA rejected the signature or its algorithm
    #[error("bad signature: {0}")]
    BadSignature(String),

    /// Contact information missing or rejected by the CA
    #[error("invalid contact: {0}")]
    InvalidContact(String),

    /// The CA throttled this account or endpoint
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The CA refused an identifier in the request
    #[error("identifier rejected: {0}")]
    Rejected(String),

    /// The CA reported an internal failure
    #[error("server internal error: {0}")]
    ServerInternal(String),

    /// The account or authorization is not accepted by the CA
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// No usable mechanism (e.g. no enabled challenge type matched)
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Operator intervention needed (typically changed terms of service)
    #[error("user action required: {0}")]
    UserActionRequired(String),

    /// The CA rejected the certificate signing request
    #[error("bad CSR: {0}")]
    BadCsr(String),

    /// CAA records forbid issuance
    #[error("CAA forbids issuance: {0}")]
    Caa(String),

    /// The CA failed to resolve or verify DNS for a name
    #[error("DNS failure: {0}")]
    Dns(String),

    /// Network-level failure talking to the CA
    #[error("connection failure: {0}")]
    Connection(String),

    /// TLS-level failure during validation
    #[error("TLS failure: {0}")]
    Tls(String),

    /// The CA answered outside the protocol (unexpected status or body)
    #[error("unexpected response from {url}: HTTP {status}")]
    IncorrectResponse { status: u16, url: String },

    /// Problem type we have no specific mapping for
    #[error("ACME error: {0}")]
    Generic(String),

    /// Store miss or a remote resource the server no longer knows
    #[error("not found: {0}")]
    NotFound(String),

    /// Create-mode save hit an existing aspect
    #[error("already exists: {0}")]
    Exists(String),

    /// The caller cancelled the run
    #[error("cancelled")]
    Cancelled,

    /// Deadline elapsed while polling a pending resource
    #[error("timeout: {0}")]
    Timeout(String),

    /// Key generation, signing, or certificate handling failed locally
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Persistent store failure
    #[error("storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AcmeError {
    /// Create a malformed error
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        AcmeError::Malformed(msg.into())
    }

    /// Create an unauthorized error
    pub fn unauthorized<S: Into<String>>(msg: S) -> Self {
        AcmeError::Unauthorized(msg.into())
    }

    /// Create an unsupported error
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        AcmeError::Unsupported(msg.into())
    }

    /// Create a not found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        AcmeError::NotFound(msg.into())
    }

    /// Create an exists error
    pub fn exists<S: Into<String>>(msg: S) -> Self {
        AcmeError::Exists(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        AcmeError::Timeout(msg.into())
    }

    /// Create a crypto error
    pub fn crypto<S: Into<String>>(msg: S) -> Self {
        AcmeError::Crypto(msg.into())
    }

    /// Create a storage error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        AcmeError::Storage(msg.into())
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        AcmeError::Connection(msg.into())
    }

    /// Whether a retry with the same inputs may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AcmeError::BadNonce
                | AcmeError::Connection(_)
                | AcmeError::ServerInternal(_)
                | AcmeError::RateLimited(_)
        )
    }

    /// Whether this is a store miss / unknown remote resource.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AcmeError::NotFound(_))
    }
}

impl From<reqwest::Error> for AcmeError {
    fn from(e: reqwest::Error) -> Self {
        AcmeError::Connection(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AcmeError::BadNonce.is_transient());
        assert!(AcmeError::Connection("reset".into()).is_transient());
        assert!(AcmeError::ServerInternal("oops".into()).is_transient());
        assert!(AcmeError::RateLimited("slow down".into()).is_transient());

        assert!(!AcmeError::Unauthorized("a.test".into()).is_transient());
        assert!(!AcmeError::Malformed("bad json".into()).is_transient());
        assert!(!AcmeError::Cancelled.is_transient());
    }

    #[test]
    fn test_display_carries_context() {
        let err = AcmeError::IncorrectResponse {
            status: 503,
            url: "https://ca.test/new-cert".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("503"));
        assert!(msg.contains("https://ca.test/new-cert"));
    }
}

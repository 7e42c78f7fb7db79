/// RFC 7807 problem documents and their mapping onto the error taxonomy
use serde::Deserialize;

use crate::error::AcmeError;

/// Media type a CA uses to report errors
pub const PROBLEM_JSON: &str = "application/problem+json";

/// A problem document returned by the CA.
#[derive(Debug, Clone, Deserialize)]
pub struct Problem {
    /// Problem type URN
    #[serde(rename = "type", default)]
    pub type_: Option<String>,

    /// Human-readable detail
    #[serde(default)]
    pub detail: Option<String>,

    /// HTTP status the CA attached to the problem
    #[serde(default)]
    pub status: Option<u16>,
}

impl Problem {
    /// Translate into the internal error taxonomy.
    ///
    /// The `type` URN is matched after stripping a leading
    /// `urn:ietf:params:` or `urn:` prefix; unknown types map to
    /// `Generic` so new CA-side error codes degrade gracefully.
    pub fn into_error(self, url: &str) -> AcmeError {
        let type_ = self.type_.as_deref().unwrap_or("");
        let detail = self
            .detail
            .clone()
            .unwrap_or_else(|| format!("{} at {}", type_, url));

        let stripped = type_
            .strip_prefix("urn:ietf:params:")
            .or_else(|| type_.strip_prefix("urn:"))
            .unwrap_or(type_);
        let code = stripped.strip_prefix("acme:error:").unwrap_or(stripped);

        match code {
            "badCSR" => AcmeError::BadCsr(detail),
            "badNonce" => AcmeError::BadNonce,
            "badSignatureAlgorithm" => AcmeError::BadSignature(detail),
            "invalidContact" | "unsupportedContact" => AcmeError::InvalidContact(detail),
            "malformed" => AcmeError::Malformed(detail),
            "rateLimited" => AcmeError::RateLimited(detail),
            "rejectedIdentifier" | "unsupportedIdentifier" => AcmeError::Rejected(detail),
            "serverInternal" => AcmeError::ServerInternal(detail),
            "unauthorized" => AcmeError::Unauthorized(detail),
            "userActionRequired" => AcmeError::UserActionRequired(detail),
            "caa" => AcmeError::Caa(detail),
            "dns" => AcmeError::Dns(detail),
            "connection" => AcmeError::Connection(detail),
            "tls" => AcmeError::Tls(detail),
            "incorrectResponse" => AcmeError::IncorrectResponse {
                status: self.status.unwrap_or(0),
                url: url.to_string(),
            },
            _ => AcmeError::Generic(format!("{}: {}", type_, detail)),
        }
    }
}

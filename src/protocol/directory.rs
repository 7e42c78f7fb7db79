/// CA directory discovery and caching
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{AcmeError, Result};

/// Snapshot of the CA's endpoint URLs.
///
/// The four resource URLs are required; a CA without any one of them is
/// rejected as malformed. `new-nonce` is optional: older servers hand
/// out nonces on a `HEAD` of the registration endpoint instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directory {
    /// Account registration endpoint
    #[serde(rename = "new-reg", alias = "newAccount")]
    pub new_reg: String,

    /// Authorization creation endpoint
    #[serde(rename = "new-authz", alias = "newAuthz")]
    pub new_authz: String,

    /// Certificate issuance endpoint
    #[serde(rename = "new-cert", alias = "newCert")]
    pub new_cert: String,

    /// Certificate revocation endpoint
    #[serde(rename = "revoke-cert", alias = "revokeCert")]
    pub revoke_cert: String,

    /// Dedicated nonce endpoint, when the CA advertises one
    #[serde(
        rename = "new-nonce",
        alias = "newNonce",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub new_nonce: Option<String>,

    /// Directory metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<DirectoryMeta>,
}

/// Directory metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryMeta {
    /// Current terms-of-service URL
    #[serde(
        rename = "terms-of-service",
        alias = "termsOfService",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub terms_of_service: Option<String>,

    /// CA website
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
}

impl Directory {
    /// URL to `HEAD` for a fresh nonce.
    pub fn nonce_url(&self) -> &str {
        self.new_nonce.as_deref().unwrap_or(&self.new_reg)
    }

    /// Terms-of-service URL advertised by the CA, if any.
    pub fn terms_of_service(&self) -> Option<&str> {
        self.meta.as_ref().and_then(|m| m.terms_of_service.as_deref())
    }
}

/// Fetches and caches the directory for the duration of a driver run.
pub struct DirectoryClient {
    url: String,
    http: reqwest::Client,
    cached: RwLock<Option<Directory>>,
}

impl DirectoryClient {
    /// Create a client for the given directory URL
    pub fn new(url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            url: url.into(),
            http,
            cached: RwLock::new(None),
        }
    }

    /// Fetch the directory from the CA and cache it.
    pub async fn fetch(&self) -> Result<Directory> {
        tracing::debug!("fetching directory from {}", self.url);
        let response = self.http.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AcmeError::IncorrectResponse {
                status: status.as_u16(),
                url: self.url.clone(),
            });
        }

        let directory: Directory = response
            .json()
            .await
            .map_err(|e| AcmeError::malformed(format!("directory {}: {}", self.url, e)))?;

        let mut cached = self.cached.write().await;
        *cached = Some(directory.clone());
        Ok(directory)
    }

    /// Cached directory, fetching on first use.
    pub async fn get(&self) -> Result<Directory> {
        {
            let cached = self.cached.read().await;
            if let Some(dir) = cached.clone() {
                return Ok(dir);
            }
        }
        self.fetch().await
    }

    /// Drop the cached snapshot so the next access re-fetches. Used when
    /// a previously known endpoint turns 404 (server rollover).
    pub async fn invalidate(&self) {
        let mut cached = self.cached.write().await;
        *cached = None;
    }

    /// Directory URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_parsing() {
        let json = r#"{
            "new-reg": "https://ca.test/acme/new-reg",
            "new-authz": "https://ca.test/acme/new-authz",
            "new-cert": "https://ca.test/acme/new-cert",
            "revoke-cert": "https://ca.test/acme/revoke-cert"
        }"#;

        let dir: Directory = serde_json::from_str(json).unwrap();
        assert_eq!(dir.new_reg, "https://ca.test/acme/new-reg");
        assert_eq!(dir.nonce_url(), "https://ca.test/acme/new-reg");
        assert!(dir.terms_of_service().is_none());
    }

    #[test]
    fn test_directory_missing_url_is_rejected() {
        let json = r#"{
            "new-reg": "https://ca.test/acme/new-reg",
            "new-authz": "https://ca.test/acme/new-authz"
        }"#;
        assert!(serde_json::from_str::<Directory>(json).is_err());
    }

    #[test]
    fn test_directory_with_nonce_and_meta() {
        let json = r#"{
            "new-reg": "https://ca.test/acme/new-reg",
            "new-authz": "https://ca.test/acme/new-authz",
            "new-cert": "https://ca.test/acme/new-cert",
            "revoke-cert": "https://ca.test/acme/revoke-cert",
            "new-nonce": "https://ca.test/acme/new-nonce",
            "meta": {
                "terms-of-service": "https://ca.test/tos-v2"
            }
        }"#;

        let dir: Directory = serde_json::from_str(json).unwrap();
        assert_eq!(dir.nonce_url(), "https://ca.test/acme/new-nonce");
        assert_eq!(dir.terms_of_service(), Some("https://ca.test/tos-v2"));
    }

    #[test]
    fn test_directory_camel_case_aliases() {
        let json = r#"{
            "newAccount": "https://ca.test/acme/new-acct",
            "newAuthz": "https://ca.test/acme/new-authz",
            "newCert": "https://ca.test/acme/new-cert",
            "revokeCert": "https://ca.test/acme/revoke-cert",
            "newNonce": "https://ca.test/acme/new-nonce"
        }"#;

        let dir: Directory = serde_json::from_str(json).unwrap();
        assert_eq!(dir.new_reg, "https://ca.test/acme/new-acct");
        assert_eq!(dir.nonce_url(), "https://ca.test/acme/new-nonce");
    }
}

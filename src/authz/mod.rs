/// Domain authorizations: creation, refresh, readiness signalling
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::account::AccountSession;
use crate::client::AcmeClient;
use crate::error::{AcmeError, Result};
use crate::store::{Group, Store, aspect, load_json, save_json};
use crate::types::CancelToken;

/// CA-side authorization state.
///
/// Everything but `pending` is terminal for one authorization; retrying
/// a failed domain means requesting a new authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthzStatus {
    Pending,
    Valid,
    Invalid,
    Revoked,
    Expired,
    Deactivated,
}

impl AuthzStatus {
    /// Terminal without ever becoming valid
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AuthzStatus::Invalid | AuthzStatus::Revoked | AuthzStatus::Expired | AuthzStatus::Deactivated
        )
    }
}

impl std::fmt::Display for AuthzStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AuthzStatus::Pending => "pending",
            AuthzStatus::Valid => "valid",
            AuthzStatus::Invalid => "invalid",
            AuthzStatus::Revoked => "revoked",
            AuthzStatus::Expired => "expired",
            AuthzStatus::Deactivated => "deactivated",
        };
        write!(f, "{}", s)
    }
}

/// One proof mechanism offered by an authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Challenge {
    /// Challenge type string, e.g. "http-01"
    #[serde(rename = "type")]
    pub kind: String,

    /// Validation token
    pub token: String,

    /// Challenge resource URL
    #[serde(alias = "uri")]
    pub url: String,

    /// Server-side challenge status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// DNS identifier as it appears on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// Authorization resource as the CA serves it.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthzResource {
    pub identifier: Identifier,
    #[serde(default = "default_pending")]
    pub status: AuthzStatus,
    #[serde(default)]
    pub expires: Option<Timestamp>,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
}

fn default_pending() -> AuthzStatus {
    AuthzStatus::Pending
}

/// A per-domain authorization as tracked locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authorization {
    /// CA-assigned resource URL
    pub url: String,

    /// DNS name this authorization proves control of
    pub domain: String,

    /// Last observed status
    pub status: AuthzStatus,

    /// Expiry of the authorization, when the CA reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<Timestamp>,

    /// Challenges offered by the CA
    #[serde(default)]
    pub challenges: Vec<Challenge>,

    /// Challenge directory published for this authorization, kept for
    /// the final purge
    #[serde(rename = "challenge-dir", default, skip_serializing_if = "Option::is_none")]
    pub challenge_dir: Option<String>,
}

impl Authorization {
    /// Build the local record from a wire resource.
    pub fn from_resource(url: impl Into<String>, resource: AuthzResource) -> Self {
        Self {
            url: url.into(),
            domain: resource.identifier.value,
            status: resource.status,
            expires: resource.expires,
            challenges: resource.challenges,
            challenge_dir: None,
        }
    }

    /// Fold a refreshed wire resource into this record.
    pub fn update_from(&mut self, resource: AuthzResource) {
        self.status = resource.status;
        self.expires = resource.expires;
        if !resource.challenges.is_empty() {
            self.challenges = resource.challenges;
        }
    }

    /// Whether the CA-side expiry has passed.
    pub fn is_expired(&self) -> bool {
        self.expires.is_some_and(|ts| ts < Timestamp::now())
    }

    /// Unusable: terminal failure or past expiry.
    pub fn is_unusable(&self) -> bool {
        self.status.is_failure() || self.is_expired()
    }
}

/// The authorization set of one managed domain, persisted in staging so
/// a restarted driver resumes instead of re-requesting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthzSet {
    /// Local id of the owning account
    pub account: String,

    /// Authorizations, one per DNS name
    #[serde(rename = "authorizations", default)]
    pub authzs: Vec<Authorization>,
}

impl AuthzSet {
    /// Create an empty set owned by the given account
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            authzs: Vec::new(),
        }
    }

    /// Authorization for a domain
    pub fn get(&self, domain: &str) -> Option<&Authorization> {
        self.authzs.iter().find(|a| a.domain == domain)
    }

    /// Mutable authorization for a domain
    pub fn get_mut(&mut self, domain: &str) -> Option<&mut Authorization> {
        self.authzs.iter_mut().find(|a| a.domain == domain)
    }

    /// Add or replace the authorization for its domain
    pub fn put(&mut self, authz: Authorization) {
        self.remove(&authz.domain);
        self.authzs.push(authz);
    }

    /// Drop the authorization for a domain
    pub fn remove(&mut self, domain: &str) {
        self.authzs.retain(|a| a.domain != domain);
    }

    /// Load the persisted set for a managed domain, if any.
    pub async fn load(store: &dyn Store, md_name: &str) -> Result<Option<AuthzSet>> {
        match load_json(store, Group::Staging, md_name, aspect::AUTHZS).await {
            Ok(set) => Ok(Some(set)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Persist the set under the managed domain's staging name.
    pub async fn save(&self, store: &dyn Store, md_name: &str) -> Result<()> {
        save_json(store, Group::Staging, md_name, aspect::AUTHZS, self, false).await
    }
}

/// Network operations on authorization resources.
pub struct AuthzManager<'a> {
    client: &'a AcmeClient,
    cancel: &'a CancelToken,
}

impl<'a> AuthzManager<'a> {
    /// Create a manager bound to one CA session
    pub fn new(client: &'a AcmeClient, cancel: &'a CancelToken) -> Self {
        Self { client, cancel }
    }

    /// Create a new authorization for a DNS name.
    pub async fn register(&self, session: &AccountSession, domain: &str) -> Result<Authorization> {
        let directory = self.client.directory().await?;
        let domain_owned = domain.to_string();
        let response = self
            .client
            .post_signed(
                &directory.new_authz,
                &session.key,
                Some(session.kid()),
                self.cancel,
                || {
                    Ok(Some(json!({
                        "resource": "new-authz",
                        "identifier": {"type": "dns", "value": domain_owned},
                    })))
                },
            )
            .await?;

        let url = response.location().ok_or_else(|| {
            AcmeError::malformed(format!("new-authz for {} returned no Location", domain))
        })?;
        let resource: AuthzResource = parse_resource(response.json, &url)?;
        let authz = Authorization::from_resource(url, resource);
        tracing::debug!("created authorization for {} at {}", domain, authz.url);
        Ok(authz)
    }

    /// Refresh an authorization from its URL.
    pub async fn refresh(&self, authz: &mut Authorization) -> Result<()> {
        let response = self.client.get(&authz.url, self.cancel).await?;
        let resource: AuthzResource = parse_resource(response.json, &authz.url)?;
        authz.update_from(resource);
        tracing::debug!("authorization {} is {}", authz.domain, authz.status);
        Ok(())
    }

    /// Signal readiness on a challenge after its response was published.
    pub async fn signal_ready(
        &self,
        session: &AccountSession,
        challenge: &Challenge,
        key_authorization: &str,
    ) -> Result<()> {
        let ka = key_authorization.to_string();
        self.client
            .post_signed(
                &challenge.url,
                &session.key,
                Some(session.kid()),
                self.cancel,
                || {
                    Ok(Some(json!({
                        "resource": "challenge",
                        "keyAuthorization": ka,
                    })))
                },
            )
            .await?;
        tracing::info!("challenge {} signalled at {}", challenge.kind, challenge.url);
        Ok(())
    }
}

fn parse_resource(json: Option<serde_json::Value>, url: &str) -> Result<AuthzResource> {
    let value =
        json.ok_or_else(|| AcmeError::malformed(format!("authorization {} has no JSON body", url)))?;
    serde_json::from_value(value)
        .map_err(|e| AcmeError::malformed(format!("authorization {}: {}", url, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_authz(status: &str) -> AuthzResource {
        serde_json::from_value(json!({
            "identifier": {"type": "dns", "value": "a.test"},
            "status": status,
            "expires": "2030-01-01T00:00:00Z",
            "challenges": [
                {"type": "http-01", "token": "tok1", "uri": "https://ca.test/chal/1"},
                {"type": "dns-01", "token": "tok2", "url": "https://ca.test/chal/2"}
            ]
        }))
        .unwrap()
    }

    #[test]
    fn test_resource_parsing_accepts_uri_alias() {
        let resource = wire_authz("pending");
        assert_eq!(resource.identifier.value, "a.test");
        assert_eq!(resource.challenges[0].url, "https://ca.test/chal/1");
        assert_eq!(resource.challenges[1].url, "https://ca.test/chal/2");
    }

    #[test]
    fn test_status_defaults_to_pending() {
        let resource: AuthzResource = serde_json::from_value(json!({
            "identifier": {"type": "dns", "value": "a.test"}
        }))
        .unwrap();
        assert_eq!(resource.status, AuthzStatus::Pending);
    }

    #[test]
    fn test_terminal_states() {
        assert!(AuthzStatus::Invalid.is_failure());
        assert!(AuthzStatus::Revoked.is_failure());
        assert!(AuthzStatus::Expired.is_failure());
        assert!(!AuthzStatus::Pending.is_failure());
        assert!(!AuthzStatus::Valid.is_failure());
    }

    #[test]
    fn test_update_keeps_challenge_dir() {
        let mut authz =
            Authorization::from_resource("https://ca.test/authz/1", wire_authz("pending"));
        authz.challenge_dir = Some("http-01/a.test".to_string());
        authz.update_from(wire_authz("valid"));
        assert_eq!(authz.status, AuthzStatus::Valid);
        assert_eq!(authz.challenge_dir.as_deref(), Some("http-01/a.test"));
    }

    #[test]
    fn test_expiry() {
        let mut authz =
            Authorization::from_resource("https://ca.test/authz/1", wire_authz("valid"));
        assert!(!authz.is_expired());
        authz.expires = Some("2001-01-01T00:00:00Z".parse().unwrap());
        assert!(authz.is_expired());
        assert!(authz.is_unusable());
    }

    #[tokio::test]
    async fn test_set_persistence_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::FileStore::new(dir.path());

        assert!(AuthzSet::load(&store, "a.test").await.unwrap().is_none());

        let mut set = AuthzSet::new("1");
        set.put(Authorization::from_resource(
            "https://ca.test/authz/1",
            wire_authz("pending"),
        ));
        set.save(&store, "a.test").await.unwrap();

        let loaded = AuthzSet::load(&store, "a.test").await.unwrap().unwrap();
        assert_eq!(loaded.account, "1");
        assert_eq!(loaded.authzs.len(), 1);
        assert_eq!(loaded.get("a.test").unwrap().status, AuthzStatus::Pending);
    }

    #[test]
    fn test_put_replaces_by_domain() {
        let mut set = AuthzSet::new("1");
        set.put(Authorization::from_resource("https://ca.test/authz/1", wire_authz("pending")));
        set.put(Authorization::from_resource("https://ca.test/authz/2", wire_authz("valid")));
        assert_eq!(set.authzs.len(), 1);
        assert_eq!(set.get("a.test").unwrap().url, "https://ca.test/authz/2");
    }
}

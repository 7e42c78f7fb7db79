/// Account selection, validation, registration, and TOS handling
use serde_json::json;

use super::{Account, AccountStatus};
use crate::client::AcmeClient;
use crate::crypto::AccountKey;
use crate::error::{AcmeError, Result};
use crate::store::{Group, Store};
use crate::types::{CancelToken, ManagedDomain};

/// An account chosen for a driver run, with its key in memory.
pub struct AccountSession {
    /// Account metadata as persisted
    pub account: Account,
    /// Private key backing the session
    pub key: AccountKey,
    /// Terms-of-service URL the CA linked on the last response, if any
    pub current_tos: Option<String>,
}

impl AccountSession {
    /// Account URL, the `kid` for signed requests.
    pub fn kid(&self) -> &str {
        &self.account.url
    }
}

/// Drives the account part of a run: reuse the domain's account if it is
/// still good, fall back to any other local account for the same CA,
/// register a new one as a last resort.
pub struct AccountManager<'a> {
    client: &'a AcmeClient,
    store: &'a dyn Store,
    cancel: &'a CancelToken,
}

impl<'a> AccountManager<'a> {
    /// Create a manager bound to one CA session and store
    pub fn new(client: &'a AcmeClient, store: &'a dyn Store, cancel: &'a CancelToken) -> Self {
        Self {
            client,
            store,
            cancel,
        }
    }

    /// Choose an account for the managed domain. `md.ca_account` is
    /// updated in place; the caller persists the record.
    pub async fn select(&self, md: &mut ManagedDomain) -> Result<AccountSession> {
        // Reuse the account recorded on the domain, if it still checks out
        if let Some(id) = md.ca_account.clone() {
            tracing::debug!("{}: checking previous account {}", md.name, id);
            match self.load_and_validate(&id, &md.ca_url).await? {
                Some(session) => return Ok(session),
                None => md.ca_account = None,
            }
        }

        // Any other local account registered at the same CA
        tracing::debug!("{}: looking at existing accounts", md.name);
        for id in self.store.names(Group::Accounts, "*").await? {
            if let Some(session) = self.load_and_validate(&id, &md.ca_url).await? {
                md.ca_account = Some(session.account.id.clone());
                return Ok(session);
            }
        }

        // No usable account, register a new one
        tracing::debug!("{}: creating new account", md.name);
        if md.contacts.is_empty() {
            return Err(AcmeError::InvalidContact(format!(
                "no contact information for managed domain {}",
                md.name
            )));
        }
        let session = self
            .register(&md.ca_url, &md.contacts, md.ca_agreement.as_deref())
            .await?;
        md.ca_account = Some(session.account.id.clone());
        Ok(session)
    }

    /// Load a stored account and validate it against the CA. Returns
    /// `None` when the account is unusable (missing, disabled, wrong CA,
    /// or rejected by the server, in which case it is disabled locally).
    async fn load_and_validate(&self, id: &str, ca_url: &str) -> Result<Option<AccountSession>> {
        let (account, key) = match Account::load(self.store, id).await {
            Ok(loaded) => loaded,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        if !account.is_valid() || account.ca_url != ca_url {
            return Ok(None);
        }

        let mut session = AccountSession {
            account,
            key,
            current_tos: None,
        };
        match self.validate(&mut session).await {
            Ok(()) => Ok(Some(session)),
            Err(AcmeError::Unauthorized(_)) | Err(AcmeError::NotFound(_)) => {
                self.disable(&mut session.account).await?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// POST a no-op update to the account URL; success means the CA
    /// still accepts the account.
    pub async fn validate(&self, session: &mut AccountSession) -> Result<()> {
        let url = session.account.url.clone();
        let response = self
            .client
            .post_signed(&url, &session.key, Some(url.as_str()), self.cancel, || {
                Ok(Some(json!({"resource": "reg"})))
            })
            .await?;
        if let Some(tos) = response.link("terms-of-service") {
            session.current_tos = Some(tos);
        }
        tracing::debug!("account {} validated", session.account.id);
        Ok(())
    }

    /// Flip the persisted status to disabled. Kept for audit, never
    /// deleted.
    pub async fn disable(&self, account: &mut Account) -> Result<()> {
        tracing::info!("disabling account {} at {}", account.id, account.ca_url);
        account.status = AccountStatus::Disabled;
        account.save(self.store, false).await
    }

    /// Register a new account at the CA and persist it.
    pub async fn register(
        &self,
        ca_url: &str,
        contacts: &[String],
        agreement: Option<&str>,
    ) -> Result<AccountSession> {
        if contacts.is_empty() {
            return Err(AcmeError::InvalidContact("registration without contacts".into()));
        }

        let key = AccountKey::generate()?;
        let directory = self.client.directory().await?;
        let contacts_owned = contacts.to_vec();
        let agreement_owned = agreement.map(|s| s.to_string());

        let response = self
            .client
            .post_signed(&directory.new_reg, &key, None, self.cancel, || {
                let mut payload = json!({
                    "resource": "new-reg",
                    "contact": contacts_owned,
                });
                if let Some(tos) = &agreement_owned {
                    payload["agreement"] = json!(tos);
                }
                Ok(Some(payload))
            })
            .await?;

        let url = response.location().ok_or_else(|| {
            AcmeError::malformed(format!("registration at {} returned no Location", directory.new_reg))
        })?;
        let current_tos = response.link("terms-of-service");

        let id = self.free_id(&url).await?;
        let account = Account {
            id,
            url,
            ca_url: ca_url.to_string(),
            jwk: key.jwk()?,
            contacts: contacts.to_vec(),
            agreement: agreement.map(|s| s.to_string()),
            status: AccountStatus::Valid,
        };
        account.save_with_key(self.store, &key).await?;
        tracing::info!("registered account {} at {}", account.id, account.url);

        Ok(AccountSession {
            account,
            key,
            current_tos,
        })
    }

    /// Compare the CA's current TOS with what the account accepted;
    /// agree automatically when the operator pre-approved exactly that
    /// URL, fail `UserActionRequired` otherwise.
    pub async fn check_agreement(
        &self,
        session: &mut AccountSession,
        approved: Option<&str>,
    ) -> Result<()> {
        let directory = self.client.directory().await?;
        let current = directory
            .terms_of_service()
            .map(|s| s.to_string())
            .or_else(|| session.current_tos.clone());

        let Some(current) = current else {
            // CA advertises no terms of service
            return Ok(());
        };
        if session.account.agreement.as_deref() == Some(current.as_str()) {
            return Ok(());
        }
        if approved != Some(current.as_str()) {
            return Err(AcmeError::UserActionRequired(format!(
                "CA requires agreement to {}, operator approved {}",
                current,
                approved.unwrap_or("none")
            )));
        }

        let url = session.account.url.clone();
        let tos = current.clone();
        self.client
            .post_signed(&url, &session.key, Some(url.as_str()), self.cancel, || {
                Ok(Some(json!({"resource": "reg", "agreement": tos})))
            })
            .await?;
        session.account.agreement = Some(current);
        session.account.save(self.store, false).await?;
        tracing::info!("account {} agreed to updated terms of service", session.account.id);
        Ok(())
    }

    /// Derive a free local id from the account URL tail.
    async fn free_id(&self, url: &str) -> Result<String> {
        let tail: String = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or("acct")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            .collect();
        let base = if tail.is_empty() { "acct".to_string() } else { tail };

        let taken = self.store.names(Group::Accounts, "*").await?;
        if !taken.contains(&base) {
            return Ok(base);
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}-{}", base, n);
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }
}

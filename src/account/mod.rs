/// CA account records and their persistence
pub mod manager;

pub use manager::{AccountManager, AccountSession};

use serde::{Deserialize, Serialize};

use crate::crypto::AccountKey;
use crate::error::Result;
use crate::protocol::Jwk;
use crate::store::{Group, Store, aspect, load_json, save_json};

/// Account status. Accounts the CA no longer accepts are disabled, never
/// deleted, so the audit trail survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Valid,
    Disabled,
}

/// A CA account as persisted under `accounts/<id>`.
///
/// The private key lives in a separate aspect (`account.pem`) and never
/// leaves the store once written; `jwk` is derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Local identifier, the store name
    pub id: String,

    /// CA-assigned account URL, the `kid` of all signed requests
    pub url: String,

    /// Directory URL of the CA this account belongs to
    pub ca_url: String,

    /// Public key in JWK form
    pub jwk: Jwk,

    /// Contact URIs
    #[serde(default)]
    pub contacts: Vec<String>,

    /// Terms-of-service URL the account holder accepted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreement: Option<String>,

    /// Account status
    pub status: AccountStatus,
}

impl Account {
    /// Whether the account is locally usable
    pub fn is_valid(&self) -> bool {
        self.status == AccountStatus::Valid
    }

    /// Load an account and its key from the store.
    pub async fn load(store: &dyn Store, id: &str) -> Result<(Account, AccountKey)> {
        let account: Account = load_json(store, Group::Accounts, id, aspect::ACCOUNT).await?;
        let pem_raw = store.load(Group::Accounts, id, aspect::ACCOUNT_KEY).await?;
        let pem_text = String::from_utf8(pem_raw)
            .map_err(|_| crate::error::AcmeError::storage(format!("account {} key is not UTF-8", id)))?;
        let key = AccountKey::from_pkcs8_pem(&pem_text)?;
        Ok((account, key))
    }

    /// Persist the metadata aspect.
    pub async fn save(&self, store: &dyn Store, create: bool) -> Result<()> {
        save_json(store, Group::Accounts, &self.id, aspect::ACCOUNT, self, create).await
    }

    /// Persist metadata and key together; used once at registration.
    pub async fn save_with_key(&self, store: &dyn Store, key: &AccountKey) -> Result<()> {
        self.save(store, true).await?;
        store
            .save(
                Group::Accounts,
                &self.id,
                aspect::ACCOUNT_KEY,
                key.to_pkcs8_pem().as_bytes(),
                true,
            )
            .await
    }
}

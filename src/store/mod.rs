/// Persistent store: group/name/aspect keyed artifacts
pub mod file;

pub use file::FileStore;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{AcmeError, Result};

/// Top-level partitions of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    /// CA accounts and their keys
    Accounts,
    /// Published challenge response artifacts
    Challenges,
    /// Authoritative per-domain data (records, keys, certificates)
    Domains,
    /// In-progress state, authoritative only on completion
    Staging,
}

impl Group {
    /// Directory name of the group in file-backed stores
    pub fn dirname(&self) -> &'static str {
        match self {
            Group::Accounts => "accounts",
            Group::Challenges => "challenges",
            Group::Domains => "domains",
            Group::Staging => "staging",
        }
    }
}

/// Aspect names used by the driver.
pub mod aspect {
    /// Account metadata
    pub const ACCOUNT: &str = "account.json";
    /// Account private key (PKCS#8 PEM)
    pub const ACCOUNT_KEY: &str = "account.pem";
    /// Managed domain record
    pub const MD: &str = "md.json";
    /// In-flight order record
    pub const ORDER: &str = "order.json";
    /// Authorization set
    pub const AUTHZS: &str = "authorizations.json";
    /// Leaf certificate (PEM)
    pub const CERT: &str = "cert.pem";
    /// Issuer chain (PEM)
    pub const CHAIN: &str = "chain.pem";
    /// Domain private key (PEM)
    pub const PKEY: &str = "privkey.pem";
}

/// Store contract consumed by the driver.
///
/// All writes are keyed by `(group, name, aspect)`; names may contain
/// `/` separators (challenge directories do). `save` with `create` fails
/// with `Exists` when the aspect is already present; `remove` with
/// `force` succeeds on missing aspects; `purge` removes a whole name.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load an aspect; `NotFound` on miss.
    async fn load(&self, group: Group, name: &str, aspect: &str) -> Result<Vec<u8>>;

    /// Save an aspect. With `create`, fail `Exists` if already present.
    async fn save(
        &self,
        group: Group,
        name: &str,
        aspect: &str,
        data: &[u8],
        create: bool,
    ) -> Result<()>;

    /// Remove one aspect. Without `force`, a miss is `NotFound`.
    async fn remove(&self, group: Group, name: &str, aspect: &str, force: bool) -> Result<()>;

    /// Remove everything stored under a name in a group. Missing names
    /// are not an error.
    async fn purge(&self, group: Group, name: &str) -> Result<()>;

    /// Names present in a group, filtered by a `*` wildcard pattern,
    /// sorted. The inspection loop over these names replaces a callback
    /// iterator.
    async fn names(&self, group: Group, pattern: &str) -> Result<Vec<String>>;

    /// Move a name between groups, e.g. staging to domains. With
    /// `archive`, an existing destination is renamed aside instead of
    /// replaced.
    async fn move_name(&self, from: Group, to: Group, name: &str, archive: bool) -> Result<()>;
}

/// Load and deserialize a JSON aspect.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn Store,
    group: Group,
    name: &str,
    aspect: &str,
) -> Result<T> {
    let raw = store.load(group, name, aspect).await?;
    serde_json::from_slice(&raw).map_err(|e| {
        AcmeError::storage(format!("{}/{}/{}: {}", group.dirname(), name, aspect, e))
    })
}

/// Serialize and save a JSON aspect.
pub async fn save_json<T: Serialize>(
    store: &dyn Store,
    group: Group,
    name: &str,
    aspect: &str,
    value: &T,
    create: bool,
) -> Result<()> {
    let raw = serde_json::to_vec_pretty(value)?;
    store.save(group, name, aspect, &raw, create).await
}

/// Match a name against a pattern where `*` spans any run of
/// characters, including `/`.
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    fn matches(p: &[u8], n: &[u8]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                matches(&p[1..], n) || (!n.is_empty() && matches(p, &n[1..]))
            }
            (Some(pc), Some(nc)) if pc == nc => matches(&p[1..], &n[1..]),
            _ => false,
        }
    }
    matches(pattern.as_bytes(), name.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_dirnames() {
        assert_eq!(Group::Accounts.dirname(), "accounts");
        assert_eq!(Group::Staging.dirname(), "staging");
    }

    #[test]
    fn test_pattern_matching() {
        assert!(pattern_matches("*", "anything/at/all"));
        assert!(pattern_matches("http-01/*", "http-01/a.test"));
        assert!(!pattern_matches("http-01/*", "dns-01/a.test"));
        assert!(pattern_matches("*.test", "a.test"));
        assert!(pattern_matches("a.test", "a.test"));
        assert!(!pattern_matches("a.test", "b.test"));
        assert!(pattern_matches("*-01/*", "tls-alpn-01/a.test"));
    }
}

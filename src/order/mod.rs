/// Order records: restart-safe glue between authorizations and finalization
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{Group, Store, aspect, load_json, save_json};

/// Local record tying one managed domain's authorizations and published
/// challenge directories together.
///
/// Saved into staging before any externally observable step it records,
/// so a restarted run resumes from the same URLs instead of re-creating
/// resources. Removed, together with its challenge directories, only on
/// successful completion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Order {
    /// Order URL, for protocol versions that have one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Authorization URLs in domain order
    #[serde(rename = "authorizations", default)]
    pub authz_urls: Vec<String>,

    /// Challenge directories to purge after completion
    #[serde(rename = "challenge-dirs", default)]
    pub challenge_dirs: Vec<String>,

    /// Finalization URL, when the CA separates it from new-cert
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize_url: Option<String>,
}

impl Order {
    /// Record an authorization URL, ignoring duplicates
    pub fn add_authz(&mut self, url: &str) {
        if !self.authz_urls.iter().any(|u| u == url) {
            self.authz_urls.push(url.to_string());
        }
    }

    /// Forget an authorization URL
    pub fn remove_authz(&mut self, url: &str) {
        self.authz_urls.retain(|u| u != url);
    }

    /// Record a challenge directory, ignoring duplicates
    pub fn add_challenge_dir(&mut self, dir: &str) {
        if !self.challenge_dirs.iter().any(|d| d == dir) {
            self.challenge_dirs.push(dir.to_string());
        }
    }

    /// Load the persisted order for a managed domain, if any.
    pub async fn load(store: &dyn Store, md_name: &str) -> Result<Option<Order>> {
        match load_json(store, Group::Staging, md_name, aspect::ORDER).await {
            Ok(order) => Ok(Some(order)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Persist under the managed domain's staging name.
    pub async fn save(&self, store: &dyn Store, md_name: &str) -> Result<()> {
        save_json(store, Group::Staging, md_name, aspect::ORDER, self, false).await
    }

    /// Delete every recorded challenge directory and the order record
    /// itself. Called after the certificate is safely persisted.
    pub async fn purge(store: &dyn Store, md_name: &str) -> Result<()> {
        if let Some(order) = Order::load(store, md_name).await? {
            for dir in &order.challenge_dirs {
                tracing::debug!("{}: purging challenge dir {}", md_name, dir);
                store.purge(Group::Challenges, dir).await?;
            }
        }
        store.remove(Group::Staging, md_name, aspect::ORDER, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileStore;

    #[test]
    fn test_dedup() {
        let mut order = Order::default();
        order.add_authz("https://ca.test/authz/1");
        order.add_authz("https://ca.test/authz/1");
        order.add_authz("https://ca.test/authz/2");
        assert_eq!(order.authz_urls.len(), 2);

        order.add_challenge_dir("http-01/a.test");
        order.add_challenge_dir("http-01/a.test");
        assert_eq!(order.challenge_dirs, vec!["http-01/a.test"]);

        order.remove_authz("https://ca.test/authz/1");
        assert_eq!(order.authz_urls, vec!["https://ca.test/authz/2"]);
    }

    #[test]
    fn test_persisted_key_names() {
        let mut order = Order::default();
        order.add_authz("https://ca.test/authz/1");
        order.add_challenge_dir("http-01/a.test");
        let json = serde_json::to_value(&order).unwrap();
        assert!(json.get("authorizations").is_some());
        assert!(json.get("challenge-dirs").is_some());
    }

    #[tokio::test]
    async fn test_load_save_purge() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        assert!(Order::load(&store, "a.test").await.unwrap().is_none());

        let mut order = Order::default();
        order.add_authz("https://ca.test/authz/1");
        order.add_challenge_dir("http-01/a.test");
        order.save(&store, "a.test").await.unwrap();

        // the recorded challenge dir has published content
        store
            .save(Group::Challenges, "http-01/a.test", "tok1", b"ka", false)
            .await
            .unwrap();

        let loaded = Order::load(&store, "a.test").await.unwrap().unwrap();
        assert_eq!(loaded.authz_urls, vec!["https://ca.test/authz/1"]);

        Order::purge(&store, "a.test").await.unwrap();
        assert!(Order::load(&store, "a.test").await.unwrap().is_none());
        assert!(store.names(Group::Challenges, "*").await.unwrap().is_empty());

        // purging with no order present is fine
        Order::purge(&store, "a.test").await.unwrap();
    }
}

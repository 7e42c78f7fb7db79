/// Registry of managed domain records
use std::sync::Arc;

use crate::error::{AcmeError, Result};
use crate::store::{Group, Store, aspect, load_json, save_json};
use crate::types::ManagedDomain;

/// Persisted managed-domain records, one `md.json` per name in the
/// domains group.
pub struct MdRegistry {
    store: Arc<dyn Store>,
}

impl MdRegistry {
    /// Create a registry over the given store
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Add a new managed domain. Fails `Exists` when the name is taken
    /// or any DNS name is already covered by another record.
    pub async fn add(&self, md: &ManagedDomain) -> Result<()> {
        for existing in self.list().await? {
            if existing.overlaps(md) {
                return Err(AcmeError::exists(format!(
                    "domains of '{}' overlap with managed domain '{}'",
                    md.name, existing.name
                )));
            }
        }
        save_json(self.store.as_ref(), Group::Domains, &md.name, aspect::MD, md, true).await
    }

    /// Load a record by name
    pub async fn get(&self, name: &str) -> Result<ManagedDomain> {
        load_json(self.store.as_ref(), Group::Domains, name, aspect::MD).await
    }

    /// Persist an updated record
    pub async fn update(&self, md: &ManagedDomain) -> Result<()> {
        save_json(self.store.as_ref(), Group::Domains, &md.name, aspect::MD, md, false).await
    }

    /// All records, sorted by name
    pub async fn list(&self) -> Result<Vec<ManagedDomain>> {
        let mut records = Vec::new();
        for name in self.store.names(Group::Domains, "*").await? {
            match self.get(&name).await {
                Ok(md) => records.push(md),
                // A domains entry without md.json is cert-only leftovers
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            }
        }
        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileStore;

    fn registry() -> (tempfile::TempDir, MdRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = MdRegistry::new(Arc::new(FileStore::new(dir.path())));
        (dir, registry)
    }

    fn md(domains: &[&str]) -> ManagedDomain {
        ManagedDomain::new(
            domains.iter().map(|d| d.to_string()).collect(),
            "https://ca.test/dir",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_add_get_update() {
        let (_dir, registry) = registry();
        let mut record = md(&["a.test", "www.a.test"]);
        registry.add(&record).await.unwrap();

        let loaded = registry.get("a.test").await.unwrap();
        assert_eq!(loaded.domains, vec!["a.test", "www.a.test"]);
        assert!(loaded.ca_account.is_none());

        record.ca_account = Some("1".into());
        registry.update(&record).await.unwrap();
        assert_eq!(registry.get("a.test").await.unwrap().ca_account.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_add_rejects_overlap() {
        let (_dir, registry) = registry();
        registry.add(&md(&["a.test"])).await.unwrap();

        let err = registry.add(&md(&["b.test", "a.test"])).await.unwrap_err();
        assert!(matches!(err, AcmeError::Exists(_)));

        // same name twice is also a create conflict
        let err = registry.add(&md(&["a.test"])).await.unwrap_err();
        assert!(matches!(err, AcmeError::Exists(_)));
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let (_dir, registry) = registry();
        registry.add(&md(&["b.test"])).await.unwrap();
        registry.add(&md(&["a.test"])).await.unwrap();
        let names: Vec<String> =
            registry.list().await.unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["a.test", "b.test"]);
    }
}

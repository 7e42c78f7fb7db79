/// File system store backend
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{Group, Store, pattern_matches};
use crate::error::{AcmeError, Result};

/// Store rooted at a base directory, laid out as
/// `<base>/<group>/<name>/<aspect>`.
pub struct FileStore {
    base: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `base`; directories are created lazily.
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    /// Base directory of the store
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn name_path(&self, group: Group, name: &str) -> Result<PathBuf> {
        check_component(name)?;
        Ok(self.base.join(group.dirname()).join(name))
    }

    fn aspect_path(&self, group: Group, name: &str, aspect: &str) -> Result<PathBuf> {
        check_component(aspect)?;
        Ok(self.name_path(group, name)?.join(aspect))
    }
}

/// Reject path components that would escape the store.
fn check_component(value: &str) -> Result<()> {
    if value.is_empty()
        || value.starts_with('/')
        || value.split('/').any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(AcmeError::storage(format!("invalid store path component '{}'", value)));
    }
    Ok(())
}

#[async_trait]
impl Store for FileStore {
    async fn load(&self, group: Group, name: &str, aspect: &str) -> Result<Vec<u8>> {
        let path = self.aspect_path(group, name, aspect)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(AcmeError::not_found(format!("{}/{}/{}", group.dirname(), name, aspect)))
            }
            Err(e) => Err(AcmeError::storage(format!("read {}: {}", path.display(), e))),
        }
    }

    async fn save(
        &self,
        group: Group,
        name: &str,
        aspect: &str,
        data: &[u8],
        create: bool,
    ) -> Result<()> {
        let path = self.aspect_path(group, name, aspect)?;
        if create && fs::try_exists(&path).await.unwrap_or(false) {
            return Err(AcmeError::exists(format!("{}/{}/{}", group.dirname(), name, aspect)));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AcmeError::storage(format!("mkdir {}: {}", parent.display(), e)))?;
        }
        fs::write(&path, data)
            .await
            .map_err(|e| AcmeError::storage(format!("write {}: {}", path.display(), e)))
    }

    async fn remove(&self, group: Group, name: &str, aspect: &str, force: bool) -> Result<()> {
        let path = self.aspect_path(group, name, aspect)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if force {
                    Ok(())
                } else {
                    Err(AcmeError::not_found(format!("{}/{}/{}", group.dirname(), name, aspect)))
                }
            }
            Err(e) => Err(AcmeError::storage(format!("remove {}: {}", path.display(), e))),
        }
    }

    async fn purge(&self, group: Group, name: &str) -> Result<()> {
        let path = self.name_path(group, name)?;
        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AcmeError::storage(format!("purge {}: {}", path.display(), e))),
        }
    }

    async fn names(&self, group: Group, pattern: &str) -> Result<Vec<String>> {
        let root = self.base.join(group.dirname());
        if !fs::try_exists(&root).await.unwrap_or(false) {
            return Ok(Vec::new());
        }

        // Names are the directories that directly contain files; walk
        // iteratively since names may nest (challenge dirs do).
        let mut found = BTreeSet::new();
        let mut pending = vec![root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir)
                .await
                .map_err(|e| AcmeError::storage(format!("list {}: {}", dir.display(), e)))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| AcmeError::storage(format!("list {}: {}", dir.display(), e)))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| AcmeError::storage(format!("stat {}: {}", path.display(), e)))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if let Ok(rel) = dir.strip_prefix(&root) {
                    let name = rel.to_string_lossy().replace('\\', "/");
                    if !name.is_empty() && pattern_matches(pattern, &name) {
                        found.insert(name);
                    }
                }
            }
        }
        Ok(found.into_iter().collect())
    }

    async fn move_name(&self, from: Group, to: Group, name: &str, archive: bool) -> Result<()> {
        let src = self.name_path(from, name)?;
        let dst = self.name_path(to, name)?;
        if !fs::try_exists(&src).await.unwrap_or(false) {
            return Err(AcmeError::not_found(format!("{}/{}", from.dirname(), name)));
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AcmeError::storage(format!("mkdir {}: {}", parent.display(), e)))?;
        }
        if fs::try_exists(&dst).await.unwrap_or(false) {
            if archive {
                let mut n = 1;
                loop {
                    let aside = dst.with_file_name(format!(
                        "{}.archive.{}",
                        dst.file_name().unwrap_or_default().to_string_lossy(),
                        n
                    ));
                    if !fs::try_exists(&aside).await.unwrap_or(false) {
                        fs::rename(&dst, &aside).await.map_err(|e| {
                            AcmeError::storage(format!("archive {}: {}", dst.display(), e))
                        })?;
                        break;
                    }
                    n += 1;
                }
            } else {
                fs::remove_dir_all(&dst).await.map_err(|e| {
                    AcmeError::storage(format!("replace {}: {}", dst.display(), e))
                })?;
            }
        }
        fs::rename(&src, &dst)
            .await
            .map_err(|e| AcmeError::storage(format!("move {} -> {}: {}", src.display(), dst.display(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::aspect;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn test_save_load_remove() {
        let (_dir, store) = store();
        store
            .save(Group::Domains, "a.test", aspect::MD, b"{}", false)
            .await
            .unwrap();
        assert_eq!(store.load(Group::Domains, "a.test", aspect::MD).await.unwrap(), b"{}");

        store.remove(Group::Domains, "a.test", aspect::MD, false).await.unwrap();
        assert!(
            store
                .load(Group::Domains, "a.test", aspect::MD)
                .await
                .unwrap_err()
                .is_not_found()
        );
    }

    #[tokio::test]
    async fn test_create_fails_on_existing() {
        let (_dir, store) = store();
        store
            .save(Group::Accounts, "42", aspect::ACCOUNT, b"one", true)
            .await
            .unwrap();
        let err = store
            .save(Group::Accounts, "42", aspect::ACCOUNT, b"two", true)
            .await
            .unwrap_err();
        assert!(matches!(err, AcmeError::Exists(_)));

        // non-create overwrite is fine
        store
            .save(Group::Accounts, "42", aspect::ACCOUNT, b"two", false)
            .await
            .unwrap();
        assert_eq!(store.load(Group::Accounts, "42", aspect::ACCOUNT).await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_force_remove_on_missing() {
        let (_dir, store) = store();
        assert!(store.remove(Group::Domains, "gone", aspect::MD, true).await.is_ok());
        assert!(store.remove(Group::Domains, "gone", aspect::MD, false).await.is_err());
    }

    #[tokio::test]
    async fn test_purge_removes_all_aspects() {
        let (_dir, store) = store();
        store
            .save(Group::Challenges, "http-01/a.test", "tok1", b"ka", false)
            .await
            .unwrap();
        store
            .save(Group::Challenges, "http-01/a.test", "tok2", b"ka", false)
            .await
            .unwrap();
        store.purge(Group::Challenges, "http-01/a.test").await.unwrap();
        assert!(store.names(Group::Challenges, "*").await.unwrap().is_empty());
        // purging again is not an error
        store.purge(Group::Challenges, "http-01/a.test").await.unwrap();
    }

    #[tokio::test]
    async fn test_names_with_nesting_and_pattern() {
        let (_dir, store) = store();
        store.save(Group::Accounts, "1", aspect::ACCOUNT, b"{}", false).await.unwrap();
        store.save(Group::Accounts, "2", aspect::ACCOUNT, b"{}", false).await.unwrap();
        store
            .save(Group::Challenges, "http-01/a.test", "tok1", b"ka", false)
            .await
            .unwrap();
        store
            .save(Group::Challenges, "dns-01/b.test", "b.test.dns", b"d", false)
            .await
            .unwrap();

        assert_eq!(store.names(Group::Accounts, "*").await.unwrap(), vec!["1", "2"]);
        assert_eq!(
            store.names(Group::Challenges, "http-01/*").await.unwrap(),
            vec!["http-01/a.test"]
        );
        assert_eq!(
            store.names(Group::Challenges, "*").await.unwrap(),
            vec!["dns-01/b.test", "http-01/a.test"]
        );
    }

    #[tokio::test]
    async fn test_move_between_groups() {
        let (_dir, store) = store();
        store.save(Group::Staging, "a.test", aspect::MD, b"staged", false).await.unwrap();
        store.move_name(Group::Staging, Group::Domains, "a.test", false).await.unwrap();
        assert_eq!(store.load(Group::Domains, "a.test", aspect::MD).await.unwrap(), b"staged");
        assert!(store.names(Group::Staging, "*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_path_escape_rejected() {
        let (_dir, store) = store();
        assert!(store.load(Group::Domains, "../evil", aspect::MD).await.is_err());
        assert!(store.load(Group::Domains, "a.test", "../../md.json").await.is_err());
        assert!(store.load(Group::Domains, "/abs", aspect::MD).await.is_err());
    }
}

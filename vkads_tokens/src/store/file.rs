//! A token store persisted to a local file

use std::{
    collections::BTreeMap,
    ffi::OsString,
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{fs::OpenOptions, sync::Mutex};
use vkads_clock::{Clock, DurationSecs, System, UnixTime};

use super::TokenStore;
use crate::error::StoreError;

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<UnixTime>,
}

type Entries = BTreeMap<String, FileEntry>;

/// A token store holding all entries in a single JSON document on disk
///
/// This lets short-lived processes, such as CLI invocations, reuse a token
/// issued by an earlier run. Expired entries are ignored when read and dropped
/// the next time the file is written. On Unix the file is created readable by
/// its owner only.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// document, so readers never observe a partial write. A document that cannot
/// be decoded is reported by [`get`](TokenStore::get) and replaced by the next
/// write.
#[derive(Debug)]
pub struct FileTokenStore<C = System> {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process
    lock: Mutex<()>,
    clock: C,
}

impl FileTokenStore<System> {
    /// Constructs a store backed by the file at `path`
    ///
    /// The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            clock: System,
        }
    }
}

impl<C> FileTokenStore<C> {
    /// Sets a custom clock to be used for expiry
    pub fn with_clock<D>(self, clock: D) -> FileTokenStore<D> {
        FileTokenStore {
            path: self.path,
            lock: self.lock,
            clock,
        }
    }

    async fn read_entries(&self) -> Result<Entries, StoreError> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(Entries::new()),
            Err(error) => return Err(error.into()),
        };

        let mut data = String::new();
        file.read_to_string(&mut data).await?;
        if data.trim().is_empty() {
            return Ok(Entries::new());
        }

        Ok(serde_json::from_str(&data)?)
    }

    /// Reads the entries ahead of a write, discarding an undecodable document
    ///
    /// The flag is set when the document was discarded and must be rewritten.
    async fn read_entries_for_update(&self) -> Result<(Entries, bool), StoreError> {
        match self.read_entries().await {
            Ok(entries) => Ok((entries, false)),
            Err(StoreError::Corrupt(error)) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = &error as &dyn std::error::Error,
                    "discarding undecodable token file"
                );
                Ok((Entries::new(), true))
            }
            Err(error) => Err(error),
        }
    }

    async fn write_entries(&self, entries: &Entries) -> Result<(), StoreError> {
        use tokio::io::AsyncWriteExt;

        let data = serde_json::to_string_pretty(entries)?;
        let tmp_path = temporary_path(&self.path);

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let written = async {
            let mut file = file_opts.open(&tmp_path).await?;
            file.write_all(data.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            tokio::fs::rename(&tmp_path, &self.path).await
        }
        .await;

        if let Err(error) = written {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(error.into());
        }
        Ok(())
    }
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_default());
    name.push(".tmp");
    path.with_file_name(name)
}

impl<C: Clock> FileTokenStore<C> {
    fn prune(&self, entries: &mut Entries) {
        let now = self.clock.now();
        entries.retain(|_, e| e.expires_at.map_or(true, |at| now < at));
    }
}

#[async_trait]
impl<C: Clock + Send + Sync> TokenStore for FileTokenStore<C> {
    async fn put(
        &self,
        key: &str,
        value: String,
        ttl: Option<DurationSecs>,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let (mut entries, _) = self.read_entries_for_update().await?;
        self.prune(&mut entries);

        let expires_at = ttl.map(|ttl| self.clock.now() + ttl);
        entries.insert(key.to_owned(), FileEntry { value, expires_at });

        self.write_entries(&entries).await?;
        tracing::trace!(path = %self.path.display(), key, "persisted entry to file");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().await;
        let mut entries = self.read_entries().await?;
        self.prune(&mut entries);
        Ok(entries.remove(key).map(|e| e.value))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let (mut entries, discarded) = self.read_entries_for_update().await?;
        if entries.remove(key).is_some() || discarded {
            self.prune(&mut entries);
            self.write_entries(&entries).await?;
        }
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> Result<usize, StoreError> {
        let _guard = self.lock.lock().await;
        let (mut entries, discarded) = self.read_entries_for_update().await?;
        self.prune(&mut entries);

        let before = entries.len();
        entries.retain(|key, _| !key.contains(pattern));
        let removed = before - entries.len();

        if removed > 0 || discarded {
            self.write_entries(&entries).await?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use vkads_clock::TestClock;

    use super::*;

    #[tokio::test]
    async fn entries_survive_a_new_store_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let first = FileTokenStore::new(&path);
        first
            .put("vk_ads_token", "{}".into(), Some(DurationSecs(60)))
            .await
            .unwrap();

        let second = FileTokenStore::new(&path);
        assert_eq!(
            second.get("vk_ads_token").await.unwrap().as_deref(),
            Some("{}")
        );
    }

    #[tokio::test]
    async fn missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::new(dir.path().join("absent.json"));

        assert_eq!(store.get("k").await.unwrap(), None);
        store.delete("k").await.unwrap();
        assert_eq!(store.delete_by_pattern("k").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn expired_entries_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let clock = TestClock::new(UnixTime(100));
        let store = FileTokenStore::new(dir.path().join("t.json")).with_clock(clock.clone());

        store
            .put("k", "v".into(), Some(DurationSecs(5)))
            .await
            .unwrap();
        clock.advance(DurationSecs(5));

        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn pattern_deletion_rewrites_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        let store = FileTokenStore::new(&path);
        for key in ["client_1", "client_2", "vk_ads_token"] {
            store.put(key, "v".into(), None).await.unwrap();
        }

        assert_eq!(store.delete_by_pattern("client").await.unwrap(), 2);

        let reopened = FileTokenStore::new(&path);
        assert!(reopened.exists("vk_ads_token").await.unwrap());
        assert!(!reopened.exists("client_1").await.unwrap());
    }

    #[tokio::test]
    async fn garbage_on_disk_is_reported_as_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        std::fs::write(&path, "not json").unwrap();

        let err = FileTokenStore::new(&path).get("k").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(_)));
    }

    #[tokio::test]
    async fn truncated_document_is_replaced_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        std::fs::write(&path, r#"{"vk_ads_token": {"value": "x"#).unwrap();

        let store = FileTokenStore::new(&path);
        store
            .put("vk_ads_token", "fresh".into(), None)
            .await
            .unwrap();

        assert_eq!(
            store.get("vk_ads_token").await.unwrap().as_deref(),
            Some("fresh")
        );
    }

    #[tokio::test]
    async fn deleting_from_a_truncated_document_repairs_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        std::fs::write(&path, "{").unwrap();

        let store = FileTokenStore::new(&path);
        store.delete("vk_ads_token").await.unwrap();

        assert_eq!(store.get("vk_ads_token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn writes_leave_no_temporary_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        let store = FileTokenStore::new(&path);
        store.put("a", "1".into(), None).await.unwrap();
        store.put("b", "2".into(), None).await.unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![OsString::from("t.json")]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_is_private_to_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        FileTokenStore::new(&path)
            .put("k", "v".into(), None)
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

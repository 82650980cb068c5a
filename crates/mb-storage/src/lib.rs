//! Session-scoped storage shared by the pages of one browsing session.

mod auto;

pub use auto::AUTO_CONTEXT_KEY;
pub use auto::AUTO_FLAG_KEY;
pub use auto::AUTO_MAX_AGE_MS;
pub use auto::AutoContinuationStore;

use mb_core::BridgeError;
use mb_core::BridgeResult;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;

/// Session storage configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub partition_by_origin: bool,
    /// Upper bound on the UTF-8 bytes of keys plus values held by one partition.
    pub max_partition_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            partition_by_origin: true,
            max_partition_bytes: 5 * 1024 * 1024,
        }
    }
}

type PartitionMap = BTreeMap<String, BTreeMap<String, String>>;

/// In-memory `sessionStorage`. Clones share the same backing map.
#[derive(Debug, Clone, Default)]
pub struct SessionStorage {
    config: StorageConfig,
    partitions: Arc<Mutex<PartitionMap>>,
}

impl SessionStorage {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            partitions: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn set_item(&self, origin: &str, key: &str, value: &str) -> BridgeResult<()> {
        let partition = self.partition_name(origin);
        let mut partitions = self.lock()?;
        let entries = partitions.entry(partition.clone()).or_default();

        let replaced = entries
            .get(key)
            .map(|previous| key.len() + previous.len())
            .unwrap_or_default();
        let used = partition_bytes(entries);
        let projected = used - replaced + key.len() + value.len();
        if projected > self.config.max_partition_bytes {
            return Err(BridgeError::new(
                "storage.quota_exceeded",
                format!(
                    "writing `{key}` would grow partition `{partition}` to {projected} bytes (limit {})",
                    self.config.max_partition_bytes
                ),
            ));
        }

        entries.insert(key.to_owned(), value.to_owned());
        tracing::debug!(partition = %partition, key, bytes = value.len(), "session storage write");
        Ok(())
    }

    pub fn get_item(&self, origin: &str, key: &str) -> BridgeResult<Option<String>> {
        let partition = self.partition_name(origin);
        let partitions = self.lock()?;
        Ok(partitions
            .get(&partition)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    pub fn remove_item(&self, origin: &str, key: &str) -> BridgeResult<()> {
        let partition = self.partition_name(origin);
        let mut partitions = self.lock()?;
        let Some(entries) = partitions.get_mut(&partition) else {
            return Ok(());
        };

        entries.remove(key);
        if entries.is_empty() {
            partitions.remove(&partition);
        }
        Ok(())
    }

    pub fn clear(&self, origin: &str) -> BridgeResult<()> {
        let partition = self.partition_name(origin);
        self.lock()?.remove(&partition);
        Ok(())
    }

    pub fn len(&self, origin: &str) -> BridgeResult<usize> {
        let partition = self.partition_name(origin);
        Ok(self
            .lock()?
            .get(&partition)
            .map(BTreeMap::len)
            .unwrap_or_default())
    }

    pub fn is_empty(&self, origin: &str) -> BridgeResult<bool> {
        Ok(self.len(origin)? == 0)
    }

    fn partition_name(&self, origin: &str) -> String {
        if self.config.partition_by_origin {
            sanitize_partition_name(origin)
        } else {
            "global".to_owned()
        }
    }

    fn lock(&self) -> BridgeResult<MutexGuard<'_, PartitionMap>> {
        self.partitions.lock().map_err(|_| {
            BridgeError::new(
                "storage.lock_poisoned",
                "session storage lock poisoned by a panicking writer",
            )
        })
    }
}

fn partition_bytes(entries: &BTreeMap<String, String>) -> usize {
    entries
        .iter()
        .map(|(key, value)| key.len() + value.len())
        .sum()
}

fn sanitize_partition_name(input: &str) -> String {
    let out: String = input
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();

    if out.is_empty() {
        "unknown".to_owned()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::SessionStorage;
    use super::StorageConfig;
    use super::sanitize_partition_name;

    #[test]
    fn item_roundtrip_per_origin() {
        let storage = SessionStorage::default();
        let wrote = storage.set_item("https://a.test", "k", "v");
        assert!(wrote.is_ok());

        assert_eq!(storage.get_item("https://a.test", "k"), Ok(Some("v".to_owned())));
        assert_eq!(storage.get_item("https://b.test", "k"), Ok(None));

        assert!(storage.remove_item("https://a.test", "k").is_ok());
        assert_eq!(storage.get_item("https://a.test", "k"), Ok(None));
        assert_eq!(storage.is_empty("https://a.test"), Ok(true));
    }

    #[test]
    fn clones_share_entries() {
        let storage = SessionStorage::default();
        let other = storage.clone();
        assert!(other.set_item("https://a.test", "k", "v").is_ok());
        assert_eq!(storage.len("https://a.test"), Ok(1));
        assert!(storage.clear("https://a.test").is_ok());
        assert_eq!(other.len("https://a.test"), Ok(0));
    }

    #[test]
    fn quota_rejects_oversized_partition() {
        let storage = SessionStorage::new(StorageConfig {
            partition_by_origin: true,
            max_partition_bytes: 8,
        });
        assert!(storage.set_item("https://a.test", "k", "1234").is_ok());
        // Replacing an entry only counts the difference.
        assert!(storage.set_item("https://a.test", "k", "1234567").is_ok());

        let wrote = storage.set_item("https://a.test", "k2", "x");
        assert!(wrote.is_err());
        if let Err(error) = wrote {
            assert_eq!(error.code, "storage.quota_exceeded");
        }
        assert_eq!(
            storage.get_item("https://a.test", "k"),
            Ok(Some("1234567".to_owned()))
        );
    }

    #[test]
    fn unpartitioned_storage_is_global() {
        let storage = SessionStorage::new(StorageConfig {
            partition_by_origin: false,
            ..StorageConfig::default()
        });
        assert!(storage.set_item("https://a.test", "k", "v").is_ok());
        assert_eq!(storage.get_item("https://b.test", "k"), Ok(Some("v".to_owned())));
    }

    #[test]
    fn sanitizes_partition_names() {
        assert_eq!(sanitize_partition_name("https://A.test:8443"), "https___a.test_8443");
        assert_eq!(sanitize_partition_name("  "), "unknown");
    }
}

//! Transcript persistence over a string key-value store.
//!
//! The store plays the part a browser's local storage would: one fixed key
//! holds the whole conversation as JSON text. Nothing in here is allowed to
//! interrupt a chat; failures are logged and dropped.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::state::ChatMessage;

/// Key under which the conversation is stored.
pub const TRANSCRIPT_KEY: &str = "chat_messages";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage quota exceeded: need {needed} bytes, quota is {quota}")]
    QuotaExceeded { needed: usize, quota: usize },

    #[error("stored transcript is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("invalid storage key: {0:?}")]
    InvalidKey(String),
}

/// Minimal string-to-string store.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError>;
    /// Removing an absent key succeeds.
    fn remove(&mut self, key: &str) -> Result<(), PersistenceError>;
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted in the platform data directory (e.g. `~/.local/share/chatterbox`).
    pub fn open_default() -> anyhow::Result<Self> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;
        Ok(Self::new(data_dir.join("chatterbox")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, PersistenceError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(PersistenceError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.dir)?;

        // Write then rename so a crash never leaves half a transcript behind
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store with an optional total byte quota.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: HashMap::new(),
            quota: Some(quota),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn raw(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), PersistenceError> {
        if let Some(quota) = self.quota {
            let others: usize = self
                .entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > quota {
                return Err(PersistenceError::QuotaExceeded { needed, quota });
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<(), PersistenceError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Mirrors full transcript snapshots into a [`KeyValueStore`].
///
/// Never mutates the live conversation; it only serializes snapshots out and
/// hands validated snapshots back.
#[derive(Debug, Clone)]
pub struct TranscriptStore<S> {
    store: S,
}

impl<S: KeyValueStore> TranscriptStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Serialize and write the whole transcript. Failures are logged only.
    pub fn save(&mut self, messages: &[ChatMessage]) {
        if let Err(e) = self.try_save(messages) {
            warn!(error = %e, "failed to persist transcript");
        }
    }

    fn try_save(&mut self, messages: &[ChatMessage]) -> Result<(), PersistenceError> {
        let json = serde_json::to_string(messages)?;
        self.store.set(TRANSCRIPT_KEY, &json)?;
        debug!(turns = messages.len(), bytes = json.len(), "transcript saved");
        Ok(())
    }

    /// Read the stored transcript.
    ///
    /// Absent data yields `None`. Data that is not an ordered list of
    /// `{role, content}` records is deleted and also yields `None`.
    pub fn load(&mut self) -> Option<Vec<ChatMessage>> {
        let raw = match self.store.get(TRANSCRIPT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "failed to read stored transcript");
                return None;
            }
        };

        match serde_json::from_str::<Vec<ChatMessage>>(&raw) {
            Ok(messages) => Some(messages),
            Err(e) => {
                warn!(error = %PersistenceError::Corrupt(e), "discarding stored transcript");
                self.delete();
                None
            }
        }
    }

    /// Remove the stored transcript. An absent key is fine.
    pub fn delete(&mut self) {
        if let Err(e) = self.store.remove(TRANSCRIPT_KEY) {
            warn!(error = %e, "failed to delete stored transcript");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Vec<ChatMessage> {
        vec![
            ChatMessage::user("What is \"Rust\"?"),
            ChatMessage::assistant("A language.\n\n```rust\nfn main() {}\n```"),
        ]
    }

    #[test]
    fn test_load_absent_is_none() {
        let mut store = TranscriptStore::new(MemoryStore::new());
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_save_then_load() {
        let mut store = TranscriptStore::new(MemoryStore::new());
        store.save(&sample());
        assert_eq!(store.load(), Some(sample()));
    }

    #[test]
    fn test_resave_of_loaded_transcript_is_byte_identical() {
        let mut store = TranscriptStore::new(MemoryStore::new());
        store.save(&sample());
        let first = store.inner().raw(TRANSCRIPT_KEY).map(str::to_string);

        let loaded = store.load().unwrap();
        store.save(&loaded);
        let second = store.inner().raw(TRANSCRIPT_KEY).map(str::to_string);

        assert_eq!(first, second);
    }

    #[test]
    fn test_corrupt_data_is_discarded() {
        for bad in [
            "not json",
            "{\"role\":\"user\",\"content\":\"x\"}",
            "[{\"role\":\"wizard\",\"content\":\"x\"}]",
            "[{\"role\":\"user\"}]",
            "[1, 2, 3]",
        ] {
            let mut kv = MemoryStore::new();
            kv.set(TRANSCRIPT_KEY, bad).unwrap();
            let mut store = TranscriptStore::new(kv);
            assert_eq!(store.load(), None, "input {:?}", bad);
            assert!(!store.inner().contains(TRANSCRIPT_KEY), "input {:?}", bad);
        }
    }

    #[test]
    fn test_empty_array_is_valid() {
        let mut kv = MemoryStore::new();
        kv.set(TRANSCRIPT_KEY, "[]").unwrap();
        let mut store = TranscriptStore::new(kv);
        assert_eq!(store.load(), Some(Vec::new()));
    }

    #[test]
    fn test_quota_failure_is_swallowed() {
        let mut store = TranscriptStore::new(MemoryStore::with_quota(16));
        store.save(&sample());
        assert!(!store.inner().contains(TRANSCRIPT_KEY));
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_delete_absent_key_is_fine() {
        let mut store = TranscriptStore::new(MemoryStore::new());
        store.delete();
        store.save(&sample());
        store.delete();
        store.delete();
        assert_eq!(store.load(), None);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut kv = FileStore::new(dir.path().join("nested"));
        assert_eq!(kv.get("chat_messages").unwrap(), None);
        kv.set("chat_messages", "[]").unwrap();
        assert_eq!(kv.get("chat_messages").unwrap().as_deref(), Some("[]"));
        kv.remove("chat_messages").unwrap();
        kv.remove("chat_messages").unwrap();
        assert_eq!(kv.get("chat_messages").unwrap(), None);
    }

    #[test]
    fn test_file_store_rejects_path_like_keys() {
        let dir = TempDir::new().unwrap();
        let mut kv = FileStore::new(dir.path());
        assert!(matches!(
            kv.set("../escape", "x"),
            Err(PersistenceError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_transcript_store_over_files() {
        let dir = TempDir::new().unwrap();
        let mut store = TranscriptStore::new(FileStore::new(dir.path()));
        store.save(&sample());
        assert_eq!(store.load(), Some(sample()));
        store.delete();
        assert_eq!(store.load(), None);
    }
}

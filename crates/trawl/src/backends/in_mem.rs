//! # Previously, on Trawl...
//!
//! 🎬 The bucket was fake. The objects were fake. The five-second fetch delay was very,
//! very real, and a test was about to find out whether the coordinator would wait for it.
//!
//! `in_mem` provides an [`InMemoryObjectSource`] and an [`InMemorySink`] for tests and local
//! development. The source serves byte blobs out of a map, with optional per-key delays and
//! forced failures. The sink keeps committed lines per key behind an `Arc<Mutex<...>>` so
//! callers can inspect what arrived.
//!
//! ⚠️ This is NOT for production. No network calls. No disk I/O. Just heap memory.
//! 🦆

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{FetchedObject, ObjectSource, SinkWriter, flatten_key};
use crate::common::SourceObject;
use crate::errors::ObjectFailure;
use crate::events::Event;

/// 🪣 A bucket that lives in RAM. Keys are kept sorted, like a real listing.
#[derive(Debug, Default, Clone)]
pub struct InMemoryObjectSource {
    container: String,
    objects: BTreeMap<String, Vec<u8>>,
    delays: HashMap<String, Duration>,
    stalls: HashMap<String, (usize, Duration)>,
    failures: HashMap<String, ObjectFailure>,
}

impl InMemoryObjectSource {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            ..Self::default()
        }
    }

    pub fn with_object(mut self, key: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.objects.insert(key.into(), bytes);
        self
    }

    /// 🐌 Make `fetch` sleep before answering. For poking timeouts with a stick.
    pub fn with_fetch_delay(mut self, key: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(key.into(), delay);
        self
    }

    /// 🧊 Serve the first `after_bytes` of the body right away, then sit on the rest for
    /// `stall`. The fetch itself is instant; it's the read that hangs.
    pub fn with_stall(mut self, key: impl Into<String>, after_bytes: usize, stall: Duration) -> Self {
        self.stalls.insert(key.into(), (after_bytes, stall));
        self
    }

    /// 💥 Make `fetch` fail with exactly this failure.
    pub fn with_fetch_failure(mut self, key: impl Into<String>, failure: ObjectFailure) -> Self {
        self.failures.insert(key.into(), failure);
        self
    }
}

#[async_trait]
impl ObjectSource for InMemoryObjectSource {
    async fn list(&self, prefix: &str, max_count: usize) -> Result<Vec<SourceObject>> {
        Ok(self
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .take(max_count)
            .map(|(key, bytes)| SourceObject::new(&self.container, key, bytes.len() as u64))
            .collect())
    }

    async fn fetch(&self, object: &SourceObject) -> Result<FetchedObject, ObjectFailure> {
        if let Some(the_delay) = self.delays.get(&object.key) {
            tokio::time::sleep(*the_delay).await;
        }
        if let Some(the_failure) = self.failures.get(&object.key) {
            return Err(the_failure.clone());
        }
        let the_bytes = self
            .objects
            .get(&object.key)
            .ok_or_else(|| ObjectFailure::NotFound(object.label()))?;
        let the_size = the_bytes.len() as u64;
        let Some(&(the_after, the_stall)) = self.stalls.get(&object.key) else {
            return Ok(FetchedObject::new(Box::new(Cursor::new(the_bytes.clone())), the_size));
        };

        // -- head now, tail later, through a pipe. dropping the writer is the EOF
        let the_split = the_after.min(the_bytes.len());
        let the_head = the_bytes[..the_split].to_vec();
        let the_tail = the_bytes[the_split..].to_vec();
        let (mut the_writer, the_reader) = tokio::io::duplex(the_tail.len().max(1));
        tokio::spawn(async move {
            tokio::time::sleep(the_stall).await;
            // -- nobody reading anymore is fine, the test already moved on
            let _ = the_writer.write_all(&the_tail).await;
        });
        Ok(FetchedObject::new(
            Box::new(AsyncReadExt::chain(Cursor::new(the_head), the_reader)),
            the_size,
        ))
    }
}

/// 📦 A sink that never forgets. Committed artifacts only; abandoned ones never show up.
#[derive(Debug, Clone)]
pub struct InMemorySink {
    suffix: String,
    committed: Arc<Mutex<HashMap<String, Vec<String>>>>,
    abandoned: Arc<Mutex<Vec<String>>>,
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new(".ndjson")
    }
}

impl InMemorySink {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
            committed: Arc::default(),
            abandoned: Arc::default(),
        }
    }

    pub fn artifact_path(&self, key: &str) -> PathBuf {
        PathBuf::from(flatten_key(key, &self.suffix))
    }

    pub fn open_for_append(&self, key: &str) -> Result<SinkWriter, ObjectFailure> {
        Ok(SinkWriter::InMemory(InMemoryWriter {
            key: key.to_string(),
            path: self.artifact_path(key),
            lines: Vec::new(),
            committed: Arc::clone(&self.committed),
            abandoned: Arc::clone(&self.abandoned),
        }))
    }

    /// 🔎 Lines of the committed artifact for `key`, newline included.
    pub fn lines_for(&self, key: &str) -> Option<Vec<String>> {
        self.committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn committed_keys(&self) -> Vec<String> {
        let mut the_keys: Vec<String> = self
            .committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        the_keys.sort();
        the_keys
    }

    pub fn abandoned_keys(&self) -> Vec<String> {
        self.abandoned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// ✍️ Buffers lines until commit, then publishes them all at once under the key.
#[derive(Debug)]
pub struct InMemoryWriter {
    key: String,
    path: PathBuf,
    lines: Vec<String>,
    committed: Arc<Mutex<HashMap<String, Vec<String>>>>,
    abandoned: Arc<Mutex<Vec<String>>>,
}

impl InMemoryWriter {
    pub(crate) fn append(&mut self, event: &Event) -> Result<(), ObjectFailure> {
        self.lines.push(event.to_line());
        Ok(())
    }

    pub(crate) fn commit(self) -> Result<PathBuf, ObjectFailure> {
        self.committed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.key, self.lines);
        Ok(self.path)
    }

    pub(crate) fn abandon(self) {
        self.abandoned
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn the_one_where_the_fake_bucket_lists_and_serves() {
        let the_source = InMemoryObjectSource::new("fake")
            .with_object("a/1.snz", b"one".to_vec())
            .with_object("a/2.snz", b"two".to_vec())
            .with_object("b/3.snz", b"three".to_vec());

        let the_listing = the_source.list("a/", 10).await.expect("💀 listing");
        assert_eq!(the_listing.len(), 2);
        assert_eq!(the_listing[0].key, "a/1.snz");
        assert_eq!(the_source.list("", 1).await.expect("💀 listing").len(), 1);

        let mut the_fetched = the_source.fetch(&the_listing[1]).await.expect("💀 fetch");
        let mut the_body = Vec::new();
        the_fetched
            .body
            .read_to_end(&mut the_body)
            .await
            .expect("💀 body read");
        assert_eq!(the_body, b"two");
    }

    #[tokio::test]
    async fn the_one_where_missing_and_cursed_keys_fail_properly() {
        let the_source = InMemoryObjectSource::new("fake")
            .with_object("cursed", b"x".to_vec())
            .with_fetch_failure("cursed", ObjectFailure::Transport("connection reset".into()));

        let the_ghost = SourceObject::new("fake", "ghost", 0);
        assert!(matches!(
            the_source.fetch(&the_ghost).await,
            Err(ObjectFailure::NotFound(_))
        ));
        let the_cursed = SourceObject::new("fake", "cursed", 1);
        assert!(matches!(
            the_source.fetch(&the_cursed).await,
            Err(ObjectFailure::Transport(_))
        ));
    }
}

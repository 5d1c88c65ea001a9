//! 🔌 Backends: where the real I/O happens.
//!
//! 🚰 Object sources list and fetch blobs. Output sinks take the decoded lines and put them
//! somewhere with a name. Everything in between (sniff, decode, parse, tally) is none of
//! their business.
//!
//! 🎭 This module is the casting agency. Need objects from an S3 bucket? A local directory
//! of `.snz` files someone scp'd over at 2am? A `HashMap` pretending to be a bucket for a
//! test? We've got a backend for that.
//!
//! 🧠 Knowledge graph:
//! - [`ObjectSource`] is async: listing and fetching are network-shaped.
//! - [`OutputSink`] is sync: writing happens on the blocking thread that owns the decoder,
//!   one exclusive writer per object, never shared.
//! - Both are dispatched through enums ([`SourceBackend`], [`SinkBackend`]) so the
//!   coordinator never needs to know where the bytes actually live.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::common::SourceObject;
use crate::errors::ObjectFailure;
use crate::events::Event;

mod dir;
mod file;
mod in_mem;
mod s3;

// 🎯 Re-exported so callers write `backends::FileSink`, not `backends::file::FileSink`.
pub use dir::{DirectoryObjectSource, DirectorySourceConfig};
pub use file::{FileSink, FileWriter, OutputConfig};
pub use in_mem::{InMemoryObjectSource, InMemorySink, InMemoryWriter};
pub use s3::{S3ObjectSource, S3SourceConfig};

// ===== Source Trait and Backend Enum =====

/// 📦 A fetched object body: an async byte pipe plus whatever size the store admitted to.
pub struct FetchedObject {
    pub body: Box<dyn AsyncRead + Send + Unpin>,
    pub size_bytes: u64,
}

impl FetchedObject {
    pub fn new(body: Box<dyn AsyncRead + Send + Unpin>, size_bytes: u64) -> Self {
        Self { body, size_bytes }
    }
}

impl fmt::Debug for FetchedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // -- the body is a trait object. it has no Debug. it has no name. it has bytes.
        f.debug_struct("FetchedObject")
            .field("size_bytes", &self.size_bytes)
            .finish()
    }
}

/// 🚰 Something that can list objects under a prefix and hand out their bytes.
///
/// # Contract
/// - `list` returns at most `max_count` objects. Listing failures are run-fatal (`anyhow`).
/// - `fetch` failures are object-fatal (`ObjectFailure`): `NotFound` or `Transport`.
#[async_trait]
pub trait ObjectSource: fmt::Debug + Send + Sync {
    async fn list(&self, prefix: &str, max_count: usize) -> Result<Vec<SourceObject>>;

    async fn fetch(&self, object: &SourceObject) -> Result<FetchedObject, ObjectFailure>;
}

/// 🎭 The many faces of an object source. Dispatches, doesn't judge.
#[derive(Debug)]
pub enum SourceBackend {
    S3(S3ObjectSource),
    Directory(DirectoryObjectSource),
    InMemory(InMemoryObjectSource),
}

#[async_trait]
impl ObjectSource for SourceBackend {
    async fn list(&self, prefix: &str, max_count: usize) -> Result<Vec<SourceObject>> {
        match self {
            SourceBackend::S3(s) => s.list(prefix, max_count).await,
            SourceBackend::Directory(d) => d.list(prefix, max_count).await,
            SourceBackend::InMemory(m) => m.list(prefix, max_count).await,
        }
    }

    async fn fetch(&self, object: &SourceObject) -> Result<FetchedObject, ObjectFailure> {
        match self {
            SourceBackend::S3(s) => s.fetch(object).await,
            SourceBackend::Directory(d) => d.fetch(object).await,
            SourceBackend::InMemory(m) => m.fetch(object).await,
        }
    }
}

// ===== Sink Trait and Backend Enum =====

/// 🕳️ Something that hands out one exclusive writer per object key.
///
/// # Contract
/// - `artifact_path` is deterministic in the key: same key, same artifact, every run.
/// - `open_for_append` starts a fresh artifact. Whatever was there before is replaced on
///   commit, never appended to.
pub trait OutputSink: fmt::Debug + Send + Sync {
    fn artifact_path(&self, key: &str) -> PathBuf;

    fn open_for_append(&self, key: &str) -> Result<SinkWriter, ObjectFailure>;
}

/// 🎭 The many faces of a sink. Mirrors [`SourceBackend`]. Symmetry is a feature.
#[derive(Debug)]
pub enum SinkBackend {
    File(FileSink),
    InMemory(InMemorySink),
}

impl OutputSink for SinkBackend {
    fn artifact_path(&self, key: &str) -> PathBuf {
        match self {
            SinkBackend::File(sink) => sink.artifact_path(key),
            SinkBackend::InMemory(sink) => sink.artifact_path(key),
        }
    }

    fn open_for_append(&self, key: &str) -> Result<SinkWriter, ObjectFailure> {
        match self {
            SinkBackend::File(sink) => sink.open_for_append(key),
            SinkBackend::InMemory(sink) => sink.open_for_append(key),
        }
    }
}

/// ✍️ One object's writer. Owned by exactly one worker until it commits or abandons.
///
/// Every writer ends in exactly one of two ways: [`SinkWriter::commit`] (the artifact
/// becomes visible under its final name) or [`SinkWriter::abandon`] (it never does).
#[derive(Debug)]
pub enum SinkWriter {
    File(FileWriter),
    InMemory(InMemoryWriter),
}

impl SinkWriter {
    /// 📝 Append one event, terminated by exactly one `\n`.
    pub fn append(&mut self, event: &Event) -> Result<(), ObjectFailure> {
        match self {
            SinkWriter::File(w) => w.append(event),
            SinkWriter::InMemory(w) => w.append(event),
        }
    }

    /// 🚽 Push buffered lines down to the backing store. Called every N events.
    pub fn flush(&mut self) -> Result<(), ObjectFailure> {
        match self {
            SinkWriter::File(w) => w.flush(),
            SinkWriter::InMemory(_) => Ok(()),
        }
    }

    /// ✅ Flush, close, publish under the final name.
    pub fn commit(self) -> Result<PathBuf, ObjectFailure> {
        match self {
            SinkWriter::File(w) => w.commit(),
            SinkWriter::InMemory(w) => w.commit(),
        }
    }

    /// 🗑️ Flush, close, and make sure nothing half-written wears the final name. Best effort.
    pub fn abandon(self) {
        match self {
            SinkWriter::File(w) => w.abandon(),
            SinkWriter::InMemory(w) => w.abandon(),
        }
    }
}

/// 🔑 `trips/2016/01/part-0001.snz` + `.ndjson` → `trips201601part-0001.snz.ndjson`.
///
/// Every `/` and `\` is removed (not replaced), so the name is flat and deterministic.
pub fn flatten_key(key: &str, suffix: &str) -> String {
    let mut the_name: String = key.chars().filter(|c| *c != '/' && *c != '\\').collect();
    the_name.push_str(suffix);
    the_name
}

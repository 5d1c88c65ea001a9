//! 📦 Common data structures: the building blocks of trawl.
//!
//! 🎬 COLD OPEN: INT. S3 BUCKET, us-east-1, 3:47 AM
//!
//! Twenty `.snz` objects sit in a prefix, squished by snappy, full of taxi trips that
//! ended years ago. Nobody has looked at them since the benchmark blog post went live.
//! Then a `SourceObject` gets listed. Then another. The net is in the water. 🎣
//!
//! This module defines the humble structs that ferry "which object" and "what happened
//! to it" between the coordinator and its workers. They don't ask questions.
//! They carry the data. Please tip your postal workers. 🦆

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::errors::ObjectFailure;
use crate::sniff::FormatDetection;

/// 🪣 One remote blob, as the lister saw it. Immutable once listed.
///
/// `container` is the bucket (or local root directory), `key` is the object key
/// relative to it, `size_bytes` is whatever the listing claimed. The coordinator owns
/// these for the whole run; workers only ever borrow or clone them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceObject {
    pub container: String,
    pub key: String,
    pub size_bytes: u64,
}

impl SourceObject {
    pub fn new(container: impl Into<String>, key: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
            size_bytes,
        }
    }

    /// 🏷️ `container/key`, for log lines and progress labels.
    pub fn label(&self) -> String {
        format!("{}/{}", self.container, self.key)
    }
}

/// 🚦 Where an object is in its little life cycle.
///
/// `Queued -> Fetching -> Decoding -> Parsing -> Writing -> Done`, or `Failed` from anywhere.
/// A timeout doesn't get its own stage: it lands as `Failed` with the stage it interrupted
/// recorded in the failure, which is far more useful at 3am.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ObjectStage {
    Queued = 0,
    Fetching = 1,
    Decoding = 2,
    Parsing = 3,
    Writing = 4,
    Done = 5,
    Failed = 6,
}

impl ObjectStage {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Queued,
            1 => Self::Fetching,
            2 => Self::Decoding,
            3 => Self::Parsing,
            4 => Self::Writing,
            5 => Self::Done,
            _ => Self::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Decoding => "decoding",
            Self::Parsing => "parsing",
            Self::Writing => "writing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ObjectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 📍 A stage marker shared between the async side of a worker and its blocking half.
///
/// The blocking thread bumps it as it goes; the coordinator reads it when a deadline fires
/// so the timeout can say *what* it interrupted. One byte. Relaxed ordering. No drama.
#[derive(Debug, Clone)]
pub(crate) struct StageCell(Arc<AtomicU8>);

impl StageCell {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ObjectStage::Queued as u8)))
    }

    pub(crate) fn set(&self, stage: ObjectStage) {
        self.0.store(stage as u8, Ordering::Relaxed);
    }

    pub(crate) fn get(&self) -> ObjectStage {
        ObjectStage::from_u8(self.0.load(Ordering::Relaxed))
    }
}

/// 🧾 What one worker has to say about one object. Exactly one per `SourceObject`.
///
/// Single producer (the worker that handled it, or the coordinator when nobody did),
/// single consumer (the final summary). Never shared, never mutated after the fact.
#[derive(Debug, Clone)]
pub struct ObjectResult {
    pub object: SourceObject,
    /// 📁 Where the artifact lives (or would have lived, for failures).
    pub output_path: PathBuf,
    pub event_count: u64,
    /// 🗑️ Malformed lines that were logged and skipped.
    pub skipped_lines: u64,
    pub processing_seconds: f64,
    pub worker_id: usize,
    pub earliest_millis: Option<i64>,
    pub latest_millis: Option<i64>,
    /// 🔬 What the sniffer thought, if it was asked. Advisory only.
    pub detection: Option<FormatDetection>,
    pub stage: ObjectStage,
    pub error: Option<ObjectFailure>,
}

impl ObjectResult {
    /// 💀 A result for an object that never made it, with nothing counted.
    pub fn failed(
        object: SourceObject,
        output_path: PathBuf,
        worker_id: usize,
        processing_seconds: f64,
        failure: ObjectFailure,
    ) -> Self {
        Self {
            object,
            output_path,
            event_count: 0,
            skipped_lines: 0,
            processing_seconds,
            worker_id,
            earliest_millis: None,
            latest_millis: None,
            detection: None,
            stage: ObjectStage::Failed,
            error: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// 🚀 Events per second for this object alone. Zero when the clock didn't move.
    pub fn throughput(&self) -> f64 {
        if self.processing_seconds > 0.0 {
            self.event_count as f64 / self.processing_seconds
        } else {
            0.0
        }
    }
}

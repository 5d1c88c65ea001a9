//! 🏷️ The error taxonomy: two kinds of sad, kept in separate drawers.
//!
//! 🧠 Knowledge graph:
//! - [`MalformedLine`]: line-local. Logged, counted, skipped. The stream keeps flowing.
//! - [`ObjectFailure`]: object-fatal. Stops that one object, lands in its `ObjectResult`,
//!   and never touches a sibling worker.
//!
//! Everything app-level (config, CLI, listing) stays on `anyhow`, like the rest of the crate.

use std::time::Duration;

use thiserror::Error;

use crate::common::ObjectStage;

/// 💀 Why one object didn't make it. Object-fatal, sibling-safe.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ObjectFailure {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("timed out after {budget:?} while {stage}")]
    Timeout { budget: Duration, stage: ObjectStage },

    #[error("interrupted by shutdown while {stage}")]
    Interrupted { stage: ObjectStage },

    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl ObjectFailure {
    /// 🏷️ Short machine-friendly name, for tables and tallies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
            Self::Write(_) => "write",
            Self::Timeout { .. } => "timeout",
            Self::Interrupted { .. } => "interrupted",
            Self::Panicked(_) => "panicked",
        }
    }
}

/// 🗑️ Why one line got skipped. Line-local, never fatal.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MalformedLine {
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("line is not a JSON object: {0}")]
    InvalidJson(String),

    #[error("line is missing required field '{0}'")]
    MissingField(String),

    #[error("field '{field}' is not a usable timestamp: {reason}")]
    BadTimestamp { field: String, reason: String },
}

//! 📂 Previously, on "Things That Could Go Wrong With A File"...
//!
//! The disk was quiet. Too quiet. Twenty workers were about to write twenty files into
//! the same directory, and one of them was about to get stuck on a network read for five
//! minutes and then get told, politely, to stop.
//!
//! 🧠 Knowledge graph:
//! - Each object writes to `<directory>/<flattened key><suffix>.partial` first.
//! - `commit` flushes and renames the partial onto the final name. Reruns replace the
//!   previous artifact wholesale, never append to it.
//! - `abandon` flushes and deletes the partial. A worker that can't be reclaimed at all
//!   leaves its `.partial` behind, which is exactly the "clearly marked incomplete" we want.
//! 💀 Disk full → `ObjectFailure::Write`, for that object only.
//! 🦆 (mandatory, no notes)

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, trace, warn};

use super::{SinkWriter, flatten_key};
use crate::errors::ObjectFailure;
use crate::events::Event;

/// 🏷️ Appended to the artifact name while it is still being written.
const PARTIAL_SUFFIX: &str = ".partial";

/// 🔧 Where the artifacts go and what they're called. Lives next to the sink that uses it.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct OutputConfig {
    #[serde(default = "default_output_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_output_suffix")]
    pub suffix: String,
    /// 🚽 Flush the writer every this-many events. `0` means "only at the end".
    #[serde(default = "default_flush_every_events")]
    pub flush_every_events: u64,
}

fn default_output_directory() -> PathBuf {
    PathBuf::from("./snappy_decompressed_events")
}

fn default_output_suffix() -> String {
    ".ndjson".to_string()
}

fn default_flush_every_events() -> u64 {
    10_000
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: default_output_directory(),
            suffix: default_output_suffix(),
            flush_every_events: default_flush_every_events(),
        }
    }
}

/// 🚰 FileSink: one directory, many artifacts, one writer per artifact.
#[derive(Debug, Clone)]
pub struct FileSink {
    config: OutputConfig,
}

impl FileSink {
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    pub fn artifact_path(&self, key: &str) -> PathBuf {
        self.config
            .directory
            .join(flatten_key(key, &self.config.suffix))
    }

    /// 🚀 Create the directory if needed and open a fresh `.partial` next to the final name.
    ///
    /// `File::create` truncates. A stale partial from a crashed run is simply overwritten.
    pub fn open_for_append(&self, key: &str) -> Result<SinkWriter, ObjectFailure> {
        fs::create_dir_all(&self.config.directory).map_err(|e| {
            ObjectFailure::Write(format!(
                "could not create output directory '{}': {e}",
                self.config.directory.display()
            ))
        })?;
        let the_final_path = self.artifact_path(key);
        let the_partial_path = partial_path_for(&the_final_path);
        let the_file = File::create(&the_partial_path).map_err(|e| {
            ObjectFailure::Write(format!(
                "could not create '{}': {e}",
                the_partial_path.display()
            ))
        })?;
        trace!(path = %the_partial_path.display(), "📂 opened partial artifact");
        Ok(SinkWriter::File(FileWriter {
            writer: BufWriter::new(the_file),
            partial_path: the_partial_path,
            final_path: the_final_path,
        }))
    }
}

fn partial_path_for(final_path: &Path) -> PathBuf {
    let mut the_name = final_path.as_os_str().to_owned();
    the_name.push(PARTIAL_SUFFIX);
    PathBuf::from(the_name)
}

/// ✍️ One artifact in flight. Dropped without commit → the `.partial` stays, marked incomplete.
#[derive(Debug)]
pub struct FileWriter {
    writer: BufWriter<File>,
    partial_path: PathBuf,
    final_path: PathBuf,
}

impl FileWriter {
    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    pub(crate) fn append(&mut self, event: &Event) -> Result<(), ObjectFailure> {
        event
            .write_to(&mut self.writer)
            .map_err(|e| self.write_failure("append to", e))
    }

    pub(crate) fn flush(&mut self) -> Result<(), ObjectFailure> {
        self.writer
            .flush()
            .map_err(|e| self.write_failure("flush", e))
    }

    pub(crate) fn commit(mut self) -> Result<PathBuf, ObjectFailure> {
        self.flush()?;
        let FileWriter {
            writer,
            partial_path,
            final_path,
        } = self;
        let the_file = writer.into_inner().map_err(|e| {
            ObjectFailure::Write(format!(
                "could not flush '{}': {}",
                partial_path.display(),
                e.error()
            ))
        })?;
        the_file.sync_all().map_err(|e| {
            ObjectFailure::Write(format!("could not sync '{}': {e}", partial_path.display()))
        })?;
        drop(the_file);
        fs::rename(&partial_path, &final_path).map_err(|e| {
            ObjectFailure::Write(format!(
                "could not publish '{}' as '{}': {e}",
                partial_path.display(),
                final_path.display()
            ))
        })?;
        debug!(path = %final_path.display(), "✅ artifact committed");
        Ok(final_path)
    }

    pub(crate) fn abandon(mut self) {
        if let Err(e) = self.writer.flush() {
            // -- the file is about to be deleted anyway. note it, move on
            trace!(path = %self.partial_path.display(), error = %e, "flush before abandon failed");
        }
        let FileWriter {
            writer,
            partial_path,
            ..
        } = self;
        drop(writer);
        match fs::remove_file(&partial_path) {
            Ok(()) => debug!(path = %partial_path.display(), "🗑️ partial artifact removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                path = %partial_path.display(),
                error = %e,
                "⚠️ could not remove partial artifact; it stays behind marked .partial"
            ),
        }
    }

    fn write_failure(&self, verb: &str, err: io::Error) -> ObjectFailure {
        ObjectFailure::Write(format!(
            "could not {verb} '{}': {err}",
            self.partial_path.display()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::OutputSink;
    use crate::backends::SinkBackend;
    use crate::events::EventParser;

    fn sink_in(dir: &Path) -> SinkBackend {
        SinkBackend::File(FileSink::new(OutputConfig {
            directory: dir.join("out"),
            suffix: ".ndjson".to_string(),
            flush_every_events: 2,
        }))
    }

    fn event(n: u32) -> Event {
        EventParser::default()
            .parse(&format!(
                r#"{{"trip_id":{n},"dropoff_datetime":"2016-01-01T05:33:00.000Z"}}"#
            ))
            .expect("💀 fixture event should parse")
    }

    #[test]
    fn the_one_where_commit_publishes_and_the_partial_vanishes() {
        let the_tmp = tempfile::tempdir().expect("💀 tempdir refused to exist");
        let the_sink = sink_in(the_tmp.path());

        let mut the_writer = the_sink
            .open_for_append("2016/01/a.snz")
            .expect("💀 opening should work");
        let the_partial = match &the_writer {
            SinkWriter::File(w) => w.partial_path().to_path_buf(),
            other => panic!("💀 expected a file writer, got {other:?}"),
        };
        assert!(the_partial.exists());

        the_writer.append(&event(1)).expect("💀 append 1");
        the_writer.append(&event(2)).expect("💀 append 2");
        let the_final = the_writer.commit().expect("💀 commit should work");

        assert_eq!(the_final, the_tmp.path().join("out").join("201601a.snz.ndjson"));
        assert!(!the_partial.exists());
        let the_contents = fs::read_to_string(&the_final).expect("💀 artifact should be readable");
        assert_eq!(the_contents.lines().count(), 2);
        assert!(the_contents.ends_with("}\n"));
    }

    #[test]
    fn the_one_where_a_rerun_replaces_instead_of_appending() {
        let the_tmp = tempfile::tempdir().expect("💀 tempdir refused to exist");
        let the_sink = sink_in(the_tmp.path());

        for the_run in 0..2 {
            let mut the_writer = the_sink.open_for_append("k").expect("💀 open");
            the_writer.append(&event(the_run)).expect("💀 append");
            the_writer.commit().expect("💀 commit");
        }

        let the_contents = fs::read_to_string(the_sink.artifact_path("k")).expect("💀 read");
        assert_eq!(the_contents.lines().count(), 1);
        assert!(the_contents.contains(r#""trip_id":1"#));
    }

    #[test]
    fn the_one_where_abandon_leaves_no_trace() {
        let the_tmp = tempfile::tempdir().expect("💀 tempdir refused to exist");
        let the_sink = sink_in(the_tmp.path());

        let mut the_writer = the_sink.open_for_append("doomed").expect("💀 open");
        the_writer.append(&event(1)).expect("💀 append");
        the_writer.abandon();

        let the_leftovers: Vec<_> = fs::read_dir(the_tmp.path().join("out"))
            .expect("💀 output dir should exist")
            .collect();
        assert!(the_leftovers.is_empty(), "{the_leftovers:?}");
    }
}

//! 🔬 Format sniffing: judging a blob by its cover, professionally.
//!
//! 🎬 *[a blob arrives. no extension. no content-type. no references.]*
//! *["What are you?" asks the sniffer. The blob says nothing. Blobs never do.]*
//! *[The sniffer reads 64 bytes from the front, 64 from the back, and 8 from byte 257.]*
//! *["Snappy," it says. "Framed. I'd stake my confidence on it. All 1.0 of it."]*
//!
//! 🧠 Knowledge graph:
//! - [`signature`]: the tagged matcher variants + the built-in table
//! - [`detection`]: the verdict type and its derived predicates
//! - [`FormatSniffer`]: owns the table, evaluates it in strict tier order, never throws
//! - Seekable sources get the full head/tail/probe treatment via [`FormatSniffer::detect_seekable`].
//!   Forward-only sources either go through [`crate::byte_source::materialize`] first, or
//!   accept a degraded prefix-only look via [`SniffSample::from_prefix`].
//!
//! ⚠️ Purely advisory. Nothing downstream gates on the verdict. The decoder decodes
//! what the config says it should, and the sniffer's opinion goes in the logs. 🦆

mod detection;
mod signature;

use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

pub use detection::{Format, FormatDetection};
pub use signature::{
    HEAD_WINDOW, Matcher, PROBE_LEN, PROBE_OFFSET, SUFFIX_SEARCH_WINDOW, Signature, SniffSample,
    TAIL_WINDOW, builtin_signatures,
};

/// 🚫 Registration said no.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SniffError {
    #[error("a signature named '{0}' is already registered (pass overwrite = true to replace it)")]
    DuplicateSignature(String),
}

/// 📏 How far `SniffMode::Prefix` peeks. Comfortably past the offset-257 probe.
pub const PREFIX_PEEK_BYTES: usize = 512;

/// 🎚️ How hard to look at an object before decoding it.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SniffMode {
    /// Don't look. Decode straight away.
    Off,
    /// Peek the first [`PREFIX_PEEK_BYTES`], sniff those, stitch them back on. Streaming stays streaming.
    #[default]
    Prefix,
    /// Pull the whole object into memory, sniff head, tail and probe, decode from the buffer.
    Buffered,
}

/// 🔬 The sniffer. Holds the signature table; cheap to share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct FormatSniffer {
    signatures: Vec<Signature>,
}

impl Default for FormatSniffer {
    fn default() -> Self {
        Self {
            signatures: builtin_signatures(),
        }
    }
}

impl FormatSniffer {
    /// 🕳️ A sniffer that knows nothing. Useful when you want *only* your own signatures.
    pub fn empty() -> Self {
        Self {
            signatures: Vec::new(),
        }
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    /// ➕ Add a named signature at runtime.
    ///
    /// Duplicate names are rejected unless `overwrite` is set, in which case the old entry
    /// is replaced in place (same declaration slot). New names go to the end of the table,
    /// i.e. after every built-in of the same tier.
    pub fn register(&mut self, signature: Signature, overwrite: bool) -> Result<(), SniffError> {
        let the_existing = self
            .signatures
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(&signature.name));
        match (the_existing, overwrite) {
            (Some(_), false) => Err(SniffError::DuplicateSignature(signature.name)),
            (Some(idx), true) => {
                self.signatures[idx] = signature;
                Ok(())
            }
            (None, _) => {
                self.signatures.push(signature);
                Ok(())
            }
        }
    }

    /// ⚖️ Apply the table to a sample. First match in tier order wins.
    pub fn detect_sample(&self, sample: &SniffSample) -> FormatDetection {
        for the_tier in 0..=4u8 {
            let the_winner = self
                .signatures
                .iter()
                .filter(|s| s.matcher.tier() == the_tier)
                .find(|s| s.matcher.matches(sample));
            if let Some(sig) = the_winner {
                return FormatDetection::new(sig.format(), sig.confidence, sig.evidence.clone());
            }
        }
        FormatDetection::unknown("No decisive signature found.")
    }

    pub fn detect_bytes(&self, blob: &[u8]) -> FormatDetection {
        self.detect_sample(&SniffSample::from_bytes(blob))
    }

    /// 🔎 Full detection on anything that can seek. The read position is restored after,
    /// best effort. I/O trouble becomes an `unknown` verdict with the cause in the evidence.
    pub fn detect_seekable<S: Read + Seek>(&self, source: &mut S) -> FormatDetection {
        match read_sample(source) {
            Ok(sample) => self.detect_sample(&sample),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                FormatDetection::unknown(format!("Source not found: {e}"))
            }
            Err(e) => FormatDetection::unknown(format!("Stream read error: {e}")),
        }
    }

    /// 📂 Sniff a local file by path.
    pub fn detect_path(&self, path: &Path) -> FormatDetection {
        match std::fs::File::open(path) {
            Ok(mut file) => self.detect_seekable(&mut file),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                FormatDetection::unknown(format!("File not found: {}", path.display()))
            }
            Err(e) => FormatDetection::unknown(format!("I/O error: {e}")),
        }
    }
}

/// 📏 Read head, tail and probe from a seekable source, then put the cursor back.
fn read_sample<S: Read + Seek>(source: &mut S) -> io::Result<SniffSample> {
    let the_original_position = source.stream_position().ok();
    let the_sample = read_ranges(source);
    if let Some(pos) = the_original_position {
        // -- restoring is best effort; a failed seek back must not turn a good sample bad
        let _ = source.seek(SeekFrom::Start(pos));
    }
    the_sample
}

fn read_ranges<S: Read + Seek>(source: &mut S) -> io::Result<SniffSample> {
    let the_size = source.seek(SeekFrom::End(0))?;

    source.seek(SeekFrom::Start(0))?;
    let the_head = read_up_to(source, HEAD_WINDOW)?;

    let the_tail_len = (TAIL_WINDOW as u64).min(the_size);
    source.seek(SeekFrom::Start(the_size - the_tail_len))?;
    let the_tail = read_up_to(source, the_tail_len as usize)?;

    let the_probe = if the_size >= PROBE_OFFSET + PROBE_LEN as u64 {
        source.seek(SeekFrom::Start(PROBE_OFFSET))?;
        Some(read_up_to(source, PROBE_LEN)?)
    } else {
        None
    };

    Ok(SniffSample {
        head: the_head,
        tail: the_tail,
        probe: the_probe,
    })
}

fn read_up_to<R: Read>(source: &mut R, limit: usize) -> io::Result<Vec<u8>> {
    let mut the_buf = Vec::with_capacity(limit);
    source.take(limit as u64).read_to_end(&mut the_buf)?;
    Ok(the_buf)
}

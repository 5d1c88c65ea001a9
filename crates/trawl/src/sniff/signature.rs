//! 📜 The signature table: who starts with what, who ends with what, and who hides
//! their magic 257 bytes in like it's a secret menu item.

use std::ops::RangeInclusive;

use memchr::memmem;

use super::detection::Format;

/// 📏 How much of a blob the sniffer ever looks at.
pub const HEAD_WINDOW: usize = 64;
pub const TAIL_WINDOW: usize = 64;
/// 🗜️ Where tar keeps its `ustar` magic. Yes, really. Offset 257.
pub const PROBE_OFFSET: u64 = 257;
pub const PROBE_LEN: usize = 8;
/// 🔚 `SuffixContains` only searches this many trailing bytes of the tail window.
pub const SUFFIX_SEARCH_WINDOW: usize = 16;

/// 🥪 The three slices a detection is allowed to see.
///
/// `probe` is `None` when the blob is too short to reach `PROBE_OFFSET + PROBE_LEN`,
/// so the offset matcher can never assert against bytes that aren't there.
/// `tail` is empty when the caller could only afford a prefix-only look.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SniffSample {
    pub head: Vec<u8>,
    pub tail: Vec<u8>,
    pub probe: Option<Vec<u8>>,
}

impl SniffSample {
    /// 🔪 Slice a sample out of a fully materialised blob.
    pub fn from_bytes(blob: &[u8]) -> Self {
        let the_head = blob[..blob.len().min(HEAD_WINDOW)].to_vec();
        let the_tail = blob[blob.len().saturating_sub(TAIL_WINDOW)..].to_vec();
        Self {
            head: the_head,
            tail: the_tail,
            probe: probe_slice(blob),
        }
    }

    /// ✂️ A degraded sample from only the first bytes of a stream.
    ///
    /// If the peek hit EOF we actually saw the whole blob, so the tail is real too.
    /// Otherwise the tail stays empty and suffix matchers simply can't fire.
    pub fn from_prefix(prefix: &[u8], reached_eof: bool) -> Self {
        if reached_eof {
            return Self::from_bytes(prefix);
        }
        Self {
            head: prefix[..prefix.len().min(HEAD_WINDOW)].to_vec(),
            tail: Vec::new(),
            probe: probe_slice(prefix),
        }
    }
}

fn probe_slice(bytes: &[u8]) -> Option<Vec<u8>> {
    let the_start = PROBE_OFFSET as usize;
    let the_end = the_start + PROBE_LEN;
    (bytes.len() >= the_end).then(|| bytes[the_start..the_end].to_vec())
}

/// 🎭 The five kinds of "I know that format when I see it", each carrying only what it needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Matcher {
    /// Head must start with `prefix` AND tail must end with `suffix`. Most specific.
    PrefixAndSuffixMagic { prefix: Vec<u8>, suffix: Vec<u8> },
    /// Head starts with any of the alternatives.
    PrefixMagic { magics: Vec<Vec<u8>> },
    /// The fixed-offset probe starts with any of the alternatives.
    OffsetProbe { magics: Vec<Vec<u8>> },
    /// The last `SUFFIX_SEARCH_WINDOW` bytes of the tail contain the marker somewhere.
    SuffixContains { marker: Vec<u8> },
    /// First byte falls in one of the ranges. Cheap, vague, reduced confidence.
    Heuristic { first_byte: Vec<RangeInclusive<u8>> },
}

impl Matcher {
    /// 🥇 Evaluation tier. Lower runs first; inside a tier, declaration order wins.
    pub fn tier(&self) -> u8 {
        match self {
            Self::PrefixAndSuffixMagic { .. } => 0,
            Self::PrefixMagic { .. } => 1,
            Self::OffsetProbe { .. } => 2,
            Self::SuffixContains { .. } => 3,
            Self::Heuristic { .. } => 4,
        }
    }

    pub fn matches(&self, sample: &SniffSample) -> bool {
        match self {
            Self::PrefixAndSuffixMagic { prefix, suffix } => {
                // -- both ends or bust. a PAR1 head with a junk tail is not parquet, it's a liar
                !sample.tail.is_empty()
                    && sample.head.starts_with(prefix)
                    && sample.tail.ends_with(suffix)
            }
            Self::PrefixMagic { magics } => magics.iter().any(|m| sample.head.starts_with(m)),
            Self::OffsetProbe { magics } => match &sample.probe {
                Some(probe) => magics.iter().any(|m| probe.starts_with(m)),
                None => false,
            },
            Self::SuffixContains { marker } => {
                let the_window =
                    &sample.tail[sample.tail.len().saturating_sub(SUFFIX_SEARCH_WINDOW)..];
                !marker.is_empty() && memmem::find(the_window, marker).is_some()
            }
            Self::Heuristic { first_byte } => match sample.head.first() {
                Some(b) => first_byte.iter().any(|range| range.contains(b)),
                None => false,
            },
        }
    }
}

/// 🪪 One named entry in the table.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    pub name: String,
    pub matcher: Matcher,
    pub confidence: f64,
    pub evidence: String,
}

impl Signature {
    pub fn new(
        name: impl Into<String>,
        matcher: Matcher,
        confidence: f64,
        evidence: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            matcher,
            confidence,
            evidence: evidence.into(),
        }
    }

    pub fn format(&self) -> Format {
        Format::from_name(&self.name)
    }

    fn prefix(name: &str, magics: &[&[u8]], evidence: &str) -> Self {
        Self::new(
            name,
            Matcher::PrefixMagic {
                magics: magics.iter().map(|m| m.to_vec()).collect(),
            },
            1.0,
            evidence,
        )
    }
}

/// 📚 The built-in table, in declaration order.
///
/// Prefix magics are disjoint by construction, so order inside the prefix tier only
/// matters for signatures callers register later.
pub fn builtin_signatures() -> Vec<Signature> {
    vec![
        Signature::new(
            "parquet",
            Matcher::PrefixAndSuffixMagic {
                prefix: b"PAR1".to_vec(),
                suffix: b"PAR1".to_vec(),
            },
            1.0,
            "Has 'PAR1' at start and end (Parquet).",
        ),
        Signature::prefix("gzip", &[b"\x1f\x8b"], "Starts with 1f 8b (gzip)."),
        Signature::prefix("zstd", &[b"\x28\xb5\x2f\xfd"], "Starts with 28 b5 2f fd (zstd)."),
        Signature::prefix("bzip2", &[b"BZh"], "Starts with 'BZh' (bzip2)."),
        Signature::prefix("lz4-frame", &[b"\x04\x22\x4d\x18"], "Starts with 04 22 4d 18 (LZ4 frame)."),
        Signature::prefix("xz", &[b"\xfd7zXZ\x00"], "Starts with fd 37 7a 58 5a 00 (XZ)."),
        Signature::prefix(
            "zip",
            &[b"PK\x03\x04", b"PK\x05\x06", b"PK\x07\x08"],
            "Starts with PK (ZIP container).",
        ),
        Signature::prefix("7z", &[b"\x37\x7a\xbc\xaf\x27\x1c"], "Starts with 37 7a bc af 27 1c (7z archive)."),
        Signature::prefix(
            "snappy-framed",
            &[b"\xff\x06\x00\x00sNaPpY"],
            "Starts with ff 06 00 00 'sNaPpY' (Snappy framed).",
        ),
        Signature::new(
            "tar",
            Matcher::OffsetProbe {
                magics: vec![b"ustar\x00".to_vec(), b"ustar  ".to_vec()],
            },
            0.95,
            "Has 'ustar' at offset 257 (TAR).",
        ),
        Signature::new(
            "orc",
            Matcher::SuffixContains {
                marker: b"ORC".to_vec(),
            },
            0.9,
            "Tail contains 'ORC' in postscript (ORC).",
        ),
        Signature::new(
            "ndjson",
            Matcher::Heuristic {
                first_byte: vec![b'{'..=b'{', b'['..=b'['],
            },
            0.5,
            "First byte looks like the start of a JSON value (NDJSON, heuristic).",
        ),
    ]
}

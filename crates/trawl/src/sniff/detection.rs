use std::fmt;

/// 🏷️ Every format the sniffer can name, plus room for whatever callers register later.
///
/// The name is the identity: `Format::from_name("gzip")` is `Format::Gzip`, and anything
/// the built-in table has never heard of becomes `Custom`. The derived predicates below
/// are computed from this and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Format {
    Parquet,
    Gzip,
    Zstd,
    Bzip2,
    Lz4Frame,
    Xz,
    Zip,
    SevenZ,
    SnappyFramed,
    Tar,
    Orc,
    Ndjson,
    Custom(String),
    Unknown,
}

impl Format {
    pub fn name(&self) -> &str {
        match self {
            Self::Parquet => "parquet",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
            Self::Bzip2 => "bzip2",
            Self::Lz4Frame => "lz4-frame",
            Self::Xz => "xz",
            Self::Zip => "zip",
            Self::SevenZ => "7z",
            Self::SnappyFramed => "snappy-framed",
            Self::Tar => "tar",
            Self::Orc => "orc",
            Self::Ndjson => "ndjson",
            Self::Custom(name) => name,
            Self::Unknown => "unknown",
        }
    }

    /// 🔎 Case-insensitive lookup. Unrecognised names become `Custom`, lowercased.
    pub fn from_name(name: &str) -> Self {
        let the_lowered = name.to_ascii_lowercase();
        match the_lowered.as_str() {
            "parquet" => Self::Parquet,
            "gzip" => Self::Gzip,
            "zstd" => Self::Zstd,
            "bzip2" => Self::Bzip2,
            "lz4-frame" => Self::Lz4Frame,
            "xz" => Self::Xz,
            "zip" => Self::Zip,
            "7z" => Self::SevenZ,
            "snappy-framed" => Self::SnappyFramed,
            "tar" => Self::Tar,
            "orc" => Self::Orc,
            "ndjson" => Self::Ndjson,
            "unknown" => Self::Unknown,
            _ => Self::Custom(the_lowered),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 🔬 The sniffer's verdict on one blob. Created once, never mutated, purely informational.
#[derive(Debug, Clone, PartialEq)]
pub struct FormatDetection {
    pub format: Format,
    /// 📊 0.0 ..= 1.0. 1.0 for exact magics, less for positional or heuristic guesses.
    pub confidence: f64,
    /// 📜 Why we think so. Or why we couldn't even look.
    pub evidence: String,
}

impl FormatDetection {
    pub fn new(format: Format, confidence: f64, evidence: impl Into<String>) -> Self {
        Self {
            format,
            confidence: confidence.clamp(0.0, 1.0),
            evidence: evidence.into(),
        }
    }

    /// 🤷 The shrug result. Confidence zero, evidence says why.
    pub fn unknown(evidence: impl Into<String>) -> Self {
        Self::new(Format::Unknown, 0.0, evidence)
    }

    pub fn is_known(&self) -> bool {
        self.format != Format::Unknown && self.confidence > 0.0
    }

    pub fn is_compressed(&self) -> bool {
        matches!(
            self.format,
            Format::Gzip
                | Format::Zstd
                | Format::Bzip2
                | Format::Lz4Frame
                | Format::Xz
                | Format::SnappyFramed
        )
    }

    pub fn is_archive(&self) -> bool {
        matches!(self.format, Format::Zip | Format::SevenZ | Format::Tar)
    }

    pub fn is_columnar(&self) -> bool {
        matches!(self.format, Format::Parquet | Format::Orc)
    }

    /// 🧾 One line for the logs: `[GZIP] confidence=1.00: Starts with 1f 8b (gzip).`
    pub fn summary(&self) -> String {
        format!(
            "[{}] confidence={:.2}: {}",
            self.format.name().to_ascii_uppercase(),
            self.confidence,
            self.evidence
        )
    }
}

impl fmt::Display for FormatDetection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_predicates_come_from_the_name_alone() {
        let the_snz = FormatDetection::new(Format::SnappyFramed, 1.0, "magic");
        assert!(the_snz.is_compressed());
        assert!(!the_snz.is_archive());
        assert!(!the_snz.is_columnar());

        let the_tarball = FormatDetection::new(Format::Tar, 0.95, "ustar");
        assert!(the_tarball.is_archive());
        assert!(!the_tarball.is_compressed());

        let the_orc = FormatDetection::new(Format::Orc, 0.9, "postscript");
        assert!(the_orc.is_columnar());

        let the_stranger = FormatDetection::new(Format::from_name("Arrow"), 1.0, "registered");
        assert_eq!(the_stranger.format, Format::Custom("arrow".to_string()));
        assert!(the_stranger.is_known());
        assert!(!the_stranger.is_compressed() && !the_stranger.is_archive() && !the_stranger.is_columnar());
    }

    #[test]
    fn the_one_where_unknown_is_never_known() {
        let the_shrug = FormatDetection::unknown("No decisive signature found.");
        assert!(!the_shrug.is_known());
        assert_eq!(the_shrug.confidence, 0.0);
        assert_eq!(
            the_shrug.summary(),
            "[UNKNOWN] confidence=0.00: No decisive signature found."
        );
    }

    #[test]
    fn the_one_where_names_round_trip_through_from_name() {
        for the_format in [
            Format::Parquet,
            Format::Gzip,
            Format::Lz4Frame,
            Format::SevenZ,
            Format::SnappyFramed,
            Format::Orc,
        ] {
            assert_eq!(Format::from_name(the_format.name()), the_format);
        }
    }
}

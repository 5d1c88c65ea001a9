//! 🔧 App Configuration: the sacred TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." (every developer at 3am) 🦆
//!
//! 🏗️ Powered by Figment, because manually parsing env vars is a form of self-harm that
//! even the borrow checker wouldn't approve of.
//!
//! ```toml
//! [source.S3]
//! bucket = "the-trip-bucket"
//! prefix = "2016/"
//!
//! [output]
//! directory = "./snappy_decompressed_events"
//!
//! [runtime]
//! max_objects = 20
//! max_workers = 10
//! object_timeout_secs = 300
//!
//! [parser]
//! timestamp_field = "dropoff_datetime"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::{DirectorySourceConfig, OutputConfig, S3SourceConfig};
use crate::decode::ContainerCodec;
use crate::events::{ParserConfig, TimeAdaptation};
use crate::sniff::SniffMode;

/// 📦 The AppConfig: one struct to rule them all, and in the Figment bind them.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AppConfig {
    /// 📡 Where the objects come from. The only section without a default.
    pub source: SourceConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    /// 🕰️ Off unless somebody asks. Nobody should ask casually.
    #[serde(default)]
    pub time_adaptation: TimeAdaptation,
}

impl AppConfig {
    /// 🎛️ Command-line knobs win over everything the file and env said.
    pub fn with_overrides(
        mut self,
        max_objects: Option<usize>,
        max_workers: Option<usize>,
        output_dir: Option<PathBuf>,
    ) -> Self {
        if let Some(n) = max_objects {
            self.runtime.max_objects = n;
        }
        if let Some(n) = max_workers {
            self.runtime.max_workers = n;
        }
        if let Some(dir) = output_dir {
            self.output.directory = dir;
        }
        self
    }
}

/// 🎭 Which backend lists and fetches the objects.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub enum SourceConfig {
    S3(S3SourceConfig),
    Directory(DirectorySourceConfig),
}

impl SourceConfig {
    pub fn prefix(&self) -> &str {
        match self {
            SourceConfig::S3(c) => &c.prefix,
            SourceConfig::Directory(c) => &c.prefix,
        }
    }
}

/// 🧵 How the coordinator runs the pool.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// 📜 Listing cap. The run never looks at more objects than this.
    #[serde(default = "default_max_objects")]
    pub max_objects: usize,
    /// 👷 Pool ceiling. The pool is never bigger than the number of objects.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// ⏱️ Wall-clock budget for one object, fetch to commit.
    #[serde(default = "default_object_timeout_secs")]
    pub object_timeout_secs: u64,
    /// 🧹 How long a cancelled object gets to tidy up its partial file before we stop waiting.
    #[serde(default = "default_cancel_grace_secs")]
    pub cancel_grace_secs: u64,
    #[serde(default)]
    pub codec: ContainerCodec,
    #[serde(default)]
    pub sniff: SniffMode,
    #[serde(default = "default_show_progress")]
    pub show_progress: bool,
}

fn default_max_objects() -> usize {
    20
}

fn default_max_workers() -> usize {
    10
}

fn default_object_timeout_secs() -> u64 {
    300
}

fn default_cancel_grace_secs() -> u64 {
    5
}

fn default_show_progress() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_objects: default_max_objects(),
            max_workers: default_max_workers(),
            object_timeout_secs: default_object_timeout_secs(),
            cancel_grace_secs: default_cancel_grace_secs(),
            codec: ContainerCodec::default(),
            sniff: SniffMode::default(),
            show_progress: default_show_progress(),
        }
    }
}

impl RuntimeConfig {
    pub fn object_timeout(&self) -> Duration {
        Duration::from_secs(self.object_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }
}

/// 🚀 Load the config: `TRAWL_*` env vars, then the TOML file on top if there is one.
///
/// 📐 Nested keys in env use a double underscore: `TRAWL_RUNTIME__MAX_WORKERS=4`.
/// No file → env only. File → env + file, file wins on conflicts.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("TRAWL_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (TRAWL_*). \
             The file exists in our hearts, but apparently not in a shape serde recognises.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (TRAWL_*). \
                 No file was provided, so this one's all on the environment. Classic."
            .to_string(),
    };

    let app_config: AppConfig = config.extract().context(context_msg)?;
    // -- a shift chrono can't hold would fail every single line, so fail the load instead
    app_config
        .time_adaptation
        .validate()
        .map_err(|reason| anyhow::anyhow!("💀 time_adaptation is unusable: {reason}"))?;
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut the_file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 Failed to create a temp config. The filesystem said 'new phone who dis'.");
        the_file
            .write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        the_file
    }

    #[test]
    fn the_one_where_every_section_shows_up_dressed() {
        let the_file = write_test_config(
            r#"
            time_adaptation = { shift_by_seconds = 3600 }

            [source.S3]
            bucket = "trips"
            prefix = "2016/"
            anonymous = false

            [output]
            directory = "/tmp/trawl-out"
            suffix = ".jsonl"
            flush_every_events = 500

            [runtime]
            max_objects = 3
            max_workers = 2
            object_timeout_secs = 30
            codec = "gzip"
            sniff = "buffered"
            show_progress = false

            [parser]
            timestamp_field = "pickup_datetime"
            partition_field = "vendor_id"
            adjustable_time_fields = ["pickup_datetime"]
            "#,
        );

        let the_config = load_config(Some(the_file.path()))
            .expect("💀 A fully specified config should parse.");

        match &the_config.source {
            SourceConfig::S3(s3) => {
                assert_eq!(s3.bucket, "trips");
                assert_eq!(s3.region, "us-east-1");
                assert!(!s3.anonymous);
                assert_eq!(s3.max_attempts, 3);
                assert_eq!(s3.key_suffix, ".snz");
            }
            honestly_who_knows => panic!(
                "💀 Expected an S3 source, but serde took us to {honestly_who_knows:?}. Plot twist energy."
            ),
        }
        assert_eq!(the_config.source.prefix(), "2016/");
        assert_eq!(the_config.output.suffix, ".jsonl");
        assert_eq!(the_config.output.flush_every_events, 500);
        assert_eq!(the_config.runtime.max_workers, 2);
        assert_eq!(the_config.runtime.codec, ContainerCodec::Gzip);
        assert_eq!(the_config.runtime.sniff, SniffMode::Buffered);
        assert_eq!(the_config.runtime.object_timeout(), Duration::from_secs(30));
        assert_eq!(the_config.runtime.cancel_grace(), Duration::from_secs(5));
        assert_eq!(the_config.parser.partition_field, "vendor_id");
        assert_eq!(the_config.time_adaptation, TimeAdaptation::ShiftBySeconds(3600));
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        let the_file = write_test_config(
            r#"
            [source.Directory]
            path = "./snz"
            "#,
        );

        let the_config: AppConfig = Figment::new()
            .merge(Toml::file(the_file.path()))
            .extract()
            .expect("💀 Defaults should fill in everything but the source.");

        assert_eq!(the_config.runtime, RuntimeConfig::default());
        assert_eq!(the_config.runtime.max_objects, 20);
        assert_eq!(the_config.runtime.max_workers, 10);
        assert_eq!(the_config.runtime.codec, ContainerCodec::SnappyFramed);
        assert_eq!(the_config.runtime.sniff, SniffMode::Prefix);
        assert_eq!(the_config.output, OutputConfig::default());
        assert_eq!(the_config.parser, ParserConfig::default());
        assert_eq!(the_config.time_adaptation, TimeAdaptation::Original);
        assert_eq!(the_config.source.prefix(), "");
    }

    #[test]
    fn the_one_where_the_command_line_gets_the_last_word() {
        let the_file = write_test_config("[source.Directory]\npath = \"./snz\"\n");
        let the_config: AppConfig = Figment::new()
            .merge(Toml::file(the_file.path()))
            .extract::<AppConfig>()
            .expect("💀 minimal config should parse")
            .with_overrides(Some(5), None, Some(PathBuf::from("elsewhere")));
        assert_eq!(the_config.runtime.max_objects, 5);
        assert_eq!(the_config.runtime.max_workers, 10);
        assert_eq!(the_config.output.directory, PathBuf::from("elsewhere"));
    }

    #[test]
    fn the_one_where_a_config_without_a_source_is_rejected() {
        let the_file = write_test_config("[runtime]\nmax_workers = 2\n");
        assert!(load_config(Some(the_file.path())).is_err());
    }

    #[test]
    fn the_one_where_a_shift_past_the_end_of_time_fails_the_load() {
        let the_file = write_test_config(
            r#"
            time_adaptation = { shift_by_seconds = 9223372036854775807 }

            [source.Directory]
            path = "./snz"
            "#,
        );
        let the_error = load_config(Some(the_file.path()))
            .expect_err("💀 an unrepresentable shift should not load");
        assert!(the_error.to_string().contains("shift_by_seconds"));
    }
}

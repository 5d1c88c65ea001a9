//! 🎣 trawl: pull snappy-framed NDJSON out of a bucket (or a directory), decode it, parse
//! every line into an event, and write it back out as plain NDJSON. Bounded pool, per-object
//! deadlines, and a report with one line per object at the end.
//!
//! 🧠 Knowledge graph:
//! - [`app_config`]: figment-loaded settings (`TRAWL_*` env + TOML).
//! - [`backends`]: where objects come from (S3, directory, memory) and where artifacts go.
//! - [`sniff`] + [`byte_source`]: advisory format detection over a peeked prefix.
//! - [`decode`]: the container codec that turns raw bytes into lines.
//! - [`events`]: line → `Event`, plus optional time adaptation.
//! - [`stats`] + [`report`]: the numbers, and the table they end up in.
//! - [`supervisors`]: the coordinator and its private pool of workers.

pub mod app_config;
pub mod backends;
pub mod byte_source;
pub mod common;
pub mod decode;
pub mod errors;
pub mod events;
pub mod progress;
pub mod report;
pub mod sniff;
pub mod stats;
pub mod supervisors;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::app_config::{AppConfig, SourceConfig};
use crate::backends::{
    DirectoryObjectSource, FileSink, S3ObjectSource, SinkBackend, SourceBackend,
};
use crate::events::EventParser;
use crate::report::RunOutcome;
use crate::supervisors::IngestionCoordinator;

pub use crate::common::{ObjectResult, ObjectStage, SourceObject};
pub use crate::errors::{MalformedLine, ObjectFailure};
pub use crate::report::{IngestSummary, RunReport};

/// 🚀 Build the backends from config, wire Ctrl-C to the shutdown token, and run once.
pub async fn run(app_config: AppConfig) -> Result<RunOutcome> {
    let the_prefix = app_config.source.prefix().to_string();
    let the_source = match &app_config.source {
        SourceConfig::S3(s3) => {
            info!(bucket = %s3.bucket, region = %s3.region, anonymous = s3.anonymous, "🪣 reading from S3");
            SourceBackend::S3(S3ObjectSource::new(s3, app_config.runtime.object_timeout()).await)
        }
        SourceConfig::Directory(dir) => {
            info!(path = %dir.path.display(), "📂 reading from a directory");
            SourceBackend::Directory(
                DirectoryObjectSource::new(dir.path.clone()).with_key_suffix(dir.key_suffix.clone()),
            )
        }
    };
    let the_sink = SinkBackend::File(FileSink::new(app_config.output.clone()));

    let the_shutdown = CancellationToken::new();
    let the_listener = the_shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received; finishing up what's in flight");
            the_listener.cancel();
        }
    });

    let the_coordinator = IngestionCoordinator::new(the_source, the_sink, app_config.runtime.clone())
        .with_parser(EventParser::new(app_config.parser.clone()))
        .with_time_adaptation(app_config.time_adaptation)
        .with_flush_every(app_config.output.flush_every_events)
        .with_shutdown(the_shutdown);

    the_coordinator.run(&the_prefix).await
}

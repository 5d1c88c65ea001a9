//! 🏭 One object, end to end: fetch → sniff → decode → parse → write → tally.
//!
//! 🎬 *[the worker picks up a key. it has three hundred seconds.]*
//! *[the fetch is async. everything after it runs on a blocking thread, line by line.]*
//! *[the coordinator holds a stopwatch and a cancellation token. it is not afraid to use either.]*
//!
//! 🧠 Knowledge graph:
//! - [`process_object`] is the async half: it fetches under the object deadline, bridges
//!   the body into a blocking `Read` with `SyncIoBridge`, and races the blocking job
//!   against the deadline and the shutdown token.
//! - [`ObjectJob::run`] is the blocking half: it owns the decoder and the one writer for
//!   this object, checks its cancel token every line, and either commits or abandons.
//! - When the clock wins, the job's token is cancelled and it gets `cancel_grace` to
//!   clean up its partial file. If it's wedged in a read, the partial stays behind wearing
//!   its `.partial` suffix, and we move on without it.
//! - Stats are recorded here, exactly once, and only for objects that committed.

use std::any::Any;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::task::JoinError;
use tokio_util::io::SyncIoBridge;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backends::{ObjectSource, OutputSink, SinkBackend, SinkWriter, SourceBackend};
use crate::byte_source::{PeekedSource, TransportReader, classify_read_error, materialize};
use crate::common::{ObjectResult, ObjectStage, SourceObject, StageCell};
use crate::decode::ContainerCodec;
use crate::errors::ObjectFailure;
use crate::events::{EventParser, ParsedLine, TimeAdaptation};
use crate::progress::IngestProgress;
use crate::sniff::{Format, FormatDetection, FormatSniffer, PREFIX_PEEK_BYTES, SniffMode, SniffSample};
use crate::stats::{ObjectTally, StatsAggregator, TimestampBounds};

/// 🎛️ The per-object knobs, copied out of the runtime config once per run.
#[derive(Debug, Clone)]
pub(crate) struct PipelineSettings {
    pub(crate) codec: ContainerCodec,
    pub(crate) sniff: SniffMode,
    pub(crate) flush_every_events: u64,
    pub(crate) time_adaptation: TimeAdaptation,
    pub(crate) object_timeout: Duration,
    pub(crate) cancel_grace: Duration,
}

/// 🧰 Everything a worker needs, shared by every worker of one run.
#[derive(Debug)]
pub(crate) struct IngestContext {
    pub(crate) source: Arc<SourceBackend>,
    pub(crate) sink: Arc<SinkBackend>,
    pub(crate) sniffer: Arc<FormatSniffer>,
    pub(crate) parser: Arc<EventParser>,
    pub(crate) stats: Arc<StatsAggregator>,
    pub(crate) progress: IngestProgress,
    pub(crate) settings: PipelineSettings,
    /// 🛑 Cancelled on operator shutdown or when the batch deadline runs out.
    pub(crate) shutdown: CancellationToken,
}

/// 📋 What a committed object hands back to the async side.
#[derive(Debug)]
struct JobReport {
    output_path: PathBuf,
    event_count: u64,
    skipped_lines: u64,
    decoded_bytes: u64,
    bounds: TimestampBounds,
    detection: Option<FormatDetection>,
    processing_seconds: f64,
}

/// 🔢 Per-object counters while the stream is flowing.
#[derive(Debug, Default)]
struct LineTally {
    events: u64,
    skipped: u64,
    bounds: TimestampBounds,
    unreported_events: u64,
    reported_bytes: u64,
}

type JobOutcome = Result<Result<JobReport, ObjectFailure>, JoinError>;

enum Verdict {
    Joined(JobOutcome),
    Expired(ObjectFailure),
}

/// 🚀 Run one object to completion (or to its deadline). Always returns exactly one result.
pub(crate) async fn process_object(
    ctx: Arc<IngestContext>,
    worker_id: usize,
    object: SourceObject,
) -> ObjectResult {
    let the_started = Instant::now();
    let the_budget = ctx.settings.object_timeout;
    let the_deadline = tokio::time::Instant::now() + the_budget;
    let the_output_path = ctx.sink.artifact_path(&object.key);
    let the_stage = StageCell::new();

    let failed = |failure: ObjectFailure| {
        warn!(
            key = %object.key,
            worker_id,
            kind = failure.kind(),
            error = %failure,
            "💀 object failed"
        );
        ObjectResult::failed(
            object.clone(),
            the_output_path.clone(),
            worker_id,
            the_started.elapsed().as_secs_f64(),
            failure,
        )
    };

    // -- 📡 fetch, under the object deadline. the SDK has its own copy of the budget too
    the_stage.set(ObjectStage::Fetching);
    debug!(key = %object.key, worker_id, size_bytes = object.size_bytes, "📡 fetching");
    let the_fetch = tokio::select! {
        biased;
        _ = ctx.shutdown.cancelled() => Err(ObjectFailure::Interrupted { stage: ObjectStage::Fetching }),
        fetched = tokio::time::timeout_at(the_deadline, ctx.source.fetch(&object)) => match fetched {
            Ok(result) => result,
            Err(_elapsed) => Err(ObjectFailure::Timeout { budget: the_budget, stage: ObjectStage::Fetching }),
        },
    };
    let the_fetched = match the_fetch {
        Ok(fetched) => fetched,
        Err(failure) => return failed(failure),
    };

    // -- 🧵 everything after the fetch is blocking work on a blocking thread
    let the_cancel = ctx.shutdown.child_token();
    let the_bridge = SyncIoBridge::new(the_fetched.body);
    let the_job = ObjectJob {
        object: object.clone(),
        ctx: Arc::clone(&ctx),
        stage: the_stage.clone(),
        cancel: the_cancel.clone(),
    };
    let mut the_handle = tokio::task::spawn_blocking(move || the_job.run(the_bridge));

    let the_verdict = tokio::select! {
        biased;
        joined = &mut the_handle => Verdict::Joined(joined),
        _ = tokio::time::sleep_until(the_deadline) => Verdict::Expired(ObjectFailure::Timeout {
            budget: the_budget,
            stage: the_stage.get(),
        }),
        _ = ctx.shutdown.cancelled() => Verdict::Expired(ObjectFailure::Interrupted {
            stage: the_stage.get(),
        }),
    };

    match the_verdict {
        Verdict::Joined(Ok(Ok(report))) => {
            ingested(&ctx, object, worker_id, the_fetched.size_bytes, report)
        }
        Verdict::Joined(Ok(Err(failure))) => failed(failure),
        Verdict::Joined(Err(join_error)) => failed(ObjectFailure::Panicked(join_message(join_error))),
        Verdict::Expired(failure) => {
            the_cancel.cancel();
            let the_joined = match tokio::time::timeout(ctx.settings.cancel_grace, &mut the_handle).await {
                Ok(joined) => {
                    debug!(key = %object.key, "🧹 cancelled job wound down within the grace period");
                    Some(joined)
                }
                Err(_) => {
                    warn!(
                        key = %object.key,
                        grace = ?ctx.settings.cancel_grace,
                        "⚠️ job is still stuck after the grace period; its output stays marked .partial"
                    );
                    None
                }
            };
            match settle_expired(failure, the_joined) {
                Ok(report) => {
                    info!(key = %object.key, "🏁 job committed as the clock ran out; keeping it");
                    ingested(&ctx, object, worker_id, the_fetched.size_bytes, report)
                }
                Err(failure) => failed(failure),
            }
        }
    }
}

/// 🏁 What a job that was told to stop actually ended up doing. A commit that landed before
/// the cancel was heard is published on disk, so it counts; anything else keeps the expiry.
fn settle_expired(expired: ObjectFailure, joined: Option<JobOutcome>) -> Result<JobReport, ObjectFailure> {
    match joined {
        Some(Ok(Ok(report))) => Ok(report),
        _ => Err(expired),
    }
}

/// ✅ Record a committed object in the stats and turn its report into a result.
fn ingested(
    ctx: &IngestContext,
    object: SourceObject,
    worker_id: usize,
    size_bytes: u64,
    report: JobReport,
) -> ObjectResult {
    let the_tally = ObjectTally {
        event_count: report.event_count,
        processing_seconds: report.processing_seconds,
        bounds: report.bounds,
    };
    ctx.stats.record(&the_tally);
    let the_result = ObjectResult {
        object,
        output_path: report.output_path,
        event_count: report.event_count,
        skipped_lines: report.skipped_lines,
        processing_seconds: report.processing_seconds,
        worker_id,
        earliest_millis: report.bounds.earliest,
        latest_millis: report.bounds.latest,
        detection: report.detection,
        stage: ObjectStage::Done,
        error: None,
    };
    info!(
        key = %the_result.object.key,
        worker_id,
        size_bytes,
        decoded_bytes = report.decoded_bytes,
        events = the_result.event_count,
        skipped = the_result.skipped_lines,
        seconds = format_args!("{:.2}", the_result.processing_seconds),
        events_per_sec = format_args!("{:.0}", the_result.throughput()),
        "✅ object ingested"
    );
    the_result
}

fn join_message(err: JoinError) -> String {
    if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        err.to_string()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// 🔧 The blocking half of one object. Lives on a blocking thread, dies there too.
struct ObjectJob {
    object: SourceObject,
    ctx: Arc<IngestContext>,
    stage: StageCell,
    cancel: CancellationToken,
}

impl ObjectJob {
    fn run<R: Read + Send>(self, raw: R) -> Result<JobReport, ObjectFailure> {
        let the_started = Instant::now();
        self.stage.set(ObjectStage::Decoding);
        let the_raw = TransportReader::new(raw);

        match self.ctx.settings.sniff {
            SniffMode::Off => self.drain(the_raw, None, the_started),
            SniffMode::Prefix => {
                let the_peeked = PeekedSource::peek(the_raw, PREFIX_PEEK_BYTES)
                    .map_err(|e| classify_read_error(&e))?;
                let the_sample = SniffSample::from_prefix(the_peeked.prefix(), the_peeked.reached_eof());
                let the_detection = self.ctx.sniffer.detect_sample(&the_sample);
                self.log_detection(&the_detection);
                self.drain(the_peeked.into_reader(), Some(the_detection), the_started)
            }
            SniffMode::Buffered => {
                let mut the_buffer = materialize(the_raw).map_err(|e| classify_read_error(&e))?;
                let the_detection = self.ctx.sniffer.detect_seekable(&mut the_buffer);
                self.log_detection(&the_detection);
                self.drain(the_buffer, Some(the_detection), the_started)
            }
        }
    }

    /// 🔬 Advisory only. A disagreement gets a warning, never a veto.
    fn log_detection(&self, detection: &FormatDetection) {
        info!(key = %self.object.key, detection = %detection.summary(), "🔬 sniffed");
        let the_expected = match self.ctx.settings.codec {
            ContainerCodec::SnappyFramed => Format::SnappyFramed,
            ContainerCodec::Gzip => Format::Gzip,
            ContainerCodec::Identity => Format::Ndjson,
        };
        if detection.is_known() && detection.format != the_expected {
            warn!(
                key = %self.object.key,
                sniffed = %detection.format,
                codec = self.ctx.settings.codec.as_str(),
                "⚠️ sniffed format disagrees with the configured codec; decoding with the codec anyway"
            );
        }
    }

    /// 🚰 Open the writer, pump every line through it, then commit or abandon. No third option.
    fn drain<S: Read + Send>(
        &self,
        raw: S,
        detection: Option<FormatDetection>,
        started: Instant,
    ) -> Result<JobReport, ObjectFailure> {
        let mut the_writer = self.ctx.sink.open_for_append(&self.object.key)?;
        let the_pumped = self.pump(raw, &mut the_writer);
        let (the_tally, the_decoded_bytes) = match the_pumped {
            Ok(pumped) => pumped,
            Err(failure) => {
                the_writer.abandon();
                return Err(failure);
            }
        };

        self.stage.set(ObjectStage::Writing);
        if self.cancel.is_cancelled() {
            the_writer.abandon();
            return Err(ObjectFailure::Interrupted {
                stage: ObjectStage::Writing,
            });
        }
        let the_output_path = the_writer.commit()?;
        self.ctx.progress.record(
            the_tally.unreported_events,
            the_decoded_bytes.saturating_sub(the_tally.reported_bytes),
        );

        Ok(JobReport {
            output_path: the_output_path,
            event_count: the_tally.events,
            skipped_lines: the_tally.skipped,
            decoded_bytes: the_decoded_bytes,
            bounds: the_tally.bounds,
            detection,
            processing_seconds: started.elapsed().as_secs_f64(),
        })
    }

    fn pump<S: Read + Send>(
        &self,
        raw: S,
        writer: &mut SinkWriter,
    ) -> Result<(LineTally, u64), ObjectFailure> {
        let the_parser = &self.ctx.parser;
        let the_adaptation = self.ctx.settings.time_adaptation;
        let the_flush_every = self.ctx.settings.flush_every_events;
        let the_now = Utc::now();

        let mut the_stream = self.ctx.settings.codec.decode(raw);
        let mut the_tally = LineTally::default();
        let mut the_line = Vec::with_capacity(4096);
        let mut the_line_number = 0u64;

        self.stage.set(ObjectStage::Parsing);
        loop {
            if self.cancel.is_cancelled() {
                return Err(ObjectFailure::Interrupted {
                    stage: self.stage.get(),
                });
            }
            the_line.clear();
            if the_stream.read_line(&mut the_line)? == 0 {
                break;
            }
            the_line_number += 1;

            let the_event = match the_parser.parse_bytes(&the_line) {
                Ok(ParsedLine::Blank) => continue,
                Ok(ParsedLine::Event(event)) => event,
                Err(cause) => {
                    the_tally.skipped += 1;
                    warn!(key = %self.object.key, line = the_line_number, %cause, "🗑️ skipping malformed line");
                    continue;
                }
            };
            let the_event = match the_adaptation {
                TimeAdaptation::Original => the_event,
                adaptation => match the_parser.adapt(&the_event, adaptation, the_now) {
                    Ok(adapted) => adapted,
                    Err(cause) => {
                        the_tally.skipped += 1;
                        warn!(key = %self.object.key, line = the_line_number, %cause, "🗑️ skipping line that could not be re-timed");
                        continue;
                    }
                },
            };

            writer.append(&the_event)?;
            if let Some(ms) = the_event.timestamp_millis() {
                the_tally.bounds.observe(ms);
            }
            the_tally.events += 1;
            the_tally.unreported_events += 1;

            if the_flush_every > 0 && the_tally.events % the_flush_every == 0 {
                writer.flush()?;
                let the_bytes = the_stream.bytes_out();
                self.ctx.progress.record(
                    the_tally.unreported_events,
                    the_bytes.saturating_sub(the_tally.reported_bytes),
                );
                the_tally.unreported_events = 0;
                the_tally.reported_bytes = the_bytes;
            }
        }

        Ok((the_tally, the_stream.bytes_out()))
    }
}

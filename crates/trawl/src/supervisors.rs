//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 *[dramatic orchestral music swells]*
//! 🎬 "In a world where workers toil endlessly..."
//! 🎬 "One coordinator dared to manage them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The coordinator: part middle manager, part helicopter parent. It lists the objects,
//! hands them to a bounded pool, and refuses to go home until every single object has a
//! result next to its name. Success, failure, timeout, panic. Everybody gets a line.
//!
//! ⚠️ The workers stay private. Like Fight Club, but for async tasks.
//!
//! 🧠 Knowledge graph:
//! - queue: `async_channel::bounded(n)`, filled up front then closed. Workers drain it.
//! - results: `(index, ObjectResult)` on a second channel, slotted by index.
//! - deadlines: each object has its own. The batch has `object_timeout × n + grace` on top,
//!   as the backstop for the backstop.
//! - shutdown: the caller's token. Once it fires nothing new is dispatched, in-flight work
//!   gets `cancel_grace`, and everything unfinished is reported as interrupted.

mod pipeline;
mod workers;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app_config::RuntimeConfig;
use crate::backends::{ObjectSource, OutputSink, SinkBackend, SourceBackend};
use crate::common::{ObjectResult, ObjectStage, SourceObject};
use crate::errors::ObjectFailure;
use crate::events::{EventParser, TimeAdaptation};
use crate::progress::IngestProgress;
use crate::report::{IngestSummary, RunOutcome, RunReport};
use crate::sniff::FormatSniffer;
use crate::stats::StatsAggregator;
use pipeline::{IngestContext, PipelineSettings};
use workers::{IngestWorker, Worker};

/// 🧑‍💼 Lists, dispatches, waits, and writes the report. Reusable across runs.
#[derive(Debug)]
pub struct IngestionCoordinator {
    source: Arc<SourceBackend>,
    sink: Arc<SinkBackend>,
    sniffer: Arc<FormatSniffer>,
    parser: Arc<EventParser>,
    runtime: RuntimeConfig,
    object_timeout: Duration,
    cancel_grace: Duration,
    flush_every_events: u64,
    time_adaptation: TimeAdaptation,
    shutdown: CancellationToken,
}

/// 🚦 Where the collection loop is in its own little life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Collecting {
    Normally,
    /// ⏱️ The batch deadline fired. In-flight work was cancelled; waiting out the grace.
    AfterBatchDeadline,
    /// 🛑 Shutdown was requested. Waiting out the grace for in-flight work to say goodbye.
    AfterShutdown,
}

impl IngestionCoordinator {
    pub fn new(source: SourceBackend, sink: SinkBackend, runtime: RuntimeConfig) -> Self {
        Self {
            source: Arc::new(source),
            sink: Arc::new(sink),
            sniffer: Arc::new(FormatSniffer::default()),
            parser: Arc::new(EventParser::default()),
            object_timeout: runtime.object_timeout(),
            cancel_grace: runtime.cancel_grace(),
            runtime,
            flush_every_events: 10_000,
            time_adaptation: TimeAdaptation::Original,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_parser(mut self, parser: EventParser) -> Self {
        self.parser = Arc::new(parser);
        self
    }

    pub fn with_sniffer(mut self, sniffer: FormatSniffer) -> Self {
        self.sniffer = Arc::new(sniffer);
        self
    }

    pub fn with_time_adaptation(mut self, adaptation: TimeAdaptation) -> Self {
        self.time_adaptation = adaptation;
        self
    }

    pub fn with_flush_every(mut self, events: u64) -> Self {
        self.flush_every_events = events;
        self
    }

    /// ⏱️ Sub-second deadlines. The config only speaks whole seconds; tests and callers
    /// embedding the coordinator sometimes need less.
    pub fn with_deadlines(mut self, object_timeout: Duration, cancel_grace: Duration) -> Self {
        self.object_timeout = object_timeout;
        self.cancel_grace = cancel_grace;
        self
    }

    /// 🛑 Hand over a token the caller can cancel (Ctrl-C, a test, a very impatient human).
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 📁 Where the artifacts end up, for the report.
    pub fn output_location(&self) -> PathBuf {
        match self.sink.as_ref() {
            SinkBackend::File(sink) => sink.directory().to_path_buf(),
            SinkBackend::InMemory(_) => PathBuf::from("memory"),
        }
    }

    /// 🚀 List under `prefix` (capped at `max_objects`) and ingest whatever comes back.
    ///
    /// 💀 Only a listing failure is an `Err`. Per-object failures live in the report.
    pub async fn run(&self, prefix: &str) -> Result<RunOutcome> {
        let the_objects = self
            .source
            .list(prefix, self.runtime.max_objects)
            .await
            .with_context(|| format!("💀 Could not list objects under prefix '{prefix}'."))?;
        if the_objects.is_empty() {
            warn!(prefix, "🕳️ nothing listed, nothing to do");
            return Ok(RunOutcome::NothingListed {
                prefix: prefix.to_string(),
            });
        }
        info!(prefix, count = the_objects.len(), "📜 listed objects");
        Ok(RunOutcome::Completed(self.ingest(the_objects).await))
    }

    /// 🧵 Push every object through the pool. Returns exactly one result per object, sorted by key.
    pub async fn ingest(&self, objects: Vec<SourceObject>) -> RunReport {
        let the_started = Instant::now();
        let the_count = objects.len();
        let the_stats = Arc::new(StatsAggregator::new());
        let the_progress = IngestProgress::new(the_count as u64, self.runtime.show_progress);

        if the_count == 0 {
            return self.report(Vec::new(), &the_stats, the_started);
        }

        // -- the run token is ours to cancel at the batch deadline, and it still hears the caller's
        let the_run_token = self.shutdown.child_token();
        let the_ctx = Arc::new(IngestContext {
            source: Arc::clone(&self.source),
            sink: Arc::clone(&self.sink),
            sniffer: Arc::clone(&self.sniffer),
            parser: Arc::clone(&self.parser),
            stats: Arc::clone(&the_stats),
            progress: the_progress.clone(),
            settings: PipelineSettings {
                codec: self.runtime.codec,
                sniff: self.runtime.sniff,
                flush_every_events: self.flush_every_events,
                time_adaptation: self.time_adaptation,
                object_timeout: self.object_timeout,
                cancel_grace: self.cancel_grace,
            },
            shutdown: the_run_token.clone(),
        });

        let mut the_slots: Vec<Option<ObjectResult>> = vec![None; the_count];
        let the_dispatch = self.claim_outputs(&objects, &mut the_slots);
        for the_refused in the_slots.iter().flatten() {
            the_progress.object_finished(the_refused);
        }
        // -- never empty: the first object to claim a name always gets dispatched
        let the_dispatched = the_dispatch.len();

        // -- 📬 fill the queue up front, then close it. empty + closed is how workers know to go home
        let (the_work_tx, the_work_rx) = async_channel::bounded(the_dispatched.max(1));
        for the_job in the_dispatch {
            if the_work_tx.try_send(the_job).is_err() {
                break;
            }
        }
        the_work_tx.close();

        let the_pool_size = self.runtime.max_workers.max(1).min(the_dispatched.max(1));
        let (the_result_tx, the_result_rx) = async_channel::unbounded();
        let the_handles: Vec<_> = (0..the_pool_size)
            .map(|id| {
                IngestWorker::new(
                    id,
                    the_work_rx.clone(),
                    the_result_tx.clone(),
                    Arc::clone(&the_ctx),
                )
                .start()
            })
            .collect();
        drop(the_result_tx);
        info!(
            objects = the_dispatched,
            workers = the_pool_size,
            timeout = ?self.object_timeout,
            "🧵 pool started"
        );

        let the_grace = self.cancel_grace;
        let the_batch_budget = self
            .object_timeout
            .saturating_mul(u32::try_from(the_dispatched).unwrap_or(u32::MAX))
            .saturating_add(the_grace);
        let mut the_deadline = tokio::time::Instant::now() + the_batch_budget;
        let mut the_phase = Collecting::Normally;

        loop {
            tokio::select! {
                biased;
                received = the_result_rx.recv() => {
                    let Ok((the_index, mut the_result)) = received else {
                        // -- every worker has dropped its sender. collection is over
                        break;
                    };
                    if the_phase == Collecting::AfterBatchDeadline {
                        // -- we cancelled it, the clock made us. call it what it was
                        if let Some(ObjectFailure::Interrupted { stage }) = the_result.error {
                            the_result.error = Some(ObjectFailure::Timeout { budget: the_batch_budget, stage });
                        }
                    }
                    the_progress.object_finished(&the_result);
                    if let Some(the_slot) = the_slots.get_mut(the_index) {
                        *the_slot = Some(the_result);
                    }
                }
                _ = self.shutdown.cancelled(), if the_phase != Collecting::AfterShutdown => {
                    warn!(grace = ?the_grace, "🛑 shutdown requested; no new objects will start");
                    the_phase = Collecting::AfterShutdown;
                    the_deadline = the_deadline.min(tokio::time::Instant::now() + the_grace);
                }
                _ = tokio::time::sleep_until(the_deadline) => {
                    if the_phase == Collecting::Normally {
                        warn!(budget = ?the_batch_budget, "⏱️ batch deadline reached; cancelling whatever is still running");
                        the_run_token.cancel();
                        the_phase = Collecting::AfterBatchDeadline;
                        the_deadline = tokio::time::Instant::now() + the_grace;
                    } else {
                        break;
                    }
                }
            }
        }

        // -- a worker still parked on a wedged blocking job gets aborted; nobody waits on it
        for the_handle in the_handles.iter().filter(|h| !h.is_finished()) {
            the_handle.abort();
        }
        for the_joined in futures::future::join_all(the_handles).await {
            match the_joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "⚠️ worker ended with an error"),
                Err(e) if e.is_cancelled() => debug!("🪓 aborted a worker that never came back"),
                Err(e) => warn!(error = %e, "⚠️ worker task died"),
            }
        }
        the_progress.finish();

        // -- 🧾 nobody gets left off the list. unreported objects get a result written for them
        let the_results = objects
            .into_iter()
            .zip(the_slots)
            .map(|(the_object, the_slot)| match the_slot {
                Some(result) => result,
                None => self.unreported(the_object, the_phase, the_batch_budget),
            })
            .collect();

        self.report(the_results, &the_stats, the_started)
    }

    /// 🏷️ One writer per output file. Keys that flatten to a name somebody earlier in the
    /// list already claimed get a `Write` failure in their slot and never reach a worker.
    fn claim_outputs(
        &self,
        objects: &[SourceObject],
        slots: &mut [Option<ObjectResult>],
    ) -> Vec<(usize, SourceObject)> {
        let mut the_claims: HashMap<PathBuf, &str> = HashMap::with_capacity(objects.len());
        let mut the_dispatch = Vec::with_capacity(objects.len());
        for (the_index, the_object) in objects.iter().enumerate() {
            match the_claims.entry(self.sink.artifact_path(&the_object.key)) {
                Entry::Vacant(the_free) => {
                    the_free.insert(&the_object.key);
                    the_dispatch.push((the_index, the_object.clone()));
                }
                Entry::Occupied(the_taken) => {
                    let the_owner = *the_taken.get();
                    warn!(
                        key = %the_object.key,
                        owner = %the_owner,
                        path = %the_taken.key().display(),
                        "🚫 output name already claimed; skipping object"
                    );
                    let the_failure =
                        ObjectFailure::Write(format!("output name collides with '{the_owner}'"));
                    if let Some(the_slot) = slots.get_mut(the_index) {
                        *the_slot = Some(ObjectResult::failed(
                            the_object.clone(),
                            the_taken.key().clone(),
                            usize::MAX,
                            0.0,
                            the_failure,
                        ));
                    }
                }
            }
        }
        the_dispatch
    }

    fn unreported(
        &self,
        object: SourceObject,
        phase: Collecting,
        batch_budget: Duration,
    ) -> ObjectResult {
        // -- the caller's token outranks the phase: workers may have quit before we noticed it
        let the_failure = if self.shutdown.is_cancelled() {
            ObjectFailure::Interrupted {
                stage: ObjectStage::Queued,
            }
        } else if phase == Collecting::AfterBatchDeadline {
            ObjectFailure::Timeout {
                budget: batch_budget,
                stage: ObjectStage::Queued,
            }
        } else {
            ObjectFailure::Panicked("worker exited without reporting a result".to_string())
        };
        let the_output_path = self.sink.artifact_path(&object.key);
        ObjectResult::failed(object, the_output_path, usize::MAX, 0.0, the_failure)
    }

    fn report(
        &self,
        mut results: Vec<ObjectResult>,
        stats: &StatsAggregator,
        started: Instant,
    ) -> RunReport {
        results.sort_by(|a, b| a.object.key.cmp(&b.object.key));
        let the_summary = IngestSummary::from_results(&results, &stats.summary(), started.elapsed());
        info!(
            processed = the_summary.objects_processed,
            failed = the_summary.objects_failed,
            events = the_summary.total_events,
            skipped = the_summary.skipped_lines,
            wall_seconds = format_args!("{:.2}", the_summary.total_wall_seconds),
            "🏁 run finished"
        );
        RunReport {
            summary: the_summary,
            results,
            output_location: self.output_location(),
        }
    }
}

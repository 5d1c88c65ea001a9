//! 🧾 The run report: what got listed, what got ingested, what fell over, and how fast.
//!
//! 🧠 Knowledge graph:
//! - [`IngestSummary`] is the headline numbers, built from the aggregate plus the results.
//! - [`RunReport`] carries the summary *and* every `ObjectResult`, sorted by key.
//! - [`RunOutcome`] keeps "nothing was even listed" apart from "everything failed", because
//!   those are two very different 3am phone calls.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};

use crate::common::ObjectResult;
use crate::progress::{format_duration, format_number};
use crate::stats::AggregateStats;

/// 📈 The headline numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSummary {
    pub objects_listed: u64,
    pub objects_processed: u64,
    pub objects_failed: u64,
    pub total_events: u64,
    pub skipped_lines: u64,
    /// 🚀 Total events over total wall time.
    pub overall_throughput_events_per_second: f64,
    pub earliest_timestamp_millis: Option<i64>,
    pub latest_timestamp_millis: Option<i64>,
    pub total_wall_seconds: f64,
    /// ⏱️ Sum of per-object processing time. Exceeds wall time when workers overlap.
    pub total_processing_seconds: f64,
}

impl IngestSummary {
    pub fn from_results(
        results: &[ObjectResult],
        aggregate: &AggregateStats,
        wall_time: Duration,
    ) -> Self {
        let the_failed = results.iter().filter(|r| !r.is_success()).count() as u64;
        let the_wall_seconds = wall_time.as_secs_f64();
        let the_throughput = if the_wall_seconds > 0.0 {
            aggregate.total_events as f64 / the_wall_seconds
        } else {
            0.0
        };
        Self {
            objects_listed: results.len() as u64,
            objects_processed: results.len() as u64 - the_failed,
            objects_failed: the_failed,
            total_events: aggregate.total_events,
            skipped_lines: results.iter().map(|r| r.skipped_lines).sum(),
            overall_throughput_events_per_second: the_throughput,
            earliest_timestamp_millis: aggregate.earliest_millis,
            latest_timestamp_millis: aggregate.latest_millis,
            total_wall_seconds: the_wall_seconds,
            total_processing_seconds: aggregate.total_processing_seconds,
        }
    }

    pub fn all_failed(&self) -> bool {
        self.objects_listed > 0 && self.objects_processed == 0
    }
}

/// 📦 Everything a caller needs to know about one run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: IngestSummary,
    /// 🧾 Exactly one per listed object, sorted by key.
    pub results: Vec<ObjectResult>,
    pub output_location: PathBuf,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &ObjectResult> {
        self.results.iter().filter(|r| !r.is_success())
    }
}

/// 🎬 How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// 🕳️ The listing came back empty. Nothing to do, which is also a kind of failure.
    NothingListed { prefix: String },
    Completed(RunReport),
}

impl RunOutcome {
    /// ✅ Success means something was listed and at least one object made it.
    pub fn is_success(&self) -> bool {
        match self {
            RunOutcome::NothingListed { .. } => false,
            RunOutcome::Completed(report) => !report.summary.all_failed(),
        }
    }
}

fn format_millis(millis: Option<i64>) -> String {
    millis
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| "n/a".to_string())
}

fn right(text: impl Into<String>) -> Cell {
    Cell::new(text.into()).set_alignment(CellAlignment::Right)
}

/// 🍽️ The summary as a table, for humans.
pub fn render_summary(report: &RunReport) -> String {
    let s = &report.summary;
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["metric", "value"]);
    table.add_row(vec![Cell::new("objects listed"), right(format_number(s.objects_listed))]);
    table.add_row(vec![Cell::new("objects processed"), right(format_number(s.objects_processed))]);
    table.add_row(vec![Cell::new("objects failed"), right(format_number(s.objects_failed))]);
    table.add_row(vec![Cell::new("events"), right(format_number(s.total_events))]);
    table.add_row(vec![Cell::new("skipped lines"), right(format_number(s.skipped_lines))]);
    table.add_row(vec![
        Cell::new("events/s (wall)"),
        right(format_number(s.overall_throughput_events_per_second as u64)),
    ]);
    table.add_row(vec![Cell::new("earliest event"), right(format_millis(s.earliest_timestamp_millis))]);
    table.add_row(vec![Cell::new("latest event"), right(format_millis(s.latest_timestamp_millis))]);
    table.add_row(vec![
        Cell::new("wall time"),
        right(format_duration(Duration::from_secs_f64(s.total_wall_seconds))),
    ]);
    table.add_row(vec![
        Cell::new("output"),
        right(report.output_location.display().to_string()),
    ]);
    table.to_string()
}

/// 💀 One row per failed object. Empty string when nothing failed.
pub fn render_failures(report: &RunReport) -> String {
    let mut the_failures = report.failures().peekable();
    if the_failures.peek().is_none() {
        return String::new();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["object", "kind", "error"]);
    for the_result in the_failures {
        let (the_kind, the_message) = match &the_result.error {
            Some(e) => (e.kind(), e.to_string()),
            None => ("", String::new()),
        };
        table.add_row(vec![the_result.object.label(), the_kind.to_string(), the_message]);
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{ObjectStage, SourceObject};
    use crate::errors::ObjectFailure;

    fn ok_result(key: &str, events: u64) -> ObjectResult {
        ObjectResult {
            object: SourceObject::new("b", key, 10),
            output_path: PathBuf::from(key),
            event_count: events,
            skipped_lines: 1,
            processing_seconds: 1.0,
            worker_id: 0,
            earliest_millis: None,
            latest_millis: None,
            detection: None,
            stage: ObjectStage::Done,
            error: None,
        }
    }

    #[test]
    fn the_one_where_the_summary_counts_winners_and_losers() {
        let the_results = vec![
            ok_result("a", 10),
            ok_result("b", 20),
            ObjectResult::failed(
                SourceObject::new("b", "c", 1),
                PathBuf::from("c"),
                1,
                0.0,
                ObjectFailure::Decode("bad frame".into()),
            ),
        ];
        let the_aggregate = AggregateStats {
            total_events: 30,
            total_processing_seconds: 2.0,
            earliest_millis: Some(1),
            latest_millis: Some(2),
        };
        let the_summary =
            IngestSummary::from_results(&the_results, &the_aggregate, Duration::from_secs(3));
        assert_eq!(the_summary.objects_listed, 3);
        assert_eq!(the_summary.objects_processed, 2);
        assert_eq!(the_summary.objects_failed, 1);
        assert_eq!(the_summary.skipped_lines, 2);
        assert!((the_summary.overall_throughput_events_per_second - 10.0).abs() < 1e-9);
        assert!(!the_summary.all_failed());

        let the_report = RunReport {
            summary: the_summary,
            results: the_results,
            output_location: PathBuf::from("out"),
        };
        assert!(RunOutcome::Completed(the_report.clone()).is_success());
        assert!(render_summary(&the_report).contains("objects failed"));
        assert!(render_failures(&the_report).contains("bad frame"));
    }

    #[test]
    fn the_one_where_nothing_listed_is_not_a_success() {
        assert!(!RunOutcome::NothingListed { prefix: "x/".into() }.is_success());
        assert_eq!(format_millis(Some(1_451_626_380_000)), "2016-01-01T05:33:00.000Z");
        assert_eq!(format_millis(None), "n/a");
    }
}

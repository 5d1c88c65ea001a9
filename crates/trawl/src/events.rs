//! 🚕 Events: one line of NDJSON, a timestamp, and a partition key walk into a struct.
//!
//! 🎬 *[a taxi drops someone off at 05:33 on New Year's Day, 2016.]*
//! *[nine years later, that moment is a line in a snappy frame in a bucket.]*
//! *[the parser reads it, nods, and writes it down again. verbatim. it does not judge the tip.]*
//!
//! 🧠 Knowledge graph:
//! - [`EventParser::parse`]: one line → [`Event`] or [`MalformedLine`]. Never aborts a stream.
//! - The raw payload is preserved byte-for-byte; only the *parsed* millis feed the bounds.
//! - [`TimeAdaptation`]: the off-by-default side quest that shifts or re-aligns every
//!   configured time field and re-serializes the line, keeping field order.

mod timestamp;

use std::io::{self, Write};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::errors::MalformedLine;
use timestamp::{ParsedTimestamp, parse_timestamp};

/// 🚕 One parsed line. Created once, never mutated, dropped right after it's written.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// The original text, terminator stripped. Serialization puts exactly one `\n` back.
    raw_line: String,
    timestamp_millis: Option<i64>,
    partition_key: String,
}

impl Event {
    pub fn raw_line(&self) -> &str {
        &self.raw_line
    }

    pub fn timestamp_millis(&self) -> Option<i64> {
        self.timestamp_millis
    }

    pub fn partition_key(&self) -> &str {
        &self.partition_key
    }

    /// 📄 The line as it goes to disk: original text + exactly one `\n`. Never two.
    pub fn to_line(&self) -> String {
        let mut the_line = String::with_capacity(self.raw_line.len() + 1);
        the_line.push_str(&self.raw_line);
        the_line.push('\n');
        the_line
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(self.raw_line.as_bytes())?;
        out.write_all(b"\n")
    }

    /// 🔐 sha256 of the serialized line, hex. Handy for dedup and "did this change" checks.
    pub fn content_hash(&self) -> String {
        let mut the_hasher = Sha256::new();
        the_hasher.update(self.raw_line.as_bytes());
        the_hasher.update(b"\n");
        hex::encode(the_hasher.finalize())
    }
}

/// 🕰️ What to do to timestamps before writing. `Original` unless somebody explicitly asks.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeAdaptation {
    /// Leave the payload alone. The default. The only sane default.
    #[default]
    Original,
    /// Move every time field by the same amount so the reference field lands on "now".
    AlignToNow,
    /// Move every time field by a fixed number of seconds (negative is fine).
    ShiftBySeconds(i64),
}

impl TimeAdaptation {
    /// 🧮 The shift as a chrono delta, if chrono can represent it at all.
    /// `None` for anything but a representable `ShiftBySeconds`.
    pub fn shift_delta(self) -> Option<Duration> {
        match self {
            TimeAdaptation::ShiftBySeconds(secs) => Duration::try_seconds(secs),
            _ => None,
        }
    }

    /// 🚧 Reject a shift chrono cannot hold, before any object gets to trip over it.
    pub fn validate(self) -> Result<Self, String> {
        match self {
            TimeAdaptation::ShiftBySeconds(secs) if self.shift_delta().is_none() => Err(format!(
                "shift_by_seconds = {secs} is outside what a timestamp can be moved by"
            )),
            other => Ok(other),
        }
    }
}

/// 🔧 Which fields matter. Defaults match the NYC taxi trip corpus.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ParserConfig {
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    #[serde(default = "default_partition_field")]
    pub partition_field: String,
    /// 🕰️ Fields rewritten by [`TimeAdaptation`]. The timestamp field should be one of them.
    #[serde(default = "default_adjustable_time_fields")]
    pub adjustable_time_fields: Vec<String>,
}

fn default_timestamp_field() -> String {
    "dropoff_datetime".to_string()
}

fn default_partition_field() -> String {
    "trip_id".to_string()
}

fn default_adjustable_time_fields() -> Vec<String> {
    vec!["pickup_datetime".to_string(), "dropoff_datetime".to_string()]
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            timestamp_field: default_timestamp_field(),
            partition_field: default_partition_field(),
            adjustable_time_fields: default_adjustable_time_fields(),
        }
    }
}

/// 🔬 Turns lines into events. Stateless apart from config; share it freely.
#[derive(Debug, Clone, Default)]
pub struct EventParser {
    config: ParserConfig,
}

/// 🪶 What a line looks like after trimming: nothing at all, or something worth parsing.
#[derive(Debug, PartialEq)]
pub enum ParsedLine {
    Blank,
    Event(Event),
}

impl EventParser {
    pub fn new(config: ParserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    /// 📦 Raw decoded bytes → blank, event, or malformed.
    ///
    /// Blank lines aren't malformed, they're just blank. They get skipped without a warning.
    pub fn parse_bytes(&self, raw: &[u8]) -> Result<ParsedLine, MalformedLine> {
        let the_text = std::str::from_utf8(raw).map_err(|_| MalformedLine::InvalidUtf8)?;
        if strip_terminator(the_text).trim().is_empty() {
            return Ok(ParsedLine::Blank);
        }
        self.parse(the_text).map(ParsedLine::Event)
    }

    /// 🚕 One line → one event.
    ///
    /// 💀 `MalformedLine` when it isn't a JSON object, when the timestamp field is absent or
    /// unparseable, or when the partition field is absent. A timestamp field that is present
    /// but `null` yields an event with no timestamp.
    pub fn parse(&self, line: &str) -> Result<Event, MalformedLine> {
        let the_payload = strip_terminator(line);
        let the_doc = parse_object(the_payload)?;
        let (the_timestamp, the_partition_key) = self.extract(&the_doc)?;
        Ok(Event {
            raw_line: the_payload.to_string(),
            timestamp_millis: the_timestamp.map(|ts| ts.millis()),
            partition_key: the_partition_key,
        })
    }

    fn extract(
        &self,
        doc: &Map<String, Value>,
    ) -> Result<(Option<ParsedTimestamp>, String), MalformedLine> {
        let the_field = &self.config.timestamp_field;
        let the_raw_ts = doc
            .get(the_field)
            .ok_or_else(|| MalformedLine::MissingField(the_field.clone()))?;
        let the_timestamp = parse_timestamp(the_raw_ts).map_err(|reason| {
            MalformedLine::BadTimestamp {
                field: the_field.clone(),
                reason,
            }
        })?;

        let the_partition_field = &self.config.partition_field;
        let the_partition_key = match doc.get(the_partition_field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => {
                return Err(MalformedLine::MissingField(the_partition_field.clone()));
            }
            // -- trip ids are numbers in the corpus. stringify them so the key is always text
            Some(other) => other.to_string(),
        };

        Ok((the_timestamp, the_partition_key))
    }

    /// 🔀 Apply a configured adaptation. `Original` is a clone, everything else re-serializes.
    pub fn adapt(
        &self,
        event: &Event,
        adaptation: TimeAdaptation,
        now: DateTime<Utc>,
    ) -> Result<Event, MalformedLine> {
        match adaptation {
            TimeAdaptation::Original => Ok(event.clone()),
            TimeAdaptation::AlignToNow => self.align_to_now(event, now),
            TimeAdaptation::ShiftBySeconds(secs) => {
                let the_delta = Duration::try_seconds(secs).ok_or_else(|| MalformedLine::BadTimestamp {
                    field: self.config.timestamp_field.clone(),
                    reason: format!("a shift of {secs}s is out of range"),
                })?;
                self.shift_by(event, the_delta)
            }
        }
    }

    /// ⏩ Move every adjustable time field by `delta`. Everything else stays put.
    pub fn shift_by(&self, event: &Event, delta: Duration) -> Result<Event, MalformedLine> {
        let mut the_doc = parse_object(&event.raw_line)?;
        self.rewrite_time_fields(&mut the_doc, delta)?;
        self.reserialize(the_doc)
    }

    /// 🎯 Shift so the timestamp field lands exactly on `now`; the other time fields keep
    /// their distance to it. An event with a `null` timestamp has nothing to align to and
    /// comes back unchanged.
    pub fn align_to_now(&self, event: &Event, now: DateTime<Utc>) -> Result<Event, MalformedLine> {
        let Some(the_reference_millis) = event.timestamp_millis else {
            return Ok(event.clone());
        };
        let the_delta = Duration::milliseconds(now.timestamp_millis() - the_reference_millis);
        self.shift_by(event, the_delta)
    }

    fn rewrite_time_fields(
        &self,
        doc: &mut Map<String, Value>,
        delta: Duration,
    ) -> Result<(), MalformedLine> {
        for the_field in &self.config.adjustable_time_fields {
            let Some(the_value) = doc.get_mut(the_field) else {
                continue;
            };
            let the_parsed = parse_timestamp(the_value).map_err(|reason| {
                MalformedLine::BadTimestamp {
                    field: the_field.clone(),
                    reason,
                }
            })?;
            if let Some(ts) = the_parsed {
                let the_moved = ts.instant.checked_add_signed(delta).ok_or_else(|| {
                    MalformedLine::BadTimestamp {
                        field: the_field.clone(),
                        reason: format!("moving {} by {delta} leaves the calendar", ts.instant),
                    }
                })?;
                *the_value = ts.with_instant(the_moved).to_value();
            }
        }
        Ok(())
    }

    fn reserialize(&self, doc: Map<String, Value>) -> Result<Event, MalformedLine> {
        let the_text = serde_json::to_string(&Value::Object(doc))
            .map_err(|e| MalformedLine::InvalidJson(e.to_string()))?;
        self.parse(&the_text)
    }
}

/// ✂️ Drop one trailing `\n` (and the `\r` before it, if any). Nothing else.
fn strip_terminator(line: &str) -> &str {
    let the_line = line.strip_suffix('\n').unwrap_or(line);
    the_line.strip_suffix('\r').unwrap_or(the_line)
}

fn parse_object(payload: &str) -> Result<Map<String, Value>, MalformedLine> {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(MalformedLine::InvalidJson(format!(
            "expected an object, found {}",
            json_kind(&other)
        ))),
        Err(e) => Err(MalformedLine::InvalidJson(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const THE_TRIP: &str = r#"{"vendor_id":"2","pickup_datetime":"2016-01-01T05:20:00.000Z","dropoff_datetime":"2016-01-01T05:33:00.000Z","trip_id":42,"total_amount":11.3}"#;

    #[test]
    fn the_one_where_a_good_trip_parses_and_stays_verbatim() {
        let the_event = EventParser::default()
            .parse(&format!("{THE_TRIP}\n"))
            .expect("💀 the fixture trip should parse");
        assert_eq!(the_event.raw_line(), THE_TRIP);
        assert_eq!(the_event.timestamp_millis(), Some(1_451_626_380_000));
        assert_eq!(the_event.partition_key(), "42");
        assert_eq!(the_event.to_line(), format!("{THE_TRIP}\n"));
    }

    #[test]
    fn the_one_where_newlines_are_never_doubled() {
        let the_parser = EventParser::default();
        for the_input in [THE_TRIP.to_string(), format!("{THE_TRIP}\n"), format!("{THE_TRIP}\r\n")] {
            let the_line = the_parser
                .parse(&the_input)
                .expect("💀 fixture should parse")
                .to_line();
            assert!(the_line.ends_with('\n'));
            assert!(!the_line.ends_with("\n\n"));
            assert_eq!(the_line.matches('\n').count(), 1);
        }
    }

    #[test]
    fn the_one_where_missing_timestamps_are_malformed() {
        let the_verdict = EventParser::default().parse(r#"{"trip_id":7,"pickup_datetime":"2016-01-01T05:20:00Z"}"#);
        assert_eq!(
            the_verdict,
            Err(MalformedLine::MissingField("dropoff_datetime".to_string()))
        );
    }

    #[test]
    fn the_one_where_the_usual_suspects_are_all_malformed() {
        let the_parser = EventParser::default();
        assert!(matches!(the_parser.parse("not json"), Err(MalformedLine::InvalidJson(_))));
        assert!(matches!(the_parser.parse("[1,2,3]"), Err(MalformedLine::InvalidJson(_))));
        assert!(matches!(
            the_parser.parse(r#"{"trip_id":1,"dropoff_datetime":"whenever"}"#),
            Err(MalformedLine::BadTimestamp { .. })
        ));
        assert_eq!(
            the_parser.parse(r#"{"dropoff_datetime":"2016-01-01T05:33:00Z"}"#),
            Err(MalformedLine::MissingField("trip_id".to_string()))
        );
        assert_eq!(
            the_parser.parse_bytes(b"\xff\xfe{}"),
            Err(MalformedLine::InvalidUtf8)
        );
        assert_eq!(the_parser.parse_bytes(b"   \r\n"), Ok(ParsedLine::Blank));
    }

    #[test]
    fn the_one_where_a_null_timestamp_is_present_but_silent() {
        let the_event = EventParser::default()
            .parse(r#"{"trip_id":"abc","dropoff_datetime":null}"#)
            .expect("💀 null timestamps are allowed");
        assert_eq!(the_event.timestamp_millis(), None);
        assert_eq!(the_event.partition_key(), "abc");
    }

    #[test]
    fn the_one_where_shifting_moves_every_clock_and_nothing_else() {
        let the_parser = EventParser::default();
        let the_event = the_parser.parse(THE_TRIP).expect("💀 fixture should parse");

        let the_shifted = the_parser
            .shift_by(&the_event, Duration::hours(1))
            .expect("💀 shifting should work");

        assert_eq!(
            the_shifted.raw_line(),
            r#"{"vendor_id":"2","pickup_datetime":"2016-01-01T06:20:00.000Z","dropoff_datetime":"2016-01-01T06:33:00.000Z","trip_id":42,"total_amount":11.3}"#
        );
        assert_eq!(
            the_shifted.timestamp_millis(),
            the_event.timestamp_millis().map(|ms| ms + 3_600_000)
        );
        assert_eq!(the_shifted.partition_key(), the_event.partition_key());
    }

    #[test]
    fn the_one_where_align_to_now_puts_dropoff_on_the_clock() {
        let the_parser = EventParser::default();
        let the_event = the_parser.parse(THE_TRIP).expect("💀 fixture should parse");
        let the_now = Utc
            .with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
            .single()
            .expect("💀 a valid calendar date");

        let the_aligned = the_parser
            .adapt(&the_event, TimeAdaptation::AlignToNow, the_now)
            .expect("💀 aligning should work");

        assert_eq!(the_aligned.timestamp_millis(), Some(the_now.timestamp_millis()));
        // -- pickup keeps its 13 minute head start
        assert!(the_aligned.raw_line().contains(r#""pickup_datetime":"2025-06-01T11:47:00.000Z""#));
    }

    #[test]
    fn the_one_where_original_means_hands_off() {
        let the_parser = EventParser::default();
        let the_event = the_parser.parse(THE_TRIP).expect("💀 fixture should parse");
        let the_same = the_parser
            .adapt(&the_event, TimeAdaptation::default(), Utc::now())
            .expect("💀 original cannot fail");
        assert_eq!(the_same, the_event);
    }

    #[test]
    fn the_one_where_the_hash_is_stable_and_hex() {
        let the_event = EventParser::default().parse(THE_TRIP).expect("💀 fixture should parse");
        let the_hash = the_event.content_hash();
        assert_eq!(the_hash.len(), 64);
        assert!(the_hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(the_hash, the_event.clone().content_hash());
        assert_eq!(the_hash, hex::encode(Sha256::digest(format!("{THE_TRIP}\n"))));
        assert_eq!(the_hash, the_hash.to_ascii_lowercase());
    }

    #[test]
    fn the_one_where_a_shift_off_the_calendar_is_a_bad_line_not_a_panic() {
        let the_parser = EventParser::default();
        let the_event = the_parser
            .parse(r#"{"trip_id":1,"dropoff_datetime":8200000000000000}"#)
            .expect("💀 a far-future timestamp still parses");

        let the_verdict = the_parser.shift_by(&the_event, Duration::days(365 * 1_000));
        assert!(matches!(
            the_verdict,
            Err(MalformedLine::BadTimestamp { ref field, .. }) if field == "dropoff_datetime"
        ));

        let the_verdict = the_parser.adapt(&the_event, TimeAdaptation::ShiftBySeconds(i64::MAX), Utc::now());
        assert!(matches!(the_verdict, Err(MalformedLine::BadTimestamp { .. })));
    }

    #[test]
    fn the_one_where_an_absurd_shift_is_refused_up_front() {
        assert!(TimeAdaptation::ShiftBySeconds(i64::MAX).validate().is_err());
        assert!(TimeAdaptation::ShiftBySeconds(i64::MIN).validate().is_err());
        assert_eq!(
            TimeAdaptation::ShiftBySeconds(-86_400).validate(),
            Ok(TimeAdaptation::ShiftBySeconds(-86_400))
        );
        assert_eq!(TimeAdaptation::AlignToNow.validate(), Ok(TimeAdaptation::AlignToNow));
    }

    #[test]
    fn the_one_where_adaptation_reads_from_toml_shapes() {
        #[derive(Deserialize)]
        struct Holder {
            time_adaptation: TimeAdaptation,
        }
        let the_shift: Holder = toml::from_str("time_adaptation = { shift_by_seconds = -60 }")
            .expect("💀 shift table should parse");
        assert_eq!(the_shift.time_adaptation, TimeAdaptation::ShiftBySeconds(-60));
        let the_align: Holder = toml::from_str(r#"time_adaptation = "align_to_now""#)
            .expect("💀 align string should parse");
        assert_eq!(the_align.time_adaptation, TimeAdaptation::AlignToNow);
    }
}

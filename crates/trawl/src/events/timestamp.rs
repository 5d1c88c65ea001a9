//! 🕰️ Timestamps: parse them, remember how they were written, write them back the same way.

use chrono::{DateTime, FixedOffset, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;

/// ✍️ How a timestamp was spelled in the source, so a re-timed event reads like the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimestampStyle {
    /// `2016-01-01T05:33:00.000Z`
    Zulu { fractional: bool },
    /// `2016-01-01T05:33:00+02:00`
    Offset { offset: FixedOffset, fractional: bool },
    /// `2016-01-01T05:33:00` (no zone, read as UTC)
    NaiveT { fractional: bool },
    /// `2016-01-01 05:33:00` (no zone, read as UTC)
    NaiveSpace { fractional: bool },
    /// `1451626380000`
    EpochMillis,
}

/// 📐 A parsed timestamp plus its spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ParsedTimestamp {
    pub(crate) instant: DateTime<Utc>,
    pub(crate) style: TimestampStyle,
}

impl ParsedTimestamp {
    pub(crate) fn millis(&self) -> i64 {
        self.instant.timestamp_millis()
    }

    /// 🔁 Same style, different instant.
    pub(crate) fn with_instant(self, instant: DateTime<Utc>) -> Self {
        Self { instant, ..self }
    }

    pub(crate) fn to_value(&self) -> Value {
        match self.style {
            TimestampStyle::EpochMillis => Value::from(self.millis()),
            TimestampStyle::Zulu { fractional } => {
                Value::String(self.instant.to_rfc3339_opts(seconds_format(fractional), true))
            }
            TimestampStyle::Offset { offset, fractional } => Value::String(
                self.instant
                    .with_timezone(&offset)
                    .to_rfc3339_opts(seconds_format(fractional), false),
            ),
            TimestampStyle::NaiveT { fractional } => Value::String(
                self.instant
                    .naive_utc()
                    .format(naive_pattern('T', fractional))
                    .to_string(),
            ),
            TimestampStyle::NaiveSpace { fractional } => Value::String(
                self.instant
                    .naive_utc()
                    .format(naive_pattern(' ', fractional))
                    .to_string(),
            ),
        }
    }
}

fn seconds_format(fractional: bool) -> SecondsFormat {
    if fractional {
        SecondsFormat::Millis
    } else {
        SecondsFormat::Secs
    }
}

fn naive_pattern(separator: char, fractional: bool) -> &'static str {
    match (separator, fractional) {
        ('T', true) => "%Y-%m-%dT%H:%M:%S%.3f",
        ('T', false) => "%Y-%m-%dT%H:%M:%S",
        (_, true) => "%Y-%m-%d %H:%M:%S%.3f",
        (_, false) => "%Y-%m-%d %H:%M:%S",
    }
}

/// 🔬 Parse a JSON value into a timestamp.
///
/// `Ok(None)` for JSON `null` (present, but says nothing). `Err(reason)` for anything that
/// isn't a timestamp we understand.
pub(crate) fn parse_timestamp(value: &Value) -> Result<Option<ParsedTimestamp>, String> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => {
            let the_millis = n
                .as_i64()
                .ok_or_else(|| format!("numeric timestamp {n} is not an integer of millis"))?;
            let the_instant = Utc
                .timestamp_millis_opt(the_millis)
                .single()
                .ok_or_else(|| format!("epoch millis {the_millis} are out of range"))?;
            Ok(Some(ParsedTimestamp {
                instant: the_instant,
                style: TimestampStyle::EpochMillis,
            }))
        }
        Value::String(s) => parse_timestamp_str(s).map(Some),
        other => Err(format!("expected a string or integer, found {other}")),
    }
}

fn parse_timestamp_str(raw: &str) -> Result<ParsedTimestamp, String> {
    let the_text = raw.trim();
    let the_fractional = the_text.contains('.');

    if let Ok(with_zone) = DateTime::parse_from_rfc3339(the_text) {
        let the_is_zulu = the_text.ends_with('Z') || the_text.ends_with('z');
        let the_style = if the_is_zulu {
            TimestampStyle::Zulu {
                fractional: the_fractional,
            }
        } else {
            TimestampStyle::Offset {
                offset: *with_zone.offset(),
                fractional: the_fractional,
            }
        };
        return Ok(ParsedTimestamp {
            instant: with_zone.with_timezone(&Utc),
            style: the_style,
        });
    }

    let the_attempts = [
        (
            "%Y-%m-%dT%H:%M:%S%.f",
            TimestampStyle::NaiveT {
                fractional: the_fractional,
            },
        ),
        (
            "%Y-%m-%d %H:%M:%S%.f",
            TimestampStyle::NaiveSpace {
                fractional: the_fractional,
            },
        ),
    ];
    for (pattern, style) in the_attempts {
        if let Ok(naive) = NaiveDateTime::parse_from_str(the_text, pattern) {
            return Ok(ParsedTimestamp {
                instant: naive.and_utc(),
                style,
            });
        }
    }

    Err(format!("'{raw}' is not an ISO-8601 / RFC 3339 timestamp"))
}

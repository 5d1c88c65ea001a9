//! 📊 progress.rs: "Are we there yet?" Every batch, every time, forever.
//!
//! 🚀 One bar for the whole run: objects done out of objects listed, with a comfy little
//! table of events/s, decoded MiB/s and elapsed time riding along as the bar's message.
//! Workers on blocking threads poke it; the bar is `Clone` and the counters are atomics,
//! so nobody waits on anybody to say "I did a thing".
//!
//! ⚠️ Watching this progress bar will not make it go faster. We've tried. Science says no.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::common::ObjectResult;

// -- 📏 one mebibyte. not a megabyte, pedants. there's a difference and I will die on this hill.
const MIB: u64 = 1024 * 1024;

/// 🪟 How far back the rate window looks.
const RATE_WINDOW: Duration = Duration::from_secs(5);

/// 📦 Bytes, scaled to whatever unit doesn't make your eyes water.
pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= 1024 {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{} bytes", bytes)
    }
}

/// 🔢 "1000000 events" → "1,000,000 events". You're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS if you should probably go call your mom.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📡 A speedometer reading. Less likely to get you a ticket.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Rates {
    events_per_sec: f64,
    mib_per_sec: f64,
}

/// 🔄 Sliding window of `(when, events, bytes)` samples. Spikes get smoothed; hearts stay calm.
#[derive(Debug)]
struct RateWindow {
    samples: VecDeque<(Instant, u64, u64)>,
}

impl RateWindow {
    fn new(start: Instant) -> Self {
        // -- seed with t=0 so the first division has a denominator
        let mut samples = VecDeque::new();
        samples.push_back((start, 0, 0));
        Self { samples }
    }

    fn observe(&mut self, now: Instant, events: u64, bytes: u64) -> Rates {
        while let Some(&(timestamp, _, _)) = self.samples.front() {
            if now.duration_since(timestamp) > RATE_WINDOW && self.samples.len() > 1 {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        self.samples.push_back((now, events, bytes));

        if let Some(&(oldest_time, oldest_events, oldest_bytes)) = self.samples.front() {
            let elapsed = now.duration_since(oldest_time).as_secs_f64();
            if elapsed > 0.0 {
                return Rates {
                    events_per_sec: events.saturating_sub(oldest_events) as f64 / elapsed,
                    mib_per_sec: (bytes.saturating_sub(oldest_bytes) as f64 / elapsed)
                        / MIB as f64,
                };
            }
        }
        Rates::default()
    }
}

#[derive(Debug)]
struct Counters {
    events: AtomicU64,
    decoded_bytes: AtomicU64,
    failed: AtomicU64,
    window: Mutex<RateWindow>,
    start_time: Instant,
}

/// 📊 The run-wide progress display. Cheap to clone; every clone drives the same bar.
///
/// # Ancient Proverb
/// "He who ingests without a progress bar, ingests alone and in darkness."
#[derive(Clone)]
pub struct IngestProgress {
    bar: ProgressBar,
    counters: Arc<Counters>,
}

impl std::fmt::Debug for IngestProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("IngestProgress")
            .field("counters", &self.counters)
            .finish()
    }
}

impl IngestProgress {
    /// 🚀 A bar sized to `total_objects`. `visible = false` gets a hidden bar that still counts.
    pub fn new(total_objects: u64, visible: bool) -> Self {
        let bar = if visible {
            ProgressBar::with_draw_target(Some(total_objects), ProgressDrawTarget::stderr())
        } else {
            ProgressBar::hidden()
        };
        bar.set_length(total_objects);
        // -- template is a literal; if indicatif rejects it we just keep the default style
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{msg}\n| [{bar:40.cyan/blue}] {pos}/{len} objects")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        let start_time = Instant::now();
        Self {
            bar,
            counters: Arc::new(Counters {
                events: AtomicU64::new(0),
                decoded_bytes: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                window: Mutex::new(RateWindow::new(start_time)),
                start_time,
            }),
        }
    }

    /// 🙈 A bar nobody will ever see. For tests and `show_progress = false`.
    pub fn hidden() -> Self {
        Self::new(0, false)
    }

    /// 🔄 Feed fresh counts from a worker. Call it every flush, not every line.
    pub fn record(&self, events: u64, decoded_bytes: u64) {
        let the_events = self.counters.events.fetch_add(events, Ordering::Relaxed) + events;
        let the_bytes = self
            .counters
            .decoded_bytes
            .fetch_add(decoded_bytes, Ordering::Relaxed)
            + decoded_bytes;
        let the_rates = self
            .counters
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observe(Instant::now(), the_events, the_bytes);
        self.render(the_rates, the_events, the_bytes);
    }

    /// ✅ One more object off the list, successful or not.
    pub fn object_finished(&self, result: &ObjectResult) {
        if !result.is_success() {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.bar.inc(1);
    }

    pub fn events(&self) -> u64 {
        self.counters.events.load(Ordering::Relaxed)
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    /// 🎨 Slam a two-column table into the bar's message. indicatif handles the redraw.
    fn render(&self, rates: Rates, events: u64, bytes: u64) {
        if self.bar.is_hidden() {
            return;
        }
        let the_elapsed = format_duration(self.counters.start_time.elapsed());
        let the_failed = self.counters.failed.load(Ordering::Relaxed);

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} Events/s", format_number(rates.events_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} Events", format_number(events)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{:.2} MiB/s", rates.mib_per_sec))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} decoded", format_bytes(bytes)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", the_elapsed)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{} failed", format_number(the_failed)))
                .set_alignment(CellAlignment::Right),
        ]);
        self.bar.set_message(table.to_string());
    }
}

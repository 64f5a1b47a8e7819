//! # Heartbeat Watchdog
//!
//! The phone posts to `/heartbeat` periodically. The watchdog is polled once
//! per second with the time since the last beat and decides when to raise a
//! "down" alert (escalating along [`AlertSchedule`]) and when to announce
//! recovery. Delivery lives in `alerts`; this module holds no I/O.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};

/// Seconds past the last schedule entry between repeated alerts.
const REPEAT_AFTER_SECS: u64 = 3600;

/// Downtime below this many seconds counts as online in the daily summary.
const ONLINE_BELOW_SECS: u64 = 60;

// ============================================================================
// Schedule
// ============================================================================

/// Escalating downtime thresholds in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u64>", into = "Vec<u64>")]
pub struct AlertSchedule(Vec<u64>);

impl Default for AlertSchedule {
    fn default() -> Self {
        Self(vec![60, 300, 600, 3600])
    }
}

impl TryFrom<Vec<u64>> for AlertSchedule {
    type Error = String;

    fn try_from(thresholds: Vec<u64>) -> Result<Self, Self::Error> {
        Self::new(thresholds).ok_or_else(|| "alert schedule must not be empty".to_string())
    }
}

impl From<AlertSchedule> for Vec<u64> {
    fn from(schedule: AlertSchedule) -> Self {
        schedule.0
    }
}

impl AlertSchedule {
    /// Build a schedule; entries are sorted and deduplicated. Returns `None`
    /// when no entries are given.
    pub fn new(mut thresholds: Vec<u64>) -> Option<Self> {
        thresholds.sort_unstable();
        thresholds.dedup();
        (!thresholds.is_empty()).then_some(Self(thresholds))
    }

    pub fn first(&self) -> u64 {
        self.0[0]
    }

    pub fn thresholds(&self) -> &[u64] {
        &self.0
    }

    /// Next threshold after `current`: the first entry greater than it, or
    /// `current + 3600` once the schedule is exhausted.
    pub fn next_after(&self, current: u64) -> u64 {
        let idx = self.0.partition_point(|&t| t <= current);
        self.0
            .get(idx)
            .copied()
            .unwrap_or(current + REPEAT_AFTER_SECS)
    }
}

// ============================================================================
// State machine
// ============================================================================

/// Something worth telling the user about.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchdogEvent {
    Down {
        downtime_secs: u64,
        last_beat: DateTime<Local>,
    },
    Recovered {
        /// Longest downtime observed during the outage
        outage_secs: u64,
        last_beat: DateTime<Local>,
    },
}

impl WatchdogEvent {
    pub fn is_recovery(&self) -> bool {
        matches!(self, WatchdogEvent::Recovered { .. })
    }

    /// Alert text as sent to the user.
    pub fn message(&self) -> String {
        match self {
            WatchdogEvent::Down {
                downtime_secs,
                last_beat,
            } => format!(
                "🪦 No heartbeat for {}!\nLast received at {}",
                format_downtime(*downtime_secs as f64),
                last_beat.format("%Y-%m-%d %H:%M:%S")
            ),
            WatchdogEvent::Recovered {
                outage_secs,
                last_beat,
            } => format!(
                "💚 Heartbeat recovered!\nDowntime: {}\nLast heartbeat: {}",
                format_downtime(*outage_secs as f64),
                last_beat.format("%Y-%m-%d %H:%M:%S")
            ),
        }
    }
}

/// Down/up tracking for the heartbeat.
#[derive(Debug, Clone)]
pub struct Watchdog {
    schedule: AlertSchedule,
    next_alert: u64,
    is_down: bool,
    peak_downtime: u64,
}

impl Watchdog {
    pub fn new(schedule: AlertSchedule) -> Self {
        let next_alert = schedule.first();
        Self {
            schedule,
            next_alert,
            is_down: false,
            peak_downtime: 0,
        }
    }

    pub fn is_down(&self) -> bool {
        self.is_down
    }

    /// Downtime at which the next down alert fires.
    pub fn next_alert(&self) -> u64 {
        self.next_alert
    }

    /// Feed the current downtime; returns an event when one is due.
    pub fn observe(
        &mut self,
        downtime_secs: u64,
        last_beat: DateTime<Local>,
    ) -> Option<WatchdogEvent> {
        if self.is_down {
            self.peak_downtime = self.peak_downtime.max(downtime_secs);
        }

        if downtime_secs >= self.next_alert {
            if !self.is_down {
                self.peak_downtime = downtime_secs;
            }
            self.is_down = true;
            self.next_alert = self.schedule.next_after(self.next_alert);
            return Some(WatchdogEvent::Down {
                downtime_secs,
                last_beat,
            });
        }

        if self.is_down && downtime_secs < self.schedule.first() {
            let outage_secs = self.peak_downtime;
            self.is_down = false;
            self.peak_downtime = 0;
            self.next_alert = self.schedule.first();
            return Some(WatchdogEvent::Recovered {
                outage_secs,
                last_beat,
            });
        }

        None
    }
}

/// Human readable duration: `"1d, 2h, 3m, 4s"`, `"2h, 3m, 4s"` or `"3m, 4s"`.
/// Fractional seconds are truncated.
pub fn format_downtime(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.trunc() as u64
    } else {
        0
    };
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let secs = total % 60;

    if days > 0 {
        format!("{days}d, {hours}h, {minutes}m, {secs}s")
    } else if hours > 0 {
        format!("{hours}h, {minutes}m, {secs}s")
    } else {
        format!("{minutes}m, {secs}s")
    }
}

// ============================================================================
// Quiet hours
// ============================================================================

/// Local hours during which alerts are not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    /// Alerts are suppressed while the local hour is below this.
    /// Default: 7
    pub until_hour: u32,
}

impl Default for QuietHours {
    fn default() -> Self {
        Self { until_hour: 7 }
    }
}

impl QuietHours {
    pub fn is_quiet(&self, now: &DateTime<Local>) -> bool {
        now.hour() < self.until_hour
    }
}

// ============================================================================
// Heartbeat clock
// ============================================================================

/// Last heartbeat instant, shared between the HTTP handler and the watchdog.
#[derive(Debug, Clone)]
pub struct HeartbeatClock {
    last: Arc<Mutex<DateTime<Local>>>,
}

impl Default for HeartbeatClock {
    fn default() -> Self {
        Self::starting_at(Local::now())
    }
}

impl HeartbeatClock {
    pub fn starting_at(at: DateTime<Local>) -> Self {
        Self {
            last: Arc::new(Mutex::new(at)),
        }
    }

    pub fn beat(&self) {
        self.beat_at(Local::now());
    }

    pub fn beat_at(&self, at: DateTime<Local>) {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        *last = at;
    }

    pub fn last(&self) -> DateTime<Local> {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whole seconds since the last beat, zero if the clock went backwards.
    pub fn downtime_secs(&self, now: DateTime<Local>) -> u64 {
        (now - self.last()).num_seconds().max(0) as u64
    }
}

// ============================================================================
// Daily summary
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum SummaryEntry {
    Lost(DateTime<Local>),
    Recovered(DateTime<Local>, u64),
}

/// Per-day log of lost/recovered events, rendered as one message that is
/// edited in place through the day.
#[derive(Debug, Clone, Default)]
pub struct DailySummary {
    date: Option<NaiveDate>,
    entries: Vec<SummaryEntry>,
}

impl DailySummary {
    /// Record an event. Returns `true` when a new day started, meaning the
    /// rendered text must go out as a new message instead of an edit.
    pub fn record(&mut self, event: &WatchdogEvent, now: DateTime<Local>) -> bool {
        let today = now.date_naive();
        let new_day = self.date != Some(today);
        if new_day {
            self.date = Some(today);
            self.entries.clear();
        }

        self.entries.push(match event {
            WatchdogEvent::Down { .. } => SummaryEntry::Lost(now),
            WatchdogEvent::Recovered { outage_secs, .. } => {
                SummaryEntry::Recovered(now, *outage_secs)
            }
        });
        new_day
    }

    pub fn render(&self, now: DateTime<Local>, last_beat: DateTime<Local>) -> String {
        let day = self.date.unwrap_or_else(|| now.date_naive());
        let mut lines = vec![format!("📊 Heartbeat Summary - {}", day.format("%Y-%m-%d"))];

        for entry in &self.entries {
            match entry {
                SummaryEntry::Lost(at) => {
                    lines.push(format!("❌ {} - Heartbeat lost", at.format("%H:%M:%S")));
                }
                SummaryEntry::Recovered(at, secs) => {
                    let duration = if *secs > 0 {
                        format_downtime(*secs as f64)
                    } else {
                        "unknown".to_string()
                    };
                    lines.push(format!(
                        "✅ {} - Heartbeat recovered (downtime: {})",
                        at.format("%H:%M:%S"),
                        duration
                    ));
                }
            }
        }

        let downtime = (now - last_beat).num_seconds().max(0) as u64;
        if downtime < ONLINE_BELOW_SECS {
            lines.push(format!(
                "💚 Current: Online (last heartbeat: {})",
                last_beat.format("%H:%M:%S")
            ));
        } else {
            lines.push(format!(
                "🪦 Current: Offline for {}",
                format_downtime(downtime as f64)
            ));
        }

        lines.join("\n")
    }
}

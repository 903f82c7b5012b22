//! Confirmation gate: risk and completeness flags for a pending command.
//!
//! Pure functions only. The controller consults [`evaluate_in`] before
//! entering the confirming phase and again when the user confirms.

use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::command::Command;

/// Shown next to a disabled confirm action.
pub const INCOMPLETE_HINT: &str =
    "Confirm is disabled because required fields (e.g., start time) are missing.";

pub const DESTRUCTIVE_WARNING: &str = "Warning: This looks destructive.";

pub const PAST_DATED_WARNING: &str = "Heads up: the start time appears to be in the past.";

/// Flags computed for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateReport {
    /// `delete` or `move`; advisory only.
    pub destructive: bool,
    /// Start parses to an instant before now; advisory only.
    pub past_dated: bool,
    /// Missing op, or missing start for an op that needs one. Blocks confirmation.
    pub incomplete: bool,
    /// One-line human-readable synopsis.
    pub summary: String,
}

impl GateReport {
    /// Whether the confirm action is enabled.
    pub fn can_confirm(&self) -> bool {
        !self.incomplete
    }

    /// Advisory banner lines, destructive first.
    pub fn warnings(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.destructive {
            out.push(DESTRUCTIVE_WARNING);
        }
        if self.past_dated {
            out.push(PAST_DATED_WARNING);
        }
        out
    }

    /// Hint explaining a disabled confirm action, if it is disabled.
    pub fn incomplete_hint(&self) -> Option<&'static str> {
        self.incomplete.then_some(INCOMPLETE_HINT)
    }
}

/// The zone offset-less date-times are read in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Zone {
    /// The host's local zone.
    #[default]
    Local,
    Named(Tz),
}

impl Zone {
    /// Resolve an IANA zone name. Unknown names fall back to the local zone.
    pub fn from_name(name: Option<&str>) -> Zone {
        let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            return Zone::Local;
        };
        match name.parse::<Tz>() {
            Ok(tz) => Zone::Named(tz),
            Err(_) => {
                warn!(zone = name, "Unknown timezone, using the local zone");
                Zone::Local
            }
        }
    }

    /// Attach this zone to a wall-clock time.
    ///
    /// Ambiguous times take the earlier instant. Times skipped by a DST jump
    /// are moved forward an hour.
    pub fn localize(&self, naive: NaiveDateTime) -> Option<DateTime<FixedOffset>> {
        let resolve = |naive: NaiveDateTime| match self {
            Zone::Local => Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.fixed_offset()),
            Zone::Named(tz) => tz
                .from_local_datetime(&naive)
                .earliest()
                .map(|dt| dt.fixed_offset()),
        };
        resolve(naive).or_else(|| resolve(naive + TimeDelta::hours(1)))
    }
}

/// Evaluate a command against the current time in the local zone.
pub fn evaluate(command: &Command) -> GateReport {
    evaluate_in(command, Utc::now(), Zone::Local)
}

/// Evaluate a command against a fixed instant in the local zone.
pub fn evaluate_at(command: &Command, now: DateTime<Utc>) -> GateReport {
    evaluate_in(command, now, Zone::Local)
}

/// Evaluate a command against a fixed instant, reading offset-less
/// timestamps in `zone`.
pub fn evaluate_in(command: &Command, now: DateTime<Utc>, zone: Zone) -> GateReport {
    GateReport {
        destructive: is_destructive(command),
        past_dated: starts_before(command, now, zone),
        incomplete: is_incomplete(command),
        summary: summarize_in(command, zone),
    }
}

pub fn is_destructive(command: &Command) -> bool {
    command.op.is_some_and(|op| op.is_destructive())
}

pub fn is_incomplete(command: &Command) -> bool {
    match command.op {
        None => true,
        Some(op) => op.requires_start() && command.start.is_none(),
    }
}

fn starts_before(command: &Command, now: DateTime<Utc>, zone: Zone) -> bool {
    command
        .start
        .as_deref()
        .and_then(|raw| parse_timestamp_in(raw, zone))
        .is_some_and(|start| start.with_timezone(&Utc) < now)
}

/// Parse an ISO-8601 timestamp, reading offset-less date-times in the local
/// zone.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    parse_timestamp_in(raw, Zone::Local)
}

/// Parse an ISO-8601 timestamp.
///
/// Accepts RFC 3339, then offset-less date-times, which are wall-clock times
/// in `zone`. A bare date is midnight UTC.
pub fn parse_timestamp_in(raw: &str, zone: Zone) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return zone.localize(naive);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

/// Build the one-line synopsis shown above the confirm action.
pub fn summarize(command: &Command) -> String {
    summarize_in(command, Zone::Local)
}

/// [`summarize`] with offset-less times read in `zone`.
pub fn summarize_in(command: &Command, zone: Zone) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(op) = command.op {
        parts.push(op.as_str().replace('_', " ").to_uppercase());
    }
    if let Some(title) = command.title.as_deref().filter(|t| !t.is_empty()) {
        parts.push(format!("\u{201c}{title}\u{201d}"));
    }
    if let Some(start) = command.start.as_deref() {
        parts.push(format!("from {}", display_time(start, zone)));
    }
    if let Some(end) = command.end.as_deref() {
        parts.push(format!("to {}", display_time(end, zone)));
    }
    if command.all_day == Some(true) {
        parts.push("[all-day]".to_string());
    }
    if parts.is_empty() {
        return "\u{2014}".to_string();
    }
    parts.join(" ")
}

fn display_time(raw: &str, zone: Zone) -> String {
    match parse_timestamp_in(raw, zone) {
        Some(dt) => dt.format("%a %b %-d %Y, %H:%M (%:z)").to_string(),
        None => raw.to_string(),
    }
}

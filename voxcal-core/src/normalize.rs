//! Command normalizer: maps raw interpreter output onto the canonical [`Command`].
//!
//! Interpreters in the wild answer with several shapes: a bare command, a
//! command wrapped in `{"command": ...}` or `{"cmd": ...}`, `op` / `type` /
//! `action` keys, and the server schema that nests fields under `params` and
//! `target`. All of that tolerance lives here.

use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::command::{Command, Op};
use crate::error::InterpretError;

/// Titles an interpreter emits when it could not extract a real one.
pub const PLACEHOLDER_TITLES: &[&str] = &["ai event", "event", "meeting", "appointment", "untitled"];

/// Title used when nothing better can be derived.
pub const UNTITLED: &str = "(untitled)";

/// Default maximum length of a derived title, ellipsis included.
pub const DEFAULT_MAX_TITLE_CHARS: usize = 60;

const ELLIPSIS: &str = "...";

/// Converts interpreter payloads into canonical commands.
pub struct Normalizer {
    leading_verb: Regex,
    trailing_preposition: Regex,
    max_title_chars: usize,
}

impl Normalizer {
    pub fn new() -> Self {
        Self {
            leading_verb: Regex::new(r"(?i)^(?:create|make|schedule)\b\s*")
                .expect("leading verb pattern is valid"),
            trailing_preposition: Regex::new(r"(?i)\s+(?:at|for|on)$")
                .expect("trailing preposition pattern is valid"),
            max_title_chars: DEFAULT_MAX_TITLE_CHARS,
        }
    }

    /// Override the derived-title length limit (ellipsis included).
    pub fn with_max_title_chars(mut self, max: usize) -> Self {
        self.max_title_chars = max.max(ELLIPSIS.len() + 1);
        self
    }

    /// Normalize a raw interpreter response for the given utterance.
    ///
    /// Fails with [`InterpretError::EmptyCommand`] when the payload is null,
    /// not an object, or an empty object.
    pub fn normalize(&self, raw: &Value, utterance: &str) -> Result<Command, InterpretError> {
        let obj = unwrap_payload(raw).ok_or(InterpretError::EmptyCommand)?;
        let params = obj.get("params").and_then(Value::as_object);
        let target = obj.get("target").and_then(Value::as_object);

        let raw_op = string_field(obj, &["op", "type", "action"]);
        let op = raw_op.as_deref().and_then(Op::from_alias);
        if op.is_none() {
            match raw_op.as_deref() {
                Some(other) => warn!(op = other, "Interpreter returned an unsupported op"),
                None => debug!("Interpreter returned no op"),
            }
        }
        if let Some(op) = op.filter(Op::is_bare) {
            return Ok(Command::new(op));
        }

        let title = string_field(obj, &["title"])
            .or_else(|| params.and_then(|p| string_field(p, &["title"])));
        let title = match title {
            Some(t) if !is_placeholder_title(&t) => t,
            other => self.derive_title(utterance, other.as_deref()),
        };

        let start = string_field(obj, &["start"])
            .or_else(|| params.and_then(|p| string_field(p, &["start"])));
        let end = string_field(obj, &["end"])
            .or_else(|| params.and_then(|p| string_field(p, &["end"])));
        let id = id_field(obj, &["id", "event_id"])
            .or_else(|| target.and_then(|t| id_field(t, &["match_by_id"])));
        let all_day = obj
            .get("allDay")
            .or_else(|| obj.get("all_day"))
            .and_then(Value::as_bool);

        Ok(Command {
            op,
            title: Some(title),
            start,
            end,
            id,
            all_day,
        })
    }

    /// Derive a display title from the utterance.
    ///
    /// Strips a leading `create|make|schedule` and a trailing dangling
    /// `at|for|on`, truncates, and capitalizes. Falls back to `original`, then
    /// to [`UNTITLED`], when the utterance leaves nothing behind.
    pub fn derive_title(&self, utterance: &str, original: Option<&str>) -> String {
        let collapsed = utterance.split_whitespace().collect::<Vec<_>>().join(" ");
        let stripped = self.leading_verb.replace(&collapsed, "");
        let stripped = self.trailing_preposition.replace(&stripped, "");
        let stripped = stripped.trim();

        if stripped.is_empty() {
            return original
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or(UNTITLED)
                .to_string();
        }

        capitalize_first(&truncate_chars(stripped, self.max_title_chars))
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a title is one of the generic placeholders interpreters emit.
pub fn is_placeholder_title(title: &str) -> bool {
    let t = title.trim();
    PLACEHOLDER_TITLES.iter().any(|p| t.eq_ignore_ascii_case(p))
}

fn unwrap_payload(raw: &Value) -> Option<&Map<String, Value>> {
    let obj = raw.as_object()?;
    for key in ["command", "cmd"] {
        if let Some(inner) = obj.get(key) {
            return inner.as_object().filter(|m| !m.is_empty());
        }
    }
    Some(obj).filter(|m| !m.is_empty())
}

fn string_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn id_field(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| obj.get(*k)).find_map(|v| match v {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(ELLIPSIS.len());
    let head: String = text.chars().take(keep).collect();
    format!("{}{ELLIPSIS}", head.trim_end())
}

fn capitalize_first(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

//! Canonical calendar command, diff, and event types.
//!
//! Everything past the normalizer works with these shapes only. Loosely-typed
//! backend payloads are converted at the client boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The operation a command performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Create,
    Update,
    Delete,
    Move,
    /// Remove the most recently created event.
    DeleteLast,
    /// Revert the most recent mutation.
    UndoLast,
}

impl Op {
    /// Parse an op string, accepting the `*_event` aliases in any case.
    pub fn from_alias(raw: &str) -> Option<Op> {
        let lowered = raw.trim().to_ascii_lowercase();
        let base = lowered.strip_suffix("_event").unwrap_or(&lowered);
        match base {
            "create" => Some(Op::Create),
            "update" => Some(Op::Update),
            "delete" => Some(Op::Delete),
            "move" => Some(Op::Move),
            "delete_last" => Some(Op::DeleteLast),
            "undo_last" => Some(Op::UndoLast),
            _ => None,
        }
    }

    /// Short wire name (`create`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Op::Create => "create",
            Op::Update => "update",
            Op::Delete => "delete",
            Op::Move => "move",
            Op::DeleteLast => "delete_last",
            Op::UndoLast => "undo_last",
        }
    }

    /// Event-suffixed wire name (`create_event`).
    pub fn as_event_str(&self) -> &'static str {
        match self {
            Op::Create => "create_event",
            Op::Update => "update_event",
            Op::Delete => "delete_event",
            Op::Move => "move_event",
            Op::DeleteLast => "delete_last",
            Op::UndoLast => "undo_last",
        }
    }

    /// Whether this op requires a start time to be applied.
    pub fn requires_start(&self) -> bool {
        matches!(self, Op::Create | Op::Update | Op::Move)
    }

    /// Whether this op removes or relocates an existing event.
    pub fn is_destructive(&self) -> bool {
        matches!(self, Op::Delete | Op::Move | Op::DeleteLast | Op::UndoLast)
    }

    /// Ops that act on the user's history and carry no event fields.
    pub fn is_bare(&self) -> bool {
        matches!(self, Op::DeleteLast | Op::UndoLast)
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured user intent, ready for confirmation and mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<Op>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// ISO-8601 start of the event window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    /// ISO-8601 end of the event window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(
        default,
        rename = "allDay",
        alias = "all_day",
        skip_serializing_if = "Option::is_none"
    )]
    pub all_day: Option<bool>,
}

impl Command {
    pub fn new(op: Op) -> Self {
        Self {
            op: Some(op),
            ..Self::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_start(mut self, start: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self
    }

    pub fn with_end(mut self, end: impl Into<String>) -> Self {
        self.end = Some(end.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_all_day(mut self, all_day: bool) -> Self {
        self.all_day = Some(all_day);
        self
    }
}

/// A calendar event as reported by the backend.
///
/// Unknown fields are kept in `extra` so a round trip through an observer
/// does not lose backend data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CalendarEvent {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            start: None,
            end: None,
            created_at: None,
            extra: Map::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_start(mut self, start: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self
    }

    /// Title for display, with the placeholder used for untitled events.
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => "(untitled)",
        }
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "event id must be a string or number, got {other}"
        ))),
    }
}

/// A change applied by a successful mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Diff {
    Create { event: CalendarEvent },
    Update { event: CalendarEvent },
    Delete { id: String },
    Noop,
}

impl Diff {
    /// The id of the entity this diff touches, if any.
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            Diff::Create { event } | Diff::Update { event } => Some(&event.id),
            Diff::Delete { id } => Some(id),
            Diff::Noop => None,
        }
    }
}

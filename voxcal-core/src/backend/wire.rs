//! Wire contract for the mutate endpoint and lenient response coercion.
//!
//! Backend deployments disagree on the mutate body: some take the command
//! directly, some want `{"command": ...}`; some read `op`, others `type` or
//! `action`, with `create` or `create_event` vocabularies. The contract is a
//! configuration choice resolved per deployment.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::warn;

use super::{HistoryItem, HistoryPage, MutationOutcome};
use crate::command::{CalendarEvent, Command, Diff, Op};
use crate::error::MutationError;

/// How the command is placed in the request body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Envelope {
    /// The command object is the body.
    #[default]
    Direct,
    /// The body is `{"command": <command>}`.
    Wrapped,
}

/// Which spelling of the op the backend understands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpVocabulary {
    /// `create`, `update`, `delete`, `move`.
    #[default]
    Short,
    /// `create_event`, `update_event`, ...
    EventSuffixed,
}

/// Request shape expected by the mutate endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WireContract {
    pub envelope: Envelope,
    /// Body key carrying the op (`op`, `type`, or `action`).
    pub op_key: String,
    pub vocabulary: OpVocabulary,
}

impl Default for WireContract {
    fn default() -> Self {
        Self {
            envelope: Envelope::Direct,
            op_key: "op".to_string(),
            vocabulary: OpVocabulary::Short,
        }
    }
}

impl WireContract {
    /// Encode a command as a mutate request body.
    ///
    /// History ops (`delete_last`, `undo_last`) are sent bare.
    pub fn encode(&self, command: &Command) -> Value {
        if let Some(op) = command.op.filter(Op::is_bare) {
            return self.encode_bare_op(op.as_str());
        }
        let mut body = Map::new();
        if let Some(op) = command.op {
            let name = match self.vocabulary {
                OpVocabulary::Short => op.as_str(),
                OpVocabulary::EventSuffixed => op.as_event_str(),
            };
            body.insert(self.op_key.clone(), json!(name));
        }
        if let Some(title) = &command.title {
            body.insert("title".into(), json!(title));
        }
        if let Some(start) = &command.start {
            body.insert("start".into(), json!(start));
        }
        if let Some(end) = &command.end {
            body.insert("end".into(), json!(end));
        }
        if let Some(id) = &command.id {
            body.insert("id".into(), json!(id));
        }
        if let Some(all_day) = command.all_day {
            body.insert("allDay".into(), json!(all_day));
        }
        match self.envelope {
            Envelope::Direct => Value::Object(body),
            Envelope::Wrapped => json!({ "command": body }),
        }
    }

    /// Encode a bare op such as `delete_last`, honoring the envelope.
    ///
    /// Bare ops always travel under `op`, whatever the configured key.
    pub fn encode_bare_op(&self, op: &str) -> Value {
        let body = json!({ "op": op });
        match self.envelope {
            Envelope::Direct => body,
            Envelope::Wrapped => json!({ "command": body }),
        }
    }
}

/// Pull a human-readable message out of an error body.
///
/// Understands `{"error": "..."}`, `{"detail": "..."}`, and validation
/// errors shaped `{"detail": [{"msg": "..."}, ...]}`.
pub fn error_detail(body: &Value) -> Option<String> {
    if let Some(e) = body.get("error").and_then(Value::as_str).filter(|s| !s.is_empty()) {
        return Some(e.to_string());
    }
    match body.get("detail") {
        Some(Value::String(d)) if !d.is_empty() => Some(d.clone()),
        Some(Value::Array(items)) => {
            let msgs: Vec<&str> = items
                .iter()
                .filter_map(|d| d.get("msg").and_then(Value::as_str))
                .filter(|m| !m.is_empty())
                .collect();
            (!msgs.is_empty()).then(|| msgs.join("; "))
        }
        _ => None,
    }
}

/// Interpret a 2xx mutate response body.
pub fn parse_mutation_response(body: Value) -> Result<MutationOutcome, MutationError> {
    let Some(obj) = body.as_object() else {
        return Err(MutationError::InvalidResponse {
            message: format!("expected a JSON object, got {body}"),
        });
    };

    match obj.get("error") {
        None | Some(Value::Null) => {}
        Some(Value::String(s)) if s.is_empty() => {}
        Some(Value::String(s)) => {
            return Err(MutationError::Rejected { message: s.clone() });
        }
        Some(other) => {
            return Err(MutationError::Rejected {
                message: other.to_string(),
            });
        }
    }

    if let Some(status) = obj.get("status").and_then(Value::as_str) {
        if status != "ok" {
            return Err(MutationError::Rejected {
                message: error_detail(&body).unwrap_or_else(|| format!("status {status}")),
            });
        }
    }

    let diff = match obj.get("diff") {
        None | Some(Value::Null) => None,
        Some(raw) => match serde_json::from_value::<Diff>(raw.clone()) {
            Ok(diff) => Some(diff),
            Err(e) => {
                warn!(error = %e, "Ignoring malformed diff in mutate response");
                None
            }
        },
    };

    Ok(MutationOutcome { diff, body })
}

/// Normalize a list payload: a bare array, `{"events": [...]}`, or
/// `{"data": [...]}`. Anything else yields an empty list.
pub fn normalize_event_list(body: &Value) -> Vec<CalendarEvent> {
    let items = match body {
        Value::Array(items) => items.as_slice(),
        Value::Object(obj) => obj
            .get("events")
            .or_else(|| obj.get("data"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
        _ => &[],
    };
    parse_each(items)
}

/// Coerce a history payload, tolerating wrapped and unwrapped success forms.
///
/// Returns the error message to report when the payload is not a success.
pub fn coerce_history(body: &Value, http_status: u16) -> Result<HistoryPage, String> {
    let items = body.get("items").and_then(Value::as_array);
    let status = body.get("status");
    let success = match status {
        Some(s) => s.as_str() == Some("ok"),
        None => items.is_some(),
    };
    if !success || !(200..300).contains(&http_status) {
        return Err(error_detail(body).unwrap_or_else(|| match body {
            Value::Null => format!("HTTP {http_status}"),
            Value::Object(obj) if obj.is_empty() => format!("HTTP {http_status}"),
            other => other.to_string(),
        }));
    }

    Ok(HistoryPage {
        user_id: body.get("user_id").and_then(Value::as_str).map(str::to_string),
        limit: body
            .get("limit")
            .and_then(Value::as_u64)
            .and_then(|l| u32::try_from(l).ok()),
        total: body.get("total").and_then(Value::as_u64),
        items: items.map(|i| parse_each::<HistoryItem>(i)).unwrap_or_default(),
    })
}

fn parse_each<T: serde::de::DeserializeOwned>(items: &[Value]) -> Vec<T> {
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<T>(item.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(error = %e, "Skipping malformed entry");
                None
            }
        })
        .collect()
}

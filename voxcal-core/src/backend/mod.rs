//! Backend collaborators: interpreter, mutation, calendar reads, transcription.
//!
//! Each concern is a trait so the controller and observers can run against
//! mocks or any backend deployment. [`HttpBackend`] implements all of them
//! over the JSON HTTP API.

pub mod auth;
pub mod http;
pub mod mock;
pub mod wire;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::{CalendarEvent, Command, Diff};
use crate::error::{BackendError, InterpretError, MutationError};

pub use auth::{AuthTokenProvider, EnvToken, NoAuth, SessionFileToken, StaticToken};
pub use http::HttpBackend;
pub use mock::{MockInterpreter, MockMutation, MockReader, MockTranscriber};
pub use wire::{Envelope, OpVocabulary, WireContract};

/// Turns free text into a raw command payload.
///
/// The payload is returned untouched; shape tolerance belongs to the
/// normalizer.
#[async_trait]
pub trait InterpreterClient: Send + Sync {
    async fn interpret(&self, utterance: &str, token: Option<&str>)
    -> Result<Value, InterpretError>;
}

/// Applies a command to the calendar store.
#[async_trait]
pub trait MutationClient: Send + Sync {
    async fn mutate(
        &self,
        command: &Command,
        token: Option<&str>,
    ) -> Result<MutationOutcome, MutationError>;
}

/// Read access used by observers to refresh their view.
#[async_trait]
pub trait CalendarReader: Send + Sync {
    async fn list_events(&self, token: Option<&str>) -> Result<Vec<CalendarEvent>, BackendError>;

    async fn history(&self, limit: u32, token: Option<&str>)
    -> Result<HistoryPage, BackendError>;
}

/// Uploads recorded audio and returns its transcript.
#[async_trait]
pub trait AudioTranscriber: Send + Sync {
    async fn transcribe(&self, clip: AudioClip, token: Option<&str>)
    -> Result<String, BackendError>;
}

/// Result of a successful mutation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MutationOutcome {
    /// Incremental change, when the backend reports one.
    pub diff: Option<Diff>,
    /// Full response body.
    pub body: Value,
}

impl MutationOutcome {
    pub fn with_diff(diff: Diff) -> Self {
        Self {
            diff: Some(diff),
            body: Value::Null,
        }
    }
}

/// A recorded audio clip. Container and codec are left to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime: String,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
            mime: mime.into(),
        }
    }

    /// Guess the MIME type from a file extension, defaulting to webm.
    pub fn mime_for_extension(ext: &str) -> &'static str {
        match ext.to_ascii_lowercase().as_str() {
            "wav" => "audio/wav",
            "ogg" | "oga" => "audio/ogg",
            "mp3" => "audio/mpeg",
            "m4a" | "mp4" => "audio/mp4",
            _ => "audio/webm",
        }
    }
}

/// One entry of the mutation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub ts: String,
    pub op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<CalendarEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<CalendarEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<CalendarEvent>,
}

/// A page of mutation history.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryPage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    pub items: Vec<HistoryItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_for_extension() {
        assert_eq!(AudioClip::mime_for_extension("WAV"), "audio/wav");
        assert_eq!(AudioClip::mime_for_extension("m4a"), "audio/mp4");
        assert_eq!(AudioClip::mime_for_extension("flac"), "audio/webm");
    }
}

//! JSON-over-HTTP backend client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, info};
use url::Url;

use super::wire::{coerce_history, error_detail, normalize_event_list, parse_mutation_response};
use super::{
    AudioClip, AudioTranscriber, CalendarReader, HistoryPage, InterpreterClient, MutationClient,
    MutationOutcome, WireContract,
};
use crate::command::{CalendarEvent, Command, Op};
use crate::config::BackendConfig;
use crate::error::{BackendError, InterpretError, MutationError};

/// Client for the calendar backend's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    interpret_path: String,
    mutate_path: String,
    list_path: String,
    history_path: String,
    transcribe_path: String,
    timezone: Option<String>,
    wire: WireContract,
}

impl HttpBackend {
    /// Build a client from configuration.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        Url::parse(&config.base_url).map_err(|e| BackendError::InvalidUrl {
            message: format!("{}: {e}", config.base_url),
        })?;

        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build().map_err(|e| BackendError::Transport {
            endpoint: "client".into(),
            message: e.to_string(),
        })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            interpret_path: config.interpret_path.clone(),
            mutate_path: config.mutate_path.clone(),
            list_path: config.list_path.clone(),
            history_path: config.history_path.clone(),
            transcribe_path: config.transcribe_path.clone(),
            timezone: config.timezone.clone(),
            wire: config.wire.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn wire(&self) -> &WireContract {
        &self.wire
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    fn authorized(builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match token {
            Some(t) => builder.bearer_auth(t),
            None => builder,
        }
    }

    /// Remove the most recently created event.
    pub async fn delete_last(&self, token: Option<&str>) -> Result<MutationOutcome, MutationError> {
        self.mutate(&Command::new(Op::DeleteLast), token).await
    }

    /// Revert the most recent mutation.
    pub async fn undo_last(&self, token: Option<&str>) -> Result<MutationOutcome, MutationError> {
        self.mutate(&Command::new(Op::UndoLast), token).await
    }

    async fn post_mutation(
        &self,
        body: Value,
        token: Option<&str>,
    ) -> Result<MutationOutcome, MutationError> {
        let url = self.url(&self.mutate_path);
        debug!(url = %url, "POST mutate");
        let response = Self::authorized(self.client.post(&url).json(&body), token)
            .send()
            .await
            .map_err(|e| MutationError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = read_body(response)
            .await
            .map_err(|message| MutationError::Transport { message })?;

        if !status.is_success() {
            return Err(MutationError::Status {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }
        let outcome = parse_mutation_response(body)?;
        info!(diff = ?outcome.diff.as_ref().map(|d| d.entity_id()), "Mutation applied");
        Ok(outcome)
    }
}

/// Read a response body as JSON, tolerating empty and non-JSON bodies.
async fn read_body(response: reqwest::Response) -> Result<Value, String> {
    let text = response.text().await.map_err(|e| e.to_string())?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

#[async_trait]
impl InterpreterClient for HttpBackend {
    async fn interpret(
        &self,
        utterance: &str,
        token: Option<&str>,
    ) -> Result<Value, InterpretError> {
        let url = self.url(&self.interpret_path);
        let mut payload = json!({ "text": utterance });
        if let Some(tz) = &self.timezone {
            payload["tz"] = json!(tz);
        }
        debug!(url = %url, chars = utterance.len(), "POST interpret");

        let response = Self::authorized(self.client.post(&url).json(&payload), token)
            .send()
            .await
            .map_err(|e| InterpretError::Transport {
                message: e.to_string(),
            })?;

        let status = response.status();
        let body = read_body(response)
            .await
            .map_err(|message| InterpretError::Transport { message })?;

        if !status.is_success() {
            return Err(InterpretError::Status {
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }
        if let Value::String(text) = &body {
            return Err(InterpretError::InvalidResponse {
                message: format!("not JSON: {}", preview(text)),
            });
        }
        Ok(body)
    }
}

#[async_trait]
impl MutationClient for HttpBackend {
    async fn mutate(
        &self,
        command: &Command,
        token: Option<&str>,
    ) -> Result<MutationOutcome, MutationError> {
        self.post_mutation(self.wire.encode(command), token).await
    }
}

#[async_trait]
impl CalendarReader for HttpBackend {
    async fn list_events(&self, token: Option<&str>) -> Result<Vec<CalendarEvent>, BackendError> {
        let url = self.url(&self.list_path);
        let (status, body) = self.get_json("list", &url, token).await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                endpoint: "list".into(),
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }
        Ok(normalize_event_list(&body))
    }

    async fn history(&self, limit: u32, token: Option<&str>) -> Result<HistoryPage, BackendError> {
        let url = format!("{}?limit={limit}", self.url(&self.history_path));
        let (status, body) = self.get_json("history", &url, token).await?;
        coerce_history(&body, status.as_u16()).map_err(|message| {
            if status.is_success() {
                BackendError::InvalidResponse {
                    endpoint: "history".into(),
                    message,
                }
            } else {
                BackendError::Status {
                    endpoint: "history".into(),
                    status: status.as_u16(),
                    detail: Some(message),
                }
            }
        })
    }
}

impl HttpBackend {
    async fn get_json(
        &self,
        endpoint: &str,
        url: &str,
        token: Option<&str>,
    ) -> Result<(StatusCode, Value), BackendError> {
        debug!(url = %url, "GET {endpoint}");
        let response = Self::authorized(self.client.get(url), token)
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })?;
        let status = response.status();
        let body = read_body(response)
            .await
            .map_err(|message| BackendError::Transport {
                endpoint: endpoint.to_string(),
                message,
            })?;
        Ok((status, body))
    }
}

#[async_trait]
impl AudioTranscriber for HttpBackend {
    async fn transcribe(&self, clip: AudioClip, token: Option<&str>) -> Result<String, BackendError> {
        let url = self.url(&self.transcribe_path);
        let part = reqwest::multipart::Part::bytes(clip.bytes)
            .file_name(clip.file_name)
            .mime_str(&clip.mime)
            .map_err(|e| BackendError::Transport {
                endpoint: "transcribe".into(),
                message: format!("MIME error: {e}"),
            })?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = Self::authorized(self.client.post(&url).multipart(form), token)
            .send()
            .await
            .map_err(|e| BackendError::Transport {
                endpoint: "transcribe".into(),
                message: e.to_string(),
            })?;
        let status = response.status();
        let body = read_body(response)
            .await
            .map_err(|message| BackendError::Transport {
                endpoint: "transcribe".into(),
                message,
            })?;

        if !status.is_success() {
            return Err(BackendError::Status {
                endpoint: "transcribe".into(),
                status: status.as_u16(),
                detail: error_detail(&body),
            });
        }
        match body.get("text").and_then(Value::as_str) {
            Some(text) => Ok(text.trim().to_string()),
            None => Err(BackendError::InvalidResponse {
                endpoint: "transcribe".into(),
                message: format!("missing \"text\" in {}", preview(&body.to_string())),
            }),
        }
    }
}

fn preview(text: &str) -> String {
    let head: String = text.chars().take(80).collect();
    if head.len() < text.len() {
        format!("{head}...")
    } else {
        head
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_base_url() {
        let config = BackendConfig {
            base_url: "not a url".into(),
            ..BackendConfig::default()
        };
        assert!(matches!(
            HttpBackend::new(&config),
            Err(BackendError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_url_joining() {
        let config = BackendConfig {
            base_url: "http://localhost:8000/api/".into(),
            ..BackendConfig::default()
        };
        let backend = HttpBackend::new(&config).unwrap();
        assert_eq!(backend.url("/ai/interpret"), "http://localhost:8000/api/ai/interpret");
        assert_eq!(backend.url("calendar/list"), "http://localhost:8000/api/calendar/list");
    }

    #[test]
    fn test_preview_truncates() {
        assert_eq!(preview("short"), "short");
        let long = "x".repeat(100);
        assert_eq!(preview(&long).len(), 83);
    }
}

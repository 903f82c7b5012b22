//! Configuration system for voxcal.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI args.
//! Configuration is loaded from the user config directory (`voxcal/config.toml`) and/or
//! `.voxcal/config.toml` in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{AuthTokenProvider, EnvToken, SessionFileToken, WireContract};
use crate::speech::{Announcer, CommandAnnouncer, SilentAnnouncer};
use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxcalConfig {
    pub backend: BackendConfig,
    pub recognition: RecognitionConfig,
    pub controller: ControllerConfig,
    pub bus: BusConfig,
    pub auth: AuthConfig,
    pub speech: SpeechConfig,
}

impl VoxcalConfig {
    /// Human-readable warnings for suspicious values. Never fails.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.backend.base_url.starts_with("http://")
            && !self.backend.base_url.starts_with("https://")
        {
            warnings.push(format!(
                "backend.base_url ({}) is not an http(s) URL",
                self.backend.base_url
            ));
        }
        if self.backend.request_timeout_secs == Some(0) {
            warnings.push("backend.request_timeout_secs is 0; every request will time out".into());
        }
        if self.controller.title_max_chars < 4 {
            warnings.push(format!(
                "controller.title_max_chars ({}) leaves no room for a title",
                self.controller.title_max_chars
            ));
        }
        if self.speech.enabled && self.speech.program.trim().is_empty() {
            warnings.push("speech.enabled is set but speech.program is empty".into());
        }
        if self.recognition.max_capture_secs == 0 {
            warnings.push("recognition.max_capture_secs is 0; microphone sessions record nothing".into());
        }
        if self.bus.dedupe_window == 0 {
            warnings.push("bus.dedupe_window is 0; redundant transports will deliver twice".into());
        }
        warnings
    }
}

/// Calendar backend endpoints and request shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend, e.g. "http://127.0.0.1:8000".
    pub base_url: String,
    pub interpret_path: String,
    pub mutate_path: String,
    pub list_path: String,
    pub history_path: String,
    pub transcribe_path: String,
    /// IANA timezone sent to the interpreter as `tz`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Transport-level request timeout. None waits indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    /// Body shape expected by the mutate endpoint.
    pub wire: WireContract,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            interpret_path: "/ai/interpret".to_string(),
            mutate_path: "/calendar/mutate".to_string(),
            list_path: "/calendar/list".to_string(),
            history_path: "/calendar/history".to_string(),
            transcribe_path: "/ai/asr".to_string(),
            timezone: None,
            request_timeout_secs: None,
            wire: WireContract::default(),
        }
    }
}

/// Speech recognition session options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// BCP-47 language tag (e.g., "en-US").
    pub language: String,
    /// Show interim hypotheses while listening. When off, only final text
    /// reaches the transcript.
    pub interim_results: bool,
    /// Keep listening across pauses until stopped. When off, the session
    /// ends after the first final result.
    pub continuous: bool,
    /// Longest microphone recording before it is sent for transcription.
    pub max_capture_secs: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            interim_results: true,
            continuous: true,
            max_capture_secs: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// How long `done`/`error` stay visible before returning to idle. 0 = immediately.
    pub result_linger_ms: u64,
    /// Maximum length of a title derived from the utterance.
    pub title_max_chars: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            result_linger_ms: 1200,
            title_max_chars: crate::normalize::DEFAULT_MAX_TITLE_CHARS,
        }
    }
}

/// Cross-view notification bus options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Name of the in-process broadcast channel.
    pub channel_name: String,
    /// Directory shared between processes. None disables the cross-process transport.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shared_dir: Option<PathBuf>,
    /// How often the shared directory is polled.
    pub poll_interval_ms: u64,
    /// How long a message file is kept before cleanup.
    pub message_ttl_secs: u64,
    /// Number of recent message ids remembered for duplicate suppression.
    pub dedupe_window: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            channel_name: "calendar-diff".to_string(),
            shared_dir: None,
            poll_interval_ms: 500,
            message_ttl_secs: 60,
            dedupe_window: 64,
        }
    }
}

/// Where the bearer token comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Environment variable holding the token.
    pub token_env: String,
    /// Stored auth session file. Takes precedence over `token_env` when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_file: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env: "VOXCAL_AUTH_TOKEN".to_string(),
            session_file: None,
        }
    }
}

impl AuthConfig {
    /// Build the token provider this configuration describes.
    pub fn provider(&self) -> Arc<dyn AuthTokenProvider> {
        match &self.session_file {
            Some(path) => Arc::new(SessionFileToken::new(path)),
            None => Arc::new(EnvToken::new(&self.token_env)),
        }
    }
}

/// Spoken feedback after each command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub enabled: bool,
    /// Text-to-speech program; the phrase is appended as its last argument.
    pub program: String,
    pub args: Vec<String>,
    pub done_phrase: String,
    pub error_phrase: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        let program = if cfg!(target_os = "macos") { "say" } else { "espeak" };
        Self {
            enabled: true,
            program: program.to_string(),
            args: Vec::new(),
            done_phrase: "Okay. Done.".to_string(),
            error_phrase: "Sorry, I couldn't do that.".to_string(),
        }
    }
}

impl SpeechConfig {
    /// Build the announcer this configuration describes.
    pub fn announcer(&self) -> Arc<dyn Announcer> {
        if self.enabled && !self.program.trim().is_empty() {
            Arc::new(CommandAnnouncer::new(self))
        } else {
            Arc::new(SilentAnnouncer)
        }
    }
}

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("dev", "voxcal", "voxcal")
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".voxcal").join("config.toml")
}

/// Load configuration by merging defaults, config files, and environment variables.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&VoxcalConfig>,
) -> Result<VoxcalConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(VoxcalConfig::default()));

    // User-level config
    if let Some(dirs) = project_dirs() {
        let user_config = dirs.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (VOXCAL_BACKEND__BASE_URL, VOXCAL_CONTROLLER__RESULT_LINGER_MS, etc.)
    figment = figment.merge(Env::prefixed("VOXCAL_").split("__"));

    // Explicit overrides
    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether any configuration file exists (user-level or workspace-level).
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if let Some(dirs) = project_dirs() {
        if dirs.config_dir().join("config.toml").exists() {
            return true;
        }
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}

/// Write a default `.voxcal/config.toml` into the workspace.
///
/// Refuses to overwrite an existing file. Returns the path written.
pub fn write_default_config(workspace: &Path) -> Result<PathBuf, ConfigError> {
    let path = workspace_config_path(workspace);
    if path.exists() {
        return Err(ConfigError::Invalid {
            message: format!("{} already exists", path.display()),
        });
    }
    let body = toml::to_string_pretty(&VoxcalConfig::default()).map_err(|e| {
        ConfigError::ParseError {
            message: e.to_string(),
        }
    })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ConfigError::Invalid {
            message: format!("cannot create {}: {e}", parent.display()),
        })?;
    }
    std::fs::write(&path, body).map_err(|e| ConfigError::Invalid {
        message: format!("cannot write {}: {e}", path.display()),
    })?;
    Ok(path)
}

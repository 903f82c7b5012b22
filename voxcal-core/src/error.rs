//! Error types for the voxcal core library.
//!
//! Uses `thiserror` for public API error types, one enum per pipeline stage:
//! recognition, interpretation, mutation, backend reads, notification bus,
//! configuration, and the controller's own gating rules.

/// Errors raised by a speech recognition source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecognitionError {
    #[error("Speech recognition is not supported on this device")]
    Unsupported,

    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("Microphone unavailable: {message}")]
    Unavailable { message: String },

    #[error("No speech detected")]
    NoSpeech,

    #[error("Recognition failed: {message}")]
    Failed { message: String },
}

/// Errors from the remote command interpreter.
#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error("Interpreter returned an empty command")]
    EmptyCommand,

    #[error("interpret failed: {status}{}", detail_suffix(.detail))]
    Status { status: u16, detail: Option<String> },

    #[error("Interpreter request failed: {message}")]
    Transport { message: String },

    #[error("Interpreter response could not be parsed: {message}")]
    InvalidResponse { message: String },
}

/// Errors from the remote mutation endpoint.
#[derive(Debug, thiserror::Error)]
pub enum MutationError {
    #[error("mutate failed: {status}{}", detail_suffix(.detail))]
    Status { status: u16, detail: Option<String> },

    #[error("Mutation rejected: {message}")]
    Rejected { message: String },

    #[error("Mutation request failed: {message}")]
    Transport { message: String },

    #[error("Mutation response could not be parsed: {message}")]
    InvalidResponse { message: String },
}

/// Errors from read-only backend calls (list, history, transcription).
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{endpoint} failed: {status}{}", detail_suffix(.detail))]
    Status {
        endpoint: String,
        status: u16,
        detail: Option<String>,
    },

    #[error("{endpoint} request failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("{endpoint} returned an unexpected payload: {message}")]
    InvalidResponse { endpoint: String, message: String },

    #[error("Invalid endpoint URL: {message}")]
    InvalidUrl { message: String },
}

/// Errors from notification bus transports.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Transport '{transport}' failed to publish: {message}")]
    PublishFailed { transport: String, message: String },

    #[error("Transport '{transport}' failed to subscribe: {message}")]
    SubscribeFailed { transport: String, message: String },
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Errors from the voice command controller's gating rules.
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("A request is already in flight")]
    Busy,

    #[error("Nothing to submit: the transcript is empty")]
    EmptyTranscript,

    #[error("No command is pending confirmation")]
    NoPendingCommand,

    #[error("Command is incomplete: {hint}")]
    Incomplete { hint: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error(transparent)]
    Recognition(#[from] RecognitionError),

    #[error(transparent)]
    Interpret(#[from] InterpretError),

    #[error(transparent)]
    Mutation(#[from] MutationError),
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(d) if !d.is_empty() => format!(" ({d})"),
        _ => String::new(),
    }
}

//! Speech recognition sources.
//!
//! A recognition session is a push-based event source: partial text, final
//! text, an error, or the end of input. The controller starts one session per
//! listening phase and releases it through [`RecognitionControl`] when the
//! phase ends.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{AudioClip, AudioTranscriber, AuthTokenProvider};
use crate::config::RecognitionConfig;
use crate::error::RecognitionError;

/// One event produced by a recognition session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Interim hypothesis; replaces any previous interim text.
    Partial(String),
    /// Committed text; appended to the transcript.
    Final(String),
    /// The source failed. No further events follow.
    Error(RecognitionError),
    /// Input ended. No further events follow.
    Ended,
}

impl RecognitionEvent {
    /// Whether the session is over after this event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecognitionEvent::Error(_) | RecognitionEvent::Ended)
    }
}

/// Stops the underlying capture of a session.
///
/// Must be safe to call more than once and after the session already ended.
pub trait RecognitionControl: Send + Sync {
    fn stop(&self);
}

/// An active recognition session.
pub struct RecognitionSession {
    pub events: mpsc::UnboundedReceiver<RecognitionEvent>,
    pub control: Box<dyn RecognitionControl>,
}

impl RecognitionSession {
    pub fn new(
        events: mpsc::UnboundedReceiver<RecognitionEvent>,
        control: Box<dyn RecognitionControl>,
    ) -> Self {
        Self { events, control }
    }
}

/// Creates recognition sessions.
pub trait RecognitionSessionFactory: Send + Sync {
    /// Factory name for logging.
    fn name(&self) -> &str;

    /// Whether recognition is available at all. `false` is permanent.
    fn is_supported(&self) -> bool {
        true
    }

    /// Start a new session.
    fn start(&self, config: &RecognitionConfig) -> Result<RecognitionSession, RecognitionError>;
}

/// A factory for hosts without speech recognition.
pub struct UnsupportedRecognition;

impl RecognitionSessionFactory for UnsupportedRecognition {
    fn name(&self) -> &str {
        "unsupported"
    }

    fn is_supported(&self) -> bool {
        false
    }

    fn start(&self, _config: &RecognitionConfig) -> Result<RecognitionSession, RecognitionError> {
        Err(RecognitionError::Unsupported)
    }
}

pub(crate) struct TokenControl(pub(crate) CancellationToken);

impl RecognitionControl for TokenControl {
    fn stop(&self) {
        self.0.cancel();
    }
}

/// Loads the audio to upload for one session.
pub type ClipSource = Arc<dyn Fn() -> Result<AudioClip, RecognitionError> + Send + Sync>;

/// Recognition by uploading a recorded clip to a transcription endpoint.
///
/// Each session loads one clip, uploads it, and emits a single final result
/// followed by `Ended`. Stopping before the upload finishes drops the result.
pub struct UploadRecognition {
    transcriber: Arc<dyn AudioTranscriber>,
    auth: Arc<dyn AuthTokenProvider>,
    clip_source: ClipSource,
}

impl UploadRecognition {
    pub fn new(
        transcriber: Arc<dyn AudioTranscriber>,
        auth: Arc<dyn AuthTokenProvider>,
        clip_source: ClipSource,
    ) -> Self {
        Self {
            transcriber,
            auth,
            clip_source,
        }
    }
}

impl RecognitionSessionFactory for UploadRecognition {
    fn name(&self) -> &str {
        "upload"
    }

    fn start(&self, config: &RecognitionConfig) -> Result<RecognitionSession, RecognitionError> {
        let clip = (self.clip_source)()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let transcriber = self.transcriber.clone();
        let auth = self.auth.clone();
        let language = config.language.clone();

        debug!(
            file = %clip.file_name,
            bytes = clip.bytes.len(),
            language = %language,
            "Uploading clip for transcription"
        );

        tokio::spawn(transcribe_clip(transcriber, auth, clip, tx, task_cancel));

        Ok(RecognitionSession::new(rx, Box::new(TokenControl(cancel))))
    }
}

/// Upload `clip` and report the transcript as one final result followed by
/// `Ended`. Nothing is sent once `cancel` fires.
pub(crate) async fn transcribe_clip(
    transcriber: Arc<dyn AudioTranscriber>,
    auth: Arc<dyn AuthTokenProvider>,
    clip: AudioClip,
    tx: mpsc::UnboundedSender<RecognitionEvent>,
    cancel: CancellationToken,
) {
    let outcome = tokio::select! {
        result = async {
            let token = auth.token().await;
            transcriber.transcribe(clip, token.as_deref()).await
        } => result,
        _ = cancel.cancelled() => {
            debug!("Recognition stopped before transcription finished");
            return;
        }
    };
    match outcome {
        Ok(text) if !text.trim().is_empty() => {
            info!(chars = text.len(), "Transcription received");
            let _ = tx.send(RecognitionEvent::Final(text));
            let _ = tx.send(RecognitionEvent::Ended);
        }
        Ok(_) => {
            let _ = tx.send(RecognitionEvent::Error(RecognitionError::NoSpeech));
        }
        Err(e) => {
            warn!(error = %e, "Transcription failed");
            let _ = tx.send(RecognitionEvent::Error(RecognitionError::Failed {
                message: e.to_string(),
            }));
        }
    }
}

/// A mock recognition factory for testing.
///
/// Tests feed events into the most recently started session with
/// [`MockRecognition::emit`].
pub struct MockRecognition {
    supported: bool,
    start_error: Mutex<Option<RecognitionError>>,
    current: Mutex<Option<mpsc::UnboundedSender<RecognitionEvent>>>,
    started: AtomicUsize,
    stopped: Arc<AtomicUsize>,
}

impl MockRecognition {
    pub fn new() -> Self {
        Self {
            supported: true,
            start_error: Mutex::new(None),
            current: Mutex::new(None),
            started: AtomicUsize::new(0),
            stopped: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A mock that reports recognition as unsupported.
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::new()
        }
    }

    /// Make the next `start` fail with `error`.
    pub fn fail_next_start(&self, error: RecognitionError) {
        *self.start_error.lock().unwrap() = Some(error);
    }

    /// Push an event into the current session. Returns `false` when no
    /// session is listening.
    pub fn emit(&self, event: RecognitionEvent) -> bool {
        match self.current.lock().unwrap().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Number of sessions started.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls across all sessions.
    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl Default for MockRecognition {
    fn default() -> Self {
        Self::new()
    }
}

struct MockControl {
    stopped: Arc<AtomicUsize>,
}

impl RecognitionControl for MockControl {
    fn stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

impl RecognitionSessionFactory for MockRecognition {
    fn name(&self) -> &str {
        "mock"
    }

    fn is_supported(&self) -> bool {
        self.supported
    }

    fn start(&self, _config: &RecognitionConfig) -> Result<RecognitionSession, RecognitionError> {
        if !self.supported {
            return Err(RecognitionError::Unsupported);
        }
        if let Some(err) = self.start_error.lock().unwrap().take() {
            return Err(err);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.current.lock().unwrap() = Some(tx);
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(RecognitionSession::new(
            rx,
            Box::new(MockControl {
                stopped: self.stopped.clone(),
            }),
        ))
    }
}

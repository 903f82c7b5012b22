//! Voice command controller: one session's phase machine.
//!
//! The controller owns the session state (phase, transcript, pending command,
//! error, busy flag) and drives recognition, interpretation, confirmation and
//! mutation in order. State sits behind a mutex that is never held across an
//! await, so every transition is atomic relative to the others. UIs follow
//! along through [`VoiceCommandController::watch`] snapshots and the
//! [`ControllerEvent`] broadcast.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{AuthTokenProvider, InterpreterClient, MutationClient, MutationOutcome};
use crate::bus::NotificationBus;
use crate::command::{Command, Diff};
use crate::config::{ControllerConfig, RecognitionConfig};
use crate::error::{ControllerError, RecognitionError};
use crate::gate::{self, GateReport, INCOMPLETE_HINT, Zone};
use crate::normalize::Normalizer;
use crate::recognition::{RecognitionControl, RecognitionEvent, RecognitionSessionFactory};
use crate::speech::{Announcement, Announcer};

/// Controller phases. `Idle` is the resting phase; `Done` and `Error` are
/// transient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Listening,
    Interpreting,
    Confirming,
    Applying,
    Done,
    Error,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Listening => "listening",
            Phase::Interpreting => "interpreting",
            Phase::Confirming => "confirming",
            Phase::Applying => "applying",
            Phase::Done => "done",
            Phase::Error => "error",
        }
    }

    /// Whether `self -> to` is a legal transition.
    pub fn can_transition_to(self, to: Phase) -> bool {
        use Phase::*;
        matches!(
            (self, to),
            (Idle, Listening)
                | (Idle, Interpreting)
                | (Listening, Idle)
                | (Listening, Interpreting)
                | (Interpreting, Confirming)
                | (Interpreting, Error)
                | (Confirming, Idle)
                | (Confirming, Applying)
                | (Applying, Done)
                | (Applying, Error)
                | (Done, Idle)
                | (Error, Idle)
        )
    }

    /// `Done` or `Error`.
    pub fn is_result(&self) -> bool {
        matches!(self, Phase::Done | Phase::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A copy of the session state for display.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: Phase,
    /// Committed text followed by the current interim hypothesis.
    pub transcript: String,
    /// The interim part of `transcript`, empty when there is none.
    pub interim: String,
    pub command: Option<Command>,
    pub report: Option<GateReport>,
    pub error: Option<String>,
    pub busy: bool,
}

/// Notable things that happened to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    PhaseChanged { from: Phase, to: Phase },
    TranscriptChanged(String),
    CommandReady { command: Command, report: GateReport },
    Applied { diff: Option<Diff> },
    Failed { message: String },
}

/// Collaborators the controller drives.
#[derive(Clone)]
pub struct ControllerDeps {
    pub recognition: Arc<dyn RecognitionSessionFactory>,
    pub interpreter: Arc<dyn InterpreterClient>,
    pub mutation: Arc<dyn MutationClient>,
    pub auth: Arc<dyn AuthTokenProvider>,
    pub bus: NotificationBus,
    pub announcer: Arc<dyn Announcer>,
}

struct ActiveRecognition {
    epoch: u64,
    control: Box<dyn RecognitionControl>,
    cancel: CancellationToken,
}

impl ActiveRecognition {
    fn release(self) {
        self.control.stop();
        self.cancel.cancel();
    }
}

#[derive(Default)]
struct State {
    phase: Phase,
    committed: String,
    interim: String,
    command: Option<Command>,
    report: Option<GateReport>,
    error: Option<String>,
    busy: bool,
    recognition_epoch: u64,
    active: Option<ActiveRecognition>,
    result_epoch: u64,
    unsupported_reported: bool,
}

impl State {
    fn transcript(&self) -> String {
        join_text(&self.committed, &self.interim)
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            transcript: self.transcript(),
            interim: self.interim.trim().to_string(),
            command: self.command.clone(),
            report: self.report.clone(),
            error: self.error.clone(),
            busy: self.busy,
        }
    }

    fn commit_interim(&mut self) {
        let interim = std::mem::take(&mut self.interim);
        self.committed = join_text(&self.committed, &interim);
    }

    fn release_recognition(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(epoch = active.epoch, "Releasing recognition session");
            active.release();
        }
    }
}

fn join_text(head: &str, tail: &str) -> String {
    match (head.trim(), tail.trim()) {
        ("", t) => t.to_string(),
        (h, "") => h.to_string(),
        (h, t) => format!("{h} {t}"),
    }
}

struct Inner {
    deps: ControllerDeps,
    normalizer: Normalizer,
    recognition_config: RecognitionConfig,
    zone: Zone,
    result_linger: Duration,
    state: Mutex<State>,
    snapshots: watch::Sender<SessionSnapshot>,
    events: broadcast::Sender<ControllerEvent>,
    shutdown: CancellationToken,
}

/// Single-session voice command controller. Clones share the session.
#[derive(Clone)]
pub struct VoiceCommandController {
    inner: Arc<Inner>,
}

impl VoiceCommandController {
    /// A controller that reads offset-less start times in the local zone.
    pub fn new(
        deps: ControllerDeps,
        config: &ControllerConfig,
        recognition_config: RecognitionConfig,
    ) -> Self {
        Self::with_zone(deps, config, recognition_config, Zone::Local)
    }

    pub fn with_zone(
        deps: ControllerDeps,
        config: &ControllerConfig,
        recognition_config: RecognitionConfig,
        zone: Zone,
    ) -> Self {
        let (snapshots, _) = watch::channel(SessionSnapshot::default());
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                deps,
                normalizer: Normalizer::new().with_max_title_chars(config.title_max_chars),
                recognition_config,
                zone,
                result_linger: Duration::from_millis(config.result_linger_ms),
                state: Mutex::new(State::default()),
                snapshots,
                events,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: ControllerEvent) {
        let _ = self.inner.events.send(event);
    }

    fn publish(&self, state: &State) {
        self.inner.snapshots.send_replace(state.snapshot());
    }

    fn transition(&self, state: &mut State, to: Phase) -> Result<(), ControllerError> {
        let from = state.phase;
        if from == to {
            return Ok(());
        }
        if !from.can_transition_to(to) {
            return Err(ControllerError::InvalidStateTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        debug!(%from, %to, "Phase transition");
        state.phase = to;
        self.emit(ControllerEvent::PhaseChanged { from, to });
        Ok(())
    }

    /// Leave `Done`/`Error` for `Idle`. No-op in other phases.
    fn settle(&self, state: &mut State) {
        if state.phase.is_result() {
            state.result_epoch += 1;
            let _ = self.transition(state, Phase::Idle);
        }
    }

    /// Enter `Done` or `Error`, announce it, and arrange the return to `Idle`.
    fn enter_result(&self, state: &mut State, to: Phase) -> Result<(), ControllerError> {
        self.transition(state, to)?;
        let announcement = if to == Phase::Done {
            Announcement::Done
        } else {
            Announcement::Failed
        };
        self.inner.deps.announcer.announce(announcement);
        state.result_epoch += 1;
        if self.inner.result_linger.is_zero() {
            self.settle(state);
            return Ok(());
        }

        let epoch = state.result_epoch;
        let linger = self.inner.result_linger;
        let shutdown = self.inner.shutdown.clone();
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(linger) => {}
                _ = shutdown.cancelled() => return,
            }
            let Some(inner) = weak.upgrade() else { return };
            let controller = VoiceCommandController { inner };
            let mut state = controller.state();
            if state.result_epoch == epoch && state.phase.is_result() {
                controller.settle(&mut state);
                controller.publish(&state);
            }
        });
        Ok(())
    }

    /// Current session state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state().snapshot()
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    /// Follow the session state. Always holds the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshots.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.inner.events.subscribe()
    }

    /// Start a recognition session: `idle -> listening`.
    ///
    /// Clears the transcript and any previous error and silences spoken
    /// feedback. From `done`/`error` the controller returns to idle first.
    pub fn start_listening(&self) -> Result<(), ControllerError> {
        let factory = self.inner.deps.recognition.clone();
        {
            let mut state = self.state();
            if state.busy {
                return Err(ControllerError::Busy);
            }
            self.settle(&mut state);
            if state.phase != Phase::Idle {
                return Err(ControllerError::InvalidStateTransition {
                    from: state.phase.to_string(),
                    to: Phase::Listening.to_string(),
                });
            }
            if !factory.is_supported() {
                if !state.unsupported_reported {
                    state.unsupported_reported = true;
                    state.error = Some(RecognitionError::Unsupported.to_string());
                    warn!(factory = factory.name(), "Speech recognition is not supported");
                    self.publish(&state);
                }
                return Err(RecognitionError::Unsupported.into());
            }
        }

        self.inner.deps.announcer.cancel();
        let session = match factory.start(&self.inner.recognition_config) {
            Ok(session) => session,
            Err(e) => {
                warn!(factory = factory.name(), error = %e, "Recognition failed to start");
                let mut state = self.state();
                state.error = Some(e.to_string());
                self.publish(&state);
                return Err(e.into());
            }
        };

        let mut state = self.state();
        if state.phase != Phase::Idle || state.busy {
            // Someone else moved the session on while the source was starting.
            session.control.stop();
            return Err(ControllerError::InvalidStateTransition {
                from: state.phase.to_string(),
                to: Phase::Listening.to_string(),
            });
        }

        state.release_recognition();
        state.recognition_epoch += 1;
        let epoch = state.recognition_epoch;
        let cancel = CancellationToken::new();
        state.active = Some(ActiveRecognition {
            epoch,
            control: session.control,
            cancel: cancel.clone(),
        });
        state.committed.clear();
        state.interim.clear();
        state.error = None;
        self.transition(&mut state, Phase::Listening)?;
        self.publish(&state);
        drop(state);

        info!(factory = factory.name(), epoch, "Listening");
        self.spawn_recognition_pump(epoch, session.events, cancel);
        Ok(())
    }

    fn spawn_recognition_pump(
        &self,
        epoch: u64,
        mut events: mpsc::UnboundedReceiver<RecognitionEvent>,
        cancel: CancellationToken,
    ) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event.unwrap_or(RecognitionEvent::Ended),
                };
                let Some(inner) = weak.upgrade() else { break };
                let terminal = event.is_terminal();
                VoiceCommandController { inner }.on_recognition_event(epoch, event);
                if terminal {
                    break;
                }
            }
        });
    }

    fn on_recognition_event(&self, epoch: u64, event: RecognitionEvent) {
        let mut state = self.state();
        let current = state.active.as_ref().map(|a| a.epoch);
        if state.phase != Phase::Listening || current != Some(epoch) {
            debug!(epoch, ?current, "Ignoring event from a stale recognition session");
            return;
        }

        let config = &self.inner.recognition_config;
        match event {
            RecognitionEvent::Partial(_) if !config.interim_results => return,
            RecognitionEvent::Partial(text) => {
                state.interim = text;
                self.emit(ControllerEvent::TranscriptChanged(state.transcript()));
            }
            RecognitionEvent::Final(text) => {
                state.interim.clear();
                state.committed = join_text(&state.committed, &text);
                self.emit(ControllerEvent::TranscriptChanged(state.transcript()));
                if !config.continuous {
                    debug!(epoch, "Single-utterance session complete");
                    state.release_recognition();
                    let _ = self.transition(&mut state, Phase::Idle);
                }
            }
            RecognitionEvent::Error(e) => {
                warn!(error = %e, "Recognition error");
                state.error = Some(e.to_string());
                state.release_recognition();
                let _ = self.transition(&mut state, Phase::Idle);
                self.emit(ControllerEvent::Failed {
                    message: e.to_string(),
                });
            }
            RecognitionEvent::Ended => {
                debug!(epoch, "Recognition ended");
                state.commit_interim();
                state.release_recognition();
                let _ = self.transition(&mut state, Phase::Idle);
            }
        }
        self.publish(&state);
    }

    /// Stop listening: `listening -> idle`. Safe in any phase.
    pub fn stop_listening(&self) {
        let mut state = self.state();
        if state.phase != Phase::Listening {
            state.release_recognition();
            return;
        }
        state.commit_interim();
        state.release_recognition();
        let _ = self.transition(&mut state, Phase::Idle);
        self.publish(&state);
    }

    /// Replace the transcript with typed text.
    pub fn set_transcript(&self, text: impl Into<String>) -> Result<(), ControllerError> {
        let mut state = self.state();
        if state.busy {
            return Err(ControllerError::Busy);
        }
        state.committed = text.into().trim().to_string();
        state.interim.clear();
        self.emit(ControllerEvent::TranscriptChanged(state.transcript()));
        self.publish(&state);
        Ok(())
    }

    pub fn clear_transcript(&self) -> Result<(), ControllerError> {
        self.set_transcript(String::new())
    }

    /// Send the transcript to the interpreter: `idle|listening -> interpreting`.
    ///
    /// On success the normalized command waits in `confirming` and its gate
    /// report is returned. Failures pass through `error` back to idle with
    /// the transcript kept.
    pub async fn submit(&self) -> Result<GateReport, ControllerError> {
        let utterance = {
            let mut state = self.state();
            if state.busy {
                return Err(ControllerError::Busy);
            }
            self.settle(&mut state);
            if state.phase == Phase::Listening {
                state.commit_interim();
                state.release_recognition();
                self.transition(&mut state, Phase::Idle)?;
            }
            if state.phase != Phase::Idle {
                return Err(ControllerError::InvalidStateTransition {
                    from: state.phase.to_string(),
                    to: Phase::Interpreting.to_string(),
                });
            }
            let utterance = state.transcript();
            if utterance.is_empty() {
                self.publish(&state);
                return Err(ControllerError::EmptyTranscript);
            }
            state.busy = true;
            state.error = None;
            state.command = None;
            state.report = None;
            self.transition(&mut state, Phase::Interpreting)?;
            self.publish(&state);
            utterance
        };

        let token = self.inner.deps.auth.token().await;
        let result = self
            .inner
            .deps
            .interpreter
            .interpret(&utterance, token.as_deref())
            .await
            .and_then(|raw| self.inner.normalizer.normalize(&raw, &utterance));

        let mut state = self.state();
        state.busy = false;
        let outcome = match result {
            Ok(command) => {
                let report = gate::evaluate_in(&command, Utc::now(), self.inner.zone);
                info!(summary = %report.summary, incomplete = report.incomplete, "Command ready");
                state.command = Some(command.clone());
                state.report = Some(report.clone());
                self.transition(&mut state, Phase::Confirming)?;
                self.emit(ControllerEvent::CommandReady {
                    command,
                    report: report.clone(),
                });
                Ok(report)
            }
            Err(e) => {
                warn!(error = %e, "Interpretation failed");
                state.error = Some(e.to_string());
                self.emit(ControllerEvent::Failed {
                    message: e.to_string(),
                });
                self.enter_result(&mut state, Phase::Error)?;
                Err(e.into())
            }
        };
        self.publish(&state);
        outcome
    }

    /// Apply the pending command: `confirming -> applying`.
    ///
    /// Rejected without a transition when nothing is pending, a call is in
    /// flight, or the command is incomplete.
    pub async fn confirm(&self) -> Result<MutationOutcome, ControllerError> {
        let command = {
            let mut state = self.state();
            if state.busy {
                return Err(ControllerError::Busy);
            }
            let Some(command) = state.command.clone().filter(|_| state.phase == Phase::Confirming)
            else {
                return Err(ControllerError::NoPendingCommand);
            };
            let report = gate::evaluate_in(&command, Utc::now(), self.inner.zone);
            if report.incomplete {
                state.report = Some(report);
                self.publish(&state);
                return Err(ControllerError::Incomplete {
                    hint: INCOMPLETE_HINT.to_string(),
                });
            }
            state.report = Some(report);
            state.busy = true;
            state.error = None;
            self.transition(&mut state, Phase::Applying)?;
            self.publish(&state);
            command
        };

        let token = self.inner.deps.auth.token().await;
        let result = self
            .inner
            .deps
            .mutation
            .mutate(&command, token.as_deref())
            .await;

        match result {
            Ok(outcome) => {
                self.notify_observers(outcome.diff.clone()).await;
                let mut state = self.state();
                state.busy = false;
                state.committed.clear();
                state.interim.clear();
                state.command = None;
                state.report = None;
                info!(op = ?command.op, "Command applied");
                self.emit(ControllerEvent::Applied {
                    diff: outcome.diff.clone(),
                });
                self.enter_result(&mut state, Phase::Done)?;
                self.publish(&state);
                Ok(outcome)
            }
            Err(e) => {
                warn!(error = %e, "Mutation failed");
                let mut state = self.state();
                state.busy = false;
                state.command = None;
                state.report = None;
                state.error = Some(e.to_string());
                self.emit(ControllerEvent::Failed {
                    message: e.to_string(),
                });
                self.enter_result(&mut state, Phase::Error)?;
                self.publish(&state);
                Err(e.into())
            }
        }
    }

    async fn notify_observers(&self, diff: Option<Diff>) {
        let bus = &self.inner.deps.bus;
        let published = match diff {
            Some(diff) => bus.publish_diff(diff).await,
            None => bus.publish_refresh().await,
        };
        if let Err(e) = published {
            warn!(error = %e, "Observers were not notified");
        }
    }

    /// Discard the pending command: `confirming -> idle`.
    pub fn cancel(&self) -> Result<(), ControllerError> {
        let mut state = self.state();
        if state.phase != Phase::Confirming || state.busy {
            return Err(ControllerError::NoPendingCommand);
        }
        state.command = None;
        state.report = None;
        self.transition(&mut state, Phase::Idle)?;
        self.publish(&state);
        Ok(())
    }

    /// Dismiss a `done`/`error` result before the linger elapses.
    pub fn acknowledge(&self) {
        let mut state = self.state();
        if state.phase.is_result() {
            self.settle(&mut state);
            self.publish(&state);
        }
    }

    /// Release recognition and pending timers. In-flight calls still finish.
    pub fn teardown(&self) {
        self.inner.shutdown.cancel();
        let mut state = self.state();
        state.release_recognition();
        match state.phase {
            Phase::Listening => {
                let _ = self.transition(&mut state, Phase::Idle);
            }
            phase if phase.is_result() => self.settle(&mut state),
            _ => {}
        }
        self.publish(&state);
        debug!("Controller torn down");
    }
}

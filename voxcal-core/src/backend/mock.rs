//! Mock backend collaborators for testing.
//!
//! Each mock serves queued responses in order and records what it was asked.
//! An empty queue produces an error. Interpreter and mutation mocks can be
//! gated so a test decides when an in-flight call completes.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

use super::{
    AudioClip, AudioTranscriber, CalendarReader, HistoryPage, InterpreterClient, MutationClient,
    MutationOutcome,
};
use crate::command::{CalendarEvent, Command};
use crate::error::{BackendError, InterpretError, MutationError};

/// Concurrency bookkeeping shared by the gated mocks.
#[derive(Default)]
struct CallTracker {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    gate: Option<Semaphore>,
}

impl CallTracker {
    fn gated() -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::default()
        }
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn release(&self, n: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(n);
        }
    }
}

/// A mock interpreter returning queued raw payloads.
#[derive(Default)]
pub struct MockInterpreter {
    responses: Mutex<VecDeque<Result<Value, InterpretError>>>,
    utterances: Mutex<Vec<String>>,
    tokens: Mutex<Vec<Option<String>>>,
    tracker: CallTracker,
}

impl MockInterpreter {
    /// Create a new mock that returns errors (no responses queued).
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock with pre-configured responses.
    pub fn with_responses(responses: Vec<Result<Value, InterpretError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    /// Like [`MockInterpreter::with_responses`], but every call blocks until
    /// [`MockInterpreter::release`] lets it through.
    pub fn gated(responses: Vec<Result<Value, InterpretError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            tracker: CallTracker::gated(),
            ..Self::default()
        }
    }

    pub fn push_response(&self, response: Result<Value, InterpretError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// Let `n` blocked calls complete.
    pub fn release(&self, n: usize) {
        self.tracker.release(n);
    }

    /// Number of times `interpret` was called.
    pub fn call_count(&self) -> usize {
        self.tracker.calls.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous calls observed.
    pub fn max_in_flight(&self) -> usize {
        self.tracker.max_in_flight.load(Ordering::SeqCst)
    }

    /// Utterances received, in call order.
    pub fn utterances(&self) -> Vec<String> {
        self.utterances.lock().unwrap().clone()
    }

    /// Tokens received, in call order.
    pub fn tokens(&self) -> Vec<Option<String>> {
        self.tokens.lock().unwrap().clone()
    }
}

#[async_trait]
impl InterpreterClient for MockInterpreter {
    async fn interpret(
        &self,
        utterance: &str,
        token: Option<&str>,
    ) -> Result<Value, InterpretError> {
        self.utterances.lock().unwrap().push(utterance.to_string());
        self.tokens.lock().unwrap().push(token.map(str::to_string));
        self.tracker.enter().await;
        let next = self.responses.lock().unwrap().pop_front();
        self.tracker.leave();
        next.unwrap_or_else(|| {
            Err(InterpretError::Transport {
                message: "no mock responses queued".into(),
            })
        })
    }
}

/// A mock mutation endpoint returning queued outcomes.
#[derive(Default)]
pub struct MockMutation {
    responses: Mutex<VecDeque<Result<MutationOutcome, MutationError>>>,
    commands: Mutex<Vec<Command>>,
    tracker: CallTracker,
}

impl MockMutation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<Result<MutationOutcome, MutationError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    /// Every call blocks until [`MockMutation::release`].
    pub fn gated(responses: Vec<Result<MutationOutcome, MutationError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            tracker: CallTracker::gated(),
            ..Self::default()
        }
    }

    pub fn push_response(&self, response: Result<MutationOutcome, MutationError>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn release(&self, n: usize) {
        self.tracker.release(n);
    }

    pub fn call_count(&self) -> usize {
        self.tracker.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.tracker.max_in_flight.load(Ordering::SeqCst)
    }

    /// Commands received, in call order.
    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl MutationClient for MockMutation {
    async fn mutate(
        &self,
        command: &Command,
        _token: Option<&str>,
    ) -> Result<MutationOutcome, MutationError> {
        self.commands.lock().unwrap().push(command.clone());
        self.tracker.enter().await;
        let next = self.responses.lock().unwrap().pop_front();
        self.tracker.leave();
        next.unwrap_or_else(|| {
            Err(MutationError::Transport {
                message: "no mock responses queued".into(),
            })
        })
    }
}

/// A mock calendar reader serving a fixed event list.
#[derive(Default)]
pub struct MockReader {
    events: Mutex<Vec<CalendarEvent>>,
    history: Mutex<HistoryPage>,
    list_calls: AtomicUsize,
}

impl MockReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<CalendarEvent>) -> Self {
        Self {
            events: Mutex::new(events),
            ..Self::default()
        }
    }

    /// Replace what subsequent `list_events` calls return.
    pub fn set_events(&self, events: Vec<CalendarEvent>) {
        *self.events.lock().unwrap() = events;
    }

    pub fn set_history(&self, page: HistoryPage) {
        *self.history.lock().unwrap() = page;
    }

    /// Number of times `list_events` was called.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CalendarReader for MockReader {
    async fn list_events(&self, _token: Option<&str>) -> Result<Vec<CalendarEvent>, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.events.lock().unwrap().clone())
    }

    async fn history(
        &self,
        limit: u32,
        _token: Option<&str>,
    ) -> Result<HistoryPage, BackendError> {
        let mut page = self.history.lock().unwrap().clone();
        page.items.truncate(limit as usize);
        page.limit = Some(limit);
        Ok(page)
    }
}

/// A mock transcription endpoint.
#[derive(Default)]
pub struct MockTranscriber {
    responses: Mutex<VecDeque<Result<String, BackendError>>>,
    call_count: AtomicUsize,
}

impl MockTranscriber {
    /// Create a new mock that returns errors (no responses queued).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: Vec<Result<String, BackendError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Number of times `transcribe` was called.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioTranscriber for MockTranscriber {
    async fn transcribe(&self, _clip: AudioClip, _token: Option<&str>) -> Result<String, BackendError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
            Err(BackendError::Transport {
                endpoint: "transcribe".into(),
                message: "no mock responses queued".into(),
            })
        })
    }
}

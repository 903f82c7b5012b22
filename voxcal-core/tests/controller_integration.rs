//! Integration tests for the voice command controller.
//!
//! Every collaborator is a mock; no network or audio hardware is needed.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::{mpsc, watch};

use voxcal_core::backend::{MockInterpreter, MockMutation, NoAuth, StaticToken};
use voxcal_core::config::{ControllerConfig, RecognitionConfig};
use voxcal_core::error::{ControllerError, InterpretError, MutationError, RecognitionError};
use voxcal_core::recognition::MockRecognition;
use voxcal_core::speech::{MockAnnouncer, SilentAnnouncer};
use voxcal_core::{
    Announcement, CalendarEvent, ControllerDeps, ControllerEvent, Diff, MutationOutcome,
    NotificationBus, Op, Phase, RecognitionEvent, SessionSnapshot, VoiceCommandController,
};

struct Harness {
    controller: VoiceCommandController,
    recognition: Arc<MockRecognition>,
    interpreter: Arc<MockInterpreter>,
    mutation: Arc<MockMutation>,
    announcer: Arc<MockAnnouncer>,
    bus: NotificationBus,
}

fn harness_with(
    recognition: MockRecognition,
    interpreter: MockInterpreter,
    mutation: MockMutation,
    linger_ms: u64,
) -> Harness {
    harness_with_recognition(
        recognition,
        RecognitionConfig::default(),
        interpreter,
        mutation,
        linger_ms,
    )
}

fn harness_with_recognition(
    recognition: MockRecognition,
    recognition_config: RecognitionConfig,
    interpreter: MockInterpreter,
    mutation: MockMutation,
    linger_ms: u64,
) -> Harness {
    let recognition = Arc::new(recognition);
    let interpreter = Arc::new(interpreter);
    let mutation = Arc::new(mutation);
    let announcer = Arc::new(MockAnnouncer::new());
    let bus = NotificationBus::local("calendar-diff");
    let deps = ControllerDeps {
        recognition: recognition.clone(),
        interpreter: interpreter.clone(),
        mutation: mutation.clone(),
        auth: Arc::new(NoAuth),
        bus: bus.clone(),
        announcer: announcer.clone(),
    };
    let config = ControllerConfig {
        result_linger_ms: linger_ms,
        ..ControllerConfig::default()
    };
    Harness {
        controller: VoiceCommandController::new(deps, &config, recognition_config),
        recognition,
        interpreter,
        mutation,
        announcer,
        bus,
    }
}

fn harness(interpreter: Vec<Result<Value, InterpretError>>, mutation: MockMutation) -> Harness {
    harness_with(
        MockRecognition::new(),
        MockInterpreter::with_responses(interpreter),
        mutation,
        0,
    )
}

async fn wait_for(
    rx: &mut watch::Receiver<SessionSnapshot>,
    pred: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(pred))
        .await
        .expect("timed out waiting for controller state")
        .expect("controller dropped")
        .clone()
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}

// --- Scenarios ---

#[tokio::test]
async fn test_create_with_start_and_end_applies_and_notifies() {
    let created = CalendarEvent::new("e1")
        .with_title("Lunch with Sam")
        .with_start("2099-05-01T12:00:00Z");
    let h = harness(
        vec![Ok(json!({
            "op": "create",
            "title": "Lunch with Sam",
            "start": "2099-05-01T12:00:00Z",
            "end": "2099-05-01T13:00:00Z"
        }))],
        MockMutation::with_responses(vec![Ok(MutationOutcome::with_diff(Diff::Create {
            event: created.clone(),
        }))]),
    );
    let (tx, mut diffs) = mpsc::unbounded_channel();
    let _sub = h
        .bus
        .subscribe(|| {}, move |diff| {
            let _ = tx.send(diff);
        })
        .unwrap();

    h.controller.set_transcript("lunch with Sam on May 1st at noon").unwrap();
    let report = h.controller.submit().await.unwrap();
    assert!(!report.incomplete);
    assert!(!report.destructive);
    assert!(!report.past_dated);
    assert_eq!(h.controller.phase(), Phase::Confirming);

    let outcome = h.controller.confirm().await.unwrap();
    assert_eq!(outcome.diff, Some(Diff::Create { event: created.clone() }));

    let snap = h.controller.snapshot();
    assert_eq!(snap.phase, Phase::Idle);
    assert_eq!(snap.transcript, "");
    assert_eq!(snap.command, None);
    assert_eq!(snap.error, None);
    assert!(!snap.busy);

    let delivered = tokio::time::timeout(Duration::from_secs(2), diffs.recv())
        .await
        .unwrap();
    assert_eq!(delivered, Some(Diff::Create { event: created }));

    let sent = h.mutation.commands();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].op, Some(Op::Create));
    assert_eq!(sent[0].end.as_deref(), Some("2099-05-01T13:00:00Z"));
    assert_eq!(h.announcer.announced(), vec![Announcement::Done]);
}

#[tokio::test]
async fn test_delete_last_goes_from_interpret_to_mutation() {
    let h = harness(
        vec![Ok(json!({"command": {"op": "delete_last"}, "user": {"id": "u1"}}))],
        MockMutation::with_responses(vec![Ok(MutationOutcome::with_diff(Diff::Delete {
            id: "e9".into(),
        }))]),
    );

    h.controller.set_transcript("delete the last event").unwrap();
    let report = h.controller.submit().await.unwrap();
    assert!(report.destructive);
    assert!(!report.incomplete);
    assert!(report.can_confirm());
    assert_eq!(report.summary, "DELETE LAST");

    h.controller.confirm().await.unwrap();
    let sent = h.mutation.commands();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].op, Some(Op::DeleteLast));
    assert_eq!(sent[0].title, None);
    assert_eq!(h.controller.phase(), Phase::Idle);
}

#[tokio::test]
async fn test_past_dated_delete_is_flagged_but_confirmable() {
    let h = harness(
        vec![Ok(json!({
            "op": "delete_event",
            "id": "e42",
            "title": "Standup",
            "start": "2020-01-06T09:00:00Z"
        }))],
        MockMutation::with_responses(vec![Ok(MutationOutcome::with_diff(Diff::Delete {
            id: "e42".into(),
        }))]),
    );

    h.controller.set_transcript("delete the standup").unwrap();
    let report = h.controller.submit().await.unwrap();
    assert!(report.destructive);
    assert!(report.past_dated);
    assert!(report.can_confirm());
    assert_eq!(report.warnings().len(), 2);

    let command = h.controller.snapshot().command.unwrap();
    assert_eq!(command.op, Some(Op::Delete));
    assert_eq!(command.id.as_deref(), Some("e42"));

    h.controller.confirm().await.unwrap();
    assert_eq!(h.mutation.call_count(), 1);
}

#[tokio::test]
async fn test_null_interpretation_keeps_transcript() {
    let h = harness_with(
        MockRecognition::new(),
        MockInterpreter::with_responses(vec![Ok(Value::Null)]),
        MockMutation::new(),
        60_000,
    );
    h.controller.set_transcript("mumble mumble").unwrap();

    let err = h.controller.submit().await.unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Interpret(InterpretError::EmptyCommand)
    ));
    assert_eq!(h.announcer.announced(), vec![Announcement::Failed]);

    let snap = h.controller.snapshot();
    assert_eq!(snap.phase, Phase::Error);
    assert_eq!(
        snap.error.as_deref(),
        Some("Interpreter returned an empty command")
    );
    assert_eq!(snap.transcript, "mumble mumble");
    assert_eq!(snap.command, None);
    assert!(!snap.busy);

    h.controller.acknowledge();
    assert_eq!(h.controller.phase(), Phase::Idle);
    assert_eq!(h.controller.snapshot().transcript, "mumble mumble");
}

// --- Gate ---

#[tokio::test]
async fn test_incomplete_command_blocks_confirm() {
    let h = harness(vec![Ok(json!({"op": "create", "title": "Dentist"}))], MockMutation::new());
    h.controller.set_transcript("dentist").unwrap();

    let report = h.controller.submit().await.unwrap();
    assert!(report.incomplete);
    assert!(report.incomplete_hint().is_some());

    let err = h.controller.confirm().await.unwrap_err();
    assert!(matches!(err, ControllerError::Incomplete { .. }));
    assert_eq!(h.controller.phase(), Phase::Confirming);
    assert_eq!(h.mutation.call_count(), 0);

    h.controller.cancel().unwrap();
    let snap = h.controller.snapshot();
    assert_eq!(snap.phase, Phase::Idle);
    assert_eq!(snap.command, None);
    assert_eq!(h.mutation.call_count(), 0);
}

#[tokio::test]
async fn test_unknown_op_is_incomplete() {
    let h = harness(
        vec![Ok(json!({"op": "teleport", "start": "2099-01-01T00:00:00Z"}))],
        MockMutation::new(),
    );
    h.controller.set_transcript("teleport me").unwrap();
    let report = h.controller.submit().await.unwrap();
    assert!(report.incomplete);
    assert_eq!(h.controller.snapshot().command.unwrap().op, None);
}

#[tokio::test]
async fn test_placeholder_title_is_derived_from_utterance() {
    let h = harness(
        vec![Ok(json!({"command": {"type": "create_event", "title": "AI Event"}}))],
        MockMutation::new(),
    );
    h.controller.set_transcript("Schedule lunch with Sam at").unwrap();
    h.controller.submit().await.unwrap();
    let command = h.controller.snapshot().command.unwrap();
    assert_eq!(command.title.as_deref(), Some("Lunch with Sam"));
}

// --- Errors ---

#[tokio::test]
async fn test_mutation_failure_discards_command() {
    let h = harness(
        vec![Ok(json!({"op": "create", "title": "Gym", "start": "2099-01-01T07:00:00Z"}))],
        MockMutation::with_responses(vec![Err(MutationError::Status {
            status: 500,
            detail: Some("database is down".into()),
        })]),
    );
    let mut events = h.controller.subscribe();
    h.controller.set_transcript("gym at 7").unwrap();
    h.controller.submit().await.unwrap();

    let err = h.controller.confirm().await.unwrap_err();
    assert!(matches!(err, ControllerError::Mutation(_)));

    let snap = h.controller.snapshot();
    assert_eq!(snap.phase, Phase::Idle);
    assert_eq!(snap.command, None);
    assert_eq!(snap.error.as_deref(), Some("mutate failed: 500 (database is down)"));
    assert!(!snap.busy);

    // No retry.
    assert!(h.controller.confirm().await.is_err());
    assert_eq!(h.mutation.call_count(), 1);

    let mut saw_error_phase = false;
    while let Ok(event) = events.try_recv() {
        if event == (ControllerEvent::PhaseChanged { from: Phase::Applying, to: Phase::Error }) {
            saw_error_phase = true;
        }
    }
    assert!(saw_error_phase);
}

#[tokio::test]
async fn test_interpreter_http_error_surfaces_detail() {
    let h = harness(
        vec![Err(InterpretError::Status {
            status: 401,
            detail: Some("Not authenticated".into()),
        })],
        MockMutation::new(),
    );
    h.controller.set_transcript("lunch").unwrap();
    assert!(h.controller.submit().await.is_err());
    assert_eq!(
        h.controller.snapshot().error.as_deref(),
        Some("interpret failed: 401 (Not authenticated)")
    );
}

#[tokio::test]
async fn test_empty_transcript_is_rejected_without_call() {
    let h = harness(vec![], MockMutation::new());
    h.controller.set_transcript("   ").unwrap();
    assert!(matches!(
        h.controller.submit().await,
        Err(ControllerError::EmptyTranscript)
    ));
    assert_eq!(h.interpreter.call_count(), 0);
    assert_eq!(h.controller.phase(), Phase::Idle);
}

#[tokio::test]
async fn test_confirm_without_pending_command() {
    let h = harness(vec![], MockMutation::new());
    assert!(matches!(
        h.controller.confirm().await,
        Err(ControllerError::NoPendingCommand)
    ));
    assert!(matches!(
        h.controller.cancel(),
        Err(ControllerError::NoPendingCommand)
    ));
}

#[tokio::test]
async fn test_error_lingers_then_returns_to_idle() {
    let h = harness_with(
        MockRecognition::new(),
        MockInterpreter::with_responses(vec![Ok(json!([]))]),
        MockMutation::new(),
        40,
    );
    let mut rx = h.controller.watch();
    h.controller.set_transcript("hello").unwrap();
    assert!(h.controller.submit().await.is_err());
    assert_eq!(h.controller.phase(), Phase::Error);

    let snap = wait_for(&mut rx, |s| s.phase == Phase::Idle).await;
    assert_eq!(snap.error.as_deref(), Some("Interpreter returned an empty command"));
}

// --- Busy guard ---

#[tokio::test]
async fn test_second_submit_while_interpreting_is_busy() {
    let h = harness_with(
        MockRecognition::new(),
        MockInterpreter::gated(vec![Ok(
            json!({"op": "create", "title": "Lunch", "start": "2099-01-01T12:00:00Z"}),
        )]),
        MockMutation::new(),
        0,
    );
    h.controller.set_transcript("lunch at noon").unwrap();

    let first = {
        let controller = h.controller.clone();
        tokio::spawn(async move { controller.submit().await })
    };
    let interpreter = h.interpreter.clone();
    wait_until(move || interpreter.call_count() == 1).await;

    let snap = h.controller.snapshot();
    assert_eq!(snap.phase, Phase::Interpreting);
    assert!(snap.busy);
    assert!(matches!(h.controller.submit().await, Err(ControllerError::Busy)));
    assert!(matches!(h.controller.confirm().await, Err(ControllerError::Busy)));
    assert!(matches!(h.controller.start_listening(), Err(ControllerError::Busy)));
    assert!(matches!(h.controller.set_transcript("other"), Err(ControllerError::Busy)));

    h.interpreter.release(1);
    assert!(first.await.unwrap().is_ok());
    assert_eq!(h.interpreter.call_count(), 1);
    assert_eq!(h.interpreter.max_in_flight(), 1);
    assert!(!h.controller.snapshot().busy);
}

#[tokio::test]
async fn test_concurrent_confirms_issue_one_mutation() {
    let h = harness_with(
        MockRecognition::new(),
        MockInterpreter::with_responses(vec![Ok(
            json!({"op": "delete", "id": "e1"}),
        )]),
        MockMutation::gated(vec![Ok(MutationOutcome::default())]),
        0,
    );
    h.controller.set_transcript("delete it").unwrap();
    h.controller.submit().await.unwrap();

    let a = h.controller.clone();
    let b = h.controller.clone();
    let mutation = h.mutation.clone();
    let (ra, rb, ()) = tokio::join!(a.confirm(), b.confirm(), async move {
        while mutation.call_count() == 0 {
            tokio::task::yield_now().await;
        }
        mutation.release(1);
    });

    assert_eq!(
        [ra.is_ok(), rb.is_ok()].iter().filter(|ok| **ok).count(),
        1
    );
    assert!(matches!(ra.err().or(rb.err()), Some(ControllerError::Busy)));
    assert_eq!(h.mutation.call_count(), 1);
    assert_eq!(h.mutation.max_in_flight(), 1);
}

// --- Recognition ---

#[tokio::test]
async fn test_listening_folds_partials_and_finals() {
    let h = harness(
        vec![Ok(json!({"op": "create"}))],
        MockMutation::new(),
    );
    let mut rx = h.controller.watch();
    h.controller.start_listening().unwrap();
    assert_eq!(h.controller.phase(), Phase::Listening);

    assert!(h.recognition.emit(RecognitionEvent::Partial("schedule".into())));
    wait_for(&mut rx, |s| s.transcript == "schedule").await;

    h.recognition.emit(RecognitionEvent::Final("schedule lunch with Sam".into()));
    h.recognition.emit(RecognitionEvent::Partial("at".into()));
    let snap = wait_for(&mut rx, |s| s.transcript == "schedule lunch with Sam at").await;
    assert_eq!(snap.interim, "at");

    // Submitting while listening stops recognition first.
    h.controller.submit().await.unwrap();
    assert_eq!(h.recognition.stopped(), 1);
    assert_eq!(h.interpreter.utterances(), vec!["schedule lunch with Sam at"]);
    let command = h.controller.snapshot().command.unwrap();
    assert_eq!(command.title.as_deref(), Some("Lunch with Sam"));
}

#[tokio::test]
async fn test_interim_results_off_keeps_only_finals() {
    let h = harness_with_recognition(
        MockRecognition::new(),
        RecognitionConfig {
            interim_results: false,
            ..RecognitionConfig::default()
        },
        MockInterpreter::new(),
        MockMutation::new(),
        0,
    );
    let mut rx = h.controller.watch();
    h.controller.start_listening().unwrap();

    h.recognition.emit(RecognitionEvent::Partial("lunch with".into()));
    h.recognition.emit(RecognitionEvent::Final("lunch with Sam".into()));
    let snap = wait_for(&mut rx, |s| !s.transcript.is_empty()).await;
    assert_eq!(snap.transcript, "lunch with Sam");
    assert_eq!(snap.interim, "");
    assert_eq!(snap.phase, Phase::Listening);
}

#[tokio::test]
async fn test_single_utterance_session_ends_after_final() {
    let h = harness_with_recognition(
        MockRecognition::new(),
        RecognitionConfig {
            continuous: false,
            ..RecognitionConfig::default()
        },
        MockInterpreter::new(),
        MockMutation::new(),
        0,
    );
    let mut rx = h.controller.watch();
    h.controller.start_listening().unwrap();

    h.recognition.emit(RecognitionEvent::Partial("book".into()));
    h.recognition.emit(RecognitionEvent::Final("book the gym".into()));
    h.recognition.emit(RecognitionEvent::Final("and dinner".into()));

    let snap = wait_for(&mut rx, |s| s.phase == Phase::Idle).await;
    assert_eq!(snap.transcript, "book the gym");
    assert_eq!(h.recognition.stopped(), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.controller.snapshot().transcript, "book the gym");
}

#[tokio::test]
async fn test_listening_interrupts_spoken_feedback() {
    let h = harness(
        vec![Ok(json!({"op": "create", "title": "Gym", "start": "2099-01-01T07:00:00Z"}))],
        MockMutation::with_responses(vec![Ok(MutationOutcome::default())]),
    );
    h.controller.set_transcript("gym at seven").unwrap();
    h.controller.submit().await.unwrap();
    h.controller.confirm().await.unwrap();
    assert_eq!(h.announcer.announced(), vec![Announcement::Done]);
    assert_eq!(h.announcer.cancels(), 0);

    h.controller.start_listening().unwrap();
    assert_eq!(h.announcer.cancels(), 1);
}

#[tokio::test]
async fn test_recognition_end_returns_to_idle() {
    let h = harness(vec![], MockMutation::new());
    let mut rx = h.controller.watch();
    h.controller.start_listening().unwrap();
    h.recognition.emit(RecognitionEvent::Final("book the gym".into()));
    h.recognition.emit(RecognitionEvent::Ended);

    let snap = wait_for(&mut rx, |s| s.phase == Phase::Idle).await;
    assert_eq!(snap.transcript, "book the gym");
    assert_eq!(h.recognition.stopped(), 1);
}

#[tokio::test]
async fn test_recognition_error_records_message() {
    let h = harness(vec![], MockMutation::new());
    let mut rx = h.controller.watch();
    h.controller.start_listening().unwrap();
    h.recognition
        .emit(RecognitionEvent::Error(RecognitionError::PermissionDenied));

    let snap = wait_for(&mut rx, |s| s.phase == Phase::Idle).await;
    assert_eq!(snap.error.as_deref(), Some("Microphone permission denied"));
    assert_eq!(h.interpreter.call_count(), 0);
}

#[tokio::test]
async fn test_stop_is_safe_and_ignores_stale_events() {
    let h = harness(vec![], MockMutation::new());
    h.controller.start_listening().unwrap();
    h.controller.stop_listening();
    h.controller.stop_listening();
    assert_eq!(h.controller.phase(), Phase::Idle);

    // The old session is gone; late events change nothing.
    h.recognition.emit(RecognitionEvent::Final("too late".into()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    let snap = h.controller.snapshot();
    assert_eq!(snap.transcript, "");
    assert_eq!(snap.phase, Phase::Idle);
    assert_eq!(h.interpreter.call_count(), 0);
}

#[tokio::test]
async fn test_new_session_clears_previous_transcript() {
    let h = harness(vec![], MockMutation::new());
    h.controller.set_transcript("old words").unwrap();
    h.controller.start_listening().unwrap();
    assert_eq!(h.controller.snapshot().transcript, "");
    assert_eq!(h.recognition.started(), 1);
}

#[tokio::test]
async fn test_unsupported_recognition_reported_once() {
    let h = harness_with(
        MockRecognition::unsupported(),
        MockInterpreter::new(),
        MockMutation::new(),
        0,
    );
    let err = h.controller.start_listening().unwrap_err();
    assert!(matches!(
        err,
        ControllerError::Recognition(RecognitionError::Unsupported)
    ));
    let first = h.controller.snapshot().error;
    assert!(first.is_some());

    let mut rx = h.controller.watch();
    rx.mark_unchanged();
    assert!(h.controller.start_listening().is_err());
    assert!(!rx.has_changed().unwrap());
    assert_eq!(h.controller.phase(), Phase::Idle);
}

#[tokio::test]
async fn test_start_failure_stays_idle() {
    let recognition = MockRecognition::new();
    recognition.fail_next_start(RecognitionError::Unavailable {
        message: "no input device".into(),
    });
    let h = harness_with(recognition, MockInterpreter::new(), MockMutation::new(), 0);
    assert!(h.controller.start_listening().is_err());
    let snap = h.controller.snapshot();
    assert_eq!(snap.phase, Phase::Idle);
    assert_eq!(snap.error.as_deref(), Some("Microphone unavailable: no input device"));

    // Next gesture works.
    h.controller.start_listening().unwrap();
    assert_eq!(h.controller.phase(), Phase::Listening);
}

#[tokio::test]
async fn test_teardown_releases_recognition() {
    let h = harness(vec![], MockMutation::new());
    h.controller.start_listening().unwrap();
    h.controller.teardown();
    assert_eq!(h.recognition.stopped(), 1);
    assert_eq!(h.controller.phase(), Phase::Idle);
}

#[tokio::test]
async fn test_token_is_forwarded_to_interpreter() {
    let interpreter = Arc::new(MockInterpreter::with_responses(vec![Ok(
        json!({"op": "delete", "id": "1"}),
    )]));
    let deps = ControllerDeps {
        recognition: Arc::new(MockRecognition::new()),
        interpreter: interpreter.clone(),
        mutation: Arc::new(MockMutation::new()),
        auth: Arc::new(StaticToken::new("secret")),
        bus: NotificationBus::new(8),
        announcer: Arc::new(SilentAnnouncer),
    };
    let controller =
        VoiceCommandController::new(deps, &ControllerConfig::default(), RecognitionConfig::default());
    controller.set_transcript("delete event 1").unwrap();
    controller.submit().await.unwrap();
    assert_eq!(interpreter.tokens(), vec![Some("secret".to_string())]);
}

#[tokio::test]
async fn test_upload_recognition_feeds_transcript() {
    use voxcal_core::backend::{AudioClip, MockTranscriber};
    use voxcal_core::recognition::{ClipSource, UploadRecognition};

    let transcriber = Arc::new(MockTranscriber::with_responses(vec![Ok(
        "schedule lunch with Sam tomorrow at noon".to_string(),
    )]));
    let clip: ClipSource = Arc::new(|| Ok(AudioClip::new(vec![0; 16], "memo.webm", "audio/webm")));
    let deps = ControllerDeps {
        recognition: Arc::new(UploadRecognition::new(transcriber.clone(), Arc::new(NoAuth), clip)),
        interpreter: Arc::new(MockInterpreter::new()),
        mutation: Arc::new(MockMutation::new()),
        auth: Arc::new(NoAuth),
        bus: NotificationBus::new(8),
        announcer: Arc::new(SilentAnnouncer),
    };
    let controller =
        VoiceCommandController::new(deps, &ControllerConfig::default(), RecognitionConfig::default());
    let mut rx = controller.watch();

    controller.start_listening().unwrap();
    let snap = wait_for(&mut rx, |s| s.phase == Phase::Idle && !s.transcript.is_empty()).await;
    assert_eq!(snap.transcript, "schedule lunch with Sam tomorrow at noon");
    assert_eq!(transcriber.call_count(), 1);
}

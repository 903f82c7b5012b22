//! HTTP backend client tests against an in-process axum server.

use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use voxcal_core::backend::{
    AudioClip, AudioTranscriber, CalendarReader, Envelope, HttpBackend, InterpreterClient,
    MutationClient, OpVocabulary, StaticToken, WireContract,
};
use voxcal_core::config::{BackendConfig, ControllerConfig, RecognitionConfig};
use voxcal_core::error::{BackendError, InterpretError, MutationError};
use voxcal_core::recognition::MockRecognition;
use voxcal_core::speech::SilentAnnouncer;
use voxcal_core::{
    CalendarEvent, Command, ControllerDeps, Diff, EventList, Normalizer, NotificationBus, Op,
    Phase, VoiceCommandController,
};

#[derive(Debug, Clone)]
struct Recorded {
    path: String,
    body: Value,
    auth: Option<String>,
}

type Log = Arc<Mutex<Vec<Recorded>>>;

fn record(log: &Log, path: &str, headers: &HeaderMap, body: Value) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    log.lock().unwrap().push(Recorded {
        path: path.to_string(),
        body,
        auth,
    });
}

async fn interpret(State(log): State<Log>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    record(&log, "/ai/interpret", &headers, body);
    Json(json!({
        "command": {
            "action": "create_event",
            "params": {"title": "Lunch with Sam", "start": "2099-03-02T12:00:00Z", "end": "2099-03-02T13:00:00Z"}
        }
    }))
}

async fn mutate(State(log): State<Log>, headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    record(&log, "/calendar/mutate", &headers, body);
    Json(json!({
        "status": "ok",
        "diff": {"type": "create", "event": {"id": 7, "title": "Lunch with Sam", "color": "blue"}}
    }))
}

async fn list(State(log): State<Log>, headers: HeaderMap) -> Json<Value> {
    record(&log, "/calendar/list", &headers, Value::Null);
    Json(json!({
        "user": {"id": "u1"},
        "events": [
            {"id": "1", "title": "Standup", "start": "2099-03-02T09:00:00Z"},
            {"id": 2, "title": "Retro"},
            {"title": "missing id"}
        ]
    }))
}

#[derive(serde::Deserialize)]
struct HistoryQuery {
    limit: u32,
}

async fn history(Query(q): Query<HistoryQuery>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "user_id": "u1",
        "limit": q.limit,
        "total": 1,
        "items": [{"ts": "2099-03-01T10:00:00Z", "op": "create", "event": {"id": "1"}}]
    }))
}

async fn asr(State(log): State<Log>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let text = String::from_utf8_lossy(&body).into_owned();
    record(&log, "/ai/asr", &headers, json!(text));
    Json(json!({"text": " lunch with Sam at noon "}))
}

async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn happy_backend() -> (String, Log) {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/ai/interpret", post(interpret))
        .route("/calendar/mutate", post(mutate))
        .route("/calendar/list", get(list))
        .route("/calendar/history", get(history))
        .route("/ai/asr", post(asr))
        .with_state(log.clone());
    (spawn_server(app).await, log)
}

async fn failing_backend() -> String {
    let app = Router::new()
        .route(
            "/ai/interpret",
            post(|| async {
                (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({"detail": [{"msg": "field required"}]})),
                )
            }),
        )
        .route(
            "/calendar/mutate",
            post(|| async { Json(json!({"error": "event not found"})) }),
        )
        .route(
            "/calendar/list",
            get(|| async { (StatusCode::UNAUTHORIZED, Json(json!({"detail": "Not authenticated"}))) }),
        )
        .route(
            "/calendar/history",
            get(|| async { StatusCode::BAD_GATEWAY }),
        )
        .route("/ai/asr", post(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    spawn_server(app).await
}

fn backend(base_url: &str) -> HttpBackend {
    HttpBackend::new(&BackendConfig {
        base_url: base_url.to_string(),
        timezone: Some("Europe/Berlin".into()),
        request_timeout_secs: Some(5),
        ..BackendConfig::default()
    })
    .unwrap()
}

#[tokio::test]
async fn test_interpret_sends_text_tz_and_token() {
    let (url, log) = happy_backend().await;
    let client = backend(&url);

    let raw = client.interpret("lunch with Sam", Some("tok-1")).await.unwrap();
    let command = Normalizer::new().normalize(&raw, "lunch with Sam").unwrap();
    assert_eq!(command.op, Some(Op::Create));
    assert_eq!(command.title.as_deref(), Some("Lunch with Sam"));
    assert_eq!(command.start.as_deref(), Some("2099-03-02T12:00:00Z"));

    let rec = log.lock().unwrap()[0].clone();
    assert_eq!(rec.body, json!({"text": "lunch with Sam", "tz": "Europe/Berlin"}));
    assert_eq!(rec.auth.as_deref(), Some("Bearer tok-1"));
}

#[tokio::test]
async fn test_mutate_default_contract_and_diff() {
    let (url, log) = happy_backend().await;
    let client = backend(&url);
    let command = Command::new(Op::Create)
        .with_title("Lunch with Sam")
        .with_start("2099-03-02T12:00:00Z");

    let outcome = client.mutate(&command, None).await.unwrap();
    match outcome.diff {
        Some(Diff::Create { event }) => {
            assert_eq!(event.id, "7");
            assert_eq!(event.extra.get("color"), Some(&json!("blue")));
        }
        other => panic!("unexpected diff: {other:?}"),
    }

    let rec = log.lock().unwrap()[0].clone();
    assert_eq!(
        rec.body,
        json!({"op": "create", "title": "Lunch with Sam", "start": "2099-03-02T12:00:00Z"})
    );
    assert_eq!(rec.auth, None);
}

#[tokio::test]
async fn test_mutate_wrapped_contract() {
    let (url, log) = happy_backend().await;
    let client = HttpBackend::new(&BackendConfig {
        base_url: url,
        wire: WireContract {
            envelope: Envelope::Wrapped,
            op_key: "action".into(),
            vocabulary: OpVocabulary::EventSuffixed,
        },
        ..BackendConfig::default()
    })
    .unwrap();

    client
        .mutate(&Command::new(Op::Delete).with_id("9"), None)
        .await
        .unwrap();
    client.undo_last(None).await.unwrap();

    let bodies: Vec<Value> = log.lock().unwrap().iter().map(|r| r.body.clone()).collect();
    assert_eq!(
        bodies,
        vec![
            json!({"command": {"action": "delete_event", "id": "9"}}),
            json!({"command": {"op": "undo_last"}}),
        ]
    );
}

#[tokio::test]
async fn test_list_and_history_shapes() {
    let (url, log) = happy_backend().await;
    let client = backend(&url);

    let events = client.list_events(Some("tok")).await.unwrap();
    let ids: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "2"]);
    assert_eq!(log.lock().unwrap()[0].auth.as_deref(), Some("Bearer tok"));

    let page = client.history(25, None).await.unwrap();
    assert_eq!(page.limit, Some(25));
    assert_eq!(page.user_id.as_deref(), Some("u1"));
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].event, Some(CalendarEvent::new("1")));
}

#[tokio::test]
async fn test_transcribe_uploads_multipart() {
    let (url, log) = happy_backend().await;
    let client = backend(&url);
    let clip = AudioClip::new(b"RIFFdata".to_vec(), "note.wav", "audio/wav");

    let text = client.transcribe(clip, None).await.unwrap();
    assert_eq!(text, "lunch with Sam at noon");

    let rec = log.lock().unwrap()[0].clone();
    let body = rec.body.as_str().unwrap().to_string();
    assert!(body.contains("name=\"file\""));
    assert!(body.contains("filename=\"note.wav\""));
    assert!(body.contains("audio/wav"));
}

#[tokio::test]
async fn test_error_bodies_become_messages() {
    let url = failing_backend().await;
    let client = backend(&url);

    let err = client.interpret("x", None).await.unwrap_err();
    assert!(matches!(err, InterpretError::Status { status: 422, .. }));
    assert_eq!(err.to_string(), "interpret failed: 422 (field required)");

    let err = client
        .mutate(&Command::new(Op::Delete).with_id("1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, MutationError::Rejected { ref message } if message == "event not found"));

    let err = client.list_events(None).await.unwrap_err();
    assert_eq!(err.to_string(), "list failed: 401 (Not authenticated)");

    let err = client.history(10, None).await.unwrap_err();
    assert!(matches!(err, BackendError::Status { status: 502, .. }));

    let err = client
        .transcribe(AudioClip::new(vec![0], "a.webm", "audio/webm"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::Status { status: 500, .. }));
}

#[tokio::test]
async fn test_transcribe_without_text_is_invalid_response() {
    let app = Router::new()
        .route("/ai/asr", post(|| async { Json(json!({"segments": []})) }))
        .route(
            "/calendar/mutate",
            post(|Json(body): Json<Value>| async move { Json(json!({"status": "ok", "echo": body})) }),
        );
    let client = backend(&spawn_server(app).await);

    let err = client
        .transcribe(AudioClip::new(vec![0], "a.wav", "audio/wav"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, BackendError::InvalidResponse { ref endpoint, .. } if endpoint == "transcribe"));

    let outcome = client.delete_last(None).await.unwrap();
    assert_eq!(outcome.body["echo"], json!({"op": "delete_last"}));
}

#[tokio::test]
async fn test_unreachable_backend_is_transport_error() {
    // Bind then drop to get a port nobody listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = backend(&format!("http://{addr}"));
    assert!(matches!(
        client.interpret("x", None).await,
        Err(InterpretError::Transport { .. })
    ));
}

#[tokio::test]
async fn test_controller_end_to_end_over_http() {
    let (url, log) = happy_backend().await;
    let client = Arc::new(backend(&url));
    let bus = NotificationBus::local("calendar-diff");
    let list = EventList::new();
    let _sub = list
        .attach(&bus, client.clone(), Arc::new(StaticToken::new("tok")))
        .unwrap();

    let deps = ControllerDeps {
        recognition: Arc::new(MockRecognition::new()),
        interpreter: client.clone(),
        mutation: client.clone(),
        auth: Arc::new(StaticToken::new("tok")),
        bus: bus.clone(),
        announcer: Arc::new(SilentAnnouncer),
    };
    let config = ControllerConfig {
        result_linger_ms: 0,
        ..ControllerConfig::default()
    };
    let controller = VoiceCommandController::new(deps, &config, RecognitionConfig::default());

    controller.set_transcript("lunch with Sam at noon").unwrap();
    let report = controller.submit().await.unwrap();
    assert!(report.can_confirm());
    controller.confirm().await.unwrap();
    assert_eq!(controller.phase(), Phase::Idle);

    tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while list.is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(list.events()[0].id, "7");

    let paths: Vec<String> = log.lock().unwrap().iter().map(|r| r.path.clone()).collect();
    assert_eq!(paths, vec!["/ai/interpret", "/calendar/mutate"]);
}

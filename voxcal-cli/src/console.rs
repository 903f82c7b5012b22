//! Interactive voice command console.
//!
//! Each line is an utterance: it is interpreted, summarized, and applied only
//! after the user confirms. `:listen` transcribes the configured audio clip
//! or a microphone recording instead of reading typed text.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dialoguer::{Confirm, Input};
use voxcal_core::backend::{AudioClip, AuthTokenProvider, HttpBackend};
use voxcal_core::config::VoxcalConfig;
use voxcal_core::error::{ControllerError, RecognitionError};
use voxcal_core::recognition::{ClipSource, UnsupportedRecognition, UploadRecognition};
use voxcal_core::{
    ControllerDeps, EventList, GateReport, NotificationBus, Phase, RecognitionSessionFactory,
    VoiceCommandController, Zone,
};

use crate::commands::{describe_outcome, format_event};

const HELP: &str = "\
Type a calendar command, e.g. \"lunch with Sam tomorrow at noon\".
  :listen   transcribe the clip given with --audio, or record with --mic
  :events   show the calendar
  :clear    clear the transcript
  :help     show this help
  :quit     exit";

/// Where `:listen` gets its audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenFrom {
    File(PathBuf),
    Microphone,
    Nothing,
}

/// What the console should do after one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Apply,
    Discard,
}

pub async fn run(
    config: VoxcalConfig,
    text: Option<String>,
    listen_from: ListenFrom,
    yes: bool,
) -> anyhow::Result<()> {
    let backend = Arc::new(HttpBackend::new(&config.backend)?);
    let auth = config.auth.provider();
    let bus = NotificationBus::from_config(&config.bus);

    let recognition: Arc<dyn RecognitionSessionFactory> = match listen_from {
        ListenFrom::File(path) => Arc::new(UploadRecognition::new(
            backend.clone(),
            auth.clone(),
            clip_source(path),
        )),
        ListenFrom::Microphone => mic_recognition(backend.clone(), auth.clone())?,
        ListenFrom::Nothing => Arc::new(UnsupportedRecognition),
    };

    let events = EventList::new();
    let _subscription = events.attach(&bus, backend.clone(), auth.clone())?;
    events.refresh(backend.as_ref(), auth.as_ref()).await;

    let controller = VoiceCommandController::with_zone(
        ControllerDeps {
            recognition,
            interpreter: backend.clone(),
            mutation: backend.clone(),
            auth: auth.clone(),
            bus: bus.clone(),
            announcer: config.speech.announcer(),
        },
        &config.controller,
        config.recognition.clone(),
        Zone::from_name(config.backend.timezone.as_deref()),
    );

    tracing::info!(
        backend = %backend.base_url(),
        transports = ?bus.transport_names(),
        "Console started"
    );

    let result = match text {
        Some(text) => {
            controller.set_transcript(text)?;
            submit_and_confirm(&controller, yes).await
        }
        None => interactive(&controller, &events, backend.as_ref(), auth.as_ref(), yes).await,
    };
    controller.teardown();
    result
}

async fn interactive(
    controller: &VoiceCommandController,
    events: &EventList,
    backend: &HttpBackend,
    auth: &dyn AuthTokenProvider,
    yes: bool,
) -> anyhow::Result<()> {
    println!("\x1b[1mvoxcal\x1b[0m ({} events). Type :help for commands.", events.len());

    loop {
        let line: String = Input::new()
            .with_prompt("voxcal")
            .allow_empty(true)
            .interact_text()?;

        match line.trim() {
            "" => continue,
            ":q" | ":quit" | ":exit" => break,
            ":help" | ":h" => println!("{HELP}"),
            ":clear" => {
                controller.acknowledge();
                controller.clear_transcript()?;
            }
            ":events" => {
                events.refresh(backend, auth).await;
                print_events(events);
            }
            ":listen" => {
                if listen(controller).await {
                    report_failure(submit_and_confirm(controller, yes).await);
                }
            }
            utterance => {
                controller.acknowledge();
                controller.set_transcript(utterance)?;
                report_failure(submit_and_confirm(controller, yes).await);
            }
        }
    }
    Ok(())
}

/// Run one recognition session to completion. Returns whether there is a
/// transcript to submit.
async fn listen(controller: &VoiceCommandController) -> bool {
    if let Err(e) = controller.start_listening() {
        match e {
            ControllerError::Recognition(RecognitionError::Unsupported) => {
                println!("\x1b[33mListening is unavailable. Start with --audio <file> or --mic, or type the command.\x1b[0m");
            }
            other => println!("\x1b[31m{other}\x1b[0m"),
        }
        return false;
    }

    println!("\x1b[2mListening...\x1b[0m");
    let mut snapshots = controller.watch();
    let snapshot = match snapshots.wait_for(|s| s.phase != Phase::Listening).await {
        Ok(s) => s.clone(),
        Err(_) => return false,
    };

    if let Some(error) = &snapshot.error {
        println!("\x1b[31m{error}\x1b[0m");
        return false;
    }
    if snapshot.transcript.is_empty() {
        println!("Nothing heard.");
        return false;
    }
    println!("Heard: \x1b[1m{}\x1b[0m", snapshot.transcript);
    true
}

/// Interpret the current transcript and apply it once confirmed.
async fn submit_and_confirm(controller: &VoiceCommandController, yes: bool) -> anyhow::Result<()> {
    let report = controller.submit().await?;
    print_report(&report);

    if !report.can_confirm() {
        controller.cancel()?;
        return Ok(());
    }

    match decide(&report, yes)? {
        Decision::Apply => {
            let outcome = controller.confirm().await?;
            println!("\x1b[32m{}\x1b[0m", describe_outcome(&outcome));
        }
        Decision::Discard => {
            controller.cancel()?;
            println!("Discarded.");
        }
    }
    Ok(())
}

fn decide(report: &GateReport, yes: bool) -> anyhow::Result<Decision> {
    if yes {
        return Ok(Decision::Apply);
    }
    let prompt = if report.destructive {
        "Apply this change? It cannot be undone from here"
    } else {
        "Apply this change?"
    };
    let apply = Confirm::new()
        .with_prompt(prompt)
        .default(!report.destructive)
        .interact()?;
    Ok(if apply {
        Decision::Apply
    } else {
        Decision::Discard
    })
}

fn print_report(report: &GateReport) {
    println!("\x1b[1m{}\x1b[0m", report.summary);
    for warning in report.warnings() {
        println!("  \x1b[33m! {warning}\x1b[0m");
    }
    if let Some(hint) = report.incomplete_hint() {
        println!("  \x1b[31m{hint}\x1b[0m");
    }
}

fn print_events(events: &EventList) {
    let events = events.events();
    if events.is_empty() {
        println!("No events.");
    }
    for event in &events {
        println!("  {}", format_event(event));
    }
}

/// Errors from a single utterance are shown and the console keeps going.
fn report_failure(result: anyhow::Result<()>) {
    if let Err(e) = result {
        println!("\x1b[31m{e}\x1b[0m");
    }
}

#[cfg(feature = "voice")]
fn mic_recognition(
    backend: Arc<HttpBackend>,
    auth: Arc<dyn AuthTokenProvider>,
) -> anyhow::Result<Arc<dyn RecognitionSessionFactory>> {
    Ok(Arc::new(voxcal_core::mic::MicRecognition::new(backend, auth)))
}

#[cfg(not(feature = "voice"))]
fn mic_recognition(
    _backend: Arc<HttpBackend>,
    _auth: Arc<dyn AuthTokenProvider>,
) -> anyhow::Result<Arc<dyn RecognitionSessionFactory>> {
    anyhow::bail!("Microphone capture needs voxcal built with the `voice` feature")
}

/// Reads the clip from disk on every session so a re-recorded file is picked up.
fn clip_source(path: PathBuf) -> ClipSource {
    Arc::new(move || read_clip(&path))
}

fn read_clip(path: &Path) -> Result<AudioClip, RecognitionError> {
    let bytes = std::fs::read(path).map_err(|e| RecognitionError::Unavailable {
        message: format!("{}: {e}", path.display()),
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    Ok(AudioClip::new(
        bytes,
        file_name,
        AudioClip::mime_for_extension(&ext),
    ))
}

//! Spoken feedback for finished commands.
//!
//! The controller announces every result and cancels speech before the
//! microphone opens, so the assistant never talks over the user.

use std::process::{Child, Command, Stdio};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tracing::{debug, warn};

use crate::config::SpeechConfig;

/// What happened to the command that was just handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Announcement {
    Done,
    Failed,
}

/// Speaks short status phrases.
///
/// Both calls must return quickly; speech runs in the background.
pub trait Announcer: Send + Sync {
    /// Announcer name for logging.
    fn name(&self) -> &str;

    /// Speak the phrase for `announcement`, interrupting any speech in progress.
    fn announce(&self, announcement: Announcement);

    /// Stop speaking. Safe to call when nothing is playing.
    fn cancel(&self);
}

/// An announcer that says nothing.
pub struct SilentAnnouncer;

impl Announcer for SilentAnnouncer {
    fn name(&self) -> &str {
        "silent"
    }

    fn announce(&self, _announcement: Announcement) {}

    fn cancel(&self) {}
}

/// Speaks through a text-to-speech program such as `say` or `espeak`.
///
/// The phrase is passed as the last argument. Starting a new phrase or
/// cancelling kills the running program.
pub struct CommandAnnouncer {
    program: String,
    args: Vec<String>,
    done_phrase: String,
    error_phrase: String,
    current: Mutex<Option<Child>>,
    spawn_failed: AtomicBool,
}

impl CommandAnnouncer {
    pub fn new(config: &SpeechConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            done_phrase: config.done_phrase.clone(),
            error_phrase: config.error_phrase.clone(),
            current: Mutex::new(None),
            spawn_failed: AtomicBool::new(false),
        }
    }

    fn phrase(&self, announcement: Announcement) -> &str {
        match announcement {
            Announcement::Done => &self.done_phrase,
            Announcement::Failed => &self.error_phrase,
        }
    }

    fn stop_current(current: &mut Option<Child>) {
        if let Some(mut child) = current.take() {
            if let Ok(None) = child.try_wait() {
                debug!(pid = child.id(), "Interrupting speech");
                let _ = child.kill();
            }
            let _ = child.wait();
        }
    }
}

impl Announcer for CommandAnnouncer {
    fn name(&self) -> &str {
        &self.program
    }

    fn announce(&self, announcement: Announcement) {
        let phrase = self.phrase(announcement);
        if phrase.trim().is_empty() {
            return;
        }
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        Self::stop_current(&mut current);

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(phrase)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();
        match spawned {
            Ok(child) => *current = Some(child),
            Err(e) => {
                // Warn once per announcer.
                if !self.spawn_failed.swap(true, Ordering::SeqCst) {
                    warn!(program = %self.program, error = %e, "Spoken feedback unavailable");
                }
            }
        }
    }

    fn cancel(&self) {
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        Self::stop_current(&mut current);
    }
}

impl Drop for CommandAnnouncer {
    fn drop(&mut self) {
        let current = self.current.get_mut().unwrap_or_else(|p| p.into_inner());
        Self::stop_current(current);
    }
}

/// A mock announcer for testing. Records announcements and cancellations.
#[derive(Default)]
pub struct MockAnnouncer {
    announced: Mutex<Vec<Announcement>>,
    cancels: AtomicUsize,
}

impl MockAnnouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announcements made, in order.
    pub fn announced(&self) -> Vec<Announcement> {
        self.announced.lock().unwrap().clone()
    }

    /// Number of `cancel` calls.
    pub fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

impl Announcer for MockAnnouncer {
    fn name(&self) -> &str {
        "mock"
    }

    fn announce(&self, announcement: Announcement) {
        self.announced.lock().unwrap().push(announcement);
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

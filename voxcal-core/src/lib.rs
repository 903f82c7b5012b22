//! # voxcal Core
//!
//! Core library for voxcal, a voice-driven calendar front end.
//! Provides the voice command controller, command normalizer, confirmation
//! gate, recognition sources, backend clients, cross-view notification bus,
//! spoken feedback, configuration, and fundamental types.

pub mod backend;
pub mod bus;
pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod gate;
pub mod mic;
pub mod normalize;
pub mod recognition;
pub mod speech;
pub mod view;

// Re-export commonly used types at the crate root.
pub use backend::{
    AudioClip, AudioTranscriber, AuthTokenProvider, CalendarReader, HistoryItem, HistoryPage,
    HttpBackend, InterpreterClient, MutationClient, MutationOutcome, WireContract,
};
pub use bus::{BusMessage, BusPayload, BusTransport, LocalTransport, NotificationBus, SharedDirTransport, Subscription};
pub use command::{CalendarEvent, Command, Diff, Op};
pub use config::{VoxcalConfig, load_config};
pub use controller::{ControllerDeps, ControllerEvent, Phase, SessionSnapshot, VoiceCommandController};
pub use gate::{GateReport, Zone, evaluate};
pub use normalize::Normalizer;
pub use recognition::{RecognitionEvent, RecognitionSession, RecognitionSessionFactory};
pub use speech::{Announcement, Announcer};
pub use view::EventList;

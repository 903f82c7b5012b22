//! Observer-side event list kept in sync through the notification bus.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::backend::{AuthTokenProvider, CalendarReader};
use crate::bus::{NotificationBus, Subscription};
use crate::command::{CalendarEvent, Diff};
use crate::error::BusError;

/// A local copy of the calendar, newest first.
///
/// Cloning shares the list. Every change is broadcast on a watch channel so
/// a UI can redraw.
#[derive(Clone)]
pub struct EventList {
    events: Arc<Mutex<Vec<CalendarEvent>>>,
    changes: watch::Sender<u64>,
}

impl Default for EventList {
    fn default() -> Self {
        Self::new()
    }
}

impl EventList {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CalendarEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn bump(&self) {
        self.changes.send_modify(|n| *n += 1);
    }

    /// Current contents.
    pub fn events(&self) -> Vec<CalendarEvent> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Change counter; bumps whenever the list is modified.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn replace_all(&self, events: Vec<CalendarEvent>) {
        *self.lock() = events;
        self.bump();
    }

    /// Apply a diff. Applying the same diff twice has the same effect as
    /// applying it once.
    pub fn apply_diff(&self, diff: &Diff) {
        {
            let mut events = self.lock();
            apply_to(&mut events, diff);
        }
        self.bump();
    }

    /// Keep this list current from `bus`, refetching through `reader` on
    /// refresh signals.
    ///
    /// Signals are handled one at a time in arrival order. Dropping the
    /// returned [`Subscription`] detaches the list.
    pub fn attach(
        &self,
        bus: &NotificationBus,
        reader: Arc<dyn CalendarReader>,
        auth: Arc<dyn AuthTokenProvider>,
    ) -> Result<Subscription, BusError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Option<Diff>>();
        let refresh_tx = tx.clone();
        let subscription = bus.subscribe(
            move || {
                let _ = refresh_tx.send(None);
            },
            move |diff| {
                let _ = tx.send(Some(diff));
            },
        )?;

        let list = self.clone();
        tokio::spawn(async move {
            // Ends when the subscription is dropped and both senders go away.
            while let Some(signal) = rx.recv().await {
                match signal {
                    Some(diff) => {
                        debug!(id = ?diff.entity_id(), "Applying diff to event list");
                        list.apply_diff(&diff);
                    }
                    None => list.refresh(reader.as_ref(), auth.as_ref()).await,
                }
            }
        });

        Ok(subscription)
    }

    /// Refetch the full list. Failures keep the current contents.
    pub async fn refresh(&self, reader: &dyn CalendarReader, auth: &dyn AuthTokenProvider) {
        let token = auth.token().await;
        match reader.list_events(token.as_deref()).await {
            Ok(events) => {
                debug!(count = events.len(), "Event list refreshed");
                self.replace_all(events);
            }
            Err(e) => warn!(error = %e, "Event list refresh failed"),
        }
    }
}

fn apply_to(events: &mut Vec<CalendarEvent>, diff: &Diff) {
    match diff {
        Diff::Create { event } => {
            events.retain(|e| e.id != event.id);
            events.insert(0, event.clone());
        }
        Diff::Update { event } => {
            if let Some(slot) = events.iter_mut().find(|e| e.id == event.id) {
                *slot = event.clone();
            }
        }
        Diff::Delete { id } => events.retain(|e| &e.id != id),
        Diff::Noop => {}
    }
}

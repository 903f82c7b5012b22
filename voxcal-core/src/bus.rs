//! Cross-view notification bus.
//!
//! Observers of the calendar learn about changes through two signals: a
//! content-free refresh request and an incremental [`Diff`]. The bus fans each
//! message out over every configured transport. Subscribers drop message ids
//! they already delivered, so redundant transports (same process plus a shared
//! directory, say) still deliver each message once.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::command::Diff;
use crate::config::BusConfig;
use crate::error::BusError;

/// What a bus message asks observers to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusPayload {
    /// Refetch the whole list.
    CalendarDiff,
    /// Apply a diff in place.
    CalendarApplyDiff { diff: Diff },
}

/// A message on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: BusPayload,
}

impl BusMessage {
    pub fn new(payload: BusPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            ts: Utc::now(),
            payload,
        }
    }

    pub fn refresh() -> Self {
        Self::new(BusPayload::CalendarDiff)
    }

    pub fn diff(diff: Diff) -> Self {
        Self::new(BusPayload::CalendarApplyDiff { diff })
    }
}

/// A delivery channel for bus messages.
#[async_trait]
pub trait BusTransport: Send + Sync {
    /// Transport name for logging.
    fn name(&self) -> &str;

    async fn publish(&self, message: &BusMessage) -> Result<(), BusError>;

    /// Messages published after this call. The stream ends when the transport
    /// closes.
    fn subscribe(&self) -> Result<BoxStream<'static, BusMessage>, BusError>;
}

/// In-process broadcast. Clones share one channel.
#[derive(Clone)]
pub struct LocalTransport {
    name: String,
    sender: broadcast::Sender<BusMessage>,
}

impl LocalTransport {
    pub fn new(channel_name: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            name: format!("local:{}", channel_name.into()),
            sender,
        }
    }
}

#[async_trait]
impl BusTransport for LocalTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, message: &BusMessage) -> Result<(), BusError> {
        // No receivers is not a failure: nobody is watching yet.
        let receivers = self.sender.send(message.clone()).unwrap_or(0);
        debug!(transport = %self.name, receivers, "Published bus message");
        Ok(())
    }

    fn subscribe(&self) -> Result<BoxStream<'static, BusMessage>, BusError> {
        let rx = self.sender.subscribe();
        let name = self.name.clone();
        Ok(stream::unfold(rx, move |mut rx| {
            let name = name.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(message) => return Some((message, rx)),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(transport = %name, skipped, "Bus subscriber lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed())
    }
}

/// Cross-process transport over a shared directory.
///
/// Each message is one JSON file named `<channel>.<millis>.<id>.json`.
/// Subscribers poll the directory and deliver files written after they
/// subscribed. Files older than the TTL are removed by whichever subscriber
/// sees them first.
pub struct SharedDirTransport {
    name: String,
    dir: PathBuf,
    channel: String,
    poll_interval: Duration,
    ttl: Duration,
}

impl SharedDirTransport {
    pub fn new(dir: impl Into<PathBuf>, channel: impl Into<String>) -> Self {
        let dir = dir.into();
        let channel = channel.into();
        Self {
            name: format!("shared-dir:{}", dir.display()),
            dir,
            channel,
            poll_interval: Duration::from_millis(500),
            ttl: Duration::from_secs(60),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn publish_error(&self, message: impl ToString) -> BusError {
        BusError::PublishFailed {
            transport: self.name.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl BusTransport for SharedDirTransport {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, message: &BusMessage) -> Result<(), BusError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.publish_error(e))?;
        let body = serde_json::to_vec(message).map_err(|e| self.publish_error(e))?;
        let file_name = format!(
            "{}.{:013}.{}.json",
            self.channel,
            message.ts.timestamp_millis(),
            message.id
        );
        // Write then rename so pollers never read a partial file.
        let tmp = self.dir.join(format!(".{file_name}.tmp"));
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| self.publish_error(e))?;
        tokio::fs::rename(&tmp, self.dir.join(&file_name))
            .await
            .map_err(|e| self.publish_error(e))?;
        debug!(transport = %self.name, file = %file_name, "Published bus message");
        Ok(())
    }

    fn subscribe(&self) -> Result<BoxStream<'static, BusMessage>, BusError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| BusError::SubscribeFailed {
            transport: self.name.clone(),
            message: e.to_string(),
        })?;
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let poller = DirPoller {
            dir: self.dir.clone(),
            prefix: format!("{}.", self.channel),
            since: Utc::now(),
            ttl: chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX),
            seen: HashSet::new(),
            pending: VecDeque::new(),
            interval,
        };
        Ok(stream::unfold(poller, |mut poller| async move {
            loop {
                if let Some(message) = poller.pending.pop_front() {
                    return Some((message, poller));
                }
                poller.interval.tick().await;
                poller.scan().await;
            }
        })
        .boxed())
    }
}

struct DirPoller {
    dir: PathBuf,
    prefix: String,
    since: DateTime<Utc>,
    ttl: chrono::Duration,
    seen: HashSet<String>,
    pending: VecDeque<BusMessage>,
    interval: tokio::time::Interval,
}

impl DirPoller {
    /// Write time encoded in a message file name, if the file belongs to
    /// this channel.
    fn written_millis(&self, name: &str) -> Option<i64> {
        let rest = name.strip_prefix(&self.prefix)?.strip_suffix(".json")?;
        rest.split('.').next()?.parse().ok()
    }

    async fn scan(&mut self) {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Cannot read bus directory");
                return;
            }
        };

        let now = Utc::now().timestamp_millis();
        let mut present = HashSet::new();
        let mut fresh = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(written) = self.written_millis(&name) else {
                continue;
            };
            if now - written > self.ttl.num_milliseconds() {
                let _ = tokio::fs::remove_file(entry.path()).await;
                continue;
            }
            present.insert(name.clone());
            if !self.seen.insert(name.clone()) {
                continue;
            }

            let message = match tokio::fs::read(entry.path()).await {
                Ok(raw) => serde_json::from_slice::<BusMessage>(&raw),
                Err(e) => {
                    debug!(file = %name, error = %e, "Bus file vanished before read");
                    continue;
                }
            };
            match message {
                Ok(message) if message.ts >= self.since => fresh.push(message),
                Ok(_) => {}
                Err(e) => warn!(file = %name, error = %e, "Ignoring malformed bus file"),
            }
        }
        self.seen.retain(|name| present.contains(name));

        fresh.sort_by_key(|m| m.ts);
        self.pending.extend(fresh);
    }
}

/// Bounded memory of delivered message ids.
struct RecentIds {
    order: VecDeque<Uuid>,
    ids: HashSet<Uuid>,
    capacity: usize,
}

impl RecentIds {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `id`. Returns `false` if it was already recorded.
    fn insert(&mut self, id: Uuid) -> bool {
        if self.capacity == 0 {
            return true;
        }
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

type RefreshHandler = Arc<dyn Fn() + Send + Sync>;
type DiffHandler = Arc<dyn Fn(Diff) + Send + Sync>;

/// Fan-out of refresh and diff signals over a list of transports.
#[derive(Clone)]
pub struct NotificationBus {
    transports: Arc<Vec<Arc<dyn BusTransport>>>,
    dedupe_window: usize,
}

impl NotificationBus {
    /// A bus with no transports. Publishing is a no-op until one is added.
    pub fn new(dedupe_window: usize) -> Self {
        Self {
            transports: Arc::new(Vec::new()),
            dedupe_window,
        }
    }

    /// A bus over a single in-process channel.
    pub fn local(channel_name: &str) -> Self {
        Self::new(64).with_transport(Arc::new(LocalTransport::new(channel_name)))
    }

    /// Build the transports a configuration asks for.
    pub fn from_config(config: &BusConfig) -> Self {
        let mut bus = Self::new(config.dedupe_window)
            .with_transport(Arc::new(LocalTransport::new(&config.channel_name)));
        if let Some(dir) = &config.shared_dir {
            bus = bus.with_transport(Arc::new(
                SharedDirTransport::new(dir, &config.channel_name)
                    .with_poll_interval(Duration::from_millis(config.poll_interval_ms))
                    .with_ttl(Duration::from_secs(config.message_ttl_secs)),
            ));
        }
        bus
    }

    pub fn with_transport(mut self, transport: Arc<dyn BusTransport>) -> Self {
        Arc::make_mut(&mut self.transports).push(transport);
        self
    }

    pub fn transport_names(&self) -> Vec<String> {
        self.transports.iter().map(|t| t.name().to_string()).collect()
    }

    /// Ask every observer to refetch.
    pub async fn publish_refresh(&self) -> Result<(), BusError> {
        self.publish(BusMessage::refresh()).await
    }

    /// Hand every observer an incremental change.
    pub async fn publish_diff(&self, diff: Diff) -> Result<(), BusError> {
        self.publish(BusMessage::diff(diff)).await
    }

    /// Publish on every transport. Fails only when every transport failed.
    pub async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        let mut last_error = None;
        let mut delivered = 0usize;
        for transport in self.transports.iter() {
            match transport.publish(&message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(transport = %transport.name(), error = %e, "Bus publish failed");
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(()),
        }
    }

    /// Register handlers for both signals.
    ///
    /// Handlers run on a background task in delivery order. Delivery stops
    /// when the returned [`Subscription`] is dropped.
    pub fn subscribe<R, D>(&self, on_refresh: R, on_diff: D) -> Result<Subscription, BusError>
    where
        R: Fn() + Send + Sync + 'static,
        D: Fn(Diff) + Send + Sync + 'static,
    {
        let mut streams = Vec::with_capacity(self.transports.len());
        for transport in self.transports.iter() {
            streams.push(transport.subscribe()?);
        }
        let on_refresh: RefreshHandler = Arc::new(on_refresh);
        let on_diff: DiffHandler = Arc::new(on_diff);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let mut recent = RecentIds::new(self.dedupe_window);

        let handle = tokio::spawn(async move {
            let mut merged = stream::select_all(streams);
            loop {
                let message = tokio::select! {
                    biased;
                    _ = task_cancel.cancelled() => break,
                    next = merged.next() => match next {
                        Some(message) => message,
                        None => break,
                    },
                };
                if !recent.insert(message.id) {
                    debug!(id = %message.id, "Dropping duplicate bus message");
                    continue;
                }
                match message.payload {
                    BusPayload::CalendarDiff => on_refresh(),
                    BusPayload::CalendarApplyDiff { diff } => on_diff(diff),
                }
            }
        });

        Ok(Subscription {
            cancel,
            handle: Some(handle),
        })
    }
}

/// Live registration on a [`NotificationBus`]. Dropping it unsubscribes.
pub struct Subscription {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    /// Stop delivery. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

//! Notification poller.
//!
//! Re-reads buddies, their recent messages and the global note list on fixed
//! intervals, diffs ids against what it has already seen, and hands one
//! notification intent per new item to a [`Notifier`]. The first observation
//! after [`NotificationPoller::start`] only primes the known-id sets.
//!
//! Each read is capped at `known_id_history` rows per collection, so a burst
//! bigger than that is announced from its newest end only.
//!
//! Ticks never overlap: a tick that finds the previous one of its kind still
//! running reports [`TickOutcome::Skipped`]. Errors are logged and swallowed.
//! Once [`NotificationPoller::stop`] returns, nothing more is emitted, even by
//! ticks that were already in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use whispr_types::api::{Filter, Order, Select, TABLE_BUDDIES, TABLE_NOTES};
use whispr_types::events::{Notification, NotificationKind};
use whispr_types::models::{Buddy, BuddyMessage, NoteStatus, WhisprNote};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::gateway::{self, Gateway};
use crate::messaging::MessagingChannel;
use crate::notify::Notifier;

/// Longest notification body before it gets cut.
const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The poller is not running, or was stopped mid-tick.
    Stopped,
    /// The previous tick of this kind is still in flight.
    Skipped,
    /// The connectivity check says the store is unreachable.
    Offline,
    /// A fetch failed; known ids were left untouched.
    Failed,
    Completed { emitted: usize },
}

/// Recently seen ids, newest first, capped, plus the creation time of the
/// newest item ever observed. An item older than that mark is never new, even
/// after its id has fallen out of the cap and the item slides back into view.
#[derive(Debug, Clone, Default)]
pub struct IdHistory {
    ids: Vec<Uuid>,
    newest: Option<DateTime<Utc>>,
}

impl IdHistory {
    pub fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.newest
    }

    /// Not remembered and not older than the newest item seen so far.
    pub fn is_new(&self, id: &Uuid, created_at: DateTime<Utc>) -> bool {
        !self.contains(id) && self.newest.is_none_or(|mark| created_at >= mark)
    }

    /// Remember `current` ahead of older ids, keeping at most `cap`, and move
    /// the high-water mark up to the newest `created_at` among them.
    pub fn observe(&mut self, current: &[(Uuid, DateTime<Utc>)], cap: usize) {
        let mut merged: Vec<Uuid> = Vec::with_capacity(current.len() + self.ids.len());
        for id in current.iter().map(|(id, _)| id).chain(self.ids.iter()) {
            if !merged.contains(id) {
                merged.push(*id);
            }
        }
        merged.truncate(cap);
        self.ids = merged;

        if let Some(latest) = current.iter().map(|(_, at)| *at).max() {
            self.newest = Some(self.newest.map_or(latest, |mark| mark.max(latest)));
        }
    }
}

/// New items found by one tick.
#[derive(Debug, Clone, Default)]
pub struct NotificationDelta {
    pub messages: Vec<(Buddy, BuddyMessage)>,
    pub notes: Vec<WhisprNote>,
}

impl NotificationDelta {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.notes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.len() + self.notes.len()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        let messages = self.messages.iter().map(|(buddy, message)| {
            Notification::new(NotificationKind::Message, buddy.name.clone(), preview(&message.content))
                .with_metadata(json!({
                    "buddy_id": buddy.id,
                    "relationship_id": message.relationship_id,
                    "message_id": message.id,
                }))
        });
        let notes = self.notes.iter().map(|note| {
            Notification::new(
                NotificationKind::Note,
                format!("A {} whisper is waiting", note.mood),
                preview(&note.content),
            )
            .with_metadata(json!({ "note_id": note.id, "mood": note.mood }))
        });
        messages.chain(notes).collect()
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() <= PREVIEW_CHARS {
        content.to_string()
    } else {
        let cut: String = content.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", cut)
    }
}

#[derive(Debug, Default)]
struct MessageState {
    primed: bool,
    /// Keyed by relationship id.
    known: HashMap<Uuid, IdHistory>,
}

#[derive(Debug, Default)]
struct NoteState {
    primed: bool,
    known: IdHistory,
}

#[derive(Debug, Default)]
struct Reachability {
    checked_at: Option<Instant>,
    online: bool,
}

struct PollerInner<G, N> {
    gateway: Arc<G>,
    notifier: Arc<N>,
    user_id: Uuid,
    config: ClientConfig,
    messages: Mutex<MessageState>,
    notes: Mutex<NoteState>,
    reachability: Mutex<Reachability>,
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owned poller for one user. Independent instances share nothing.
pub struct NotificationPoller<G, N> {
    inner: Arc<PollerInner<G, N>>,
    running: Mutex<Option<Running>>,
}

impl<G, N> NotificationPoller<G, N>
where
    G: Gateway + 'static,
    N: Notifier + 'static,
{
    pub fn new(gateway: Arc<G>, notifier: Arc<N>, user_id: Uuid, config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                gateway,
                notifier,
                user_id,
                config,
                messages: Mutex::default(),
                notes: Mutex::default(),
                reachability: Mutex::default(),
            }),
            running: Mutex::new(None),
        }
    }

    /// Start polling. A running poller is stopped first and all known ids are
    /// forgotten, so the next observation primes again.
    pub async fn start(&self) {
        let mut running = self.running.lock().await;
        if let Some(previous) = running.take() {
            previous.token.cancel();
            previous.handle.abort();
        }

        *self.inner.messages.lock().await = MessageState::default();
        *self.inner.notes.lock().await = NoteState::default();
        *self.inner.reachability.lock().await = Reachability::default();

        let token = CancellationToken::new();
        let handle = tokio::spawn(run_loop(self.inner.clone(), token.clone()));
        *running = Some(Running { token, handle });
        info!(user_id = %self.inner.user_id, "notification poller started");
    }

    /// Stop polling. Calling it on a stopped poller does nothing.
    pub async fn stop(&self) {
        if let Some(previous) = self.running.lock().await.take() {
            previous.token.cancel();
            previous.handle.abort();
            info!(user_id = %self.inner.user_id, "notification poller stopped");
        }
    }

    pub async fn is_polling(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Run one message tick now, outside the timer.
    pub async fn tick_messages(&self) -> TickOutcome {
        match self.current_token().await {
            Some(token) => self.inner.tick_messages(&token).await,
            None => TickOutcome::Stopped,
        }
    }

    /// Run one note tick now, outside the timer.
    pub async fn tick_notes(&self) -> TickOutcome {
        match self.current_token().await {
            Some(token) => self.inner.tick_notes(&token).await,
            None => TickOutcome::Stopped,
        }
    }

    async fn current_token(&self) -> Option<CancellationToken> {
        self.running.lock().await.as_ref().map(|r| r.token.clone())
    }
}

async fn run_loop<G, N>(inner: Arc<PollerInner<G, N>>, token: CancellationToken)
where
    G: Gateway + 'static,
    N: Notifier + 'static,
{
    let mut messages = ticker(inner.config.message_poll_interval);
    let mut notes = ticker(inner.config.note_poll_interval);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = messages.tick() => {
                inner.tick_messages(&token).await;
            }
            _ = notes.tick() => {
                inner.tick_notes(&token).await;
            }
        }
    }
}

/// First tick one full period after start.
fn ticker(period: Duration) -> tokio::time::Interval {
    let period = period.max(Duration::from_millis(10));
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

impl<G: Gateway, N: Notifier> PollerInner<G, N> {
    async fn tick_messages(&self, token: &CancellationToken) -> TickOutcome {
        if token.is_cancelled() {
            return TickOutcome::Stopped;
        }
        let Ok(mut state) = self.messages.try_lock() else {
            debug!("message tick still running, skipping");
            return TickOutcome::Skipped;
        };
        if !self.online().await {
            debug!("store unreachable, skipping message tick");
            return TickOutcome::Offline;
        }

        let observed = match self.fetch_conversations().await {
            Ok(observed) => observed,
            Err(e) => {
                self.note_failure(&e).await;
                warn!(user_id = %self.user_id, "message poll failed: {}", e);
                return TickOutcome::Failed;
            }
        };

        let delta = message_delta(&state, &observed, self.user_id);
        let cap = self.config.known_id_history;
        for (buddy, messages) in &observed {
            let ids: Vec<(Uuid, DateTime<Utc>)> = messages.iter().map(|m| (m.id, m.created_at)).collect();
            state
                .known
                .entry(buddy.relationship_id)
                .or_default()
                .observe(&ids, cap);
        }
        state.primed = true;

        self.emit(token, &delta)
    }

    async fn tick_notes(&self, token: &CancellationToken) -> TickOutcome {
        if token.is_cancelled() {
            return TickOutcome::Stopped;
        }
        let Ok(mut state) = self.notes.try_lock() else {
            debug!("note tick still running, skipping");
            return TickOutcome::Skipped;
        };
        if !self.online().await {
            debug!("store unreachable, skipping note tick");
            return TickOutcome::Offline;
        }

        let select = Select::new()
            .filter(Filter::eq("status", NoteStatus::Active))
            .filter(Filter::eq("is_active", true))
            .filter(Filter::neq("sender_id", self.user_id))
            .order(Order::desc("created_at"))
            .limit(self.config.known_id_history);
        let current: Vec<WhisprNote> = match gateway::fetch(&*self.gateway, TABLE_NOTES, &select).await {
            Ok(notes) => notes,
            Err(e) => {
                self.note_failure(&e).await;
                warn!(user_id = %self.user_id, "note poll failed: {}", e);
                return TickOutcome::Failed;
            }
        };

        let ids: Vec<(Uuid, DateTime<Utc>)> = current.iter().map(|n| (n.id, n.created_at)).collect();
        let mut delta = NotificationDelta::default();
        if state.primed {
            delta.notes = current
                .into_iter()
                .rev()
                .filter(|n| state.known.is_new(&n.id, n.created_at) && n.sender_id != self.user_id)
                .collect();
        }
        state.known.observe(&ids, self.config.known_id_history);
        state.primed = true;

        self.emit(token, &delta)
    }

    /// Buddies of the user with their most recent messages.
    async fn fetch_conversations(&self) -> Result<Vec<(Buddy, Vec<BuddyMessage>)>> {
        let select = Select::new().filter(Filter::eq("user_id", self.user_id));
        let buddies: Vec<Buddy> = gateway::fetch(&*self.gateway, TABLE_BUDDIES, &select).await?;

        let channel = MessagingChannel::new(self.gateway.clone());
        let limit = Some(self.config.known_id_history);
        let fetched = join_all(
            buddies
                .iter()
                .map(|b| channel.conversation(b.relationship_id, limit)),
        )
        .await;

        buddies
            .into_iter()
            .zip(fetched)
            .map(|(buddy, messages)| messages.map(|m| (buddy, m)))
            .collect()
    }

    fn emit(&self, token: &CancellationToken, delta: &NotificationDelta) -> TickOutcome {
        let mut emitted = 0;
        for notification in delta.notifications() {
            if token.is_cancelled() {
                return TickOutcome::Stopped;
            }
            self.notifier.notify(notification);
            emitted += 1;
        }
        if emitted > 0 {
            debug!(user_id = %self.user_id, emitted, "notifications emitted");
        }
        TickOutcome::Completed { emitted }
    }

    /// Cached reachability, rechecked at most once per check interval.
    async fn online(&self) -> bool {
        let mut reachability = self.reachability.lock().await;
        let fresh = reachability
            .checked_at
            .is_some_and(|at| at.elapsed() < self.config.connectivity_check_interval);
        if fresh {
            return reachability.online;
        }

        let online = self.gateway.health().await.is_ok();
        if online != reachability.online && reachability.checked_at.is_some() {
            info!(online, "store reachability changed");
        }
        reachability.online = online;
        reachability.checked_at = Some(Instant::now());
        online
    }

    /// A transport failure mid-tick counts as a failed check.
    async fn note_failure(&self, err: &ClientError) {
        if err.is_retryable() {
            let mut reachability = self.reachability.lock().await;
            reachability.online = false;
            reachability.checked_at = Some(Instant::now());
        }
    }
}

/// New messages from the other side, oldest first. Nothing before priming.
fn message_delta(
    state: &MessageState,
    observed: &[(Buddy, Vec<BuddyMessage>)],
    user_id: Uuid,
) -> NotificationDelta {
    let mut delta = NotificationDelta::default();
    if !state.primed {
        return delta;
    }

    for (buddy, messages) in observed {
        let known = state.known.get(&buddy.relationship_id);
        for message in messages.iter().rev() {
            let fresh = known.is_none_or(|k| k.is_new(&message.id, message.created_at));
            if fresh && message.sender_id != user_id && !message.is_read {
                delta.messages.push((buddy.clone(), message.clone()));
            }
        }
    }
    delta
}

//! Session tracker.
//!
//! Holds the engine's view of which channels are live and whether their
//! current session has been announced. Readers get immutable snapshots;
//! the reconciliation loop is the only writer and mutates through a
//! [`TrackerTransition`], which is exclusive for its lifetime.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use super::source::StreamSnapshot;
use crate::database::models::LiveSessionDbModel;
use crate::database::time::{datetime_to_ms, ms_to_datetime, now_ms};
use crate::domain::ChannelName;

/// Per-channel state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelState {
    /// Never successfully checked.
    Unknown,
    Offline,
    /// Live, fan-out not yet completed.
    LiveUnnotified,
    LiveNotified,
}

impl ChannelState {
    pub fn is_live(self) -> bool {
        matches!(self, Self::LiveUnnotified | Self::LiveNotified)
    }
}

/// A tracked live session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveSession {
    pub snapshot: StreamSnapshot,
    pub detected_at: DateTime<Utc>,
    pub notified: bool,
}

impl LiveSession {
    fn from_db_model(row: LiveSessionDbModel) -> Option<Self> {
        let channel = match ChannelName::new(&row.streamer_name) {
            Ok(channel) => channel,
            Err(e) => {
                warn!(streamer = %row.streamer_name, error = %e, "Skipping invalid stored live session");
                return None;
            }
        };
        Some(Self {
            snapshot: StreamSnapshot {
                channel,
                display_name: row.user_name,
                title: row.title,
                category: row.category,
                viewer_count: row.viewer_count.max(0) as u64,
                started_at: ms_to_datetime(row.started_at),
                thumbnail_url: row.thumbnail_url,
                profile_image_url: row.profile_image_url,
            },
            detected_at: ms_to_datetime(row.updated_at),
            // Restored sessions were announced before the restart.
            notified: true,
        })
    }

    fn to_db_model(&self, updated_at: i64) -> LiveSessionDbModel {
        let s = &self.snapshot;
        LiveSessionDbModel {
            streamer_name: s.channel.as_str().to_string(),
            user_name: s.display_name.clone(),
            started_at: datetime_to_ms(s.started_at),
            title: s.title.clone(),
            category: s.category.clone(),
            viewer_count: i64::try_from(s.viewer_count).unwrap_or(i64::MAX),
            thumbnail_url: s.thumbnail_url.clone(),
            profile_image_url: s.profile_image_url.clone(),
            notified: self.notified,
            updated_at,
        }
    }
}

/// Immutable view of the tracker as of the last committed tick.
#[derive(Debug, Clone, Default)]
pub struct TrackerSnapshot {
    live: HashMap<ChannelName, LiveSession>,
    offline: HashSet<ChannelName>,
}

impl TrackerSnapshot {
    pub fn state_of(&self, channel: &ChannelName) -> ChannelState {
        match self.live.get(channel) {
            Some(session) if session.notified => ChannelState::LiveNotified,
            Some(_) => ChannelState::LiveUnnotified,
            None if self.offline.contains(channel) => ChannelState::Offline,
            None => ChannelState::Unknown,
        }
    }

    pub fn is_live(&self, channel: &ChannelName) -> bool {
        self.live.contains_key(channel)
    }

    pub fn session(&self, channel: &ChannelName) -> Option<&LiveSession> {
        self.live.get(channel)
    }

    pub fn known_live_set(&self) -> BTreeSet<ChannelName> {
        self.live.keys().cloned().collect()
    }

    pub fn live_sessions(&self) -> impl Iterator<Item = &LiveSession> {
        self.live.values()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Channels in any state other than [`ChannelState::Unknown`].
    pub fn tracked_count(&self) -> usize {
        self.live.len() + self.offline.len()
    }

    /// Rows for the `live_sessions` table, ordered by channel.
    pub fn to_db_models(&self) -> Vec<LiveSessionDbModel> {
        let updated_at = now_ms();
        let mut rows: Vec<_> = self
            .live
            .values()
            .map(|s| s.to_db_model(updated_at))
            .collect();
        rows.sort_by(|a, b| a.streamer_name.cmp(&b.streamer_name));
        rows
    }
}

/// Process-owned live state with single-writer access.
pub struct SessionTracker {
    current: RwLock<Arc<TrackerSnapshot>>,
    writer: Arc<Mutex<()>>,
    persist_pending: AtomicBool,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(TrackerSnapshot::default())),
            writer: Arc::new(Mutex::new(())),
            persist_pending: AtomicBool::new(false),
        }
    }

    /// Snapshot of the most recently committed state.
    pub fn snapshot(&self) -> Arc<TrackerSnapshot> {
        self.current.read().clone()
    }

    pub fn is_live(&self, channel: &ChannelName) -> bool {
        self.current.read().is_live(channel)
    }

    pub fn state_of(&self, channel: &ChannelName) -> ChannelState {
        self.current.read().state_of(channel)
    }

    pub fn known_live_set(&self) -> BTreeSet<ChannelName> {
        self.current.read().known_live_set()
    }

    /// Start a transition, or `None` if another one is in progress.
    pub fn try_begin(&self) -> Option<TrackerTransition<'_>> {
        let guard = self.writer.clone().try_lock_owned().ok()?;
        Some(self.transition(guard))
    }

    /// Start a transition, waiting for any in-progress one to finish.
    pub async fn begin(&self) -> TrackerTransition<'_> {
        let guard = self.writer.clone().lock_owned().await;
        self.transition(guard)
    }

    fn transition(&self, guard: OwnedMutexGuard<()>) -> TrackerTransition<'_> {
        TrackerTransition {
            tracker: self,
            _guard: guard,
            next: (*self.snapshot()).clone(),
            dirty: false,
        }
    }

    /// Load persisted sessions as already notified. Returns how many were restored.
    pub async fn restore(&self, rows: Vec<LiveSessionDbModel>) -> usize {
        let mut transition = self.begin().await;
        let mut restored = 0;
        for session in rows.into_iter().filter_map(LiveSession::from_db_model) {
            transition.next.offline.remove(&session.snapshot.channel);
            transition
                .next
                .live
                .insert(session.snapshot.channel.clone(), session);
            restored += 1;
        }
        transition.commit();
        // The rows came from the store; nothing to write back.
        self.mark_persisted();
        restored
    }

    /// Whether committed state has not yet reached the store.
    pub fn persist_pending(&self) -> bool {
        self.persist_pending.load(Ordering::Acquire)
    }

    pub fn mark_persisted(&self) {
        self.persist_pending.store(false, Ordering::Release);
    }
}

impl Default for SessionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive, uncommitted changes to the tracker.
///
/// Dropping a transition without [`commit`](Self::commit) discards its changes.
pub struct TrackerTransition<'a> {
    tracker: &'a SessionTracker,
    _guard: OwnedMutexGuard<()>,
    next: TrackerSnapshot,
    dirty: bool,
}

impl TrackerTransition<'_> {
    pub fn state_of(&self, channel: &ChannelName) -> ChannelState {
        self.next.state_of(channel)
    }

    pub fn is_live(&self, channel: &ChannelName) -> bool {
        self.next.is_live(channel)
    }

    pub fn session(&self, channel: &ChannelName) -> Option<&LiveSession> {
        self.next.session(channel)
    }

    pub fn known_live_set(&self) -> BTreeSet<ChannelName> {
        self.next.known_live_set()
    }

    /// Record `snapshot` as live. Returns `true` if this starts a new session.
    ///
    /// For an existing session only the metadata is refreshed.
    pub fn mark_live(&mut self, snapshot: StreamSnapshot) -> bool {
        match self.next.live.get_mut(&snapshot.channel) {
            Some(session) => {
                session.snapshot = snapshot;
                false
            }
            None => {
                self.next.offline.remove(&snapshot.channel);
                debug!(channel = %snapshot.channel, "New live session");
                self.next.live.insert(
                    snapshot.channel.clone(),
                    LiveSession {
                        snapshot,
                        detected_at: Utc::now(),
                        notified: false,
                    },
                );
                self.dirty = true;
                true
            }
        }
    }

    /// Returns `false` if the channel has no live session.
    pub fn mark_notified(&mut self, channel: &ChannelName) -> bool {
        match self.next.live.get_mut(channel) {
            Some(session) if !session.notified => {
                session.notified = true;
                self.dirty = true;
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Record `channel` as offline, returning the session that ended, if any.
    pub fn mark_offline(&mut self, channel: &ChannelName) -> Option<LiveSession> {
        self.next.offline.insert(channel.clone());
        let ended = self.next.live.remove(channel);
        if ended.is_some() {
            self.dirty = true;
        }
        ended
    }

    /// Forget every channel not in `channels`. Returns the retired live channels.
    pub fn retain_channels(&mut self, channels: &BTreeSet<ChannelName>) -> Vec<ChannelName> {
        self.next.offline.retain(|c| channels.contains(c));

        let retired: Vec<ChannelName> = self
            .next
            .live
            .keys()
            .filter(|c| !channels.contains(*c))
            .cloned()
            .collect();
        for channel in &retired {
            self.next.live.remove(channel);
        }
        if !retired.is_empty() {
            self.dirty = true;
        }
        retired
    }

    /// Publish the changes to readers.
    ///
    /// Returns `true` if the store needs to be updated, either because this
    /// transition changed the live set or an earlier write failed. The
    /// transition stays exclusive until dropped, so the caller can persist
    /// before releasing it.
    pub fn commit(&mut self) -> bool {
        *self.tracker.current.write() = Arc::new(self.next.clone());
        if self.dirty {
            self.tracker.persist_pending.store(true, Ordering::Release);
            self.dirty = false;
        }
        self.tracker.persist_pending()
    }

    /// Rows to persist for the committed state.
    pub fn to_db_models(&self) -> Vec<LiveSessionDbModel> {
        self.next.to_db_models()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(name: &str) -> StreamSnapshot {
        StreamSnapshot {
            channel: ChannelName::from_trusted(name),
            display_name: name.to_uppercase(),
            title: "Speedrun".to_string(),
            category: Some("Celeste".to_string()),
            viewer_count: 42,
            started_at: Utc::now(),
            thumbnail_url: None,
            profile_image_url: None,
        }
    }

    #[test]
    fn test_state_machine() {
        let tracker = SessionTracker::new();
        let alpha = ChannelName::from_trusted("alpha");
        assert_eq!(tracker.state_of(&alpha), ChannelState::Unknown);

        let mut tx = tracker.try_begin().unwrap();
        tx.mark_offline(&alpha);
        assert_eq!(tx.state_of(&alpha), ChannelState::Offline);

        assert!(tx.mark_live(snapshot("alpha")));
        assert_eq!(tx.state_of(&alpha), ChannelState::LiveUnnotified);
        assert!(!tx.mark_live(snapshot("alpha")));

        assert!(tx.mark_notified(&alpha));
        assert_eq!(tx.state_of(&alpha), ChannelState::LiveNotified);

        assert!(tx.mark_offline(&alpha).is_some());
        assert_eq!(tx.state_of(&alpha), ChannelState::Offline);
    }

    #[test]
    fn test_readers_see_only_committed_state() {
        let tracker = SessionTracker::new();
        let alpha = ChannelName::from_trusted("alpha");

        let mut tx = tracker.try_begin().unwrap();
        tx.mark_live(snapshot("alpha"));
        assert!(!tracker.is_live(&alpha));

        assert!(tx.commit());
        assert!(tracker.is_live(&alpha));
        assert!(tracker.persist_pending());
    }

    #[test]
    fn test_dropped_transition_discards_changes() {
        let tracker = SessionTracker::new();
        {
            let mut tx = tracker.try_begin().unwrap();
            tx.mark_live(snapshot("alpha"));
        }
        assert!(tracker.known_live_set().is_empty());
        assert!(!tracker.persist_pending());
    }

    #[test]
    fn test_single_writer() {
        let tracker = SessionTracker::new();
        let tx = tracker.try_begin().unwrap();
        assert!(tracker.try_begin().is_none());
        drop(tx);
        assert!(tracker.try_begin().is_some());
    }

    #[test]
    fn test_metadata_refresh_is_not_dirty() {
        let tracker = SessionTracker::new();
        let mut tx = tracker.try_begin().unwrap();
        tx.mark_live(snapshot("alpha"));
        tx.commit();
        tracker.mark_persisted();
        drop(tx);

        let mut tx = tracker.try_begin().unwrap();
        let mut updated = snapshot("alpha");
        updated.viewer_count = 1000;
        tx.mark_live(updated);
        assert!(!tx.commit());
        drop(tx);

        let snap = tracker.snapshot();
        let session = snap.session(&ChannelName::from_trusted("alpha")).unwrap();
        assert_eq!(session.snapshot.viewer_count, 1000);
    }

    #[test]
    fn test_retain_channels() {
        let tracker = SessionTracker::new();
        let mut tx = tracker.try_begin().unwrap();
        tx.mark_live(snapshot("alpha"));
        tx.mark_live(snapshot("bravo"));
        tx.mark_offline(&ChannelName::from_trusted("charlie"));

        let keep: BTreeSet<_> = [ChannelName::from_trusted("alpha")].into_iter().collect();
        let retired = tx.retain_channels(&keep);

        assert_eq!(retired, vec![ChannelName::from_trusted("bravo")]);
        assert_eq!(
            tx.state_of(&ChannelName::from_trusted("charlie")),
            ChannelState::Unknown
        );
        assert!(tx.is_live(&ChannelName::from_trusted("alpha")));
    }

    #[tokio::test]
    async fn test_restore_marks_notified() {
        let source = SessionTracker::new();
        let mut tx = source.try_begin().unwrap();
        tx.mark_live(snapshot("alpha"));
        let rows = tx.to_db_models();
        drop(tx);
        assert!(!rows[0].notified);

        let tracker = SessionTracker::new();
        let mut invalid = rows[0].clone();
        invalid.streamer_name = "no".to_string();
        let restored = tracker.restore(vec![rows[0].clone(), invalid]).await;

        assert_eq!(restored, 1);
        let alpha = ChannelName::from_trusted("alpha");
        assert_eq!(tracker.state_of(&alpha), ChannelState::LiveNotified);
        assert!(!tracker.persist_pending());
        assert_eq!(
            tracker.snapshot().session(&alpha).unwrap().snapshot.title,
            "Speedrun"
        );
    }
}

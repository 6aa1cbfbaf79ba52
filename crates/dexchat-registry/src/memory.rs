//! In-process membership store.
//!
//! Backs tests and single-process deployments. All state sits behind one
//! lock, so the conditional insert is atomic; plain check-then-insert through
//! [`MembershipStore::find`]/[`count`](MembershipStore::count)/
//! [`insert`](MembershipStore::insert) still races like any remote store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use dexchat_core::{RoomId, Uid};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::errors::{RegistryError, Result};
use crate::store::{
    ConditionalInsert, MembershipChange, MembershipEvent, MembershipEventStream, MembershipRecord,
    MembershipStore, RoomDirectory, RoomInfo, RoomRecord,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct State {
    memberships: BTreeMap<(RoomId, Uid), MembershipRecord>,
    rooms: HashMap<RoomId, RoomRecord>,
}

impl State {
    fn count(&self, room: &RoomId) -> u64 {
        self.memberships.keys().filter(|(r, _)| r == room).count() as u64
    }

    /// Upsert a row; returns whether it replaced an existing one.
    fn insert(&mut self, record: MembershipRecord) -> bool {
        let now = Utc::now();
        let existed = self
            .memberships
            .insert((record.room_id.clone(), record.uid), record.clone())
            .is_some();
        let room = self
            .rooms
            .entry(record.room_id.clone())
            .or_insert_with(|| RoomRecord::created(record.room_id, now));
        if !existed {
            room.total_members_ever += 1;
        }
        existed
    }
}

/// Membership store held in memory.
pub struct MemoryMembershipStore {
    state: Mutex<State>,
    events: broadcast::Sender<MembershipEvent>,
    conditional_insert: bool,
    subscriptions_available: AtomicBool,
}

impl Default for MemoryMembershipStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMembershipStore {
    /// Empty store with conditional insert enabled.
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(State::default()),
            events,
            conditional_insert: true,
            subscriptions_available: AtomicBool::new(true),
        }
    }

    /// Store that only offers the non-atomic primitives.
    #[must_use]
    pub fn without_conditional_insert() -> Self {
        Self {
            conditional_insert: false,
            ..Self::new()
        }
    }

    /// Make subsequent subscriptions fail, as when the realtime channel is down.
    pub fn set_subscriptions_available(&self, available: bool) {
        self.subscriptions_available
            .store(available, Ordering::SeqCst);
    }

    /// Rows currently held for `room`.
    pub fn members(&self, room: &RoomId) -> Vec<MembershipRecord> {
        self.state
            .lock()
            .memberships
            .iter()
            .filter(|((r, _), _)| r == room)
            .map(|(_, rec)| rec.clone())
            .collect()
    }

    fn notify(&self, room: &RoomId, change: MembershipChange) {
        let _ = self.events.send(MembershipEvent {
            room_id: room.clone(),
            change,
        });
    }
}

#[async_trait]
impl MembershipStore for MemoryMembershipStore {
    async fn find(&self, room: &RoomId, uid: Uid) -> Result<Option<MembershipRecord>> {
        Ok(self
            .state
            .lock()
            .memberships
            .get(&(room.clone(), uid))
            .cloned())
    }

    async fn count(&self, room: &RoomId) -> Result<u64> {
        Ok(self.state.lock().count(room))
    }

    async fn insert(&self, record: MembershipRecord) -> Result<()> {
        let room = record.room_id.clone();
        let uid = record.uid;
        let existed = self.state.lock().insert(record);
        let change = if existed {
            MembershipChange::Updated(uid)
        } else {
            MembershipChange::Inserted(uid)
        };
        self.notify(&room, change);
        Ok(())
    }

    async fn delete(&self, room: &RoomId, uid: Uid) -> Result<bool> {
        let removed = self
            .state
            .lock()
            .memberships
            .remove(&(room.clone(), uid))
            .is_some();
        if removed {
            self.notify(room, MembershipChange::Deleted(uid));
        }
        Ok(removed)
    }

    async fn subscribe(&self, room: &RoomId) -> Result<MembershipEventStream> {
        if !self.subscriptions_available.load(Ordering::SeqCst) {
            return Err(RegistryError::Subscription(format!(
                "realtime channel unavailable for {}",
                room.topic()
            )));
        }
        Ok(room_stream(self.events.subscribe(), room.clone()))
    }

    fn supports_conditional_insert(&self) -> bool {
        self.conditional_insert
    }

    async fn insert_if_below(
        &self,
        record: MembershipRecord,
        capacity: u64,
    ) -> Result<ConditionalInsert> {
        if !self.conditional_insert {
            return Err(RegistryError::Unsupported("conditional insert"));
        }
        let room = record.room_id.clone();
        let uid = record.uid;
        let outcome = {
            let mut state = self.state.lock();
            let count = state.count(&room);
            if state.memberships.contains_key(&(room.clone(), uid)) {
                ConditionalInsert::AlreadyMember { count }
            } else if count >= capacity {
                ConditionalInsert::Full { count }
            } else {
                let _ = state.insert(record);
                ConditionalInsert::Inserted { count: count + 1 }
            }
        };
        if matches!(outcome, ConditionalInsert::Inserted { .. }) {
            self.notify(&room, MembershipChange::Inserted(uid));
        }
        Ok(outcome)
    }
}

#[async_trait]
impl RoomDirectory for MemoryMembershipStore {
    async fn room_info(&self, room: &RoomId) -> Result<RoomInfo> {
        let now = Utc::now();
        let mut state = self.state.lock();
        let record = state
            .rooms
            .entry(room.clone())
            .or_insert_with(|| RoomRecord::created(room.clone(), now));
        record.last_activity = now;
        let record = record.clone();
        let active: Vec<MembershipRecord> = state
            .memberships
            .iter()
            .filter(|((r, _), _)| r == room)
            .map(|(_, rec)| rec.clone())
            .collect();
        Ok(RoomInfo {
            room: record,
            active_count: active.len() as u64,
            active_memberships: active,
        })
    }
}

/// Filter a store-wide broadcast down to one room.
///
/// A lagged receiver yields [`MembershipChange::Lagged`] so watchers re-read
/// rather than trusting a stale count.
pub(crate) fn room_stream(
    rx: broadcast::Receiver<MembershipEvent>,
    room: RoomId,
) -> MembershipEventStream {
    BroadcastStream::new(rx)
        .filter_map(move |item| {
            let room = room.clone();
            async move {
                match item {
                    Ok(event) if event.room_id == room => Some(event),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(_)) => Some(MembershipEvent {
                        room_id: room,
                        change: MembershipChange::Lagged,
                    }),
                }
            }
        })
        .boxed()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use dexchat_core::Tier;

    fn room(s: &str) -> RoomId {
        RoomId::parse(s).unwrap()
    }

    fn uid(n: u32) -> Uid {
        Uid::new(n).unwrap()
    }

    #[tokio::test]
    async fn insert_find_count_delete() {
        let store = MemoryMembershipStore::new();
        let r = room("abc");
        store
            .insert(MembershipRecord::now(r.clone(), uid(1), Tier::Basic))
            .await
            .unwrap();
        assert!(store.find(&r, uid(1)).await.unwrap().is_some());
        assert_eq!(store.count(&r).await.unwrap(), 1);
        assert_eq!(store.count(&room("other")).await.unwrap(), 0);
        assert!(store.delete(&r, uid(1)).await.unwrap());
        assert!(!store.delete(&r, uid(1)).await.unwrap());
        assert_eq!(store.count(&r).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn subscription_is_room_scoped() {
        let store = MemoryMembershipStore::new();
        let mut events = store.subscribe(&room("abc")).await.unwrap();
        store
            .insert(MembershipRecord::now(room("zzz"), uid(9), Tier::Free))
            .await
            .unwrap();
        store
            .insert(MembershipRecord::now(room("abc"), uid(2), Tier::Free))
            .await
            .unwrap();
        let event = events.next().await.unwrap();
        assert_eq!(event.room_id, room("abc"));
        assert_eq!(event.change, MembershipChange::Inserted(uid(2)));
    }

    #[tokio::test]
    async fn conditional_insert_respects_capacity() {
        let store = MemoryMembershipStore::new();
        let r = room("abc");
        let first = store
            .insert_if_below(MembershipRecord::now(r.clone(), uid(1), Tier::Basic), 1)
            .await
            .unwrap();
        assert_eq!(first, ConditionalInsert::Inserted { count: 1 });
        let again = store
            .insert_if_below(MembershipRecord::now(r.clone(), uid(1), Tier::Basic), 1)
            .await
            .unwrap();
        assert_eq!(again, ConditionalInsert::AlreadyMember { count: 1 });
        let full = store
            .insert_if_below(MembershipRecord::now(r.clone(), uid(2), Tier::Basic), 1)
            .await
            .unwrap();
        assert_eq!(full, ConditionalInsert::Full { count: 1 });
    }

    #[tokio::test]
    async fn conditional_insert_can_be_disabled() {
        let store = MemoryMembershipStore::without_conditional_insert();
        assert!(!store.supports_conditional_insert());
        let err = store
            .insert_if_below(MembershipRecord::now(room("abc"), uid(1), Tier::Basic), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Unsupported(_)));
    }

    #[tokio::test]
    async fn subscription_failure_when_unavailable() {
        let store = MemoryMembershipStore::new();
        store.set_subscriptions_available(false);
        assert!(store.subscribe(&room("abc")).await.is_err());
    }

    #[tokio::test]
    async fn room_info_creates_and_touches() {
        let store = MemoryMembershipStore::new();
        let r = room("abc");
        let first = store.room_info(&r).await.unwrap();
        assert_eq!(first.active_count, 0);
        assert_eq!(first.room.total_members_ever, 0);

        store
            .insert(MembershipRecord::now(r.clone(), uid(1), Tier::Basic))
            .await
            .unwrap();
        let _ = store.delete(&r, uid(1)).await.unwrap();
        store
            .insert(MembershipRecord::now(r.clone(), uid(2), Tier::Basic))
            .await
            .unwrap();

        let second = store.room_info(&r).await.unwrap();
        assert_eq!(second.room.created_at, first.room.created_at);
        assert!(second.room.last_activity >= first.room.last_activity);
        assert_eq!(second.room.total_members_ever, 2);
        assert_eq!(second.active_count, 1);
        assert_eq!(second.active_memberships[0].uid, uid(2));
    }
}

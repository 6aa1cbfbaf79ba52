//! Concurrent admissions against a store whose calls yield between steps.
//!
//! Check-then-insert may overshoot capacity by at most `racers - 1`; the
//! atomic conditional insert never overshoots.

use std::sync::Arc;

use async_trait::async_trait;
use dexchat_core::{RoomId, Tier, Uid};
use dexchat_registry::{
    CapacityGate, ConditionalInsert, MembershipEventStream, MembershipRecord, MembershipStore,
    MemoryMembershipStore, Result,
};
use dexchat_settings::CapacitySettings;

/// Store that yields to the scheduler before every call.
struct YieldingStore {
    inner: MemoryMembershipStore,
}

#[async_trait]
impl MembershipStore for YieldingStore {
    async fn find(&self, room: &RoomId, uid: Uid) -> Result<Option<MembershipRecord>> {
        tokio::task::yield_now().await;
        self.inner.find(room, uid).await
    }

    async fn count(&self, room: &RoomId) -> Result<u64> {
        tokio::task::yield_now().await;
        self.inner.count(room).await
    }

    async fn insert(&self, record: MembershipRecord) -> Result<()> {
        tokio::task::yield_now().await;
        self.inner.insert(record).await
    }

    async fn delete(&self, room: &RoomId, uid: Uid) -> Result<bool> {
        self.inner.delete(room, uid).await
    }

    async fn subscribe(&self, room: &RoomId) -> Result<MembershipEventStream> {
        self.inner.subscribe(room).await
    }

    fn supports_conditional_insert(&self) -> bool {
        self.inner.supports_conditional_insert()
    }

    async fn insert_if_below(
        &self,
        record: MembershipRecord,
        capacity: u64,
    ) -> Result<ConditionalInsert> {
        tokio::task::yield_now().await;
        self.inner.insert_if_below(record, capacity).await
    }
}

const CAPACITY: u64 = 100;
const RACERS: u32 = 5;

async fn race(inner: MemoryMembershipStore) -> u64 {
    let store = Arc::new(YieldingStore { inner });
    let gate = Arc::new(CapacityGate::new(store.clone(), CapacitySettings::default()));
    let room = RoomId::parse("ABC123").unwrap();

    for n in 0..(CAPACITY as u32 - 1) {
        let _ = gate
            .admit(&room, Uid::new(n).unwrap(), Tier::Basic)
            .await
            .unwrap();
    }

    let handles: Vec<_> = (0..RACERS)
        .map(|i| {
            let gate = gate.clone();
            let room = room.clone();
            tokio::spawn(async move {
                gate.admit(&room, Uid::new(10_000 + i).unwrap(), Tier::Basic)
                    .await
                    .unwrap()
            })
        })
        .collect();
    for h in handles {
        let _ = h.await.unwrap();
    }

    store.count(&room).await.unwrap()
}

#[tokio::test]
async fn check_then_insert_overshoot_is_bounded() {
    let count = race(MemoryMembershipStore::without_conditional_insert()).await;
    assert!(count >= CAPACITY);
    assert!(count <= CAPACITY + u64::from(RACERS) - 1, "count {count}");
}

#[tokio::test]
async fn atomic_admission_never_overshoots() {
    let count = race(MemoryMembershipStore::new()).await;
    assert_eq!(count, CAPACITY);
}

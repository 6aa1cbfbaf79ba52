//! Capacity gate.
//!
//! Decides whether a participant may enter a room, given the tier's capacity
//! and the room's current headcount in the membership store.
//!
//! Admission order:
//! 1. An existing row for `(room, uid)` admits without writing again.
//! 2. Otherwise the room is counted; at or above capacity is a rejection.
//! 3. Otherwise a row is inserted.
//!
//! Steps 1-3 are separate store calls, so concurrent admissions can overshoot
//! capacity by up to `racers - 1`. When the store offers an atomic
//! conditional insert and the policy prefers it, the three steps collapse
//! into that single write and no overshoot is possible.
//!
//! Capacity reached is a value ([`Admission::Rejected`]), not an error.

use std::sync::Arc;

use dexchat_core::{RoomId, Tier, Uid};
use dexchat_settings::CapacitySettings;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::errors::Result;
use crate::store::{ConditionalInsert, MembershipRecord, MembershipStore};

/// Why an admission was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The room is at capacity for the participant's tier.
    CapacityReached,
}

/// Result of [`CapacityGate::admit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Admission {
    /// The participant holds a membership row.
    Admitted {
        /// Members in the room, including this one.
        active_count: u64,
        /// Whether this call wrote the row.
        inserted: bool,
    },
    /// The room is full; nothing was written.
    Rejected {
        /// Why.
        reason: RejectReason,
        /// Members in the room.
        active_count: u64,
        /// Capacity that was applied.
        capacity: u64,
    },
}

impl Admission {
    /// Whether the participant got in.
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }

    /// Headcount observed during the decision.
    #[must_use]
    pub fn active_count(&self) -> u64 {
        match self {
            Self::Admitted { active_count, .. } | Self::Rejected { active_count, .. } => {
                *active_count
            }
        }
    }
}

/// Occupancy snapshot shown to the participant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Occupancy {
    /// Members in the room.
    pub active_count: u64,
    /// Capacity shown for the participant's tier.
    pub capacity: u64,
    /// Capacity admission enforces for the participant's tier. Differs from
    /// `capacity` for the free tier unless the free cap is enforced.
    pub limit: u64,
    /// Whether the participant's own row is present.
    pub is_member: bool,
    /// Whether the count may be outdated because notifications stopped.
    pub stale: bool,
}

impl Occupancy {
    /// Whether admission would turn a newcomer of this tier away.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.active_count >= self.limit
    }
}

/// Admits, refreshes and releases room memberships.
pub struct CapacityGate {
    store: Arc<dyn MembershipStore>,
    policy: CapacitySettings,
}

impl CapacityGate {
    /// Gate over `store` with the given capacity policy.
    pub fn new(store: Arc<dyn MembershipStore>, policy: CapacitySettings) -> Self {
        Self { store, policy }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn MembershipStore> {
        &self.store
    }

    /// Admission capacity for `tier`.
    #[must_use]
    pub fn capacity_for(&self, tier: Tier) -> u64 {
        self.policy.capacity_for(tier)
    }

    /// Capacity shown to a participant of `tier`.
    #[must_use]
    pub fn display_capacity_for(&self, tier: Tier) -> u64 {
        self.policy.display_capacity_for(tier)
    }

    /// Admit `uid` into `room`, or reject it when the room is full.
    #[instrument(skip(self), fields(room = %room, uid = %uid, tier = %tier))]
    pub async fn admit(&self, room: &RoomId, uid: Uid, tier: Tier) -> Result<Admission> {
        let capacity = self.capacity_for(tier);
        let admission = if self.policy.prefer_atomic_admission
            && self.store.supports_conditional_insert()
        {
            self.admit_atomic(room, uid, tier, capacity).await?
        } else {
            self.admit_check_then_insert(room, uid, tier, capacity)
                .await?
        };

        let outcome = match admission {
            Admission::Admitted { inserted: true, .. } => "admitted",
            Admission::Admitted { inserted: false, .. } => "already_member",
            Admission::Rejected { .. } => "rejected",
        };
        metrics::counter!("dexchat_admissions_total", "outcome" => outcome).increment(1);
        info!(outcome, active_count = admission.active_count(), capacity, "admission decided");
        Ok(admission)
    }

    async fn admit_atomic(
        &self,
        room: &RoomId,
        uid: Uid,
        tier: Tier,
        capacity: u64,
    ) -> Result<Admission> {
        let record = MembershipRecord::now(room.clone(), uid, tier);
        Ok(match self.store.insert_if_below(record, capacity).await? {
            ConditionalInsert::Inserted { count } => Admission::Admitted {
                active_count: count,
                inserted: true,
            },
            ConditionalInsert::AlreadyMember { count } => Admission::Admitted {
                active_count: count,
                inserted: false,
            },
            ConditionalInsert::Full { count } => Admission::Rejected {
                reason: RejectReason::CapacityReached,
                active_count: count,
                capacity,
            },
        })
    }

    async fn admit_check_then_insert(
        &self,
        room: &RoomId,
        uid: Uid,
        tier: Tier,
        capacity: u64,
    ) -> Result<Admission> {
        if self.store.find(room, uid).await?.is_some() {
            debug!("membership already present");
            let active_count = self.store.count(room).await?;
            return Ok(Admission::Admitted {
                active_count,
                inserted: false,
            });
        }

        let active_count = self.store.count(room).await?;
        if active_count >= capacity {
            return Ok(Admission::Rejected {
                reason: RejectReason::CapacityReached,
                active_count,
                capacity,
            });
        }

        self.store
            .insert(MembershipRecord::now(room.clone(), uid, tier))
            .await?;
        Ok(Admission::Admitted {
            active_count: active_count + 1,
            inserted: true,
        })
    }

    /// Re-read occupancy without writing.
    pub async fn refresh(&self, room: &RoomId, uid: Uid, tier: Tier) -> Result<Occupancy> {
        let is_member = self.store.find(room, uid).await?.is_some();
        let active_count = self.store.count(room).await?;
        Ok(Occupancy {
            active_count,
            capacity: self.display_capacity_for(tier),
            limit: self.capacity_for(tier),
            is_member,
            stale: false,
        })
    }

    /// Remove the membership row for `(room, uid)`.
    #[instrument(skip(self), fields(room = %room, uid = %uid))]
    pub async fn release(&self, room: &RoomId, uid: Uid) -> Result<bool> {
        let removed = self.store.delete(room, uid).await?;
        debug!(removed, "membership released");
        Ok(removed)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryMembershipStore;
    use assert_matches::assert_matches;

    fn room(s: &str) -> RoomId {
        RoomId::parse(s).unwrap()
    }

    fn uid(n: u32) -> Uid {
        Uid::new(n).unwrap()
    }

    fn check_then_insert_gate() -> (CapacityGate, Arc<MemoryMembershipStore>) {
        let store = Arc::new(MemoryMembershipStore::without_conditional_insert());
        (CapacityGate::new(store.clone(), CapacitySettings::default()), store)
    }

    fn atomic_gate() -> (CapacityGate, Arc<MemoryMembershipStore>) {
        let store = Arc::new(MemoryMembershipStore::new());
        (CapacityGate::new(store.clone(), CapacitySettings::default()), store)
    }

    // -- admit --

    #[tokio::test]
    async fn hundred_and_first_basic_member_is_rejected() {
        for (gate, store) in [check_then_insert_gate(), atomic_gate()] {
            let r = room("ABC123");
            for n in 0..100 {
                let a = gate.admit(&r, uid(n), Tier::Basic).await.unwrap();
                assert!(a.is_admitted());
            }
            let a = gate.admit(&r, uid(1000), Tier::Basic).await.unwrap();
            assert_eq!(
                a,
                Admission::Rejected {
                    reason: RejectReason::CapacityReached,
                    active_count: 100,
                    capacity: 100,
                }
            );
            assert_eq!(store.count(&r).await.unwrap(), 100);
            assert!(store.find(&r, uid(1000)).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn admit_is_idempotent() {
        for (gate, store) in [check_then_insert_gate(), atomic_gate()] {
            let r = room("abc");
            let first = gate.admit(&r, uid(7), Tier::Basic).await.unwrap();
            assert_matches!(first, Admission::Admitted { inserted: true, active_count: 1 });
            let second = gate.admit(&r, uid(7), Tier::Basic).await.unwrap();
            assert_matches!(second, Admission::Admitted { inserted: false, active_count: 1 });
            assert_eq!(store.members(&r).len(), 1);
        }
    }

    #[tokio::test]
    async fn existing_member_admitted_even_when_full() {
        let (gate, _) = check_then_insert_gate();
        let r = room("abc");
        for n in 0..100 {
            let _ = gate.admit(&r, uid(n), Tier::Basic).await.unwrap();
        }
        let a = gate.admit(&r, uid(42), Tier::Basic).await.unwrap();
        assert!(a.is_admitted());
    }

    #[tokio::test]
    async fn premium_capacity_applies_above_basic() {
        let store = Arc::new(MemoryMembershipStore::new());
        let policy = CapacitySettings {
            basic: 2,
            premium: 3,
            ..CapacitySettings::default()
        };
        let gate = CapacityGate::new(store, policy);
        let r = room("abc");
        for n in 0..2 {
            let _ = gate.admit(&r, uid(n), Tier::Basic).await.unwrap();
        }
        assert!(!gate.admit(&r, uid(10), Tier::Basic).await.unwrap().is_admitted());
        assert!(gate.admit(&r, uid(11), Tier::Premium).await.unwrap().is_admitted());
        assert!(!gate.admit(&r, uid(12), Tier::Premium).await.unwrap().is_admitted());
    }

    #[tokio::test]
    async fn free_cap_only_enforced_when_configured() {
        let r = room("abc");
        let lenient = CapacityGate::new(Arc::new(MemoryMembershipStore::new()), CapacitySettings::default());
        for n in 0..11 {
            assert!(lenient.admit(&r, uid(n), Tier::Free).await.unwrap().is_admitted());
        }

        let strict = CapacityGate::new(
            Arc::new(MemoryMembershipStore::new()),
            CapacitySettings {
                enforce_free_cap: true,
                ..CapacitySettings::default()
            },
        );
        for n in 0..10 {
            assert!(strict.admit(&r, uid(n), Tier::Free).await.unwrap().is_admitted());
        }
        assert!(!strict.admit(&r, uid(10), Tier::Free).await.unwrap().is_admitted());
    }

    // -- refresh / release --

    #[tokio::test]
    async fn refresh_never_inserts() {
        let (gate, store) = check_then_insert_gate();
        let r = room("abc");
        let occ = gate.refresh(&r, uid(1), Tier::Free).await.unwrap();
        assert_eq!(occ.active_count, 0);
        assert!(!occ.is_member);
        assert_eq!(occ.capacity, 10);
        assert_eq!(store.count(&r).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn free_display_cap_does_not_mark_room_full() {
        let (gate, store) = atomic_gate();
        let r = room("abc");
        for n in 1..=10 {
            store
                .insert(MembershipRecord::now(r.clone(), uid(n), Tier::Basic))
                .await
                .unwrap();
        }
        let occ = gate.refresh(&r, uid(50), Tier::Free).await.unwrap();
        assert_eq!(occ.capacity, 10);
        assert!(!occ.is_full());
        assert!(gate.admit(&r, uid(50), Tier::Free).await.unwrap().is_admitted());

        let strict = CapacityGate::new(
            store.clone(),
            CapacitySettings {
                enforce_free_cap: true,
                ..CapacitySettings::default()
            },
        );
        assert!(strict.refresh(&r, uid(51), Tier::Free).await.unwrap().is_full());
    }

    #[tokio::test]
    async fn release_removes_row() {
        let (gate, store) = atomic_gate();
        let r = room("abc");
        let _ = gate.admit(&r, uid(1), Tier::Basic).await.unwrap();
        assert!(gate.release(&r, uid(1)).await.unwrap());
        assert_eq!(store.count(&r).await.unwrap(), 0);
        assert!(!gate.release(&r, uid(1)).await.unwrap());
    }
}

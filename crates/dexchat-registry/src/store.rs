//! Membership store abstraction.
//!
//! A [`MembershipStore`] is the shared record of who is in which room. It
//! offers point lookup, count-by-room, insert and delete, plus a room-scoped
//! change stream. Stores that can do "insert if count below N" in one write
//! advertise it through [`MembershipStore::supports_conditional_insert`].
//!
//! [`RoomDirectory`] is the read side for room metadata: creation time, last
//! activity and the cumulative number of members ever admitted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dexchat_core::{RoomId, Tier, Uid};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::errors::{RegistryError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────────────────────────

/// One participant's presence in a room.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipRecord {
    /// Room the participant is in.
    pub room_id: RoomId,
    /// Participant identity.
    #[serde(alias = "wallet")]
    pub uid: Uid,
    /// Participant tier at admission.
    pub tier: Tier,
    /// Admission time.
    pub joined_at: DateTime<Utc>,
}

impl MembershipRecord {
    /// New record stamped with the current time.
    #[must_use]
    pub fn now(room_id: RoomId, uid: Uid, tier: Tier) -> Self {
        Self {
            room_id,
            uid,
            tier,
            joined_at: Utc::now(),
        }
    }
}

/// Room metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    /// Room identifier.
    pub room_id: RoomId,
    /// First time the room was queried.
    pub created_at: DateTime<Utc>,
    /// Last time the room was queried.
    pub last_activity: DateTime<Utc>,
    /// Members ever admitted.
    #[serde(alias = "totalUsersEver")]
    pub total_members_ever: u64,
}

impl RoomRecord {
    /// A freshly created room.
    #[must_use]
    pub fn created(room_id: RoomId, at: DateTime<Utc>) -> Self {
        Self {
            room_id,
            created_at: at,
            last_activity: at,
            total_members_ever: 0,
        }
    }
}

/// Room metadata with its current members.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    /// Room metadata.
    pub room: RoomRecord,
    /// Current members.
    #[serde(alias = "activeUsers", default)]
    pub active_memberships: Vec<MembershipRecord>,
    /// Current member count.
    pub active_count: u64,
}

/// Kind of change to a room's membership.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MembershipChange {
    /// A member was admitted.
    Inserted(Uid),
    /// A membership row was modified.
    Updated(Uid),
    /// A member left.
    Deleted(Uid),
    /// The subscriber fell behind and missed changes.
    Lagged,
}

/// Room-scoped change notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MembershipEvent {
    /// Room that changed.
    pub room_id: RoomId,
    /// What changed.
    pub change: MembershipChange,
}

/// Outcome of an atomic conditional insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConditionalInsert {
    /// Row inserted; `count` includes it.
    Inserted {
        /// Members after the insert.
        count: u64,
    },
    /// Row already present; nothing written.
    AlreadyMember {
        /// Current members.
        count: u64,
    },
    /// Room at or above capacity; nothing written.
    Full {
        /// Current members.
        count: u64,
    },
}

/// Stream of change notifications for one room.
pub type MembershipEventStream = BoxStream<'static, MembershipEvent>;

// ─────────────────────────────────────────────────────────────────────────────
// Traits
// ─────────────────────────────────────────────────────────────────────────────

/// Shared membership records with change notifications.
#[async_trait]
pub trait MembershipStore: Send + Sync {
    /// Membership row for `(room, uid)`, if any.
    async fn find(&self, room: &RoomId, uid: Uid) -> Result<Option<MembershipRecord>>;

    /// Number of members in `room`.
    async fn count(&self, room: &RoomId) -> Result<u64>;

    /// Insert a membership row.
    async fn insert(&self, record: MembershipRecord) -> Result<()>;

    /// Delete the row for `(room, uid)`. Returns whether a row was removed.
    async fn delete(&self, room: &RoomId, uid: Uid) -> Result<bool>;

    /// Subscribe to insert/update/delete notifications for `room`.
    async fn subscribe(&self, room: &RoomId) -> Result<MembershipEventStream>;

    /// Whether [`insert_if_below`](Self::insert_if_below) is available.
    fn supports_conditional_insert(&self) -> bool {
        false
    }

    /// Insert `record` only if the room has fewer than `capacity` members,
    /// as a single atomic write.
    async fn insert_if_below(
        &self,
        record: MembershipRecord,
        capacity: u64,
    ) -> Result<ConditionalInsert> {
        let _ = (record, capacity);
        Err(RegistryError::Unsupported("conditional insert"))
    }
}

/// Room metadata lookup.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Room info, creating the room on first query and touching its last
    /// activity on every query.
    async fn room_info(&self, room: &RoomId) -> Result<RoomInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_record_wire_shape() {
        let rec = MembershipRecord::now(RoomId::parse("abc").unwrap(), Uid::new(5).unwrap(), Tier::Basic);
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["roomId"], "abc");
        assert_eq!(json["uid"], 5);
        assert_eq!(json["tier"], "basic");
        assert!(json["joinedAt"].is_string());
    }

    #[test]
    fn room_info_accepts_service_aliases() {
        let json = serde_json::json!({
            "room": {
                "roomId": "abc",
                "createdAt": "2026-01-01T00:00:00Z",
                "lastActivity": "2026-01-02T00:00:00Z",
                "totalUsersEver": 3
            },
            "activeUsers": [],
            "activeCount": 0
        });
        let info: RoomInfo = serde_json::from_value(json).unwrap();
        assert_eq!(info.room.total_members_ever, 3);
        assert!(info.active_memberships.is_empty());
    }
}

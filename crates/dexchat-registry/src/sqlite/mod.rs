//! `SQLite`-backed membership store and room directory.
//!
//! Queries run on the blocking pool through [`tokio::task::spawn_blocking`].
//! Change notifications are published on an in-process broadcast after each
//! successful write, so subscribers only see changes made through this store
//! instance.
//!
//! The conditional insert runs in an `IMMEDIATE` transaction: the write lock
//! is taken before the count, so two admissions cannot both pass the check.

pub mod connection;
pub mod migrations;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dexchat_core::{RoomId, Tier, Uid};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tokio::sync::broadcast;

pub use connection::{ConnectionConfig, ConnectionPool, new_file, new_in_memory};

use crate::errors::{RegistryError, Result};
use crate::memory::room_stream;
use crate::store::{
    ConditionalInsert, MembershipChange, MembershipEvent, MembershipEventStream, MembershipRecord,
    MembershipStore, RoomDirectory, RoomInfo, RoomRecord,
};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Membership store over an `SQLite` pool.
pub struct SqliteMembershipStore {
    pool: ConnectionPool,
    events: broadcast::Sender<MembershipEvent>,
}

impl SqliteMembershipStore {
    /// Wrap a pool, running migrations first.
    pub fn new(pool: ConnectionPool) -> Result<Self> {
        let mut conn = pool.get()?;
        let _ = migrations::run_migrations(&mut conn)?;
        drop(conn);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self { pool, events })
    }

    /// Store backed by a private in-memory database.
    pub fn in_memory() -> Result<Self> {
        Self::new(new_in_memory()?)
    }

    /// Store backed by the database file at `path`.
    pub fn open(path: &str) -> Result<Self> {
        Self::new(new_file(path, &ConnectionConfig::default())?)
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| RegistryError::Internal(format!("blocking task failed: {e}")))?
    }

    fn notify(&self, room: &RoomId, change: MembershipChange) {
        let _ = self.events.send(MembershipEvent {
            room_id: room.clone(),
            change,
        });
    }
}

#[async_trait]
impl MembershipStore for SqliteMembershipStore {
    async fn find(&self, room: &RoomId, uid: Uid) -> Result<Option<MembershipRecord>> {
        let room = room.clone();
        self.with_conn(move |conn| {
            let record = conn
                .query_row(
                    "SELECT room_id, uid, tier, joined_at FROM memberships
                     WHERE room_id = ?1 AND uid = ?2 LIMIT 1",
                    params![room.as_str(), uid.get()],
                    map_membership,
                )
                .optional()?;
            Ok(record)
        })
        .await
    }

    async fn count(&self, room: &RoomId) -> Result<u64> {
        let room = room.clone();
        self.with_conn(move |conn| count_members(conn, &room)).await
    }

    async fn insert(&self, record: MembershipRecord) -> Result<()> {
        let room = record.room_id.clone();
        let uid = record.uid;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            insert_membership(&tx, &record)?;
            tx.commit()?;
            Ok(())
        })
        .await?;
        self.notify(&room, MembershipChange::Inserted(uid));
        Ok(())
    }

    async fn delete(&self, room: &RoomId, uid: Uid) -> Result<bool> {
        let key = room.clone();
        let removed = self
            .with_conn(move |conn| {
                let n = conn.execute(
                    "DELETE FROM memberships WHERE room_id = ?1 AND uid = ?2",
                    params![key.as_str(), uid.get()],
                )?;
                Ok(n > 0)
            })
            .await?;
        if removed {
            self.notify(room, MembershipChange::Deleted(uid));
        }
        Ok(removed)
    }

    async fn subscribe(&self, room: &RoomId) -> Result<MembershipEventStream> {
        Ok(room_stream(self.events.subscribe(), room.clone()))
    }

    fn supports_conditional_insert(&self) -> bool {
        true
    }

    async fn insert_if_below(
        &self,
        record: MembershipRecord,
        capacity: u64,
    ) -> Result<ConditionalInsert> {
        let room = record.room_id.clone();
        let uid = record.uid;
        let outcome = self
            .with_conn(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let exists: bool = tx.query_row(
                    "SELECT EXISTS(SELECT 1 FROM memberships WHERE room_id = ?1 AND uid = ?2)",
                    params![record.room_id.as_str(), record.uid.get()],
                    |row| row.get(0),
                )?;
                let count = count_members(&tx, &record.room_id)?;
                let outcome = if exists {
                    ConditionalInsert::AlreadyMember { count }
                } else if count >= capacity {
                    ConditionalInsert::Full { count }
                } else {
                    insert_membership(&tx, &record)?;
                    ConditionalInsert::Inserted { count: count + 1 }
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await?;
        if matches!(outcome, ConditionalInsert::Inserted { .. }) {
            self.notify(&room, MembershipChange::Inserted(uid));
        }
        Ok(outcome)
    }
}

#[async_trait]
impl RoomDirectory for SqliteMembershipStore {
    async fn room_info(&self, room: &RoomId) -> Result<RoomInfo> {
        let room = room.clone();
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            let tx = conn.transaction()?;
            let _ = tx.execute(
                "INSERT INTO rooms (room_id, created_at, last_activity, total_members_ever)
                 VALUES (?1, ?2, ?2, 0)
                 ON CONFLICT(room_id) DO UPDATE SET last_activity = excluded.last_activity",
                params![room.as_str(), now],
            )?;
            let record = tx.query_row(
                "SELECT room_id, created_at, last_activity, total_members_ever
                 FROM rooms WHERE room_id = ?1",
                [room.as_str()],
                map_room,
            )?;
            let active = {
                let mut stmt = tx.prepare(
                    "SELECT room_id, uid, tier, joined_at FROM memberships
                     WHERE room_id = ?1 ORDER BY joined_at",
                )?;
                let rows = stmt.query_map([room.as_str()], map_membership)?;
                rows.collect::<rusqlite::Result<Vec<_>>>()?
            };
            tx.commit()?;
            Ok(RoomInfo {
                room: record,
                active_count: active.len() as u64,
                active_memberships: active,
            })
        })
        .await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

fn count_members(conn: &Connection, room: &RoomId) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM memberships WHERE room_id = ?1",
        [room.as_str()],
        |row| row.get(0),
    )?;
    Ok(n.max(0) as u64)
}

fn insert_membership(conn: &Connection, record: &MembershipRecord) -> Result<()> {
    let _ = conn.execute(
        "INSERT INTO memberships (room_id, uid, tier, joined_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            record.room_id.as_str(),
            record.uid.get(),
            record.tier.as_str(),
            record.joined_at.to_rfc3339()
        ],
    )?;
    let _ = conn.execute(
        "INSERT INTO rooms (room_id, created_at, last_activity, total_members_ever)
         VALUES (?1, ?2, ?2, 1)
         ON CONFLICT(room_id) DO UPDATE SET total_members_ever = total_members_ever + 1",
        params![record.room_id.as_str(), record.joined_at.to_rfc3339()],
    )?;
    Ok(())
}

fn conversion_error(idx: usize, err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

fn column_room(row: &Row<'_>, idx: usize) -> rusqlite::Result<RoomId> {
    RoomId::parse(row.get::<_, String>(idx)?).map_err(|e| conversion_error(idx, e))
}

fn column_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn map_membership(row: &Row<'_>) -> rusqlite::Result<MembershipRecord> {
    let raw_uid: u32 = row.get(1)?;
    let uid = Uid::new(raw_uid).ok_or_else(|| conversion_error(1, format!("uid out of range: {raw_uid}")))?;
    let tier: Tier = row
        .get::<_, String>(2)?
        .parse()
        .map_err(|e: String| conversion_error(2, e))?;
    Ok(MembershipRecord {
        room_id: column_room(row, 0)?,
        uid,
        tier,
        joined_at: column_time(row, 3)?,
    })
}

fn map_room(row: &Row<'_>) -> rusqlite::Result<RoomRecord> {
    let total: i64 = row.get(3)?;
    Ok(RoomRecord {
        room_id: column_room(row, 0)?,
        created_at: column_time(row, 1)?,
        last_activity: column_time(row, 2)?,
        total_members_ever: total.max(0) as u64,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn room(s: &str) -> RoomId {
        RoomId::parse(s).unwrap()
    }

    fn uid(n: u32) -> Uid {
        Uid::new(n).unwrap()
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let store = SqliteMembershipStore::in_memory().unwrap();
        let r = room("abc");
        store
            .insert(MembershipRecord::now(r.clone(), uid(11), Tier::Premium))
            .await
            .unwrap();
        let found = store.find(&r, uid(11)).await.unwrap().unwrap();
        assert_eq!(found.tier, Tier::Premium);
        assert_eq!(store.count(&r).await.unwrap(), 1);
        assert!(store.delete(&r, uid(11)).await.unwrap());
        assert!(store.find(&r, uid(11)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conditional_insert_blocks_at_capacity() {
        let store = SqliteMembershipStore::in_memory().unwrap();
        let r = room("abc");
        for n in 0..3 {
            let out = store
                .insert_if_below(MembershipRecord::now(r.clone(), uid(n), Tier::Basic), 3)
                .await
                .unwrap();
            assert_eq!(out, ConditionalInsert::Inserted { count: u64::from(n) + 1 });
        }
        let full = store
            .insert_if_below(MembershipRecord::now(r.clone(), uid(99), Tier::Basic), 3)
            .await
            .unwrap();
        assert_eq!(full, ConditionalInsert::Full { count: 3 });
        let again = store
            .insert_if_below(MembershipRecord::now(r.clone(), uid(0), Tier::Basic), 3)
            .await
            .unwrap();
        assert_eq!(again, ConditionalInsert::AlreadyMember { count: 3 });
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rooms.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteMembershipStore::open(path).unwrap();
            store
                .insert(MembershipRecord::now(room("abc"), uid(1), Tier::Basic))
                .await
                .unwrap();
        }
        let store = SqliteMembershipStore::open(path).unwrap();
        assert_eq!(store.count(&room("abc")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn room_info_tracks_lifetime_members() {
        let store = SqliteMembershipStore::in_memory().unwrap();
        let r = room("abc");
        let fresh = store.room_info(&r).await.unwrap();
        assert_eq!(fresh.room.total_members_ever, 0);
        assert_eq!(fresh.active_count, 0);

        store
            .insert(MembershipRecord::now(r.clone(), uid(1), Tier::Basic))
            .await
            .unwrap();
        store
            .insert(MembershipRecord::now(r.clone(), uid(2), Tier::Free))
            .await
            .unwrap();
        let _ = store.delete(&r, uid(1)).await.unwrap();

        let info = store.room_info(&r).await.unwrap();
        assert_eq!(info.room.created_at, fresh.room.created_at);
        assert_eq!(info.room.total_members_ever, 2);
        assert_eq!(info.active_count, 1);
        assert_eq!(info.active_memberships[0].uid, uid(2));
    }

    #[tokio::test]
    async fn writes_publish_room_events() {
        let store = SqliteMembershipStore::in_memory().unwrap();
        let r = room("abc");
        let mut events = store.subscribe(&r).await.unwrap();
        store
            .insert(MembershipRecord::now(r.clone(), uid(5), Tier::Basic))
            .await
            .unwrap();
        let _ = store.delete(&r, uid(5)).await.unwrap();
        assert_eq!(events.next().await.unwrap().change, MembershipChange::Inserted(uid(5)));
        assert_eq!(events.next().await.unwrap().change, MembershipChange::Deleted(uid(5)));
    }
}

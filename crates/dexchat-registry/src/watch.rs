//! Live occupancy for one room.
//!
//! [`RoomWatch`] subscribes to the room's change stream and re-runs the
//! gate's read path on every notification, publishing the result on a
//! `watch` channel. If the subscription cannot be established, or the stream
//! ends, the last count stays visible and is marked stale.

use std::sync::Arc;

use dexchat_core::{RoomId, Tier, Uid};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gate::{CapacityGate, Occupancy};

/// Background occupancy refresher. Stops when dropped.
pub struct RoomWatch {
    occupancy: watch::Receiver<Occupancy>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl RoomWatch {
    /// Start watching `room` on behalf of `uid`.
    pub async fn start(gate: Arc<CapacityGate>, room: RoomId, uid: Uid, tier: Tier) -> Self {
        let initial = match gate.refresh(&room, uid, tier).await {
            Ok(occ) => occ,
            Err(e) => {
                warn!(room = %room, error = %e, "initial occupancy read failed");
                Occupancy {
                    capacity: gate.display_capacity_for(tier),
                    limit: gate.capacity_for(tier),
                    stale: true,
                    ..Occupancy::default()
                }
            }
        };
        let (tx, rx) = watch::channel(initial);
        let cancel = CancellationToken::new();

        let task = match gate.store().subscribe(&room).await {
            Ok(mut events) => {
                let cancel = cancel.clone();
                Some(tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            next = events.next() => {
                                let Some(event) = next else {
                                    warn!(room = %room, "change stream ended, occupancy is stale");
                                    tx.send_modify(|o| o.stale = true);
                                    break;
                                };
                                debug!(room = %room, change = ?event.change, "membership changed");
                                match gate.refresh(&room, uid, tier).await {
                                    Ok(occ) => {
                                        let _ = tx.send_replace(occ);
                                    }
                                    Err(e) => {
                                        warn!(room = %room, error = %e, "occupancy refresh failed");
                                        tx.send_modify(|o| o.stale = true);
                                    }
                                }
                            }
                        }
                    }
                }))
            }
            Err(e) => {
                warn!(room = %room, error = %e, "room subscription failed, occupancy will not update");
                tx.send_modify(|o| o.stale = true);
                None
            }
        };

        Self {
            occupancy: rx,
            cancel,
            task,
        }
    }

    /// Latest occupancy.
    #[must_use]
    pub fn occupancy(&self) -> Occupancy {
        *self.occupancy.borrow()
    }

    /// Receiver that is notified on every occupancy change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Occupancy> {
        self.occupancy.clone()
    }

    /// Whether live updates are flowing.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop watching and wait for the refresher to exit.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RoomWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

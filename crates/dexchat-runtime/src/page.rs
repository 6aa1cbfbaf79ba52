//! Page lifecycle.
//!
//! On an eligible page [`PageRuntime::activate`] derives the identity, asks
//! the capacity gate for admission, starts the session actor, hands it to the
//! control endpoint, joins when auto-join is on, and starts watching the
//! room's occupancy. [`PageRuntime::teardown`] undoes all of it within the
//! unload bound; [`PageRuntime::navigate`] does both when the URL changes.

use std::time::Duration;

use dexchat_core::{RoomId, Tier, Uid, room_from_page_url};
use dexchat_registry::{Admission, Occupancy, RoomWatch};
use dexchat_session::{SessionConfig, SessionController, SessionHandle};
use tracing::{info, instrument, warn};

use crate::errors::Result;
use crate::services::PageServices;

/// Reason reported by the endpoint on ineligible pages.
pub const REASON_INELIGIBLE: &str = "voice chat is not available on this page";
/// Reason reported by the endpoint after teardown.
pub const REASON_TORN_DOWN: &str = "voice session ended";

/// Result of activating a page.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Activation {
    /// The page has no room.
    Ineligible,
    /// The room is full; nothing was written.
    Rejected {
        /// Room.
        room: RoomId,
        /// Members in the room.
        active_count: u64,
        /// Applied capacity.
        capacity: u64,
    },
    /// A session is running.
    Active {
        /// Room.
        room: RoomId,
        /// Local identity.
        uid: Uid,
        /// Whether auto-join connected the session.
        joined: bool,
    },
}

struct ActiveSession {
    room: RoomId,
    uid: Uid,
    session: SessionHandle,
    watch: RoomWatch,
}

/// Voice-chat lifecycle of one browsing context.
pub struct PageRuntime {
    services: PageServices,
    url: Option<String>,
    current: Option<ActiveSession>,
}

impl PageRuntime {
    /// Idle runtime.
    pub fn new(services: PageServices) -> Self {
        Self {
            services,
            url: None,
            current: None,
        }
    }

    /// Activate for `url`, replacing any current session.
    #[instrument(skip_all, fields(url = %url, tier = %tier))]
    pub async fn activate(
        &mut self,
        url: &str,
        secret: Option<&str>,
        tier: Tier,
    ) -> Result<Activation> {
        self.teardown().await;
        self.url = Some(url.to_owned());
        let endpoint = &self.services.endpoint;

        let Some(room) = room_from_page_url(url) else {
            let _ = endpoint.detach(REASON_INELIGIBLE);
            return Ok(Activation::Ineligible);
        };

        endpoint.begin_initialization();
        let uid = self.services.identity.derive_identity(secret);

        let admission = match self.services.gate.admit(&room, uid, tier).await {
            Ok(admission) => admission,
            Err(err) => {
                warn!(room = %room, error = %err, "admission failed");
                let _ = endpoint.detach(format!("could not reach the room registry: {err}"));
                return Err(err.into());
            }
        };
        if let Admission::Rejected {
            active_count,
            capacity,
            ..
        } = admission
        {
            info!(room = %room, active_count, capacity, "room full");
            let _ = endpoint.detach(format!("room is full ({active_count}/{capacity})"));
            return Ok(Activation::Rejected {
                room,
                active_count,
                capacity,
            });
        }

        let config = SessionConfig::new(room.clone(), uid, tier)
            .with_settings(&self.services.settings.session);
        let session = SessionHandle::spawn(SessionController::new(
            self.services.transport.clone(),
            self.services.tokens.clone(),
            config,
        ));
        endpoint.clear_replay().await;
        endpoint.attach(session.clone());

        let watch = RoomWatch::start(self.services.gate.clone(), room.clone(), uid, tier).await;

        let joined = if self.services.settings.session.auto_join {
            match session.join().await {
                Ok(()) => true,
                Err(err) => {
                    warn!(room = %room, error = %err, kind = %err.kind(), "auto-join failed");
                    false
                }
            }
        } else {
            false
        };

        info!(room = %room, uid = %uid, joined, "page activated");
        self.current = Some(ActiveSession {
            room: room.clone(),
            uid,
            session,
            watch,
        });
        Ok(Activation::Active { room, uid, joined })
    }

    /// Re-activate when the page URL changed; otherwise keep the current
    /// session.
    pub async fn navigate(
        &mut self,
        url: &str,
        secret: Option<&str>,
        tier: Tier,
    ) -> Result<Option<Activation>> {
        if self.url.as_deref() == Some(url) {
            return Ok(None);
        }
        info!(from = ?self.url, to = url, "page navigated");
        self.activate(url, secret, tier).await.map(Some)
    }

    /// Release the membership, leave the channel and stop watching. Release
    /// and leave run side by side, each bounded by the unload timeout, so a
    /// session command still in flight cannot hold the row. The endpoint loses
    /// its capability first.
    pub async fn teardown(&mut self) {
        let Some(active) = self.current.take() else {
            return;
        };
        let _ = self.services.endpoint.detach(REASON_TORN_DOWN);
        let limit = Duration::from_millis(self.services.settings.session.unload_timeout_ms);
        let ActiveSession {
            room,
            uid,
            session,
            watch,
        } = active;

        let release = async {
            match tokio::time::timeout(limit, self.services.gate.release(&room, uid)).await {
                Ok(Ok(_)) => true,
                Ok(Err(err)) => {
                    warn!(room = %room, error = %err, "membership release failed");
                    false
                }
                Err(_) => {
                    warn!(room = %room, ?limit, "membership release exceeded unload timeout");
                    false
                }
            }
        };
        let leave = async {
            let left = tokio::time::timeout(limit, session.leave()).await.is_ok();
            if !left {
                warn!(room = %room, ?limit, "session leave exceeded unload timeout");
            }
            left
        };
        let (released, left) = tokio::join!(release, leave);

        if tokio::time::timeout(limit, watch.stop()).await.is_err() {
            warn!(room = %room, "room watch did not stop in time");
        }
        info!(room = %room, uid = %uid, released, left, "page torn down");
    }

    /// Running session, if any.
    pub fn session(&self) -> Option<&SessionHandle> {
        self.current.as_ref().map(|a| &a.session)
    }

    /// Room occupancy as last observed.
    pub fn occupancy(&self) -> Option<Occupancy> {
        self.current.as_ref().map(|a| a.watch.occupancy())
    }

    /// Current page URL.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Shared services.
    pub fn services(&self) -> &PageServices {
        &self.services
    }
}

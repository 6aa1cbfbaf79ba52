//! Scoped microphone capture.
//!
//! A [`MicrophoneGuard`] owns one open capture track and closes it when
//! dropped, so every exit path (toggle off, failed publish, leave, transport
//! loss, controller drop) releases the device.

use std::sync::Arc;

use tracing::debug;

use crate::transport::{AudioTransport, LocalTrack};

/// Exclusive owner of an open capture track.
pub struct MicrophoneGuard {
    transport: Arc<dyn AudioTransport>,
    track: LocalTrack,
}

impl MicrophoneGuard {
    /// Take ownership of `track`.
    pub fn new(transport: Arc<dyn AudioTransport>, track: LocalTrack) -> Self {
        Self { transport, track }
    }

    /// The guarded track.
    #[must_use]
    pub fn track(&self) -> LocalTrack {
        self.track
    }
}

impl Drop for MicrophoneGuard {
    fn drop(&mut self) {
        debug!(track = self.track.0, "closing microphone capture");
        self.transport.close_microphone(self.track);
    }
}

//! Audio transport seam.
//!
//! [`AudioTransport`] is the subset of the third-party real-time audio SDK
//! the session controller drives: channel join/leave, local microphone
//! capture and publishing, per-participant subscription and playback, and an
//! event stream for remote participant activity.

use async_trait::async_trait;
use dexchat_core::{ErrorKind, RoomId, Uid};
use thiserror::Error;
use tokio::sync::broadcast;

/// Media kind of a published stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MediaKind {
    /// Audio stream.
    Audio,
    /// Video stream. Ignored by the session.
    Video,
}

/// Transport link state as reported by the SDK.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// Not connected.
    Disconnected,
    /// Connecting.
    Connecting,
    /// Connected.
    Connected,
    /// Connection lost, retrying.
    Reconnecting,
    /// Leaving.
    Disconnecting,
}

/// Events emitted by the transport.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// A remote participant joined the channel.
    UserJoined(Uid),
    /// A remote participant left the channel.
    UserLeft(Uid),
    /// A remote participant started publishing media.
    UserPublished(Uid, MediaKind),
    /// A remote participant stopped publishing media.
    UserUnpublished(Uid, MediaKind),
    /// Periodic audio levels in `[0, 1]` for participants that are audible.
    VolumeIndicator(Vec<(Uid, f32)>),
    /// The link state changed.
    ConnectionStateChanged {
        /// New state.
        current: LinkState,
        /// Previous state.
        previous: LinkState,
    },
}

/// Microphone capture options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MicrophoneOptions {
    /// Acoustic echo cancellation.
    pub echo_cancellation: bool,
    /// Noise suppression.
    pub noise_suppression: bool,
}

impl Default for MicrophoneOptions {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
        }
    }
}

/// Handle to an open local capture track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalTrack(pub u64);

/// Transport failures.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Network fault or timeout.
    #[error("transport network error: {0}")]
    Network(String),
    /// Another participant already joined with this identity.
    #[error("identity already in use in channel")]
    UidConflict,
    /// The credential was rejected.
    #[error("transport rejected credential: {0}")]
    InvalidToken(String),
    /// Microphone permission denied.
    #[error("microphone permission denied")]
    PermissionDenied,
    /// No usable capture device.
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),
    /// Playback needs a user gesture first.
    #[error("playback blocked until user gesture")]
    AutoplayBlocked,
    /// Operation requires a joined channel.
    #[error("not joined to a channel")]
    NotJoined,
}

impl TransportError {
    /// Shared classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) | Self::UidConflict => ErrorKind::TransientNetwork,
            Self::InvalidToken(_) => ErrorKind::Configuration,
            Self::PermissionDenied | Self::DeviceUnavailable(_) | Self::AutoplayBlocked => {
                ErrorKind::Device
            }
            Self::NotJoined => ErrorKind::InvalidState,
        }
    }
}

/// Real-time audio transport client.
#[async_trait]
pub trait AudioTransport: Send + Sync {
    /// Join `channel` as `uid` using a credential for `app_id`.
    async fn join(
        &self,
        app_id: &str,
        channel: &RoomId,
        token: &str,
        uid: Uid,
    ) -> Result<(), TransportError>;

    /// Leave the current channel.
    async fn leave(&self) -> Result<(), TransportError>;

    /// Open local microphone capture.
    async fn open_microphone(&self, options: MicrophoneOptions)
    -> Result<LocalTrack, TransportError>;

    /// Stop and release a capture track. Must not fail.
    fn close_microphone(&self, track: LocalTrack);

    /// Publish a local track to the channel.
    async fn publish(&self, track: LocalTrack) -> Result<(), TransportError>;

    /// Stop publishing a local track.
    async fn unpublish(&self, track: LocalTrack) -> Result<(), TransportError>;

    /// Subscribe to a remote participant's media.
    async fn subscribe(&self, uid: Uid, kind: MediaKind) -> Result<(), TransportError>;

    /// Set playback volume (0-100) for a remote participant.
    fn set_volume(&self, uid: Uid, volume: u8) -> Result<(), TransportError>;

    /// Start playback of a remote participant's audio.
    fn play(&self, uid: Uid) -> Result<(), TransportError>;

    /// Stop playback of a remote participant's audio.
    fn stop(&self, uid: Uid);

    /// Start emitting [`TransportEvent::VolumeIndicator`].
    fn enable_volume_indicator(&self);

    /// Subscribe to transport events.
    fn events(&self) -> broadcast::Receiver<TransportEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_conflict_is_retryable() {
        assert!(TransportError::UidConflict.kind().is_retryable());
        assert!(TransportError::Network("reset".into()).kind().is_retryable());
    }

    #[test]
    fn device_errors_classified() {
        assert_eq!(TransportError::PermissionDenied.kind(), ErrorKind::Device);
        assert_eq!(TransportError::AutoplayBlocked.kind(), ErrorKind::Device);
        assert_eq!(TransportError::NotJoined.kind(), ErrorKind::InvalidState);
    }
}

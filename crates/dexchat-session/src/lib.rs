//! # dexchat-session
//!
//! Voice session for one room and identity.
//!
//! - **Transport seam**: [`AudioTransport`] abstracts the real-time audio SDK
//! - **Credentials**: [`TokenService`] and its HTTP client
//! - **State machine**: [`SessionController`] with scoped microphone capture
//! - **Actor**: [`SessionHandle`] serializes commands through one queue and
//!   publishes [`SessionStatus`] snapshots
//! - **Doubles**: [`testing`] holds a scriptable transport for tests

#![deny(unsafe_code)]

pub mod controller;
pub mod errors;
pub mod handle;
pub mod microphone;
pub mod state;
pub mod testing;
pub mod token;
pub mod transport;

pub use controller::{SessionConfig, SessionController};
pub use errors::{Result, SessionError};
pub use handle::SessionHandle;
pub use microphone::MicrophoneGuard;
pub use state::{Playback, RemoteParticipant, SessionState, SessionStatus};
pub use token::{
    HttpTokenService, TokenError, TokenRequest, TokenService, TransportCredential, TransportRole,
};
pub use transport::{
    AudioTransport, LinkState, LocalTrack, MediaKind, MicrophoneOptions, TransportError,
    TransportEvent,
};

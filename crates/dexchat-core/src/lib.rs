//! # dexchat-core
//!
//! Shared vocabulary for the DexChat voice-room crates.
//!
//! - **Identifiers**: [`RoomId`], [`Uid`], [`IdempotencyKey`]
//! - **Pages**: eligibility check and room derivation from a page URL
//! - **Tiers**: [`Tier`] with its capacity policy inputs
//! - **Errors**: the shared [`ErrorKind`] taxonomy every crate classifies into
//! - **Identity**: [`IdentityDeriver`] for numeric session identities
//! - **Retry**: linear backoff parameters for the control bridge
//! - **Logging**: [`logging::init_subscriber`]

#![deny(unsafe_code)]

pub mod errors;
pub mod identity;
pub mod ids;
pub mod logging;
pub mod page;
pub mod retry;
pub mod tier;

pub use errors::ErrorKind;
pub use identity::{IdentityDeriver, IdentityStorage, JsonFileStorage, MemoryStorage};
pub use ids::{IdempotencyKey, InvalidRoomId, RoomId, Uid};
pub use page::{is_eligible_page, room_from_page_url};
pub use retry::RetryConfig;
pub use tier::Tier;

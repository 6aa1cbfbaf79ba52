//! # dexchat-bridge
//!
//! Control bridge between the DexChat control surface and a page's voice
//! session.
//!
//! - **Wire types**: [`ControlCommand`], [`ControlEnvelope`], [`ControlReply`]
//! - **Channel**: [`ControlChannel`] and the in-process [`LocalChannel`]
//! - **Page side**: [`PageEndpoint`] holding the session capability, with
//!   idempotent replay of mutating commands
//! - **Surface side**: [`ControlBridge`] retrying with linear backoff,
//!   [`StatusPoller`] producing [`PanelState`], and [`BillingClient`]

#![deny(unsafe_code)]

pub mod billing;
pub mod bridge;
pub mod channel;
pub mod command;
pub mod endpoint;
pub mod errors;
pub mod poller;

pub use billing::{BillingClient, Charge, SubscriptionStatus};
pub use bridge::{BridgeReply, ControlBridge};
pub use channel::{ControlChannel, Delivery, LocalChannel, local_channel};
pub use command::{ControlCommand, ControlEnvelope, ControlReply, ControlStatus};
pub use endpoint::PageEndpoint;
pub use errors::{BillingError, BridgeError, DeliveryError};
pub use poller::{Notice, PanelState, RoomSource, StatusPoller};

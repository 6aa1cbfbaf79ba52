//! # dexchat-registry
//!
//! Shared room membership and the capacity gate in front of it.
//!
//! - [`store`]: the [`MembershipStore`] and [`RoomDirectory`] seams
//! - [`memory`] / [`sqlite`]: local store implementations
//! - [`rooms`]: HTTP room directory
//! - [`gate`]: tier-based admission ([`CapacityGate`])
//! - [`watch`]: live occupancy driven by change notifications ([`RoomWatch`])

#![deny(unsafe_code)]

pub mod errors;
pub mod gate;
pub mod memory;
pub mod rooms;
pub mod sqlite;
pub mod store;
pub mod watch;

pub use errors::{RegistryError, Result};
pub use gate::{Admission, CapacityGate, Occupancy, RejectReason};
pub use memory::MemoryMembershipStore;
pub use rooms::HttpRoomDirectory;
pub use sqlite::SqliteMembershipStore;
pub use store::{
    ConditionalInsert, MembershipChange, MembershipEvent, MembershipEventStream, MembershipRecord,
    MembershipStore, RoomDirectory, RoomInfo, RoomRecord,
};
pub use watch::RoomWatch;

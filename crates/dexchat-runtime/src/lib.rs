//! # dexchat-runtime
//!
//! Per-page wiring of the DexChat voice subsystem.
//!
//! - **Services**: [`PageServices`] built from settings
//! - **Lifecycle**: [`PageRuntime`] activation, navigation and teardown
//! - **Startup**: [`init`] loads settings and installs logging

#![deny(unsafe_code)]

pub mod errors;
pub mod page;
pub mod services;

use std::sync::Arc;

use dexchat_settings::DexchatSettings;

pub use errors::{Result, RuntimeError};
pub use page::{Activation, PageRuntime};
pub use services::PageServices;

/// Load the global settings snapshot and install the tracing subscriber at
/// the configured level.
pub fn init() -> Arc<DexchatSettings> {
    let settings = dexchat_settings::get_settings();
    dexchat_core::logging::init_subscriber(&settings.logging.level);
    settings
}

//! Shared services a page runtime draws on.

use std::sync::Arc;
use std::time::Duration;

use dexchat_bridge::PageEndpoint;
use dexchat_core::{IdentityDeriver, JsonFileStorage, MemoryStorage};
use dexchat_registry::{CapacityGate, MembershipStore};
use dexchat_session::{AudioTransport, HttpTokenService, TokenService};
use dexchat_settings::{DexchatSettings, resolve_path};
use tracing::debug;

use crate::errors::Result;

/// Everything one browsing context needs to run a voice session.
#[derive(Clone)]
pub struct PageServices {
    /// Numeric identity derivation.
    pub identity: Arc<IdentityDeriver>,
    /// Admission against the membership registry.
    pub gate: Arc<CapacityGate>,
    /// Audio transport.
    pub transport: Arc<dyn AudioTransport>,
    /// Credential issuance.
    pub tokens: Arc<dyn TokenService>,
    /// Control endpoint holding the session capability.
    pub endpoint: Arc<PageEndpoint>,
    /// Settings snapshot.
    pub settings: Arc<DexchatSettings>,
}

impl PageServices {
    /// Wire services from settings: file-backed profile identity, per-context
    /// tab salt, HTTP token service and a gate over `store`.
    pub fn from_settings(
        settings: Arc<DexchatSettings>,
        store: Arc<dyn MembershipStore>,
        transport: Arc<dyn AudioTransport>,
    ) -> Result<Self> {
        let profile_path = resolve_path(&settings.identity.profile_path);
        debug!(path = %profile_path.display(), "profile identity storage");
        let identity = Arc::new(IdentityDeriver::new(
            Arc::new(JsonFileStorage::open(profile_path)),
            Arc::new(MemoryStorage::new()),
        ));
        let tokens = Arc::new(HttpTokenService::with_timeout(
            settings.services.backend_url.clone(),
            Duration::from_millis(settings.services.request_timeout_ms),
        )?);
        let gate = Arc::new(CapacityGate::new(store, settings.capacity.clone()));
        let endpoint = Arc::new(PageEndpoint::new(settings.bridge.replay_capacity));

        Ok(Self {
            identity,
            gate,
            transport,
            tokens,
            endpoint,
            settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dexchat_registry::MemoryMembershipStore;
    use dexchat_session::testing::FakeTransport;

    #[tokio::test]
    async fn wires_from_settings() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = DexchatSettings::default();
        settings.identity.profile_path = dir.path().join("id.json").display().to_string();
        settings.bridge.replay_capacity = 4;

        let services = PageServices::from_settings(
            Arc::new(settings),
            Arc::new(MemoryMembershipStore::new()),
            Arc::new(FakeTransport::new()),
        )
        .unwrap();

        let uid = services.identity.derive_identity(Some("wallet-abcdef12"));
        assert_eq!(services.identity.derive_identity(Some("wallet-abcdef12")), uid);
        assert!(!services.endpoint.is_attached());
        assert_eq!(services.gate.capacity_for(dexchat_core::Tier::Basic), 100);
    }
}

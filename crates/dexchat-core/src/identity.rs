//! Session identity derivation.
//!
//! Independent browsing contexts need numeric identities that rarely collide
//! without a central allocator. An identity is a base value plus a small
//! per-tab salt:
//!
//! - **Base**: the hex value of the last 8 characters of a stable secret
//!   (a wallet address) when one of at least 10 characters is available,
//!   otherwise a random 9-digit number persisted in profile storage.
//! - **Salt**: a random 4-digit number generated once per tab, reduced
//!   modulo 97.
//!
//! The sum is reduced into `[0, 2^31)`. Derivation never fails: storage
//! errors are logged and the freshly generated value is used as-is.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use crate::ids::Uid;

/// Profile storage key holding the fallback base.
pub const PROFILE_UID_KEY: &str = "dexchat-uid";
/// Tab storage key holding the per-tab salt.
pub const TAB_SALT_KEY: &str = "dexchat-tab-id";
/// Minimum secret length for secret-derived bases.
pub const MIN_SECRET_LEN: usize = 10;

const SECRET_SUFFIX_LEN: usize = 8;
const FALLBACK_RANGE: RangeInclusive<u32> = 100_000_000..=999_999_999;
const SALT_RANGE: RangeInclusive<u32> = 1000..=9999;
const SALT_MODULUS: u32 = 97;

// ─────────────────────────────────────────────────────────────────────────────
// Storage
// ─────────────────────────────────────────────────────────────────────────────

/// String key-value storage with a fixed scope (profile or tab).
pub trait IdentityStorage: Send + Sync {
    /// Read a value.
    fn get(&self, key: &str) -> Option<String>;
    /// Write a value.
    fn set(&self, key: &str, value: &str) -> std::io::Result<()>;
}

/// Process-local storage. Used for tab scope and in tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStorage for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> std::io::Result<()> {
        let _ = self.values.lock().insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// JSON-object file storage for profile scope.
///
/// The whole map is rewritten on every `set`. A missing or unreadable file
/// starts empty.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStorage {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!(?path, error = %e, "identity store unreadable, starting empty");
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            values: Mutex::new(values),
        }
    }

    /// Backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IdentityStorage for JsonFileStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> std::io::Result<()> {
        let mut values = self.values.lock();
        let _ = values.insert(key.to_owned(), value.to_owned());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&*values)?;
        std::fs::write(&self.path, json)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Deriver
// ─────────────────────────────────────────────────────────────────────────────

/// Derives and caches the session identity for one tab.
pub struct IdentityDeriver {
    profile: Arc<dyn IdentityStorage>,
    tab: Arc<dyn IdentityStorage>,
    cached: Mutex<Option<(Option<String>, Uid)>>,
}

impl IdentityDeriver {
    /// Create a deriver over profile-scoped and tab-scoped storage.
    pub fn new(profile: Arc<dyn IdentityStorage>, tab: Arc<dyn IdentityStorage>) -> Self {
        Self {
            profile,
            tab,
            cached: Mutex::new(None),
        }
    }

    /// Derive the identity for `stable_secret` using thread-local randomness.
    pub fn derive_identity(&self, stable_secret: Option<&str>) -> Uid {
        self.derive_identity_with(stable_secret, &mut rand::rng())
    }

    /// Derive the identity with an explicit random source.
    ///
    /// The result is cached for the lifetime of the deriver; asking again
    /// with the same secret returns the cached value without touching
    /// storage.
    pub fn derive_identity_with<R: Rng + ?Sized>(
        &self,
        stable_secret: Option<&str>,
        rng: &mut R,
    ) -> Uid {
        let mut cached = self.cached.lock();
        if let Some((secret, uid)) = cached.as_ref() {
            if secret.as_deref() == stable_secret {
                return *uid;
            }
        }

        let base = stable_secret
            .and_then(secret_base)
            .unwrap_or_else(|| self.profile_base(rng));
        let salt = self.tab_salt(rng);
        let uid = Uid::from_wide(u64::from(base) + u64::from(salt % SALT_MODULUS));

        debug!(uid = uid.get(), from_secret = stable_secret.is_some(), "derived session identity");
        *cached = Some((stable_secret.map(str::to_owned), uid));
        uid
    }

    fn profile_base<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        load_or_create(self.profile.as_ref(), PROFILE_UID_KEY, rng, FALLBACK_RANGE)
    }

    fn tab_salt<R: Rng + ?Sized>(&self, rng: &mut R) -> u32 {
        load_or_create(self.tab.as_ref(), TAB_SALT_KEY, rng, SALT_RANGE)
    }
}

/// Base value from the secret's hex suffix.
///
/// Reads the leading hex digits of the last 8 characters; `None` when there
/// are none, when the secret is too short, or when the value is zero.
pub fn secret_base(secret: &str) -> Option<u32> {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() < MIN_SECRET_LEN {
        return None;
    }
    let digits: String = chars[chars.len() - SECRET_SUFFIX_LEN..]
        .iter()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    if digits.is_empty() {
        return None;
    }
    u32::from_str_radix(&digits, 16).ok().filter(|v| *v != 0)
}

fn load_or_create<R: Rng + ?Sized>(
    storage: &dyn IdentityStorage,
    key: &str,
    rng: &mut R,
    range: RangeInclusive<u32>,
) -> u32 {
    if let Some(stored) = storage.get(key).and_then(|v| v.parse::<u32>().ok()) {
        if range.contains(&stored) {
            return stored;
        }
    }
    let value = rng.random_range(range);
    if let Err(e) = storage.set(key, &value.to_string()) {
        warn!(key, error = %e, "failed to persist identity value");
    }
    value
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn deriver_with_salt(salt: u32) -> (IdentityDeriver, Arc<MemoryStorage>) {
        let profile = Arc::new(MemoryStorage::new());
        let tab = Arc::new(MemoryStorage::new());
        tab.set(TAB_SALT_KEY, &salt.to_string()).unwrap();
        (IdentityDeriver::new(profile.clone(), tab), profile)
    }

    // -- secret_base --

    #[test]
    fn secret_suffix_parsed_as_hex() {
        assert_eq!(secret_base("walletaddr0000abcd"), Some(0xabcd));
        assert_eq!(secret_base("xxxxxxxx12345678"), Some(0x1234_5678));
    }

    #[test]
    fn secret_suffix_reads_leading_hex_digits() {
        assert_eq!(secret_base("xxxxxxxxab12zzzz"), Some(0xab12));
    }

    #[test]
    fn secret_without_hex_suffix_is_rejected() {
        assert_eq!(secret_base("xxxxxxxxzzzzzzzz"), None);
        assert_eq!(secret_base("xxxxxxxx00000000"), None);
    }

    #[test]
    fn short_secret_is_rejected() {
        assert_eq!(secret_base("abcdef123"), None);
    }

    // -- derive_identity --

    #[test]
    fn salt_added_modulo_97() {
        let (deriver, _) = deriver_with_salt(1000);
        let uid = deriver.derive_identity(Some("walletaddr00001000"));
        assert_eq!(uid.get(), 0x1000 + 1000 % 97);
    }

    #[test]
    fn fallback_is_persisted_in_profile() {
        let (deriver, profile) = deriver_with_salt(9999);
        let mut rng = StdRng::seed_from_u64(7);
        let uid = deriver.derive_identity_with(None, &mut rng);
        let stored: u32 = profile.get(PROFILE_UID_KEY).unwrap().parse().unwrap();
        assert!(FALLBACK_RANGE.contains(&stored));
        assert_eq!(uid.get(), stored + 9999 % 97);
    }

    #[test]
    fn fallback_stable_across_derivers() {
        let profile = Arc::new(MemoryStorage::new());
        let tab = Arc::new(MemoryStorage::new());
        let first = IdentityDeriver::new(profile.clone(), tab.clone()).derive_identity(None);
        let second = IdentityDeriver::new(profile, tab).derive_identity(Some("short"));
        assert_eq!(first, second);
    }

    #[test]
    fn tab_salt_generated_once() {
        let profile = Arc::new(MemoryStorage::new());
        let tab = Arc::new(MemoryStorage::new());
        let deriver = IdentityDeriver::new(profile, tab.clone());
        let _ = deriver.derive_identity(Some("walletaddr00000001"));
        let salt: u32 = tab.get(TAB_SALT_KEY).unwrap().parse().unwrap();
        assert!(SALT_RANGE.contains(&salt));
        let _ = deriver.derive_identity(Some("walletaddr00000002"));
        assert_eq!(tab.get(TAB_SALT_KEY).unwrap(), salt.to_string());
    }

    #[test]
    fn result_is_cached_per_secret() {
        let (deriver, profile) = deriver_with_salt(1234);
        let a = deriver.derive_identity(None);
        profile.set(PROFILE_UID_KEY, "555555555").unwrap();
        assert_eq!(deriver.derive_identity(None), a);
    }

    #[test]
    fn large_suffix_is_reduced_into_range() {
        let (deriver, _) = deriver_with_salt(1000);
        let uid = deriver.derive_identity(Some("walletaddrffffffff"));
        assert!(uid.get() <= Uid::MAX);
    }

    #[test]
    fn file_storage_round_trips_across_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.json");
        JsonFileStorage::open(&path)
            .set(PROFILE_UID_KEY, "123456789")
            .unwrap();
        let reopened = JsonFileStorage::open(&path);
        assert_eq!(reopened.get(PROFILE_UID_KEY).as_deref(), Some("123456789"));
    }

    #[test]
    fn file_storage_tolerates_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        std::fs::write(&path, "not json").unwrap();
        let store = JsonFileStorage::open(&path);
        assert!(store.get(PROFILE_UID_KEY).is_none());
    }

    proptest! {
        #[test]
        fn deterministic_for_fixed_secret_and_salt(
            suffix in 1u32..0x7FFF_0000,
            salt in 1000u32..=9999,
        ) {
            let secret = format!("wallet{suffix:08x}");
            let (a, _) = deriver_with_salt(salt);
            let (b, _) = deriver_with_salt(salt);
            prop_assert_eq!(a.derive_identity(Some(&secret)), b.derive_identity(Some(&secret)));
        }

        #[test]
        fn distinct_secrets_give_distinct_identities(
            x in 1u32..0x7FFF_0000,
            y in 1u32..0x7FFF_0000,
            salt in 1000u32..=9999,
        ) {
            prop_assume!(x != y);
            let (a, _) = deriver_with_salt(salt);
            let (b, _) = deriver_with_salt(salt);
            let ua = a.derive_identity(Some(&format!("wallet{x:08x}")));
            let ub = b.derive_identity(Some(&format!("wallet{y:08x}")));
            prop_assert_ne!(ua, ub);
        }
    }
}

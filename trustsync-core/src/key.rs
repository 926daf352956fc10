//! Keys and key bundles held by the key registry.
//!
//! - [`Key`] - One enrolled key: material, status, type and a stable handle
//! - [`KeyBundle`] - Named, handle-ordered set of keys with at most one Active key
//! - [`PrivateMaterial`] - Zeroize-on-drop wrapper for private key bytes
//! - [`KeyFingerprint`] - `SHA256:{url_safe_base64_no_padding}` of public material
//!
//! # Security Properties
//!
//! - Private material is zeroized on drop
//! - No `Debug` output for private material
//! - Private material comparison uses constant-time equality

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Errors that can occur when handling keys and bundles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum KeyError {
    /// The bundle name is not one of the known bundles.
    #[error("unknown key bundle: {0}")]
    UnknownBundle(String),

    /// No key with this handle exists in the bundle.
    #[error("unknown key handle: {0}")]
    UnknownHandle(String),

    /// The persisted status string is not recognized.
    #[error("unknown key status: {0}")]
    UnknownStatus(String),

    /// The persisted key type string is not recognized.
    #[error("unknown key type: {0}")]
    UnknownKeyType(String),
}

// ============================================================================
// Key Attributes
// ============================================================================

/// Stable identifier of a key within its bundle.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyHandle(pub String);

impl KeyHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Whether a key is the one in use for its bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Inactive,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        match s {
            "active" => Ok(Self::Active),
            "inactive" => Ok(Self::Inactive),
            other => Err(KeyError::UnknownStatus(other.to_string())),
        }
    }
}

/// Algorithm family of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    /// 128-bit symmetric key.
    Raw128,
    /// 256-bit symmetric key.
    Raw256,
    /// ECDSA P-256 key pair.
    P256,
    /// X25519 key pair.
    Curve25519,
}

impl KeyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw128 => "raw128",
            Self::Raw256 => "raw256",
            Self::P256 => "p256",
            Self::Curve25519 => "curve25519",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        match s {
            "raw128" => Ok(Self::Raw128),
            "raw256" => Ok(Self::Raw256),
            "p256" => Ok(Self::P256),
            "curve25519" => Ok(Self::Curve25519),
            other => Err(KeyError::UnknownKeyType(other.to_string())),
        }
    }
}

/// Name of a key bundle. Each bundle serves one credential role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyBundleName {
    /// The device's user identity key pair.
    UserKeyPair,
    /// Key used for the legacy authorization flow.
    LegacyAuthzenKey,
    /// Group key shared by a user's devices.
    DeviceSyncBetterTogether,
}

impl KeyBundleName {
    pub const ALL: [KeyBundleName; 3] = [
        Self::UserKeyPair,
        Self::LegacyAuthzenKey,
        Self::DeviceSyncBetterTogether,
    ];

    /// The string used when persisting or reporting the bundle.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserKeyPair => "PublicKey",
            Self::LegacyAuthzenKey => "LegacyAuthzenKey",
            Self::DeviceSyncBetterTogether => "DeviceSync:BetterTogether",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(s: &str) -> Result<Self, KeyError> {
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| KeyError::UnknownBundle(s.to_string()))
    }
}

impl fmt::Display for KeyBundleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Key Material
// ============================================================================

/// A zeroize-on-drop wrapper for private key bytes.
///
/// Equality is constant-time. There is deliberately no `Debug` or `Display`.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PrivateMaterial(Vec<u8>);

impl PrivateMaterial {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Get a reference to the private bytes.
    ///
    /// # Security
    ///
    /// The returned reference should not be stored or logged.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for PrivateMaterial {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && bool::from(self.0.ct_eq(&other.0))
    }
}

impl Eq for PrivateMaterial {}

/// A SHA-256 fingerprint of public key material.
///
/// Format: `SHA256:{url_safe_base64_no_padding}`
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyFingerprint(String);

impl KeyFingerprint {
    /// The prefix used for fingerprint strings.
    pub const PREFIX: &'static str = "SHA256:";

    /// Fingerprint the given public key bytes.
    #[must_use]
    pub fn of_public(public_key: &[u8]) -> Self {
        let hash = Sha256::digest(public_key);
        Self(format!("{}{}", Self::PREFIX, URL_SAFE_NO_PAD.encode(hash)))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyFingerprint({})", self.0)
    }
}

// ============================================================================
// Key
// ============================================================================

/// One enrolled key.
#[derive(Clone, PartialEq, Eq)]
pub struct Key {
    handle: KeyHandle,
    status: KeyStatus,
    key_type: KeyType,
    public_key: Vec<u8>,
    private_key: PrivateMaterial,
}

impl Key {
    pub fn new(
        public_key: impl Into<Vec<u8>>,
        private_key: PrivateMaterial,
        status: KeyStatus,
        key_type: KeyType,
        handle: KeyHandle,
    ) -> Self {
        Self {
            handle,
            status,
            key_type,
            public_key: public_key.into(),
            private_key,
        }
    }

    pub fn handle(&self) -> &KeyHandle {
        &self.handle
    }

    pub fn status(&self) -> KeyStatus {
        self.status
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn private_key(&self) -> &PrivateMaterial {
        &self.private_key
    }

    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }

    pub fn fingerprint(&self) -> KeyFingerprint {
        KeyFingerprint::of_public(&self.public_key)
    }

    /// Returns true if both keys carry the same public and private material.
    pub fn same_material(&self, public_key: &[u8], private_key: &PrivateMaterial) -> bool {
        self.public_key == public_key && self.private_key == *private_key
    }

    pub(crate) fn set_status(&mut self, status: KeyStatus) {
        self.status = status;
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("handle", &self.handle)
            .field("status", &self.status)
            .field("key_type", &self.key_type)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

// ============================================================================
// Key Bundle
// ============================================================================

/// A named collection of keys serving one credential role.
///
/// Keys are ordered by handle. At most one key is Active at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBundle {
    name: KeyBundleName,
    keys: BTreeMap<KeyHandle, Key>,
}

impl KeyBundle {
    pub fn new(name: KeyBundleName) -> Self {
        Self {
            name,
            keys: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> KeyBundleName {
        self.name
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.values()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn get(&self, handle: &KeyHandle) -> Option<&Key> {
        self.keys.get(handle)
    }

    /// The Active key, if any.
    pub fn active(&self) -> Option<&Key> {
        self.keys.values().find(|k| k.is_active())
    }

    /// Insert `key` as the Active key, demoting every other key to Inactive.
    ///
    /// A key with the same handle is replaced.
    pub fn add_or_replace_active(&mut self, mut key: Key) {
        for existing in self.keys.values_mut() {
            existing.set_status(KeyStatus::Inactive);
        }
        key.set_status(KeyStatus::Active);
        self.keys.insert(key.handle.clone(), key);
    }

    /// Load a key as persisted, without touching other keys' status.
    ///
    /// If the key is Active and another Active key was already loaded, the
    /// earlier one is demoted so the single-Active invariant still holds.
    pub fn insert_persisted(&mut self, key: Key) {
        if key.is_active() {
            self.add_or_replace_active(key);
        } else {
            self.keys.insert(key.handle.clone(), key);
        }
    }

    /// Make the key with `handle` Active and demote the others.
    pub fn set_active(&mut self, handle: &KeyHandle) -> Result<(), KeyError> {
        if !self.keys.contains_key(handle) {
            return Err(KeyError::UnknownHandle(handle.0.clone()));
        }
        for (h, key) in self.keys.iter_mut() {
            key.set_status(if h == handle {
                KeyStatus::Active
            } else {
                KeyStatus::Inactive
            });
        }
        Ok(())
    }

    /// Mark every key Inactive.
    pub fn deactivate_all(&mut self) {
        for key in self.keys.values_mut() {
            key.set_status(KeyStatus::Inactive);
        }
    }

    /// Remove a key, returning it if it existed.
    pub fn delete(&mut self, handle: &KeyHandle) -> Option<Key> {
        self.keys.remove(handle)
    }
}

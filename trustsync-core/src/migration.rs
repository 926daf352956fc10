//! Reconciling the legacy single-key credential with the key registry.
//!
//! Older installs stored one user key pair as two base64url preferences. The
//! registry now owns that pair under [`KeyBundleName::UserKeyPair`]. This
//! module holds the pure half of the migration: decoding the legacy values and
//! classifying how they relate to the registry's active key.
//!
//! [`KeyBundleName::UserKeyPair`]: crate::key::KeyBundleName::UserKeyPair

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::key::{Key, PrivateMaterial};

/// Handle given to a legacy key pair when it is installed in the registry.
pub const LEGACY_KEY_HANDLE: &str = "device_key";

/// Decode one legacy preference value (base64url, padding required).
pub fn decode_legacy_value(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE.decode(value)
}

/// A legacy user key pair. Both halves are non-empty.
#[derive(Clone)]
pub struct LegacyKeyPair {
    public_key: Vec<u8>,
    private_key: PrivateMaterial,
}

impl LegacyKeyPair {
    /// Build a pair from decoded halves. Returns `None` if either half is empty.
    pub fn from_parts(public_key: Vec<u8>, private_key: Vec<u8>) -> Option<Self> {
        if public_key.is_empty() || private_key.is_empty() {
            return None;
        }
        Some(Self {
            public_key,
            private_key: PrivateMaterial::new(private_key),
        })
    }

    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    pub fn private_key(&self) -> &PrivateMaterial {
        &self.private_key
    }

    /// Returns true if `key` carries exactly this pair's material.
    pub fn matches(&self, key: &Key) -> bool {
        key.same_material(&self.public_key, &self.private_key)
    }
}

impl std::fmt::Debug for LegacyKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyKeyPair")
            .field(
                "fingerprint",
                &crate::key::KeyFingerprint::of_public(&self.public_key),
            )
            .finish_non_exhaustive()
    }
}

/// How the legacy pair relates to the registry's active user key.
///
/// Integer values are reported in telemetry and must stay stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserKeyPairState {
    NoLegacyNoActive = 0,
    LegacyNoActive = 1,
    NoLegacyActive = 2,
    LegacyActiveAgree = 3,
    LegacyActiveDisagree = 4,
}

impl UserKeyPairState {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoLegacyNoActive => "no_legacy_no_active",
            Self::LegacyNoActive => "legacy_no_active",
            Self::NoLegacyActive => "no_legacy_active",
            Self::LegacyActiveAgree => "legacy_active_agree",
            Self::LegacyActiveDisagree => "legacy_active_disagree",
        }
    }

    /// Returns true if the legacy pair must be written to the registry.
    pub fn needs_install(&self) -> bool {
        matches!(self, Self::LegacyNoActive | Self::LegacyActiveDisagree)
    }
}

impl std::fmt::Display for UserKeyPairState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify the legacy pair against the active user key.
pub fn classify_user_key_pair(
    legacy: Option<&LegacyKeyPair>,
    active: Option<&Key>,
) -> UserKeyPairState {
    match (legacy, active) {
        (None, None) => UserKeyPairState::NoLegacyNoActive,
        (Some(_), None) => UserKeyPairState::LegacyNoActive,
        (None, Some(_)) => UserKeyPairState::NoLegacyActive,
        (Some(pair), Some(key)) if pair.matches(key) => UserKeyPairState::LegacyActiveAgree,
        (Some(_), Some(_)) => UserKeyPairState::LegacyActiveDisagree,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{KeyHandle, KeyStatus, KeyType};

    fn active_key(public: &[u8], private: &[u8]) -> Key {
        Key::new(
            public,
            PrivateMaterial::new(private),
            KeyStatus::Active,
            KeyType::P256,
            KeyHandle::new("other"),
        )
    }

    #[test]
    fn empty_halves_are_absent() {
        assert!(LegacyKeyPair::from_parts(vec![], b"priv".to_vec()).is_none());
        assert!(LegacyKeyPair::from_parts(b"pub".to_vec(), vec![]).is_none());
        assert!(LegacyKeyPair::from_parts(b"pub".to_vec(), b"priv".to_vec()).is_some());
    }

    #[test]
    fn classify_all_states() {
        let legacy = LegacyKeyPair::from_parts(b"A".to_vec(), b"B".to_vec()).unwrap();
        let same = active_key(b"A", b"B");
        let different = active_key(b"C", b"D");
        let half_different = active_key(b"A", b"D");

        assert_eq!(
            classify_user_key_pair(None, None),
            UserKeyPairState::NoLegacyNoActive
        );
        assert_eq!(
            classify_user_key_pair(Some(&legacy), None),
            UserKeyPairState::LegacyNoActive
        );
        assert_eq!(
            classify_user_key_pair(None, Some(&same)),
            UserKeyPairState::NoLegacyActive
        );
        assert_eq!(
            classify_user_key_pair(Some(&legacy), Some(&same)),
            UserKeyPairState::LegacyActiveAgree
        );
        assert_eq!(
            classify_user_key_pair(Some(&legacy), Some(&different)),
            UserKeyPairState::LegacyActiveDisagree
        );
        assert_eq!(
            classify_user_key_pair(Some(&legacy), Some(&half_different)),
            UserKeyPairState::LegacyActiveDisagree
        );
    }

    #[test]
    fn only_missing_or_disagreeing_needs_install() {
        assert!(UserKeyPairState::LegacyNoActive.needs_install());
        assert!(UserKeyPairState::LegacyActiveDisagree.needs_install());
        assert!(!UserKeyPairState::LegacyActiveAgree.needs_install());
        assert!(!UserKeyPairState::NoLegacyActive.needs_install());
        assert!(!UserKeyPairState::NoLegacyNoActive.needs_install());
    }

    #[test]
    fn decode_requires_padding() {
        // "ab" -> "YWI=" with padding
        assert_eq!(decode_legacy_value("YWI=").unwrap(), b"ab");
        assert!(decode_legacy_value("YWI").is_err());
        assert!(decode_legacy_value("not base64!").is_err());
    }

    #[test]
    fn decode_uses_url_safe_alphabet() {
        // 0xfb 0xff encodes to "-_8=" in the URL-safe alphabet
        assert_eq!(decode_legacy_value("-_8=").unwrap(), vec![0xfb, 0xff]);
        assert!(decode_legacy_value("+/8=").is_err());
    }
}

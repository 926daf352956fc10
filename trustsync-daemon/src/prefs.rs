//! Durable key/value preferences.
//!
//! The orchestrator keeps exactly one piece of state across restarts, the
//! failure-recovery invocation reason. The legacy user key pair is also read
//! from here once, at construction.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use trustsync_core::{decode_legacy_value, InvocationReason, LegacyKeyPair};

use crate::db::StoreError;

/// Integer pref holding the invocation reason of the last failed attempt.
pub const FAILURE_RECOVERY_REASON_PREF: &str =
    "trustsync.enrollment.failure_recovery_invocation_reason";
/// Legacy base64url public half of the user key pair.
pub const LEGACY_USER_PUBLIC_KEY_PREF: &str = "trustsync.enrollment.user_public_key";
/// Legacy base64url private half of the user key pair.
pub const LEGACY_USER_PRIVATE_KEY_PREF: &str = "trustsync.enrollment.user_private_key";

/// Durable preference storage.
#[async_trait]
pub trait PrefStore: Send + Sync {
    async fn get_integer(&self, key: &str) -> Result<Option<i64>, StoreError>;
    async fn set_integer(&self, key: &str, value: i64) -> Result<(), StoreError>;
    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// [`PrefStore`] backed by the `prefs` table.
#[derive(Clone)]
pub struct SqlitePrefStore {
    pool: SqlitePool,
}

impl SqlitePrefStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PrefStore for SqlitePrefStore {
    async fn get_integer(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let row = sqlx::query("SELECT int_value FROM prefs WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => row.try_get::<Option<i64>, _>("int_value")?,
            None => None,
        })
    }

    async fn set_integer(&self, key: &str, value: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO prefs (key, int_value, str_value, updated_at)
            VALUES (?1, ?2, NULL, ?3)
            ON CONFLICT(key) DO UPDATE SET
                int_value = excluded.int_value,
                str_value = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT str_value FROM prefs WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => row.try_get::<Option<String>, _>("str_value")?,
            None => None,
        })
    }

    async fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO prefs (key, int_value, str_value, updated_at)
            VALUES (?1, NULL, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                int_value = NULL,
                str_value = excluded.str_value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Read the persisted failure-recovery reason.
///
/// Absent means [`InvocationReason::Unspecified`]. A value that does not name
/// a known reason is reported as a decode error.
pub async fn load_failure_recovery_reason(
    prefs: &dyn PrefStore,
) -> Result<InvocationReason, StoreError> {
    match prefs.get_integer(FAILURE_RECOVERY_REASON_PREF).await? {
        None => Ok(InvocationReason::Unspecified),
        Some(value) => {
            InvocationReason::from_persisted(value).ok_or_else(|| StoreError::Decode {
                key: FAILURE_RECOVERY_REASON_PREF.to_string(),
                reason: format!("unknown invocation reason {value}"),
            })
        }
    }
}

pub async fn store_failure_recovery_reason(
    prefs: &dyn PrefStore,
    reason: InvocationReason,
) -> Result<(), StoreError> {
    prefs
        .set_integer(FAILURE_RECOVERY_REASON_PREF, reason.as_i64())
        .await
}

/// Read the legacy user key pair.
///
/// Returns `None` if either half is missing, empty or not valid padded
/// base64url. Undecodable values are logged.
pub async fn load_legacy_key_pair(
    prefs: &dyn PrefStore,
) -> Result<Option<LegacyKeyPair>, StoreError> {
    let public_key = read_legacy_half(prefs, LEGACY_USER_PUBLIC_KEY_PREF).await?;
    let private_key = read_legacy_half(prefs, LEGACY_USER_PRIVATE_KEY_PREF).await?;

    Ok(match (public_key, private_key) {
        (Some(public_key), Some(private_key)) => {
            LegacyKeyPair::from_parts(public_key, private_key)
        }
        _ => None,
    })
}

async fn read_legacy_half(prefs: &dyn PrefStore, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    let Some(encoded) = prefs.get_string(key).await? else {
        return Ok(None);
    };
    if encoded.is_empty() {
        return Ok(None);
    }

    match decode_legacy_value(&encoded) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) => {
            tracing::error!(pref = key, error = %e, "Invalid legacy key encoding; treating as absent");
            Ok(None)
        }
    }
}

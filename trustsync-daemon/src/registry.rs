//! Persistent key registry.
//!
//! Every write goes to SQLite in one transaction and then swaps a fresh
//! snapshot into an in-memory cache, so reads never touch the database.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use trustsync_core::{
    classify_user_key_pair, Key, KeyBundle, KeyBundleName, KeyError, KeyHandle, KeyStatus,
    KeyType, LegacyKeyPair, PrivateMaterial, TelemetryEvent, UserKeyPairState,
};

use crate::telemetry;

type Snapshot = BTreeMap<KeyBundleName, KeyBundle>;

/// Errors from the key registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Key(#[from] KeyError),
}

/// Store of named key bundles.
pub struct KeyRegistry {
    pool: SqlitePool,
    cache: ArcSwap<Snapshot>,
}

impl KeyRegistry {
    /// Load every persisted key into the cache.
    pub async fn load(pool: SqlitePool) -> Result<Self, RegistryError> {
        let registry = Self {
            pool,
            cache: ArcSwap::from_pointee(Snapshot::new()),
        };
        registry.refresh_cache().await?;
        Ok(registry)
    }

    /// Rebuild the cache from the database and swap it in atomically.
    pub async fn refresh_cache(&self) -> Result<(), RegistryError> {
        let rows = sqlx::query(
            r#"
            SELECT bundle, handle, status, key_type, public_key, private_key
            FROM enrolled_keys
            ORDER BY bundle, handle
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut snapshot = Snapshot::new();
        for row in rows {
            let bundle_name: String = row.try_get("bundle")?;
            let bundle_name = KeyBundleName::parse(&bundle_name)?;
            let key = parse_key_row(&row)?;
            snapshot
                .entry(bundle_name)
                .or_insert_with(|| KeyBundle::new(bundle_name))
                .insert_persisted(key);
        }

        self.cache.store(Arc::new(snapshot));
        Ok(())
    }

    /// The Active key of a bundle.
    pub fn get_active(&self, name: KeyBundleName) -> Option<Key> {
        self.cache.load().get(&name).and_then(|b| b.active().cloned())
    }

    /// A copy of a bundle, if it holds any keys.
    pub fn bundle(&self, name: KeyBundleName) -> Option<KeyBundle> {
        self.cache.load().get(&name).cloned()
    }

    /// Insert `key` as the Active key of `name`, demoting any previous Active key.
    pub async fn add_or_replace_active(
        &self,
        name: KeyBundleName,
        key: Key,
    ) -> Result<(), RegistryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE enrolled_keys SET status = ? WHERE bundle = ?")
            .bind(KeyStatus::Inactive.as_str())
            .bind(name.as_str())
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO enrolled_keys (
                bundle, handle, status, key_type, public_key, private_key, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(bundle, handle) DO UPDATE SET
                status = excluded.status,
                key_type = excluded.key_type,
                public_key = excluded.public_key,
                private_key = excluded.private_key
            "#,
        )
        .bind(name.as_str())
        .bind(key.handle().as_str())
        .bind(KeyStatus::Active.as_str())
        .bind(key.key_type().as_str())
        .bind(key.public_key())
        .bind(key.private_key().as_bytes())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(
            bundle = %name,
            handle = %key.handle(),
            fingerprint = %key.fingerprint(),
            "Key installed as active"
        );

        self.cache.rcu(|current| {
            let mut next = Snapshot::clone(current);
            next.entry(name)
                .or_insert_with(|| KeyBundle::new(name))
                .add_or_replace_active(key.clone());
            next
        });
        Ok(())
    }

    /// Make an existing key the Active key of its bundle.
    pub async fn set_active(
        &self,
        name: KeyBundleName,
        handle: &KeyHandle,
    ) -> Result<(), RegistryError> {
        let known = self
            .cache
            .load()
            .get(&name)
            .is_some_and(|b| b.get(handle).is_some());
        if !known {
            return Err(KeyError::UnknownHandle(handle.to_string()).into());
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE enrolled_keys SET status = CASE WHEN handle = ? THEN ? ELSE ? END WHERE bundle = ?",
        )
        .bind(handle.as_str())
        .bind(KeyStatus::Active.as_str())
        .bind(KeyStatus::Inactive.as_str())
        .bind(name.as_str())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        tracing::debug!(bundle = %name, handle = %handle, "Key activated");

        self.cache.rcu(|current| {
            let mut next = Snapshot::clone(current);
            if let Some(bundle) = next.get_mut(&name) {
                // Presence was checked above; a concurrent delete leaves nothing to activate.
                let _ = bundle.set_active(handle);
            }
            next
        });
        Ok(())
    }

    /// Mark every key of a bundle Inactive.
    pub async fn deactivate_all(&self, name: KeyBundleName) -> Result<(), RegistryError> {
        sqlx::query("UPDATE enrolled_keys SET status = ? WHERE bundle = ?")
            .bind(KeyStatus::Inactive.as_str())
            .bind(name.as_str())
            .execute(&self.pool)
            .await?;

        tracing::debug!(bundle = %name, "Bundle deactivated");

        self.cache.rcu(|current| {
            let mut next = Snapshot::clone(current);
            if let Some(bundle) = next.get_mut(&name) {
                bundle.deactivate_all();
            }
            next
        });
        Ok(())
    }

    /// Delete a key. Returns true if it existed.
    pub async fn delete_key(
        &self,
        name: KeyBundleName,
        handle: &KeyHandle,
    ) -> Result<bool, RegistryError> {
        let result = sqlx::query("DELETE FROM enrolled_keys WHERE bundle = ? AND handle = ?")
            .bind(name.as_str())
            .bind(handle.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        tracing::info!(bundle = %name, handle = %handle, "Key deleted");

        self.cache.rcu(|current| {
            let mut next = Snapshot::clone(current);
            if let Some(bundle) = next.get_mut(&name) {
                bundle.delete(handle);
                if bundle.is_empty() {
                    next.remove(&name);
                }
            }
            next
        });
        Ok(true)
    }

    /// Bring the legacy user key pair into the registry.
    ///
    /// The pair is always classified against the current Active user key and
    /// the classification is recorded, whichever branch is taken. If the pair
    /// is present and the registry either has no Active user key or a
    /// different one, the legacy pair is installed as Active under `handle`.
    /// Running this again after a successful install is a no-op.
    pub async fn migrate_legacy_pair_if_needed(
        &self,
        legacy: Option<&LegacyKeyPair>,
        handle: &str,
    ) -> Result<UserKeyPairState, RegistryError> {
        let active = self.get_active(KeyBundleName::UserKeyPair);
        let state = classify_user_key_pair(legacy, active.as_ref());
        telemetry::record(&TelemetryEvent::user_key_pair_state(state));

        let Some(pair) = legacy else {
            return Ok(state);
        };
        if !state.needs_install() {
            return Ok(state);
        }

        if let Some(active) = &active {
            tracing::warn!(
                active_handle = %active.handle(),
                active_fingerprint = %active.fingerprint(),
                "Legacy user key pair disagrees with active key; legacy pair wins"
            );
        }

        let key = Key::new(
            pair.public_key(),
            pair.private_key().clone(),
            KeyStatus::Active,
            KeyType::P256,
            KeyHandle::new(handle),
        );
        self.add_or_replace_active(KeyBundleName::UserKeyPair, key)
            .await?;

        Ok(state)
    }
}

fn parse_key_row(row: &sqlx::sqlite::SqliteRow) -> Result<Key, RegistryError> {
    let handle: String = row.try_get("handle")?;
    let status: String = row.try_get("status")?;
    let key_type: String = row.try_get("key_type")?;
    let public_key: Vec<u8> = row.try_get("public_key")?;
    let private_key: Vec<u8> = row.try_get("private_key")?;

    Ok(Key::new(
        public_key,
        PrivateMaterial::new(private_key),
        KeyStatus::parse(&status)?,
        KeyType::parse(&key_type)?,
        KeyHandle::new(handle),
    ))
}

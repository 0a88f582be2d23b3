use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Default)]
struct Table {
    records: HashMap<RefreshTokenId, RefreshTokenRecord>,
    // Current lookup key of every record; rotated-away keys are dropped.
    by_lookup_key: HashMap<String, RefreshTokenId>,
}

/// Refresh tokens in a single mutex-guarded table. Every operation is one
/// critical section, which is what makes `rotate` atomic here.
#[derive(Default)]
pub struct MemoryRefreshTokenStore {
    table: Mutex<Table>,
}

impl MemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Table>, StoreError> {
        self.table
            .lock()
            .map_err(|_| StoreError::Transient("refresh token table poisoned".into()))
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
    expires_after(now, ttl)
        .ok_or_else(|| StoreError::ConstraintViolation("refresh ttl out of range".into()))
}

#[async_trait::async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn create(
        &self,
        owner: AccountId,
        ttl: Duration,
    ) -> Result<IssuedRefreshToken, StoreError> {
        let now = Utc::now();
        let expires_at = expiry(now, ttl)?;
        let secret = RefreshSecret::generate();
        let record = RefreshTokenRecord {
            id: RefreshTokenId::new_v4(),
            owner,
            lookup_key: secret.lookup_key(),
            created_at: now,
            expires_at,
            revoked: false,
        };

        let mut table = self.lock()?;
        if table.by_lookup_key.contains_key(&record.lookup_key) {
            return Err(StoreError::ConstraintViolation(
                "duplicate refresh lookup key".into(),
            ));
        }
        table.by_lookup_key.insert(record.lookup_key.clone(), record.id);
        table.records.insert(record.id, record.clone());

        Ok(IssuedRefreshToken {
            id: record.id,
            secret,
            expires_at,
        })
    }

    async fn owner_of(&self, secret: &RefreshSecret) -> Result<Option<AccountId>, StoreError> {
        let now = Utc::now();
        let table = self.lock()?;
        Ok(table
            .by_lookup_key
            .get(&secret.lookup_key())
            .and_then(|id| table.records.get(id))
            .filter(|record| record.is_live(now))
            .map(|record| record.owner))
    }

    async fn rotate(
        &self,
        presented: &RefreshSecret,
        ttl: Duration,
    ) -> Result<RotatedRefreshToken, StoreError> {
        let now = Utc::now();
        let presented_key = presented.lookup_key();

        let mut table = self.lock()?;
        let id = *table
            .by_lookup_key
            .get(&presented_key)
            .ok_or(StoreError::NotFound)?;
        let current = table.records.get(&id).ok_or(StoreError::NotFound)?;
        if !current.is_live(now) {
            return Err(StoreError::NotFound);
        }

        let secret = RefreshSecret::generate();
        let lookup_key = secret.lookup_key();
        if table.by_lookup_key.contains_key(&lookup_key) {
            return Err(StoreError::ConstraintViolation(
                "duplicate refresh lookup key".into(),
            ));
        }
        let updated = RefreshTokenRecord {
            lookup_key: lookup_key.clone(),
            created_at: now,
            expires_at: expiry(now, ttl)?,
            ..current.clone()
        };

        // Nothing below can fail, so the table never holds a half-rotated record.
        table.by_lookup_key.remove(&presented_key);
        table.by_lookup_key.insert(lookup_key, id);
        let rotated = RotatedRefreshToken {
            id,
            owner: updated.owner,
            secret,
            expires_at: updated.expires_at,
        };
        table.records.insert(id, updated);

        Ok(rotated)
    }

    async fn revoke(&self, secret: &RefreshSecret) -> Result<bool, StoreError> {
        let now = Utc::now();
        let mut table = self.lock()?;
        let Some(id) = table.by_lookup_key.get(&secret.lookup_key()).copied() else {
            return Ok(false);
        };
        match table.records.get_mut(&id) {
            Some(record) if record.is_live(now) => {
                record.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all(&self, owner: AccountId) -> Result<u64, StoreError> {
        let now = Utc::now();
        let mut table = self.lock()?;
        let mut revoked = 0;
        for record in table.records.values_mut() {
            if record.owner == owner && record.is_live(now) {
                record.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn list_by_owner(
        &self,
        owner: AccountId,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        let table = self.lock()?;
        let mut records: Vec<RefreshTokenRecord> = table
            .records
            .values()
            .filter(|record| record.owner == owner)
            .cloned()
            .collect();
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut table = self.lock()?;
        let Table {
            records,
            by_lookup_key,
        } = &mut *table;

        let before = records.len();
        records.retain(|_, record| record.expires_at > now);
        by_lookup_key.retain(|_, id| records.contains_key(id));
        Ok((before - records.len()) as u64)
    }
}

use super::util::{classify, is_dup_key, uuid_from_bytes};
use crate::domain_model::*;
use crate::domain_port::*;
use crate::logger::*;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySql, MySqlPool, Row, Transaction};
use std::time::Duration;

/// Refresh tokens in the `refresh_token` table.
///
/// `rotate` runs inside one transaction that locks the presented row with
/// `SELECT ... FOR UPDATE`; concurrent rotations of the same secret queue on
/// that lock and find the key gone once the winner commits.
///
/// `rotation_timeout` bounds the work before `COMMIT` only. Once the commit
/// is sent the call waits for its outcome, so a rotation that committed is
/// always reported to the caller.
pub struct MySqlRefreshTokenStore {
    pool: MySqlPool,
    rotation_timeout: Duration,
}

impl MySqlRefreshTokenStore {
    pub fn new(pool: MySqlPool, rotation_timeout: Duration) -> Self {
        MySqlRefreshTokenStore {
            pool,
            rotation_timeout,
        }
    }

    fn row_to_record(row: MySqlRow) -> Result<RefreshTokenRecord, StoreError> {
        let id_bytes: Vec<u8> = row.try_get("refresh_id").map_err(classify)?;
        let owner_bytes: Vec<u8> = row.try_get("account_id").map_err(classify)?;
        let lookup_key: String = row.try_get("lookup_key").map_err(classify)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(classify)?;
        let expires_at: DateTime<Utc> = row.try_get("expires_at").map_err(classify)?;
        let revoked: bool = row.try_get("revoked").map_err(classify)?;

        Ok(RefreshTokenRecord {
            id: RefreshTokenId(uuid_from_bytes(&id_bytes)?),
            owner: AccountId(uuid_from_bytes(&owner_bytes)?),
            lookup_key,
            created_at,
            expires_at,
            revoked,
        })
    }

    /// Lock the presented row and rewrite it, leaving the transaction open.
    async fn stage_rotation(
        &self,
        presented: &RefreshSecret,
        ttl: Duration,
    ) -> Result<(Transaction<'static, MySql>, RotatedRefreshToken), StoreError> {
        let now = Utc::now();
        let presented_key = presented.lookup_key();

        // Every early return drops `tx`, which rolls it back.
        let mut tx = self.pool.begin().await.map_err(classify)?;

        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT refresh_id, account_id, lookup_key, created_at, expires_at, revoked
FROM refresh_token
WHERE lookup_key = ?
FOR UPDATE
"#,
        )
        .bind(&presented_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(classify)?;

        let current = match row_opt.map(Self::row_to_record).transpose()? {
            Some(record) if record.is_live(now) => record,
            Some(record) => {
                debug!(refresh_id = %record.id, state = ?record.state(now), "rotation refused");
                return Err(StoreError::NotFound);
            }
            None => return Err(StoreError::NotFound),
        };

        let secret = RefreshSecret::generate();
        let expires_at = expiry(now, ttl)?;

        let result = sqlx::query(
            r#"
UPDATE refresh_token
SET lookup_key = ?, created_at = ?, expires_at = ?
WHERE refresh_id = ? AND lookup_key = ? AND revoked = FALSE
"#,
        )
        .bind(secret.lookup_key())
        .bind(now)
        .bind(expires_at)
        .bind(current.id.0.as_bytes() as &[u8])
        .bind(&presented_key)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_dup_key(&e) {
                StoreError::ConstraintViolation("duplicate refresh lookup key".into())
            } else {
                classify(e)
            }
        })?;

        if result.rows_affected() != 1 {
            return Err(StoreError::NotFound);
        }

        Ok((
            tx,
            RotatedRefreshToken {
                id: current.id,
                owner: current.owner,
                secret,
                expires_at,
            },
        ))
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
    expires_after(now, ttl)
        .ok_or_else(|| StoreError::ConstraintViolation("refresh ttl out of range".into()))
}

#[async_trait::async_trait]
impl RefreshTokenStore for MySqlRefreshTokenStore {
    async fn create(
        &self,
        owner: AccountId,
        ttl: Duration,
    ) -> Result<IssuedRefreshToken, StoreError> {
        let now = Utc::now();
        let expires_at = expiry(now, ttl)?;
        let id = RefreshTokenId::new_v4();
        let secret = RefreshSecret::generate();

        sqlx::query(
            r#"
INSERT INTO refresh_token (refresh_id, account_id, lookup_key, created_at, expires_at, revoked)
VALUES (?, ?, ?, ?, ?, FALSE)
"#,
        )
        .bind(id.0.as_bytes() as &[u8])
        .bind(owner.0.as_bytes() as &[u8])
        .bind(secret.lookup_key())
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(IssuedRefreshToken {
            id,
            secret,
            expires_at,
        })
    }

    async fn owner_of(&self, secret: &RefreshSecret) -> Result<Option<AccountId>, StoreError> {
        let owner: Option<Vec<u8>> = sqlx::query_scalar(
            r#"
SELECT account_id
FROM refresh_token
WHERE lookup_key = ? AND revoked = FALSE AND expires_at > ?
"#,
        )
        .bind(secret.lookup_key())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        owner
            .map(|bytes| uuid_from_bytes(&bytes).map(AccountId))
            .transpose()
    }

    async fn rotate(
        &self,
        presented: &RefreshSecret,
        ttl: Duration,
    ) -> Result<RotatedRefreshToken, StoreError> {
        // Dropping the staged transaction on timeout rolls it back.
        let (tx, rotated) =
            tokio::time::timeout(self.rotation_timeout, self.stage_rotation(presented, ttl))
                .await
                .map_err(|_| {
                    StoreError::Timeout(format!(
                        "refresh rotation not staged within {:?}",
                        self.rotation_timeout
                    ))
                })??;

        tx.commit()
            .await
            .map_err(|e| StoreError::Transient(format!("commit rotation: {e}")))?;

        Ok(rotated)
    }

    async fn revoke(&self, secret: &RefreshSecret) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
UPDATE refresh_token
SET revoked = TRUE
WHERE lookup_key = ? AND revoked = FALSE AND expires_at > ?
"#,
        )
        .bind(secret.lookup_key())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_all(&self, owner: AccountId) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
UPDATE refresh_token
SET revoked = TRUE
WHERE account_id = ? AND revoked = FALSE AND expires_at > ?
"#,
        )
        .bind(owner.0.as_bytes() as &[u8])
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(result.rows_affected())
    }

    async fn list_by_owner(
        &self,
        owner: AccountId,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        let rows: Vec<MySqlRow> = sqlx::query(
            r#"
SELECT refresh_id, account_id, lookup_key, created_at, expires_at, revoked
FROM refresh_token
WHERE account_id = ?
ORDER BY created_at
"#,
        )
        .bind(owner.0.as_bytes() as &[u8])
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_token WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(classify)?;

        Ok(result.rows_affected())
    }
}

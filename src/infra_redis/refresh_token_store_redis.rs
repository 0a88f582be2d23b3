use crate::domain_model::*;
use crate::domain_port::*;
use crate::logger::*;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{
    AsyncCommands, FromRedisValue, RedisError, RedisResult, RedisWrite, Script, ToRedisArgs, Value,
};
use std::collections::HashMap;
use std::time::Duration;

const REFRESH_CREATE: &str = include_str!("refresh_create.lua");
const REFRESH_ROTATE: &str = include_str!("refresh_rotate.lua");
const REFRESH_REVOKE: &str = include_str!("refresh_revoke.lua");

const SCAN_BATCH: usize = 256;

/// Refresh tokens as Redis keys under `prefix`:
///
/// * `{prefix}:key:{lookup_key}` holds the record id of the live secret,
/// * `{prefix}:record:{id}` is a hash with the record fields,
/// * `{prefix}:owner:{account_id}` is the set of the owner's record ids.
///
/// Index and record keys carry the record's expiry as a native TTL. Every
/// state change runs as a Lua script, so it is atomic on the server.
///
/// `rotation_timeout` bounds the index lookup that precedes the rotate
/// script. The script itself is never abandoned once sent.
pub struct RedisRefreshTokenStore {
    conn: ConnectionManager,
    prefix: String,
    rotation_timeout: Duration,
    create_script: Script,
    rotate_script: Script,
    revoke_script: Script,
}

impl RedisRefreshTokenStore {
    pub fn new(
        conn: ConnectionManager,
        prefix: impl Into<String>,
        rotation_timeout: Duration,
    ) -> Self {
        RedisRefreshTokenStore {
            conn,
            prefix: prefix.into(),
            rotation_timeout,
            create_script: Script::new(REFRESH_CREATE),
            rotate_script: Script::new(REFRESH_ROTATE),
            revoke_script: Script::new(REFRESH_REVOKE),
        }
    }

    fn index_key(&self, lookup_key: &str) -> String {
        format!("{}:key:{}", self.prefix, lookup_key)
    }

    fn record_key(&self, id: RefreshTokenId) -> String {
        format!("{}:record:{}", self.prefix, id)
    }

    fn owner_key(&self, owner: AccountId) -> String {
        format!("{}:owner:{}", self.prefix, owner)
    }

    async fn id_for(&self, lookup_key: &str) -> Result<Option<RefreshTokenId>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(self.index_key(lookup_key))
            .await
            .map_err(transient)
    }

    async fn load(&self, id: RefreshTokenId) -> Result<Option<RefreshTokenRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> = conn
            .hgetall(self.record_key(id))
            .await
            .map_err(transient)?;
        if fields.is_empty() {
            return Ok(None);
        }
        parse_record(id, &fields).map(Some)
    }

    async fn revoke_id(&self, lookup_key: &str, id: RefreshTokenId) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let revoked: i64 = self
            .revoke_script
            .key(self.index_key(lookup_key))
            .key(self.record_key(id))
            .arg(id)
            .arg(Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(transient)?;
        Ok(revoked == 1)
    }
}

fn transient(e: RedisError) -> StoreError {
    StoreError::Transient(e.to_string())
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
    expires_after(now, ttl)
        .ok_or_else(|| StoreError::ConstraintViolation("refresh ttl out of range".into()))
}

fn parse_record(
    id: RefreshTokenId,
    fields: &HashMap<String, String>,
) -> Result<RefreshTokenRecord, StoreError> {
    let field = |name: &str| {
        fields
            .get(name)
            .ok_or_else(|| StoreError::Transient(format!("refresh record {id} lacks {name}")))
    };
    let millis = |name: &str| -> Result<DateTime<Utc>, StoreError> {
        field(name)?
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| StoreError::Transient(format!("refresh record {id} has bad {name}")))
    };

    Ok(RefreshTokenRecord {
        id,
        owner: field("owner")?
            .parse()
            .map_err(|e| StoreError::Transient(format!("refresh record {id} owner: {e}")))?,
        lookup_key: field("lookup_key")?.clone(),
        created_at: millis("created_at_ms")?,
        expires_at: millis("expires_at_ms")?,
        revoked: field("revoked")? == "1",
    })
}

impl ToRedisArgs for AccountId {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        out.write_arg(self.to_string().as_bytes())
    }
}

impl ToRedisArgs for RefreshTokenId {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        out.write_arg(self.to_string().as_bytes())
    }
}

impl FromRedisValue for RefreshTokenId {
    fn from_redis_value(v: &Value) -> RedisResult<Self> {
        let s: String = redis::from_redis_value(v)?;
        s.parse::<RefreshTokenId>().map_err(|e| {
            RedisError::from((
                redis::ErrorKind::TypeError,
                "invalid RefreshTokenId string",
                e.to_string(),
            ))
        })
    }
}

#[async_trait::async_trait]
impl RefreshTokenStore for RedisRefreshTokenStore {
    async fn create(
        &self,
        owner: AccountId,
        ttl: Duration,
    ) -> Result<IssuedRefreshToken, StoreError> {
        let now = Utc::now();
        let expires_at = expiry(now, ttl)?;
        let id = RefreshTokenId::new_v4();
        let secret = RefreshSecret::generate();
        let lookup_key = secret.lookup_key();

        let mut conn = self.conn.clone();
        let status: i64 = self
            .create_script
            .key(self.index_key(&lookup_key))
            .key(self.record_key(id))
            .key(self.owner_key(owner))
            .arg(id)
            .arg(owner)
            .arg(&lookup_key)
            .arg(now.timestamp_millis())
            .arg(expires_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(transient)?;

        match status {
            1 => Ok(IssuedRefreshToken {
                id,
                secret,
                expires_at,
            }),
            _ => Err(StoreError::ConstraintViolation(
                "duplicate refresh lookup key".into(),
            )),
        }
    }

    async fn owner_of(&self, secret: &RefreshSecret) -> Result<Option<AccountId>, StoreError> {
        let Some(id) = self.id_for(&secret.lookup_key()).await? else {
            return Ok(None);
        };
        let now = Utc::now();
        Ok(self
            .load(id)
            .await?
            .filter(|record| record.is_live(now))
            .map(|record| record.owner))
    }

    async fn rotate(
        &self,
        presented: &RefreshSecret,
        ttl: Duration,
    ) -> Result<RotatedRefreshToken, StoreError> {
        let presented_key = presented.lookup_key();
        let id = tokio::time::timeout(self.rotation_timeout, self.id_for(&presented_key))
            .await
            .map_err(|_| {
                StoreError::Timeout(format!(
                    "refresh lookup not answered within {:?}",
                    self.rotation_timeout
                ))
            })??
            .ok_or(StoreError::NotFound)?;

        let now = Utc::now();
        let expires_at = expiry(now, ttl)?;
        let secret = RefreshSecret::generate();

        // The script re-reads the index, so a rotation that slipped in after
        // the GET above makes this one return 0.
        let mut conn = self.conn.clone();
        let (status, owner): (i64, String) = self
            .rotate_script
            .key(self.index_key(&presented_key))
            .key(self.index_key(&secret.lookup_key()))
            .key(self.record_key(id))
            .arg(id)
            .arg(now.timestamp_millis())
            .arg(secret.lookup_key())
            .arg(expires_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(transient)?;

        match status {
            1 => Ok(RotatedRefreshToken {
                id,
                owner: owner
                    .parse()
                    .map_err(|e| StoreError::Transient(format!("refresh record {id} owner: {e}")))?,
                secret,
                expires_at,
            }),
            0 => Err(StoreError::NotFound),
            _ => Err(StoreError::ConstraintViolation(
                "duplicate refresh lookup key".into(),
            )),
        }
    }

    async fn revoke(&self, secret: &RefreshSecret) -> Result<bool, StoreError> {
        let lookup_key = secret.lookup_key();
        match self.id_for(&lookup_key).await? {
            Some(id) => self.revoke_id(&lookup_key, id).await,
            None => Ok(false),
        }
    }

    async fn revoke_all(&self, owner: AccountId) -> Result<u64, StoreError> {
        let mut revoked = 0;
        for record in self.list_by_owner(owner).await? {
            if self.revoke_id(&record.lookup_key, record.id).await? {
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn list_by_owner(
        &self,
        owner: AccountId,
    ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
        let mut conn = self.conn.clone();
        let ids: Vec<RefreshTokenId> = conn
            .smembers(self.owner_key(owner))
            .await
            .map_err(transient)?;

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.load(id).await? {
                records.push(record);
            }
        }
        records.sort_by_key(|record| record.created_at);
        Ok(records)
    }

    /// Records and index keys expire on their own; this only drops owner-set
    /// members whose record is already gone, and reports how many it dropped.
    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let pattern = format!("{}:owner:*", self.prefix);
        let mut cursor: u64 = 0;
        let mut purged = 0;

        loop {
            let (next, owner_keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(transient)?;

            for owner_key in owner_keys {
                let ids: Vec<RefreshTokenId> =
                    conn.smembers(&owner_key).await.map_err(transient)?;
                for id in ids {
                    let exists: bool = conn.exists(self.record_key(id)).await.map_err(transient)?;
                    if !exists {
                        let removed: u64 =
                            conn.srem(&owner_key, id).await.map_err(transient)?;
                        purged += removed;
                    }
                }
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        if purged > 0 {
            debug!(purged, "dropped stale refresh owner entries");
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn record_hash_is_parsed() {
        let id = RefreshTokenId::new_v4();
        let owner = AccountId::new_v4();
        let owner_str = owner.to_string();
        let record = parse_record(
            id,
            &fields(&[
                ("owner", &owner_str),
                ("lookup_key", "abc"),
                ("created_at_ms", "1700000000000"),
                ("expires_at_ms", "1700604800000"),
                ("revoked", "0"),
            ]),
        )
        .unwrap();

        assert_eq!(record.id, id);
        assert_eq!(record.owner, owner);
        assert_eq!(record.lookup_key, "abc");
        assert_eq!(record.created_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(
            record.expires_at - record.created_at,
            chrono::Duration::days(7)
        );
        assert!(!record.revoked);
    }

    #[test]
    fn incomplete_record_hash_is_an_error() {
        let id = RefreshTokenId::new_v4();
        let result = parse_record(id, &fields(&[("owner", "not-a-uuid")]));
        assert!(matches!(result, Err(StoreError::Transient(_))));
    }
}

use super::StoreError;
use crate::domain_model::*;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[async_trait::async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Persist a fresh Active record for `owner` and return its secret.
    async fn create(&self, owner: AccountId, ttl: Duration)
    -> Result<IssuedRefreshToken, StoreError>;

    /// Owner of the live record currently keyed by `secret`, if any. Read only.
    async fn owner_of(&self, secret: &RefreshSecret) -> Result<Option<AccountId>, StoreError>;

    /// Consume `presented` and re-arm the same record under a new secret.
    ///
    /// Lookup, validation and replacement form one atomic unit: of any number
    /// of concurrent calls with the same secret at most one succeeds, and a
    /// failure leaves the record untouched. `NotFound` covers unknown, expired,
    /// revoked and already-rotated secrets alike.
    ///
    /// Adapters that can block (row locks, network round trips) bound only
    /// the steps before their commit point and report `Timeout` when that
    /// bound is hit. A call that reaches its commit point always returns the
    /// committed outcome, however late.
    async fn rotate(
        &self,
        presented: &RefreshSecret,
        ttl: Duration,
    ) -> Result<RotatedRefreshToken, StoreError>;

    /// Mark the live record keyed by `secret` revoked. False if there was none.
    async fn revoke(&self, secret: &RefreshSecret) -> Result<bool, StoreError>;

    /// Revoke every live record of `owner`, returning how many were revoked.
    async fn revoke_all(&self, owner: AccountId) -> Result<u64, StoreError>;

    async fn list_by_owner(&self, owner: AccountId)
    -> Result<Vec<RefreshTokenRecord>, StoreError>;

    /// Delete records whose expiry is at or before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

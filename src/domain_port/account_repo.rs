use super::StoreError;
use crate::domain_model::*;

#[async_trait::async_trait]
pub trait AccountRepo: Send + Sync {
    /// Insert a new account. A taken email is a `ConstraintViolation`.
    async fn create(&self, account: &Account) -> Result<(), StoreError>;

    /// Fetch the full account by its normalised email (for login).
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError>;
}

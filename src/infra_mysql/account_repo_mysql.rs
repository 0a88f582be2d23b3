use super::util::{classify, uuid_from_bytes};
use crate::domain_model::*;
use crate::domain_port::*;
use chrono::{DateTime, Utc};
use sqlx::mysql::MySqlRow;
use sqlx::{MySqlPool, Row};

pub struct MySqlAccountRepo {
    pool: MySqlPool,
}

impl MySqlAccountRepo {
    pub fn new(pool: MySqlPool) -> Self {
        MySqlAccountRepo { pool }
    }

    #[inline]
    fn id_as_bytes(id: &AccountId) -> &[u8] {
        id.0.as_bytes()
    }

    fn row_to_account(row: MySqlRow) -> Result<Account, StoreError> {
        let id_bytes: Vec<u8> = row.try_get("account_id").map_err(classify)?;
        let display_name: String = row.try_get("display_name").map_err(classify)?;
        let email: String = row.try_get("email").map_err(classify)?;
        let password_hash: String = row.try_get("password_hash").map_err(classify)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(classify)?;

        Ok(Account {
            id: AccountId(uuid_from_bytes(&id_bytes)?),
            display_name,
            email,
            password_hash,
            created_at,
        })
    }
}

#[async_trait::async_trait]
impl AccountRepo for MySqlAccountRepo {
    async fn create(&self, account: &Account) -> Result<(), StoreError> {
        sqlx::query(
            r#"
INSERT INTO account (account_id, display_name, email, password_hash, created_at)
VALUES (?, ?, ?, ?, ?)
"#,
        )
        .bind(Self::id_as_bytes(&account.id))
        .bind(&account.display_name)
        .bind(&account.email)
        .bind(&account.password_hash)
        .bind(account.created_at)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT account_id, display_name, email, password_hash, created_at
FROM account
WHERE email = ?
"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        row_opt.map(Self::row_to_account).transpose()
    }

    async fn find_by_id(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row_opt: Option<MySqlRow> = sqlx::query(
            r#"
SELECT account_id, display_name, email, password_hash, created_at
FROM account
WHERE account_id = ?
"#,
        )
        .bind(Self::id_as_bytes(&id))
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?;

        row_opt.map(Self::row_to_account).transpose()
    }
}

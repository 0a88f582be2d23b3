use crate::application_port::{AuthError, CredentialHasher};
use crate::domain_model::*;
use crate::domain_port::AccountRepo;
use crate::logger::*;
use nanoid::nanoid;
use std::sync::Arc;

/// Checks an email/password pair against the account store.
///
/// Unknown email and wrong password are indistinguishable to the caller,
/// both in the error returned and in the hashing work performed.
pub struct CredentialValidator {
    accounts: Arc<dyn AccountRepo>,
    hasher: Arc<dyn CredentialHasher>,
    dummy_hash: String,
}

impl CredentialValidator {
    pub async fn try_new(
        accounts: Arc<dyn AccountRepo>,
        hasher: Arc<dyn CredentialHasher>,
    ) -> Result<Self, AuthError> {
        let dummy_hash = hasher.hash_password(&nanoid!(32)).await?;
        Ok(Self {
            accounts,
            hasher,
            dummy_hash,
        })
    }

    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Account, AuthError> {
        let email = normalize_email(email);

        let Some(account) = self.accounts.find_by_email(&email).await? else {
            // Burn the same verification cost as a real mismatch.
            let _ = self
                .hasher
                .verify_password(password, &self.dummy_hash)
                .await;
            debug!("login rejected: unknown account");
            return Err(AuthError::InvalidCredentials);
        };

        let ok = self
            .hasher
            .verify_password(password, &account.password_hash)
            .await
            .inspect_err(|e| warn!(account_id = %account.id, "password verification failed: {e}"))?;
        if !ok {
            debug!(account_id = %account.id, "login rejected: password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::Argon2PasswordHasher;
    use crate::infra_memory::MemoryAccountRepo;
    use chrono::Utc;

    async fn setup() -> (CredentialValidator, Account) {
        let hasher: Arc<dyn CredentialHasher> =
            Arc::new(Argon2PasswordHasher::with_cost(8, 1, 1).unwrap());
        let repo = Arc::new(MemoryAccountRepo::new());
        let account = Account {
            id: AccountId::new_v4(),
            display_name: "U".to_string(),
            email: "u@x.com".to_string(),
            password_hash: hasher.hash_password("pw").await.unwrap(),
            created_at: Utc::now(),
        };
        repo.create(&account).await.unwrap();
        let validator = CredentialValidator::try_new(repo, hasher).await.unwrap();
        (validator, account)
    }

    #[tokio::test]
    async fn right_password_returns_the_account() {
        let (validator, account) = setup().await;
        let found = validator.authenticate("u@x.com", "pw").await.unwrap();
        assert_eq!(found.id, account.id);
    }

    #[tokio::test]
    async fn email_is_matched_after_normalising() {
        let (validator, account) = setup().await;
        let found = validator.authenticate(" U@X.COM ", "pw").await.unwrap();
        assert_eq!(found.id, account.id);
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let (validator, _) = setup().await;
        for password in ["pw ", "PW", "", "pw2"] {
            assert!(matches!(
                validator.authenticate("u@x.com", password).await,
                Err(AuthError::InvalidCredentials)
            ));
        }
    }

    #[tokio::test]
    async fn unknown_email_is_the_same_error_as_wrong_password() {
        let (validator, _) = setup().await;
        let unknown = validator.authenticate("nobody@x.com", "pw").await.unwrap_err();
        let wrong = validator.authenticate("u@x.com", "nope").await.unwrap_err();
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn corrupt_stored_hash_is_internal_not_a_credential_error() {
        let hasher: Arc<dyn CredentialHasher> =
            Arc::new(Argon2PasswordHasher::with_cost(8, 1, 1).unwrap());
        let repo = Arc::new(MemoryAccountRepo::new());
        repo.create(&Account {
            id: AccountId::new_v4(),
            display_name: "V".to_string(),
            email: "v@x.com".to_string(),
            password_hash: "garbage".to_string(),
            created_at: Utc::now(),
        })
        .await
        .unwrap();
        let validator = CredentialValidator::try_new(repo, hasher).await.unwrap();
        assert!(matches!(
            validator.authenticate("v@x.com", "pw").await,
            Err(AuthError::Internal(_))
        ));
    }
}

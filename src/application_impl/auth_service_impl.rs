use crate::application_impl::{CredentialValidator, SessionAuthenticator};
use crate::application_port::*;
use crate::domain_model::*;
use crate::domain_port::*;
use crate::logger::*;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

const MAX_DISPLAY_NAME_LEN: usize = 64;

#[derive(Debug, Clone)]
pub struct RefreshPolicy {
    pub refresh_ttl: Duration,
}

pub struct RealAuthService {
    accounts: Arc<dyn AccountRepo>,
    credential_hasher: Arc<dyn CredentialHasher>,
    credential_validator: CredentialValidator,
    token_issuer: Arc<dyn TokenIssuer>,
    session_authenticator: SessionAuthenticator,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
    policy: RefreshPolicy,
}

impl RealAuthService {
    pub async fn try_new(
        accounts: Arc<dyn AccountRepo>,
        credential_hasher: Arc<dyn CredentialHasher>,
        token_issuer: Arc<dyn TokenIssuer>,
        refresh_tokens: Arc<dyn RefreshTokenStore>,
        policy: RefreshPolicy,
    ) -> Result<Self, AuthError> {
        let credential_validator =
            CredentialValidator::try_new(accounts.clone(), credential_hasher.clone()).await?;
        let session_authenticator = SessionAuthenticator::new(token_issuer.clone());

        Ok(Self {
            accounts,
            credential_hasher,
            credential_validator,
            token_issuer,
            session_authenticator,
            refresh_tokens,
            policy,
        })
    }

    fn validate_registration(
        display_name: &str,
        email: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        if display_name.is_empty() || display_name.chars().count() > MAX_DISPLAY_NAME_LEN {
            return Err(AuthError::InvalidInput(format!(
                "display name must be 1 to {MAX_DISPLAY_NAME_LEN} characters"
            )));
        }
        match email.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
            _ => return Err(AuthError::InvalidInput("email is not valid".to_string())),
        }
        if password.is_empty() {
            return Err(AuthError::InvalidInput("password is empty".to_string()));
        }
        Ok(())
    }

    fn presented_secret(raw: &str) -> Result<RefreshSecret, AuthError> {
        RefreshSecret::from_presented(raw).ok_or(AuthError::InvalidOrExpiredRefreshToken)
    }
}

#[async_trait::async_trait]
impl AuthService for RealAuthService {
    async fn register(&self, request: RegisterInput) -> Result<AccountId, AuthError> {
        let RegisterInput {
            display_name,
            email,
            password,
        } = request;
        let display_name = display_name.trim().to_string();
        let email = normalize_email(&email);

        Self::validate_registration(&display_name, &email, &password)?;

        let account = Account {
            id: AccountId::new_v4(),
            display_name,
            email,
            password_hash: self.credential_hasher.hash_password(&password).await?,
            created_at: Utc::now(),
        };

        match self.accounts.create(&account).await {
            Ok(()) => {}
            Err(StoreError::ConstraintViolation(_)) => return Err(AuthError::AccountExists),
            Err(e) => return Err(e.into()),
        }

        info!(account_id = %account.id, "account registered");
        Ok(account.id)
    }

    async fn login(&self, request: LoginInput) -> Result<LoginResult, AuthError> {
        let LoginInput { email, password } = request;

        let account = self
            .credential_validator
            .authenticate(&email, &password)
            .await?;

        let session = self.token_issuer.issue(&account)?;
        let refresh = self
            .refresh_tokens
            .create(account.id, self.policy.refresh_ttl)
            .await?;

        info!(account_id = %account.id, refresh_id = %refresh.id, "login succeeded");
        Ok(LoginResult {
            account_id: account.id,
            tokens: SessionTokens {
                session_token: session.token,
                refresh_token: refresh.secret,
                session_expires_at: session.claims.expires_at,
                refresh_expires_at: refresh.expires_at,
            },
        })
    }

    async fn refresh(&self, refresh_token: &str) -> Result<SessionTokens, AuthError> {
        let secret = Self::presented_secret(refresh_token)?;

        // Resolve the account before consuming the secret: once the rotation
        // commits, only signing is left to do.
        let owner = self
            .refresh_tokens
            .owner_of(&secret)
            .await?
            .ok_or(AuthError::InvalidOrExpiredRefreshToken)?;
        let account = self.accounts.find_by_id(owner).await?.ok_or_else(|| {
            warn!(account_id = %owner, "refresh token held by a missing account");
            AuthError::InvalidOrExpiredRefreshToken
        })?;

        // No timeout here: the store bounds its own pre-commit work, and a
        // committed rotation always reaches the caller.
        let rotated = match self
            .refresh_tokens
            .rotate(&secret, self.policy.refresh_ttl)
            .await
        {
            Ok(rotated) => rotated,
            Err(StoreError::NotFound) => {
                debug!(account_id = %owner, "refresh token already consumed");
                return Err(AuthError::InvalidOrExpiredRefreshToken);
            }
            Err(e) => {
                warn!(account_id = %owner, "refresh rotation failed: {e}");
                return Err(e.into());
            }
        };
        if rotated.owner != account.id {
            error!(refresh_id = %rotated.id, "refresh record changed owner during rotation");
            return Err(AuthError::Internal("refresh owner mismatch".to_string()));
        }

        let session = self.token_issuer.issue(&account)?;

        info!(account_id = %account.id, refresh_id = %rotated.id, "refresh token rotated");
        Ok(SessionTokens {
            session_token: session.token,
            refresh_token: rotated.secret,
            session_expires_at: session.claims.expires_at,
            refresh_expires_at: rotated.expires_at,
        })
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let secret = Self::presented_secret(refresh_token)?;
        if !self.refresh_tokens.revoke(&secret).await? {
            return Err(AuthError::InvalidOrExpiredRefreshToken);
        }
        info!("refresh token revoked on logout");
        Ok(())
    }

    async fn logout_all(&self, identity: &Identity) -> Result<u64, AuthError> {
        let revoked = self.refresh_tokens.revoke_all(identity.subject).await?;
        info!(account_id = %identity.subject, revoked, "all refresh tokens revoked");
        Ok(revoked)
    }

    async fn authenticate(&self, authorization: Option<&str>) -> Result<Identity, AuthError> {
        self.session_authenticator.verify(authorization)
    }

    async fn profile(&self, identity: &Identity) -> Result<AccountProfile, AuthError> {
        let account = self
            .accounts
            .find_by_id(identity.subject)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        Ok(AccountProfile::from(&account))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application_impl::{Argon2PasswordHasher, JwtConfig, JwtHs256Issuer};
    use crate::infra_memory::{MemoryAccountRepo, MemoryRefreshTokenStore};
    use chrono::DateTime;
    use std::sync::Mutex;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 60 * 60);

    const LATE_REPLY: Duration = Duration::from_millis(500);

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Fault {
        None,
        TimedOut,
        Fail,
        LateReply,
    }

    /// Delegates to the memory store, except that `rotate` can be made to
    /// time out or fail before touching it, or to answer late after it
    /// committed.
    struct FaultyStore {
        inner: MemoryRefreshTokenStore,
        fault: Mutex<Fault>,
    }

    impl FaultyStore {
        fn new() -> Self {
            Self {
                inner: MemoryRefreshTokenStore::new(),
                fault: Mutex::new(Fault::None),
            }
        }

        fn set(&self, fault: Fault) {
            *self.fault.lock().unwrap() = fault;
        }
    }

    #[async_trait::async_trait]
    impl RefreshTokenStore for FaultyStore {
        async fn create(
            &self,
            owner: AccountId,
            ttl: Duration,
        ) -> Result<IssuedRefreshToken, StoreError> {
            self.inner.create(owner, ttl).await
        }

        async fn owner_of(
            &self,
            secret: &RefreshSecret,
        ) -> Result<Option<AccountId>, StoreError> {
            self.inner.owner_of(secret).await
        }

        async fn rotate(
            &self,
            presented: &RefreshSecret,
            ttl: Duration,
        ) -> Result<RotatedRefreshToken, StoreError> {
            let fault = *self.fault.lock().unwrap();
            match fault {
                Fault::None => self.inner.rotate(presented, ttl).await,
                Fault::TimedOut => Err(StoreError::Timeout("lock wait exceeded".into())),
                Fault::Fail => Err(StoreError::Transient("connection reset".into())),
                Fault::LateReply => {
                    let rotated = self.inner.rotate(presented, ttl).await;
                    tokio::time::sleep(LATE_REPLY).await;
                    rotated
                }
            }
        }

        async fn revoke(&self, secret: &RefreshSecret) -> Result<bool, StoreError> {
            self.inner.revoke(secret).await
        }

        async fn revoke_all(&self, owner: AccountId) -> Result<u64, StoreError> {
            self.inner.revoke_all(owner).await
        }

        async fn list_by_owner(
            &self,
            owner: AccountId,
        ) -> Result<Vec<RefreshTokenRecord>, StoreError> {
            self.inner.list_by_owner(owner).await
        }

        async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.purge_expired(now).await
        }
    }

    async fn service_with(refresh_tokens: Arc<dyn RefreshTokenStore>) -> RealAuthService {
        let issuer: Arc<dyn TokenIssuer> = Arc::new(
            JwtHs256Issuer::new(JwtConfig {
                session_ttl: Duration::from_secs(24 * 60 * 60),
                signing_key: b"0123456789abcdef0123456789abcdef".to_vec(),
            })
            .unwrap(),
        );
        RealAuthService::try_new(
            Arc::new(MemoryAccountRepo::new()),
            Arc::new(Argon2PasswordHasher::with_cost(8, 1, 1).unwrap()),
            issuer,
            refresh_tokens,
            RefreshPolicy { refresh_ttl: WEEK },
        )
        .await
        .unwrap()
    }

    async fn service() -> RealAuthService {
        service_with(Arc::new(MemoryRefreshTokenStore::new())).await
    }

    async fn register_and_login(service: &RealAuthService) -> LoginResult {
        service
            .register(RegisterInput {
                display_name: "U".to_string(),
                email: "u@x.com".to_string(),
                password: "pw".to_string(),
            })
            .await
            .unwrap();
        service
            .login(LoginInput {
                email: "u@x.com".to_string(),
                password: "pw".to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn login_issues_a_usable_session() {
        let service = service().await;
        let login = register_and_login(&service).await;

        let header = format!("Bearer {}", login.tokens.session_token.as_str());
        let identity = service.authenticate(Some(&header)).await.unwrap();
        assert_eq!(identity.subject, login.account_id);
        assert_eq!(identity.name, "U");

        let profile = service.profile(&identity).await.unwrap();
        assert_eq!(profile.email, "u@x.com");
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_bad_input() {
        let service = service().await;
        register_and_login(&service).await;

        let duplicate = service
            .register(RegisterInput {
                display_name: "Other".to_string(),
                email: " U@x.com".to_string(),
                password: "pw".to_string(),
            })
            .await;
        assert!(matches!(duplicate, Err(AuthError::AccountExists)));

        for (name, email, password) in [
            ("", "a@x.com", "pw"),
            ("A", "no-at-sign", "pw"),
            ("A", "@x.com", "pw"),
            ("A", "a@", "pw"),
            ("A", "a@x.com", ""),
        ] {
            let result = service
                .register(RegisterInput {
                    display_name: name.to_string(),
                    email: email.to_string(),
                    password: password.to_string(),
                })
                .await;
            assert!(matches!(result, Err(AuthError::InvalidInput(_))), "{email}");
        }
    }

    #[tokio::test]
    async fn login_failures_do_not_reveal_the_account() {
        let service = service().await;
        register_and_login(&service).await;

        for (email, password) in [("u@x.com", "bad"), ("nobody@x.com", "pw")] {
            let result = service
                .login(LoginInput {
                    email: email.to_string(),
                    password: password.to_string(),
                })
                .await;
            assert!(matches!(result, Err(AuthError::InvalidCredentials)));
        }
    }

    #[tokio::test]
    async fn refresh_rotates_and_kills_the_old_secret() {
        let service = service().await;
        let login = register_and_login(&service).await;
        let old = login.tokens.refresh_token.as_str().to_string();

        let tokens = service.refresh(&old).await.unwrap();
        assert_ne!(tokens.refresh_token.as_str(), old);
        let header = format!("Bearer {}", tokens.session_token.as_str());
        assert_eq!(
            service.authenticate(Some(&header)).await.unwrap().subject,
            login.account_id
        );

        assert!(matches!(
            service.refresh(&old).await,
            Err(AuthError::InvalidOrExpiredRefreshToken)
        ));
        assert!(service.refresh(tokens.refresh_token.as_str()).await.is_ok());
    }

    #[tokio::test]
    async fn blank_or_unknown_refresh_secret_is_rejected() {
        let service = service().await;
        for raw in ["", "   ", "not-a-real-secret"] {
            assert!(matches!(
                service.refresh(raw).await,
                Err(AuthError::InvalidOrExpiredRefreshToken)
            ));
        }
    }

    #[tokio::test]
    async fn logout_revokes_the_secret() {
        let service = service().await;
        let login = register_and_login(&service).await;
        let secret = login.tokens.refresh_token.as_str();

        service.logout(secret).await.unwrap();
        assert!(matches!(
            service.refresh(secret).await,
            Err(AuthError::InvalidOrExpiredRefreshToken)
        ));
        assert!(matches!(
            service.logout(secret).await,
            Err(AuthError::InvalidOrExpiredRefreshToken)
        ));
    }

    #[tokio::test]
    async fn rotation_timeout_is_retryable_and_keeps_the_old_secret() {
        let store = Arc::new(FaultyStore::new());
        let service = service_with(store.clone()).await;
        let login = register_and_login(&service).await;
        let secret = login.tokens.refresh_token.as_str();

        store.set(Fault::TimedOut);
        let err = service.refresh(secret).await.unwrap_err();
        assert!(matches!(err, AuthError::TransactionFailure(_)));
        assert!(err.is_retryable());

        store.set(Fault::None);
        assert!(service.refresh(secret).await.is_ok());
    }

    #[tokio::test]
    async fn slow_reply_after_commit_still_delivers_the_new_secret() {
        let store = Arc::new(FaultyStore::new());
        let service = service_with(store.clone()).await;
        let login = register_and_login(&service).await;
        let old = login.tokens.refresh_token.as_str().to_string();

        store.set(Fault::LateReply);
        let started = std::time::Instant::now();
        let tokens = service.refresh(&old).await.unwrap();
        assert!(started.elapsed() >= LATE_REPLY);
        assert_ne!(tokens.refresh_token.as_str(), old);

        store.set(Fault::None);
        assert!(matches!(
            service.refresh(&old).await,
            Err(AuthError::InvalidOrExpiredRefreshToken)
        ));
        assert!(service.refresh(tokens.refresh_token.as_str()).await.is_ok());
    }

    #[tokio::test]
    async fn logout_all_revokes_every_session_of_the_caller() {
        let service = service().await;
        let first = register_and_login(&service).await;
        let second = service
            .login(LoginInput {
                email: "u@x.com".to_string(),
                password: "pw".to_string(),
            })
            .await
            .unwrap();
        let header = format!("Bearer {}", first.tokens.session_token.as_str());
        let identity = service.authenticate(Some(&header)).await.unwrap();

        assert_eq!(service.logout_all(&identity).await.unwrap(), 2);
        for login in [&first, &second] {
            assert!(matches!(
                service.refresh(login.tokens.refresh_token.as_str()).await,
                Err(AuthError::InvalidOrExpiredRefreshToken)
            ));
        }
        assert_eq!(service.logout_all(&identity).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn store_failure_during_rotation_keeps_the_old_secret() {
        let store = Arc::new(FaultyStore::new());
        let service = service_with(store.clone()).await;
        let login = register_and_login(&service).await;
        let secret = login.tokens.refresh_token.as_str();

        store.set(Fault::Fail);
        let err = service.refresh(secret).await.unwrap_err();
        assert!(matches!(err, AuthError::StoreUnavailable(_)));
        assert!(!err.is_client_error());

        store.set(Fault::None);
        assert!(service.refresh(secret).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refreshes_of_one_secret_have_one_winner() {
        let service = Arc::new(service().await);
        let login = register_and_login(&service).await;
        let secret = login.tokens.refresh_token.as_str().to_string();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = service.clone();
                let secret = secret.clone();
                tokio::spawn(async move { service.refresh(&secret).await })
            })
            .collect();

        let mut ok = 0;
        for result in futures_util::future::join_all(handles).await {
            match result.unwrap() {
                Ok(_) => ok += 1,
                Err(AuthError::InvalidOrExpiredRefreshToken) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
    }
}

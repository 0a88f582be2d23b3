use boxed::application_impl::*;
use boxed::application_port::*;
use boxed::domain_port::*;
use boxed::infra_memory::*;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

async fn auth_service() -> (RealAuthService, Arc<MemoryRefreshTokenStore>) {
    let refresh_tokens = Arc::new(MemoryRefreshTokenStore::new());
    let issuer = JwtHs256Issuer::new(JwtConfig {
        session_ttl: Duration::from_secs(24 * 60 * 60),
        signing_key: b"integration-signing-key-0123456789".to_vec(),
    })
    .unwrap();
    let service = RealAuthService::try_new(
        Arc::new(MemoryAccountRepo::new()),
        Arc::new(Argon2PasswordHasher::with_cost(8, 1, 1).unwrap()),
        Arc::new(issuer),
        refresh_tokens.clone(),
        RefreshPolicy {
            refresh_ttl: Duration::from_secs(7 * 24 * 60 * 60),
        },
    )
    .await
    .unwrap();
    (service, refresh_tokens)
}

#[tokio::test]
async fn register_login_refresh_authenticate() {
    let (service, refresh_tokens) = auth_service().await;

    let account_id = service
        .register(RegisterInput {
            display_name: "U".to_string(),
            email: "u@x.com".to_string(),
            password: "pw".to_string(),
        })
        .await
        .unwrap();

    let login = service
        .login(LoginInput {
            email: "u@x.com".to_string(),
            password: "pw".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(login.account_id, account_id);
    let old_secret = login.tokens.refresh_token.as_str().to_string();

    let rotated = service.refresh(&old_secret).await.unwrap();
    assert_ne!(rotated.refresh_token.as_str(), old_secret);

    let header = format!("Bearer {}", rotated.session_token.as_str());
    let identity = service.authenticate(Some(&header)).await.unwrap();
    assert_eq!(identity.subject, account_id);
    assert_eq!(identity.name, "U");

    let records = refresh_tokens.list_by_owner(account_id).await.unwrap();
    let now = Utc::now();
    assert_eq!(records.iter().filter(|r| r.is_live(now)).count(), 1);
    assert!(rotated.session_expires_at > now);
    assert!(rotated.refresh_expires_at > rotated.session_expires_at);
}

#[tokio::test]
async fn logout_all_ends_every_session_of_the_account() {
    let (service, refresh_tokens) = auth_service().await;
    let account_id = service
        .register(RegisterInput {
            display_name: "U".to_string(),
            email: "u@x.com".to_string(),
            password: "pw".to_string(),
        })
        .await
        .unwrap();

    let mut secrets = Vec::new();
    let mut session = None;
    for _ in 0..3 {
        let login = service
            .login(LoginInput {
                email: "u@x.com".to_string(),
                password: "pw".to_string(),
            })
            .await
            .unwrap();
        secrets.push(login.tokens.refresh_token.as_str().to_string());
        session = Some(login.tokens.session_token);
    }
    let header = format!("Bearer {}", session.unwrap().as_str());
    let identity = service.authenticate(Some(&header)).await.unwrap();

    assert_eq!(service.logout_all(&identity).await.unwrap(), 3);
    let records = refresh_tokens.list_by_owner(account_id).await.unwrap();
    assert!(records.iter().all(|r| r.revoked));
    for secret in secrets {
        assert!(matches!(
            service.refresh(&secret).await,
            Err(AuthError::InvalidOrExpiredRefreshToken)
        ));
    }
}

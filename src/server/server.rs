use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_port::*;
use crate::infra_memory::*;
use crate::infra_mysql::*;
use crate::infra_redis::*;
use crate::logger::*;
use crate::server::Janitor;
use crate::settings::{AccountBackend, RefreshBackend, Settings};
use sqlx::{MySql, Pool};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Server {
    pub auth_service: Arc<dyn AuthService>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    janitor_handle: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
    pool: Option<Pool<MySql>>,
}

impl Server {
    pub async fn try_new(settings: &Settings) -> anyhow::Result<Self> {
        let store = &settings.store;

        let pool = match (&store.mysql_dsn, store.needs_mysql()) {
            (Some(dsn), true) => Some(Pool::<MySql>::connect(dsn.expose()).await?),
            (None, true) => return Err(anyhow::anyhow!("mysql backend selected without a dsn")),
            (_, false) => None,
        };
        let mysql_pool = || {
            pool.clone()
                .ok_or_else(|| anyhow::anyhow!("mysql pool is not configured"))
        };

        let accounts: Arc<dyn AccountRepo> = match store.accounts {
            AccountBackend::Memory => Arc::new(MemoryAccountRepo::new()),
            AccountBackend::Mysql => Arc::new(MySqlAccountRepo::new(mysql_pool()?)),
        };

        let refresh_tokens: Arc<dyn RefreshTokenStore> = match store.refresh_tokens {
            RefreshBackend::Memory => Arc::new(MemoryRefreshTokenStore::new()),
            RefreshBackend::Mysql => Arc::new(MySqlRefreshTokenStore::new(
                mysql_pool()?,
                settings.auth.rotation_timeout(),
            )),
            RefreshBackend::Redis => {
                let dsn = store
                    .redis_dsn
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("redis backend selected without a dsn"))?;
                let redis_client = redis::Client::open(dsn.expose())?;
                let redis_manager = redis_client.get_connection_manager().await?;
                Arc::new(RedisRefreshTokenStore::new(
                    redis_manager,
                    store.redis_prefix.clone(),
                    settings.auth.rotation_timeout(),
                ))
            }
        };
        info!(accounts = ?store.accounts, refresh_tokens = ?store.refresh_tokens, "stores ready");

        let cost = &settings.auth.argon2;
        let credential_hasher: Arc<dyn CredentialHasher> = Arc::new(
            Argon2PasswordHasher::with_cost(cost.memory_kib, cost.iterations, cost.parallelism)?,
        );
        let token_issuer: Arc<dyn TokenIssuer> = Arc::new(JwtHs256Issuer::new(JwtConfig {
            session_ttl: settings.auth.session_ttl(),
            signing_key: settings.auth.signing_secret.expose().as_bytes().to_vec(),
        })?);

        let auth_service: Arc<dyn AuthService> = Arc::new(
            RealAuthService::try_new(
                accounts,
                credential_hasher,
                token_issuer,
                refresh_tokens.clone(),
                RefreshPolicy {
                    refresh_ttl: settings.auth.refresh_ttl(),
                },
            )
            .await?,
        );

        let cancel = CancellationToken::new();
        let janitor = Janitor::new(
            refresh_tokens.clone(),
            store.purge_interval(),
            cancel.clone(),
        );
        let janitor_handle = tokio::spawn(async move {
            janitor.run().await;
        });

        info!("server started");

        Ok(Self {
            auth_service,
            refresh_tokens,
            janitor_handle: Mutex::new(Some(janitor_handle)),
            cancel,
            pool,
        })
    }

    pub async fn shutdown(&self) {
        info!("server shutting down...");
        self.cancel.cancel();

        let handle = match self.janitor_handle.lock() {
            Ok(mut lock) => lock.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            let r = handle.await;
            info!("janitor handle dropped: {:?}", r);
        }

        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }
}

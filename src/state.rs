use std::sync::Arc;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::{SessionService, TokenVerifier},
    auth::oidc::OidcClient,
    auth::roles::RoleCache,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
};

type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub sessions: SessionService,
    pub verifier: Arc<TokenVerifier>,
    pub oidc: Option<Arc<OidcClient>>,
    pub roles: RoleCache,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        sessions: SessionService,
        verifier: TokenVerifier,
        oidc: Option<OidcClient>,
        roles: RoleCache,
    ) -> Self {
        Self {
            pool,
            config: Arc::new(config),
            sessions,
            verifier: Arc::new(verifier),
            oidc: oidc.map(Arc::new),
            roles,
        }
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool
            .get()
            .map_err(|err| AppError::internal(format!("database pool error: {err}")))
    }
}

use std::sync::Arc;

use axum::Router;
use bridgesync_connectors::{CrmAuthenticator, FinanceAuthenticator, SessionCache};
use bridgesync_core::config::{AppConfig, ConfigError};
use bridgesync_core::errors::SyncError;
use bridgesync_core::{EntityMappingStore, SystemType};
use bridgesync_db::{connect_from_config, migrations, DbPool, SqlEntityMappingRepository};
use thiserror::Error;
use tracing::{info, warn};

use crate::health::{self, HealthState, UpstreamProbe};
use crate::ingress::{self, IngressState};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub crm_session: Arc<SessionCache<CrmAuthenticator>>,
    pub finance_session: Arc<SessionCache<FinanceAuthenticator>>,
    pub ingress: IngressState,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("upstream connector setup failed: {0}")]
    Connector(#[source] SyncError),
}

impl Application {
    pub fn router(&self) -> Router {
        let crm: Arc<dyn UpstreamProbe> = self.crm_session.clone();
        let finance: Arc<dyn UpstreamProbe> = self.finance_session.clone();

        health::router(HealthState::new(self.db_pool.clone(), vec![crm, finance]))
            .merge(ingress::router(self.ingress.clone()))
    }
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_from_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let probe_timeout = config.sync.probe_timeout();
    let crm = CrmAuthenticator::new(config.crm.clone(), &config.sync)
        .map_err(BootstrapError::Connector)?;
    let finance = FinanceAuthenticator::new(config.finance.clone(), &config.sync)
        .map_err(BootstrapError::Connector)?;
    warn_on_missing_credentials(&config);

    let store: Arc<dyn EntityMappingStore> =
        Arc::new(SqlEntityMappingRepository::new(db_pool.clone()));
    let ingress = IngressState::from_config(&config, store);

    Ok(Application {
        crm_session: Arc::new(SessionCache::with_probe_timeout(crm, probe_timeout)),
        finance_session: Arc::new(SessionCache::with_probe_timeout(finance, probe_timeout)),
        ingress,
        db_pool,
        config,
    })
}

fn warn_on_missing_credentials(config: &AppConfig) {
    let present = [
        (SystemType::Crm, config.crm.username.is_some() && config.crm.password.is_some()),
        (
            SystemType::Finance,
            config.finance.username.is_some() && config.finance.password.is_some(),
        ),
    ];

    for (system, has_credentials) in present {
        if !has_credentials {
            warn!(
                event_name = "system.bootstrap.credentials_missing",
                correlation_id = "bootstrap",
                system = %system,
                "upstream credentials are not configured; logins will fail until they are set"
            );
        }
        if config.webhook_secret(system).is_none() {
            warn!(
                event_name = "system.bootstrap.webhook_secret_missing",
                correlation_id = "bootstrap",
                system = %system,
                webhook_mode = ?config.sync.webhook_mode,
                "webhook secret is not configured"
            );
        }
    }
}

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{info, warn};

use crate::{
    config::AppConfig,
    journal::{AnalysisEngine, JournalService, PgEntryStore},
    llm::LlmClient,
};

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    journal: JournalService,
}

impl AppState {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        let store = Arc::new(PgEntryStore::new(pool.clone()));
        let engine = AnalysisEngine::new(
            store.clone(),
            Arc::new(LlmClient::from_env()),
            config.analysis.clone(),
        );

        if engine.is_available() {
            info!(model = %config.analysis.model, "journal analysis enabled");
        } else {
            warn!(
                model = %config.analysis.model,
                "no API key for the journal analysis model; entries stay unprocessed until one is configured"
            );
        }

        Ok(Self {
            pool,
            journal: JournalService::new(store, engine),
        })
    }

    pub fn pool_ref(&self) -> &PgPool {
        &self.pool
    }

    pub fn journal(&self) -> &JournalService {
        &self.journal
    }
}

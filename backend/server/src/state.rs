use std::{sync::Arc, time::Duration};

use bank::models::User;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::{
    config::Config,
    database::init_database,
    error::AppError,
    hub::Hub,
    otp::{CodeStore, MemoryCodes, RedisCodes, init_redis},
    search::LawyerIndex,
    users::list_lawyers,
};

pub struct AppState {
    pub config: Config,
    pub db: SqlitePool,
    pub codes: Arc<dyn CodeStore>,
    pub lawyer_index: Option<LawyerIndex>,
    pub hub: Hub,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Arc<Self>, AppError> {
        let db = init_database(&config.database_url, config.database_max_connections).await?;

        let ttl = Duration::from_secs(config.otp_ttl_secs);
        let codes: Arc<dyn CodeStore> = match config.redis_url.as_deref() {
            Some(redis_url) => {
                let connection = init_redis(redis_url).await?;
                info!("OTP codes stored in Redis");
                Arc::new(RedisCodes::new(connection, ttl, config.otp_max_attempts))
            }
            None => {
                warn!("REDIS_URL not set, OTP codes kept in process memory");
                Arc::new(MemoryCodes::new(ttl, config.otp_max_attempts))
            }
        };

        let lawyer_index = match config.meili_url.as_deref() {
            Some(meili_url) => {
                let index = LawyerIndex::init(meili_url, config.meili_key.as_deref()).await?;
                index.sync_all(&list_lawyers(&db, i64::MAX).await?).await?;
                Some(index)
            }
            None => None,
        };

        Ok(Arc::new(Self {
            config,
            db,
            codes,
            lawyer_index,
            hub: Hub::new(),
        }))
    }

    /// Pushes a lawyer profile change to the search index, if one is configured.
    pub async fn reindex(&self, user: &User) {
        if let Some(index) = &self.lawyer_index {
            index.upsert(user).await;
        }
    }
}

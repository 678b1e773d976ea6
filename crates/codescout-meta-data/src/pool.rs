//! Connection pool construction

use codescout_config::DatabaseConfig;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

use crate::error::{MetaDataError, MetaDataResult};

/// Create the shared connection pool.
///
/// Advisory locks do not use this pool; they detach dedicated
/// connections so a dropped lock guard closes its session.
///
/// # Errors
///
/// Returns [`MetaDataError::Connection`] if the pool cannot connect.
pub async fn create_pool(config: &DatabaseConfig) -> MetaDataResult<PgPool> {
    let options = config.connect_options().application_name("codescout");

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.timeout_seconds))
        .connect_with(options)
        .await
        .map_err(|e| {
            MetaDataError::Connection(format!(
                "Failed to connect to {}: {e}",
                config.safe_connection_string()
            ))
        })
}

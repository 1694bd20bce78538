pub mod config;

use crate::core::Result;
use crate::storage::RedisStore;
use config::StoreConfig;
use tracing::info;

/// Validate `config` and open a redis-backed store.
pub async fn connect(config: &StoreConfig) -> Result<RedisStore> {
    config.validate()?;
    info!(url = %config.redacted_url(), "connecting to sample store");
    RedisStore::connect(&config.url).await
}

//! Redis-backed miss resolver for the label cache.

use std::sync::Weak;

use async_trait::async_trait;
use deadpool_redis::{redis, Config, Pool, PoolConfig, Runtime};
use tracing::debug;

use bumsniff_core::cache::Resolve;
use bumsniff_core::label::{LabelCache, LabelContext};

/// Upper bound on concurrent connections to the label store.
const POOL_MAX_SIZE: usize = 4;

/// Resolves unknown VPLS labels from the provisioning store: a Redis hash
/// under `label:<decimal>` with `Domain` and `Remote` fields. Successful
/// lookups are written back to the cache at the default TTL; every failure
/// mode degrades to a miss.
pub struct RedisLabelResolver {
    pool: Pool,
    cache: Weak<LabelCache>,
}

impl RedisLabelResolver {
    /// Build the connection pool. Connections are dialed lazily, so an
    /// unreachable store degrades lookups to misses rather than failing
    /// startup.
    pub fn new(url: &str, cache: Weak<LabelCache>) -> Result<Self, deadpool_redis::CreatePoolError> {
        let mut config = Config::from_url(url);
        config.pool = Some(PoolConfig::new(POOL_MAX_SIZE));
        let pool = config.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool, cache })
    }
}

#[async_trait]
impl Resolve<u32, LabelContext> for RedisLabelResolver {
    async fn resolve(&self, label: &u32) -> Option<LabelContext> {
        let mut conn = match self.pool.get().await {
            Ok(conn) => conn,
            Err(err) => {
                debug!(label = *label, error = %err, "label store unavailable");
                return None;
            }
        };

        let key = format!("label:{}", label);
        let fields: Result<(Option<String>, Option<String>), _> = redis::cmd("HMGET")
            .arg(&key)
            .arg("Domain")
            .arg("Remote")
            .query_async(&mut conn)
            .await;

        let (domain, remote) = match fields {
            Ok((Some(domain), Some(remote))) => (domain, remote),
            // The label is not provisioned, or the hash is incomplete.
            Ok(_) => return None,
            Err(err) => {
                debug!(label = *label, error = %err, "label lookup failed");
                return None;
            }
        };

        let context = LabelContext { domain, remote };
        if let Some(cache) = self.cache.upgrade() {
            cache.set(*label, context.clone());
        }
        Some(context)
    }
}

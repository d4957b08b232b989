mod cursor;

pub use cursor::RedisCursor;

use async_trait::async_trait;
use deadpool_redis::redis::{self, AsyncCommands, FromRedisValue, Pipeline};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, PoolError, Runtime};
use sha2::{Digest, Sha384};
use shortcut_core::link::{format_timestamp, parse_timestamp};
use shortcut_core::{Link, LinkBackend, LinkName, LinkPage, Result, StoreError};
use std::collections::HashMap;
use tracing::{debug, trace, warn};
use typed_builder::TypedBuilder;

pub const DEFAULT_PREFIX: &str = "shortcut:";

const FIELD_NAME: &str = "name";
const FIELD_URL: &str = "url";
const FIELD_UPDATED_AT: &str = "updated_at";

#[derive(Debug, Clone, TypedBuilder)]
pub struct RedisBackendConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`.
    #[builder(setter(into))]
    pub url: String,
    /// Prefix for every key this backend writes.
    #[builder(default = DEFAULT_PREFIX.to_string(), setter(into))]
    pub prefix: String,
    /// Maximum number of pooled connections.
    #[builder(default = 16)]
    pub pool_size: usize,
}

/// Redis implementation of [`LinkBackend`].
///
/// Layout, under a configurable prefix:
/// - `link:{name}`: hash with `name`, `url`, `updated_at`
/// - `links`: sorted set of every name, scored by update time (ms)
/// - `url:{sha384(url)}`: sorted set of the names pointing at one URL
///
/// Writes are optimistic transactions (`WATCH`, read, `MULTI`/`EXEC`) on a
/// single pooled connection. A transaction that loses a race is reported
/// as [`StoreError::Conflict`] and is not retried here.
#[derive(Clone)]
pub struct RedisBackend {
    pool: Pool,
    prefix: String,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn map_redis_error(operation: &str, err: redis::RedisError) -> StoreError {
    let message = format!("{operation}: {err}");
    if err.is_timeout() {
        StoreError::Timeout(message)
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Unavailable(message)
    } else {
        StoreError::Operation(message)
    }
}

fn map_pool_error(operation: &str, err: PoolError) -> StoreError {
    let message = format!("{operation}: {err}");
    if message.to_ascii_lowercase().contains("timed out") {
        StoreError::Timeout(message)
    } else {
        StoreError::Unavailable(message)
    }
}

impl RedisBackend {
    /// Creates a backend with its own connection pool.
    ///
    /// Connections are opened lazily, so this does not touch the network.
    pub fn new(config: RedisBackendConfig) -> Result<Self> {
        let mut pool_config = Config::from_url(config.url);
        pool_config.pool = Some(PoolConfig::new(config.pool_size));
        let pool = pool_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::Unavailable(format!("failed to create redis pool: {e}")))?;
        Ok(Self::from_pool(pool, config.prefix))
    }

    /// Creates a backend over an existing pool.
    pub fn from_pool(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn conn(&self) -> Result<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| map_pool_error("failed to get redis connection", e))
    }

    fn link_key(&self, name: &str) -> String {
        format!("{}link:{}", self.prefix, name)
    }

    fn links_key(&self) -> String {
        format!("{}links", self.prefix)
    }

    /// URLs are hashed so arbitrary URL text never ends up inside a key.
    fn url_key(&self, url: &str) -> String {
        format!("{}url:{:x}", self.prefix, Sha384::digest(url.as_bytes()))
    }

    async fn watch(&self, keys: &[&str]) -> Result<Watch> {
        Watch::begin(self.conn().await?, keys).await
    }

    /// Writes `link` inside `tx`, which must already watch the link's key.
    async fn put_watched(&self, mut tx: Watch, link: &Link, create_only: bool) -> Result<()> {
        let updated_at = link.stamped_at()?;
        let score = updated_at.as_millisecond();
        let name = link.name().as_str();
        let key = self.link_key(name);
        trace!(name = %name, create_only, "Writing link to Redis");

        let old_url: Option<String> = tx.read(redis::cmd("HGET").arg(&key).arg(FIELD_URL)).await?;

        if create_only && old_url.is_some() {
            tx.abort().await;
            debug!(name = %name, "Link already exists");
            return Err(StoreError::Conflict(name.to_string()));
        }

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(&key)
            .ignore()
            .hset_multiple(
                &key,
                &[
                    (FIELD_NAME, name.to_string()),
                    (FIELD_URL, link.url().to_string()),
                    (FIELD_UPDATED_AT, format_timestamp(updated_at)),
                ],
            )
            .ignore()
            .zadd(self.links_key(), name, score)
            .ignore();
        if let Some(old_url) = old_url.filter(|old| old != link.url()) {
            pipe.zrem(self.url_key(&old_url), name).ignore();
        }
        pipe.zadd(self.url_key(link.url()), name, score).ignore();

        if !tx.commit(&pipe).await? {
            debug!(name = %name, "Concurrent write won the race");
            return Err(StoreError::Conflict(name.to_string()));
        }
        Ok(())
    }
}

/// An open optimistic transaction on one pooled connection.
///
/// Dropping an unfinished `Watch` detaches its connection from the pool so
/// a stale `WATCH` never leaks into another caller's transaction.
struct Watch {
    conn: Option<Connection>,
}

impl Watch {
    async fn begin(mut conn: Connection, keys: &[&str]) -> Result<Self> {
        let _: () = redis::cmd("WATCH")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("failed to watch keys", e))?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut Connection> {
        self.conn
            .as_mut()
            .ok_or_else(|| StoreError::Operation("transaction already finished".to_string()))
    }

    async fn read<T: FromRedisValue>(&mut self, cmd: &redis::Cmd) -> Result<T> {
        let conn = self.conn()?;
        cmd.query_async(conn)
            .await
            .map_err(|e| map_redis_error("failed to read watched key", e))
    }

    /// Ends the transaction without writing.
    async fn abort(mut self) {
        if let Some(mut conn) = self.conn.take() {
            let unwatched: redis::RedisResult<()> =
                redis::cmd("UNWATCH").query_async(&mut conn).await;
            if let Err(e) = unwatched {
                warn!(error = %e, "Failed to unwatch, discarding connection");
                drop(Connection::take(conn));
            }
        }
    }

    /// Executes `pipe` as `MULTI`/`EXEC`.
    ///
    /// Returns `false` if a watched key changed and nothing was written.
    async fn commit(mut self, pipe: &Pipeline) -> Result<bool> {
        let conn = self.conn()?;
        let outcome: Option<()> = pipe
            .query_async(conn)
            .await
            .map_err(|e| map_redis_error("failed to execute transaction", e))?;
        // EXEC clears every watch, so the connection can go back to the pool.
        self.conn.take();
        Ok(outcome.is_some())
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(Connection::take(conn));
        }
    }
}

fn hash_to_link(name: &LinkName, mut fields: HashMap<String, String>) -> Result<Link> {
    let invalid = |what: &str| StoreError::InvalidData(format!("link '{name}': {what}"));

    let url = fields.remove(FIELD_URL).ok_or_else(|| invalid("missing url"))?;
    let updated_at = fields
        .remove(FIELD_UPDATED_AT)
        .map(|raw| parse_timestamp(&raw))
        .transpose()
        .map_err(|e| invalid(&format!("bad updated_at: {e}")))?;

    Link::with_name(name.clone(), url)
        .map(|link| link.with_updated_at(updated_at))
        .map_err(|e| invalid(&e.to_string()))
}

#[async_trait]
impl LinkBackend for RedisBackend {
    async fn put_link(&self, link: &Link, create_only: bool) -> Result<()> {
        let tx = self.watch(&[&self.link_key(link.name().as_str())]).await?;
        self.put_watched(tx, link, create_only).await
    }

    async fn get_link(&self, name: &LinkName) -> Result<Option<Link>> {
        trace!(name = %name, "Fetching link from Redis");
        let mut conn = self.conn().await?;
        let fields: HashMap<String, String> = conn
            .hgetall(self.link_key(name.as_str()))
            .await
            .map_err(|e| map_redis_error("failed to fetch link", e))?;

        if fields.is_empty() {
            return Ok(None);
        }
        hash_to_link(name, fields).map(Some)
    }

    async fn delete_link(&self, name: &LinkName) -> Result<()> {
        let key = self.link_key(name.as_str());
        trace!(name = %name, "Deleting link from Redis");

        let mut tx = self.watch(&[&key]).await?;
        let url: Option<String> = tx.read(redis::cmd("HGET").arg(&key).arg(FIELD_URL)).await?;
        let Some(url) = url else {
            tx.abort().await;
            return Ok(());
        };

        let mut pipe = redis::pipe();
        pipe.atomic()
            .zrem(self.links_key(), name.as_str())
            .ignore()
            .zrem(self.url_key(&url), name.as_str())
            .ignore()
            .del(&key)
            .ignore();

        if !tx.commit(&pipe).await? {
            debug!(name = %name, "Concurrent write won the race");
            return Err(StoreError::Conflict(name.to_string()));
        }
        Ok(())
    }

    async fn rename_link(&self, link: &Link, new_name: &LinkName) -> Result<()> {
        let old_name = link.name().as_str();
        let old_key = self.link_key(old_name);
        let new_key = self.link_key(new_name.as_str());
        let links_key = self.links_key();
        trace!(name = %old_name, new_name = %new_name, "Renaming link in Redis");

        let mut tx = self.watch(&[&old_key, &new_key]).await?;
        let (url, updated_at): (Option<String>, Option<String>) = tx
            .read(
                redis::cmd("HMGET")
                    .arg(&old_key)
                    .arg(FIELD_URL)
                    .arg(FIELD_UPDATED_AT),
            )
            .await?;
        let Some(url) = url else {
            tx.abort().await;
            return Err(StoreError::NotFound(old_name.to_string()));
        };

        let taken: bool = tx.read(redis::cmd("EXISTS").arg(&new_key)).await?;
        if taken {
            tx.abort().await;
            debug!(name = %old_name, new_name = %new_name, "Rename destination exists");
            return Err(StoreError::Conflict(new_name.to_string()));
        }

        let url_key = self.url_key(&url);
        let links_score: Option<f64> = tx
            .read(redis::cmd("ZSCORE").arg(&links_key).arg(old_name))
            .await?;
        let url_score: Option<f64> = tx
            .read(redis::cmd("ZSCORE").arg(&url_key).arg(old_name))
            .await?;
        let stamped = updated_at
            .as_deref()
            .and_then(|raw| parse_timestamp(raw).ok())
            .map(|ts| ts.as_millisecond() as f64);
        let Some(score) = links_score.or(url_score).or(stamped) else {
            tx.abort().await;
            return Err(StoreError::InvalidData(format!(
                "link '{old_name}' has no recency score"
            )));
        };

        let mut pipe = redis::pipe();
        pipe.atomic()
            .rename(&old_key, &new_key)
            .ignore()
            .hset(&new_key, FIELD_NAME, new_name.as_str())
            .ignore()
            .zrem(&links_key, old_name)
            .ignore()
            .zadd(&links_key, new_name.as_str(), links_score.unwrap_or(score))
            .ignore()
            .zrem(&url_key, old_name)
            .ignore()
            .zadd(&url_key, new_name.as_str(), url_score.unwrap_or(score))
            .ignore();

        if !tx.commit(&pipe).await? {
            debug!(name = %old_name, "Concurrent write won the race");
            return Err(StoreError::Conflict(old_name.to_string()));
        }
        Ok(())
    }

    async fn list_links_by_url(&self, url: &str) -> Result<Vec<LinkName>> {
        let mut conn = self.conn().await?;
        let names: Vec<String> = conn
            .zrevrangebyscore(self.url_key(url), "+inf", "-inf")
            .await
            .map_err(|e| map_redis_error("failed to list links by url", e))?;
        Ok(names.into_iter().map(LinkName::new_unchecked).collect())
    }

    async fn list_links(&self, token: Option<&str>, limit: usize) -> Result<LinkPage> {
        let cursor = token.map(str::parse::<RedisCursor>).transpose()?;
        // Resume at the cursor's score inclusive; ties already returned are
        // skipped below.
        let max = cursor
            .as_ref()
            .map_or_else(|| "+inf".to_string(), |c| c.score.to_string());
        let count = isize::try_from(limit).unwrap_or(isize::MAX);
        let links_key = self.links_key();

        let mut conn = self.conn().await?;
        let mut names = Vec::new();
        let mut last = None;
        let mut offset: isize = 0;
        loop {
            let batch: Vec<(String, f64)> = conn
                .zrevrangebyscore_limit_withscores(&links_key, &max, "-inf", offset, count)
                .await
                .map_err(|e| map_redis_error("failed to list links", e))?;
            let fetched = batch.len();

            for (name, score) in batch {
                let score = score as i64;
                if cursor.as_ref().is_some_and(|c| c.covers(score, &name)) {
                    continue;
                }
                let name = LinkName::new_unchecked(name);
                last = Some(RedisCursor::new(score, name.clone()));
                names.push(name);
                if names.len() == limit {
                    break;
                }
            }

            if names.len() == limit || fetched < limit {
                break;
            }
            offset = offset.saturating_add(count);
        }

        let next_token = if names.len() == limit {
            last.map(|c| c.to_string())
        } else {
            None
        };
        Ok(LinkPage { names, next_token })
    }
}

//! Redis store instance.

use std::time::Duration;

use flow_lock_core::error::{LockError, LockResult, StoreError};
use flow_lock_core::traits::{DeleteOutcome, LockStore};
use fred::prelude::*;
use fred::types::{CustomCommand, ReconnectPolicy};
use tracing::instrument;

/// Lua script to release the lock.
///
/// Returns 1 when our token was deleted, 0 when the key is gone, and -1 when
/// another token holds the key.
const RELEASE_SCRIPT_LUA: &str = r#"
    local current = redis.call('get', KEYS[1])
    if current == ARGV[1] then
        return redis.call('del', KEYS[1])
    elseif current == false then
        return 0
    end
    return -1
"#;

/// Reconnect forever, backing off exponentially from 100ms up to 10s.
pub fn default_reconnect_policy() -> ReconnectPolicy {
    ReconnectPolicy::new_exponential(0, 100, 10_000, 2)
}

/// One Redis server used as an independent lock store instance.
#[derive(Clone)]
pub struct RedisStore {
    client: RedisClient,
}

impl RedisStore {
    /// Wraps an existing client. The client should already be connected.
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    /// Connects to the server at `url`, optionally overriding the password.
    ///
    /// Uses [`default_reconnect_policy`] and waits for the first connection.
    pub async fn connect(url: &str, password: Option<&str>) -> LockResult<Self> {
        let store = Self::open(url, password, default_reconnect_policy())?;
        store
            .wait_connected()
            .await
            .map_err(LockError::StoreUnavailable)?;
        Ok(store)
    }

    /// Starts connecting to the server at `url` without waiting.
    ///
    /// The client keeps reconnecting under `policy` for its whole life, so an
    /// instance that is down now rejoins the quorum once it comes back.
    /// Must be called from within a Tokio runtime.
    pub fn open(url: &str, password: Option<&str>, policy: ReconnectPolicy) -> LockResult<Self> {
        let mut config = RedisConfig::from_url(url)
            .map_err(|e| LockError::InvalidConfig(format!("invalid Redis URL {url}: {e}")))?;
        if let Some(password) = password {
            config.password = Some(password.to_string());
        }

        let client = RedisClient::new(config, None, None, Some(policy));
        client.connect();
        Ok(Self { client })
    }

    /// Waits for the outcome of the client's current connection attempt.
    pub async fn wait_connected(&self) -> Result<(), StoreError> {
        self.client
            .wait_for_connect()
            .await
            .map_err(map_redis_error)
    }

    /// The underlying client.
    pub fn client(&self) -> &RedisClient {
        &self.client
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("client", &self.client.id())
            .finish()
    }
}

impl LockStore for RedisStore {
    #[instrument(skip(self, value), fields(backend = "redis", client = %self.client.id()), level = "trace")]
    async fn try_set(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let ttl_millis = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX).max(1);

        // SET NX PX returns OK when the key was set and nil when it already exists
        let result: Option<String> = self
            .client
            .set(
                key,
                value,
                Some(Expiration::PX(ttl_millis)),
                Some(SetOptions::NX),
                false,
            )
            .await
            .map_err(map_redis_error)?;

        Ok(result.is_some())
    }

    #[instrument(skip(self, expected), fields(backend = "redis", client = %self.client.id()), level = "trace")]
    async fn try_delete(&self, key: &str, expected: &str) -> Result<DeleteOutcome, StoreError> {
        let args: Vec<RedisValue> = vec![
            RELEASE_SCRIPT_LUA.into(),
            1_i64.into(), // numkeys
            key.into(),
            expected.into(),
        ];

        let cmd = CustomCommand::new_static("EVAL", None, false);
        let result: i64 = self
            .client
            .custom(cmd, args)
            .await
            .map_err(map_redis_error)?;

        Ok(match result {
            1 => DeleteOutcome::Deleted,
            0 => DeleteOutcome::Absent,
            _ => DeleteOutcome::Mismatch,
        })
    }
}

/// Maps a client error onto the store error taxonomy.
pub(crate) fn map_redis_error(error: RedisError) -> StoreError {
    match error.kind() {
        RedisErrorKind::Auth => StoreError::AuthFailed(error.details().to_string()),
        // Command timeouts carry no duration of their own
        RedisErrorKind::IO | RedisErrorKind::Canceled | RedisErrorKind::Timeout => {
            StoreError::Unreachable(error.to_string())
        }
        _ => StoreError::Backend(Box::new(error)),
    }
}

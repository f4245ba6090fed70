//! Redis-backed coordination store
//!
//! - create-if-absent: `SET NX PX`, falling back to `GET` in the same script
//! - compare-and-swap / compare-and-delete: Lua scripts, atomic on the server
//!
//! Keyspace notifications are an optional server setting, so `watch` is not
//! offered and passive nodes poll.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Script, Value};
use tracing::info;

use crate::{CoordinationStore, CreateOutcome, DeleteOutcome, Result, StoreError, SwapOutcome};

const CREATE_SCRIPT: &str = r#"
    if redis.call("SET", KEYS[1], ARGV[1], "NX", "PX", ARGV[2]) then
        return 1
    end
    return redis.call("GET", KEYS[1])
"#;

const SWAP_SCRIPT: &str = r#"
    local current = redis.call("GET", KEYS[1])
    if not current then
        return 0
    end
    if current == ARGV[1] then
        redis.call("SET", KEYS[1], ARGV[2], "PX", ARGV[3])
        return 1
    end
    return current
"#;

const DELETE_SCRIPT: &str = r#"
    local current = redis.call("GET", KEYS[1])
    if not current then
        return 0
    end
    if current == ARGV[1] then
        redis.call("DEL", KEYS[1])
        return 1
    end
    return 2
"#;

pub struct RedisStore {
    conn: ConnectionManager,
    create: Script,
    swap: Script,
    delete: Script,
}

impl RedisStore {
    /// Connect to the Redis server at `address` (a `redis://` URL)
    pub async fn connect(address: &str) -> Result<Self> {
        let client = redis::Client::open(address)
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let conn = ConnectionManager::new(client).await?;
        info!(address, "Connected to Redis coordination store");

        Ok(Self {
            conn,
            create: Script::new(CREATE_SCRIPT),
            swap: Script::new(SWAP_SCRIPT),
            delete: Script::new(DELETE_SCRIPT),
        })
    }
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn create_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<CreateOutcome> {
        let mut conn = self.conn.clone();

        let reply: Value = self
            .create
            .key(key)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;

        match reply {
            Value::Int(1) => Ok(CreateOutcome::Created),
            other => Ok(CreateOutcome::AlreadyExists(text_reply(other)?)),
        }
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        new_value: &str,
        ttl: Duration,
    ) -> Result<SwapOutcome> {
        let mut conn = self.conn.clone();

        let reply: Value = self
            .swap
            .key(key)
            .arg(expected)
            .arg(new_value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;

        match reply {
            Value::Int(1) => Ok(SwapOutcome::Swapped),
            Value::Int(0) => Ok(SwapOutcome::NotFound),
            other => Ok(SwapOutcome::Mismatch(text_reply(other)?)),
        }
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<DeleteOutcome> {
        let mut conn = self.conn.clone();

        let reply: i64 = self
            .delete
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;

        match reply {
            1 => Ok(DeleteOutcome::Deleted),
            0 => Ok(DeleteOutcome::NotFound),
            2 => Ok(DeleteOutcome::Mismatch),
            other => Err(StoreError::Protocol(format!("compare-and-delete returned {other}"))),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();

        let value: Option<String> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await?;

        Ok(value)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

/// Redis expiry is in whole milliseconds and must be positive
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

fn text_reply(reply: Value) -> Result<String> {
    match reply {
        Value::BulkString(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Value::SimpleString(text) => Ok(text),
        other => Err(StoreError::Protocol(format!("expected a string reply, got {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_is_never_zero() {
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
    }

    #[test]
    fn test_text_reply_decoding() {
        assert_eq!(text_reply(Value::BulkString(b"node-b".to_vec())).unwrap(), "node-b");
        assert_eq!(text_reply(Value::SimpleString("node-c".to_string())).unwrap(), "node-c");
        assert!(matches!(text_reply(Value::Nil), Err(StoreError::Protocol(_))));
    }
}

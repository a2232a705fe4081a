//! Redis Streams driver for the bounded, append-only per-topic logs that
//! sit between the outbox consumer and the fanout notifier.
//!
//! Wraps XADD/XTRIM, XGROUP CREATE, XREADGROUP, XACK and XAUTOCLAIM behind a
//! small topic-scoped interface so callers never hand-assemble Redis
//! commands. Consumer-group reads use `XREADGROUP ... STREAMS <topic> >`
//! (new messages only); idle-pending recovery is a separate explicit call.

mod error;

pub use error::{StreamError, StreamResult};

use event_contracts::{StreamFields, Topic, TopicConfig};
use redis::{FromRedisValue, Value as RedisValue};
use redis_utils::SharedConnectionManager;
use resilience::timeout::{with_timeout_result, TimeoutError};
use std::time::Duration;
use tracing::debug;

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(5);

/// One stream entry as read back from a consumer group: its log id plus the
/// flat field map produced by [`event_contracts::to_stream_fields`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: StreamFields,
}

pub struct StreamLog {
    manager: SharedConnectionManager,
}

impl StreamLog {
    pub fn new(manager: SharedConnectionManager) -> Self {
        Self { manager }
    }

    /// `XGROUP CREATE <topic> <group> $ MKSTREAM`, tolerating a group that
    /// already exists (group creation is idempotent per the routing
    /// contract).
    pub async fn ensure_group(&self, topic: Topic, config: &TopicConfig) -> StreamResult<()> {
        let mut conn = self.manager.lock().await;
        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(topic.name())
            .arg(&config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut *conn)
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// `XADD <topic> MAXLEN ~ <max_len> * <fields...>`. Approximate trimming
    /// (`~`) keeps the eviction O(1)-ish instead of exact-but-expensive.
    pub async fn publish(
        &self,
        topic: Topic,
        config: &TopicConfig,
        fields: &StreamFields,
    ) -> StreamResult<String> {
        let mut conn = self.manager.lock().await;
        let mut cmd = redis::cmd("XADD");
        cmd.arg(topic.name())
            .arg("MAXLEN")
            .arg("~")
            .arg(config.max_len)
            .arg("*");
        for (key, value) in fields {
            cmd.arg(key).arg(value);
        }
        let id: String = with_timeout_result(PUBLISH_TIMEOUT, cmd.query_async(&mut *conn))
            .await
            .map_err(|e| match e {
                TimeoutError::Elapsed(d) => StreamError::Timeout(d),
                TimeoutError::OperationFailed(msg) => {
                    StreamError::Redis(redis::RedisError::from((redis::ErrorKind::IoError, "xadd failed", msg)))
                }
            })?;
        debug!(topic = topic.name(), entry_id = %id, "published stream entry");
        Ok(id)
    }

    /// `XREADGROUP GROUP <group> <consumer> COUNT <batch_count> BLOCK
    /// <block_ms> STREAMS <topic> >` — only messages never delivered to any
    /// consumer in this group.
    pub async fn read_new(
        &self,
        topic: Topic,
        config: &TopicConfig,
        consumer: &str,
    ) -> StreamResult<Vec<StreamEntry>> {
        let mut conn = self.manager.lock().await;
        let raw: RedisValue = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&config.consumer_group)
            .arg(consumer)
            .arg("COUNT")
            .arg(config.batch_count)
            .arg("BLOCK")
            .arg(config.block.as_millis() as i64)
            .arg("STREAMS")
            .arg(topic.name())
            .arg(">")
            .query_async(&mut *conn)
            .await
            .unwrap_or(RedisValue::Nil);

        parse_xreadgroup_reply(raw)
    }

    /// `XACK <topic> <group> <ids...>`.
    pub async fn ack(&self, topic: Topic, config: &TopicConfig, ids: &[String]) -> StreamResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.manager.lock().await;
        let mut cmd = redis::cmd("XACK");
        cmd.arg(topic.name()).arg(&config.consumer_group);
        for id in ids {
            cmd.arg(id);
        }
        cmd.query_async::<_, ()>(&mut *conn).await?;
        Ok(())
    }

    /// `XAUTOCLAIM <topic> <group> <consumer> <min_idle_ms> 0-0 COUNT
    /// <count>` — reassigns messages idle longer than `min_idle` to this
    /// consumer, recovering from a notifier that crashed mid-dispatch.
    pub async fn claim_idle(
        &self,
        topic: Topic,
        config: &TopicConfig,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> StreamResult<Vec<StreamEntry>> {
        let mut conn = self.manager.lock().await;
        let raw: RedisValue = redis::cmd("XAUTOCLAIM")
            .arg(topic.name())
            .arg(&config.consumer_group)
            .arg(consumer)
            .arg(min_idle.as_millis() as i64)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut *conn)
            .await?;

        let (_next_start, entries): (String, Vec<(String, Vec<String>)>) =
            FromRedisValue::from_redis_value(&raw)?;
        Ok(pairs_to_entries(entries))
    }
}

fn parse_xreadgroup_reply(raw: RedisValue) -> StreamResult<Vec<StreamEntry>> {
    if raw == RedisValue::Nil {
        return Ok(Vec::new());
    }
    let streams: Vec<(String, Vec<(String, Vec<String>)>)> = FromRedisValue::from_redis_value(&raw)?;
    let entries = streams
        .into_iter()
        .flat_map(|(_stream_key, entries)| pairs_to_entries(entries))
        .collect();
    Ok(entries)
}

/// Turn `(id, [k1, v1, k2, v2, ...])` pairs from the redis wire format into
/// [`StreamEntry`] values with a proper field map.
fn pairs_to_entries(raw: Vec<(String, Vec<String>)>) -> Vec<StreamEntry> {
    raw.into_iter()
        .map(|(id, kvs)| {
            let mut fields = StreamFields::new();
            let mut iter = kvs.into_iter();
            while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
                fields.insert(k, v);
            }
            StreamEntry { id, fields }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pairs_to_entries_builds_field_maps() {
        let raw = vec![(
            "1-0".to_string(),
            vec![
                "event".to_string(),
                "order_status".to_string(),
                "version".to_string(),
                "1.0".to_string(),
            ],
        )];
        let entries = pairs_to_entries(raw);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "1-0");
        assert_eq!(entries[0].fields["event"], "order_status");
        assert_eq!(entries[0].fields["version"], "1.0");
    }

    #[test]
    fn pairs_to_entries_ignores_a_trailing_unpaired_key() {
        let raw = vec![("1-0".to_string(), vec!["orphan".to_string()])];
        let entries = pairs_to_entries(raw);
        assert!(entries[0].fields.is_empty());
    }

    #[test]
    fn nil_reply_parses_to_empty() {
        let entries = parse_xreadgroup_reply(RedisValue::Nil).unwrap();
        assert!(entries.is_empty());
    }
}

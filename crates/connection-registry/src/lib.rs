//! In-memory index of live client sessions, keyed by session id with
//! secondary indexes by tenant and user. Single-writer / multi-reader:
//! mutation serializes on one lock, lookups run concurrently (readers never
//! block each other — only a writer blocks everyone, briefly).
//!
//! Generalized from a per-user `HashMap<Uuid, Vec<Sender>>` connection map
//! into a session-keyed registry with a tenant index and admit-time caps,
//! since multiple transports (SSE, WebSocket) and multiple tenants per
//! process both need first-class lookup here.

use async_trait::async_trait;
use event_contracts::EventEnvelope;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type SessionId = String;

/// The wildcard subscription that matches every event type.
pub const SUBSCRIBE_ALL: &str = "all";

/// A session is unhealthy once it has missed this many consecutive
/// heartbeats; `reap_stale` drops it on the next sweep.
pub const UNHEALTHY_MISSED_HEARTBEATS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Sse,
    WebSocket,
}

/// The write side of a session's transport. Implemented by the SSE and
/// WebSocket adapters; the registry only ever holds a handle to one of
/// these, never the transport itself.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn write_frame(&self, event: &EventEnvelope) -> Result<(), String>;
    async fn close(&self, reason: &str);
}

pub struct ConnectionRecord {
    pub session_id: SessionId,
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub transport: Transport,
    pub connected_at: chrono::DateTime<chrono::Utc>,
    pub last_activity_at: chrono::DateTime<chrono::Utc>,
    pub subscriptions: HashSet<String>,
    pub missed_heartbeats: u32,
    pub sink: Arc<dyn FrameSink>,
}

impl ConnectionRecord {
    pub fn is_healthy(&self) -> bool {
        self.missed_heartbeats < UNHEALTHY_MISSED_HEARTBEATS
    }

    fn is_recipient_of(&self, event: &EventEnvelope) -> bool {
        if self.tenant_id != event.tenant_id {
            return false;
        }
        self.subscriptions.contains(event.event_kind())
            || self.subscriptions.contains(SUBSCRIBE_ALL)
    }
}

/// A lightweight handle returned by lookups/`select_recipients`, cheap to
/// clone and hold across an `.await` without keeping the registry lock.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub sink: Arc<dyn FrameSink>,
}

impl From<&ConnectionRecord> for SessionHandle {
    fn from(record: &ConnectionRecord) -> Self {
        Self {
            session_id: record.session_id.clone(),
            tenant_id: record.tenant_id,
            user_id: record.user_id,
            sink: record.sink.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    pub max_per_user: usize,
    pub max_per_tenant: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            max_per_user: 10,
            max_per_tenant: 1_000,
        }
    }
}

#[derive(Default)]
struct Inner {
    by_session: HashMap<SessionId, ConnectionRecord>,
    by_tenant: HashMap<Uuid, HashSet<SessionId>>,
    by_user: HashMap<Uuid, HashSet<SessionId>>,
}

pub struct ConnectionRegistry {
    inner: RwLock<Inner>,
    limits: SessionLimits,
}

impl ConnectionRegistry {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            limits,
        }
    }

    /// `add(record) -> bool`: rejects admission once the per-user or
    /// per-tenant cap would be exceeded. Checked and applied atomically
    /// under the write lock so concurrent admits can't both slip past the
    /// cap.
    pub async fn add(&self, record: ConnectionRecord) -> bool {
        let mut inner = self.inner.write().await;

        let user_count = inner.by_user.get(&record.user_id).map(HashSet::len).unwrap_or(0);
        if user_count >= self.limits.max_per_user {
            warn!(user_id = %record.user_id, "session admission rejected: per-user cap reached");
            return false;
        }

        let tenant_count = inner.by_tenant.get(&record.tenant_id).map(HashSet::len).unwrap_or(0);
        if tenant_count >= self.limits.max_per_tenant {
            warn!(tenant_id = %record.tenant_id, "session admission rejected: per-tenant cap reached");
            return false;
        }

        inner
            .by_user
            .entry(record.user_id)
            .or_default()
            .insert(record.session_id.clone());
        inner
            .by_tenant
            .entry(record.tenant_id)
            .or_default()
            .insert(record.session_id.clone());

        debug!(session_id = %record.session_id, user_id = %record.user_id, tenant_id = %record.tenant_id, "session admitted");
        inner.by_session.insert(record.session_id.clone(), record);
        true
    }

    pub async fn remove(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.by_session.remove(session_id) {
            if let Some(set) = inner.by_user.get_mut(&record.user_id) {
                set.remove(session_id);
                if set.is_empty() {
                    inner.by_user.remove(&record.user_id);
                }
            }
            if let Some(set) = inner.by_tenant.get_mut(&record.tenant_id) {
                set.remove(session_id);
                if set.is_empty() {
                    inner.by_tenant.remove(&record.tenant_id);
                }
            }
        }
    }

    pub async fn lookup_by_tenant(&self, tenant_id: Uuid) -> Vec<SessionHandle> {
        let inner = self.inner.read().await;
        inner
            .by_tenant
            .get(&tenant_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.by_session.get(id))
            .map(SessionHandle::from)
            .collect()
    }

    pub async fn lookup_by_user(&self, user_id: Uuid) -> Vec<SessionHandle> {
        let inner = self.inner.read().await;
        inner
            .by_user
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.by_session.get(id))
            .map(SessionHandle::from)
            .collect()
    }

    /// `select_recipients(event) -> [record]`: tenant gate is mandatory;
    /// within that set, a record is a recipient if its subscriptions
    /// include the event's type or the wildcard `all`.
    pub async fn select_recipients(&self, event: &EventEnvelope) -> Vec<SessionHandle> {
        let inner = self.inner.read().await;
        inner
            .by_tenant
            .get(&event.tenant_id)
            .into_iter()
            .flatten()
            .filter_map(|id| inner.by_session.get(id))
            .filter(|record| record.is_recipient_of(event))
            .map(SessionHandle::from)
            .collect()
    }

    /// Any received frame (event, heartbeat, pong) resets the session's
    /// missed-heartbeat counter and bumps `last_activity_at`.
    pub async fn record_activity(&self, session_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.by_session.get_mut(session_id) {
            record.missed_heartbeats = 0;
            record.last_activity_at = chrono::Utc::now();
        }
    }

    /// A failed heartbeat send increments the counter without touching
    /// `last_activity_at`.
    pub async fn record_missed_heartbeat(&self, session_id: &str) -> Option<u32> {
        let mut inner = self.inner.write().await;
        inner.by_session.get_mut(session_id).map(|record| {
            record.missed_heartbeats += 1;
            record.missed_heartbeats
        })
    }

    pub async fn is_healthy(&self, session_id: &str) -> Option<bool> {
        let inner = self.inner.read().await;
        inner.by_session.get(session_id).map(ConnectionRecord::is_healthy)
    }

    /// Replaces a session's subscription set (client `subscribe` control
    /// message).
    pub async fn set_subscriptions(&self, session_id: &str, subscriptions: HashSet<String>) {
        let mut inner = self.inner.write().await;
        if let Some(record) = inner.by_session.get_mut(session_id) {
            record.subscriptions = subscriptions;
        }
    }

    /// Current subscription count for a session (client `get_stats` control
    /// message). `None` if the session is gone.
    pub async fn subscription_count(&self, session_id: &str) -> Option<usize> {
        let inner = self.inner.read().await;
        inner.by_session.get(session_id).map(|record| record.subscriptions.len())
    }

    /// `reap_stale(max_idle)`: drops records idle longer than `max_idle` or
    /// with `missed_heartbeats >= 3`. Returns the sessions removed so the
    /// caller can close their transports.
    pub async fn reap_stale(&self, max_idle: Duration) -> Vec<SessionHandle> {
        let now = chrono::Utc::now();
        let max_idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::zero());

        let mut inner = self.inner.write().await;
        let stale_ids: Vec<SessionId> = inner
            .by_session
            .values()
            .filter(|record| {
                now - record.last_activity_at > max_idle
                    || record.missed_heartbeats >= UNHEALTHY_MISSED_HEARTBEATS
            })
            .map(|record| record.session_id.clone())
            .collect();

        let mut removed = Vec::with_capacity(stale_ids.len());
        for id in stale_ids {
            if let Some(record) = inner.by_session.remove(&id) {
                if let Some(set) = inner.by_user.get_mut(&record.user_id) {
                    set.remove(&id);
                }
                if let Some(set) = inner.by_tenant.get_mut(&record.tenant_id) {
                    set.remove(&id);
                }
                removed.push(SessionHandle::from(&record));
            }
        }

        if !removed.is_empty() {
            info!(count = removed.len(), "reaped stale sessions");
        }
        removed
    }

    pub async fn total_sessions(&self) -> usize {
        self.inner.read().await.by_session.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use event_contracts::{EventBody, OrderStatus, Version};

    struct NullSink;

    #[async_trait]
    impl FrameSink for NullSink {
        async fn write_frame(&self, _event: &EventEnvelope) -> Result<(), String> {
            Ok(())
        }
        async fn close(&self, _reason: &str) {}
    }

    fn record(session_id: &str, user_id: Uuid, tenant_id: Uuid, subs: &[&str]) -> ConnectionRecord {
        ConnectionRecord {
            session_id: session_id.to_string(),
            user_id,
            tenant_id,
            transport: Transport::Sse,
            connected_at: Utc::now(),
            last_activity_at: Utc::now(),
            subscriptions: subs.iter().map(|s| s.to_string()).collect(),
            missed_heartbeats: 0,
            sink: Arc::new(NullSink),
        }
    }

    fn order_event(tenant_id: Uuid) -> EventEnvelope {
        EventEnvelope {
            body: EventBody::OrderStatus {
                order_id: Uuid::new_v4(),
                status: OrderStatus::Created,
            },
            version: Version { major: 1, minor: 0 },
            tenant_id,
            ts: Utc::now(),
            meta: None,
        }
    }

    #[tokio::test]
    async fn admits_below_per_user_cap_and_rejects_at_cap() {
        let registry = ConnectionRegistry::new(SessionLimits { max_per_user: 2, max_per_tenant: 1000 });
        let user = Uuid::new_v4();
        let tenant = Uuid::new_v4();

        assert!(registry.add(record("s1", user, tenant, &["all"])).await);
        assert!(registry.add(record("s2", user, tenant, &["all"])).await);
        assert!(!registry.add(record("s3", user, tenant, &["all"])).await);
        assert_eq!(registry.total_sessions().await, 2);
    }

    #[tokio::test]
    async fn rejects_at_per_tenant_cap() {
        let registry = ConnectionRegistry::new(SessionLimits { max_per_user: 100, max_per_tenant: 1 });
        let tenant = Uuid::new_v4();

        assert!(registry.add(record("s1", Uuid::new_v4(), tenant, &["all"])).await);
        assert!(!registry.add(record("s2", Uuid::new_v4(), tenant, &["all"])).await);
    }

    #[tokio::test]
    async fn select_recipients_enforces_tenant_isolation() {
        let registry = ConnectionRegistry::new(SessionLimits::default());
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();

        registry.add(record("s1", Uuid::new_v4(), tenant_a, &["all"])).await;
        registry.add(record("s2", Uuid::new_v4(), tenant_b, &["all"])).await;

        let recipients = registry.select_recipients(&order_event(tenant_a)).await;
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].session_id, "s1");
    }

    #[tokio::test]
    async fn select_recipients_requires_matching_subscription() {
        let registry = ConnectionRegistry::new(SessionLimits::default());
        let tenant = Uuid::new_v4();

        registry.add(record("s1", Uuid::new_v4(), tenant, &["payment_status"])).await;
        registry.add(record("s2", Uuid::new_v4(), tenant, &["order_status"])).await;

        let recipients = registry.select_recipients(&order_event(tenant)).await;
        assert_eq!(recipients.len(), 1);
        assert_eq!(recipients[0].session_id, "s2");
    }

    #[tokio::test]
    async fn reap_stale_drops_idle_and_unhealthy_sessions() {
        let registry = ConnectionRegistry::new(SessionLimits::default());
        let tenant = Uuid::new_v4();

        let mut unhealthy = record("s1", Uuid::new_v4(), tenant, &["all"]);
        unhealthy.missed_heartbeats = 3;
        registry.add(unhealthy).await;
        registry.add(record("s2", Uuid::new_v4(), tenant, &["all"])).await;

        let removed = registry.reap_stale(Duration::from_secs(3600)).await;
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].session_id, "s1");
        assert_eq!(registry.total_sessions().await, 1);
    }

    #[tokio::test]
    async fn subscription_count_reflects_set_subscriptions() {
        let registry = ConnectionRegistry::new(SessionLimits::default());
        let tenant = Uuid::new_v4();
        registry.add(record("s1", Uuid::new_v4(), tenant, &["order_status"])).await;

        assert_eq!(registry.subscription_count("s1").await, Some(1));

        registry
            .set_subscriptions("s1", ["order_status", "payment_status"].iter().map(|s| s.to_string()).collect())
            .await;
        assert_eq!(registry.subscription_count("s1").await, Some(2));

        assert_eq!(registry.subscription_count("missing").await, None);
    }

    #[tokio::test]
    async fn activity_resets_missed_heartbeats() {
        let registry = ConnectionRegistry::new(SessionLimits::default());
        let tenant = Uuid::new_v4();
        registry.add(record("s1", Uuid::new_v4(), tenant, &["all"])).await;

        registry.record_missed_heartbeat("s1").await;
        registry.record_missed_heartbeat("s1").await;
        assert_eq!(registry.is_healthy("s1").await, Some(true));

        registry.record_activity("s1").await;
        let removed = registry.reap_stale(Duration::from_secs(3600)).await;
        assert!(removed.is_empty());
    }
}

//! C8: one long-lived consumer task per topic. Reads a batch via the
//! consumer group, resolves recipients through the connection registry,
//! dispatches to each recipient concurrently, and acknowledges once every
//! recipient has been handled (delivered, or permanently removed as
//! unhealthy). A separate periodic task reclaims pending entries abandoned
//! by a crashed notifier instance.
use connection_registry::ConnectionRegistry;
use event_contracts::{all_topic_configs, from_stream_fields, Topic};
use resilience::timeout::{with_timeout_result, TimeoutError};
use std::sync::Arc;
use std::time::Duration;
use stream_log::{StreamEntry, StreamLog};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const CLAIM_INTERVAL: Duration = Duration::from_secs(5 * 60);
const CLAIM_MIN_IDLE: Duration = Duration::from_secs(5 * 60);
const CLAIM_BATCH: usize = 100;
const MAX_FRAME_BYTES_DEFAULT: usize = 10_240;
const TRANSPORT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Notifier {
    stream_log: Arc<StreamLog>,
    registry: Arc<ConnectionRegistry>,
    max_frame_bytes: usize,
}

impl Notifier {
    pub fn new(stream_log: Arc<StreamLog>, registry: Arc<ConnectionRegistry>, max_frame_bytes: usize) -> Self {
        Self {
            stream_log,
            registry,
            max_frame_bytes: if max_frame_bytes == 0 { MAX_FRAME_BYTES_DEFAULT } else { max_frame_bytes },
        }
    }

    /// Spawns one task per recognized topic plus one idle-claim sweep task.
    /// Returns immediately; tasks run until `shutdown` reports `true`.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        for topic in Topic::all() {
            let notifier = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                notifier.run_topic(topic, shutdown).await;
            });
        }

        let notifier = self.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { notifier.run_idle_claim_sweep(shutdown).await });
    }

    async fn run_topic(&self, topic: Topic, mut shutdown: watch::Receiver<bool>) {
        let config = all_topic_configs()[topic.name()].clone();
        let consumer_name = format!("{}-{}", topic.name(), Uuid::new_v4());

        if let Err(e) = self.stream_log.ensure_group(topic, &config).await {
            error!(topic = topic.name(), error = %e, "failed to ensure consumer group, topic consumer not starting");
            return;
        }

        info!(topic = topic.name(), consumer = %consumer_name, "notifier topic consumer starting");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                result = self.stream_log.read_new(topic, &config, &consumer_name) => {
                    match result {
                        Ok(entries) => self.handle_batch(topic, &config, entries).await,
                        Err(e) => {
                            warn!(topic = topic.name(), error = %e, "stream read failed, backing off");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            }
        }

        info!(topic = topic.name(), "notifier topic consumer shut down");
    }

    async fn handle_batch(&self, topic: Topic, config: &event_contracts::TopicConfig, entries: Vec<StreamEntry>) {
        if entries.is_empty() {
            return;
        }

        let expected_kind = topic.expected_event_kind();
        let mut to_ack = Vec::with_capacity(entries.len());
        for entry in entries {
            match from_stream_fields(&entry.fields, expected_kind) {
                Ok(event) => {
                    self.dispatch(&event).await;
                    to_ack.push(entry.id);
                }
                Err(e) => {
                    warn!(topic = topic.name(), entry_id = %entry.id, error = %e, "malformed stream entry, acking without dispatch");
                    to_ack.push(entry.id);
                }
            }
        }

        if let Err(e) = self.stream_log.ack(topic, config, &to_ack).await {
            error!(topic = topic.name(), error = %e, "failed to ack dispatched batch");
        }
    }

    /// Resolves recipients and writes one frame per session, concurrently.
    /// A send that fails because the frame is oversized, or because the
    /// session crosses the unhealthy threshold, removes that session; this
    /// never blocks acknowledgement of the message itself.
    async fn dispatch(&self, event: &event_contracts::EventEnvelope) {
        let recipients = self.registry.select_recipients(event).await;
        if recipients.is_empty() {
            return;
        }

        let serialized_len = serde_json::to_vec(event).map(|b| b.len()).unwrap_or(0);
        let oversized = serialized_len > self.max_frame_bytes;

        let tasks = recipients.into_iter().map(|recipient| {
            let event = event.clone();
            let registry = self.registry.clone();
            async move {
                if oversized {
                    warn!(session_id = %recipient.session_id, size = serialized_len, "frame exceeds max size, dropping and marking unhealthy");
                    registry.record_missed_heartbeat(&recipient.session_id).await;
                    registry.record_missed_heartbeat(&recipient.session_id).await;
                    registry.record_missed_heartbeat(&recipient.session_id).await;
                    return;
                }

                match with_timeout_result(TRANSPORT_WRITE_TIMEOUT, recipient.sink.write_frame(&event)).await
                {
                    Ok(()) => registry.record_activity(&recipient.session_id).await,
                    Err(e) => {
                        if matches!(e, TimeoutError::Elapsed(_)) {
                            debug!(session_id = %recipient.session_id, "frame dispatch timed out after {:?}", TRANSPORT_WRITE_TIMEOUT);
                        } else {
                            debug!(session_id = %recipient.session_id, error = %e, "frame dispatch failed");
                        }
                        if let Some(missed) = registry.record_missed_heartbeat(&recipient.session_id).await {
                            if missed >= connection_registry::UNHEALTHY_MISSED_HEARTBEATS {
                                recipient.sink.close("dispatch failures exceeded health threshold").await;
                                registry.remove(&recipient.session_id).await;
                            }
                        }
                    }
                }
            }
        });

        futures::future::join_all(tasks).await;
    }

    async fn run_idle_claim_sweep(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(CLAIM_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    for topic in Topic::all() {
                        let config = all_topic_configs()[topic.name()].clone();
                        let consumer_name = format!("{}-claim-sweeper", topic.name());
                        match self
                            .stream_log
                            .claim_idle(topic, &config, &consumer_name, CLAIM_MIN_IDLE, CLAIM_BATCH)
                            .await
                        {
                            Ok(entries) if !entries.is_empty() => {
                                info!(topic = topic.name(), count = entries.len(), "reclaimed idle pending entries");
                                self.handle_batch(topic, &config, entries).await;
                            }
                            Ok(_) => {}
                            Err(e) => warn!(topic = topic.name(), error = %e, "idle claim sweep failed"),
                        }
                    }
                }
            }
        }
    }
}

//! Republishing a parked DLQ row through the same stream router the live
//! consumer uses, without requiring the DLQ management surface to pull in
//! the whole outbox consumer.
use crate::codec::build_envelope;
use async_trait::async_trait;
use dlq::{DlqRecord, Republisher};
use event_contracts::{default_topic_config, to_stream_fields, topic_for};
use std::sync::Arc;
use stream_log::StreamLog;

pub struct StreamRepublisher {
    stream_log: Arc<StreamLog>,
}

impl StreamRepublisher {
    pub fn new(stream_log: Arc<StreamLog>) -> Self {
        Self { stream_log }
    }
}

#[async_trait]
impl Republisher for StreamRepublisher {
    async fn republish(&self, record: &DlqRecord) -> Result<(), String> {
        let event = build_envelope(&record.event_type, &record.payload).map_err(|e| e.to_string())?;
        let topic = topic_for(&record.aggregate_type, &record.event_type);
        let config = default_topic_config(topic);
        let fields = to_stream_fields(&event);

        self.stream_log
            .publish(topic, &config, &fields)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

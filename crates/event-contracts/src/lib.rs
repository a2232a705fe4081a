//! Typed event envelope, wire serialization, and stream-topic routing
//! shared by the outbox consumer and the fanout notifier.

pub mod envelope;
pub mod routing;
pub mod stream_fields;

pub use envelope::{
    check_major_compatible, parse, serialize, EventBody, EventEnvelope, OrderStatus,
    ValidationError, Version,
};
pub use routing::{all_topic_configs, default_topic_config, topic_for, Topic, TopicConfig};
pub use stream_fields::{from_stream_fields, to_stream_fields, StreamFields};

//! The durable producer boundary: an outbox table co-transactional with
//! business writes, and a background consumer that drains it onto the
//! stream log with retries and dead-letter parking.

mod codec;
mod consumer;
mod error;
mod model;
mod repository;
mod republish;

pub use codec::build_envelope;
pub use consumer::{OutboxConfig, OutboxConsumer};
pub use error::{OutboxError, OutboxResult};
pub use model::{NewOutboxEvent, OutboxRow};
pub use repository::OutboxRepository;
pub use republish::StreamRepublisher;

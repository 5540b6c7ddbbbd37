//! Named queues over MQTT. Queue `NAME` lives on topic `<base>/NAME`.
mod connection;
mod message;

pub use connection::{Initiator, MqttPublisher};
pub use message::{queue_of, topic, Outgoing};

/// Outbound path of a process. Never blocks: a payload that can't be queued
/// right away is reported and dropped.
pub trait Publisher {
    fn publish(&mut self, queue: &str, payload: &str) -> anyhow::Result<()>;
}

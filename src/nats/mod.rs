pub mod client;
pub mod messages;

pub use client::{NatsClient, NatsHandoff};
pub use messages::RecordingReadyMessage;

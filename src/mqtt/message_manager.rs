use chrono::{DateTime, Local};
use std::fmt;

/// A PUBLISH received from the broker, as handed to the dispatch channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: String,
    pub received_at: DateTime<Local>,
}

impl fmt::Display for InboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} - {}: {}",
            self.received_at.format("%H:%M:%S%.3f"),
            self.topic,
            self.payload
        )
    }
}

impl InboundMessage {
    pub fn from_topic(topic: String, payload: String) -> Self {
        InboundMessage {
            topic,
            payload,
            received_at: Local::now(),
        }
    }

    // Payloads are text on every greenhouse topic
    pub fn from_bytes(topic: String, payload: &[u8]) -> Self {
        Self::from_topic(topic, String::from_utf8_lossy(payload).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_payload_lossily() {
        let msg = InboundMessage::from_bytes("a/b".to_string(), b"42\xff");
        assert_eq!(msg.topic, "a/b");
        assert_eq!(msg.payload, "42\u{fffd}");
    }

    #[test]
    fn display_contains_topic_and_payload() {
        let msg = InboundMessage::from_topic("x/greenhouse/luminosity".into(), "17".into());
        let rendered = msg.to_string();
        assert!(rendered.ends_with("x/greenhouse/luminosity: 17"));
    }
}

//! Light Controller - turns luminosity messages into actuator commands
//!
//! Consumes the broker's inbound channel one message at a time. The commanded
//! [`LightState`] is owned here and changes in exactly one place: after the
//! matching command byte was written to the device without error.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::policy::{HysteresisPolicy, LightState};
use crate::mqtt::config::Topics;
use crate::mqtt::message_manager::InboundMessage;
use crate::mqtt::mqtt_handler::TelemetrySink;
use crate::serial::link::SerialLink;

// What happened to one inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleOutcome {
    /// Message was not on the luminosity topic
    Ignored,
    /// Payload was not an integer
    Dropped(String),
    Unchanged(LightState),
    Switched { from: LightState, to: LightState },
    /// Command write failed, state kept
    ActuationFailed { wanted: LightState, kept: LightState },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerStats {
    pub messages: u64,
    pub dropped: u64,
    pub switches: u64,
    pub actuation_failures: u64,
    pub status_lines_forwarded: u64,
}

pub struct LightController<P: TelemetrySink> {
    state: LightState,
    policy: HysteresisPolicy,
    link: SerialLink,
    sink: P,
    topics: Topics,
    max_status_lines: usize,
    stats: ControllerStats,
}

impl<P: TelemetrySink> LightController<P> {
    pub fn new(
        policy: HysteresisPolicy,
        link: SerialLink,
        sink: P,
        topics: Topics,
        max_status_lines: usize,
    ) -> Self {
        info!(
            "Creating light controller with threshold {}",
            policy.threshold()
        );
        Self {
            state: LightState::default(),
            policy,
            link,
            sink,
            topics,
            max_status_lines,
            stats: ControllerStats::default(),
        }
    }

    pub fn state(&self) -> LightState {
        self.state
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    /// Re-sends the boot state so the device and the tracked state agree.
    ///
    /// A failed write is logged; the tracked state stays at the device's own
    /// power-on default.
    pub async fn announce_initial_state(&mut self) {
        let command = self.state.command();
        match self.link.send(command).await {
            Ok(()) => info!("Sent initial {} to device", command),
            Err(e) => warn!(
                "Could not send initial {}: {}, assuming device default {}",
                command, e, self.state
            ),
        }
        self.forward_status_lines().await;
    }

    pub async fn handle(&mut self, message: &InboundMessage) -> HandleOutcome {
        if message.topic != self.topics.luminosity {
            debug!("Ignoring message on {}", message.topic);
            return HandleOutcome::Ignored;
        }
        self.stats.messages += 1;

        let reading = match message.payload.trim().parse::<i64>() {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "Dropping luminosity payload {:?} from {}: {}",
                    message.payload, message.topic, e
                );
                self.stats.dropped += 1;
                return HandleOutcome::Dropped(message.payload.clone());
            }
        };
        info!(
            "Received luminosity value {} from topic {}",
            reading, message.topic
        );

        let outcome = self.apply(reading).await;
        self.forward_status_lines().await;
        outcome
    }

    async fn apply(&mut self, reading: i64) -> HandleOutcome {
        let current = self.state;
        let wanted = self.policy.decide(reading, current);
        if wanted == current {
            debug!("Light stays {} at luminosity {}", current, reading);
            return HandleOutcome::Unchanged(current);
        }

        info!("Setting light {} (luminosity {})", wanted, reading);
        match self.link.send(wanted.command()).await {
            Ok(()) => {
                self.state = wanted;
                self.stats.switches += 1;
                HandleOutcome::Switched {
                    from: current,
                    to: wanted,
                }
            }
            Err(e) => {
                error!("Failed to switch light {}: {}, keeping {}", wanted, e, current);
                self.stats.actuation_failures += 1;
                HandleOutcome::ActuationFailed {
                    wanted,
                    kept: current,
                }
            }
        }
    }

    // Forwards device acknowledgements verbatim, best effort
    async fn forward_status_lines(&mut self) {
        let lines = match self.link.drain_pending(self.max_status_lines).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Could not read device status: {}", e);
                return;
            }
        };

        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            info!("Got line from MCU: {}", line);
            match self
                .sink
                .publish(&self.topics.light_state, line.to_string())
                .await
            {
                Ok(()) => {
                    self.stats.status_lines_forwarded += 1;
                    info!(
                        "Published light response {} to {}",
                        line, self.topics.light_state
                    );
                }
                Err(e) => warn!("Failed to publish light response: {}", e),
            }
        }
    }

    /// Handles messages in arrival order until the channel closes or `cancel` fires.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        cancel: CancellationToken,
    ) -> ControllerStats {
        info!("Light controller running, light is {}", self.state);
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Light controller cancelled");
                    break;
                }
                message = inbound.recv() => message,
            };

            match message {
                Some(message) => {
                    let outcome = self.handle(&message).await;
                    debug!("Handled {}: {:?}", message, outcome);
                }
                None => {
                    info!("Inbound channel closed, stopping light controller");
                    break;
                }
            }
        }

        info!(
            "Light controller finished: {} messages, {} switches, {} dropped, {} failed writes, light {}",
            self.stats.messages,
            self.stats.switches,
            self.stats.dropped,
            self.stats.actuation_failures,
            self.state
        );
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mqtt::mqtt_handler::testing::RecordingSink;
    use crate::serial::codec::Command;
    use crate::serial::link::testing::FakeTransport;

    fn controller(fake: &FakeTransport, sink: &RecordingSink) -> LightController<RecordingSink> {
        let link = SerialLink::new(Box::new(fake.clone()), Duration::from_millis(5));
        LightController::new(
            HysteresisPolicy::default(),
            link,
            sink.clone(),
            Topics::new("test"),
            8,
        )
    }

    fn luminosity(payload: &str) -> InboundMessage {
        InboundMessage::from_topic("test/greenhouse/luminosity".into(), payload.into())
    }

    #[tokio::test]
    async fn reading_sequence_drives_state_and_commands() {
        let fake = FakeTransport::new();
        let sink = RecordingSink::new();
        let mut controller = controller(&fake, &sink);

        let mut states = Vec::new();
        for value in [45, 20, 25, 35] {
            controller.handle(&luminosity(&value.to_string())).await;
            states.push(controller.state());
        }

        assert_eq!(
            states,
            vec![LightState::Off, LightState::On, LightState::On, LightState::Off]
        );
        // 25 agrees with ON, so only the three transitions reach the device
        assert_eq!(
            fake.written(),
            vec![Command::LightOff, Command::LightOn, Command::LightOff]
        );
        assert_eq!(controller.stats().switches, 3);
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped_without_state_change() {
        let fake = FakeTransport::new();
        let sink = RecordingSink::new();
        let mut controller = controller(&fake, &sink);

        let outcome = controller.handle(&luminosity("bright")).await;

        assert_eq!(outcome, HandleOutcome::Dropped("bright".into()));
        assert_eq!(controller.state(), LightState::On);
        assert!(fake.written().is_empty());

        // Still usable afterwards
        let outcome = controller.handle(&luminosity("90")).await;
        assert_eq!(
            outcome,
            HandleOutcome::Switched {
                from: LightState::On,
                to: LightState::Off
            }
        );
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_state() {
        let fake = FakeTransport::new();
        let sink = RecordingSink::new();
        let mut controller = controller(&fake, &sink);
        fake.set_fail_writes(true);

        let outcome = controller.handle(&luminosity("80")).await;
        assert_eq!(
            outcome,
            HandleOutcome::ActuationFailed {
                wanted: LightState::Off,
                kept: LightState::On
            }
        );
        assert_eq!(controller.state(), LightState::On);

        // Next reading retries because the state never moved
        fake.set_fail_writes(false);
        controller.handle(&luminosity("80")).await;
        assert_eq!(controller.state(), LightState::Off);
        assert_eq!(fake.written(), vec![Command::LightOff]);
    }

    #[tokio::test]
    async fn device_status_is_forwarded_to_light_state_topic() {
        let fake = FakeTransport::new();
        fake.reply_to(Command::LightOff, "LIGHT_STATE:OFF\r");
        let sink = RecordingSink::new();
        let mut controller = controller(&fake, &sink);

        controller.handle(&luminosity("100")).await;

        assert_eq!(
            sink.published(),
            vec![(
                "test/greenhouse/light_state".to_string(),
                "LIGHT_STATE:OFF".to_string()
            )]
        );
        assert_eq!(controller.stats().status_lines_forwarded, 1);
    }

    #[tokio::test]
    async fn status_publish_failure_is_not_fatal() {
        let fake = FakeTransport::new();
        fake.reply_to(Command::LightOff, "LIGHT_STATE:OFF");
        let sink = RecordingSink::new();
        sink.set_failing(true);
        let mut controller = controller(&fake, &sink);

        let outcome = controller.handle(&luminosity("100")).await;

        assert!(matches!(outcome, HandleOutcome::Switched { .. }));
        assert_eq!(sink.attempts(), 1);
        assert_eq!(controller.stats().status_lines_forwarded, 0);
    }

    #[tokio::test]
    async fn other_topics_are_ignored() {
        let fake = FakeTransport::new();
        let sink = RecordingSink::new();
        let mut controller = controller(&fake, &sink);

        let message = InboundMessage::from_topic("test/greenhouse/light_state".into(), "99".into());
        assert_eq!(controller.handle(&message).await, HandleOutcome::Ignored);
        assert_eq!(controller.stats().messages, 0);
    }

    #[tokio::test]
    async fn run_processes_channel_in_order_and_survives_garbage() {
        let fake = FakeTransport::new();
        let sink = RecordingSink::new();
        let controller = controller(&fake, &sink);
        let (tx, rx) = mpsc::channel(8);

        for payload in ["50", "not a number", "10", "  40 "] {
            tx.send(luminosity(payload)).await.unwrap();
        }
        drop(tx);

        let stats = controller.run(rx, CancellationToken::new()).await;

        assert_eq!(stats.messages, 4);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.switches, 3);
        assert_eq!(
            fake.written(),
            vec![Command::LightOff, Command::LightOn, Command::LightOff]
        );
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let fake = FakeTransport::new();
        let sink = RecordingSink::new();
        let controller = controller(&fake, &sink);
        let (_tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let stats = controller.run(rx, cancel).await;
        assert_eq!(stats, ControllerStats::default());
    }

    #[tokio::test]
    async fn initial_state_is_announced() {
        let fake = FakeTransport::new();
        let sink = RecordingSink::new();
        let mut controller = controller(&fake, &sink);

        controller.announce_initial_state().await;
        assert_eq!(fake.written(), vec![Command::LightOn]);
        assert_eq!(controller.state(), LightState::On);

        fake.set_fail_writes(true);
        controller.announce_initial_state().await;
        assert_eq!(controller.state(), LightState::On);
    }
}

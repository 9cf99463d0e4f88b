use statum::{machine, state};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::mqtt::mqtt_handler::TelemetrySink;
use crate::serial::codec::{parse_sensor_line, Command, LuminosityReading, ParseError};
use crate::serial::link::SerialLink;

// Poll settings
#[derive(Clone, Debug)]
pub struct PollSettings {
    /// Time the device gets to answer GET_VALUE
    pub settle: Duration,
    pub topic: String,
}

// Device answer to one GET_VALUE
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceReply {
    Line(String),
    Silent,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    NoAnswer,
    Unparseable(ParseError),
    Serial(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SkipReason::NoAnswer => write!(f, "device did not answer"),
            SkipReason::Unparseable(e) => write!(f, "{}", e),
            SkipReason::Serial(e) => write!(f, "serial error: {}", e),
        }
    }
}

// Result of one full cycle
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Published(LuminosityReading),
    Skipped(SkipReason),
    PublishFailed(LuminosityReading, String),
}

// Define poll states using statum's state macro
#[state]
#[derive(Debug, Clone)]
pub enum PollState {
    Idle,
    AwaitLine(DeviceReply),
    Publishing(LuminosityReading),
}

#[machine]
#[derive(Debug)]
pub struct PollCycle<S: PollState> {
    // Shared device link
    link: SerialLink,

    // Poll settings
    settings: PollSettings,
}

// Methods available in all states
impl<S: PollState> PollCycle<S> {
    pub fn settings(&self) -> &PollSettings {
        &self.settings
    }
}

pub enum Decoded {
    Ready(PollCycle<Publishing>),
    Skipped(PollCycle<Idle>, SkipReason),
}

// Implementation for Idle state
impl PollCycle<Idle> {
    pub fn create(link: SerialLink, settings: PollSettings) -> Self {
        debug!("Creating poll cycle with settings: {:?}", settings);
        Self::new(link, settings)
    }

    // Send GET_VALUE and collect whatever the device answers within the settle time
    pub async fn request(self) -> PollCycle<AwaitLine> {
        let reply = match self
            .link
            .request(Command::GetValue, self.settings.settle)
            .await
        {
            Ok(Some(line)) => {
                info!("Got line from MCU: {}", line);
                DeviceReply::Line(line)
            }
            Ok(None) => DeviceReply::Silent,
            Err(e) => DeviceReply::Failed(e.to_string()),
        };

        debug!("Command GET_VALUE sent, transitioning to AwaitLine");
        self.transition_with(reply)
    }
}

// Implementation for AwaitLine state
impl PollCycle<AwaitLine> {
    pub fn decode(self) -> Decoded {
        let reply = match self.get_state_data() {
            Some(reply) => reply.clone(),
            None => {
                warn!("No device reply found in state data, this should not happen");
                DeviceReply::Silent
            }
        };

        let reason = match reply {
            DeviceReply::Line(line) => match parse_sensor_line(&line) {
                Ok(reading) => {
                    debug!("Decoded luminosity {}", reading);
                    return Decoded::Ready(self.transition_with(reading));
                }
                Err(e) => SkipReason::Unparseable(e),
            },
            DeviceReply::Silent => SkipReason::NoAnswer,
            DeviceReply::Failed(e) => SkipReason::Serial(e),
        };

        warn!("Skipping this cycle: {}", reason);
        Decoded::Skipped(self.transition(), reason)
    }
}

// Implementation for Publishing state
impl PollCycle<Publishing> {
    pub async fn publish<P: TelemetrySink>(self, sink: &P) -> (PollCycle<Idle>, PollOutcome) {
        let Some(reading) = self.get_state_data().cloned() else {
            warn!("No reading found in state data, this should not happen");
            return (self.transition(), PollOutcome::Skipped(SkipReason::NoAnswer));
        };

        let payload = reading.value.to_string();
        let outcome = match sink.publish(&self.settings.topic, payload).await {
            Ok(()) => {
                info!(
                    "Publish luminosity - {} to {}",
                    reading.value, self.settings.topic
                );
                PollOutcome::Published(reading)
            }
            Err(e) => {
                warn!("Dropping reading {}: {}", reading, e);
                PollOutcome::PublishFailed(reading, e.to_string())
            }
        };

        (self.transition(), outcome)
    }
}

impl PollCycle<Idle> {
    /// Runs request, decode and publish once.
    pub async fn run_once<P: TelemetrySink>(self, sink: &P) -> (PollCycle<Idle>, PollOutcome) {
        match self.request().await.decode() {
            Decoded::Ready(publishing) => publishing.publish(sink).await,
            Decoded::Skipped(idle, reason) => (idle, PollOutcome::Skipped(reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::mqtt_handler::testing::RecordingSink;
    use crate::serial::link::testing::FakeTransport;

    fn cycle(fake: &FakeTransport) -> PollCycle<Idle> {
        PollCycle::create(
            SerialLink::new(Box::new(fake.clone()), Duration::from_millis(5)),
            PollSettings {
                settle: Duration::ZERO,
                topic: "test/greenhouse/luminosity".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn valid_reply_is_published_as_plain_number() {
        let fake = FakeTransport::new();
        fake.reply_to(Command::GetValue, "SENSOR_VALUE:27");
        let sink = RecordingSink::new();

        let (_, outcome) = cycle(&fake).run_once(&sink).await;

        assert!(matches!(outcome, PollOutcome::Published(ref r) if r.value == 27));
        assert_eq!(
            sink.published(),
            vec![("test/greenhouse/luminosity".to_string(), "27".to_string())]
        );
        assert_eq!(fake.written(), vec![Command::GetValue]);
    }

    #[tokio::test]
    async fn silent_device_skips() {
        let fake = FakeTransport::new();
        let sink = RecordingSink::new();

        let (_, outcome) = cycle(&fake).run_once(&sink).await;

        assert_eq!(outcome, PollOutcome::Skipped(SkipReason::NoAnswer));
        assert_eq!(sink.attempts(), 0);
    }

    #[tokio::test]
    async fn garbage_line_skips() {
        let fake = FakeTransport::new();
        fake.reply_to(Command::GetValue, "SENSOR_VALUE:oops");
        let sink = RecordingSink::new();

        let (_, outcome) = cycle(&fake).run_once(&sink).await;

        assert!(matches!(
            outcome,
            PollOutcome::Skipped(SkipReason::Unparseable(ParseError::NotANumber(_)))
        ));
        assert!(sink.published().is_empty());
    }

    #[tokio::test]
    async fn serial_failure_skips() {
        let fake = FakeTransport::new();
        fake.set_fail_writes(true);
        let sink = RecordingSink::new();

        let (_, outcome) = cycle(&fake).run_once(&sink).await;

        assert!(matches!(outcome, PollOutcome::Skipped(SkipReason::Serial(_))));
    }

    #[tokio::test]
    async fn publish_failure_is_reported_not_raised() {
        let fake = FakeTransport::new();
        fake.reply_to(Command::GetValue, "SENSOR_VALUE:12");
        let sink = RecordingSink::new();
        sink.set_failing(true);

        let (idle, outcome) = cycle(&fake).run_once(&sink).await;
        assert!(matches!(outcome, PollOutcome::PublishFailed(ref r, _) if r.value == 12));

        // The machine is back in Idle and keeps working
        sink.set_failing(false);
        let (_, outcome) = idle.run_once(&sink).await;
        assert!(matches!(outcome, PollOutcome::Published(_)));
    }
}

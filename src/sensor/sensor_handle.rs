//! Sensor Handle - periodic luminosity publishing
//!
//! Drives [`PollCycle`] on a fixed cadence: one GET_VALUE exchange per
//! iteration followed by a cancellable sleep, whatever the outcome of the
//! exchange was. Nothing that happens during a cycle ends the loop; only the
//! iteration limit or cancellation does.

use std::time::Duration;

use chrono::Local;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::poll_cycle::{Idle, PollCycle, PollOutcome, PollSettings};
use crate::mqtt::mqtt_handler::TelemetrySink;
use crate::serial::codec::Command;
use crate::serial::link::SerialLink;

const STATS_INTERVAL_SECS: i64 = 300;

/// Loop configuration for the sensor poller.
#[derive(Clone, Debug)]
pub struct SensorSettings {
    pub poll: PollSettings,
    /// Sleep between iterations
    pub interval: Duration,
    /// `None` polls until cancelled
    pub iterations: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PollStats {
    pub iterations: u64,
    pub published: u64,
    pub skipped: u64,
    pub publish_failures: u64,
}

impl PollStats {
    fn record(&mut self, outcome: &PollOutcome) {
        self.iterations += 1;
        match outcome {
            PollOutcome::Published(_) => self.published += 1,
            PollOutcome::Skipped(_) => self.skipped += 1,
            PollOutcome::PublishFailed(..) => self.publish_failures += 1,
        }
    }
}

/// Puts the device into streaming mode and logs its first answer.
pub async fn start_stream(link: &SerialLink) {
    if let Err(e) = link.send(Command::StreamStart).await {
        warn!("Failed to send STREAM_START: {}", e);
        return;
    }
    match link.read_line().await {
        Ok(Some(line)) => info!("Device answered STREAM_START: {}", line),
        Ok(None) => debug!("No answer to STREAM_START"),
        Err(e) => warn!("Failed to read STREAM_START answer: {}", e),
    }
}

/// Runs the publish loop until the iteration limit or cancellation.
pub async fn run_publish_loop<P: TelemetrySink>(
    link: SerialLink,
    settings: SensorSettings,
    sink: P,
    cancel: CancellationToken,
) -> PollStats {
    info!(
        "Starting publish loop on {} every {:?} ({} iterations)",
        settings.poll.topic,
        settings.interval,
        settings
            .iterations
            .map_or_else(|| "unlimited".to_string(), |n| n.to_string())
    );

    let mut cycle: PollCycle<Idle> = PollCycle::create(link, settings.poll.clone());
    let mut stats = PollStats::default();
    let mut window = PollStats::default();
    let mut last_stats_time = Local::now();
    let stats_interval = chrono::Duration::seconds(STATS_INTERVAL_SECS);

    loop {
        if settings.iterations.is_some_and(|limit| stats.iterations >= limit) {
            info!("Reached {} iterations, stopping publish loop", stats.iterations);
            break;
        }
        if cancel.is_cancelled() {
            break;
        }

        info!("iter {}", stats.iterations);
        let (idle, outcome) = cycle.run_once(&sink).await;
        cycle = idle;
        debug!("Cycle outcome: {:?}", outcome);
        stats.record(&outcome);
        window.record(&outcome);

        let now = Local::now();
        if now - last_stats_time > stats_interval {
            info!(
                "Publish loop stats: {} published, {} skipped, {} publish failures in last {} seconds",
                window.published,
                window.skipped,
                window.publish_failures,
                (now - last_stats_time).num_seconds()
            );
            window = PollStats::default();
            last_stats_time = now;
        }

        if settings.iterations.is_some_and(|limit| stats.iterations >= limit) {
            continue;
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(settings.interval) => {}
        }
    }

    info!(
        "Publish loop on {} finished: {} iterations, {} published, {} skipped, {} publish failures",
        cycle.settings().topic,
        stats.iterations,
        stats.published,
        stats.skipped,
        stats.publish_failures
    );
    stats
}

// Public interface for spawning the publish loop as a task
pub struct SensorHandle {
    task: JoinHandle<PollStats>,
}

impl SensorHandle {
    pub fn spawn<P>(
        link: SerialLink,
        settings: SensorSettings,
        sink: P,
        cancel: CancellationToken,
    ) -> Self
    where
        P: TelemetrySink + 'static,
    {
        info!("Spawning publish loop task");
        let task = tokio::spawn(run_publish_loop(link, settings, sink, cancel));
        debug!("Tokio task spawned with handle: {:?}", task);
        Self { task }
    }

    pub async fn join(self) -> PollStats {
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("Publish loop task terminated abnormally: {}", e);
                PollStats::default()
            }
        }
    }
}

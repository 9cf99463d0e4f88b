//! Role wiring
//!
//! Each role opens what it needs, runs its loops until they finish or the root
//! token is cancelled, then releases the broker session before the serial
//! links are dropped.

use std::time::Duration;

use color_eyre::eyre::{eyre, Report};
use color_eyre::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cli::Role;
use crate::config::Config;
use crate::control::light_controller::{ControllerStats, LightController};
use crate::control::policy::HysteresisPolicy;
use crate::monitor::run_monitor;
use crate::mqtt::message_manager::InboundMessage;
use crate::mqtt::mqtt_handler::{BrokerSession, SessionPublisher, TelemetrySink};
use crate::sensor::poll_cycle::PollSettings;
use crate::sensor::sensor_handle::{
    run_publish_loop, start_stream, PollStats, SensorHandle, SensorSettings,
};
use crate::serial::link::SerialLink;
use crate::serial::open_link;

pub async fn run(role: Role, config: Config, cancel: CancellationToken) -> Result<()> {
    match role {
        Role::Bridge { .. } => run_bridge(&config, cancel).await,
        Role::Controller { .. } => run_controller(&config, cancel).await,
        Role::Combined { .. } => run_combined(&config, cancel).await,
        Role::Monitor => run_monitor_role(&config, cancel).await,
    }
}

fn sensor_settings(config: &Config) -> SensorSettings {
    SensorSettings {
        poll: PollSettings {
            settle: config.bridge.settle(),
            topic: config.mqtt.topics().luminosity,
        },
        interval: config.bridge.interval(),
        iterations: config.bridge.iteration_limit(),
    }
}

/// Child token that also fires once `limit` has elapsed.
fn deadline_token(cancel: &CancellationToken, limit: Option<Duration>) -> CancellationToken {
    let token = cancel.child_token();
    if let Some(limit) = limit {
        info!("Stopping after {:?}", limit);
        let deadline = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = deadline.cancelled() => {}
                _ = tokio::time::sleep(limit) => {
                    info!("Run time of {:?} elapsed", limit);
                    deadline.cancel();
                }
            }
        });
    }
    token
}

// Disconnects whatever the role's work returned
async fn finish<T>(session: BrokerSession, result: Result<T>) -> Result<T> {
    match session.disconnect().await {
        Ok(status) => debug!("Final MQTT status: {:?}", status),
        Err(e) => warn!("MQTT disconnect failed: {}", e),
    }
    result
}

async fn run_bridge(config: &Config, cancel: CancellationToken) -> Result<()> {
    let link = open_link(&config.serial.sensor_port, &config.serial).await?;
    start_stream(&link).await;

    let (session, _inbound) = BrokerSession::connect(&config.mqtt, cancel.clone()).await?;
    info!("Bridge connected as {}", session.client_id());

    let stats = run_publish_loop(link, sensor_settings(config), session.publisher(), cancel).await;
    info!("Bridge finished with {:?}", stats);

    finish(session, Ok(())).await
}

fn controller_for(
    link: SerialLink,
    config: &Config,
    session: &BrokerSession,
) -> LightController<SessionPublisher> {
    LightController::new(
        HysteresisPolicy::new(config.controller.threshold),
        link,
        session.publisher(),
        config.mqtt.topics(),
        config.controller.max_status_lines,
    )
}

async fn run_controller(config: &Config, cancel: CancellationToken) -> Result<()> {
    let link = open_link(&config.serial.actuator_port, &config.serial).await?;

    let (session, inbound) = BrokerSession::connect(&config.mqtt, cancel.clone()).await?;
    info!("Controller connected as {}", session.client_id());

    let result = async {
        let mut controller = controller_for(link, config, &session);
        controller.announce_initial_state().await;
        session.subscribe(&config.mqtt.topics().luminosity).await?;

        let stop = deadline_token(&cancel, config.controller.run_for());
        let stats = controller.run(inbound, stop).await;
        info!("Controller finished with {:?}", stats);
        Ok::<_, Report>(())
    }
    .await;

    finish(session, result).await
}

/// Runs the publish loop and the light controller until either one ends.
///
/// Whichever loop finishes first cancels `stop`, which ends the other.
async fn run_both<P>(
    sensor_link: SerialLink,
    settings: SensorSettings,
    controller: LightController<P>,
    sink: P,
    inbound: mpsc::Receiver<InboundMessage>,
    stop: CancellationToken,
) -> Result<(PollStats, ControllerStats)>
where
    P: TelemetrySink + 'static,
{
    let controller_stop = stop.clone();
    let controller_task = tokio::spawn(async move {
        let stats = controller.run(inbound, controller_stop.clone()).await;
        controller_stop.cancel();
        stats
    });
    let sensor = SensorHandle::spawn(sensor_link, settings, sink, stop.clone());

    let poll_stats = sensor.join().await;
    info!("Publish loop finished with {:?}", poll_stats);
    stop.cancel();

    let controller_stats = controller_task
        .await
        .map_err(|e| eyre!("Light controller task failed: {}", e))?;
    info!("Controller finished with {:?}", controller_stats);
    Ok((poll_stats, controller_stats))
}

async fn run_combined(config: &Config, cancel: CancellationToken) -> Result<()> {
    let serial = &config.serial;
    let sensor_link = open_link(&serial.sensor_port, serial).await?;
    let actuator_link = if serial.actuator_port == serial.sensor_port {
        info!("Sensor and light share {}", serial.sensor_port);
        sensor_link.clone()
    } else {
        open_link(&serial.actuator_port, serial).await?
    };
    start_stream(&sensor_link).await;

    let (session, inbound) = BrokerSession::connect(&config.mqtt, cancel.clone()).await?;
    info!("Combined bridge connected as {}", session.client_id());

    let result = async {
        let mut controller = controller_for(actuator_link, config, &session);
        controller.announce_initial_state().await;
        session.subscribe(&config.mqtt.topics().luminosity).await?;

        let stop = deadline_token(&cancel, config.controller.run_for());
        run_both(
            sensor_link,
            sensor_settings(config),
            controller,
            session.publisher(),
            inbound,
            stop,
        )
        .await
        .map(|_| ())
    }
    .await;

    finish(session, result).await
}

async fn run_monitor_role(config: &Config, cancel: CancellationToken) -> Result<()> {
    let (session, inbound) = BrokerSession::connect(&config.mqtt, cancel.clone()).await?;

    let result = async {
        for topic in config.mqtt.topics().all() {
            session.subscribe(topic).await?;
        }
        run_monitor(inbound, cancel).await;
        Ok::<_, Report>(())
    }
    .await;

    finish(session, result).await
}

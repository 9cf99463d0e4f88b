use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(
    name = "greenhouse-bridge",
    version,
    about = "Bridges a greenhouse light sensor/actuator board to an MQTT broker"
)]
pub struct Cli {
    /// Config file, defaults to <config dir>/greenhouse-bridge/config.toml
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub role: Role,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Poll the sensor and publish luminosity readings
    Bridge {
        /// Serial device of the sensor board
        #[arg(short, long)]
        port: Option<String>,
        /// Number of polls, 0 for unlimited
        #[arg(short, long)]
        iterations: Option<u64>,
    },
    /// Switch the light from published luminosity readings
    Controller {
        /// Serial device of the light board
        #[arg(short, long)]
        port: Option<String>,
        /// Seconds to run, 0 for unlimited
        #[arg(short, long)]
        run_for: Option<u64>,
    },
    /// Run bridge and controller in one process
    Combined {
        #[arg(long)]
        sensor_port: Option<String>,
        #[arg(long)]
        actuator_port: Option<String>,
        #[arg(short, long)]
        iterations: Option<u64>,
        #[arg(short, long)]
        run_for: Option<u64>,
    },
    /// Log every message on the greenhouse topics
    Monitor,
}

impl Cli {
    /// Command line values win over the config file.
    pub fn apply_overrides(&self, config: &mut Config) {
        match &self.role {
            Role::Bridge { port, iterations } => {
                override_with(&mut config.serial.sensor_port, port.clone());
                override_with(&mut config.bridge.iterations, *iterations);
            }
            Role::Controller { port, run_for } => {
                override_with(&mut config.serial.actuator_port, port.clone());
                override_with(&mut config.controller.run_for_secs, *run_for);
            }
            Role::Combined {
                sensor_port,
                actuator_port,
                iterations,
                run_for,
            } => {
                override_with(&mut config.serial.sensor_port, sensor_port.clone());
                override_with(&mut config.serial.actuator_port, actuator_port.clone());
                override_with(&mut config.bridge.iterations, *iterations);
                override_with(&mut config.controller.run_for_secs, *run_for);
            }
            Role::Monitor => {}
        }
    }
}

fn override_with<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

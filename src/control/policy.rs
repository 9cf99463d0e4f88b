use std::fmt;

use crate::serial::codec::Command;

pub const DEFAULT_THRESHOLD: i64 = 30;

// Last state commanded to the light
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightState {
    // The device boots with the light on
    #[default]
    On,
    Off,
}

impl LightState {
    pub fn command(self) -> Command {
        match self {
            LightState::On => Command::LightOn,
            LightState::Off => Command::LightOff,
        }
    }
}

impl fmt::Display for LightState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LightState::On => write!(f, "ON"),
            LightState::Off => write!(f, "OFF"),
        }
    }
}

/// Threshold control law with hysteresis on the commanded state.
///
/// Bright readings switch the light off, dark readings switch it on, and a
/// reading that agrees with the current state never re-issues a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HysteresisPolicy {
    threshold: i64,
}

impl Default for HysteresisPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl HysteresisPolicy {
    pub fn new(threshold: i64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    pub fn decide(&self, reading: i64, current: LightState) -> LightState {
        match current {
            LightState::On if reading > self.threshold => LightState::Off,
            LightState::Off if reading <= self.threshold => LightState::On,
            unchanged => unchanged,
        }
    }
}

/// [`HysteresisPolicy::decide`] with the default threshold of 30.
pub fn decide(reading: i64, current: LightState) -> LightState {
    HysteresisPolicy::default().decide(reading, current)
}

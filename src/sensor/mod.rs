//! Sensor subsystem publishing luminosity readings
//!
//! Two parts:
//!
//! 1. [`poll_cycle`] - One GET_VALUE exchange as a typestate machine
//! 2. [`sensor_handle`] - Fixed-cadence loop and task lifecycle
//!
//! # Cycle
//!
//! ```text
//! Idle ──request──► AwaitLine ──decode──► Publishing ──publish──► Idle
//!                       │
//!                       └──skip (silent, garbage, serial error)──► Idle
//! ```

pub mod poll_cycle;
pub mod sensor_handle;

//! Light control subsystem
//!
//! - [`policy`] - Pure threshold/hysteresis decision on the commanded light state
//! - [`light_controller`] - Consumes luminosity messages, actuates the light and
//!   forwards device status lines
//!
//! # Data flow
//!
//! ```text
//! broker ──► inbound channel ──► LightController ──► HysteresisPolicy
//!                                      │
//!                                      ├──► serial (LIGHT_ON / LIGHT_OFF)
//!                                      └──► light_state topic (device status)
//! ```

pub mod light_controller;
pub mod policy;

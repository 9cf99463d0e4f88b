//! # MQTT Broker Session
//!
//! Connection lifecycle and message routing between the greenhouse loops and the
//! broker.
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings, client id and topic naming
//! ├── message_manager.rs  - Inbound message representation
//! └── mqtt_handler.rs     - Session, dispatch loop and reconnect handling
//! ```
//!
//! ## Threading
//!
//! The rumqttc event loop runs in its own tokio task for the whole session.
//! Inbound PUBLISH packets are pushed onto a bounded channel in arrival order;
//! the single consumer of that channel (the light controller or the monitor)
//! therefore handles messages one at a time without locking. Outbound publishes
//! go through a cloneable [`mqtt_handler::SessionPublisher`] and may come from
//! any task.
//!
//! All publishes and subscriptions use the configured QoS, exactly-once by
//! default.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;

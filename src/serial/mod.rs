//! # Serial Device Access
//!
//! Everything that touches the microcontroller lives here:
//!
//! ```text
//! serial/
//! ├── codec.rs      - Command bytes and `SENSOR_VALUE:<int>` line parsing
//! ├── transport.rs  - Blocking transport trait and the serialport backed implementation
//! └── link.rs       - Shared async handle used by the sensor and light loops
//! ```
//!
//! The wire protocol is one byte out, newline terminated text back:
//!
//! | byte | command        |
//! |------|----------------|
//! | `p`  | `GET_VALUE`    |
//! | `u`  | `LIGHT_ON`     |
//! | `d`  | `LIGHT_OFF`    |
//! | `s`  | `STREAM_START` |

pub mod codec;
pub mod link;
pub mod transport;

use std::time::Duration;

use tracing::info;

use crate::config::SerialConfig;
use link::SerialLink;
use transport::{SerialError, SerialPortTransport};

/// Opens `port` and waits for the board to finish its reset-on-open boot.
pub async fn open_link(port: &str, config: &SerialConfig) -> Result<SerialLink, SerialError> {
    let timeout = Duration::from_millis(config.read_timeout_ms);
    let transport = SerialPortTransport::open(port, config.baud_rate, timeout)?;

    if config.boot_delay_ms > 0 {
        info!(
            "Waiting {} ms for the device on {} to boot",
            config.boot_delay_ms, port
        );
        tokio::time::sleep(Duration::from_millis(config.boot_delay_ms)).await;
    }

    Ok(SerialLink::new(Box::new(transport), timeout))
}

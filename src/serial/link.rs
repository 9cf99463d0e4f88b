//! Async façade over a blocking [`SerialTransport`].
//!
//! Every operation runs on tokio's blocking pool while holding the link's mutex,
//! so one request/response exchange (write, settle, read) can never be split by
//! another task using the same device.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use super::codec::Command;
use super::transport::{SerialError, SerialTransport};

#[derive(Clone, Debug)]
pub struct SerialLink {
    transport: Arc<Mutex<Box<dyn SerialTransport>>>,
    read_timeout: Duration,
}

impl SerialLink {
    pub fn new(transport: Box<dyn SerialTransport>, read_timeout: Duration) -> Self {
        Self {
            transport: Arc::new(Mutex::new(transport)),
            read_timeout,
        }
    }

    pub async fn send(&self, command: Command) -> Result<(), SerialError> {
        self.with_transport(move |transport, _| transport.send(command))
            .await
    }

    /// Sends `command`, waits `settle`, then reads one line if the device has
    /// answered.
    pub async fn request(
        &self,
        command: Command,
        settle: Duration,
    ) -> Result<Option<String>, SerialError> {
        self.with_transport(move |transport, timeout| {
            transport.send(command)?;
            std::thread::sleep(settle);
            if transport.has_pending() {
                transport.read_line(timeout)
            } else {
                debug!("Device has nothing pending after {}", command);
                Ok(None)
            }
        })
        .await
    }

    pub async fn read_line(&self) -> Result<Option<String>, SerialError> {
        self.with_transport(|transport, timeout| transport.read_line(timeout))
            .await
    }

    /// Reads every line that is already waiting, up to `max_lines`.
    pub async fn drain_pending(&self, max_lines: usize) -> Result<Vec<String>, SerialError> {
        self.with_transport(move |transport, timeout| {
            let mut lines = Vec::new();
            while lines.len() < max_lines && transport.has_pending() {
                match transport.read_line(timeout)? {
                    Some(line) => lines.push(line),
                    None => break,
                }
            }
            Ok(lines)
        })
        .await
    }

    async fn with_transport<T, F>(&self, op: F) -> Result<T, SerialError>
    where
        T: Send + 'static,
        F: FnOnce(&mut dyn SerialTransport, Duration) -> Result<T, SerialError> + Send + 'static,
    {
        let transport = Arc::clone(&self.transport);
        let timeout = self.read_timeout;

        tokio::task::spawn_blocking(move || {
            let mut guard = match transport.lock() {
                Ok(guard) => guard,
                Err(poisoned) => {
                    warn!("Serial link mutex was poisoned, recovering");
                    poisoned.into_inner()
                }
            };
            op(&mut **guard, timeout)
        })
        .await
        .map_err(|e| SerialError::Worker(e.to_string()))?
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::super::codec::Command;
    use super::super::transport::{SerialError, SerialTransport};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum FakeOp {
        Write(Command),
        Read(Option<String>),
    }

    #[derive(Debug, Default)]
    pub struct FakeState {
        // Device I/O in the order it happened
        pub log: Vec<FakeOp>,
        pub written: Vec<Command>,
        pub incoming: VecDeque<String>,
        pub fail_writes: bool,
        pub fail_reads: bool,
        // Lines queued in response to a command being written
        pub replies: Vec<(Command, String)>,
    }

    /// In-memory device double shared with the test body.
    #[derive(Debug, Clone, Default)]
    pub struct FakeTransport {
        pub state: Arc<Mutex<FakeState>>,
    }

    impl FakeTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn reply_to(&self, command: Command, line: &str) {
            self.state
                .lock()
                .unwrap()
                .replies
                .push((command, line.to_string()));
        }

        pub fn push_line(&self, line: &str) {
            self.state.lock().unwrap().incoming.push_back(line.to_string());
        }

        pub fn set_fail_writes(&self, fail: bool) {
            self.state.lock().unwrap().fail_writes = fail;
        }

        pub fn set_fail_reads(&self, fail: bool) {
            self.state.lock().unwrap().fail_reads = fail;
        }

        pub fn written(&self) -> Vec<Command> {
            self.state.lock().unwrap().written.clone()
        }

        pub fn log(&self) -> Vec<FakeOp> {
            self.state.lock().unwrap().log.clone()
        }
    }

    impl SerialTransport for FakeTransport {
        fn send(&mut self, command: Command) -> Result<(), SerialError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_writes {
                return Err(SerialError::Write {
                    command,
                    source: io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"),
                });
            }
            state.written.push(command);
            state.log.push(FakeOp::Write(command));
            let replies: Vec<String> = state
                .replies
                .iter()
                .filter(|(trigger, _)| *trigger == command)
                .map(|(_, line)| line.clone())
                .collect();
            state.incoming.extend(replies);
            Ok(())
        }

        fn read_line(&mut self, _timeout: Duration) -> Result<Option<String>, SerialError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_reads {
                return Err(SerialError::Read(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "unplugged",
                )));
            }
            let line = state.incoming.pop_front();
            state.log.push(FakeOp::Read(line.clone()));
            Ok(line)
        }

        fn has_pending(&mut self) -> bool {
            !self.state.lock().unwrap().incoming.is_empty()
        }
    }
}

//! Serial port transport adapter.
//!
//! Wraps the `serialport` crate as a [`Transport`] and pumps inbound
//! bytes into the engine from a reader thread, so the protocol core
//! never touches the port directly. The port is expected to be
//! configured by the caller (nominally 9600 bps, 8N1).

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serialport::{DataBits, Parity, SerialPort, StopBits};
use tracing::{debug, warn};

use crate::core::Transport;
use crate::engine::XmodemEngine;

/// Read timeout used by the pump thread between polls.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// A serial port usable as the engine's outbound transport.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `path` at `baud`, 8 data bits, no parity, one stop bit.
    pub fn open(path: &str, baud: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(POLL_TIMEOUT)
            .open()?;
        debug!(path, baud, "serial port opened");
        Ok(SerialTransport { port })
    }

    /// Wrap an already-configured port.
    pub fn from_port(port: Box<dyn SerialPort>) -> Self {
        SerialTransport { port }
    }

    /// Clone the underlying port handle for a reader thread.
    pub fn try_clone_port(&self) -> Result<Box<dyn SerialPort>, serialport::Error> {
        self.port.try_clone()
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }
}

/// Reader thread delivering inbound serial bytes to an engine.
///
/// Runs until [`stop`](SerialListener::stop) is called or the port
/// returns a non-timeout error.
pub struct SerialListener {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SerialListener {
    /// Start pumping `port` into `engine`.
    pub fn spawn(mut port: Box<dyn SerialPort>, engine: Arc<XmodemEngine>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("xmodem-serial-rx".into())
            .spawn(move || {
                let mut buffer = [0u8; 1024];
                while flag.load(Ordering::SeqCst) {
                    match port.read(&mut buffer) {
                        Ok(0) => {}
                        Ok(n) => engine.feed_bytes(&buffer[..n]),
                        Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                        Err(e) => {
                            warn!(error = %e, "serial read failed, stopping listener");
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn serial reader thread");

        SerialListener {
            running,
            thread: Some(thread),
        }
    }

    /// Stop the reader thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SerialListener {
    fn drop(&mut self) {
        self.stop();
    }
}

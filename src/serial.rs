//! Native asynchronous serial port support for [`Link`](crate::Link).
//!
//! Uses the [`serial2-tokio`](https://crates.io/crates/serial2-tokio) crate.

use crate::Connect;
use async_trait::async_trait;
use serial2_tokio::{SerialPort, Settings};
use std::io;

/// Baud rate of the firing box uplink.
pub const BAUD_RATE: u32 = 115_200;

/// Opens a native serial port at the given path.
///
/// The port is configured raw at [`BAUD_RATE`], 8N1, with stale buffers
/// discarded so a fresh session never sees frames from a previous one.
pub fn open(path: &str) -> io::Result<SerialPort> {
    let port = SerialPort::open(path, |mut settings: Settings| {
        settings.set_raw();
        settings.set_baud_rate(BAUD_RATE)?;

        Ok(settings)
    })?;

    port.discard_buffers()?;

    Ok(port)
}

/// [`Connect`] implementation opening a native serial port.
///
/// ```no_run
/// # #[tokio::main]
/// # async fn main() {
/// use padlink::{serial::SerialConnector, Link, LinkConfig};
///
/// struct Silent;
///
/// impl padlink::Observer for Silent {}
///
/// let connector = SerialConnector::new("/dev/ttyACM0");
/// let link = Link::open(connector, Silent, LinkConfig::default());
/// # }
/// ```
#[derive(Debug)]
pub struct SerialConnector {
    path: String,
}

impl SerialConnector {
    /// Constructs a connector for the port at the given path.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Connect for SerialConnector {
    type Transport = SerialPort;

    async fn connect(&mut self) -> io::Result<SerialPort> {
        open(&self.path)
    }
}

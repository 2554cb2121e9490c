use std::io::{Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, StopBits};

use crate::error::Result;

/// Default autopilot link speed.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Serial link to the autopilot (8N1, no flow control).
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0`.
    pub path: String,
    pub baud: u32,
    /// Bounded wait for a single read, so the serial pump can observe stop.
    pub read_timeout: Duration,
}

impl SerialConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud: DEFAULT_BAUD,
            read_timeout: Duration::from_millis(10),
        }
    }

    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Open the device and split it into independent reader and writer
    /// handles, one for each bridge pump.
    pub fn open(&self) -> Result<(Box<dyn Read + Send>, Box<dyn Write + Send>)> {
        tracing::info!(path = %self.path, baud = self.baud, "opening serial port");

        let port = serialport::new(&self.path, self.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.read_timeout)
            .open()?;

        let reader = port.try_clone()?;
        Ok((Box::new(reader), Box::new(port)))
    }
}

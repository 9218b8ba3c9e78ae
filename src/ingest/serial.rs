//! Serial port transport.
//!
//! Opens devices with fixed line settings: 115200 baud, 8 data bits, no
//! parity, one stop bit, no flow control.

use std::io;

use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use crate::ingest::DeviceTransport;

/// Serial line speed.
pub const BAUD_RATE: u32 = 115_200;

/// Serial port transport using `tokio-serial`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialTransport;

impl SerialTransport {
    /// Create a new serial transport.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl DeviceTransport for SerialTransport {
    type Stream = SerialStream;

    async fn open(&self, device: &str) -> io::Result<Self::Stream> {
        let port = tokio_serial::new(device, BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open_native_async()?;
        Ok(port)
    }
}

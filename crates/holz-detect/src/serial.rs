//! Serial-port transport
//!
//! Holzworth instruments enumerate as USB serial devices carrying their
//! instrument serial number in the USB descriptor. [`SerialTransport`] maps a
//! serial number to a port through [`PortScanner`] and opens it with
//! `tokio_serial`.

use std::time::Duration;

use async_trait::async_trait;
use holz_protocol::Framing;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info, trace};

use crate::error::TransportError;
use crate::scanner::PortScanner;
use crate::transport::{DeviceLink, Transport};

/// Default baud rate for the instrument's virtual COM port
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Transport over USB serial ports
#[derive(Debug, Clone)]
pub struct SerialTransport {
    scanner: PortScanner,
    baud_rate: u32,
}

impl SerialTransport {
    /// Create a transport with the default scanner and baud rate
    pub fn new() -> Self {
        Self::with_scanner(PortScanner::new(), DEFAULT_BAUD_RATE)
    }

    /// Create a transport with a custom scanner and baud rate
    pub fn with_scanner(scanner: PortScanner, baud_rate: u32) -> Self {
        Self { scanner, baud_rate }
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SerialTransport {
    async fn attached(&self) -> Result<Vec<String>, TransportError> {
        Ok(self
            .scanner
            .holzworth_devices()?
            .into_iter()
            .map(|d| d.serial_number)
            .collect())
    }

    async fn open(&self, serial: &str) -> Result<Box<dyn DeviceLink>, TransportError> {
        let device = self
            .scanner
            .find(serial)?
            .ok_or_else(|| TransportError::NotAttached(serial.to_string()))?;

        debug!("Opening {} on {} at {} baud", serial, device.port, self.baud_rate);
        let stream = tokio_serial::new(device.port.as_str(), self.baud_rate)
            .timeout(Duration::from_millis(100))
            .open_native_async()?;

        info!("Opened {} on {}", serial, device.port);
        Ok(Box::new(SerialLink::new(serial.to_string(), stream)))
    }
}

/// Link to one instrument over a serial stream
///
/// Bytes read past the end of one reply are kept for the next read.
pub struct SerialLink<S = SerialStream> {
    serial: String,
    stream: Option<S>,
    pending: Vec<u8>,
    buffer: Vec<u8>,
}

impl<S> SerialLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn new(serial: String, stream: S) -> Self {
        Self {
            serial,
            stream: Some(stream),
            pending: Vec::new(),
            buffer: vec![0u8; 256],
        }
    }

    fn stream(&mut self) -> Result<&mut S, TransportError> {
        self.stream.as_mut().ok_or(TransportError::Closed)
    }

    async fn read_line(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let rest = self.pending.split_off(pos + 1);
                return Ok(std::mem::replace(&mut self.pending, rest));
            }
            if self.pending.len() >= max_len {
                self.pending.clear();
                return Err(TransportError::Overrun(max_len));
            }

            let mut buffer = std::mem::take(&mut self.buffer);
            let n = self.stream()?.read(&mut buffer).await;
            self.buffer = buffer;
            match n? {
                0 => return Err(TransportError::Closed),
                n => self.pending.extend_from_slice(&self.buffer[..n]),
            }
        }
    }

    async fn read_fixed(&mut self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut reply = Vec::with_capacity(len);
        let take = self.pending.len().min(len);
        reply.extend(self.pending.drain(..take));
        if reply.len() < len {
            let start = reply.len();
            reply.resize(len, 0);
            self.stream()?.read_exact(&mut reply[start..]).await?;
        }
        Ok(reply)
    }
}

#[async_trait]
impl<S> DeviceLink for SerialLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        trace!("{} <- {:02X?}", self.serial, data);
        let stream = self.stream()?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read(&mut self, framing: Framing) -> Result<Vec<u8>, TransportError> {
        let reply = match framing {
            Framing::Line { max_len } => self.read_line(max_len).await?,
            Framing::Fixed(len) => self.read_fixed(len).await?,
        };
        trace!("{} -> {:02X?}", self.serial, reply);
        Ok(reply)
    }

    fn discard_pending(&mut self) {
        self.pending.clear();
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.stream.take().is_some() {
            debug!("Closed link to {}", self.serial);
        }
        Ok(())
    }
}

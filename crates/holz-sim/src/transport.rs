//! In-memory transport over simulated instruments
//!
//! [`SimTransport`] implements [`Transport`] so the session manager can be
//! driven end to end without hardware. Instruments can be attached and
//! detached at runtime, and each one carries fault knobs for exercising
//! timeout, retry and decode-error handling.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use holz_detect::{DeviceLink, Transport, TransportError};
use holz_protocol::Framing;
use tracing::{debug, info};

use crate::SimulatedInstrument;

/// Fault injection settings for one simulated device
#[derive(Debug, Clone, Default)]
pub struct DeviceFaults {
    /// Delay before each reply becomes readable
    pub reply_delay: Duration,
    /// Delay before `open` completes
    pub open_delay: Duration,
    /// Number of upcoming writes that fail with a transient busy error
    pub busy_writes: u32,
    /// Number of upcoming replies that are truncated by one byte
    pub corrupt_replies: u32,
    /// Never reply to anything
    pub silent: bool,
}

struct SimDevice {
    instrument: Box<dyn SimulatedInstrument>,
    attached: bool,
    faults: DeviceFaults,
    log: Vec<Vec<u8>>,
    opens: usize,
    active_links: usize,
    peak_links: usize,
}

#[derive(Default)]
struct SimState {
    devices: Vec<SimDevice>,
}

impl SimState {
    fn device(&mut self, serial: &str) -> Option<&mut SimDevice> {
        self.devices
            .iter_mut()
            .find(|d| d.instrument.serial() == serial)
    }
}

/// Transport backed by simulated instruments
#[derive(Clone, Default)]
pub struct SimTransport {
    state: Arc<Mutex<SimState>>,
}

impl SimTransport {
    /// Create an empty transport with no instruments attached
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach an instrument, or re-attach one that was detached
    pub fn attach(&self, instrument: impl SimulatedInstrument + 'static) {
        let serial = instrument.serial().to_string();
        let mut state = self.lock();
        match state.device(&serial) {
            Some(device) => device.attached = true,
            None => state.devices.push(SimDevice {
                instrument: Box::new(instrument),
                attached: true,
                faults: DeviceFaults::default(),
                log: Vec::new(),
                opens: 0,
                active_links: 0,
                peak_links: 0,
            }),
        }
        info!("Simulated {} attached", serial);
    }

    /// Detach an instrument; open links to it start failing
    pub fn detach(&self, serial: &str) {
        if let Some(device) = self.lock().device(serial) {
            device.attached = false;
            info!("Simulated {} detached", serial);
        }
    }

    /// Change the fault settings of one device
    pub fn configure(&self, serial: &str, update: impl FnOnce(&mut DeviceFaults)) {
        if let Some(device) = self.lock().device(serial) {
            update(&mut device.faults);
        }
    }

    /// Delay every reply from `serial`
    pub fn set_reply_delay(&self, serial: &str, delay: Duration) {
        self.configure(serial, |f| f.reply_delay = delay);
    }

    /// Make the next `count` writes to `serial` fail as busy
    pub fn fail_next_writes(&self, serial: &str, count: u32) {
        self.configure(serial, |f| f.busy_writes = count);
    }

    /// Truncate the next `count` replies from `serial`
    pub fn corrupt_next_replies(&self, serial: &str, count: u32) {
        self.configure(serial, |f| f.corrupt_replies = count);
    }

    /// Stop or resume replies from `serial`
    pub fn set_silent(&self, serial: &str, silent: bool) {
        self.configure(serial, |f| f.silent = silent);
    }

    /// How many times `serial` has been opened
    pub fn open_count(&self, serial: &str) -> usize {
        self.lock().device(serial).map_or(0, |d| d.opens)
    }

    /// How many links to `serial` are currently open
    pub fn active_links(&self, serial: &str) -> usize {
        self.lock().device(serial).map_or(0, |d| d.active_links)
    }

    /// Most links to `serial` that were ever open at the same time
    pub fn peak_links(&self, serial: &str) -> usize {
        self.lock().device(serial).map_or(0, |d| d.peak_links)
    }

    /// Every frame written to `serial`, in order
    pub fn command_log(&self, serial: &str) -> Vec<Vec<u8>> {
        self.lock()
            .device(serial)
            .map(|d| d.log.clone())
            .unwrap_or_default()
    }

    /// Frames written to `serial` as text, for ASCII instruments
    pub fn command_log_text(&self, serial: &str) -> Vec<String> {
        self.command_log(serial)
            .iter()
            .map(|frame| String::from_utf8_lossy(frame).trim_end().to_string())
            .collect()
    }
}

#[async_trait]
impl Transport for SimTransport {
    async fn attached(&self) -> Result<Vec<String>, TransportError> {
        Ok(self
            .lock()
            .devices
            .iter()
            .filter(|d| d.attached)
            .map(|d| d.instrument.serial().to_string())
            .collect())
    }

    async fn open(&self, serial: &str) -> Result<Box<dyn DeviceLink>, TransportError> {
        let delay = {
            let mut state = self.lock();
            let device = state
                .device(serial)
                .filter(|d| d.attached)
                .ok_or_else(|| TransportError::NotAttached(serial.to_string()))?;
            device.opens += 1;
            device.active_links += 1;
            device.peak_links = device.peak_links.max(device.active_links);
            device.faults.open_delay
        };

        let link = SimLink {
            serial: serial.to_string(),
            state: Arc::clone(&self.state),
            replies: VecDeque::new(),
            closed: false,
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        debug!("Opened simulated link to {}", serial);
        Ok(Box::new(link))
    }
}

/// Link to one simulated instrument
pub struct SimLink {
    serial: String,
    state: Arc<Mutex<SimState>>,
    replies: VecDeque<Vec<u8>>,
    closed: bool,
}

impl SimLink {
    fn with_device<R>(
        &self,
        f: impl FnOnce(&mut SimDevice) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.device(&self.serial) {
            Some(device) if device.attached => f(device),
            _ => Err(TransportError::NotAttached(self.serial.clone())),
        }
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(device) = state.device(&self.serial) {
            device.active_links = device.active_links.saturating_sub(1);
        }
    }
}

#[async_trait]
impl DeviceLink for SimLink {
    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let reply = self.with_device(|device| {
            if device.faults.busy_writes > 0 {
                device.faults.busy_writes -= 1;
                return Err(TransportError::Busy(device.instrument.serial().to_string()));
            }
            device.log.push(data.to_vec());
            if device.faults.silent {
                return Ok(None);
            }
            let mut reply = device.instrument.handle(data);
            if let Some(bytes) = reply.as_mut() {
                if device.faults.corrupt_replies > 0 {
                    device.faults.corrupt_replies -= 1;
                    bytes.pop();
                }
            }
            Ok(reply)
        })?;

        if let Some(reply) = reply {
            self.replies.push_back(reply);
        }
        Ok(())
    }

    async fn read(&mut self, _framing: Framing) -> Result<Vec<u8>, TransportError> {
        let delay = self.with_device(|device| Ok(device.faults.reply_delay))?;
        match self.replies.pop_front() {
            Some(reply) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok(reply)
            }
            // a silent instrument never completes the read
            None => std::future::pending().await,
        }
    }

    fn discard_pending(&mut self) {
        self.replies.clear();
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.release();
        debug!("Closed simulated link to {}", self.serial);
        Ok(())
    }
}

impl Drop for SimLink {
    fn drop(&mut self) {
        self.release();
    }
}

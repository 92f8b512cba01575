//! USB serial port scanner
//!
//! This module enumerates USB serial ports and picks out the ones that
//! belong to Holzworth instruments, keyed by USB serial number.

use serde::Serialize;
use serialport::{available_ports, SerialPortType};
use tracing::{debug, info};

use crate::error::DetectError;

/// Information about a serial port
#[derive(Debug, Clone, Serialize)]
pub struct SerialPortInfo {
    /// Port name (e.g., /dev/ttyACM0, COM3)
    pub port: String,
    /// USB Vendor ID (if USB)
    pub vid: Option<u16>,
    /// USB Product ID (if USB)
    pub pid: Option<u16>,
    /// USB serial number (if available)
    pub serial_number: Option<String>,
    /// USB manufacturer string
    pub manufacturer: Option<String>,
    /// USB product string
    pub product: Option<String>,
}

impl SerialPortInfo {
    /// Create from serialport crate's port info
    fn from_serialport(name: String, port_type: &SerialPortType) -> Self {
        match port_type {
            SerialPortType::UsbPort(usb) => Self {
                port: name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                serial_number: usb.serial_number.clone(),
                manufacturer: usb.manufacturer.clone(),
                product: usb.product.clone(),
            },
            _ => Self {
                port: name,
                vid: None,
                pid: None,
                serial_number: None,
                manufacturer: None,
                product: None,
            },
        }
    }

    /// Check whether the USB descriptor strings mention any of the patterns
    fn matches_any(&self, patterns: &[String]) -> bool {
        let fields = [self.manufacturer.as_deref(), self.product.as_deref()];
        patterns.iter().any(|pattern| {
            let pattern = pattern.to_ascii_lowercase();
            fields
                .iter()
                .flatten()
                .any(|f| f.to_ascii_lowercase().contains(&pattern))
        })
    }
}

/// A Holzworth instrument found on a USB serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachedDevice {
    /// USB serial number, used as the device address
    pub serial_number: String,
    /// Serial port path
    pub port: String,
    /// USB product string
    pub product: Option<String>,
}

/// Serial port scanner configuration
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Skip ports whose names contain these patterns
    pub skip_patterns: Vec<String>,
    /// Accept ports whose manufacturer or product contains these patterns
    pub match_patterns: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            skip_patterns: vec![
                // Bluetooth ports on macOS
                "Bluetooth".to_string(),
                // Debug/logging ports
                "debug".to_string(),
            ],
            match_patterns: vec!["Holzworth".to_string()],
        }
    }
}

/// Serial port scanner
#[derive(Debug, Clone, Default)]
pub struct PortScanner {
    config: ScannerConfig,
}

impl PortScanner {
    /// Create a new scanner with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Enumerate all available serial ports
    pub fn enumerate_ports(&self) -> Result<Vec<SerialPortInfo>, DetectError> {
        debug!("Enumerating serial ports...");
        let ports = available_ports().map_err(|e| DetectError::EnumerationFailed(e.to_string()))?;

        Ok(ports
            .into_iter()
            .map(|p| SerialPortInfo::from_serialport(p.port_name, &p.port_type))
            .filter(|p| !self.should_skip_port(p))
            .collect())
    }

    /// Enumerate attached Holzworth instruments in enumeration order
    pub fn holzworth_devices(&self) -> Result<Vec<AttachedDevice>, DetectError> {
        let devices = self.select_devices(self.enumerate_ports()?);
        if devices.is_empty() {
            debug!("No Holzworth instruments found");
        } else {
            info!("Found {} Holzworth instrument(s)", devices.len());
            for dev in &devices {
                debug!("  {} on {}", dev.serial_number, dev.port);
            }
        }
        Ok(devices)
    }

    /// Find the port of the instrument with this serial number
    pub fn find(&self, serial: &str) -> Result<Option<AttachedDevice>, DetectError> {
        Ok(self
            .holzworth_devices()?
            .into_iter()
            .find(|d| d.serial_number == serial))
    }

    /// Keep matching USB ports that expose a serial number, first port per serial
    fn select_devices(&self, ports: Vec<SerialPortInfo>) -> Vec<AttachedDevice> {
        let mut devices: Vec<AttachedDevice> = Vec::new();
        for port in ports {
            if !port.matches_any(&self.config.match_patterns) {
                continue;
            }
            let Some(serial_number) = port.serial_number.clone() else {
                continue;
            };
            // Composite devices can expose several ports with one serial
            if devices.iter().any(|d| d.serial_number == serial_number) {
                continue;
            }
            devices.push(AttachedDevice {
                serial_number,
                port: port.port,
                product: port.product,
            });
        }
        devices
    }

    /// Check if a port should be skipped
    fn should_skip_port(&self, port: &SerialPortInfo) -> bool {
        self.config
            .skip_patterns
            .iter()
            .any(|pattern| port.port.contains(pattern))
    }
}

//! Session manager
//!
//! [`SessionManager`] is the public entry point. Every per-device operation
//! takes the device serial first, looks the device up in the registry, checks
//! that its dialect can carry the operation and forwards it to the device's
//! channel. The registry lock is only held for table lookups and updates.
//!
//! Legacy setters come in a numeric form taking instrument units and a `_str`
//! form taking a human-readable value such as `"-10.5 dBm"` or `"3 GHz"`.
//! Both end in the same typed request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use holz_detect::{DeviceLink, DialectProber, ProbeConfig, ProbeResult, Transport, TransportError};
use holz_protocol::hs9000::Channel;
use holz_protocol::{
    units, Dialect, ModelDatabase, ModulationMode, ProtocolError, Request, Response,
};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::channel::{ChannelSender, ChannelState, DeviceChannel};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::SessionEvent;
use crate::hs9000::Hs9000Channel;
use crate::registry::{Connection, DeviceHandle, DeviceRecord, Registry};

const EVENT_CAPACITY: usize = 64;

/// Multi-device session over a [`Transport`]
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    prober: DialectProber,
    registry: Mutex<Registry>,
    events: broadcast::Sender<SessionEvent>,
    next_connection_id: AtomicU64,
}

impl SessionManager {
    /// Create a session with default configuration
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::with_config(transport, SessionConfig::default())
    }

    /// Create a session with custom configuration
    pub fn with_config(transport: impl Transport + 'static, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let prober = DialectProber::with_config(ProbeConfig {
            timeout: config.probe_timeout(),
        });
        Self {
            transport: Arc::new(transport),
            config,
            prober,
            registry: Mutex::new(Registry::default()),
            events,
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Subscribe to lifecycle and fault events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SessionEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------------
    // Registry operations
    // ------------------------------------------------------------------------

    /// Returns whether the transport currently reports `serial` as connected
    pub async fn is_attached(&self, serial: &str) -> Result<bool, SessionError> {
        Ok(self.transport.is_attached(serial).await?)
    }

    /// Attached serials in discovery order
    ///
    /// Also records newly attached serials in the registry and forgets
    /// detached ones that are not open.
    pub async fn list_attached(&self) -> Result<Vec<String>, SessionError> {
        let attached = self.transport.attached().await?;
        let mut registry = self.registry.lock().await;
        for serial in registry.merge_attached(&attached) {
            debug!("Discovered {}", serial);
            self.emit(SessionEvent::DeviceDiscovered { serial });
        }
        Ok(registry.serials_in(&attached))
    }

    /// Snapshot of one registry entry
    pub async fn device(&self, serial: &str) -> Result<DeviceRecord, SessionError> {
        self.registry
            .lock()
            .await
            .get(serial)
            .map(|entry| entry.record())
            .ok_or_else(|| SessionError::DeviceNotFound(serial.to_string()))
    }

    /// Snapshot of every registry entry in discovery order
    pub async fn devices(&self) -> Vec<DeviceRecord> {
        self.registry.lock().await.records()
    }

    /// State of an open device's channel
    pub async fn channel_state(&self, serial: &str) -> Result<ChannelState, SessionError> {
        self.registry
            .lock()
            .await
            .get(serial)
            .and_then(|entry| entry.connection.as_ref())
            .map(|connection| connection.channel.state())
            .ok_or_else(|| SessionError::DeviceNotFound(serial.to_string()))
    }

    async fn healthy_handle(&self, serial: &str) -> Option<DeviceHandle> {
        self.registry
            .lock()
            .await
            .get(serial)
            .and_then(|entry| entry.healthy_handle())
    }

    /// Open a device, or return the existing handle if it is already open
    ///
    /// The dialect is probed on the first open and kept for the lifetime of
    /// the registry entry. A faulted device is closed and opened afresh.
    ///
    /// An open that overlaps [`Self::close_all`] fails with
    /// [`SessionError::DeviceNotFound`] unless it completed before the
    /// registry was cleared.
    pub async fn open(&self, serial: &str) -> Result<DeviceHandle, SessionError> {
        if let Some(handle) = self.healthy_handle(serial).await {
            debug!("{} already open", serial);
            return Ok(handle);
        }
        if !self.transport.is_attached(serial).await? {
            return Err(SessionError::DeviceNotFound(serial.to_string()));
        }

        let (gate, generation) = {
            let mut registry = self.registry.lock().await;
            let generation = registry.generation();
            let (entry, created) = registry.ensure(serial);
            let gate = Arc::clone(&entry.open_gate);
            if created {
                self.emit(SessionEvent::DeviceDiscovered {
                    serial: serial.to_string(),
                });
            }
            (gate, generation)
        };
        let _opening = gate.lock().await;

        let (stale, known_dialect) = {
            let mut registry = self.registry.lock().await;
            if registry.generation() != generation {
                debug!("Registry cleared while waiting to open {}", serial);
                return Err(SessionError::DeviceNotFound(serial.to_string()));
            }
            let (entry, _) = registry.ensure(serial);
            // a concurrent open may have finished while we waited
            if let Some(handle) = entry.healthy_handle() {
                return Ok(handle);
            }
            (entry.connection.take(), entry.dialect)
        };
        if let Some(stale) = stale {
            info!("Re-opening faulted device {}", serial);
            stale.channel.shutdown().await;
            self.emit(SessionEvent::DeviceClosed {
                serial: serial.to_string(),
            });
        }

        let (mut link, probe) = match timeout(
            self.config.open_timeout(),
            self.connect(serial, known_dialect),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!("Opening {} timed out", serial);
                return Err(SessionError::OpenTimeout {
                    serial: serial.to_string(),
                    timeout_ms: self.config.open_timeout_ms,
                });
            }
        };

        let connection_id = {
            let mut registry = self.registry.lock().await;
            if registry.generation() != generation {
                drop(registry);
                warn!("Registry cleared while opening {}; dropping the new link", serial);
                if let Err(e) = link.close().await {
                    warn!("Error closing link to {}: {}", serial, e);
                }
                return Err(SessionError::DeviceNotFound(serial.to_string()));
            }

            let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
            let channel = DeviceChannel::spawn(
                serial.to_string(),
                probe.dialect,
                link,
                &self.config,
                self.events.clone(),
            );
            let (entry, _) = registry.ensure(serial);
            entry.dialect = Some(probe.dialect);
            if probe.identity.is_some() {
                entry.identity = probe.identity;
            }
            entry.closed = false;
            entry.connection = Some(Connection {
                id: connection_id,
                channel,
            });
            connection_id
        };

        info!("Opened {} ({} dialect)", serial, probe.dialect);
        self.emit(SessionEvent::DeviceOpened {
            serial: serial.to_string(),
            dialect: probe.dialect,
            connection_id,
        });
        Ok(DeviceHandle::new(serial, probe.dialect, connection_id))
    }

    /// Open a device that is not already open
    ///
    /// Fails with [`SessionError::AlreadyOpen`] where [`Self::open`] would
    /// return the existing handle.
    pub async fn try_open(&self, serial: &str) -> Result<DeviceHandle, SessionError> {
        if self.healthy_handle(serial).await.is_some() {
            return Err(SessionError::AlreadyOpen(serial.to_string()));
        }
        self.open(serial).await
    }

    async fn connect(
        &self,
        serial: &str,
        known_dialect: Option<Dialect>,
    ) -> Result<(Box<dyn DeviceLink>, ProbeResult), SessionError> {
        let mut link = self.transport.open(serial).await.map_err(|e| match e {
            TransportError::NotAttached(_) => SessionError::DeviceNotFound(serial.to_string()),
            e => SessionError::Transport(e),
        })?;

        let probe = match known_dialect {
            Some(dialect) => ProbeResult {
                dialect,
                identity: None,
            },
            None => self.prober.probe(serial, link.as_mut()).await,
        };
        Ok((link, probe))
    }

    /// Drain and close one device
    ///
    /// Commands already queued for the device complete first. Closing a
    /// registered device that is not open (discovered, already closed) is a
    /// no-op; a serial the registry has never seen is
    /// [`SessionError::DeviceNotFound`].
    pub async fn close(&self, serial: &str) -> Result<(), SessionError> {
        let gate = self
            .registry
            .lock()
            .await
            .get(serial)
            .map(|entry| Arc::clone(&entry.open_gate))
            .ok_or_else(|| SessionError::DeviceNotFound(serial.to_string()))?;
        let _opening = gate.lock().await;

        let connection = {
            let mut registry = self.registry.lock().await;
            registry.get_mut(serial).and_then(|entry| {
                let connection = entry.connection.take();
                entry.closed |= connection.is_some();
                connection
            })
        };

        if let Some(connection) = connection {
            connection.channel.shutdown().await;
            info!("Closed {}", serial);
            self.emit(SessionEvent::DeviceClosed {
                serial: serial.to_string(),
            });
        }
        Ok(())
    }

    /// Drain and close every device and clear the registry
    ///
    /// Opens already in progress finish first and are then closed with the
    /// rest. Idempotent; safe to call with nothing open.
    pub async fn close_all(&self) {
        let gates = self.registry.lock().await.gates();
        let mut held = Vec::with_capacity(gates.len());
        for gate in gates {
            held.push(gate.lock_owned().await);
        }

        let channels = {
            let mut registry = self.registry.lock().await;
            if registry.is_empty() {
                debug!("Registry already empty");
            }
            registry.drain()
        };
        drop(held);

        let mut closing = JoinSet::new();
        for (serial, channel) in channels {
            closing.spawn(async move {
                channel.shutdown().await;
                serial
            });
        }
        while let Some(result) = closing.join_next().await {
            match result {
                Ok(serial) => self.emit(SessionEvent::DeviceClosed { serial }),
                Err(e) => warn!("Close task failed: {}", e),
            }
        }

        info!("All devices closed");
        self.emit(SessionEvent::AllClosed);
    }

    // ------------------------------------------------------------------------
    // Routing
    // ------------------------------------------------------------------------

    /// Channel for an open device that can carry `request`
    async fn route(&self, serial: &str, request: &Request) -> Result<ChannelSender, SessionError> {
        let sender = self
            .registry
            .lock()
            .await
            .sender(serial)
            .ok_or_else(|| SessionError::DeviceNotFound(serial.to_string()))?;
        sender.ensure_supports(request)?;
        Ok(sender)
    }

    async fn execute(&self, serial: &str, request: Request) -> Result<Response, SessionError> {
        let sender = self.route(serial, &request).await?;
        sender.submit(request).await
    }

    async fn command(&self, serial: &str, request: Request) -> Result<(), SessionError> {
        let operation = request.name();
        match self.execute(serial, request).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(serial, operation, &other)),
        }
    }

    /// Route first so a dialect mismatch wins over a bad argument
    async fn command_parsed(
        &self,
        serial: &str,
        template: Request,
        parse: impl FnOnce() -> Result<Request, SessionError>,
    ) -> Result<(), SessionError> {
        let sender = self.route(serial, &template).await?;
        let request = parse()?;
        let operation = request.name();
        match sender.submit(request).await? {
            Response::Ack => Ok(()),
            other => Err(unexpected(serial, operation, &other)),
        }
    }

    async fn read_short(&self, serial: &str, request: Request) -> Result<i16, SessionError> {
        let operation = request.name();
        match self.execute(serial, request).await? {
            Response::Short(value) => Ok(value),
            other => Err(unexpected(serial, operation, &other)),
        }
    }

    // ------------------------------------------------------------------------
    // HS9000 dialect
    // ------------------------------------------------------------------------

    /// Send an ASCII command and return the instrument's reply line
    pub async fn raw_command(&self, serial: &str, command: &str) -> Result<String, SessionError> {
        let request = Request::Raw(command.to_string());
        let operation = request.name();
        match self.execute(serial, request).await? {
            Response::Text(reply) => Ok(reply),
            other => Err(unexpected(serial, operation, &other)),
        }
    }

    /// Typed access to one channel (`"CH1"`, `"CH2"`, ...) of an HS9000 device
    ///
    /// For a model listed in [`ModelDatabase`], a channel number beyond the
    /// model's channel count is rejected without touching the device.
    pub async fn hs9000_channel(
        &self,
        serial: &str,
        channel: &str,
    ) -> Result<Hs9000Channel<'_>, SessionError> {
        self.route(serial, &Request::Raw(String::new())).await?;
        let channel = Channel::parse(channel)?;

        let model = self
            .registry
            .lock()
            .await
            .get(serial)
            .and_then(|entry| entry.identity.as_ref())
            .and_then(|identity| ModelDatabase::by_name(&identity.model));
        if let Some(model) = model {
            if channel.0 > model.channels {
                return Err(SessionError::InvalidArgument(format!(
                    "{} is a {} with {} channel(s), there is no {}",
                    serial, model.model, model.channels, channel
                )));
            }
        }
        Ok(Hs9000Channel::new(self, serial, channel))
    }

    // ------------------------------------------------------------------------
    // Legacy dialect
    // ------------------------------------------------------------------------

    pub async fn rf_power_on(&self, serial: &str) -> Result<(), SessionError> {
        self.command(serial, Request::RfPowerOn).await
    }

    pub async fn rf_power_off(&self, serial: &str) -> Result<(), SessionError> {
        self.command(serial, Request::RfPowerOff).await
    }

    /// Returns whether the RF output is enabled
    pub async fn is_rf_power_on(&self, serial: &str) -> Result<bool, SessionError> {
        let request = Request::IsRfPowerOn;
        let operation = request.name();
        match self.execute(serial, request).await? {
            Response::Flag(on) => Ok(on),
            other => Err(unexpected(serial, operation, &other)),
        }
    }

    /// Set output power in instrument units (see [`holz_protocol::InstrumentScale`])
    pub async fn set_power(&self, serial: &str, power: i16) -> Result<(), SessionError> {
        self.command(serial, Request::SetPower(power)).await
    }

    /// Set output power from text such as `"-10.5"` or `"-10.5 dBm"`
    pub async fn set_power_str(&self, serial: &str, power: &str) -> Result<(), SessionError> {
        let per_db = self.config.scale.power_per_db;
        self.command_parsed(serial, Request::SetPower(0), || {
            Ok(Request::SetPower(units::parse_power(power, per_db)?))
        })
        .await
    }

    /// Read output power in instrument units
    pub async fn read_power(&self, serial: &str) -> Result<i16, SessionError> {
        self.read_short(serial, Request::ReadPower).await
    }

    /// Read output power in dBm, using the configured scale
    pub async fn read_power_dbm(&self, serial: &str) -> Result<f64, SessionError> {
        let units = self.read_power(serial).await?;
        Ok(self.config.scale.power_dbm(units))
    }

    /// Set output phase in instrument units
    pub async fn set_phase(&self, serial: &str, phase: i16) -> Result<(), SessionError> {
        self.command(serial, Request::SetPhase(phase)).await
    }

    /// Set output phase from text such as `"90"` or `"90.5 deg"`
    pub async fn set_phase_str(&self, serial: &str, phase: &str) -> Result<(), SessionError> {
        let per_degree = self.config.scale.phase_per_degree;
        self.command_parsed(serial, Request::SetPhase(0), || {
            Ok(Request::SetPhase(units::parse_angle(phase, per_degree)?))
        })
        .await
    }

    /// Read output phase in instrument units
    pub async fn read_phase(&self, serial: &str) -> Result<i16, SessionError> {
        self.read_short(serial, Request::ReadPhase).await
    }

    /// Read output phase in degrees, using the configured scale
    pub async fn read_phase_degrees(&self, serial: &str) -> Result<f64, SessionError> {
        let units = self.read_phase(serial).await?;
        Ok(self.config.scale.phase_degrees(units))
    }

    /// Set output frequency in Hz
    pub async fn set_frequency(&self, serial: &str, hz: i64) -> Result<(), SessionError> {
        self.command(serial, Request::SetFrequency(hz)).await
    }

    /// Set output frequency from text such as `"3000000000"` or `"3 GHz"`
    pub async fn set_frequency_str(&self, serial: &str, frequency: &str) -> Result<(), SessionError> {
        self.command_parsed(serial, Request::SetFrequency(0), || {
            Ok(Request::SetFrequency(units::parse_frequency_hz(frequency)?))
        })
        .await
    }

    /// Read output frequency in Hz
    pub async fn read_frequency(&self, serial: &str) -> Result<i64, SessionError> {
        let request = Request::ReadFrequency;
        let operation = request.name();
        match self.execute(serial, request).await? {
            Response::Long(hz) => Ok(hz),
            other => Err(unexpected(serial, operation, &other)),
        }
    }

    pub async fn recall_factory_preset(&self, serial: &str) -> Result<(), SessionError> {
        self.command(serial, Request::RecallFactoryPreset).await
    }

    pub async fn save_current_state(&self, serial: &str) -> Result<(), SessionError> {
        self.command(serial, Request::SaveCurrentState).await
    }

    pub async fn recall_saved_state(&self, serial: &str) -> Result<(), SessionError> {
        self.command(serial, Request::RecallSavedState).await
    }

    /// Select the modulation source
    pub async fn set_modulation(&self, serial: &str, mode: ModulationMode) -> Result<(), SessionError> {
        self.command(serial, Request::SetModulation(mode)).await
    }

    pub async fn mod_enable_no(&self, serial: &str) -> Result<(), SessionError> {
        self.set_modulation(serial, ModulationMode::None).await
    }

    pub async fn mod_enable_fm(&self, serial: &str) -> Result<(), SessionError> {
        self.set_modulation(serial, ModulationMode::Fm).await
    }

    pub async fn mod_enable_pulse(&self, serial: &str) -> Result<(), SessionError> {
        self.set_modulation(serial, ModulationMode::Pulse).await
    }

    pub async fn mod_enable_pm(&self, serial: &str) -> Result<(), SessionError> {
        self.set_modulation(serial, ModulationMode::Pm).await
    }

    /// Set FM deviation in instrument units
    pub async fn set_fm_deviation(&self, serial: &str, deviation: i16) -> Result<(), SessionError> {
        self.command(serial, Request::SetFmDeviation(deviation)).await
    }

    /// Set FM deviation from text such as `"50 kHz"`; a bare number is Hz
    pub async fn set_fm_deviation_str(
        &self,
        serial: &str,
        deviation: &str,
    ) -> Result<(), SessionError> {
        let hz_per_unit = self.config.scale.fm_deviation_hz_per_unit;
        self.command_parsed(serial, Request::SetFmDeviation(0), || {
            Ok(Request::SetFmDeviation(units::parse_fm_deviation(deviation, hz_per_unit)?))
        })
        .await
    }

    /// Set PM deviation in instrument units
    pub async fn set_pm_deviation(&self, serial: &str, deviation: i16) -> Result<(), SessionError> {
        self.command(serial, Request::SetPmDeviation(deviation)).await
    }

    /// Set PM deviation from text such as `"45 deg"`
    pub async fn set_pm_deviation_str(
        &self,
        serial: &str,
        deviation: &str,
    ) -> Result<(), SessionError> {
        let per_degree = self.config.scale.pm_deviation_per_degree;
        self.command_parsed(serial, Request::SetPmDeviation(0), || {
            Ok(Request::SetPmDeviation(units::parse_angle(deviation, per_degree)?))
        })
        .await
    }
}

/// A reply of the wrong shape for the request
fn unexpected(serial: &str, operation: &'static str, response: &Response) -> SessionError {
    SessionError::Decode {
        serial: serial.to_string(),
        source: ProtocolError::Decode {
            operation,
            reason: format!("unexpected reply {:?}", response),
        },
    }
}

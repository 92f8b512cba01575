//! Device registry
//!
//! The membership table of known serials, kept in discovery order. It is a
//! plain data structure: the session manager guards it with one short-held
//! lock and never awaits device I/O while holding it.

use std::collections::HashSet;
use std::sync::Arc;

use holz_protocol::hs9000::Identity;
use holz_protocol::Dialect;
use serde::Serialize;

use crate::channel::{ChannelSender, ChannelState, DeviceChannel};

/// Lifecycle state of a registered device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeviceState {
    /// Seen on the transport, never opened or since closed
    Discovered,
    /// Open with a running channel
    Open,
    /// Explicitly closed
    Closed,
    /// Open, but its channel latched a failure
    Faulted,
}

/// Read-only snapshot of a registry entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceRecord {
    /// Device serial
    pub serial: String,
    /// Dialect, known once the device has been opened
    pub dialect: Option<Dialect>,
    /// Lifecycle state
    pub state: DeviceState,
    /// HS9000 identification, if the device answered one
    pub identity: Option<Identity>,
    /// Identity of the current connection while open
    pub connection_id: Option<u64>,
}

/// Reference to an open device
///
/// Opening an already-open device returns an equal handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    serial: String,
    dialect: Dialect,
    connection_id: u64,
}

impl DeviceHandle {
    pub(crate) fn new(serial: &str, dialect: Dialect, connection_id: u64) -> Self {
        Self {
            serial: serial.to_string(),
            dialect,
            connection_id,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Distinguishes successive opens of the same serial
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }
}

pub(crate) struct Entry {
    pub(crate) serial: String,
    pub(crate) dialect: Option<Dialect>,
    pub(crate) identity: Option<Identity>,
    pub(crate) closed: bool,
    pub(crate) connection: Option<Connection>,
    /// Serializes opens of this serial
    pub(crate) open_gate: Arc<tokio::sync::Mutex<()>>,
}

pub(crate) struct Connection {
    pub(crate) id: u64,
    pub(crate) channel: DeviceChannel,
}

impl Entry {
    fn new(serial: &str) -> Self {
        Self {
            serial: serial.to_string(),
            dialect: None,
            identity: None,
            closed: false,
            connection: None,
            open_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub(crate) fn state(&self) -> DeviceState {
        match &self.connection {
            Some(c) if c.channel.state() == ChannelState::Faulted => DeviceState::Faulted,
            Some(_) => DeviceState::Open,
            None if self.closed => DeviceState::Closed,
            None => DeviceState::Discovered,
        }
    }

    /// Handle for the current connection, unless it has faulted
    pub(crate) fn healthy_handle(&self) -> Option<DeviceHandle> {
        let connection = self.connection.as_ref()?;
        if connection.channel.state() == ChannelState::Faulted {
            return None;
        }
        Some(DeviceHandle::new(
            &self.serial,
            connection.channel.sender().dialect(),
            connection.id,
        ))
    }

    pub(crate) fn record(&self) -> DeviceRecord {
        DeviceRecord {
            serial: self.serial.clone(),
            dialect: self.dialect,
            state: self.state(),
            identity: self.identity.clone(),
            connection_id: self.connection.as_ref().map(|c| c.id),
        }
    }
}

/// Membership table in discovery order
#[derive(Default)]
pub(crate) struct Registry {
    entries: Vec<Entry>,
    /// Bumped every time the table is torn down
    generation: u64,
}

impl Registry {
    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// Open gates of every entry, in discovery order
    pub(crate) fn gates(&self) -> Vec<Arc<tokio::sync::Mutex<()>>> {
        self.entries.iter().map(|e| Arc::clone(&e.open_gate)).collect()
    }

    pub(crate) fn get(&self, serial: &str) -> Option<&Entry> {
        self.entries.iter().find(|e| e.serial == serial)
    }

    pub(crate) fn get_mut(&mut self, serial: &str) -> Option<&mut Entry> {
        self.entries.iter_mut().find(|e| e.serial == serial)
    }

    /// Get or create the entry for `serial`; the flag is true if it was created
    pub(crate) fn ensure(&mut self, serial: &str) -> (&mut Entry, bool) {
        match self.entries.iter().position(|e| e.serial == serial) {
            Some(index) => (&mut self.entries[index], false),
            None => {
                self.entries.push(Entry::new(serial));
                let index = self.entries.len() - 1;
                (&mut self.entries[index], true)
            }
        }
    }

    /// Sender for an open device
    pub(crate) fn sender(&self, serial: &str) -> Option<ChannelSender> {
        self.get(serial)?
            .connection
            .as_ref()
            .map(|c| c.channel.sender().clone())
    }

    /// Reconcile with the serials the transport reports
    ///
    /// New serials are appended as discovered and returned. Entries that are
    /// neither open nor attached are dropped; open and faulted entries stay
    /// until closed.
    pub(crate) fn merge_attached(&mut self, attached: &[String]) -> Vec<String> {
        let present: HashSet<&str> = attached.iter().map(String::as_str).collect();
        self.entries
            .retain(|e| e.connection.is_some() || present.contains(e.serial.as_str()));

        let mut discovered = Vec::new();
        for serial in attached {
            if let (_, true) = self.ensure(serial) {
                discovered.push(serial.clone());
            }
        }
        discovered
    }

    /// Registered serials that are in `attached`, in discovery order
    pub(crate) fn serials_in(&self, attached: &[String]) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| attached.contains(&e.serial))
            .map(|e| e.serial.clone())
            .collect()
    }

    /// Remove every entry, returning their running channels
    ///
    /// Starts a new generation, so opens begun before the drain can tell.
    pub(crate) fn drain(&mut self) -> Vec<(String, DeviceChannel)> {
        self.generation += 1;
        self.entries
            .drain(..)
            .filter_map(|e| e.connection.map(|c| (e.serial, c.channel)))
            .collect()
    }

    pub(crate) fn records(&self) -> Vec<DeviceRecord> {
        self.entries.iter().map(Entry::record).collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

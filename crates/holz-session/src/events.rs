//! Session lifecycle events
//!
//! Registry changes and fault transitions are broadcast to every subscriber
//! of [`crate::SessionManager::subscribe`]. Slow subscribers lag rather than
//! stall the session.

use holz_protocol::Dialect;
use serde::Serialize;

/// Event emitted by the session manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A serial appeared on the transport for the first time
    DeviceDiscovered {
        /// Device serial
        serial: String,
    },

    /// A device was opened and its channel started
    DeviceOpened {
        /// Device serial
        serial: String,
        /// Dialect determined for the device
        dialect: Dialect,
        /// Identity of this open connection
        connection_id: u64,
    },

    /// A device channel latched into the faulted state
    DeviceFaulted {
        /// Device serial
        serial: String,
        /// The error that caused the fault
        reason: String,
    },

    /// A device channel was drained and its link closed
    DeviceClosed {
        /// Device serial
        serial: String,
    },

    /// Every device was closed and the registry cleared
    AllClosed,
}

impl SessionEvent {
    /// Serial the event refers to, if any
    pub fn serial(&self) -> Option<&str> {
        match self {
            SessionEvent::DeviceDiscovered { serial }
            | SessionEvent::DeviceOpened { serial, .. }
            | SessionEvent::DeviceFaulted { serial, .. }
            | SessionEvent::DeviceClosed { serial } => Some(serial),
            SessionEvent::AllClosed => None,
        }
    }
}

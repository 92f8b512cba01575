//! Typed access to HS9000 channels
//!
//! Every method here is a thin wrapper over
//! [`SessionManager::raw_command`]: build the command string, send it and
//! parse or check the reply.

use holz_protocol::hs9000::{self, commands, Channel, Identity, Limit};
use holz_protocol::{units, ProtocolError};

use crate::error::SessionError;
use crate::session::SessionManager;

/// One RF channel of an open HS9000 device
pub struct Hs9000Channel<'a> {
    session: &'a SessionManager,
    serial: String,
    channel: Channel,
}

impl<'a> Hs9000Channel<'a> {
    pub(crate) fn new(session: &'a SessionManager, serial: &str, channel: Channel) -> Self {
        Self {
            session,
            serial: serial.to_string(),
            channel,
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    async fn query(&self, command: String) -> Result<String, SessionError> {
        self.session.raw_command(&self.serial, &command).await
    }

    async fn query_parsed<T>(
        &self,
        command: String,
        parse: impl FnOnce(&str) -> Result<T, ProtocolError>,
    ) -> Result<T, SessionError> {
        let reply = self.query(command).await?;
        parse(&reply).map_err(|e| SessionError::protocol(&self.serial, e))
    }

    async fn set(
        &self,
        operation: &'static str,
        command: String,
        ack: &str,
    ) -> Result<(), SessionError> {
        let reply = self.query(command).await?;
        hs9000::expect_ack(operation, &reply, ack).map_err(|e| SessionError::protocol(&self.serial, e))
    }

    /// Identification of the whole instrument
    pub async fn identify(&self) -> Result<Identity, SessionError> {
        self.query_parsed(commands::identify(), |reply| {
            Identity::parse(reply).ok_or_else(|| ProtocolError::Decode {
                operation: "identify",
                reason: format!("not a Holzworth identification: {:?}", reply),
            })
        })
        .await
    }

    /// Channels the instrument reports as present
    pub async fn attached_channels(&self) -> Result<Vec<Channel>, SessionError> {
        self.query_parsed(commands::attached_channels(), hs9000::parse_channels)
            .await
    }

    pub async fn set_rf_output(&self, on: bool) -> Result<(), SessionError> {
        self.set(
            "set RF output",
            commands::set_rf_output(self.channel, on),
            hs9000::rf_ack(on),
        )
        .await
    }

    pub async fn rf_output(&self) -> Result<bool, SessionError> {
        self.query_parsed(commands::rf_output(self.channel), hs9000::parse_rf_state)
            .await
    }

    /// Set frequency in Hz
    pub async fn set_frequency(&self, hz: i64) -> Result<(), SessionError> {
        self.set(
            "set frequency",
            commands::set_frequency(self.channel, hz),
            hs9000::ACK_FREQUENCY,
        )
        .await
    }

    /// Set frequency from text such as `"2.5 GHz"`
    pub async fn set_frequency_str(&self, frequency: &str) -> Result<(), SessionError> {
        let hz = units::parse_frequency_hz(frequency)?;
        self.set_frequency(hz).await
    }

    /// Frequency in Hz
    pub async fn frequency(&self) -> Result<i64, SessionError> {
        self.query_parsed(commands::frequency(self.channel), hs9000::parse_frequency)
            .await
    }

    pub async fn frequency_limit(&self, limit: Limit) -> Result<i64, SessionError> {
        self.query_parsed(
            commands::frequency_limit(self.channel, limit),
            hs9000::parse_frequency,
        )
        .await
    }

    /// Set power in dBm
    pub async fn set_power(&self, dbm: f64) -> Result<(), SessionError> {
        self.set(
            "set power",
            commands::set_power(self.channel, dbm),
            hs9000::ACK_POWER,
        )
        .await
    }

    /// Power in dBm
    pub async fn power(&self) -> Result<f64, SessionError> {
        self.query_parsed(commands::power(self.channel), hs9000::parse_power)
            .await
    }

    pub async fn power_limit(&self, limit: Limit) -> Result<f64, SessionError> {
        self.query_parsed(commands::power_limit(self.channel, limit), hs9000::parse_power)
            .await
    }

    /// Set phase in degrees
    pub async fn set_phase(&self, degrees: f64) -> Result<(), SessionError> {
        self.set(
            "set phase",
            commands::set_phase(self.channel, degrees),
            hs9000::ACK_PHASE,
        )
        .await
    }

    /// Phase in degrees
    pub async fn phase(&self) -> Result<f64, SessionError> {
        self.query_parsed(commands::phase(self.channel), hs9000::parse_phase)
            .await
    }

    pub async fn phase_limit(&self, limit: Limit) -> Result<f64, SessionError> {
        self.query_parsed(commands::phase_limit(self.channel, limit), hs9000::parse_phase)
            .await
    }

    /// Channel temperature in degrees Celsius
    pub async fn temperature(&self) -> Result<f64, SessionError> {
        self.query_parsed(commands::temperature(self.channel), hs9000::parse_temperature)
            .await
    }
}

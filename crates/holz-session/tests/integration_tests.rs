//! Integration tests for the session manager
//!
//! These tests drive the session end to end against simulated instruments:
//! - Registry behaviour (discovery order, open/close lifecycle, idempotence)
//! - Legacy and HS9000 command surfaces
//! - Per-device ordering and cross-device parallelism
//! - Timeouts, retries and the faulted state

use std::sync::Arc;
use std::time::Duration;

use holz_detect::TransportError;
use holz_protocol::units;
use holz_session::{
    ChannelState, Channel, Dialect, DeviceState, Limit, ModulationMode, SessionConfig,
    SessionError, SessionEvent, SessionManager,
};
use holz_sim::{SimTransport, SimulatedHs9000, SimulatedHs9000Config, SimulatedLegacy};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// Configuration with short timeouts so failure paths run quickly
    pub fn fast_config() -> SessionConfig {
        SessionConfig {
            command_timeout_ms: 100,
            open_timeout_ms: 500,
            probe_timeout_ms: 50,
            retry_delay_ms: 1,
            ..Default::default()
        }
    }

    /// A transport with legacy `H1234` and HS9000 `HS01` attached
    pub fn transport() -> SimTransport {
        let transport = SimTransport::new();
        transport.attach(SimulatedLegacy::new("H1234"));
        transport.attach(SimulatedHs9000::new("HS01"));
        transport
    }

    pub fn session(transport: &SimTransport) -> Arc<SessionManager> {
        Arc::new(SessionManager::with_config(transport.clone(), fast_config()))
    }

    /// Session with both devices already open
    pub async fn opened() -> (Arc<SessionManager>, SimTransport) {
        let transport = transport();
        let session = session(&transport);
        session.open("H1234").await.unwrap();
        session.open("HS01").await.unwrap();
        (session, transport)
    }

    /// Drain every event currently buffered
    pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }
}

use helpers::*;

// ============================================================================
// Registry
// ============================================================================

mod registry {
    use super::*;

    #[tokio::test]
    async fn test_open_unknown_serial_is_not_found() {
        let session = session(&transport());
        let err = session.open("NOPE").await.unwrap_err();
        assert!(matches!(err, SessionError::DeviceNotFound(ref s) if s == "NOPE"));
        assert!(session.devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_attached_in_discovery_order() {
        let transport = transport();
        let session = session(&transport);
        assert_eq!(session.list_attached().await.unwrap(), vec!["H1234", "HS01"]);

        transport.attach(SimulatedLegacy::new("H0001"));
        assert_eq!(
            session.list_attached().await.unwrap(),
            vec!["H1234", "HS01", "H0001"]
        );
        // stable absent topology change
        assert_eq!(
            session.list_attached().await.unwrap(),
            vec!["H1234", "HS01", "H0001"]
        );

        transport.detach("HS01");
        assert_eq!(session.list_attached().await.unwrap(), vec!["H1234", "H0001"]);
        assert!(!session.is_attached("HS01").await.unwrap());
        assert!(session.is_attached("H1234").await.unwrap());
    }

    #[tokio::test]
    async fn test_is_attached_does_not_register() {
        let session = session(&transport());
        assert!(session.is_attached("H1234").await.unwrap());
        assert!(session.devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_open_returns_same_handle() {
        let transport = transport();
        let session = session(&transport);

        let first = session.open("H1234").await.unwrap();
        let second = session.open("H1234").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.dialect(), Dialect::Legacy);
        assert_eq!(transport.open_count("H1234"), 1);
        assert_eq!(transport.active_links("H1234"), 1);
    }

    #[tokio::test]
    async fn test_concurrent_opens_share_one_connection() {
        let transport = transport();
        let session = session(&transport);

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.open("HS01").await.unwrap() })
            })
            .collect();
        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap());
        }

        assert!(handles.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(transport.open_count("HS01"), 1);
    }

    #[tokio::test]
    async fn test_try_open_reports_already_open() {
        let session = session(&transport());
        session.try_open("H1234").await.unwrap();
        let err = session.try_open("H1234").await.unwrap_err();
        assert!(matches!(err, SessionError::AlreadyOpen(_)));
        assert_ne!(err.status_code(), 0);
    }

    #[tokio::test]
    async fn test_device_record() {
        let (session, _transport) = opened().await;

        let legacy = session.device("H1234").await.unwrap();
        assert_eq!(legacy.dialect, Some(Dialect::Legacy));
        assert_eq!(legacy.state, DeviceState::Open);
        assert!(legacy.identity.is_none());

        let hs = session.device("HS01").await.unwrap();
        assert_eq!(hs.dialect, Some(Dialect::Hs9000));
        let identity = hs.identity.unwrap();
        assert_eq!(identity.model, "HS9002B");
        assert_eq!(identity.serial.as_deref(), Some("HS01"));

        assert!(matches!(
            session.device("NOPE").await,
            Err(SessionError::DeviceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close_all_is_idempotent() {
        let (session, transport) = opened().await;

        session.close_all().await;
        assert!(session.devices().await.is_empty());
        assert_eq!(transport.active_links("H1234"), 0);
        assert_eq!(transport.active_links("HS01"), 0);

        session.close_all().await;
        assert!(session.devices().await.is_empty());

        let err = session.rf_power_on("H1234").await.unwrap_err();
        assert!(matches!(err, SessionError::DeviceNotFound(_)));
    }

    #[tokio::test]
    async fn test_close_all_with_nothing_open() {
        let session = session(&transport());
        session.close_all().await;
        session.close_all().await;
        assert!(session.devices().await.is_empty());
    }

    #[tokio::test]
    async fn test_close_and_reopen() {
        let transport = transport();
        let session = session(&transport);
        let first = session.open("H1234").await.unwrap();

        session.close("H1234").await.unwrap();
        assert_eq!(session.device("H1234").await.unwrap().state, DeviceState::Closed);
        assert_eq!(transport.active_links("H1234"), 0);
        assert!(matches!(
            session.read_power("H1234").await,
            Err(SessionError::DeviceNotFound(_))
        ));
        // closing twice is harmless
        session.close("H1234").await.unwrap();

        let second = session.open("H1234").await.unwrap();
        assert_ne!(first.connection_id(), second.connection_id());
        assert_eq!(second.dialect(), Dialect::Legacy);
        assert_eq!(transport.open_count("H1234"), 2);
        // the known dialect is reused on reopen
        let identify_queries = transport
            .command_log("H1234")
            .iter()
            .filter(|frame| frame.as_slice() == b":IDN?\n")
            .count();
        assert_eq!(identify_queries, 1);
    }

    #[tokio::test]
    async fn test_command_to_discovered_device_is_not_found() {
        let session = session(&transport());
        session.list_attached().await.unwrap();
        assert_eq!(session.device("H1234").await.unwrap().state, DeviceState::Discovered);
        assert!(matches!(
            session.rf_power_on("H1234").await,
            Err(SessionError::DeviceNotFound(_))
        ));
        assert!(matches!(
            session.channel_state("H1234").await,
            Err(SessionError::DeviceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_open_timeout() {
        let transport = transport();
        transport.configure("H1234", |f| f.open_delay = Duration::from_secs(5));
        let session = session(&transport);

        let err = session.open("H1234").await.unwrap_err();
        assert!(matches!(err, SessionError::OpenTimeout { timeout_ms: 500, .. }));
        assert_eq!(session.device("H1234").await.unwrap().state, DeviceState::Discovered);
    }

    #[tokio::test]
    async fn test_close_unknown_serial_is_not_found() {
        let session = session(&transport());
        assert!(matches!(
            session.close("NOPE").await,
            Err(SessionError::DeviceNotFound(_))
        ));

        // known but never opened closes as a no-op
        session.list_attached().await.unwrap();
        session.close("H1234").await.unwrap();
        assert_eq!(session.device("H1234").await.unwrap().state, DeviceState::Discovered);
    }

    #[tokio::test]
    async fn test_close_all_during_open_keeps_one_link() {
        let transport = transport();
        transport.configure("H1234", |f| f.open_delay = Duration::from_millis(100));
        let session = session(&transport);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.open("H1234").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.close_all().await;
        assert!(session.devices().await.is_empty());

        let second = session.open("H1234").await.unwrap();
        let first = first.await.unwrap().unwrap();
        assert_ne!(first.connection_id(), second.connection_id());

        assert_eq!(transport.peak_links("H1234"), 1);
        assert_eq!(transport.active_links("H1234"), 1);
        assert_eq!(
            session.device("H1234").await.unwrap().connection_id,
            Some(second.connection_id())
        );
        session.read_power("H1234").await.unwrap();
    }

    #[tokio::test]
    async fn test_open_waiting_on_close_all_is_not_found() {
        let transport = transport();
        transport.configure("H1234", |f| f.open_delay = Duration::from_millis(100));
        let session = session(&transport);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.open("H1234").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let closing = {
            let session = session.clone();
            tokio::spawn(async move { session.close_all().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // queued behind the teardown, so it must not re-register the device
        let err = session.open("H1234").await.unwrap_err();
        assert!(matches!(err, SessionError::DeviceNotFound(_)));

        closing.await.unwrap();
        first.await.unwrap().unwrap();
        assert!(session.devices().await.is_empty());
        assert_eq!(transport.open_count("H1234"), 1);
        assert_eq!(transport.active_links("H1234"), 0);
        assert_eq!(transport.peak_links("H1234"), 1);
    }
}

// ============================================================================
// Legacy Dialect
// ============================================================================

mod legacy {
    use super::*;

    #[tokio::test]
    async fn test_power_and_frequency_scenario() {
        let (session, _transport) = opened().await;

        session.rf_power_on("H1234").await.unwrap();
        assert!(session.is_rf_power_on("H1234").await.unwrap());

        session.set_frequency("H1234", 3_000_000_000).await.unwrap();
        assert_eq!(session.read_frequency("H1234").await.unwrap(), 3_000_000_000);

        session.rf_power_off("H1234").await.unwrap();
        assert!(!session.is_rf_power_on("H1234").await.unwrap());
    }

    #[tokio::test]
    async fn test_string_forms_match_numeric_forms() {
        let (session, transport) = opened().await;

        session.set_power_str("H1234", "-10.5 dBm").await.unwrap();
        assert_eq!(session.read_power("H1234").await.unwrap(), -1050);

        session.set_phase_str("H1234", "90.5").await.unwrap();
        assert_eq!(session.read_phase("H1234").await.unwrap(), 905);

        session.set_frequency_str("H1234", "2.5 GHz").await.unwrap();
        assert_eq!(session.read_frequency("H1234").await.unwrap(), 2_500_000_000);

        session.set_fm_deviation_str("H1234", "50 kHz").await.unwrap();
        session.set_pm_deviation_str("H1234", "45 deg").await.unwrap();
        let log = transport.command_log("H1234");
        assert!(log.contains(&vec![0x60, 0x00, 50]));
        assert!(log.contains(&vec![0x61, 0x01, 0xC2]));
    }

    #[tokio::test]
    async fn test_readings_in_physical_units() {
        let (session, _transport) = opened().await;

        session.set_power_str("H1234", "-10.25 dBm").await.unwrap();
        session.set_phase_str("H1234", "90.5 deg").await.unwrap();
        assert_eq!(session.read_power_dbm("H1234").await.unwrap(), -10.25);
        assert_eq!(session.read_phase_degrees("H1234").await.unwrap(), 90.5);
    }

    #[tokio::test]
    async fn test_invalid_string_argument() {
        let (session, transport) = opened().await;
        let before = transport.command_log("H1234").len();

        let err = session.set_power_str("H1234", "loud").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
        let err = session.set_phase_str("H1234", "12.34").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
        let err = session.set_frequency_str("H1234", "3 parsecs").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));

        assert_eq!(transport.command_log("H1234").len(), before);
    }

    #[tokio::test]
    async fn test_save_and_recall_state() {
        let (session, _transport) = opened().await;

        assert!(matches!(
            session.recall_saved_state("H1234").await,
            Err(SessionError::Rejected { .. })
        ));

        session.set_power("H1234", -500).await.unwrap();
        session.save_current_state("H1234").await.unwrap();
        session.recall_factory_preset("H1234").await.unwrap();
        assert_eq!(session.read_power("H1234").await.unwrap(), 0);

        session.recall_saved_state("H1234").await.unwrap();
        assert_eq!(session.read_power("H1234").await.unwrap(), -500);
    }

    #[tokio::test]
    async fn test_modulation_modes() {
        let (session, transport) = opened().await;

        session.mod_enable_fm("H1234").await.unwrap();
        session.mod_enable_pulse("H1234").await.unwrap();
        session.mod_enable_pm("H1234").await.unwrap();
        session.mod_enable_no("H1234").await.unwrap();
        session.set_modulation("H1234", ModulationMode::Fm).await.unwrap();

        let log = transport.command_log("H1234");
        let opcodes: Vec<u8> = log[log.len() - 5..].iter().map(|f| f[0]).collect();
        assert_eq!(opcodes, vec![0x51, 0x52, 0x53, 0x50, 0x51]);
    }

    #[tokio::test]
    async fn test_out_of_range_is_rejected_without_fault() {
        let (session, _transport) = opened().await;

        let err = session.set_frequency("H1234", 99_000_000_000).await.unwrap_err();
        match err {
            SessionError::Rejected { operation, reply, .. } => {
                assert_eq!(operation, "set frequency");
                assert_eq!(reply, "status 0x02");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.channel_state("H1234").await.unwrap(), ChannelState::Idle);
        session.set_frequency("H1234", 1_000_000).await.unwrap();
    }

    #[tokio::test]
    async fn test_raw_command_is_unsupported() {
        let (session, transport) = opened().await;
        let before = transport.command_log("H1234").len();

        let err = session.raw_command("H1234", "FREQ?").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnsupportedOperation { dialect: Dialect::Legacy, .. }
        ));
        assert!(matches!(
            session.hs9000_channel("H1234", "CH1").await,
            Err(SessionError::UnsupportedOperation { .. })
        ));
        assert_eq!(transport.command_log("H1234").len(), before);
    }
}

// ============================================================================
// HS9000 Dialect
// ============================================================================

mod hs9000 {
    use super::*;

    #[tokio::test]
    async fn test_raw_frequency_scenario() {
        let (session, _transport) = opened().await;

        let ack = session.raw_command("HS01", "FREQ:2500000000").await.unwrap();
        assert_eq!(ack, "Frequency Set");

        let reply = session.raw_command("HS01", "FREQ?").await.unwrap();
        assert_eq!(units::parse_frequency_hz(&reply).unwrap(), 2_500_000_000);
    }

    #[tokio::test]
    async fn test_legacy_setter_is_unsupported() {
        let (session, transport) = opened().await;
        let before = transport.command_log("HS01").len();

        let err = session.set_phase("HS01", 900).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnsupportedOperation { operation: "set phase", dialect: Dialect::Hs9000, .. }
        ));
        // dialect mismatch wins over a bad argument
        let err = session.set_power_str("HS01", "garbage").await.unwrap_err();
        assert!(matches!(err, SessionError::UnsupportedOperation { .. }));
        assert!(matches!(
            session.read_frequency("HS01").await,
            Err(SessionError::UnsupportedOperation { .. })
        ));
        assert_eq!(transport.command_log("HS01").len(), before);
        assert_eq!(session.channel_state("HS01").await.unwrap(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn test_typed_channel() {
        let (session, transport) = opened().await;
        let ch2 = session.hs9000_channel("HS01", "ch2").await.unwrap();
        assert_eq!(ch2.channel(), Channel(2));

        ch2.set_rf_output(true).await.unwrap();
        assert!(ch2.rf_output().await.unwrap());

        ch2.set_frequency_str("1.5 GHz").await.unwrap();
        assert_eq!(ch2.frequency().await.unwrap(), 1_500_000_000);

        ch2.set_power(-10.5).await.unwrap();
        assert_eq!(ch2.power().await.unwrap(), -10.5);

        ch2.set_phase(90.0).await.unwrap();
        assert_eq!(ch2.phase().await.unwrap(), 90.0);

        assert_eq!(ch2.frequency_limit(Limit::Max).await.unwrap(), 6_000_000_000);
        assert_eq!(ch2.power_limit(Limit::Min).await.unwrap(), -100.0);
        assert_eq!(ch2.phase_limit(Limit::Max).await.unwrap(), 360.0);
        assert_eq!(ch2.temperature().await.unwrap(), 35.2);

        assert_eq!(ch2.identify().await.unwrap().model, "HS9002B");
        assert_eq!(ch2.attached_channels().await.unwrap(), vec![Channel(1), Channel(2)]);

        assert!(transport
            .command_log_text("HS01")
            .contains(&":CH2:FREQ:1500000000Hz".to_string()));
    }

    #[tokio::test]
    async fn test_unexpected_ack_is_rejected() {
        let (session, _transport) = opened().await;
        let ch1 = session.hs9000_channel("HS01", "CH1").await.unwrap();

        let err = ch1.set_power(50.0).await.unwrap_err();
        assert!(matches!(err, SessionError::Rejected { ref reply, .. } if reply == "Invalid Entry"));
        assert_eq!(session.channel_state("HS01").await.unwrap(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn test_bad_channel_name() {
        let (session, _transport) = opened().await;
        assert!(matches!(
            session.hs9000_channel("HS01", "CHX").await,
            Err(SessionError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_channel_beyond_model_is_rejected() {
        let (session, transport) = opened().await;
        let before = transport.command_log("HS01").len();

        assert!(matches!(
            session.hs9000_channel("HS01", "CH5").await,
            Err(SessionError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.hs9000_channel("HS01", "CH3").await,
            Err(SessionError::InvalidArgument(_))
        ));
        assert!(session.hs9000_channel("HS01", "CH2").await.is_ok());
        assert_eq!(transport.command_log("HS01").len(), before);
    }

    #[tokio::test]
    async fn test_larger_model_has_more_channels() {
        let transport = SimTransport::new();
        transport.attach(SimulatedHs9000::from_config(SimulatedHs9000Config {
            serial: "HS08".into(),
            model: "HS9008B".into(),
            channels: 8,
        }));
        let session = session(&transport);
        session.open("HS08").await.unwrap();

        let ch5 = session.hs9000_channel("HS08", "CH5").await.unwrap();
        ch5.set_frequency(2_000_000_000).await.unwrap();
        assert_eq!(ch5.frequency().await.unwrap(), 2_000_000_000);
        assert!(matches!(
            session.hs9000_channel("HS08", "CH9").await,
            Err(SessionError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_invalid_raw_command() {
        let (session, _transport) = opened().await;
        assert!(matches!(
            session.raw_command("HS01", "").await,
            Err(SessionError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.raw_command("HS01", "FREQ?\nFREQ?").await,
            Err(SessionError::InvalidArgument(_))
        ));
    }
}

// ============================================================================
// Concurrency
// ============================================================================

mod concurrency {
    use super::*;

    #[tokio::test]
    async fn test_same_device_completes_in_submission_order() {
        let (session, transport) = opened().await;
        transport.set_reply_delay("H1234", Duration::from_millis(20));
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();

        let mut tasks = Vec::new();
        for i in 0..5i16 {
            let session = session.clone();
            let done_tx = done_tx.clone();
            tasks.push(tokio::spawn(async move {
                session.set_power("H1234", i * 100).await.unwrap();
                done_tx.send(i).unwrap();
            }));
            // let the task queue its command before the next one starts
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        for task in tasks {
            task.await.unwrap();
        }
        drop(done_tx);

        let mut completed = Vec::new();
        while let Some(i) = done_rx.recv().await {
            completed.push(i);
        }
        assert_eq!(completed, vec![0, 1, 2, 3, 4]);

        let sent: Vec<i16> = transport
            .command_log("H1234")
            .iter()
            .filter(|f| f[0] == 0x10)
            .map(|f| i16::from_be_bytes([f[1], f[2]]))
            .collect();
        assert_eq!(sent, vec![0, 100, 200, 300, 400]);
        assert_eq!(session.read_power("H1234").await.unwrap(), 400);
    }

    #[tokio::test]
    async fn test_slow_device_does_not_block_others() {
        let (session, transport) = opened().await;
        transport.attach(SimulatedLegacy::new("H5678"));
        session.open("H5678").await.unwrap();
        transport.set_reply_delay("H1234", Duration::from_millis(80));

        let slow = {
            let session = session.clone();
            tokio::spawn(async move { session.read_power("H1234").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;

        let fast = tokio::time::timeout(Duration::from_millis(40), async {
            session.read_frequency("H5678").await.unwrap();
            session.raw_command("HS01", ":CH1:FREQ?").await.unwrap()
        })
        .await;
        assert!(fast.is_ok(), "fast devices waited on the slow one");
        assert!(!slow.is_finished());
        assert_eq!(slow.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_close_all_drains_queued_commands() {
        let (session, transport) = opened().await;
        transport.set_reply_delay("H1234", Duration::from_millis(10));

        let tasks: Vec<_> = (0..3)
            .map(|i| {
                let session = session.clone();
                tokio::spawn(async move { session.set_phase("H1234", i * 10).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(2)).await;

        session.close_all().await;
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(transport.active_links("H1234"), 0);
    }
}

// ============================================================================
// Faults
// ============================================================================

mod faults {
    use super::*;

    #[tokio::test]
    async fn test_timeout_latches_faulted() {
        let (session, transport) = opened().await;
        let mut events = session.subscribe();
        transport.set_silent("H1234", true);

        let err = session.read_power("H1234").await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout { timeout_ms: 100, .. }));
        assert_eq!(session.channel_state("H1234").await.unwrap(), ChannelState::Faulted);
        assert_eq!(session.device("H1234").await.unwrap().state, DeviceState::Faulted);

        // fail fast, without touching the device
        let writes = transport.command_log("H1234").len();
        let err = session.rf_power_on("H1234").await.unwrap_err();
        assert!(matches!(err, SessionError::DeviceFaulted(_)));
        assert_eq!(transport.command_log("H1234").len(), writes);

        // reported once
        let faults: Vec<_> = drain(&mut events)
            .into_iter()
            .filter(|e| matches!(e, SessionEvent::DeviceFaulted { .. }))
            .collect();
        assert_eq!(faults.len(), 1);
        assert_eq!(faults[0].serial(), Some("H1234"));

        // still physically present
        assert!(session.list_attached().await.unwrap().contains(&"H1234".to_string()));
        assert!(session.is_attached("H1234").await.unwrap());

        // other devices are unaffected
        session.raw_command("HS01", "FREQ?").await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_recovers_faulted_device() {
        let (session, transport) = opened().await;
        let before = session.open("H1234").await.unwrap();
        transport.set_silent("H1234", true);
        session.read_power("H1234").await.unwrap_err();

        transport.set_silent("H1234", false);
        let after = session.open("H1234").await.unwrap();
        assert_ne!(before.connection_id(), after.connection_id());
        assert_eq!(after.dialect(), Dialect::Legacy);
        assert_eq!(transport.open_count("H1234"), 2);
        assert_eq!(transport.active_links("H1234"), 1);

        assert_eq!(session.channel_state("H1234").await.unwrap(), ChannelState::Idle);
        session.rf_power_on("H1234").await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_write_failures_are_retried() {
        let (session, transport) = opened().await;

        transport.fail_next_writes("H1234", 2);
        session.rf_power_on("H1234").await.unwrap();
        // the command reached the instrument exactly once
        let sent = transport
            .command_log("H1234")
            .iter()
            .filter(|f| f.as_slice() == [0x01])
            .count();
        assert_eq!(sent, 1);

        transport.fail_next_writes("H1234", 3);
        let err = session.rf_power_on("H1234").await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Busy(_))));
        assert_eq!(session.channel_state("H1234").await.unwrap(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn test_repeated_decode_errors_latch_faulted() {
        let (session, transport) = opened().await;
        transport.corrupt_next_replies("HS01", 1);

        let err = session.raw_command("HS01", "FREQ?").await.unwrap_err();
        assert!(matches!(err, SessionError::Decode { .. }));
        assert_eq!(session.channel_state("HS01").await.unwrap(), ChannelState::Idle);
        // a good reply resets the count
        session.raw_command("HS01", "FREQ?").await.unwrap();

        transport.corrupt_next_replies("HS01", 3);
        for _ in 0..3 {
            let err = session.raw_command("HS01", "FREQ?").await.unwrap_err();
            assert!(matches!(err, SessionError::Decode { .. }));
        }
        assert_eq!(session.channel_state("HS01").await.unwrap(), ChannelState::Faulted);
    }

    #[tokio::test]
    async fn test_detached_device_faults_on_next_command() {
        let (session, transport) = opened().await;
        transport.detach("H1234");

        let err = session.read_phase("H1234").await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::NotAttached(_))));
        assert_eq!(session.device("H1234").await.unwrap().state, DeviceState::Faulted);
        assert!(!session.list_attached().await.unwrap().contains(&"H1234".to_string()));
        // open and faulted entries stay registered until closed
        assert!(session.device("H1234").await.is_ok());

        assert!(matches!(
            session.open("H1234").await,
            Err(SessionError::DeviceNotFound(_))
        ));
    }
}

// ============================================================================
// Events
// ============================================================================

mod events {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle_events() {
        let transport = transport();
        let session = session(&transport);
        let mut events = session.subscribe();

        session.list_attached().await.unwrap();
        let handle = session.open("H1234").await.unwrap();
        session.close("H1234").await.unwrap();
        session.open("HS01").await.unwrap();
        session.close_all().await;

        assert_eq!(
            drain(&mut events),
            vec![
                SessionEvent::DeviceDiscovered { serial: "H1234".into() },
                SessionEvent::DeviceDiscovered { serial: "HS01".into() },
                SessionEvent::DeviceOpened {
                    serial: "H1234".into(),
                    dialect: Dialect::Legacy,
                    connection_id: handle.connection_id(),
                },
                SessionEvent::DeviceClosed { serial: "H1234".into() },
                SessionEvent::DeviceOpened {
                    serial: "HS01".into(),
                    dialect: Dialect::Hs9000,
                    connection_id: handle.connection_id() + 1,
                },
                SessionEvent::DeviceClosed { serial: "HS01".into() },
                SessionEvent::AllClosed,
            ]
        );
    }

    #[tokio::test]
    async fn test_reopen_after_fault_reports_close() {
        let (session, transport) = opened().await;
        let mut events = session.subscribe();

        transport.set_silent("H1234", true);
        session.read_power("H1234").await.unwrap_err();
        transport.set_silent("H1234", false);
        let handle = session.open("H1234").await.unwrap();

        let events = drain(&mut events);
        assert_eq!(events.len(), 3, "{:?}", events);
        assert!(matches!(events[0], SessionEvent::DeviceFaulted { .. }));
        assert_eq!(events[1], SessionEvent::DeviceClosed { serial: "H1234".into() });
        assert_eq!(
            events[2],
            SessionEvent::DeviceOpened {
                serial: "H1234".into(),
                dialect: Dialect::Legacy,
                connection_id: handle.connection_id(),
            }
        );
    }
}

// ============================================================================
// Property Tests
// ============================================================================

mod properties {
    use super::*;
    use holz_sim::legacy::FREQUENCY_RANGE;
    use proptest::prelude::*;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn frequency_round_trips_exactly(hz in FREQUENCY_RANGE) {
            let read = runtime().block_on(async {
                let (session, _transport) = opened().await;
                session.set_frequency("H1234", hz).await.unwrap();
                session.read_frequency("H1234").await.unwrap()
            });
            prop_assert_eq!(read, hz);
        }

        #[test]
        fn frequency_text_round_trips_exactly(hz in FREQUENCY_RANGE) {
            let read = runtime().block_on(async {
                let (session, _transport) = opened().await;
                session.set_frequency_str("H1234", &format!("{} Hz", hz)).await.unwrap();
                session.read_frequency("H1234").await.unwrap()
            });
            prop_assert_eq!(read, hz);
        }

        #[test]
        fn same_device_commands_reach_the_wire_in_submission_order(
            powers in prop::collection::vec(-10_000i16..=2_000, 1..8)
        ) {
            let sent = runtime().block_on(async {
                let (session, transport) = opened().await;
                let mut tasks = Vec::new();
                for &power in &powers {
                    let session = session.clone();
                    tasks.push(tokio::spawn(async move {
                        session.set_power("H1234", power).await.unwrap();
                    }));
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                for task in tasks {
                    task.await.unwrap();
                }
                transport
                    .command_log("H1234")
                    .iter()
                    .filter(|f| f[0] == 0x10)
                    .map(|f| i16::from_be_bytes([f[1], f[2]]))
                    .collect::<Vec<_>>()
            });
            prop_assert_eq!(sent, powers);
        }

        #[test]
        fn unknown_serials_are_never_opened(serial in "[A-Z]{1,3}[0-9]{0,4}") {
            prop_assume!(serial != "HS01" && serial != "H1234");
            let result = runtime().block_on(async {
                let session = session(&transport());
                session.open(&serial).await
            });
            prop_assert!(matches!(result, Err(SessionError::DeviceNotFound(_))));
        }
    }
}

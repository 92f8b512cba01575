//! Per-device command channel
//!
//! Every open device gets one worker task that owns its [`DeviceLink`]
//! exclusively. Callers submit requests through a bounded FIFO queue and wait
//! on a oneshot for the result, so commands to one serial run strictly in
//! arrival order while different serials proceed in parallel.
//!
//! # State machine
//!
//! `Idle -> Sending -> AwaitingReply -> Idle`, with `Faulted` absorbing. A
//! timeout or a non-transient transport error faults the channel at once;
//! decode errors fault it after `max_decode_errors` in a row. Once faulted,
//! queued and new commands fail with [`SessionError::DeviceFaulted`] until the
//! device is re-opened.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use holz_detect::{DeviceLink, TransportError};
use holz_protocol::{codec_for, Dialect, DialectCodec, ProtocolError, Request, Response};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::SessionEvent;

/// Observable state of a device channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    /// Waiting for the next command
    Idle,
    /// Writing a command to the device
    Sending,
    /// Waiting for the device's reply
    AwaitingReply,
    /// Latched failure; re-open to recover
    Faulted,
}

impl ChannelState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ChannelState::Idle,
            1 => ChannelState::Sending,
            2 => ChannelState::AwaitingReply,
            _ => ChannelState::Faulted,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ChannelState::Idle => 0,
            ChannelState::Sending => 1,
            ChannelState::AwaitingReply => 2,
            ChannelState::Faulted => 3,
        }
    }
}

/// Channel state shared between the worker and the registry
#[derive(Debug, Clone)]
pub(crate) struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(ChannelState::Idle.as_u8())))
    }

    pub(crate) fn get(&self) -> ChannelState {
        ChannelState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ChannelState) {
        // Faulted is absorbing
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ChannelState::Faulted.as_u8()).then_some(state.as_u8())
            });
    }
}

/// Work item for a device worker
enum Job {
    /// Execute one request and send back the result
    Exchange {
        request: Request,
        reply: oneshot::Sender<Result<Response, SessionError>>,
    },
    /// Finish queued work, close the link and exit
    Shutdown,
}

/// Timing and fault policy for a worker
#[derive(Debug, Clone)]
struct WorkerPolicy {
    command_timeout: Duration,
    write_retries: u32,
    retry_delay: Duration,
    max_decode_errors: u32,
}

impl From<&SessionConfig> for WorkerPolicy {
    fn from(config: &SessionConfig) -> Self {
        Self {
            command_timeout: config.command_timeout(),
            write_retries: config.write_retries,
            retry_delay: config.retry_delay(),
            max_decode_errors: config.max_decode_errors.max(1),
        }
    }
}

/// Cheap handle for submitting commands to a device worker
#[derive(Clone)]
pub(crate) struct ChannelSender {
    serial: String,
    dialect: Dialect,
    tx: mpsc::Sender<Job>,
    state: SharedState,
}

impl ChannelSender {
    pub(crate) fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Fail unless the device's dialect can carry `request`
    pub(crate) fn ensure_supports(&self, request: &Request) -> Result<(), SessionError> {
        if codec_for(self.dialect).supports(request) {
            Ok(())
        } else {
            Err(SessionError::UnsupportedOperation {
                serial: self.serial.clone(),
                operation: request.name(),
                dialect: self.dialect,
            })
        }
    }

    /// Queue `request` behind earlier commands and wait for its result
    pub(crate) async fn submit(&self, request: Request) -> Result<Response, SessionError> {
        self.ensure_supports(&request)?;
        if self.state.get() == ChannelState::Faulted {
            return Err(SessionError::DeviceFaulted(self.serial.clone()));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Job::Exchange {
                request,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::DeviceNotFound(self.serial.clone()))?;

        reply_rx
            .await
            .map_err(|_| SessionError::DeviceNotFound(self.serial.clone()))?
    }
}

/// An open device: its worker task and the means to reach it
pub(crate) struct DeviceChannel {
    sender: ChannelSender,
    task: JoinHandle<()>,
}

impl DeviceChannel {
    /// Spawn a worker that takes ownership of `link`
    pub(crate) fn spawn(
        serial: String,
        dialect: Dialect,
        link: Box<dyn DeviceLink>,
        config: &SessionConfig,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let state = SharedState::new();
        let worker = Worker {
            serial: serial.clone(),
            codec: codec_for(dialect),
            link,
            policy: WorkerPolicy::from(config),
            state: state.clone(),
            events,
            decode_errors: 0,
        };
        let task = tokio::spawn(worker.run(rx));

        Self {
            sender: ChannelSender {
                serial,
                dialect,
                tx,
                state,
            },
            task,
        }
    }

    pub(crate) fn sender(&self) -> &ChannelSender {
        &self.sender
    }

    pub(crate) fn state(&self) -> ChannelState {
        self.sender.state.get()
    }

    /// Let queued commands finish, then close the link and join the worker
    pub(crate) async fn shutdown(self) {
        let serial = self.sender.serial.clone();
        if self.sender.tx.send(Job::Shutdown).await.is_err() {
            debug!("Worker for {} already stopped", serial);
        }
        if let Err(e) = self.task.await {
            warn!("Worker for {} ended abnormally: {}", serial, e);
        }
    }
}

struct Worker {
    serial: String,
    codec: &'static dyn DialectCodec,
    link: Box<dyn DeviceLink>,
    policy: WorkerPolicy,
    state: SharedState,
    events: broadcast::Sender<SessionEvent>,
    decode_errors: u32,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<Job>) {
        debug!("Worker for {} started", self.serial);

        while let Some(job) = rx.recv().await {
            match job {
                Job::Shutdown => break,
                Job::Exchange { request, reply } => {
                    let result = if self.state.get() == ChannelState::Faulted {
                        Err(SessionError::DeviceFaulted(self.serial.clone()))
                    } else {
                        self.execute(&request).await
                    };
                    // caller may have given up waiting
                    let _ = reply.send(result);
                }
            }
        }

        // anything queued after shutdown is refused
        rx.close();
        while let Some(job) = rx.recv().await {
            if let Job::Exchange { reply, .. } = job {
                let _ = reply.send(Err(SessionError::DeviceNotFound(self.serial.clone())));
            }
        }

        if let Err(e) = self.link.close().await {
            warn!("Error closing link to {}: {}", self.serial, e);
        }
        info!("Worker for {} stopped", self.serial);
    }

    async fn execute(&mut self, request: &Request) -> Result<Response, SessionError> {
        let result = self.exchange(request).await;
        match &result {
            Ok(_) => {
                self.decode_errors = 0;
                self.state.set(ChannelState::Idle);
            }
            Err(e) => {
                if self.should_fault(e) {
                    self.fault(request, e);
                } else {
                    self.state.set(ChannelState::Idle);
                }
            }
        }
        result
    }

    async fn exchange(&mut self, request: &Request) -> Result<Response, SessionError> {
        let encoded = self
            .codec
            .encode(request)
            .map_err(|e| SessionError::protocol(&self.serial, e))?;

        self.state.set(ChannelState::Sending);
        self.write(request, &encoded.bytes).await?;

        self.state.set(ChannelState::AwaitingReply);
        let reply = match timeout(self.policy.command_timeout, self.link.read(encoded.framing)).await
        {
            Ok(Ok(reply)) => reply,
            // an over-long line is a malformed reply, not a dead link
            Ok(Err(TransportError::Overrun(limit))) => {
                self.link.discard_pending();
                return Err(SessionError::Decode {
                    serial: self.serial.clone(),
                    source: ProtocolError::Decode {
                        operation: request.name(),
                        reason: format!("reply exceeds {} bytes", limit),
                    },
                });
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(self.timeout_error(request)),
        };
        trace!("{} {} reply {:02X?}", self.serial, request.name(), reply);

        self.codec.decode(request, &reply).map_err(|e| {
            let err = SessionError::protocol(&self.serial, e);
            if matches!(err, SessionError::Decode { .. }) {
                self.link.discard_pending();
            }
            err
        })
    }

    /// Write a frame, retrying only failures that happened before any byte left the host
    async fn write(&mut self, request: &Request, bytes: &[u8]) -> Result<(), SessionError> {
        let mut attempt = 0;
        loop {
            match timeout(self.policy.command_timeout, self.link.write(bytes)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) if e.is_transient() && attempt < self.policy.write_retries => {
                    attempt += 1;
                    debug!(
                        "Write of {} to {} not sent ({}), retry {}/{}",
                        request.name(),
                        self.serial,
                        e,
                        attempt,
                        self.policy.write_retries
                    );
                    tokio::time::sleep(self.policy.retry_delay).await;
                }
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(self.timeout_error(request)),
            }
        }
    }

    fn timeout_error(&self, request: &Request) -> SessionError {
        SessionError::Timeout {
            serial: self.serial.clone(),
            operation: request.name(),
            timeout_ms: u64::try_from(self.policy.command_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    fn should_fault(&mut self, err: &SessionError) -> bool {
        match err {
            SessionError::Timeout { .. } => true,
            SessionError::Transport(e) => !e.is_transient(),
            SessionError::Decode { .. } => {
                self.decode_errors += 1;
                self.decode_errors >= self.policy.max_decode_errors
            }
            _ => false,
        }
    }

    fn fault(&mut self, request: &Request, err: &SessionError) {
        self.state.set(ChannelState::Faulted);
        if request.is_state_changing() {
            warn!(
                "{} faulted during {}; the command may or may not have been applied: {}",
                self.serial,
                request.name(),
                err
            );
        } else {
            warn!("{} faulted during {}: {}", self.serial, request.name(), err);
        }
        let _ = self.events.send(SessionEvent::DeviceFaulted {
            serial: self.serial.clone(),
            reason: err.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use holz_protocol::Framing;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Link that plays back scripted outcomes and records writes
    #[derive(Default)]
    struct ScriptedLink {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        write_errors: VecDeque<TransportError>,
        replies: VecDeque<Result<Vec<u8>, TransportError>>,
    }

    #[async_trait]
    impl DeviceLink for ScriptedLink {
        async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
            if let Some(err) = self.write_errors.pop_front() {
                return Err(err);
            }
            self.writes.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn read(&mut self, _framing: Framing) -> Result<Vec<u8>, TransportError> {
            match self.replies.pop_front() {
                Some(reply) => reply,
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            command_timeout_ms: 50,
            retry_delay_ms: 1,
            ..Default::default()
        }
    }

    fn spawn(link: ScriptedLink, dialect: Dialect) -> (DeviceChannel, broadcast::Receiver<SessionEvent>) {
        let (events, rx) = broadcast::channel(16);
        let channel = DeviceChannel::spawn("H1234".into(), dialect, Box::new(link), &fast_config(), events);
        (channel, rx)
    }

    #[test]
    fn test_faulted_is_absorbing() {
        let state = SharedState::new();
        state.set(ChannelState::Sending);
        assert_eq!(state.get(), ChannelState::Sending);
        state.set(ChannelState::Faulted);
        state.set(ChannelState::Idle);
        assert_eq!(state.get(), ChannelState::Faulted);
    }

    #[tokio::test]
    async fn test_busy_write_is_retried() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let link = ScriptedLink {
            writes: writes.clone(),
            write_errors: VecDeque::from([TransportError::Busy("H1234".into())]),
            replies: VecDeque::from([Ok(vec![0x00])]),
        };
        let (channel, _) = spawn(link, Dialect::Legacy);

        let result = channel.sender().submit(Request::RfPowerOn).await;
        assert_eq!(result.unwrap(), Response::Ack);
        assert_eq!(writes.lock().unwrap().len(), 1);
        assert_eq!(channel.state(), ChannelState::Idle);
        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let link = ScriptedLink {
            write_errors: (0..3).map(|_| TransportError::Busy("H1234".into())).collect(),
            ..Default::default()
        };
        let (channel, _) = spawn(link, Dialect::Legacy);

        let err = channel.sender().submit(Request::RfPowerOn).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Busy(_))));
        // transient failures do not fault the channel
        assert_eq!(channel.state(), ChannelState::Idle);
        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_timeout_faults_once() {
        let (channel, mut events) = spawn(ScriptedLink::default(), Dialect::Legacy);

        let err = channel.sender().submit(Request::ReadPower).await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout { operation: "read power", .. }));
        assert_eq!(channel.state(), ChannelState::Faulted);

        let err = channel.sender().submit(Request::ReadPower).await.unwrap_err();
        assert!(matches!(err, SessionError::DeviceFaulted(_)));

        assert!(matches!(events.try_recv(), Ok(SessionEvent::DeviceFaulted { .. })));
        assert!(events.try_recv().is_err());
        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_decode_errors_fault_after_threshold() {
        let link = ScriptedLink {
            replies: (0..3).map(|_| Ok(vec![0x00])).collect(),
            ..Default::default()
        };
        let (channel, _) = spawn(link, Dialect::Legacy);

        for _ in 0..2 {
            let err = channel.sender().submit(Request::ReadFrequency).await.unwrap_err();
            assert!(matches!(err, SessionError::Decode { .. }));
            assert_eq!(channel.state(), ChannelState::Idle);
        }
        let err = channel.sender().submit(Request::ReadFrequency).await.unwrap_err();
        assert!(matches!(err, SessionError::Decode { .. }));
        assert_eq!(channel.state(), ChannelState::Faulted);
        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_rejection_does_not_fault() {
        let link = ScriptedLink {
            replies: VecDeque::from([Ok(vec![0x02])]),
            ..Default::default()
        };
        let (channel, _) = spawn(link, Dialect::Legacy);

        let err = channel.sender().submit(Request::SetPhase(9000)).await.unwrap_err();
        assert!(matches!(err, SessionError::Rejected { ref reply, .. } if reply == "status 0x02"));
        assert_eq!(channel.state(), ChannelState::Idle);
        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsupported_request_never_reaches_link() {
        let writes = Arc::new(Mutex::new(Vec::new()));
        let link = ScriptedLink {
            writes: writes.clone(),
            ..Default::default()
        };
        let (channel, _) = spawn(link, Dialect::Hs9000);

        let err = channel.sender().submit(Request::SetPhase(900)).await.unwrap_err();
        assert!(matches!(err, SessionError::UnsupportedOperation { dialect: Dialect::Hs9000, .. }));
        assert!(writes.lock().unwrap().is_empty());
        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_overlong_reply_counts_as_decode_error() {
        let link = ScriptedLink {
            replies: VecDeque::from([
                Err(TransportError::Overrun(256)),
                Ok(b"Frequency Set\n".to_vec()),
            ]),
            ..Default::default()
        };
        let (channel, _) = spawn(link, Dialect::Hs9000);

        let err = channel
            .sender()
            .submit(Request::Raw(":CH1:FREQ?".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Decode { .. }));
        assert_eq!(channel.state(), ChannelState::Idle);

        let reply = channel
            .sender()
            .submit(Request::Raw(":CH1:FREQ:1GHz".into()))
            .await
            .unwrap();
        assert_eq!(reply, Response::Text("Frequency Set".into()));
        channel.shutdown().await;
    }

    #[tokio::test]
    async fn test_non_transient_transport_error_faults() {
        let link = ScriptedLink {
            replies: VecDeque::from([Err(TransportError::Closed)]),
            ..Default::default()
        };
        let (channel, _) = spawn(link, Dialect::Legacy);

        let err = channel.sender().submit(Request::IsRfPowerOn).await.unwrap_err();
        assert!(matches!(err, SessionError::Transport(TransportError::Closed)));
        assert_eq!(channel.state(), ChannelState::Faulted);
        channel.shutdown().await;
    }
}

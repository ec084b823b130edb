//! Session bridge.
//!
//! A [`SessionBridge`] joins one terminal process to one transport
//! connection. Input from the connection is decoded into control frames and
//! applied to the process; process output is encoded and sent back in order.
//! The bridge ends when either side goes away, when the peer stops answering
//! keepalive pings, or on server shutdown, and it always releases the
//! process before returning.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use protocol::{ControlFrame, OutboundFrame, OutputEncoder, OutputEncoding, ProtocolError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, KeepaliveConfig};
use crate::session::keepalive::KeepaliveMonitor;
use crate::session::pty::{
    OutputReceiver, PtyHandle, PtyProcess, SessionError, SessionId, SessionStatus, SpawnOptions,
};

/// Capacity of the channel for frames that do not come from the process.
const CONTROL_CHANNEL_CAPACITY: usize = 16;

/// Capacity of the channel for decoded input waiting on the process.
const INPUT_CHANNEL_CAPACITY: usize = 256;

/// Settings for a single bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
    /// How process output is framed.
    pub output_encoding: OutputEncoding,
    /// Upper bound for a single outbound send.
    pub send_timeout: Duration,
    /// Grace period for flushing output after the process is released.
    pub drain_timeout: Duration,
    /// Keepalive pinging.
    pub keepalive: KeepaliveConfig,
}

impl BridgeConfig {
    /// Extracts bridge settings from the daemon configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_encoding: config.session.output_encoding,
            send_timeout: config.session.send_timeout(),
            drain_timeout: config.session.drain_timeout(),
            keepalive: config.keepalive.clone(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Lifecycle of a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Process spawned, transport not yet attached.
    Connecting,
    /// Forwarding in both directions.
    Active,
    /// Releasing the process and flushing output.
    Closing,
    /// Finished.
    Closed,
}

/// Something that happened on the transport's receiving half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text or binary message from the client.
    Message(Vec<u8>),
    /// Answer to a keepalive ping.
    Pong,
    /// The client closed the connection or the connection failed.
    Closed,
}

/// Why a bridge stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client disconnected.
    TransportClosed,
    /// The process closed its output.
    ProcessExited,
    /// Too many keepalive pings went unanswered.
    PeerUnresponsive,
    /// The server is shutting down.
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            CloseReason::TransportClosed => "transport closed",
            CloseReason::ProcessExited => "process exited",
            CloseReason::PeerUnresponsive => "peer unresponsive",
            CloseReason::Shutdown => "shutdown",
        };
        f.write_str(reason)
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    /// Session identifier.
    pub id: SessionId,
    /// What ended the session.
    pub reason: CloseReason,
    /// Process status collected at teardown.
    pub exit_status: Option<SessionStatus>,
    /// Input bytes accepted for the process.
    pub bytes_in: u64,
    /// Output payload bytes delivered to the transport.
    pub bytes_out: u64,
    /// Resize requests accepted for the process.
    pub resizes: u64,
    /// Client messages discarded because the process was not taking input.
    pub dropped_inputs: u64,
    /// Terminal size as `(cols, rows)` when the session ended.
    pub terminal_size: (u16, u16),
    /// Keepalive pings attempted.
    pub pings_sent: u64,
    /// Outbound frames lost to send errors or timeouts.
    pub dropped_sends: u64,
}

/// Counters kept by the output pump.
#[derive(Debug, Clone, Copy, Default)]
struct PumpStats {
    bytes_out: u64,
    dropped_sends: u64,
}

/// Binds a process to a transport for the lifetime of one connection.
pub struct SessionBridge<P: PtyHandle> {
    process: Arc<P>,
    output: OutputReceiver,
    config: BridgeConfig,
    state: SessionState,
    bytes_in: u64,
    resizes: u64,
    dropped_inputs: u64,
}

impl SessionBridge<PtyProcess> {
    /// Spawns the process for a new connection.
    pub fn spawn(options: &SpawnOptions, config: BridgeConfig) -> Result<Self, SessionError> {
        let (process, output) = PtyProcess::spawn(options)?;
        Ok(Self::new(process, output, config))
    }
}

impl<P: PtyHandle> SessionBridge<P> {
    /// Wraps an already running process.
    pub fn new(process: P, output: OutputReceiver, config: BridgeConfig) -> Self {
        Self {
            process: Arc::new(process),
            output,
            config,
            state: SessionState::Connecting,
            bytes_in: 0,
            resizes: 0,
            dropped_inputs: 0,
        }
    }

    /// Returns the session ID.
    pub fn id(&self) -> &SessionId {
        self.process.id()
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Forwards traffic until the session ends and returns its summary.
    ///
    /// Per-message failures are logged and dropped. The process is killed
    /// exactly once before this returns, whatever ended the session.
    ///
    /// Output and input each run on their own task, so neither a slow client
    /// nor a process that stops reading can hold up the other events.
    pub async fn run<S, R>(
        mut self,
        sink: S,
        mut stream: R,
        shutdown: CancellationToken,
    ) -> SessionReport
    where
        S: Sink<OutboundFrame> + Unpin + Send + 'static,
        S::Error: fmt::Display,
        R: Stream<Item = TransportEvent> + Unpin + Send,
    {
        self.set_state(SessionState::Active);

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_CAPACITY);
        let output = std::mem::replace(&mut self.output, mpsc::unbounded_channel().1);
        let pump_stop = CancellationToken::new();
        let pump = OutputPump {
            sink,
            encoder: OutputEncoder::new(self.config.output_encoding),
            send_timeout: self.config.send_timeout,
            stop: pump_stop.clone(),
            session_id: self.id().clone(),
            stats: PumpStats::default(),
        };
        let mut pump_handle = tokio::spawn(pump.run(output, control_rx));

        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let input = InputPump {
            process: Arc::clone(&self.process),
            session_id: self.id().clone(),
        };
        let input_handle = tokio::spawn(input.run(input_rx));

        let expired = CancellationToken::new();
        let keepalive = KeepaliveMonitor::start(
            &self.config.keepalive,
            control_tx,
            expired.clone(),
            self.id().clone(),
        );

        let mut pump_result = None;
        let reason = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break CloseReason::Shutdown,
                _ = expired.cancelled() => break CloseReason::PeerUnresponsive,
                result = &mut pump_handle => {
                    pump_result = Some(result);
                    break CloseReason::ProcessExited;
                }
                event = stream.next() => match event {
                    Some(TransportEvent::Message(data)) => self.handle_message(&data, &input_tx),
                    Some(TransportEvent::Pong) => keepalive.record_pong(),
                    Some(TransportEvent::Closed) | None => break CloseReason::TransportClosed,
                },
            }
        };

        tracing::debug!(session_id = %self.id(), reason = %reason, "Closing session");
        self.set_state(SessionState::Closing);

        keepalive.cancel();
        drop(input_tx);

        let exit_status = match self.process.kill().await {
            Ok(status) => Some(status),
            Err(e) => {
                tracing::warn!(session_id = %self.id(), error = %e, "Failed to release process");
                None
            }
        };

        self.finish_input(input_handle).await;

        let pump_result = match pump_result {
            Some(result) => result,
            None => self.drain(pump_handle, pump_stop).await,
        };

        let stats = match pump_result {
            Ok((mut sink, stats)) => {
                self.close_transport(&mut sink).await;
                stats
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id(), error = %e, "Output pump failed");
                PumpStats::default()
            }
        };

        self.set_state(SessionState::Closed);

        SessionReport {
            id: self.id().clone(),
            reason,
            exit_status,
            bytes_in: self.bytes_in,
            bytes_out: stats.bytes_out,
            resizes: self.resizes,
            dropped_inputs: self.dropped_inputs,
            terminal_size: self.process.size(),
            pings_sent: keepalive.pings_sent(),
            dropped_sends: stats.dropped_sends,
        }
    }

    /// Decodes a client message and queues it for the process.
    ///
    /// Never waits on the process; a full queue drops the message.
    fn handle_message(&mut self, data: &[u8], input: &mpsc::Sender<ControlFrame>) {
        let frame = ControlFrame::decode(data);
        let (resizes, bytes) = match &frame {
            ControlFrame::Resize { .. } => (1, 0),
            ControlFrame::RawInput(bytes) => (0, bytes.len() as u64),
        };

        match input.try_send(frame) {
            Ok(()) => {
                self.resizes += resizes;
                self.bytes_in += bytes;
            }
            Err(TrySendError::Full(_)) => {
                self.dropped_inputs += 1;
                tracing::warn!(
                    session_id = %self.id(),
                    len = data.len(),
                    "Process is not taking input, dropped message"
                );
            }
            Err(TrySendError::Closed(_)) => {
                self.dropped_inputs += 1;
                tracing::debug!(session_id = %self.id(), "Input task gone, dropped message");
            }
        }
    }

    /// Gives queued input the grace period to reach the process.
    async fn finish_input(&self, mut handle: JoinHandle<()>) {
        if tokio::time::timeout(self.config.drain_timeout, &mut handle)
            .await
            .is_err()
        {
            tracing::debug!(session_id = %self.id(), "Input still blocked after release");
            handle.abort();
        }
    }

    /// Waits for the pump to flush, stopping it once the grace period ends.
    async fn drain<S>(
        &self,
        mut handle: JoinHandle<(S, PumpStats)>,
        stop: CancellationToken,
    ) -> Result<(S, PumpStats), tokio::task::JoinError> {
        match tokio::time::timeout(self.config.drain_timeout, &mut handle).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(
                    session_id = %self.id(),
                    timeout = ?self.config.drain_timeout,
                    "Output drain timed out"
                );
                stop.cancel();
                handle.await
            }
        }
    }

    async fn close_transport<S>(&self, sink: &mut S)
    where
        S: Sink<OutboundFrame> + Unpin,
        S::Error: fmt::Display,
    {
        let timeout = self.config.send_timeout;
        if let Err(e) = send_frame(sink, OutboundFrame::Close, timeout).await {
            tracing::debug!(session_id = %self.id(), error = %e, "Close frame not delivered");
        }
        let _ = tokio::time::timeout(timeout, sink.close()).await;
    }

    fn set_state(&mut self, state: SessionState) {
        tracing::trace!(
            session_id = %self.id(),
            from = ?self.state,
            to = ?state,
            "Session state"
        );
        self.state = state;
    }
}

/// Sends one frame, giving up after `timeout`.
async fn send_frame<S>(
    sink: &mut S,
    frame: OutboundFrame,
    timeout: Duration,
) -> protocol::Result<()>
where
    S: Sink<OutboundFrame> + Unpin,
    S::Error: fmt::Display,
{
    match tokio::time::timeout(timeout, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ProtocolError::SendFailed(e.to_string())),
        Err(_) => Err(ProtocolError::Timeout(format!(
            "send exceeded {}ms",
            timeout.as_millis()
        ))),
    }
}

/// Task applying client input to the process.
///
/// Writes can block for as long as the process leaves its input unread, so
/// they happen here rather than in the bridge's event loop.
struct InputPump<P> {
    process: Arc<P>,
    session_id: SessionId,
}

impl<P: PtyHandle> InputPump<P> {
    async fn run(self, mut input: mpsc::Receiver<ControlFrame>) {
        while let Some(frame) = input.recv().await {
            match frame {
                ControlFrame::Resize { cols, rows } => {
                    if let Err(e) = self.process.resize(cols, rows).await {
                        tracing::debug!(
                            session_id = %self.session_id,
                            cols = cols,
                            rows = rows,
                            error = %e,
                            "Dropped resize"
                        );
                    }
                }
                ControlFrame::RawInput(bytes) => {
                    if let Err(e) = self.process.write(&bytes).await {
                        tracing::debug!(
                            session_id = %self.session_id,
                            len = bytes.len(),
                            error = %e,
                            "Dropped input"
                        );
                    }
                }
            }
        }
    }
}

/// Task owning the transport sink.
///
/// Process output and control frames (keepalive pings) are funnelled
/// through here so the sink has a single writer.
struct OutputPump<S> {
    sink: S,
    encoder: OutputEncoder,
    send_timeout: Duration,
    stop: CancellationToken,
    session_id: SessionId,
    stats: PumpStats,
}

impl<S> OutputPump<S>
where
    S: Sink<OutboundFrame> + Unpin + Send + 'static,
    S::Error: fmt::Display,
{
    async fn run(
        mut self,
        mut output: OutputReceiver,
        mut control: mpsc::Receiver<OutboundFrame>,
    ) -> (S, PumpStats) {
        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                Some(frame) = control.recv() => self.send(frame).await,
                chunk = output.recv() => match chunk {
                    Some(chunk) => {
                        if let Some(frame) = self.encoder.encode(&chunk) {
                            self.send(frame).await;
                        }
                    }
                    None => break,
                },
            }
        }

        if self.encoder.pending_len() > 0 {
            tracing::trace!(
                session_id = %self.session_id,
                pending = self.encoder.pending_len(),
                "Flushing incomplete output"
            );
        }
        if let Some(frame) = self.encoder.finish() {
            self.send(frame).await;
        }

        (self.sink, self.stats)
    }

    async fn send(&mut self, frame: OutboundFrame) {
        let len = match &frame {
            OutboundFrame::Text(_) | OutboundFrame::Binary(_) => frame.payload_len() as u64,
            OutboundFrame::Ping(_) | OutboundFrame::Close => 0,
        };

        match send_frame(&mut self.sink, frame, self.send_timeout).await {
            Ok(()) => self.stats.bytes_out += len,
            Err(e @ ProtocolError::Timeout(_)) => {
                self.stats.dropped_sends += 1;
                tracing::warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "Dropped outbound frame"
                );
            }
            Err(e) => {
                self.stats.dropped_sends += 1;
                tracing::debug!(
                    session_id = %self.session_id,
                    error = %e,
                    "Dropped outbound frame"
                );
            }
        }
    }
}

//! Per-controller XCP master worker.
//!
//! The field protocol has no multiplexing: one request is in flight on the
//! wire at a time per controller link. Each controller therefore gets one
//! worker task that exclusively owns its transport link and drains a
//! request queue in admission order. Requests against distinct controllers
//! run on independent workers and never delay one another.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::error::{GatewayError, Result};
use crate::protocol::{
    self, describe_error, SessionState, DOWNLOAD_CHUNK, PID_RES_ERR, PID_RES_OK, UPLOAD_CHUNK,
};
use crate::transport::{Frame, TransportLink};

/// Timing and retry policy for one controller's exchanges.
#[derive(Debug, Clone)]
pub struct ProtocolTimings {
    pub response_timeout: Duration,
    pub connect_timeout: Duration,
    pub retry_count: u32,
    pub protocol_version: u8,
    pub queue_depth: usize,
}

impl Default for ProtocolTimings {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_millis(2000),
            retry_count: 3,
            protocol_version: 1,
            queue_depth: 32,
        }
    }
}

impl ProtocolTimings {
    pub fn from_config(config: &crate::config::ProtocolConfig) -> Self {
        Self {
            response_timeout: Duration::from_millis(config.response_timeout_ms),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            retry_count: config.retry_count,
            protocol_version: config.protocol_version,
            queue_depth: config.queue_depth,
        }
    }
}

/// One queued protocol operation.
#[derive(Debug)]
pub enum Operation {
    Connect,
    Disconnect,
    SetMta { address: u32, extension: u8 },
    Upload { size: u32 },
    Download { data: Vec<u8> },
    /// SET_MTA + chunked UPLOAD as one serialized unit, so concurrent
    /// callers cannot move the transfer pointer mid-read.
    ReadAt { address: u32, size: u32 },
    /// SET_MTA + chunked DOWNLOAD as one serialized unit.
    WriteAt { address: u32, data: Vec<u8> },
    /// Connected <-> Measuring transition driven by the polling scheduler.
    SetMeasuring(bool),
    QueryState,
}

struct Request {
    op: Operation,
    reply: oneshot::Sender<Result<Reply>>,
}

/// Uniform operation output.
#[derive(Debug)]
pub enum Reply {
    Done,
    Bytes(Vec<u8>),
    State(SessionState),
}

/// Cloneable handle to one controller's worker queue.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    id: String,
    tx: mpsc::Sender<Request>,
}

impl ControllerHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Enqueue an operation. When this returns, the request has been
    /// admitted to the controller's queue in call order; the returned
    /// receiver completes when the worker has executed it.
    pub async fn submit(&self, op: Operation) -> oneshot::Receiver<Result<Reply>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = Request {
            op,
            reply: reply_tx,
        };
        if let Err(mpsc::error::SendError(request)) = self.tx.send(request).await {
            let _ = request.reply.send(Err(GatewayError::ControllerUnavailable(format!(
                "{}: worker stopped",
                self.id
            ))));
        }
        reply_rx
    }

    async fn execute(&self, op: Operation) -> Result<Reply> {
        self.submit(op).await.await.unwrap_or_else(|_| {
            Err(GatewayError::ControllerUnavailable(format!(
                "{}: worker dropped request",
                self.id
            )))
        })
    }

    pub async fn connect(&self) -> Result<()> {
        self.execute(Operation::Connect).await.map(|_| ())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.execute(Operation::Disconnect).await.map(|_| ())
    }

    pub async fn set_mta(&self, address: u32, extension: u8) -> Result<()> {
        self.execute(Operation::SetMta { address, extension })
            .await
            .map(|_| ())
    }

    pub async fn upload(&self, size: u32) -> Result<Vec<u8>> {
        match self.execute(Operation::Upload { size }).await? {
            Reply::Bytes(bytes) => Ok(bytes),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn download(&self, data: Vec<u8>) -> Result<()> {
        self.execute(Operation::Download { data }).await.map(|_| ())
    }

    pub async fn read_at(&self, address: u32, size: u32) -> Result<Vec<u8>> {
        match self.execute(Operation::ReadAt { address, size }).await? {
            Reply::Bytes(bytes) => Ok(bytes),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn write_at(&self, address: u32, data: Vec<u8>) -> Result<()> {
        self.execute(Operation::WriteAt { address, data })
            .await
            .map(|_| ())
    }

    pub async fn set_measuring(&self, active: bool) -> Result<()> {
        self.execute(Operation::SetMeasuring(active))
            .await
            .map(|_| ())
    }

    pub async fn state(&self) -> Result<SessionState> {
        match self.execute(Operation::QueryState).await? {
            Reply::State(state) => Ok(state),
            _ => Err(GatewayError::InternalError(
                "unexpected reply to state query".to_string(),
            )),
        }
    }
}

/// Worker owning one controller's link and session state machine.
pub struct ControllerWorker {
    id: String,
    link: Box<dyn TransportLink>,
    timings: ProtocolTimings,
    state: SessionState,
    rx: mpsc::Receiver<Request>,
}

impl ControllerWorker {
    /// Spawn the worker task and return its handle.
    pub fn spawn(
        id: String,
        link: Box<dyn TransportLink>,
        timings: ProtocolTimings,
    ) -> ControllerHandle {
        let (tx, rx) = mpsc::channel(timings.queue_depth);
        let worker = ControllerWorker {
            id: id.clone(),
            link,
            timings,
            state: SessionState::Disconnected,
            rx,
        };
        tokio::spawn(worker.run());
        ControllerHandle { id, tx }
    }

    async fn run(mut self) {
        debug!(controller = %self.id, "protocol worker started");
        while let Some(request) = self.rx.recv().await {
            let result = self.dispatch(request.op).await;
            // The caller may be gone (client disconnected); the operation
            // still ran to completion, its result is simply discarded.
            let _ = request.reply.send(result);
        }
        debug!(controller = %self.id, "protocol worker stopped");
    }

    async fn dispatch(&mut self, op: Operation) -> Result<Reply> {
        match op {
            Operation::Connect => self.handle_connect().await.map(|_| Reply::Done),
            Operation::Disconnect => self.handle_disconnect().await.map(|_| Reply::Done),
            Operation::SetMta { address, extension } => self
                .handle_set_mta(address, extension)
                .await
                .map(|_| Reply::Done),
            Operation::Upload { size } => self.handle_upload(size).await.map(Reply::Bytes),
            Operation::Download { data } => self.handle_download(&data).await.map(|_| Reply::Done),
            Operation::ReadAt { address, size } => {
                self.handle_set_mta(address, 0).await?;
                self.handle_upload(size).await.map(Reply::Bytes)
            }
            Operation::WriteAt { address, data } => {
                self.handle_set_mta(address, 0).await?;
                self.handle_download(&data).await.map(|_| Reply::Done)
            }
            Operation::SetMeasuring(active) => {
                match (self.state, active) {
                    (SessionState::Connected, true) => self.state = SessionState::Measuring,
                    (SessionState::Measuring, false) => self.state = SessionState::Connected,
                    _ => {}
                }
                Ok(Reply::Done)
            }
            Operation::QueryState => Ok(Reply::State(self.state)),
        }
    }

    async fn handle_connect(&mut self) -> Result<()> {
        if self.state.is_established() {
            return Ok(());
        }
        self.state = SessionState::Connecting;
        let reply = match timeout(
            self.timings.connect_timeout,
            self.link.exchange(protocol::connect_frame()),
        )
        .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                self.state = SessionState::Disconnected;
                return Err(e);
            }
            Err(_) => {
                self.state = SessionState::Disconnected;
                warn!(controller = %self.id, "connect timed out");
                return Err(GatewayError::Timeout);
            }
        };
        let reply = match self.check_reply(reply) {
            Ok(reply) => reply,
            Err(e) => {
                self.state = SessionState::Disconnected;
                return Err(e);
            }
        };
        let version = reply[1];
        if version != self.timings.protocol_version {
            self.state = SessionState::Disconnected;
            return Err(GatewayError::Rejected(format!(
                "{}: protocol version {} (expected {})",
                self.id, version, self.timings.protocol_version
            )));
        }
        self.state = SessionState::Connected;
        info!(controller = %self.id, version, "session connected");
        Ok(())
    }

    /// Best effort: the controller is notified if reachable, the local
    /// session drops to Disconnected regardless.
    async fn handle_disconnect(&mut self) -> Result<()> {
        if self.state != SessionState::Disconnected {
            let attempt = timeout(
                self.timings.response_timeout,
                self.link.exchange(protocol::disconnect_frame()),
            )
            .await;
            if attempt.is_err() {
                debug!(controller = %self.id, "disconnect notification timed out");
            }
        }
        self.state = SessionState::Disconnected;
        info!(controller = %self.id, "session disconnected");
        Ok(())
    }

    fn require_established(&self) -> Result<()> {
        if self.state.is_established() {
            Ok(())
        } else {
            Err(GatewayError::SessionError(format!(
                "{}: session not established (state: {})",
                self.id, self.state
            )))
        }
    }

    async fn handle_set_mta(&mut self, address: u32, extension: u8) -> Result<()> {
        self.require_established()?;
        let reply = self
            .exchange_with_retry(protocol::set_mta_frame(address, extension))
            .await?;
        self.check_reply(reply)?;
        trace!(
            controller = %self.id,
            address = format_args!("0x{:08x}", address),
            "transfer pointer set"
        );
        Ok(())
    }

    async fn handle_upload(&mut self, size: u32) -> Result<Vec<u8>> {
        self.require_established()?;
        let mut data = Vec::with_capacity(size as usize);
        let mut remaining = size as usize;
        while remaining > 0 {
            let chunk = remaining.min(UPLOAD_CHUNK);
            let reply = self
                .exchange_with_retry(protocol::upload_frame(chunk as u8))
                .await?;
            let reply = self.check_reply(reply)?;
            data.extend_from_slice(&reply[1..1 + chunk]);
            remaining -= chunk;
        }
        Ok(data)
    }

    async fn handle_download(&mut self, data: &[u8]) -> Result<()> {
        self.require_established()?;
        for chunk in data.chunks(DOWNLOAD_CHUNK) {
            let reply = self
                .exchange_with_retry(protocol::download_frame(chunk))
                .await?;
            self.check_reply(reply)?;
        }
        Ok(())
    }

    /// One frame exchange with bounded retries. Transient faults (link
    /// errors, missing replies) retry with the session held at its last
    /// good state; exhausting the bound drops the session to Disconnected
    /// and surfaces `ControllerUnavailable`.
    async fn exchange_with_retry(&mut self, frame: Frame) -> Result<Frame> {
        let attempts = self.timings.retry_count + 1;
        let mut last_fault = String::new();
        for attempt in 1..=attempts {
            match timeout(self.timings.response_timeout, self.link.exchange(frame)).await {
                Ok(Ok(reply)) => {
                    trace!(
                        controller = %self.id,
                        tx = %hex::encode(frame),
                        rx = %hex::encode(reply),
                        "exchange"
                    );
                    return Ok(reply);
                }
                Ok(Err(e)) => {
                    last_fault = e.to_string();
                    warn!(
                        controller = %self.id,
                        attempt,
                        attempts,
                        fault = %last_fault,
                        "link fault, retrying"
                    );
                }
                Err(_) => {
                    last_fault = "response timeout".to_string();
                    warn!(controller = %self.id, attempt, attempts, "response timeout, retrying");
                }
            }
        }
        self.state = SessionState::Disconnected;
        Err(GatewayError::ControllerUnavailable(format!(
            "{}: {} after {} attempts, session dropped",
            self.id, last_fault, attempts
        )))
    }

    /// Validate a reply frame. A slave error reply is a definitive answer,
    /// never retried, and leaves the session state untouched.
    fn check_reply(&self, reply: Frame) -> Result<Frame> {
        match reply[0] {
            PID_RES_OK => Ok(reply),
            PID_RES_ERR => Err(GatewayError::SessionError(format!(
                "{}: slave error 0x{:02x} ({})",
                self.id,
                reply[1],
                describe_error(reply[1])
            ))),
            pid => Err(GatewayError::TransportError(format!(
                "{}: unexpected reply pid 0x{:02x}",
                self.id, pid
            ))),
        }
    }
}

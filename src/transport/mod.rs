//! Transport links to subsystem controllers.
//!
//! A link is the exclusive, ordered exchange primitive below the protocol
//! master: one 8-byte command frame out, one 8-byte reply frame back, a
//! single exchange in flight at a time. Links are owned by their
//! controller's worker task and never shared.

pub mod emulator;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::{GatewayError, Result};

/// Fixed XCP frame length on the serial fabric (MAX_CTO).
pub const FRAME_LEN: usize = 8;

/// One XCP command or reply frame.
pub type Frame = [u8; FRAME_LEN];

/// Single in-flight-exchange-at-a-time primitive per controller.
#[async_trait]
pub trait TransportLink: Send {
    /// Send one frame and wait for the matching reply frame.
    async fn exchange(&mut self, frame: Frame) -> Result<Frame>;
}

/// Open a link from its configured endpoint spec.
///
/// Supported specs: `tcp://host:port` (frame relay bridge) and `emulated`
/// (in-process responder, for bring-up without hardware).
pub async fn open_link(spec: &str) -> Result<Box<dyn TransportLink>> {
    if let Some(addr) = spec.strip_prefix("tcp://") {
        Ok(Box::new(TcpFrameLink::connect(addr).await?))
    } else if spec == "emulated" {
        Ok(Box::new(emulator::EmulatedController::with_default_memory()))
    } else {
        Err(GatewayError::InvalidConfig(format!(
            "unknown link spec: {}",
            spec
        )))
    }
}

/// Frame relay over a TCP socket to the serial bridge in front of the
/// controller. The bridge echoes exactly one reply frame per command frame.
pub struct TcpFrameLink {
    stream: TcpStream,
    peer: String,
}

impl TcpFrameLink {
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.map_err(|e| {
            GatewayError::TransportError(format!("connect to bridge {} failed: {}", addr, e))
        })?;
        stream.set_nodelay(true).ok();
        debug!(peer = addr, "bridge link established");
        Ok(Self {
            stream,
            peer: addr.to_string(),
        })
    }
}

#[async_trait]
impl TransportLink for TcpFrameLink {
    async fn exchange(&mut self, frame: Frame) -> Result<Frame> {
        self.stream.write_all(&frame).await.map_err(|e| {
            GatewayError::TransportError(format!("{}: send failed: {}", self.peer, e))
        })?;
        let mut reply = [0u8; FRAME_LEN];
        self.stream.read_exact(&mut reply).await.map_err(|e| {
            GatewayError::TransportError(format!("{}: receive failed: {}", self.peer, e))
        })?;
        trace!(
            peer = %self.peer,
            tx = %hex::encode(frame),
            rx = %hex::encode(reply),
            "frame exchange"
        );
        Ok(reply)
    }
}

//! WebSocket gateway server.
//!
//! Accepts client connections and bridges JSON commands onto the
//! per-controller protocol workers. Each connection gets its own handler
//! task; a busy controller never blocks other clients.

pub mod client;
pub mod messages;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::Result;
use crate::polling::PollingScheduler;
use crate::protocol::master::ControllerHandle;
use crate::symbols::SymbolStore;

/// Shared state handed to every client handler.
pub struct GatewayContext {
    pub controllers: HashMap<String, ControllerHandle>,
    pub symbols: SymbolStore,
    pub scheduler: Arc<PollingScheduler>,
    /// Largest memory window one UPLOAD command may request. Bounds the
    /// frame exchanges a single command can occupy a controller with.
    pub max_upload_bytes: u32,
}

impl GatewayContext {
    /// Resolve a command's target controller. An explicit name must match a
    /// configured controller; omitting the name is only unambiguous when
    /// exactly one controller is configured.
    pub fn controller(&self, name: Option<&str>) -> Result<&ControllerHandle> {
        match name {
            Some(name) => self
                .controllers
                .get(name)
                .ok_or_else(|| crate::GatewayError::UnknownController(name.to_string())),
            None if self.controllers.len() == 1 => {
                Ok(self.controllers.values().next().expect("len checked"))
            }
            None => Err(crate::GatewayError::MalformedCommand(
                "command does not name a target controller".to_string(),
            )),
        }
    }
}

pub struct GatewayServer {
    listener: TcpListener,
    ctx: Arc<GatewayContext>,
}

impl GatewayServer {
    pub async fn bind(addr: &str, ctx: Arc<GatewayContext>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "gateway listening");
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept loop. Runs until the listener fails.
    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let ctx = self.ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = client::handle_connection(stream, peer, ctx).await {
                    error!(%peer, error = %e, "client connection failed");
                }
            });
        }
    }
}

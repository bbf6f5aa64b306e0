//! Per-connection client handler.
//!
//! The reader half parses JSON messages and admits commands to the target
//! controller's queue in arrival order. Execution results come back through
//! detached forwarder tasks, so a slow controller only delays its own
//! responses. The writer half multiplexes command responses with streamed
//! data samples.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::messages::{ClientMessage, CommandBody, CommandName, ServerMessage};
use super::GatewayContext;
use crate::error::{GatewayError, Result};
use crate::protocol::master::{ControllerHandle, Operation, Reply};

/// Outbound queue depth per client. Backpressure here slows the producer
/// side rather than growing memory unboundedly.
const OUTBOUND_QUEUE: usize = 64;

pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<GatewayContext>,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| GatewayError::TransportError(format!("websocket handshake: {e}")))?;
    let client_id = Uuid::new_v4();
    info!(client = %client_id, %peer, "client connected");

    let (mut sink, mut source) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);
    let mut samples = ctx.scheduler.samples();

    let writer_id = client_id;
    let writer = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                queued = out_rx.recv() => match queued {
                    Some(msg) => msg,
                    None => break,
                },
                sample = samples.recv() => match sample {
                    Ok(sample) => ServerMessage::Data {
                        parameter: sample.parameter,
                        value: sample.value,
                        timestamp: sample.timestamp,
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(client = %writer_id, skipped, "client fell behind sample stream");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            let text = match serde_json::to_string(&msg) {
                Ok(text) => text,
                Err(e) => {
                    error!(client = %writer_id, error = %e, "response serialization failed");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = source.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(client = %client_id, error = %e, "read error, closing");
                break;
            }
        };
        match frame {
            Message::Text(text) => handle_text(&text, &ctx, &out_tx).await,
            Message::Close(_) => break,
            // Pings are answered by tungstenite; binary frames are not
            // part of the protocol.
            Message::Binary(_) => {
                let _ = out_tx
                    .send(ServerMessage::error(
                        String::new(),
                        "binary frames are not supported",
                    ))
                    .await;
            }
            _ => {}
        }
    }

    // Results of already-admitted commands are discarded from here on.
    writer.abort();
    info!(client = %client_id, %peer, "client disconnected");
    Ok(())
}

async fn handle_text(text: &str, ctx: &Arc<GatewayContext>, out: &mpsc::Sender<ServerMessage>) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            // Best effort at echoing the command id so the client can
            // correlate the failure.
            let command_id = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| v.get("command_id")?.as_str().map(str::to_string))
                .unwrap_or_default();
            let reason = GatewayError::MalformedCommand(e.to_string());
            let _ = out.send(ServerMessage::error(command_id, reason.to_string())).await;
            return;
        }
    };
    match msg {
        ClientMessage::Command {
            command_id,
            controller,
            command,
        } => handle_command(ctx, out, command_id, controller.as_deref(), command).await,
        ClientMessage::Subscribe {
            parameter,
            controller,
            interval_ms,
        } => handle_subscribe(ctx, out, parameter, controller.as_deref(), interval_ms).await,
        ClientMessage::Unsubscribe {
            parameter,
            controller,
        } => handle_unsubscribe(ctx, out, parameter, controller.as_deref()).await,
    }
}

async fn handle_command(
    ctx: &Arc<GatewayContext>,
    out: &mpsc::Sender<ServerMessage>,
    command_id: String,
    controller: Option<&str>,
    command: CommandBody,
) {
    let handle = match ctx.controller(controller) {
        Ok(handle) => handle.clone(),
        Err(e) => {
            let _ = out.send(ServerMessage::error(command_id, e.to_string())).await;
            return;
        }
    };
    let op = match decode_command(&handle, ctx, &command) {
        Ok(op) => op,
        Err(e) => {
            let _ = out.send(ServerMessage::error(command_id, e.to_string())).await;
            return;
        }
    };

    // Admission happens here, in reader order. The result is forwarded by a
    // detached task so the next message can be read immediately.
    let reply_rx = handle.submit(op).await;
    let out = out.clone();
    let controller_id = handle.id().to_string();
    tokio::spawn(async move {
        let result = reply_rx.await.unwrap_or_else(|_| {
            Err(GatewayError::ControllerUnavailable(format!(
                "{controller_id}: worker dropped request"
            )))
        });
        let msg = match result {
            Ok(Reply::Bytes(bytes)) => {
                ServerMessage::success_with_bytes(command_id, "ok", bytes)
            }
            Ok(_) => ServerMessage::success(command_id, "ok"),
            Err(e) => {
                if !e.is_client_error() {
                    warn!(controller = %controller_id, error = %e, "command failed");
                }
                ServerMessage::error(command_id, e.to_string())
            }
        };
        let _ = out.send(msg).await;
    });
}

/// Translate a wire command into a protocol operation.
fn decode_command(
    handle: &ControllerHandle,
    ctx: &GatewayContext,
    command: &CommandBody,
) -> Result<Operation> {
    match command.name {
        CommandName::Connect => Ok(Operation::Connect),
        CommandName::Disconnect => Ok(Operation::Disconnect),
        CommandName::SetMta => {
            if let Some(symbol) = &command.symbol {
                let location = ctx.symbols.resolve(handle.id(), symbol)?;
                return Ok(Operation::SetMta {
                    address: location.address,
                    extension: 0,
                });
            }
            if command.bytes.len() < 4 {
                return Err(GatewayError::MalformedCommand(
                    "SET_MTA needs a 4-byte little-endian address".to_string(),
                ));
            }
            let address = u32::from_le_bytes([
                command.bytes[0],
                command.bytes[1],
                command.bytes[2],
                command.bytes[3],
            ]);
            let extension = command.bytes.get(4).copied().unwrap_or(0);
            Ok(Operation::SetMta { address, extension })
        }
        CommandName::Upload => {
            if let Some(symbol) = &command.symbol {
                let location = ctx.symbols.resolve(handle.id(), symbol)?;
                check_upload_size(location.size, ctx.max_upload_bytes)?;
                return Ok(Operation::ReadAt {
                    address: location.address,
                    size: location.size,
                });
            }
            let size = match command.bytes.len() {
                1 => command.bytes[0] as u32,
                2 => u16::from_le_bytes([command.bytes[0], command.bytes[1]]) as u32,
                4 => u32::from_le_bytes([
                    command.bytes[0],
                    command.bytes[1],
                    command.bytes[2],
                    command.bytes[3],
                ]),
                _ => {
                    return Err(GatewayError::MalformedCommand(
                        "UPLOAD needs a 1, 2 or 4 byte little-endian size".to_string(),
                    ))
                }
            };
            check_upload_size(size, ctx.max_upload_bytes)?;
            Ok(Operation::Upload { size })
        }
        CommandName::Download => {
            if command.bytes.is_empty() {
                return Err(GatewayError::MalformedCommand(
                    "DOWNLOAD needs a payload".to_string(),
                ));
            }
            Ok(Operation::Download {
                data: command.bytes.clone(),
            })
        }
    }
}

/// An oversized request would occupy the controller's serialized queue
/// with millions of frame exchanges, starving every other client.
fn check_upload_size(size: u32, limit: u32) -> Result<()> {
    if size == 0 {
        return Err(GatewayError::MalformedCommand(
            "UPLOAD size must be nonzero".to_string(),
        ));
    }
    if size > limit {
        return Err(GatewayError::MalformedCommand(format!(
            "UPLOAD size {} exceeds the limit of {} bytes",
            size, limit
        )));
    }
    Ok(())
}

async fn handle_subscribe(
    ctx: &Arc<GatewayContext>,
    out: &mpsc::Sender<ServerMessage>,
    parameter: String,
    controller: Option<&str>,
    interval_ms: Option<u64>,
) {
    let reply_id = format!("subscribe_{parameter}");
    let handle = match ctx.controller(controller) {
        Ok(handle) => handle.clone(),
        Err(e) => {
            let _ = out.send(ServerMessage::error(reply_id, e.to_string())).await;
            return;
        }
    };
    let location = match ctx.symbols.resolve(handle.id(), &parameter) {
        Ok(location) => location,
        Err(e) => {
            let _ = out.send(ServerMessage::error(reply_id, e.to_string())).await;
            return;
        }
    };
    ctx.scheduler.subscribe(
        handle,
        &parameter,
        location,
        interval_ms.map(Duration::from_millis),
    );
    let _ = out
        .send(ServerMessage::success(reply_id, "subscribed"))
        .await;
}

async fn handle_unsubscribe(
    ctx: &Arc<GatewayContext>,
    out: &mpsc::Sender<ServerMessage>,
    parameter: String,
    controller: Option<&str>,
) {
    let reply_id = format!("unsubscribe_{parameter}");
    let handle = match ctx.controller(controller) {
        Ok(handle) => handle.clone(),
        Err(e) => {
            let _ = out.send(ServerMessage::error(reply_id, e.to_string())).await;
            return;
        }
    };
    let msg = if ctx.scheduler.unsubscribe(&handle, &parameter) {
        ServerMessage::success(reply_id, "unsubscribed")
    } else {
        ServerMessage::error(reply_id, format!("no subscription for {parameter}"))
    };
    let _ = out.send(msg).await;
}

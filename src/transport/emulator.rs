//! In-process XCP slave responder.
//!
//! Stands in for a real subsystem controller behind a link: answers the
//! same 8-byte frames a firmware responder would, backed by plain memory
//! regions. Used for bring-up without hardware and throughout the tests,
//! including fault injection (dropped replies).

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{GatewayError, Result};
use crate::protocol::{
    ERR_CMD_UNKNOWN, ERR_OUT_OF_RANGE, ERR_SEQUENCE, PID_CONNECT, PID_DISCONNECT, PID_DOWNLOAD,
    PID_RES_ERR, PID_RES_OK, PID_SET_MTA, PID_UPLOAD,
};
use crate::transport::{Frame, TransportLink, FRAME_LEN};

/// Protocol version byte the emulator reports in its CONNECT reply.
pub const EMULATED_PROTOCOL_VERSION: u8 = 1;

struct MemoryRegion {
    base: u32,
    data: Vec<u8>,
}

impl MemoryRegion {
    fn contains(&self, address: u32, len: u32) -> bool {
        address >= self.base && (address - self.base) as u64 + len as u64 <= self.data.len() as u64
    }
}

/// Emulated controller implementing [`TransportLink`] directly: every
/// exchange is answered synchronously from emulated memory.
pub struct EmulatedController {
    regions: Vec<MemoryRegion>,
    connected: bool,
    mta: Option<u32>,
    version: u8,
    /// Number of upcoming exchanges to swallow (no reply), shared with the
    /// test that injects the fault.
    drop_next: Arc<AtomicU32>,
}

impl EmulatedController {
    pub fn new(regions: &[(u32, usize)]) -> Self {
        Self {
            regions: regions
                .iter()
                .map(|&(base, size)| MemoryRegion {
                    base,
                    data: vec![0u8; size],
                })
                .collect(),
            connected: false,
            mta: None,
            version: EMULATED_PROTOCOL_VERSION,
            drop_next: Arc::new(AtomicU32::new(0)),
        }
    }

    /// RAM at 0x20000000 and CCM at 0x10000000, 64 KiB each.
    pub fn with_default_memory() -> Self {
        Self::new(&[(0x2000_0000, 0x1_0000), (0x1000_0000, 0x1_0000)])
    }

    /// Report a different protocol version on CONNECT (for rejection tests).
    pub fn with_version(mut self, version: u8) -> Self {
        self.version = version;
        self
    }

    /// Shared counter of exchanges to drop; incrementing it makes the next
    /// exchanges time out from the master's point of view.
    pub fn fault_handle(&self) -> Arc<AtomicU32> {
        self.drop_next.clone()
    }

    /// Pre-load emulated memory, for tests and demos.
    pub fn write_memory(&mut self, address: u32, bytes: &[u8]) {
        for region in &mut self.regions {
            if region.contains(address, bytes.len() as u32) {
                let offset = (address - region.base) as usize;
                region.data[offset..offset + bytes.len()].copy_from_slice(bytes);
                return;
            }
        }
        panic!("emulated write outside configured regions: 0x{:08x}", address);
    }

    pub fn read_memory(&self, address: u32, len: usize) -> Option<Vec<u8>> {
        self.regions
            .iter()
            .find(|r| r.contains(address, len as u32))
            .map(|r| {
                let offset = (address - r.base) as usize;
                r.data[offset..offset + len].to_vec()
            })
    }

    fn error_reply(code: u8) -> Frame {
        let mut reply = [0u8; FRAME_LEN];
        reply[0] = PID_RES_ERR;
        reply[1] = code;
        reply
    }

    fn ok_reply() -> Frame {
        let mut reply = [0u8; FRAME_LEN];
        reply[0] = PID_RES_OK;
        reply
    }

    fn respond(&mut self, frame: Frame) -> Frame {
        match frame[0] {
            PID_CONNECT => {
                self.connected = true;
                let mut reply = Self::ok_reply();
                reply[1] = self.version;
                reply
            }
            PID_DISCONNECT => {
                self.connected = false;
                self.mta = None;
                Self::ok_reply()
            }
            PID_SET_MTA => {
                if !self.connected {
                    return Self::error_reply(ERR_SEQUENCE);
                }
                let address = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
                self.mta = Some(address);
                Self::ok_reply()
            }
            PID_UPLOAD => {
                if !self.connected {
                    return Self::error_reply(ERR_SEQUENCE);
                }
                let Some(mta) = self.mta else {
                    return Self::error_reply(ERR_SEQUENCE);
                };
                let len = frame[1] as usize;
                if len > FRAME_LEN - 1 {
                    return Self::error_reply(ERR_OUT_OF_RANGE);
                }
                let Some(bytes) = self.read_memory(mta, len) else {
                    return Self::error_reply(ERR_OUT_OF_RANGE);
                };
                self.mta = Some(mta + len as u32);
                let mut reply = Self::ok_reply();
                reply[1..1 + len].copy_from_slice(&bytes);
                reply
            }
            PID_DOWNLOAD => {
                if !self.connected {
                    return Self::error_reply(ERR_SEQUENCE);
                }
                let Some(mta) = self.mta else {
                    return Self::error_reply(ERR_SEQUENCE);
                };
                let len = frame[1] as usize;
                if len > FRAME_LEN - 2 {
                    return Self::error_reply(ERR_OUT_OF_RANGE);
                }
                let data = &frame[2..2 + len];
                let in_range = self
                    .regions
                    .iter()
                    .any(|r| r.contains(mta, len as u32));
                if !in_range {
                    return Self::error_reply(ERR_OUT_OF_RANGE);
                }
                self.write_memory(mta, data);
                self.mta = Some(mta + len as u32);
                Self::ok_reply()
            }
            _ => Self::error_reply(ERR_CMD_UNKNOWN),
        }
    }
}

#[async_trait]
impl TransportLink for EmulatedController {
    async fn exchange(&mut self, frame: Frame) -> Result<Frame> {
        if self.drop_next.load(Ordering::SeqCst) > 0 {
            self.drop_next.fetch_sub(1, Ordering::SeqCst);
            // No reply ever comes; the master's timeout fires first.
            return Err(GatewayError::TransportError(
                "injected link fault".to_string(),
            ));
        }
        Ok(self.respond(frame))
    }
}

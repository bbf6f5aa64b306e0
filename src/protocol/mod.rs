//! XCP field protocol: frame layout and the per-controller master.
//!
//! The master initiates every exchange; slaves only respond. Frames are a
//! fixed 8 bytes (MAX_CTO); transfers larger than one frame are chunked
//! and rely on the slave auto-incrementing its memory transfer pointer.

pub mod master;

use crate::transport::{Frame, FRAME_LEN};

/// Command packet identifiers.
pub const PID_CONNECT: u8 = 0xFF;
pub const PID_DISCONNECT: u8 = 0xFE;
pub const PID_SET_MTA: u8 = 0xF6;
pub const PID_UPLOAD: u8 = 0xF5;
pub const PID_DOWNLOAD: u8 = 0xF0;

/// Reply packet identifiers.
pub const PID_RES_OK: u8 = 0xFF;
pub const PID_RES_ERR: u8 = 0xFE;

/// Slave error codes.
pub const ERR_CMD_UNKNOWN: u8 = 0x20;
pub const ERR_OUT_OF_RANGE: u8 = 0x22;
pub const ERR_SEQUENCE: u8 = 0x29;
pub const ERR_MEMORY_OVERFLOW: u8 = 0x30;

/// Payload bytes carried per UPLOAD reply frame (pid + data).
pub const UPLOAD_CHUNK: usize = FRAME_LEN - 1;

/// Payload bytes carried per DOWNLOAD command frame (pid + len + data).
pub const DOWNLOAD_CHUNK: usize = FRAME_LEN - 2;

/// XCP session state of one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Measuring,
}

impl SessionState {
    /// True when memory transfer commands are admissible.
    pub fn is_established(self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Measuring)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Measuring => write!(f, "measuring"),
        }
    }
}

pub fn connect_frame() -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = PID_CONNECT;
    frame
}

pub fn disconnect_frame() -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = PID_DISCONNECT;
    frame
}

/// SET_MTA: `[pid, _, _, addr_ext, addr_le32]`.
pub fn set_mta_frame(address: u32, extension: u8) -> Frame {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = PID_SET_MTA;
    frame[3] = extension;
    frame[4..8].copy_from_slice(&address.to_le_bytes());
    frame
}

/// UPLOAD: `[pid, n, 0..]`, n bounded by [`UPLOAD_CHUNK`].
pub fn upload_frame(size: u8) -> Frame {
    debug_assert!(size as usize <= UPLOAD_CHUNK);
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = PID_UPLOAD;
    frame[1] = size;
    frame
}

/// DOWNLOAD: `[pid, n, data[n], 0-pad]`, n bounded by [`DOWNLOAD_CHUNK`].
pub fn download_frame(data: &[u8]) -> Frame {
    debug_assert!(data.len() <= DOWNLOAD_CHUNK);
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = PID_DOWNLOAD;
    frame[1] = data.len() as u8;
    frame[2..2 + data.len()].copy_from_slice(data);
    frame
}

/// Human-readable slave error description.
pub fn describe_error(code: u8) -> &'static str {
    match code {
        ERR_CMD_UNKNOWN => "command unknown",
        ERR_OUT_OF_RANGE => "address out of range",
        ERR_SEQUENCE => "command sequence error",
        ERR_MEMORY_OVERFLOW => "memory overflow",
        _ => "unspecified slave error",
    }
}

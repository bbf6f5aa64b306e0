//! XCP Memory-Access Gateway
//!
//! Bridges remote WebSocket clients to the memory of vehicle-charger
//! microcontrollers. Firmware ELF images supply symbol addresses and type
//! layouts; an XCP-style master speaks 8-byte frames to the controllers
//! over serial links; a polling scheduler streams subscribed parameter
//! values back to clients as JSON.

pub mod config;
pub mod error;
pub mod gateway;
pub mod polling;
pub mod protocol;
pub mod symbols;
pub mod transport;

pub use config::Config;
pub use error::{GatewayError, Result};
pub use gateway::{GatewayContext, GatewayServer};

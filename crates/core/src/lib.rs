//! Core functionality for the PASER secure mesh routing workspace.
//!
//! This crate provides the fundamental types, constants, configuration and
//! logging used by the cryptographic layer, the routing engine, the KDC and
//! the node service.

pub mod config;
pub mod error;
pub mod logging;
pub mod seq;
pub mod types;

pub use config::{
    NodeConfig, PaserConfig, PolicyConfig, SecurityConfig, TimerConfig,
};
pub use error::{CoreError, CoreResult};
pub use seq::is_seq_new;
pub use types::{
    AddressRange, GeoPosition, HopRecord, NetworkInterface, UnreachableBlock, BROADCAST,
    MAXSEQ, PASER_PORT, SECRET_LEN,
};

//! PASER Key Distribution Center
//!
//! The KDC answers gateway registration requests with a signed key block
//! carrying the group transient key (GTK) sealed to the requester, the
//! current certificate revocation list and the KDC's authorization of the
//! current key epoch. Rotating the GTK produces the `B_RESET` that every
//! node relays to move the mesh to the new epoch.

pub mod error;
pub mod server;

pub use error::{KdcError, KdcResult};
pub use server::{KdcStatus, KeyRotation, SimpleKdc, GTK_LEN};

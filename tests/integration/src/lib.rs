//! End-to-end tests for PASER meshes
//!
//! This test suite runs several nodes, a KDC and a simulated radio medium
//! in one process and validates:
//! - Gateway registration through the KDC, directly and over several hops
//! - Promotion of links to trusted and hello-based route maintenance
//! - Aggregated route error reporting after a link break
//! - Key epoch rotation through B_RESET flooding

pub mod test_utils;

#[cfg(test)]
mod registration_tests;

#[cfg(test)]
mod trust_tests;

#[cfg(test)]
mod link_break_tests;

#[cfg(test)]
mod key_reset_tests;

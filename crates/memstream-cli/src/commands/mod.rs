//! CLI command implementations.
//!
//! Every command runs against an already attached [`Process`](memstream_core::Process),
//! so the same code drives the system endpoint and the mock used in tests.

pub mod hex_utils;
pub mod hexdump;
pub mod scan;
pub mod watch;
pub mod write;

//! # memstream-core
//!
//! Batched remote-memory I/O engine.
//!
//! This crate provides:
//! - Page-deduplicated scatter reads over a [`RemoteEndpoint`]
//! - A per-process staging queue that retries a failed batch, then degrades
//!   to single transfers
//! - Cached offset tables ([`Object`]) refreshed in one transfer per call
//! - A mock endpoint for tests (`mock` feature) and an OS-backed [`SystemEndpoint`]
//!
//! ## Example
//!
//! ```ignore
//! use memstream_core::prelude::*;
//!
//! let mut process = Process::new(SystemEndpoint::shared(), pid)?;
//! let mut a = [0u8; 8];
//! let mut b = [0u8; 4];
//! let mut queue = process.staging();
//! queue.stage_read(0x7FF6_1000_0000, &mut a);
//! queue.stage_read(0x7FF6_1000_0010, &mut b);
//! let failed = queue.execute_reads()?;
//! ```

pub mod config;
pub mod endpoint;
pub mod error;
pub mod memory;
pub mod object;
pub mod prelude;

pub use config::{AccessFlags, EngineConfig, EngineConfigBuilder};
pub use endpoint::{Pid, RemoteEndpoint, ScatterHandle, SystemEndpoint, SystemScatter};
pub use error::{Error, Result};
pub use memory::{
    MemoryRange, MemoryValue, PAGE_SIZE, PageIndex, Pattern, Process, ReadOp, ScatterOp,
    ScatterSession, SessionState, StagingQueue, WriteOp,
};
pub use object::{CachePolicy, FieldSnapshot, Object, ObjectSnapshot, ReadState};

//! Prelude module for convenient imports
//!
//! ```ignore
//! use memstream_core::prelude::*;
//! ```

// Engine
pub use crate::config::{AccessFlags, EngineConfig};
pub use crate::memory::{MemoryValue, Pattern, Process, ReadOp, StagingQueue, WriteOp};

// Objects
pub use crate::object::{CachePolicy, Object, ReadState};

// Endpoints
pub use crate::endpoint::{Pid, RemoteEndpoint, ScatterHandle, SystemEndpoint};

// Error handling
pub use crate::error::{Error, Result};

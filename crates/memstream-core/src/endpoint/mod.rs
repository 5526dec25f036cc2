//! Device collaborator interface.
//!
//! A [`RemoteEndpoint`] performs the actual transfers against a target
//! process: single reads and writes, and scatter sessions that batch many
//! discontiguous regions into one device request. The engine never talks to
//! hardware any other way.

// Mock endpoint for tests, also exported to dependents through the `mock` feature
#[cfg(any(test, feature = "mock"))]
pub mod mock;
mod system;

use std::fmt;
use std::sync::Arc;

use crate::config::AccessFlags;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockEndpoint, MockEndpointBuilder, MockScatter};
pub use system::{SystemEndpoint, SystemScatter};

/// Target process id, optionally flagged for kernel memory access.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pid(u32);

impl Pid {
    /// Device flag that extends a process address space with kernel memory
    pub const KERNEL_MEMORY: u32 = 0x8000_0000;

    pub const fn new(pid: u32) -> Self {
        Self(pid & !Self::KERNEL_MEMORY)
    }

    /// The same process, addressed together with kernel memory.
    pub const fn with_kernel_memory(self) -> Self {
        Self(self.0 | Self::KERNEL_MEMORY)
    }

    /// Process id without flags
    pub const fn id(self) -> u32 {
        self.0 & !Self::KERNEL_MEMORY
    }

    /// Raw value as passed to the device
    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_kernel_memory(self) -> bool {
        self.0 & Self::KERNEL_MEMORY != 0
    }
}

impl From<u32> for Pid {
    fn from(pid: u32) -> Self {
        Self::new(pid)
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_kernel_memory() {
            write!(f, "Pid({}+kernel)", self.id())
        } else {
            write!(f, "Pid({})", self.id())
        }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// Opaque transport to a target's virtual memory.
pub trait RemoteEndpoint {
    type Scatter: ScatterHandle;

    /// Create a scatter session. `None` if the device rejects it (e.g. dead process).
    fn scatter_init(&self, pid: Pid, flags: AccessFlags) -> Option<Self::Scatter>;

    /// Read `buffer.len()` bytes at `address`, returning the number of bytes read.
    fn read(&self, pid: Pid, address: u64, buffer: &mut [u8], flags: AccessFlags) -> usize;

    /// Write all of `data` at `address`.
    fn write(&self, pid: Pid, address: u64, data: &[u8]) -> bool;
}

/// One device scatter session: prepare many ops, execute once, clear, reuse.
///
/// Dropping the handle closes the session.
pub trait ScatterHandle {
    /// Queue a read of `size` bytes. `false` rejects only this op.
    fn prepare_read(&mut self, address: u64, size: usize) -> bool;

    /// Queue a write of `data`. `false` rejects only this op.
    fn prepare_write(&mut self, address: u64, data: &[u8]) -> bool;

    /// Transfer every prepared read in one device call.
    fn execute_read(&mut self) -> bool;

    /// Transfer every prepared write in one device call.
    fn execute_write(&mut self) -> bool;

    /// Copy the result of a prepared read after [`execute_read`](Self::execute_read).
    /// Returns the number of bytes the device delivered for that op.
    fn read(&self, address: u64, buffer: &mut [u8]) -> usize;

    /// Drop all prepared ops and results.
    fn clear(&mut self, pid: Pid, flags: AccessFlags) -> bool;

    /// Whether the handle is still usable; `false` once the target went away.
    fn is_valid(&self) -> bool {
        true
    }
}

impl<E: RemoteEndpoint + ?Sized> RemoteEndpoint for &E {
    type Scatter = E::Scatter;

    fn scatter_init(&self, pid: Pid, flags: AccessFlags) -> Option<Self::Scatter> {
        (**self).scatter_init(pid, flags)
    }

    fn read(&self, pid: Pid, address: u64, buffer: &mut [u8], flags: AccessFlags) -> usize {
        (**self).read(pid, address, buffer, flags)
    }

    fn write(&self, pid: Pid, address: u64, data: &[u8]) -> bool {
        (**self).write(pid, address, data)
    }
}

impl<E: RemoteEndpoint + ?Sized> RemoteEndpoint for Arc<E> {
    type Scatter = E::Scatter;

    fn scatter_init(&self, pid: Pid, flags: AccessFlags) -> Option<Self::Scatter> {
        (**self).scatter_init(pid, flags)
    }

    fn read(&self, pid: Pid, address: u64, buffer: &mut [u8], flags: AccessFlags) -> usize {
        (**self).read(pid, address, buffer, flags)
    }

    fn write(&self, pid: Pid, address: u64, data: &[u8]) -> bool {
        (**self).write(pid, address, data)
    }
}

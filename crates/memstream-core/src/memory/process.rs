use tracing::{debug, trace};

use super::page::PageIndex;
use super::pattern::Pattern;
use super::range::{ReadOp, WriteOp};
use super::scatter::ScatterSession;
use super::staging::{StagingQueue, flush_reads, flush_writes};
use super::value::MemoryValue;
use crate::config::EngineConfig;
use crate::endpoint::{Pid, RemoteEndpoint};
use crate::error::{Error, Result};

/// Memory access to one target process through an explicit endpoint.
///
/// Owns the process' scatter session; every batched transfer reuses it.
pub struct Process<E: RemoteEndpoint> {
    endpoint: E,
    pid: Pid,
    config: EngineConfig,
    session: ScatterSession<E::Scatter>,
}

impl<E: RemoteEndpoint> Process<E> {
    /// Attach to `pid` with the default configuration.
    pub fn new(endpoint: E, pid: impl Into<Pid>) -> Result<Self> {
        Self::with_config(endpoint, pid, EngineConfig::default())
    }

    /// Attach to `pid`. Fails if the device refuses a scatter session.
    pub fn with_config(endpoint: E, pid: impl Into<Pid>, config: EngineConfig) -> Result<Self> {
        let pid = pid.into();
        let session = ScatterSession::initialize(&endpoint, pid, config.flags)?;
        debug!("Attached to pid {:?} (flags {:?})", pid, config.flags);

        Ok(Self {
            endpoint,
            pid,
            config,
            session,
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn session(&self) -> &ScatterSession<E::Scatter> {
        &self.session
    }

    /// Immediate, unbatched read of `buffer.len()` bytes.
    pub fn read(&self, address: u64, buffer: &mut [u8]) -> Result<()> {
        validate(address, buffer.len())?;

        let read = self
            .endpoint
            .read(self.pid, address, buffer, self.config.flags);
        if read == 0 {
            return Err(Error::MemoryReadFailed {
                address,
                size: buffer.len(),
            });
        }
        if read < buffer.len() {
            return Err(Error::PartialTransfer {
                address,
                expected: buffer.len(),
                actual: read,
            });
        }
        Ok(())
    }

    pub fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        self.read(address, &mut buffer)?;
        Ok(buffer)
    }

    pub fn read_value<T: MemoryValue>(&self, address: u64) -> Result<T> {
        let mut buffer = vec![0u8; T::SIZE];
        self.read(address, &mut buffer)?;
        Ok(T::from_bytes(&buffer))
    }

    /// Immediate, unbatched write of `data`.
    pub fn write(&self, address: u64, data: &[u8]) -> Result<()> {
        validate(address, data.len())?;

        if !self.endpoint.write(self.pid, address, data) {
            return Err(Error::MemoryWriteFailed {
                address,
                size: data.len(),
            });
        }
        Ok(())
    }

    pub fn write_value<T: MemoryValue>(&self, address: u64, value: T) -> Result<()> {
        let mut buffer = vec![0u8; T::SIZE];
        value.write_bytes(&mut buffer);
        self.write(address, &buffer)
    }

    /// Start a staging queue; ops are deferred until one of its execute calls.
    pub fn staging<'b>(&mut self) -> StagingQueue<'_, 'b, E> {
        StagingQueue::new(self)
    }

    /// Read a caller-built op list through the batched path.
    ///
    /// Returns the addresses that could not be read; their buffers are zero-filled.
    pub fn read_many(&mut self, ops: &mut [ReadOp<'_>]) -> Result<Vec<u64>> {
        flush_reads(self, ops)
    }

    /// Write a caller-built op list through the batched path.
    pub fn write_many(&mut self, ops: &mut [WriteOp<'_>]) -> Result<bool> {
        flush_writes(self, ops)
    }

    /// Scan `[start, stop)` for `pattern`, returning the address of the first match.
    pub fn find_pattern(&self, start: u64, stop: u64, pattern: &Pattern) -> Result<Option<u64>> {
        if stop <= start {
            return Err(Error::InvalidArgument(format!(
                "empty scan range {:#x}..{:#x}",
                start, stop
            )));
        }
        let size = usize::try_from(stop - start)
            .map_err(|_| Error::InvalidArgument("scan range too large".to_string()))?;

        let buffer = self.read_bytes(start, size)?;
        let found = pattern.find(&buffer).map(|pos| start + pos as u64);
        debug!(
            "Pattern '{}' in {:#x}..{:#x}: {:?}",
            pattern, start, stop, found
        );
        Ok(found)
    }

    /// Release the scatter session. Batched calls fail afterwards.
    pub fn close(&mut self) {
        self.session.close();
    }

    /// One batched attempt over every pending op: dedup into pages, scatter once,
    /// distribute back. Returns `false` if the device transfer failed.
    pub(crate) fn batch_read(&mut self, ops: &mut [ReadOp<'_>]) -> Result<bool> {
        self.session.ensure_ready(&self.endpoint)?;

        for op in ops.iter_mut().filter(|op| op.is_pending()) {
            op.transferred = 0;
        }
        let mut index =
            PageIndex::build(ops.iter().filter(|op| op.is_pending()).map(|op| op.range()));
        if index.is_empty() {
            return Ok(true);
        }

        let ok = index.scatter(&mut self.session);
        if ok {
            index.distribute(ops.iter_mut().filter(|op| op.is_valid() && op.transferred == 0));
        }
        Ok(ok)
    }

    /// One batched write attempt. Any rejected op fails the attempt.
    pub(crate) fn batch_write(&mut self, ops: &mut [WriteOp<'_>]) -> Result<bool> {
        self.session.ensure_ready(&self.endpoint)?;
        self.session.clear();

        let mut all_prepared = true;
        for op in ops.iter_mut().filter(|op| op.is_valid()) {
            op.transferred = 0;
            if self.session.prepare_write(op.address, op.buffer).is_err() {
                all_prepared = false;
            }
        }

        let ok = self.session.execute_write() && all_prepared;
        self.session.clear();
        if ok {
            for op in ops.iter_mut().filter(|op| op.is_valid()) {
                op.transferred = op.len() as u32;
            }
        }
        Ok(ok)
    }

    /// Single non-batched read used by the fallback path.
    pub(crate) fn single_read(&self, op: &mut ReadOp<'_>) -> bool {
        let read = self
            .endpoint
            .read(self.pid, op.address, op.buffer, self.config.flags);
        trace!("Single read at {:#x}: {} of {} bytes", op.address, read, op.len());
        op.transferred = read.min(op.len()) as u32;
        op.is_satisfied()
    }

    pub(crate) fn single_write(&self, op: &mut WriteOp<'_>) -> bool {
        let ok = self.endpoint.write(self.pid, op.address, op.buffer);
        trace!("Single write at {:#x}: {}", op.address, ok);
        if ok {
            op.transferred = op.len() as u32;
        }
        ok
    }
}

fn validate(address: u64, size: usize) -> Result<()> {
    if address == 0 {
        return Err(Error::InvalidArgument("null address".to_string()));
    }
    if size == 0 {
        return Err(Error::InvalidArgument("zero size".to_string()));
    }
    Ok(())
}

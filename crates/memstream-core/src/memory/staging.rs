//! Per-process staging queue.
//!
//! Reads and writes are staged without I/O and flushed together. A flush makes
//! up to `batch_attempts` whole-batch scatter attempts over whatever is still
//! unsatisfied, then degrades to one single transfer per remaining op. Only
//! addresses that fail all of that are reported, with their buffers zero-filled.

use tracing::{debug, trace, warn};

use super::process::Process;
use super::range::{ReadOp, WriteOp};
use super::value::MemoryValue;
use crate::endpoint::RemoteEndpoint;
use crate::error::Result;

pub struct StagingQueue<'p, 'b, E: RemoteEndpoint> {
    process: &'p mut Process<E>,
    reads: Vec<ReadOp<'b>>,
    writes: Vec<WriteOp<'b>>,
}

impl<'p, 'b, E: RemoteEndpoint> StagingQueue<'p, 'b, E> {
    pub(crate) fn new(process: &'p mut Process<E>) -> Self {
        Self {
            process,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub fn process(&self) -> &Process<E> {
        self.process
    }

    /// Defer a read into `buffer`.
    pub fn stage_read(&mut self, address: u64, buffer: &'b mut [u8]) {
        self.reads.push(ReadOp::new(address, buffer));
    }

    /// Defer a read into a typed value's storage.
    pub fn stage_read_value<T: MemoryValue>(&mut self, address: u64, value: &'b mut [u8]) {
        debug_assert!(value.len() >= T::SIZE);
        let len = T::SIZE.min(value.len());
        self.stage_read(address, &mut value[..len]);
    }

    /// Defer a write of `data`.
    pub fn stage_write(&mut self, address: u64, data: &'b [u8]) {
        self.writes.push(WriteOp::new(address, data));
    }

    pub fn staged_reads(&self) -> usize {
        self.reads.len()
    }

    pub fn staged_writes(&self) -> usize {
        self.writes.len()
    }

    /// Flush all staged reads. Returns the addresses that could not be read.
    ///
    /// Invalid ops (zero address or empty buffer) are dropped silently.
    pub fn execute_reads(&mut self) -> Result<Vec<u64>> {
        let mut ops = std::mem::take(&mut self.reads);
        flush_reads(self.process, &mut ops)
    }

    /// Flush all staged writes. Returns `true` if every write landed.
    pub fn execute_writes(&mut self) -> Result<bool> {
        let mut ops = std::mem::take(&mut self.writes);
        flush_writes(self.process, &mut ops)
    }
}

pub(crate) fn flush_reads<E: RemoteEndpoint>(
    process: &mut Process<E>,
    ops: &mut [ReadOp<'_>],
) -> Result<Vec<u64>> {
    let config = process.config().clone();
    let skipped = ops.iter().filter(|op| !op.is_valid()).count();
    if skipped > 0 {
        trace!("Dropping {} invalid staged reads", skipped);
    }
    for op in ops.iter_mut().filter(|op| op.is_valid()) {
        op.transferred = 0;
    }

    let attempts = config.batch_attempts.max(1);
    for attempt in 1..=attempts {
        let pending = ops.iter().filter(|op| op.is_pending()).count();
        if pending == 0 {
            break;
        }
        debug!(
            "Batched read attempt {}/{}: {} ops",
            attempt, attempts, pending
        );
        if !process.batch_read(ops)? {
            warn!("Batched read attempt {}/{} failed", attempt, attempts);
        }
    }

    let mut failed = Vec::new();
    for op in ops.iter_mut().filter(|op| op.is_pending()) {
        if config.single_fallback && process.single_read(op) {
            continue;
        }
        if config.zero_fill_failures {
            op.buffer.fill(0);
        }
        failed.push(op.address);
    }

    if !failed.is_empty() {
        warn!("{} staged reads failed", failed.len());
    }
    Ok(failed)
}

pub(crate) fn flush_writes<E: RemoteEndpoint>(
    process: &mut Process<E>,
    ops: &mut [WriteOp<'_>],
) -> Result<bool> {
    let config = process.config().clone();
    if !ops.iter().any(|op| op.is_valid()) {
        return Ok(true);
    }

    let attempts = config.batch_attempts.max(1);
    for attempt in 1..=attempts {
        if process.batch_write(ops)? {
            return Ok(true);
        }
        warn!("Batched write attempt {}/{} failed", attempt, attempts);
    }

    if !config.single_fallback {
        return Ok(false);
    }

    let mut all_written = true;
    for op in ops.iter_mut().filter(|op| op.is_valid()) {
        if !process.single_write(op) {
            warn!("Write at {:#x} failed", op.address);
            all_written = false;
        }
    }
    Ok(all_written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::endpoint::{MockEndpoint, MockEndpointBuilder};

    const PID: u32 = 99;

    fn setup() -> (MockEndpoint, Process<MockEndpoint>) {
        let bytes: Vec<u8> = (0..0x3000).map(|i| (i % 251) as u8 + 1).collect();
        let endpoint = MockEndpointBuilder::new()
            .pid(PID)
            .map(0x1000, &bytes)
            .build();
        let process = Process::new(endpoint.clone(), PID).unwrap();
        (endpoint, process)
    }

    #[test]
    fn test_single_batch_for_many_reads() {
        let (endpoint, mut process) = setup();
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        let mut c = [0u8; 8];

        let mut queue = process.staging();
        queue.stage_read(0x1000, &mut a);
        queue.stage_read(0x1002, &mut b);
        queue.stage_read(0x2FFC, &mut c);
        assert_eq!(queue.staged_reads(), 3);
        let failed = queue.execute_reads().unwrap();
        assert_eq!(queue.staged_reads(), 0);

        assert!(failed.is_empty());
        assert_eq!(endpoint.execute_read_calls(), 1);
        assert_eq!(endpoint.scatter_reads_of(0x1000), 1);
        assert_eq!(endpoint.scatter_reads_of(0x2000), 1);
        assert_eq!(endpoint.scatter_reads_of(0x3000), 1);
        assert_eq!(a.to_vec(), endpoint.peek(0x1000, 4));
        assert_eq!(b.to_vec(), endpoint.peek(0x1002, 4));
        assert_eq!(c.to_vec(), endpoint.peek(0x2FFC, 8));
    }

    #[test]
    fn test_invalid_ops_skipped_not_failed() {
        let (endpoint, mut process) = setup();
        let mut a = [0u8; 4];
        let mut b = [0u8; 0];

        let mut queue = process.staging();
        queue.stage_read(0, &mut a);
        queue.stage_read(0x1000, &mut b);
        let failed = queue.execute_reads().unwrap();

        assert!(failed.is_empty());
        assert_eq!(endpoint.execute_read_calls(), 0);
        assert_eq!(endpoint.single_reads(), 0);
    }

    #[test]
    fn test_transient_failure_absorbed_by_retry() {
        let (endpoint, mut process) = setup();
        endpoint.fail_next_executes(1);
        let mut a = [0u8; 4];

        let mut queue = process.staging();
        queue.stage_read(0x1800, &mut a);
        let failed = queue.execute_reads().unwrap();

        assert!(failed.is_empty());
        assert_eq!(endpoint.execute_read_calls(), 2);
        assert_eq!(endpoint.single_reads(), 0);
        assert_eq!(a.to_vec(), endpoint.peek(0x1800, 4));
    }

    #[test]
    fn test_single_read_fallback_after_two_failures() {
        let (endpoint, mut process) = setup();
        endpoint.fail_next_executes(2);
        let mut a = [0u8; 4];

        let mut queue = process.staging();
        queue.stage_read(0x1800, &mut a);
        let failed = queue.execute_reads().unwrap();

        assert!(failed.is_empty());
        assert_eq!(endpoint.execute_read_calls(), 2);
        assert_eq!(endpoint.single_reads(), 1);
        assert_eq!(a.to_vec(), endpoint.peek(0x1800, 4));
    }

    #[test]
    fn test_only_unsatisfied_ops_retried() {
        let (endpoint, mut process) = setup();
        // scatter cannot deliver this page, single reads can
        endpoint.block_scatter_page(0x3000);
        let mut a = [0u8; 4];
        let mut b = [0u8; 4];

        let mut queue = process.staging();
        queue.stage_read(0x1000, &mut a);
        queue.stage_read(0x3010, &mut b);
        let failed = queue.execute_reads().unwrap();

        assert!(failed.is_empty());
        assert_eq!(endpoint.execute_read_calls(), 2);
        // satisfied page not fetched again on the retry
        assert_eq!(endpoint.scatter_reads_of(0x1000), 1);
        assert_eq!(endpoint.scatter_reads_of(0x3000), 2);
        assert_eq!(endpoint.single_reads(), 1);
        assert_eq!(b.to_vec(), endpoint.peek(0x3010, 4));
    }

    #[test]
    fn test_unreadable_address_reported_and_zeroed() {
        let (endpoint, mut process) = setup();
        let mut a = [0u8; 4];
        let mut bad = [0xEEu8; 4];

        let mut queue = process.staging();
        queue.stage_read(0x1000, &mut a);
        queue.stage_read(0x80000, &mut bad);
        let failed = queue.execute_reads().unwrap();

        assert_eq!(failed, vec![0x80000]);
        assert_eq!(bad, [0u8; 4]);
        assert_eq!(a.to_vec(), endpoint.peek(0x1000, 4));
        assert_eq!(endpoint.single_reads(), 1);
    }

    #[test]
    fn test_fallback_disabled() {
        let endpoint = MockEndpointBuilder::new()
            .pid(PID)
            .map_zeroed(0x1000, 0x1000)
            .build();
        let config = EngineConfig::builder()
            .batch_attempts(1)
            .single_fallback(false)
            .build();
        let mut process = Process::with_config(endpoint.clone(), PID, config).unwrap();
        endpoint.fail_next_executes(1);

        let mut a = [0x11u8; 4];
        let mut queue = process.staging();
        queue.stage_read(0x1000, &mut a);
        let failed = queue.execute_reads().unwrap();

        assert_eq!(failed, vec![0x1000]);
        assert_eq!(a, [0u8; 4]);
        assert_eq!(endpoint.execute_read_calls(), 1);
        assert_eq!(endpoint.single_reads(), 0);
    }

    #[test]
    fn test_session_recreated_between_flushes() {
        let (endpoint, mut process) = setup();
        endpoint.invalidate_sessions();

        let mut a = [0u8; 4];
        let mut queue = process.staging();
        queue.stage_read(0x1000, &mut a);
        assert!(queue.execute_reads().unwrap().is_empty());
        assert_eq!(endpoint.sessions_created(), 2);
    }

    #[test]
    fn test_dead_device_is_hard_failure() {
        let (endpoint, mut process) = setup();
        endpoint.invalidate_sessions();
        endpoint.refuse_sessions(true);

        let mut a = [0u8; 4];
        let mut queue = process.staging();
        queue.stage_read(0x1000, &mut a);
        assert!(queue.execute_reads().is_err());
    }

    #[test]
    fn test_staged_writes() {
        let (endpoint, mut process) = setup();
        let a = [1u8, 2, 3, 4];
        let b = [9u8; 8];

        let mut queue = process.staging();
        queue.stage_write(0x1100, &a);
        queue.stage_write(0x2FFC, &b);
        queue.stage_write(0, &a);
        assert!(queue.execute_writes().unwrap());

        assert_eq!(endpoint.execute_write_calls(), 1);
        assert_eq!(endpoint.peek(0x1100, 4), a.to_vec());
        assert_eq!(endpoint.peek(0x2FFC, 8), b.to_vec());
    }

    #[test]
    fn test_staged_writes_fallback() {
        let (endpoint, mut process) = setup();
        endpoint.fail_next_executes(2);
        let a = [5u8; 4];

        let mut queue = process.staging();
        queue.stage_write(0x1100, &a);
        assert!(queue.execute_writes().unwrap());
        assert_eq!(endpoint.execute_write_calls(), 2);
        assert_eq!(endpoint.peek(0x1100, 4), a.to_vec());
    }

    #[test]
    fn test_staged_write_to_unmapped_fails() {
        let (_endpoint, mut process) = setup();
        let a = [5u8; 4];

        let mut queue = process.staging();
        queue.stage_write(0x90000, &a);
        assert!(!queue.execute_writes().unwrap());
    }

    #[test]
    fn test_empty_queue_is_noop() {
        let (endpoint, mut process) = setup();
        let mut queue = process.staging();
        assert!(queue.execute_reads().unwrap().is_empty());
        assert!(queue.execute_writes().unwrap());
        assert_eq!(endpoint.execute_read_calls(), 0);
        assert_eq!(endpoint.execute_write_calls(), 0);
    }

    #[test]
    fn test_stage_read_value() {
        let (endpoint, mut process) = setup();
        let mut raw = [0u8; 8];
        let mut queue = process.staging();
        queue.stage_read_value::<u32>(0x1004, &mut raw);
        queue.execute_reads().unwrap();

        assert_eq!(
            u32::from_bytes(&raw),
            u32::from_bytes(&endpoint.peek(0x1004, 4))
        );
        assert_eq!(raw[4..], [0u8; 4]);
    }
}

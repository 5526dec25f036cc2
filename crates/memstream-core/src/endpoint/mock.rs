//! In-memory endpoint with failure injection.
//!
//! Memory is a sparse map of 4 KiB pages; transfers stop at the first unmapped
//! page. Clones share state, so a test keeps one handle for inspection while
//! the engine owns another.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Pid, RemoteEndpoint, ScatterHandle};
use crate::config::AccessFlags;
use crate::memory::{PAGE_SIZE, page_head, page_offset};

const PAGE_LEN: usize = PAGE_SIZE as usize;

#[derive(Default)]
struct MockState {
    pids: HashSet<u32>,
    pages: HashMap<u64, Box<[u8; PAGE_LEN]>>,

    refuse_sessions: bool,
    failing_executes: usize,
    rejected_prepares: HashSet<u64>,
    blocked_pages: HashSet<u64>,
    generation: u64,

    scatter_reads: HashMap<u64, usize>,
    single_reads: usize,
    execute_read_calls: usize,
    execute_write_calls: usize,
    sessions_created: usize,
}

impl MockState {
    /// Copy from memory into `buffer`, stopping at the first unmapped page.
    fn read_into(&self, address: u64, buffer: &mut [u8]) -> usize {
        let mut done = 0;
        while done < buffer.len() {
            let Some(current) = address.checked_add(done as u64) else {
                break;
            };
            let Some(page) = self.pages.get(&page_head(current)) else {
                break;
            };
            let start = page_offset(current);
            let take = (PAGE_LEN - start).min(buffer.len() - done);
            buffer[done..done + take].copy_from_slice(&page[start..start + take]);
            done += take;
        }
        done
    }

    /// Write all of `data` or nothing.
    fn write_from(&mut self, address: u64, data: &[u8]) -> bool {
        let Some(last) = address.checked_add(data.len().saturating_sub(1) as u64) else {
            return false;
        };
        let mut page = page_head(address);
        while page <= page_head(last) {
            if !self.pages.contains_key(&page) {
                return false;
            }
            page += PAGE_SIZE;
        }
        self.store(address, data);
        true
    }

    /// Write `data`, mapping missing pages.
    fn store(&mut self, address: u64, data: &[u8]) {
        let mut done = 0;
        while done < data.len() {
            let current = address + done as u64;
            let start = page_offset(current);
            let take = (PAGE_LEN - start).min(data.len() - done);
            let page = self
                .pages
                .entry(page_head(current))
                .or_insert_with(|| Box::new([0u8; PAGE_LEN]));
            page[start..start + take].copy_from_slice(&data[done..done + take]);
            done += take;
        }
    }

    fn take_execute_failure(&mut self) -> bool {
        if self.failing_executes > 0 {
            self.failing_executes -= 1;
            true
        } else {
            false
        }
    }
}

/// Endpoint backed by process-local memory
#[derive(Clone, Default)]
pub struct MockEndpoint {
    state: Arc<Mutex<MockState>>,
}

impl MockEndpoint {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse every new scatter session
    pub fn refuse_sessions(&self, refuse: bool) {
        self.lock().refuse_sessions = refuse;
    }

    /// Fail the next `count` scatter executes (reads or writes)
    pub fn fail_next_executes(&self, count: usize) {
        self.lock().failing_executes = count;
    }

    /// Reject scatter prepares at exactly `address`
    pub fn reject_prepare(&self, address: u64) {
        self.lock().rejected_prepares.insert(address);
    }

    /// Scatter reads of this page deliver nothing; single reads still work.
    pub fn block_scatter_page(&self, page: u64) {
        self.lock().blocked_pages.insert(page_head(page));
    }

    /// Invalidate every open scatter handle
    pub fn invalidate_sessions(&self) {
        self.lock().generation += 1;
    }

    /// Bytes at `address`; unmapped bytes read as zero.
    pub fn peek(&self, address: u64, len: usize) -> Vec<u8> {
        let state = self.lock();
        let mut out = vec![0u8; len];
        for (i, byte) in out.iter_mut().enumerate() {
            let current = address + i as u64;
            if let Some(page) = state.pages.get(&page_head(current)) {
                *byte = page[page_offset(current)];
            }
        }
        out
    }

    /// Write directly into memory, mapping pages as needed.
    pub fn poke(&self, address: u64, data: &[u8]) {
        self.lock().store(address, data);
    }

    /// Number of scatter reads prepared for `page` that reached an execute
    pub fn scatter_reads_of(&self, page: u64) -> usize {
        self.lock()
            .scatter_reads
            .get(&page_head(page))
            .copied()
            .unwrap_or(0)
    }

    pub fn single_reads(&self) -> usize {
        self.lock().single_reads
    }

    pub fn execute_read_calls(&self) -> usize {
        self.lock().execute_read_calls
    }

    pub fn execute_write_calls(&self) -> usize {
        self.lock().execute_write_calls
    }

    pub fn sessions_created(&self) -> usize {
        self.lock().sessions_created
    }
}

impl RemoteEndpoint for MockEndpoint {
    type Scatter = MockScatter;

    fn scatter_init(&self, pid: Pid, _flags: AccessFlags) -> Option<MockScatter> {
        let mut state = self.lock();
        if state.refuse_sessions || !state.pids.contains(&pid.id()) {
            return None;
        }
        state.sessions_created += 1;
        Some(MockScatter {
            state: Arc::clone(&self.state),
            generation: state.generation,
            reads: Vec::new(),
            writes: Vec::new(),
            results: HashMap::new(),
        })
    }

    fn read(&self, pid: Pid, address: u64, buffer: &mut [u8], _flags: AccessFlags) -> usize {
        let mut state = self.lock();
        state.single_reads += 1;
        if !state.pids.contains(&pid.id()) {
            return 0;
        }
        state.read_into(address, buffer)
    }

    fn write(&self, pid: Pid, address: u64, data: &[u8]) -> bool {
        let mut state = self.lock();
        state.pids.contains(&pid.id()) && state.write_from(address, data)
    }
}

/// Scatter handle of [`MockEndpoint`]
pub struct MockScatter {
    state: Arc<Mutex<MockState>>,
    generation: u64,
    reads: Vec<(u64, usize)>,
    writes: Vec<(u64, Vec<u8>)>,
    results: HashMap<u64, Vec<u8>>,
}

impl MockScatter {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ScatterHandle for MockScatter {
    fn prepare_read(&mut self, address: u64, size: usize) -> bool {
        if self.lock().rejected_prepares.contains(&address) {
            return false;
        }
        self.reads.push((address, size));
        true
    }

    fn prepare_write(&mut self, address: u64, data: &[u8]) -> bool {
        if self.lock().rejected_prepares.contains(&address) {
            return false;
        }
        self.writes.push((address, data.to_vec()));
        true
    }

    fn execute_read(&mut self) -> bool {
        let state = Arc::clone(&self.state);
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        state.execute_read_calls += 1;
        if state.take_execute_failure() || state.generation != self.generation {
            return false;
        }

        for &(address, size) in &self.reads {
            *state.scatter_reads.entry(page_head(address)).or_default() += 1;
            let mut data = vec![0u8; size];
            let delivered = if state.blocked_pages.contains(&page_head(address)) {
                0
            } else {
                state.read_into(address, &mut data)
            };
            data.truncate(delivered);
            self.results.insert(address, data);
        }
        true
    }

    fn execute_write(&mut self) -> bool {
        let state = Arc::clone(&self.state);
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        state.execute_write_calls += 1;
        if state.take_execute_failure() || state.generation != self.generation {
            return false;
        }

        let mut all_written = true;
        for (address, data) in &self.writes {
            all_written &= state.write_from(*address, data);
        }
        all_written
    }

    fn read(&self, address: u64, buffer: &mut [u8]) -> usize {
        match self.results.get(&address) {
            Some(data) => {
                let len = data.len().min(buffer.len());
                buffer[..len].copy_from_slice(&data[..len]);
                len
            }
            None => 0,
        }
    }

    fn clear(&mut self, _pid: Pid, _flags: AccessFlags) -> bool {
        self.reads.clear();
        self.writes.clear();
        self.results.clear();
        true
    }

    fn is_valid(&self) -> bool {
        self.lock().generation == self.generation
    }
}

/// Builder for [`MockEndpoint`]
#[derive(Default)]
pub struct MockEndpointBuilder {
    state: MockState,
}

impl MockEndpointBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live process id
    pub fn pid(mut self, pid: u32) -> Self {
        self.state.pids.insert(Pid::new(pid).id());
        self
    }

    /// Map `data` at `address`
    pub fn map(mut self, address: u64, data: &[u8]) -> Self {
        self.state.store(address, data);
        self
    }

    /// Map `len` zero bytes at `address`
    pub fn map_zeroed(self, address: u64, len: usize) -> Self {
        self.map(address, &vec![0u8; len])
    }

    pub fn build(self) -> MockEndpoint {
        MockEndpoint {
            state: Arc::new(Mutex::new(self.state)),
        }
    }
}

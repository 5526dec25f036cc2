//! Cached offset table over one remote structure.
//!
//! An [`Object`] maps offsets (relative to a mutable base address) to owned
//! buffers, each with its own [`CachePolicy`]. A refresh stages every field
//! that is due and flushes them in one batched read, so many logically
//! independent fields cost a single transfer.
//!
//! ## Example
//!
//! ```ignore
//! let mut player = Object::with_base(player_address);
//! player.push(0x10, 4)?; // health, read every refresh
//! player.push_cached(0x80, 32, CachePolicy::ResolveOnce { allow_zero: false })?; // name
//! player.push_cached(0x20, 12, CachePolicy::ttl_ms(250))?; // position
//!
//! player.refresh(&mut process)?;
//! let health: u32 = player.get(0x10)?;
//! ```

mod arena;
mod policy;

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::endpoint::RemoteEndpoint;
use crate::error::{Error, Result};
use crate::memory::{MemoryValue, Process, StagingQueue};

use arena::{Arena, Slot};
use policy::FieldCache;
pub use policy::{CachePolicy, ReadState};

#[derive(Debug)]
struct Field {
    slot: Slot,
    cache: FieldCache,
}

/// Offset table bound to a base address. `base == 0` is the null object.
#[derive(Debug, Default)]
pub struct Object {
    base: u64,
    fields: BTreeMap<u32, Field>,
    arena: Arena,
}

impl Object {
    /// Create a null object
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base(base: u64) -> Self {
        Self {
            base,
            ..Self::default()
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Rebind to a new base. Cached state of every field is discarded when the
    /// base actually changes.
    pub fn set_base(&mut self, base: u64) {
        if base == self.base {
            return;
        }
        trace!("Object base {:#x} -> {:#x}", self.base, base);
        self.base = base;
        for field in self.fields.values_mut() {
            field.cache.reset();
        }
    }

    /// Null objects perform no I/O; check before trusting [`get`](Self::get).
    pub fn is_null(&self) -> bool {
        self.base == 0
    }

    /// Add a field read on every refresh.
    pub fn push(&mut self, offset: u32, size: usize) -> Result<()> {
        self.push_cached(offset, size, CachePolicy::AlwaysFresh)
    }

    /// Add a field with its own cache policy. Pushing an existing offset
    /// replaces it with a fresh zeroed buffer.
    pub fn push_cached(&mut self, offset: u32, size: usize, policy: CachePolicy) -> Result<()> {
        if size == 0 {
            return Err(Error::InvalidArgument(format!(
                "zero-sized field at offset {:#x}",
                offset
            )));
        }
        if u32::try_from(size).is_err() {
            return Err(Error::InvalidArgument(format!(
                "field at offset {:#x} too large ({} bytes)",
                offset, size
            )));
        }

        let slot = self.arena.alloc(size);
        let field = Field {
            slot,
            cache: FieldCache::new(policy),
        };
        if let Some(old) = self.fields.insert(offset, field) {
            self.release(old.slot);
        }
        Ok(())
    }

    /// Remove a field, returning whether it existed.
    pub fn remove(&mut self, offset: u32) -> bool {
        match self.fields.remove(&offset) {
            Some(field) => {
                self.release(field.slot);
                true
            }
            None => false,
        }
    }

    fn release(&mut self, slot: Slot) {
        self.arena.release(slot);
        if self.arena.needs_compaction() {
            self.arena
                .compact(self.fields.values_mut().map(|field| &mut field.slot));
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, offset: u32) -> bool {
        self.fields.contains_key(&offset)
    }

    /// Size of the field at `offset`
    pub fn size(&self, offset: u32) -> Option<usize> {
        self.fields.get(&offset).map(|field| field.slot.len)
    }

    pub fn policy(&self, offset: u32) -> Option<CachePolicy> {
        self.fields.get(&offset).map(|field| field.cache.policy)
    }

    pub fn read_state(&self, offset: u32) -> Option<ReadState> {
        self.fields.get(&offset).map(|field| field.cache.state)
    }

    /// Raw buffer of the field at `offset`
    pub fn get_bytes(&self, offset: u32) -> Option<&[u8]> {
        self.fields
            .get(&offset)
            .map(|field| self.arena.get(field.slot))
    }

    /// Decode the field at `offset`. Its size must equal `T::SIZE`.
    pub fn get<T: MemoryValue>(&self, offset: u32) -> Result<T> {
        let field = self
            .fields
            .get(&offset)
            .ok_or(Error::UnknownOffset(offset))?;
        if field.slot.len != T::SIZE {
            return Err(Error::SizeMismatch {
                offset,
                stored: field.slot.len,
                requested: T::SIZE,
            });
        }
        Ok(T::from_bytes(self.arena.get(field.slot)))
    }

    /// Overwrite the local buffer of the field at `offset`.
    pub fn set<T: MemoryValue>(&mut self, offset: u32, value: T) -> Result<()> {
        let field = self
            .fields
            .get(&offset)
            .ok_or(Error::UnknownOffset(offset))?;
        if field.slot.len != T::SIZE {
            return Err(Error::SizeMismatch {
                offset,
                stored: field.slot.len,
                requested: T::SIZE,
            });
        }
        let slot = field.slot;
        value.write_bytes(self.arena.get_mut(slot));
        Ok(())
    }

    /// Fields in offset order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.fields
            .iter()
            .map(|(&offset, field)| (offset, self.arena.get(field.slot)))
    }

    /// Stage every due field into `queue` without flushing it.
    ///
    /// Lets several objects share one flush; call [`settle`](Self::settle)
    /// with the flush result afterwards. Returns the number of staged reads.
    pub fn stage<'b, E: RemoteEndpoint>(
        &'b mut self,
        queue: &mut StagingQueue<'_, 'b, E>,
        now: Instant,
    ) -> usize {
        let Object {
            base,
            fields,
            arena,
        } = self;
        if *base == 0 {
            return 0;
        }

        let mut due = Vec::new();
        for (&offset, field) in fields.iter_mut() {
            field.cache.pending = None;
            if !field.cache.is_due(now) {
                continue;
            }
            let Some(address) = base.checked_add(u64::from(offset)) else {
                warn!("Offset {:#x} overflows base {:#x}", offset, base);
                continue;
            };
            field.cache.begin(address, now);
            due.push((field.slot, address));
        }
        due.sort_by_key(|(slot, _)| slot.start);

        let slots: Vec<Slot> = due.iter().map(|(slot, _)| *slot).collect();
        for (buffer, (_, address)) in arena.split_mut(&slots).into_iter().zip(&due) {
            queue.stage_read(*address, buffer);
        }
        trace!("Staged {} of {} fields at {:#x}", due.len(), fields.len(), base);
        due.len()
    }

    /// Complete policy bookkeeping for the last [`stage`](Self::stage) given
    /// the failed addresses of its flush.
    pub fn settle(&mut self, failed: &[u64]) {
        let failed: HashSet<u64> = failed.iter().copied().collect();
        for field in self.fields.values_mut() {
            let Some(address) = field.cache.pending else {
                continue;
            };
            let succeeded = !failed.contains(&address);
            field.cache.settle(succeeded, self.arena.get(field.slot));
        }
    }

    /// Read every due field in a single batched flush.
    ///
    /// Returns the addresses that failed (their buffers are zero-filled). A null
    /// object returns immediately without staging anything.
    pub fn refresh<E: RemoteEndpoint>(&mut self, process: &mut Process<E>) -> Result<Vec<u64>> {
        self.refresh_at(process, Instant::now())
    }

    /// [`refresh`](Self::refresh) with an explicit clock reading.
    pub fn refresh_at<E: RemoteEndpoint>(
        &mut self,
        process: &mut Process<E>,
        now: Instant,
    ) -> Result<Vec<u64>> {
        if self.is_null() {
            return Ok(Vec::new());
        }

        let failed = {
            let mut queue = process.staging();
            if self.stage(&mut queue, now) == 0 {
                return Ok(Vec::new());
            }
            queue.execute_reads()?
        };
        if !failed.is_empty() {
            debug!(
                "Object at {:#x}: {} fields failed to refresh",
                self.base,
                failed.len()
            );
        }
        self.settle(&failed);
        Ok(failed)
    }

    /// Write every field's local buffer back in one batched flush.
    pub fn write<E: RemoteEndpoint>(&self, process: &mut Process<E>) -> Result<bool> {
        if self.is_null() || self.fields.is_empty() {
            return Ok(true);
        }

        let mut queue = process.staging();
        for (&offset, field) in &self.fields {
            let Some(address) = self.base.checked_add(u64::from(offset)) else {
                continue;
            };
            queue.stage_write(address, self.arena.get(field.slot));
        }
        queue.execute_writes()
    }

    /// Serializable view of the current field contents
    pub fn snapshot(&self) -> ObjectSnapshot {
        ObjectSnapshot {
            base: format!("0x{:X}", self.base),
            fields: self
                .fields
                .iter()
                .map(|(&offset, field)| FieldSnapshot {
                    offset: format!("0x{:X}", offset),
                    policy: field.cache.policy.to_string(),
                    state: field.cache.state.into(),
                    bytes: hex(self.arena.get(field.slot)),
                })
                .collect(),
        }
    }
}

/// Snapshot of an object for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct ObjectSnapshot {
    pub base: String,
    pub fields: Vec<FieldSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FieldSnapshot {
    pub offset: String,
    pub policy: String,
    pub state: &'static str,
    pub bytes: String,
}

impl ObjectSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// A span of remote virtual memory.
///
/// `address == 0` or `length == 0` marks a range that is skipped, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRange {
    pub address: u64,
    pub length: u32,
}

impl MemoryRange {
    pub fn new(address: u64, length: u32) -> Self {
        Self { address, length }
    }

    pub fn is_valid(&self) -> bool {
        self.address != 0 && self.length != 0
    }

    /// Address of the last byte in the range (inclusive).
    pub fn last_address(&self) -> u64 {
        self.address
            .saturating_add(u64::from(self.length).saturating_sub(1))
    }
}

/// One caller-owned transfer: a remote address and the local buffer it maps to.
///
/// Valid for the duration of one execute call; `transferred` records how many
/// bytes that call delivered.
#[derive(Debug)]
pub struct ScatterOp<B> {
    pub address: u64,
    pub buffer: B,
    pub transferred: u32,
}

/// Read op filling a borrowed output buffer
pub type ReadOp<'b> = ScatterOp<&'b mut [u8]>;

/// Write op sourcing a borrowed input buffer
pub type WriteOp<'b> = ScatterOp<&'b [u8]>;

impl<B: AsRef<[u8]>> ScatterOp<B> {
    pub fn new(address: u64, buffer: B) -> Self {
        Self {
            address,
            buffer,
            transferred: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.as_ref().is_empty()
    }

    /// Lengths beyond `u32::MAX` are not representable and count as invalid.
    pub fn range(&self) -> MemoryRange {
        let length = u32::try_from(self.len()).unwrap_or(0);
        MemoryRange::new(self.address, length)
    }

    pub fn is_valid(&self) -> bool {
        self.range().is_valid()
    }

    /// Every byte of the op was transferred by the last execute.
    pub fn is_satisfied(&self) -> bool {
        self.transferred as usize == self.len()
    }

    /// Valid and not yet satisfied.
    pub(crate) fn is_pending(&self) -> bool {
        self.is_valid() && !self.is_satisfied()
    }
}

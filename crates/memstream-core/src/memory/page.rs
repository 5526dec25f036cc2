//! Page-level deduplication for scattered reads.
//!
//! Reads are coalesced into the set of distinct 4 KiB pages they touch, the
//! pages are fetched in a single scatter transfer, and each request is then
//! reassembled from the fetched pages.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use super::range::{MemoryRange, ReadOp};
use super::scatter::ScatterSession;
use crate::endpoint::ScatterHandle;

/// Device transfer granularity in bytes
pub const PAGE_SIZE: u64 = 0x1000;

const PAGE_LEN: usize = PAGE_SIZE as usize;

/// First address of the page containing `address`
pub fn page_head(address: u64) -> u64 {
    address & !(PAGE_SIZE - 1)
}

/// Offset of `address` within its page
pub fn page_offset(address: u64) -> usize {
    (address & (PAGE_SIZE - 1)) as usize
}

/// Page addresses covering `range` (inclusive of first and last page)
pub fn pages_of(range: MemoryRange) -> impl Iterator<Item = u64> {
    let first = page_head(range.address);
    let last = page_head(range.last_address());
    (first..=last).step_by(PAGE_LEN)
}

/// One fetched page. `data` holds meaningful bytes only while `present`.
#[derive(Debug)]
pub struct Page {
    pub address: u64,
    pub data: Box<[u8; PAGE_LEN]>,
    pub present: bool,
}

impl Page {
    fn new(address: u64) -> Self {
        Self {
            address,
            data: Box::new([0u8; PAGE_LEN]),
            present: false,
        }
    }
}

/// Unique pages needed to satisfy a set of reads, built fresh per batch.
#[derive(Debug, Default)]
pub struct PageIndex {
    pages: BTreeMap<u64, Page>,
}

impl PageIndex {
    /// Collect every page touched by the valid ranges. Invalid ranges are skipped.
    pub fn build<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = MemoryRange>,
    {
        let mut pages = BTreeMap::new();
        for range in ranges.into_iter().filter(MemoryRange::is_valid) {
            for page in pages_of(range) {
                pages.entry(page).or_insert_with(|| Page::new(page));
            }
        }
        Self { pages }
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn contains(&self, page: u64) -> bool {
        self.pages.contains_key(&page)
    }

    /// Page addresses in ascending order
    pub fn addresses(&self) -> impl Iterator<Item = u64> + '_ {
        self.pages.keys().copied()
    }

    pub fn get(&self, page: u64) -> Option<&Page> {
        self.pages.get(&page)
    }

    /// Fetch every indexed page in one scatter transfer.
    ///
    /// Returns `false` only if the device call itself failed. Pages the device
    /// rejected or delivered short stay absent, so [`distribute`](Self::distribute)
    /// zero-fills their bytes.
    pub fn scatter<H: ScatterHandle>(&mut self, session: &mut ScatterSession<H>) -> bool {
        for page in self.pages.values_mut() {
            page.present = false;
        }
        if self.pages.is_empty() {
            return true;
        }

        session.clear();
        let mut prepared = 0usize;
        for &address in self.pages.keys() {
            if session.prepare_read(address, PAGE_LEN).is_ok() {
                prepared += 1;
            }
        }
        debug!(
            "Scatter read of {} pages ({} prepared)",
            self.pages.len(),
            prepared
        );

        let ok = session.execute_read();
        if ok {
            for page in self.pages.values_mut() {
                let delivered = session.read_prepared(page.address, &mut page.data[..]);
                page.present = delivered == PAGE_LEN;
                if !page.present {
                    trace!(
                        "Page {:#x} delivered {} of {} bytes",
                        page.address,
                        delivered,
                        PAGE_LEN
                    );
                }
            }
        }
        session.clear();
        ok
    }

    /// Copy page bytes into each op's buffer and record how many were transferred.
    ///
    /// Bytes whose page is absent are zero-filled and not counted.
    pub fn distribute<'a, 'b: 'a, I>(&self, ops: I)
    where
        I: IntoIterator<Item = &'a mut ReadOp<'b>>,
    {
        for op in ops {
            if !op.is_valid() {
                continue;
            }
            let range = op.range();
            let len = op.len();
            let mut copied = 0usize;
            let mut transferred = 0usize;

            for page in pages_of(range) {
                let start = if copied == 0 {
                    page_offset(range.address)
                } else {
                    0
                };
                let take = (PAGE_LEN - start).min(len - copied);
                let out = &mut op.buffer[copied..copied + take];

                match self.pages.get(&page).filter(|p| p.present) {
                    Some(page) => {
                        out.copy_from_slice(&page.data[start..start + take]);
                        transferred += take;
                    }
                    None => out.fill(0),
                }
                copied += take;
            }

            op.transferred = transferred as u32;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessFlags;
    use crate::endpoint::{MockEndpoint, MockEndpointBuilder, Pid};

    const PID: u32 = 77;

    fn pattern(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
    }

    fn session(endpoint: &MockEndpoint) -> ScatterSession<crate::endpoint::MockScatter> {
        ScatterSession::initialize(endpoint, Pid::new(PID), AccessFlags::NONE).unwrap()
    }

    #[test]
    fn test_page_helpers() {
        assert_eq!(page_head(0x1FFF), 0x1000);
        assert_eq!(page_head(0x2000), 0x2000);
        assert_eq!(page_offset(0x1FF8), 0xFF8);
        let pages: Vec<u64> = pages_of(MemoryRange::new(0x1FF8, 16)).collect();
        assert_eq!(pages, vec![0x1000, 0x2000]);
    }

    #[test]
    fn test_build_empty() {
        let index = PageIndex::build(Vec::new());
        assert!(index.is_empty());
    }

    #[test]
    fn test_build_skips_invalid_ranges() {
        let index = PageIndex::build([MemoryRange::new(0, 4), MemoryRange::new(0x3000, 0)]);
        assert!(index.is_empty());
    }

    #[test]
    fn test_overlapping_reads_share_one_page() {
        let index = PageIndex::build([MemoryRange::new(0x1000, 4), MemoryRange::new(0x1002, 4)]);
        assert_eq!(index.len(), 1);
        assert!(index.contains(0x1000));
    }

    #[test]
    fn test_page_count_matches_distinct_pages() {
        let ranges = [
            MemoryRange::new(0x1000, 0x10),
            MemoryRange::new(0x1FF0, 0x20),   // 0x1000, 0x2000
            MemoryRange::new(0x5000, 0x2001), // 0x5000, 0x6000, 0x7000
            MemoryRange::new(0x6100, 4),      // already covered
        ];
        let index = PageIndex::build(ranges);
        let pages: Vec<u64> = index.addresses().collect();
        assert_eq!(pages, vec![0x1000, 0x2000, 0x5000, 0x6000, 0x7000]);
    }

    #[test]
    fn test_build_order_independent() {
        let mut ranges = vec![
            MemoryRange::new(0x8FFC, 8),
            MemoryRange::new(0x1000, 4),
            MemoryRange::new(0x4321, 0x3000),
            MemoryRange::new(0x1002, 4),
        ];
        let forward: Vec<u64> = PageIndex::build(ranges.clone()).addresses().collect();
        ranges.reverse();
        let reversed: Vec<u64> = PageIndex::build(ranges).addresses().collect();
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_overlap_distribute() {
        let bytes = pattern(0x1000, 3);
        let endpoint = MockEndpointBuilder::new().pid(PID).map(0x1000, &bytes).build();
        let mut session = session(&endpoint);

        let mut a = [0u8; 4];
        let mut b = [0u8; 4];
        let mut ops = [ReadOp::new(0x1000, &mut a), ReadOp::new(0x1002, &mut b)];

        let mut index = PageIndex::build(ops.iter().map(|op| op.range()));
        assert_eq!(index.len(), 1);
        assert!(index.scatter(&mut session));
        index.distribute(ops.iter_mut());

        assert!(ops.iter().all(|op| op.is_satisfied()));
        assert_eq!(a, bytes[0..4]);
        assert_eq!(b, bytes[2..6]);
        assert_eq!(a[2..4], b[0..2]);
        assert_eq!(endpoint.scatter_reads_of(0x1000), 1);
    }

    #[test]
    fn test_cross_page_read_matches_reference() {
        let bytes = pattern(0x2000, 11);
        let endpoint = MockEndpointBuilder::new().pid(PID).map(0x4000, &bytes).build();
        let mut session = session(&endpoint);

        let mut out = [0u8; 16];
        let mut ops = [ReadOp::new(0x4FF8, &mut out)];
        let mut index = PageIndex::build(ops.iter().map(|op| op.range()));
        assert_eq!(index.len(), 2);
        assert!(index.scatter(&mut session));
        index.distribute(ops.iter_mut());
        assert_eq!(ops[0].transferred, 16);

        assert_eq!(out.to_vec(), endpoint.peek(0x4FF8, 16));
        assert_eq!(out[..8], bytes[0xFF8..0x1000]);
        assert_eq!(out[8..], bytes[0x1000..0x1008]);
    }

    #[test]
    fn test_large_read_spans_many_pages() {
        let bytes = pattern(0x4000, 5);
        let endpoint = MockEndpointBuilder::new().pid(PID).map(0x10000, &bytes).build();
        let mut session = session(&endpoint);

        let mut out = vec![0u8; 0x2800];
        let mut ops = [ReadOp::new(0x10800, &mut out)];
        let mut index = PageIndex::build(ops.iter().map(|op| op.range()));
        assert_eq!(index.len(), 3);
        assert!(index.scatter(&mut session));
        index.distribute(ops.iter_mut());

        assert!(ops[0].is_satisfied());
        assert_eq!(out[..], bytes[0x800..0x3000]);
    }

    #[test]
    fn test_missing_page_zero_fills_its_bytes() {
        let bytes = pattern(0x1000, 9);
        // only the first page is mapped
        let endpoint = MockEndpointBuilder::new().pid(PID).map(0x1000, &bytes).build();
        let mut session = session(&endpoint);

        let mut out = [0xAAu8; 16];
        let mut ops = [ReadOp::new(0x1FF8, &mut out)];
        let mut index = PageIndex::build(ops.iter().map(|op| op.range()));
        assert!(index.scatter(&mut session));
        index.distribute(ops.iter_mut());

        assert_eq!(ops[0].transferred, 8);
        assert!(!ops[0].is_satisfied());
        assert_eq!(out[..8], bytes[0xFF8..]);
        assert_eq!(out[8..], [0u8; 8]);
    }

    #[test]
    fn test_failed_execute_leaves_pages_absent() {
        let endpoint = MockEndpointBuilder::new()
            .pid(PID)
            .map(0x1000, &pattern(0x1000, 1))
            .build();
        let mut session = session(&endpoint);
        endpoint.fail_next_executes(1);

        let mut out = [0xFFu8; 4];
        let mut ops = [ReadOp::new(0x1000, &mut out)];
        let mut index = PageIndex::build(ops.iter().map(|op| op.range()));
        assert!(!index.scatter(&mut session));
        assert!(index.get(0x1000).is_some_and(|p| !p.present));

        index.distribute(ops.iter_mut());
        assert_eq!(ops[0].transferred, 0);
    }
}

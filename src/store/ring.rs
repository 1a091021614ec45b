//! Single-stream ring mechanics: header layout, defrag-on-write, wrap-free
//! reads (spec.md §4.A).
//!
//! The header `{read_offset: u16, filled: u16}` is the only part of a
//! stream's region that is interpreted structurally; the remainder is an
//! opaque byte buffer. Both fields live inside the reset-surviving region
//! itself (not in ordinary process memory) so that a fresh `RingStream`
//! constructed over the same bytes after a warm reset picks up exactly
//! where the previous one left off, mirroring the original's `data_store_t`
//! sitting directly in `RTC_NOINIT_ATTR` memory.

use crate::config::OverflowPolicy;
use crate::store::record::NonCriticalRecord;

const HEADER_LEN: usize = 4;

/// A stream's header-plus-buffer region, addressed through a raw pointer
/// because it is carved out of a larger [`crate::store::platform::ResetRegion`]
/// borrow that cannot itself be split into two live `&mut [u8]`s.
///
/// # Safety invariant
/// `ptr..ptr+len` must be a single allocation, valid for reads and writes,
/// not aliased by any other live reference for the lifetime of this value.
/// [`split`] establishes this by construction (disjoint sub-slices of one
/// borrow) and the pointer is never re-derived afterwards.
pub(crate) struct StreamRegion {
    ptr: *mut u8,
    len: usize,
}

// SAFETY: `StreamRegion` is only ever reached through a `parking_lot::Mutex`,
// which provides the exclusion a raw pointer needs to cross thread
// boundaries safely; nothing here relies on thread-local state.
unsafe impl Send for StreamRegion {}

impl StreamRegion {
    fn header(&self) -> (u16, u16) {
        // SAFETY: `ptr` is valid for `len >= HEADER_LEN` bytes per the type
        // invariant; header fields are stored little-endian, unaligned.
        unsafe {
            let read_offset = std::ptr::read_unaligned(self.ptr as *const u16).to_le();
            let filled = std::ptr::read_unaligned(self.ptr.add(2) as *const u16).to_le();
            (read_offset, filled)
        }
    }

    fn set_header(&mut self, read_offset: u16, filled: u16) {
        // SAFETY: see `header`.
        unsafe {
            std::ptr::write_unaligned(self.ptr as *mut u16, read_offset.to_le());
            std::ptr::write_unaligned(self.ptr.add(2) as *mut u16, filled.to_le());
        }
    }

    fn buf(&self) -> &[u8] {
        // SAFETY: `ptr + HEADER_LEN .. ptr + len` is within the single
        // allocation established by `split`.
        unsafe { std::slice::from_raw_parts(self.ptr.add(HEADER_LEN), self.len - HEADER_LEN) }
    }

    fn buf_mut(&mut self) -> &mut [u8] {
        // SAFETY: see `buf`; exclusive access is guaranteed by the
        // enclosing `Mutex`.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.add(HEADER_LEN), self.len - HEADER_LEN) }
    }

    fn capacity(&self) -> usize {
        self.len - HEADER_LEN
    }

    fn zero(&mut self) {
        self.buf_mut().fill(0);
        self.set_header(0, 0);
    }
}

/// Split one borrow of a reset-surviving region into two disjoint,
/// independently-lockable `StreamRegion`s.
///
/// # Safety
/// The caller must not read or write `region` through any other reference
/// for as long as the returned `StreamRegion`s are alive.
pub(crate) unsafe fn split(region: &mut [u8], critical_total: usize) -> (StreamRegion, StreamRegion) {
    assert!(region.len() >= critical_total);
    let ptr = region.as_mut_ptr();
    let critical = StreamRegion {
        ptr,
        len: critical_total,
    };
    // SAFETY: `ptr.add(critical_total)` stays within `region` by the assert
    // above; the two regions do not overlap.
    let non_critical = StreamRegion {
        ptr: unsafe { ptr.add(critical_total) },
        len: region.len() - critical_total,
    };
    (critical, non_critical)
}

/// One stream's ring mechanics, minus locking (the caller wraps this in a
/// `parking_lot::Mutex`).
pub(crate) struct RingStream {
    region: StreamRegion,
    read_offset: usize,
    filled: usize,
}

impl RingStream {
    pub(crate) fn capacity(&self) -> usize {
        self.region.capacity()
    }

    pub(crate) fn filled(&self) -> usize {
        self.filled
    }

    pub(crate) fn free(&self) -> usize {
        self.capacity() - self.filled
    }

    /// Bind to `region`, zeroing it if `cold_boot`, else validating the
    /// integrity predicates (spec.md §3/§4.A). Returns `false` when a warm
    /// boot's predicates did not hold and the stream was discarded.
    pub(crate) fn bind(mut region: StreamRegion, cold_boot: bool) -> (Self, bool) {
        if cold_boot {
            region.zero();
            return (
                Self {
                    region,
                    read_offset: 0,
                    filled: 0,
                },
                true,
            );
        }
        let (read_offset, filled) = region.header();
        let (read_offset, filled) = (read_offset as usize, filled as usize);
        let capacity = region.capacity();
        let ok = filled <= capacity && read_offset <= capacity && read_offset + filled <= capacity;
        if ok {
            (
                Self {
                    region,
                    read_offset,
                    filled,
                },
                true,
            )
        } else {
            region.zero();
            (
                Self {
                    region,
                    read_offset: 0,
                    filled: 0,
                },
                false,
            )
        }
    }

    fn persist_header(&mut self) {
        self.region.set_header(self.read_offset as u16, self.filled as u16);
    }

    fn free_at_end(&self) -> usize {
        self.capacity() - (self.read_offset + self.filled)
    }

    /// Move the live span to offset 0 (spec.md §4.A, "Why defrag instead of
    /// true wrap").
    fn defrag(&mut self) {
        if self.read_offset == 0 || self.filled == 0 {
            return;
        }
        let (start, filled) = (self.read_offset, self.filled);
        self.region.buf_mut().copy_within(start..start + filled, 0);
        self.read_offset = 0;
        self.persist_header();
    }

    /// Append `bytes`, defragmenting first if the tail does not have room
    /// but the total free space does. Returns `false` if there is not
    /// enough total free space (caller must emit `WriteFailed`).
    pub(crate) fn append(&mut self, bytes: &[u8]) -> bool {
        let len = bytes.len();
        if len > self.free() {
            return false;
        }
        if len > self.free_at_end() {
            self.defrag();
        }
        let at = self.read_offset + self.filled;
        self.region.buf_mut()[at..at + len].copy_from_slice(bytes);
        self.filled += len;
        self.persist_header();
        true
    }

    /// Drop the oldest record (parsed via `peek_len`) to make room, for the
    /// non-critical stream's overwrite-oldest policy.
    fn drop_oldest_record(&mut self) -> bool {
        if self.filled == 0 {
            return false;
        }
        let live = &self.region.buf()[self.read_offset..self.read_offset + self.filled];
        let Some(record_len) = NonCriticalRecord::peek_len(live) else {
            // Corrupt header: cannot safely skip a partial record, drop everything.
            self.consume(self.filled);
            return true;
        };
        let record_len = record_len.min(self.filled);
        self.consume(record_len);
        true
    }

    /// Append a non-critical record honoring `policy` on overflow.
    pub(crate) fn append_with_policy(&mut self, bytes: &[u8], policy: OverflowPolicy) -> bool {
        if bytes.len() > self.capacity() {
            return false;
        }
        if policy == OverflowPolicy::OverwriteOldest {
            while bytes.len() > self.free() {
                if !self.drop_oldest_record() {
                    break;
                }
            }
        }
        self.append(bytes)
    }

    /// Contiguous live span. Defrag runs on every write that would wrap, so
    /// this is never split (spec.md §4.A).
    pub(crate) fn live_slice(&self) -> &[u8] {
        &self.region.buf()[self.read_offset..self.read_offset + self.filled]
    }

    /// Advance past `consumed` bytes at the head.
    pub(crate) fn consume(&mut self, consumed: usize) {
        let consumed = consumed.min(self.filled);
        self.read_offset += consumed;
        self.filled -= consumed;
        if self.filled == 0 {
            self.read_offset = 0;
        }
        self.persist_header();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn fresh(capacity: usize) -> RingStream {
        // Leaked so the raw pointers `split` hands out outlive this helper;
        // acceptable for a test-only fixture.
        let backing: &'static mut [u8] = vec![0u8; HEADER_LEN + capacity].leak();
        // SAFETY: `backing` is not read or written through any other
        // reference for the remainder of the test.
        let (region, _unused) = unsafe { split(backing, HEADER_LEN + capacity) };
        let (stream, ok) = RingStream::bind(region, true);
        assert!(ok);
        stream
    }

    #[test]
    fn b3_defrag_moves_live_span_to_zero() {
        let mut s = fresh(100);
        assert!(s.append(&[1u8; 80]));
        s.consume(60);
        assert!(s.append(&[2u8; 50]));
        assert_eq!(s.filled(), 70);
        assert_eq!(s.free(), 30);
    }

    #[test]
    fn b4_overflow_critical_rejected() {
        let mut s = fresh(100);
        assert!(s.append(&[1u8; 100]));
        assert!(!s.append(&[2u8; 10]));
    }

    #[test]
    fn invariant_filled_and_offset_stay_in_bounds() {
        let mut s = fresh(64);
        for i in 0..20 {
            let len = (i % 13) + 1;
            s.append(&vec![i as u8; len]);
            assert!(s.filled() <= s.capacity());
            if i % 3 == 0 {
                s.consume(len.min(s.filled()));
            }
        }
    }
}

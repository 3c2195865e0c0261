//! Bootstrap heap: a tiny fixed-size first-fit allocator.
//!
//! The instrumentation cannot call the real allocator while it is already
//! mid-operation on the same thread (symbol resolution and backtrace
//! symbolization both allocate). Nested requests are instead served from
//! this heap, a 512 KiB byte array living in the library's static data.
//!
//! Design points:
//! - every block is prefixed by a [`Node`] header carrying the free-list
//!   links, the payload size, and a state marker;
//! - requested sizes round up to the header size, so payloads inherit the
//!   header alignment;
//! - `free` only appends to the free list; adjacent free blocks are folded
//!   together opportunistically during the next allocation walk;
//! - exhaustion returns null. The heap never grows and never panics.
//!
//! There is no `realloc`: the core operations reject resize requests on
//! bootstrap pointers.

use core::cell::UnsafeCell;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::list::{self, Node, NODE_SIZE};
use crate::trace::Class;
use crate::util::align_up;

/// Marker value for a free block.
pub const FREE_MARKER: u32 = 0xBAAD_BEEF;
/// Marker value for a block handed out by [`BootstrapHeap::alloc`].
pub const INUSE_MARKER: u32 = 0x600D_BEEF;

/// Backing size of the process-wide bootstrap heap.
pub const BOOTSTRAP_HEAP_SIZE: usize = 512 * 1024;

/// The process-wide bootstrap heap. Serialized by the log lock: every path
/// that touches it must hold [`crate::state::STATE`]'s lock.
pub static LMM: BootstrapHeap<BOOTSTRAP_HEAP_SIZE> = BootstrapHeap::new();

// Headers are 32 bytes on 64-bit targets; aligning the backing array to the
// header size keeps every payload aligned to it as well (sizes are rounded
// to header-size multiples).
#[repr(C, align(32))]
struct Region<const N: usize>([u8; N]);

/// First-fit heap carved from a fixed byte array.
///
/// The const parameter exists so tests can exercise small instances; the
/// process uses the single [`LMM`] static.
pub struct BootstrapHeap<const N: usize> {
    region: UnsafeCell<Region<N>>,
    head: UnsafeCell<Node>,
    ready: AtomicBool,
}

// Access is serialized externally (the log lock for `LMM`); the type itself
// provides no synchronization.
unsafe impl<const N: usize> Sync for BootstrapHeap<N> {}

impl<const N: usize> BootstrapHeap<N> {
    pub const fn new() -> Self {
        Self {
            region: UnsafeCell::new(Region([0; N])),
            head: UnsafeCell::new(Node {
                next: ptr::null_mut(),
                prev: ptr::null_mut(),
                size: 0,
                marker: 0,
            }),
            ready: AtomicBool::new(false),
        }
    }

    /// True iff `p` lies within the backing byte array.
    pub fn contains(&self, p: *const u8) -> bool {
        let start = self.region.get() as usize;
        let addr = p as usize;
        addr >= start && addr < start + N
    }

    /// Allocates at least `size` bytes, or null on exhaustion.
    ///
    /// The returned payload is preceded by a header marked
    /// [`INUSE_MARKER`] and is aligned to the header size.
    ///
    /// # Safety
    /// The caller must serialize all access to this heap (the log lock for
    /// the [`LMM`] static).
    pub unsafe fn alloc(&self, size: usize) -> *mut u8 {
        self.ensure_init();
        crate::trace!(Class::Lmm, 2, "alloc({})", size);

        let want = align_up(size, NODE_SIZE);
        let head = self.head.get();

        let mut it = (*head).next;
        while it != head {
            if (*it).marker != FREE_MARKER {
                crate::trace!(
                    Class::Lmm,
                    1,
                    "invalid marker {:#010x} in free block {:p}",
                    (*it).marker,
                    it
                );
            }

            self.coalesce_forward(it);

            if (*it).size >= want {
                let chunk = (*it).size;
                (*it).marker = INUSE_MARKER;
                list::unlink(it);

                let left = chunk - want;
                if left >= NODE_SIZE {
                    // Trim the block to the requested size and hand the rest
                    // back to the free list as a new block.
                    (*it).size = want;
                    let rest = payload(it).add(want).cast::<Node>();
                    (*rest).marker = FREE_MARKER;
                    list::push_tail(head, rest, left - NODE_SIZE);
                } else {
                    // Not enough room left for a header; the caller gets the
                    // whole chunk, slightly over-allocated.
                }

                let result = payload(it);
                crate::trace!(Class::Lmm, 2, "alloc({}) -> {:p}", size, result);
                return result;
            }

            it = (*it).next;
        }

        crate::trace!(Class::Lmm, 1, "out of bootstrap memory ({} bytes requested)", size);
        ptr::null_mut()
    }

    /// Returns `p` (a pointer from [`Self::alloc`]) to the free list.
    ///
    /// No coalescing happens here; neighbors are folded during the next
    /// allocation walk.
    ///
    /// # Safety
    /// `p` must have been returned by `alloc` on this heap and not freed
    /// since. The caller must serialize all access to this heap.
    pub unsafe fn free(&self, p: *mut u8) {
        let node = header(p);
        crate::trace!(Class::Lmm, 2, "free({:p}), chunk size {}", p, (*node).size);
        (*node).marker = FREE_MARKER;
        list::push_tail(self.head.get(), node, (*node).size);
    }

    // The sentinel cannot reference its own address in a const initializer,
    // so the list is set up lazily on the first allocation (which runs under
    // the log lock).
    fn ensure_init(&self) {
        if self.ready.load(Ordering::Relaxed) {
            return;
        }
        debug_assert!(N >= 2 * NODE_SIZE && N % NODE_SIZE == 0);
        unsafe {
            let head = self.head.get();
            list::init_head(head);

            let first = self.region.get().cast::<Node>();
            (*first).marker = FREE_MARKER;
            list::push_tail(head, first, N - NODE_SIZE);
        }
        self.ready.store(true, Ordering::Relaxed);
    }

    // Folds free forward neighbors of `block` into it, one after another,
    // until an in-use block, an invalid marker, or the end of the region.
    unsafe fn coalesce_forward(&self, block: *mut Node) {
        let region_end = self.region.get() as usize + N;
        loop {
            let next = payload(block).add((*block).size).cast::<Node>();
            if next as usize >= region_end {
                return;
            }
            match (*next).marker {
                FREE_MARKER => {
                    crate::trace!(
                        Class::Lmm,
                        2,
                        "folding free neighbor {:p} ({} bytes) into {:p}",
                        next,
                        (*next).size,
                        block
                    );
                    (*block).size += (*next).size + NODE_SIZE;
                    list::unlink(next);
                }
                INUSE_MARKER => return,
                other => {
                    crate::trace!(
                        Class::Lmm,
                        1,
                        "invalid marker {:#010x} in neighbor {:p}",
                        other,
                        next
                    );
                    return;
                }
            }
        }
    }
}

#[inline]
unsafe fn payload(node: *mut Node) -> *mut u8 {
    node.add(1).cast()
}

#[inline]
unsafe fn header(p: *mut u8) -> *mut Node {
    p.cast::<Node>().sub(1)
}

//! Core allocator operations.
//!
//! Every interposed entry point lands here. The shared prologue/epilogue:
//! acquire the log lock, raise the thread's nesting level, route nested
//! allocation requests to the bootstrap heap, run one-shot initialization
//! on the first outermost call, forward to the real allocator, and emit one
//! event frame when logging is active.
//!
//! The real allocator's side effect always precedes the log write for the
//! same operation; across operations, frame order matches the order in
//! which real-allocator calls returned (a consequence of the single
//! lock-protected critical section). The lock is released across raw
//! address capture on paths that take a backtrace, because capture can
//! itself trigger instrumented allocations; it is re-acquired before the
//! frame is assembled.

use core::ffi::{c_void, CStr};
use core::fmt::Write as _;
use core::ptr;

use cfg_if::cfg_if;

use crate::backtrace::{self as bt, Capture};
use crate::config::Config;
use crate::error::InitError;
use crate::lmm::LMM;
use crate::logger::{self, EventKind, FileSink, UdpSink, BT_SYMBOLIZED, MAX_TAG_LEN};
use crate::state::{nesting_enter, nesting_exit, Global, RealAllocator, STATE};
use crate::trace::Class;

cfg_if! {
    if #[cfg(target_env = "gnu")] {
        // On glibc, going through the __libc_* aliases sidesteps the ifunc
        // indirection of the public symbols.
        const MALLOC_SYMBOL: (&CStr, &str) = (c"__libc_malloc", "__libc_malloc");
        const FREE_SYMBOL: (&CStr, &str) = (c"__libc_free", "__libc_free");
        const REALLOC_SYMBOL: (&CStr, &str) = (c"__libc_realloc", "__libc_realloc");
    } else {
        const MALLOC_SYMBOL: (&CStr, &str) = (c"malloc", "malloc");
        const FREE_SYMBOL: (&CStr, &str) = (c"free", "free");
        const REALLOC_SYMBOL: (&CStr, &str) = (c"realloc", "realloc");
    }
}

/// Allocate `size` bytes. `skip` is the number of interposer frames to drop
/// from captured call stacks.
///
/// # Safety
/// Callable from any thread at any time; the safety obligations are those
/// of the C `malloc` contract on the returned pointer.
pub unsafe fn malloc(size: usize, skip: usize) -> *mut c_void {
    let mut guard = Some(STATE.lock());
    let level = nesting_enter();
    crate::trace!(Class::Ops, 3, "malloc(size={}, skip={}) at level {}", size, skip, level);

    let result = 'op: {
        if level > 1 {
            // Already mid-instrumentation on this thread: the real
            // allocator could re-enter arbitrary library code. Serve from
            // the bootstrap heap instead.
            break 'op LMM.alloc(size).cast::<c_void>();
        }

        let state = STATE.get();
        if !ensure_initialized(state) {
            break 'op ptr::null_mut();
        }
        let Some(real) = (*state).real else {
            break 'op ptr::null_mut();
        };

        let result = (real.malloc)(size);

        (*state).op_counter += 1;
        if (*state).enabled && (*state).op_counter > (*state).start_threshold {
            let resolve = (*state).resolve;

            // Capture runs without the log lock; see module docs.
            guard = None;
            let chain = bt::capture(skip + 2);
            guard = Some(STATE.lock());

            (*state).frame.begin(EventKind::Malloc, logger::timestamp_usec(), logger::thread_id());
            (*state).frame.put_u64(size as u64);
            (*state).frame.put_u64(result as usize as u64);
            append_backtrace(state, &chain, resolve);
            logger::deliver(&mut *state);
        }

        result
    };

    nesting_exit();
    drop(guard);
    crate::trace!(Class::Ops, 3, "malloc -> {:p}", result);
    result
}

/// Release `p`. Null pointers return immediately; bootstrap-heap pointers
/// go back to the bootstrap heap and are never passed to the real `free`.
///
/// # Safety
/// As the C `free` contract: `p` must be null or a live allocation.
pub unsafe fn free(p: *mut c_void, skip: usize) {
    if p.is_null() {
        return;
    }

    let mut guard = Some(STATE.lock());
    let level = nesting_enter();
    crate::trace!(Class::Ops, 3, "free(p={:p}, skip={}) at level {}", p, skip, level);

    'op: {
        if LMM.contains(p.cast()) {
            LMM.free(p.cast());
            break 'op;
        }

        let state = STATE.get();
        if !ensure_initialized(state) {
            break 'op;
        }
        let Some(real) = (*state).real else {
            break 'op;
        };

        (real.free)(p);

        (*state).op_counter += 1;
        if (*state).enabled && (*state).op_counter > (*state).start_threshold {
            let resolve = (*state).resolve;
            let chain = if (*state).backtrace_on_free {
                guard = None;
                let chain = bt::capture(skip + 2);
                guard = Some(STATE.lock());
                chain
            } else {
                Capture::empty()
            };

            (*state).frame.begin(EventKind::Free, logger::timestamp_usec(), logger::thread_id());
            (*state).frame.put_u64(p as usize as u64);
            append_backtrace(state, &chain, resolve);
            logger::deliver(&mut *state);
        }
    }

    nesting_exit();
    drop(guard);
}

/// Resize forwarding as the interposition layer sees it:
/// `resize(null, s)` allocates, `resize(p, 0)` frees, anything else is a
/// real resize. `resize(null, 0)` is delegated to allocate(0) so the real
/// allocator decides.
///
/// # Safety
/// As the C `realloc` contract.
pub unsafe fn resize(p: *mut c_void, size: usize, skip: usize) -> *mut c_void {
    if p.is_null() {
        malloc(size, skip)
    } else if size == 0 {
        free(p, skip);
        ptr::null_mut()
    } else {
        realloc(p, size, skip)
    }
}

/// Resize `p` to `size` bytes via the real allocator.
///
/// Resizing a bootstrap-heap block is unsupported: the request fails with a
/// diagnostic on the log file and no frame.
///
/// # Safety
/// As the C `realloc` contract; additionally `p` must be non-null and
/// `size` non-zero (the interposer routes those cases elsewhere, see
/// [`resize`]).
pub unsafe fn realloc(p: *mut c_void, size: usize, skip: usize) -> *mut c_void {
    if LMM.contains(p.cast()) {
        let _guard = STATE.lock();
        let state = STATE.get();
        crate::trace!(Class::Ops, 1, "realloc({:p}, {}) on a bootstrap pointer", p, size);
        let mut line = crate::util::FmtBuf::<96>::new();
        let _ = write!(line, "realloc({:p},{}) not supported by internal allocator!\n", p, size);
        if let Some(sink) = (*state).file.as_mut() {
            sink.write_line(line.as_bytes());
        }
        return ptr::null_mut();
    }

    let mut guard = Some(STATE.lock());
    let level = nesting_enter();
    crate::trace!(Class::Ops, 3, "realloc(p={:p}, size={}, skip={}) at level {}", p, size, skip, level);

    let result = 'op: {
        let state = STATE.get();
        if !ensure_initialized(state) {
            break 'op ptr::null_mut();
        }
        let Some(real) = (*state).real else {
            break 'op ptr::null_mut();
        };

        let result = (real.realloc)(p, size);

        (*state).op_counter += 1;
        if (*state).enabled && (*state).op_counter > (*state).start_threshold {
            let resolve = (*state).resolve;
            guard = None;
            let chain = bt::capture(skip + 2);
            guard = Some(STATE.lock());

            (*state).frame.begin(EventKind::Realloc, logger::timestamp_usec(), logger::thread_id());
            (*state).frame.put_u64(p as usize as u64);
            (*state).frame.put_u64(size as u64);
            (*state).frame.put_u64(result as usize as u64);
            append_backtrace(state, &chain, resolve);
            logger::deliver(&mut *state);
        }

        result
    };

    nesting_exit();
    drop(guard);
    crate::trace!(Class::Ops, 3, "realloc -> {:p}", result);
    result
}

/// Emits a `TAG` frame with `name` and a fresh serial. Tags participate in
/// the nesting discipline like an allocation, but are not gated on
/// `enabled`: a tag is a deliberate user action, not ambient noise.
pub fn tag(name: &[u8], skip: usize) {
    let mut guard = Some(STATE.lock());
    let _level = nesting_enter();

    unsafe {
        let state = STATE.get();
        if ensure_initialized(state) {
            (*state).tag_serial += 1;
            let serial = (*state).tag_serial;
            let resolve = (*state).resolve;
            crate::trace!(Class::Ops, 2, "tag serial {}", serial);

            guard = None;
            let chain = bt::capture(skip + 2);
            guard = Some(STATE.lock());

            let name = &name[..name.len().min(MAX_TAG_LEN)];
            (*state).frame.begin(EventKind::Tag, logger::timestamp_usec(), logger::thread_id());
            (*state).frame.put_u32(serial);
            (*state).frame.put_u16(name.len() as u16);
            (*state).frame.put_bytes(name);
            append_backtrace(state, &chain, resolve);
            logger::deliver(&mut *state);
        }
    }

    nesting_exit();
    drop(guard);
}

// ---------------------------------------------------------------------------
// Frame suffix
// ---------------------------------------------------------------------------

// Appends the backtrace suffix: flags word, entry count, then either
// symbolized string entries or raw addresses. Symbolization allocates
// internally; the elevated nesting level routes those requests to the
// bootstrap heap.
unsafe fn append_backtrace(state: *mut Global, chain: &Capture, resolve: bool) {
    let addrs = chain.addrs();
    if resolve && !addrs.is_empty() {
        (*state).frame.put_u32(BT_SYMBOLIZED);
        (*state).frame.put_u32(addrs.len() as u32);
        for &addr in addrs {
            let mut entry = crate::util::FmtBuf::new();
            bt::format_symbol(addr, &mut entry);
            (*state).frame.put_u16(entry.len() as u16);
            (*state).frame.put_bytes(entry.as_bytes());
        }
    } else {
        (*state).frame.put_u32(0);
        (*state).frame.put_u32(addrs.len() as u32);
        for &addr in addrs {
            (*state).frame.put_u64(addr as usize as u64);
        }
    }
}

// ---------------------------------------------------------------------------
// One-shot initialization
// ---------------------------------------------------------------------------

// Runs initialization on the first outermost operation. Retried on every
// subsequent call until it succeeds; `initialized` flips to true at most
// once. Caller holds the log lock.
unsafe fn ensure_initialized(state: *mut Global) -> bool {
    if (*state).initialized {
        return true;
    }
    match initialize(state) {
        Ok(()) => {
            (*state).initialized = true;

            // Header record: one INIT frame carrying the initial enabled
            // flag.
            let enabled = (*state).enabled;
            (*state).frame.begin(EventKind::Init, logger::timestamp_usec(), logger::thread_id());
            (*state).frame.put_u32(enabled as u32);
            append_backtrace(state, &Capture::empty(), false);
            logger::deliver(&mut *state);
            true
        }
        Err(err) => {
            crate::trace!(Class::Init, 1, "initialization failed: {}", err);
            false
        }
    }
}

unsafe fn initialize(state: *mut Global) -> Result<(), InitError> {
    crate::trace::init();
    crate::trace!(Class::Init, 1, "initializing");

    let config = Config::from_env();

    (*state).file = match config.log_path.as_deref() {
        Some(path) => Some(open_file_sink(path)),
        None => None,
    };

    (*state).udp = match config.target {
        Some(target) => match UdpSink::open(target) {
            Ok(sink) => Some(sink),
            Err(source) => {
                let err = InitError::UdpSocket { target: target.to_string(), source };
                crate::trace!(Class::Init, 1, "{}", err);
                None
            }
        },
        None => None,
    };

    let real = resolve_real_allocator()?;
    (*state).real = Some(real);

    (*state).enabled = config.enabled;
    (*state).resolve = config.resolve;
    (*state).backtrace_on_free = config.backtrace_on_free;

    crate::trace!(
        Class::Init,
        1,
        "enabled={} resolve={} backtrace_on_free={}",
        config.enabled,
        config.resolve,
        config.backtrace_on_free
    );
    Ok(())
}

fn open_file_sink(path: &str) -> FileSink {
    match std::fs::File::create(path) {
        Ok(file) => FileSink::File(file),
        Err(source) => {
            let err = InitError::LogOpen { path: path.to_string(), source };
            crate::trace!(Class::Init, 1, "{}; logging to stdout", err);
            FileSink::Stdout
        }
    }
}

// Looks the real allocator up by name in the next object in load order.
// Any null resolution is fatal to instrumentation.
unsafe fn resolve_real_allocator() -> Result<RealAllocator, InitError> {
    let malloc_ptr =
        resolve_next(MALLOC_SYMBOL.0).ok_or(InitError::UnresolvedSymbol(MALLOC_SYMBOL.1))?;
    let free_ptr =
        resolve_next(FREE_SYMBOL.0).ok_or(InitError::UnresolvedSymbol(FREE_SYMBOL.1))?;
    let realloc_ptr =
        resolve_next(REALLOC_SYMBOL.0).ok_or(InitError::UnresolvedSymbol(REALLOC_SYMBOL.1))?;

    crate::trace!(Class::Init, 2, "real malloc at {:p}", malloc_ptr);
    crate::trace!(Class::Init, 2, "real free at {:p}", free_ptr);
    crate::trace!(Class::Init, 2, "real realloc at {:p}", realloc_ptr);

    Ok(RealAllocator {
        malloc: core::mem::transmute::<*mut c_void, crate::state::MallocFn>(malloc_ptr),
        free: core::mem::transmute::<*mut c_void, crate::state::FreeFn>(free_ptr),
        realloc: core::mem::transmute::<*mut c_void, crate::state::ReallocFn>(realloc_ptr),
    })
}

unsafe fn resolve_next(name: &CStr) -> Option<*mut c_void> {
    let ptr = libc::dlsym(libc::RTLD_NEXT, name.as_ptr());
    if ptr.is_null() {
        None
    } else {
        Some(ptr)
    }
}

//! Process-wide mutable state and its synchronization.
//!
//! Everything the core operations mutate lives in one [`Global`] record
//! guarded by one *recursive* OS mutex (the log lock). The mutex must be
//! recursive so that one-shot initialization, invoked from inside an
//! allocator operation, can call back into the logger, which re-enters the
//! lock on the same thread.
//!
//! The per-thread nesting level is deliberately not part of [`Global`]: it
//! is a const-initialized thread local (no allocating initializer, usable
//! before any constructor has run) accessed only by its owning thread.

use core::cell::{Cell, UnsafeCell};
use core::ffi::c_void;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::logger::{FileSink, FrameBuf, UdpSink};

/// Signature of the real `malloc`.
pub type MallocFn = unsafe extern "C" fn(usize) -> *mut c_void;
/// Signature of the real `free`.
pub type FreeFn = unsafe extern "C" fn(*mut c_void);
/// Signature of the real `realloc`.
pub type ReallocFn = unsafe extern "C" fn(*mut c_void, usize) -> *mut c_void;

/// Late-bound pointers to the allocator underneath us.
#[derive(Clone, Copy)]
pub struct RealAllocator {
    pub malloc: MallocFn,
    pub free: FreeFn,
    pub realloc: ReallocFn,
}

/// The single process-wide state record. All fields are owned by the log
/// lock; see [`SharedState::get`].
pub struct Global {
    /// Resolved real-allocator entry points; `Some` iff `initialized`.
    pub real: Option<RealAllocator>,
    /// One-shot initialization latch; transitions false to true at most once.
    pub initialized: bool,
    /// Event emission toggle (`memtraq_enable` / `memtraq_disable`).
    pub enabled: bool,
    /// Symbolize captured addresses when true.
    pub resolve: bool,
    /// Capture a call stack on `free` events when true.
    pub backtrace_on_free: bool,
    /// Count of operations that reached the real allocator.
    pub op_counter: u64,
    /// Events are skipped while `op_counter <= start_threshold`.
    pub start_threshold: u64,
    /// Serial number for tags.
    pub tag_serial: u32,
    /// File sink, if configured.
    pub file: Option<FileSink>,
    /// UDP sink, if configured.
    pub udp: Option<UdpSink>,
    /// Shared scratch buffer for frame assembly.
    pub frame: FrameBuf,
}

impl Global {
    const fn new() -> Self {
        Self {
            real: None,
            initialized: false,
            enabled: true,
            resolve: true,
            backtrace_on_free: false,
            op_counter: 0,
            start_threshold: 0,
            tag_serial: 0,
            file: None,
            udp: None,
            frame: FrameBuf::new(),
        }
    }
}

/// The global state and its log lock.
pub static STATE: SharedState = SharedState::new();

/// [`Global`] behind a recursive pthread mutex.
pub struct SharedState {
    lock: ReentrantLock,
    inner: UnsafeCell<Global>,
}

// All access to `inner` goes through the lock; see `get`.
unsafe impl Sync for SharedState {}

impl SharedState {
    const fn new() -> Self {
        Self { lock: ReentrantLock::new(), inner: UnsafeCell::new(Global::new()) }
    }

    /// Acquires the log lock. Re-entrant on the same thread.
    pub fn lock(&self) -> LockGuard<'_> {
        self.lock.lock()
    }

    /// Raw access to the state record.
    ///
    /// # Safety
    /// The calling thread must hold the log lock, and must not keep a `&mut`
    /// derived from this pointer alive across a call that can re-enter the
    /// instrumentation (real-allocator calls, symbolization, anything that
    /// may allocate).
    pub unsafe fn get(&self) -> *mut Global {
        self.inner.get()
    }
}

// ---------------------------------------------------------------------------
// Recursive mutex
// ---------------------------------------------------------------------------

const LOCK_UNINIT: u8 = 0;
const LOCK_BUSY: u8 = 1;
const LOCK_READY: u8 = 2;

/// Recursive `pthread_mutex_t` with no allocating initialization.
///
/// `PTHREAD_MUTEX_INITIALIZER` only yields a non-recursive mutex, and the
/// recursive static initializer is a glibc extension, so the attribute setup
/// runs on first use behind a tiny atomic latch instead.
pub struct ReentrantLock {
    state: AtomicU8,
    mutex: UnsafeCell<libc::pthread_mutex_t>,
}

unsafe impl Sync for ReentrantLock {}

impl ReentrantLock {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(LOCK_UNINIT),
            mutex: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
        }
    }

    pub fn lock(&self) -> LockGuard<'_> {
        self.ensure_init();
        unsafe {
            libc::pthread_mutex_lock(self.mutex.get());
        }
        LockGuard { lock: self }
    }

    fn ensure_init(&self) {
        match self.state.compare_exchange(
            LOCK_UNINIT,
            LOCK_BUSY,
            Ordering::Acquire,
            Ordering::Acquire,
        ) {
            Ok(_) => unsafe {
                let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
                libc::pthread_mutexattr_init(attr.as_mut_ptr());
                libc::pthread_mutexattr_settype(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_RECURSIVE);
                libc::pthread_mutex_init(self.mutex.get(), attr.as_ptr());
                libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
                self.state.store(LOCK_READY, Ordering::Release);
            },
            Err(LOCK_BUSY) => {
                while self.state.load(Ordering::Acquire) != LOCK_READY {
                    core::hint::spin_loop();
                }
            }
            Err(_) => {}
        }
    }
}

/// Unlocks on drop.
pub struct LockGuard<'a> {
    lock: &'a ReentrantLock,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(self.lock.mutex.get());
        }
    }
}

// ---------------------------------------------------------------------------
// Per-thread nesting level
// ---------------------------------------------------------------------------

thread_local! {
    // Const-initialized: no lazy initializer, so the counter works even for
    // allocations issued before main.
    static NESTING: Cell<usize> = const { Cell::new(0) };
}

/// Increments the calling thread's nesting level and returns the new value.
/// Level 1 means "outermost operation"; anything higher is a nested request
/// that must not reach the real allocator.
pub fn nesting_enter() -> usize {
    NESTING.with(|level| {
        let new = level.get() + 1;
        level.set(new);
        new
    })
}

/// Restores the nesting level on the way out of an operation.
pub fn nesting_exit() {
    NESTING.with(|level| {
        level.set(level.get().saturating_sub(1));
    });
}

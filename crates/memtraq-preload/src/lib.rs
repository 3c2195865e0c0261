//! Interposition layer: the exported allocator symbols.
//!
//! This cdylib is the artifact that gets `LD_PRELOAD`ed in front of the C
//! library. It exports the standard allocation primitives, the C++
//! operator new/delete family (throwing and nothrow-signalling forms), and
//! the `memtraq_*` control surface. Every entry point is a thin forwarder
//! into the core operations with a stack-skip hint of 1, the one frame to
//! discard from captured backtraces being the interposer itself.
//!
//! Resize forwarding, the null-free short-circuit, and all recursion
//! handling live in `memtraq::ops`; nothing here touches state.

// The mangled Itanium ABI operator names are what they are.
#![allow(non_snake_case)]

use core::ffi::{c_char, c_void, CStr};

use memtraq::trace::Class;

#[no_mangle]
pub unsafe extern "C" fn malloc(size: usize) -> *mut c_void {
    memtraq::trace!(Class::Hooks, 3, "malloc({})", size);
    memtraq::ops::malloc(size, 1)
}

/// Cleared allocation. The count/size product is taken with wrapping
/// semantics; overflow handling is the real allocator's business, not ours.
#[no_mangle]
pub unsafe extern "C" fn calloc(count: usize, size: usize) -> *mut c_void {
    memtraq::trace!(Class::Hooks, 3, "calloc({}, {})", count, size);
    let total = count.wrapping_mul(size);
    let result = memtraq::ops::malloc(total, 1);
    if !result.is_null() {
        core::ptr::write_bytes(result.cast::<u8>(), 0, total);
    }
    result
}

#[no_mangle]
pub unsafe extern "C" fn realloc(p: *mut c_void, size: usize) -> *mut c_void {
    memtraq::trace!(Class::Hooks, 3, "realloc({:p}, {})", p, size);
    memtraq::ops::resize(p, size, 1)
}

#[no_mangle]
pub unsafe extern "C" fn free(p: *mut c_void) {
    if p.is_null() {
        return;
    }
    memtraq::trace!(Class::Hooks, 3, "free({:p})", p);
    memtraq::ops::free(p, 1)
}

// ---------------------------------------------------------------------------
// C++ typed-object construction/destruction (Itanium ABI, 64-bit)
// ---------------------------------------------------------------------------
//
// Exporting the mangled operator symbols catches `new`/`delete` in C++
// hosts whose standard library routes them around `malloc`. The throwing
// forms return null on failure just like the nothrow ones; a bad_alloc
// throw cannot cross this ABI boundary anyway.

/// `operator new(size_t)`
#[cfg(all(unix, target_pointer_width = "64"))]
#[no_mangle]
pub unsafe extern "C" fn _Znwm(size: usize) -> *mut c_void {
    memtraq::trace!(Class::Hooks, 3, "operator new({})", size);
    memtraq::ops::malloc(size, 1)
}

/// `operator new[](size_t)`
#[cfg(all(unix, target_pointer_width = "64"))]
#[no_mangle]
pub unsafe extern "C" fn _Znam(size: usize) -> *mut c_void {
    memtraq::trace!(Class::Hooks, 3, "operator new[]({})", size);
    memtraq::ops::malloc(size, 1)
}

/// `operator new(size_t, nothrow)`
#[cfg(all(unix, target_pointer_width = "64"))]
#[no_mangle]
pub unsafe extern "C" fn _ZnwmRKSt9nothrow_t(size: usize, _tag: *const c_void) -> *mut c_void {
    memtraq::ops::malloc(size, 1)
}

/// `operator new[](size_t, nothrow)`
#[cfg(all(unix, target_pointer_width = "64"))]
#[no_mangle]
pub unsafe extern "C" fn _ZnamRKSt9nothrow_t(size: usize, _tag: *const c_void) -> *mut c_void {
    memtraq::ops::malloc(size, 1)
}

/// `operator delete(void*)`
#[cfg(all(unix, target_pointer_width = "64"))]
#[no_mangle]
pub unsafe extern "C" fn _ZdlPv(p: *mut c_void) {
    memtraq::ops::free(p, 1)
}

/// `operator delete[](void*)`
#[cfg(all(unix, target_pointer_width = "64"))]
#[no_mangle]
pub unsafe extern "C" fn _ZdaPv(p: *mut c_void) {
    memtraq::ops::free(p, 1)
}

/// `operator delete(void*, size_t)`, the C++14 sized deallocation form.
#[cfg(all(unix, target_pointer_width = "64"))]
#[no_mangle]
pub unsafe extern "C" fn _ZdlPvm(p: *mut c_void, _size: usize) {
    memtraq::ops::free(p, 1)
}

/// `operator delete[](void*, size_t)`
#[cfg(all(unix, target_pointer_width = "64"))]
#[no_mangle]
pub unsafe extern "C" fn _ZdaPvm(p: *mut c_void, _size: usize) {
    memtraq::ops::free(p, 1)
}

/// `operator delete(void*, nothrow)`
#[cfg(all(unix, target_pointer_width = "64"))]
#[no_mangle]
pub unsafe extern "C" fn _ZdlPvRKSt9nothrow_t(p: *mut c_void, _tag: *const c_void) {
    memtraq::ops::free(p, 1)
}

/// `operator delete[](void*, nothrow)`
#[cfg(all(unix, target_pointer_width = "64"))]
#[no_mangle]
pub unsafe extern "C" fn _ZdaPvRKSt9nothrow_t(p: *mut c_void, _tag: *const c_void) {
    memtraq::ops::free(p, 1)
}

// ---------------------------------------------------------------------------
// Control surface
// ---------------------------------------------------------------------------

#[no_mangle]
pub extern "C" fn memtraq_enable() {
    memtraq::api::enable();
}

#[no_mangle]
pub extern "C" fn memtraq_disable() {
    memtraq::api::disable();
}

#[no_mangle]
pub unsafe extern "C" fn memtraq_tag(name: *const c_char) {
    if name.is_null() {
        return;
    }
    memtraq::api::tag_bytes(CStr::from_ptr(name).to_bytes());
}

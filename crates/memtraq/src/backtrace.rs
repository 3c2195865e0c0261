//! Call-stack capture and resolution.
//!
//! Capture walks the return-address chain up to [`MAX_BT`] frames and drops
//! a caller-supplied prefix (the interposer and core-operation frames).
//! Capture itself stores raw instruction pointers into a fixed array and
//! performs no allocation, so it can run with the log lock released.
//!
//! Symbolization is a separate step and *does* allocate internally; callers
//! run it with their nesting level raised, so any allocation it triggers is
//! served by the bootstrap heap instead of re-entering the real allocator.

use core::ffi::c_void;
use core::fmt::Write as _;

use crate::util::FmtBuf;

/// Capture cap: frames beyond this are dropped.
pub const MAX_BT: usize = 100;

/// A captured return-address chain.
pub struct Capture {
    frames: [*mut c_void; MAX_BT],
    len: usize,
}

impl Capture {
    /// An empty chain (used for events that carry no backtrace).
    pub const fn empty() -> Self {
        Self { frames: [core::ptr::null_mut(); MAX_BT], len: 0 }
    }

    pub fn addrs(&self) -> &[*mut c_void] {
        &self.frames[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Walks the current call chain, discarding the `skip` innermost frames.
pub fn capture(skip: usize) -> Capture {
    let mut capture = Capture::empty();
    let mut skipped = 0;

    backtrace::trace(|frame| {
        if skipped < skip {
            skipped += 1;
            return true;
        }
        if capture.len < MAX_BT {
            capture.frames[capture.len] = frame.ip();
            capture.len += 1;
            capture.len < MAX_BT
        } else {
            false
        }
    });

    capture
}

/// Renders `addr` as a human-readable entry into `out`.
///
/// Formats `name+0xoffset` when the address resolves; an address that fails
/// to resolve degrades to its hex form, so a frame never goes missing from
/// the suffix.
pub fn format_symbol(addr: *mut c_void, out: &mut FmtBuf<{ crate::logger::MAX_SYMBOL_LEN }>) {
    backtrace::resolve(addr, |symbol| {
        if !out.is_empty() {
            return; // first resolution wins
        }
        if let Some(name) = symbol.name() {
            if let Some(text) = name.as_str() {
                let offset = symbol
                    .addr()
                    .map(|base| addr as usize - base as usize)
                    .unwrap_or(0);
                let _ = write!(out, "{}+{:#x}", text, offset);
            }
        }
    });

    if out.is_empty() {
        let _ = write!(out, "{:p}", addr);
    }
}

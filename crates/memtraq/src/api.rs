//! Public control surface: enable, disable, tag.
//!
//! These are thin state mutations under the log lock. The C ABI exports
//! live in the preload crate; this module is the Rust-facing surface the
//! exports (and the test suite) call into.

use crate::state::STATE;
use crate::trace::Class;

/// Turns event emission on.
pub fn enable() {
    let _guard = STATE.lock();
    unsafe {
        (*STATE.get()).enabled = true;
    }
    crate::trace!(Class::Ops, 2, "enabled");
}

/// Turns event emission off and flushes the file sink.
pub fn disable() {
    let _guard = STATE.lock();
    unsafe {
        let state = STATE.get();
        (*state).enabled = false;
        if let Some(sink) = (*state).file.as_mut() {
            sink.flush();
        }
    }
    crate::trace!(Class::Ops, 2, "disabled");
}

/// Places a named waypoint in the event stream. The serial carried by the
/// emitted frame increments per tag, starting at 1.
pub fn tag(name: &str) {
    tag_bytes(name.as_bytes());
}

/// Byte-slice variant of [`tag`] for callers arriving through the C ABI.
pub fn tag_bytes(name: &[u8]) {
    crate::ops::tag(name, 1);
}

//! Internal debug-print façade.
//!
//! Leveled, class-tagged prints to stderr, serialized by a single
//! process-wide mutex. Levels are all zero (silent) until [`init`] runs and
//! reads `MEMTRAQ_DEBUG` (default level for every class) and
//! `MEMTRAQ_TRACE_<CLASS>` (per-class override).
//!
//! The formatting path is allocation-free: lines are rendered into a
//! fixed-size stack buffer and written with a raw `write(2)`, so the façade
//! is safe to call from inside an allocator operation at any nesting level.

use core::fmt::{self, Write as _};
use core::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;

use crate::util::FmtBuf;

/// Trace classes, one per subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Hooks,
    Ops,
    Lmm,
    Log,
    Init,
}

impl Class {
    const COUNT: usize = 5;

    /// Name used in the `MEMTRAQ_TRACE_<CLASS>` variable and the line prefix.
    pub fn name(self) -> &'static str {
        match self {
            Class::Hooks => "HOOKS",
            Class::Ops => "OPS",
            Class::Lmm => "LMM",
            Class::Log => "LOG",
            Class::Init => "INIT",
        }
    }

    fn index(self) -> usize {
        match self {
            Class::Hooks => 0,
            Class::Ops => 1,
            Class::Lmm => 2,
            Class::Log => 3,
            Class::Init => 4,
        }
    }

    fn all() -> [Class; Self::COUNT] {
        [Class::Hooks, Class::Ops, Class::Lmm, Class::Log, Class::Init]
    }
}

const LEVEL_OFF: u8 = 0;

static LEVELS: [AtomicU8; Class::COUNT] = [
    AtomicU8::new(LEVEL_OFF),
    AtomicU8::new(LEVEL_OFF),
    AtomicU8::new(LEVEL_OFF),
    AtomicU8::new(LEVEL_OFF),
    AtomicU8::new(LEVEL_OFF),
];

static TRACE_LOCK: Mutex<()> = Mutex::new(());

/// Reads the trace configuration from the environment. Called once from
/// initialization; calling it again just re-reads the variables.
pub fn init() {
    let default_level = match std::env::var("MEMTRAQ_DEBUG") {
        Ok(v) if !v.is_empty() => v.parse::<u8>().unwrap_or(1),
        _ => LEVEL_OFF,
    };
    for class in Class::all() {
        let mut level = default_level;
        let mut var = heapless::String::<32>::new();
        let _ = write!(var, "MEMTRAQ_TRACE_{}", class.name());
        if let Ok(v) = std::env::var(var.as_str()) {
            level = v.parse::<u8>().unwrap_or(if v.is_empty() { level } else { 1 });
        }
        LEVELS[class.index()].store(level, Ordering::Relaxed);
    }
}

/// True iff messages of `level` for `class` are currently printed.
#[inline]
pub fn enabled(class: Class, level: u8) -> bool {
    LEVELS[class.index()].load(Ordering::Relaxed) >= level
}

/// Formats and prints one trace line. Use through [`crate::trace!`].
pub fn write(class: Class, args: fmt::Arguments<'_>) {
    let mut line = FmtBuf::<256>::new();
    let _ = fmt::write(&mut line, format_args!("# memtraq [{}] ", class.name()));
    let _ = fmt::write(&mut line, args);
    line.push_bytes(b"\n");

    let _guard = TRACE_LOCK.lock();
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            line.as_bytes().as_ptr().cast(),
            line.len(),
        );
    }
}

/// Class-tagged, leveled debug print. Compiles to a level check plus, when
/// enabled, one formatted `write(2)` to stderr.
#[macro_export]
macro_rules! trace {
    ($class:expr, $level:expr, $($arg:tt)*) => {
        if $crate::trace::enabled($class, $level) {
            $crate::trace::write($class, ::core::format_args!($($arg)*));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_match_env_suffixes() {
        assert_eq!(Class::Hooks.name(), "HOOKS");
        assert_eq!(Class::Lmm.name(), "LMM");
        assert_eq!(Class::all().len(), Class::COUNT);
    }

    #[test]
    fn levels_default_to_silent() {
        // No MEMTRAQ_DEBUG in the test environment: everything is off.
        assert!(!enabled(Class::Ops, 1));
    }

    #[test]
    fn write_does_not_panic_on_long_lines() {
        let long = "x".repeat(1024);
        write(Class::Log, format_args!("{long}"));
    }
}

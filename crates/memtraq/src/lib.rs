//! # memtraq
//!
//! Heap-allocation instrumentation for unmodified POSIX executables.
//!
//! This crate is the core of a preloadable shared library that interposes
//! the process-wide allocation primitives and records a timestamped,
//! thread-attributed event stream: every allocation, release, and
//! user-placed tag, each with the call stack that produced it. Downstream
//! tooling replays the stream to attribute live memory to code sites at any
//! point in the run.
//!
//! Three subsystems carry the weight:
//!
//! - **Interposition & recursion control** ([`ops`], [`state`]): the
//!   exported entry points forward here; a per-thread nesting level keeps
//!   the instrumentation from re-entering the real allocator when its own
//!   logging path allocates.
//! - **Bootstrap heap** ([`lmm`]): a fixed 512 KiB first-fit heap in the
//!   library's static data that serves those nested requests.
//! - **Event pipeline** ([`logger`], [`backtrace`]): length-prefixed binary
//!   frames assembled in a shared scratch buffer and delivered to a log
//!   file and/or a UDP endpoint.
//!
//! The exported C ABI symbols (`malloc`, `free`, the C++ operator set,
//! `memtraq_enable` / `memtraq_disable` / `memtraq_tag`) live in the
//! companion `memtraq-preload` cdylib, which is what actually gets
//! `LD_PRELOAD`ed; keeping them out of this crate lets the test suite link
//! the internals without interposing its own harness.

pub mod api;
pub mod backtrace;
pub mod config;
pub mod error;
pub mod list;
pub mod lmm;
pub mod logger;
pub mod ops;
pub mod state;
pub mod trace;
pub mod util;

pub use api::{disable, enable, tag};
pub use error::InitError;

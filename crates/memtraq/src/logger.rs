//! Binary event framing and delivery.
//!
//! Each observed operation produces exactly one length-prefixed frame:
//!
//! ```text
//! offset 0   u32  total frame size in bytes (filled last)
//! offset 4   u32  event kind (INIT / MALLOC / FREE / REALLOC / TAG)
//! offset 8   u64  wall-clock timestamp, microseconds
//! offset 16  u64  thread identifier
//!            ...  kind-specific payload
//!            ...  backtrace suffix
//! ```
//!
//! Fields are host-native endian: the consumer is a companion tool on the
//! same architecture. Frames are assembled in one shared scratch buffer
//! owned by the log lock, then written whole to the file sink and/or sent
//! as one datagram to the UDP sink. A frame is never split across writes
//! and the logger never batches.

use std::fs::File;
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};

use crate::state::Global;
use crate::trace::Class;

/// Hard cap on one assembled frame. Sized so the worst case (a full-depth
/// symbolized backtrace plus the largest payload) always fits.
pub const SCRATCH_CAPACITY: usize = 32 * 1024;

/// Cap on a single symbolized backtrace entry.
pub const MAX_SYMBOL_LEN: usize = 224;

/// Cap on a tag name carried in a `TAG` frame.
pub const MAX_TAG_LEN: usize = 256;

/// UDP source port frames are sent from.
pub const UDP_SOURCE_PORT: u16 = 8000;

/// UDP destination port frames are sent to.
pub const UDP_DEST_PORT: u16 = 6001;

/// Backtrace-suffix flag: entries are symbolized strings, not raw addresses.
pub const BT_SYMBOLIZED: u32 = 1;

/// Event kind tag at frame offset 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EventKind {
    Init = 0,
    Malloc = 1,
    Free = 2,
    Realloc = 3,
    Tag = 4,
}

/// The shared frame-assembly buffer.
///
/// Writers lay out the frame starting at offset 4 (the length prefix is
/// reserved by [`FrameBuf::begin`]) and [`FrameBuf::finish`] writes the
/// total size to offset 0.
pub struct FrameBuf {
    buf: heapless::Vec<u8, SCRATCH_CAPACITY>,
}

impl FrameBuf {
    pub const fn new() -> Self {
        Self { buf: heapless::Vec::new() }
    }

    /// Starts a frame: length placeholder, kind, timestamp, thread id.
    pub fn begin(&mut self, kind: EventKind, timestamp_usec: u64, thread_id: u64) {
        self.buf.clear();
        self.put_u32(0); // total size, filled by finish()
        self.put_u32(kind as u32);
        self.put_u64(timestamp_usec);
        self.put_u64(thread_id);
    }

    pub fn put_u16(&mut self, v: u16) {
        let _ = self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        let _ = self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    pub fn put_u64(&mut self, v: u64) {
        let _ = self.buf.extend_from_slice(&v.to_ne_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        let _ = self.buf.extend_from_slice(bytes);
    }

    /// Writes the total size into the length prefix and returns the frame.
    pub fn finish(&mut self) -> &[u8] {
        let total = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&total.to_ne_bytes());
        &self.buf
    }
}

/// Where file-bound frames go.
pub enum FileSink {
    File(File),
    /// Fallback when the configured path cannot be opened.
    Stdout,
}

impl FileSink {
    pub fn write_frame(&mut self, frame: &[u8]) {
        self.write_bytes(frame);
    }

    /// Human-readable diagnostics (not framed); used for conditions the
    /// downstream tool should surface verbatim.
    pub fn write_line(&mut self, line: &[u8]) {
        self.write_bytes(line);
    }

    pub fn flush(&mut self) {
        let result = match self {
            FileSink::File(f) => f.flush(),
            FileSink::Stdout => std::io::stdout().flush(),
        };
        if let Err(err) = result {
            crate::trace!(Class::Log, 1, "flush failed: {}", err);
        }
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        let result = match self {
            FileSink::File(f) => f.write_all(bytes),
            FileSink::Stdout => std::io::stdout().write_all(bytes),
        };
        if let Err(err) = result {
            crate::trace!(Class::Log, 1, "file write failed: {}", err);
        }
    }
}

/// Datagram sink: one frame per datagram, best-effort.
pub struct UdpSink {
    socket: UdpSocket,
    dest: SocketAddrV4,
}

impl UdpSink {
    /// Binds the fixed source port and prepares the destination address.
    pub fn open(target: Ipv4Addr) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, UDP_SOURCE_PORT))?;
        Ok(Self { socket, dest: SocketAddrV4::new(target, UDP_DEST_PORT) })
    }

    /// Send failures are dropped silently; the file sink still gets the
    /// frame.
    pub fn send_frame(&self, frame: &[u8]) {
        let _ = self.socket.send_to(frame, SocketAddr::V4(self.dest));
    }
}

/// Finalizes the frame in `state.frame` and delivers it to every configured
/// sink. Caller holds the log lock.
pub fn deliver(state: &mut Global) {
    let Global { frame, file, udp, .. } = state;
    let bytes = frame.finish();
    if let Some(sink) = file.as_mut() {
        sink.write_frame(bytes);
    }
    if let Some(sink) = udp.as_ref() {
        sink.send_frame(bytes);
    }
}

/// Microsecond wall-clock timestamp. Non-monotonic by policy: frame order
/// in the log, not the timestamp, is authoritative.
pub fn timestamp_usec() -> u64 {
    let mut tv = libc::timeval { tv_sec: 0, tv_usec: 0 };
    unsafe {
        libc::gettimeofday(&mut tv, core::ptr::null_mut());
    }
    tv.tv_sec as u64 * 1_000_000 + tv.tv_usec as u64
}

/// Opaque identifier of the calling thread.
pub fn thread_id() -> u64 {
    unsafe { libc::pthread_self() as usize as u64 }
}

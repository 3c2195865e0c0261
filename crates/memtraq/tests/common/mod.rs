//! Shared helpers for the log-stream tests: a reader for the binary frame
//! format produced by the logger.

#![allow(dead_code)] // each test binary uses a different subset

use std::path::PathBuf;

pub const KIND_INIT: u32 = 0;
pub const KIND_MALLOC: u32 = 1;
pub const KIND_FREE: u32 = 2;
pub const KIND_REALLOC: u32 = 3;
pub const KIND_TAG: u32 = 4;

/// One decoded event frame.
#[derive(Debug)]
pub struct Frame {
    pub kind: u32,
    pub timestamp: u64,
    pub thread: u64,
    pub event: Event,
    pub bt_symbolized: bool,
    pub bt_count: u32,
}

#[derive(Debug, PartialEq)]
pub enum Event {
    Init { enabled: u32 },
    Malloc { size: u64, ptr: u64 },
    Free { ptr: u64 },
    Realloc { old: u64, size: u64, new: u64 },
    Tag { serial: u32, name: Vec<u8> },
}

/// Splits `bytes` into decoded frames plus any unframed trailing bytes
/// (diagnostic lines are written to the file sink as plain text).
pub fn parse_frames(bytes: &[u8]) -> (Vec<Frame>, Vec<u8>) {
    let mut frames = Vec::new();
    let mut rest = bytes;

    while rest.len() >= 4 {
        let total = u32::from_ne_bytes(rest[0..4].try_into().unwrap()) as usize;
        if total < 24 || total > rest.len() {
            break; // not a frame: diagnostic text or truncation
        }
        frames.push(decode(&rest[..total]));
        rest = &rest[total..];
    }

    (frames, rest.to_vec())
}

fn decode(frame: &[u8]) -> Frame {
    let mut r = Reader { buf: frame, pos: 4 };
    let kind = r.u32();
    let timestamp = r.u64();
    let thread = r.u64();

    let event = match kind {
        KIND_INIT => Event::Init { enabled: r.u32() },
        KIND_MALLOC => Event::Malloc { size: r.u64(), ptr: r.u64() },
        KIND_FREE => Event::Free { ptr: r.u64() },
        KIND_REALLOC => Event::Realloc { old: r.u64(), size: r.u64(), new: r.u64() },
        KIND_TAG => {
            let serial = r.u32();
            let len = r.u16() as usize;
            Event::Tag { serial, name: r.bytes(len).to_vec() }
        }
        other => panic!("unknown event kind {other}"),
    };

    let flags = r.u32();
    let bt_count = r.u32();
    let bt_symbolized = flags & 1 != 0;
    for _ in 0..bt_count {
        if bt_symbolized {
            let len = r.u16() as usize;
            let _ = r.bytes(len);
        } else {
            let _ = r.u64();
        }
    }
    assert_eq!(r.pos, frame.len(), "frame has trailing bytes");

    Frame { kind, timestamp, thread, event, bt_symbolized, bt_count }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn u16(&mut self) -> u16 {
        u16::from_ne_bytes(self.bytes(2).try_into().unwrap())
    }

    fn u32(&mut self) -> u32 {
        u32::from_ne_bytes(self.bytes(4).try_into().unwrap())
    }

    fn u64(&mut self) -> u64 {
        u64::from_ne_bytes(self.bytes(8).try_into().unwrap())
    }

    fn bytes(&mut self, n: usize) -> &'a [u8] {
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        out
    }
}

/// Per-process log path under the system temp directory.
pub fn temp_log(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("memtraq-{}-{}.mtq", tag, std::process::id()))
}

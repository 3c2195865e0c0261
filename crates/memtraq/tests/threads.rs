//! Cross-thread ordering and event-count conservation.
//!
//! Frames are totally ordered by log-lock acquisition; within one thread
//! that order must match program order, and every real-allocator operation
//! produces exactly one frame.

mod common;

use common::Event;
use memtraq::{config, logger, ops};

const PER_THREAD: usize = 10;

#[test]
fn per_thread_frames_appear_in_program_order() {
    let log = common::temp_log("threads");
    std::env::set_var(config::ENV_LOG, &log);
    std::env::set_var(config::ENV_RESOLVE, "0");

    // Initialize on the main thread so the workers race only on the ops.
    unsafe {
        let warmup = ops::malloc(8, 0);
        ops::free(warmup, 0);
    }

    let worker = |base: u64| {
        move || {
            let tid = logger::thread_id();
            for i in 0..PER_THREAD {
                unsafe {
                    let p = ops::malloc(base as usize + i, 0);
                    assert!(!p.is_null());
                    ops::free(p, 0);
                }
            }
            tid
        }
    };

    let a = std::thread::spawn(worker(1000));
    let b = std::thread::spawn(worker(2000));
    let tid_a = a.join().unwrap();
    let tid_b = b.join().unwrap();
    memtraq::disable();

    let bytes = std::fs::read(&log).unwrap();
    let (frames, tail) = common::parse_frames(&bytes);
    assert!(tail.is_empty());

    // Conservation: one MALLOC and one FREE per operation, plus the warmup
    // pair and the INIT header.
    let mallocs = frames.iter().filter(|f| matches!(f.event, Event::Malloc { .. })).count();
    let frees = frames.iter().filter(|f| matches!(f.event, Event::Free { .. })).count();
    assert_eq!(mallocs, 2 * PER_THREAD + 1);
    assert_eq!(frees, 2 * PER_THREAD + 1);

    // Program order per thread: each worker's malloc sizes are strictly
    // increasing, so their subsequence in the log must be too.
    for (tid, base) in [(tid_a, 1000), (tid_b, 2000)] {
        let sizes: Vec<u64> = frames
            .iter()
            .filter(|f| f.thread == tid)
            .filter_map(|f| match f.event {
                Event::Malloc { size, .. } if size >= base => Some(size),
                _ => None,
            })
            .collect();
        let expected: Vec<u64> = (0..PER_THREAD as u64).map(|i| base + i).collect();
        assert_eq!(sizes, expected);
    }

    let _ = std::fs::remove_file(&log);
}

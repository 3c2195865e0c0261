//! Start-threshold gating: events are skipped while the operation counter
//! is at or below the threshold, and the boundary is exact.

mod common;

use common::Event;
use memtraq::{config, ops, state};

#[test]
fn events_before_the_threshold_are_skipped() {
    let log = common::temp_log("threshold");
    std::env::set_var(config::ENV_LOG, &log);
    std::env::set_var(config::ENV_RESOLVE, "0");

    // The threshold is plain state, set ahead of the first operation.
    unsafe {
        let _guard = state::STATE.lock();
        (*state::STATE.get()).start_threshold = 2;
    }

    let a;
    let b;
    let c;
    unsafe {
        a = ops::malloc(10, 0); // op 1: skipped
        b = ops::malloc(20, 0); // op 2: skipped (counter == threshold)
        c = ops::malloc(30, 0); // op 3: logged (counter > threshold)
        assert!(!a.is_null() && !b.is_null() && !c.is_null());
        ops::free(a, 0);
        ops::free(b, 0);
        ops::free(c, 0);
    }
    memtraq::disable();

    let bytes = std::fs::read(&log).unwrap();
    let (frames, tail) = common::parse_frames(&bytes);
    assert!(tail.is_empty());

    assert_eq!(frames.len(), 5, "frames: {frames:?}");
    assert_eq!(frames[0].event, Event::Init { enabled: 1 });
    assert_eq!(frames[1].event, Event::Malloc { size: 30, ptr: c as u64 });
    assert_eq!(frames[2].event, Event::Free { ptr: a as u64 });
    assert_eq!(frames[3].event, Event::Free { ptr: b as u64 });
    assert_eq!(frames[4].event, Event::Free { ptr: c as u64 });

    let _ = std::fs::remove_file(&log);
}

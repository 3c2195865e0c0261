//! Control-surface behavior: starting disabled, tagging, re-enabling.

mod common;

use common::Event;
use memtraq::{config, ops};

#[test]
fn disabled_start_suppresses_allocations_but_not_tags() {
    let log = common::temp_log("control");
    std::env::set_var(config::ENV_LOG, &log);
    std::env::set_var(config::ENV_ENABLED, "0");
    std::env::set_var(config::ENV_RESOLVE, "0");

    let p;
    let q;
    unsafe {
        // Not logged: emission starts disabled.
        p = ops::malloc(100, 0);
        assert!(!p.is_null(), "instrumentation must stay transparent while disabled");

        // Tags are deliberate user waypoints and are emitted regardless.
        memtraq::tag("A");

        memtraq::enable();
        q = ops::malloc(200, 0);
        assert!(!q.is_null());

        ops::free(p, 0);
        ops::free(q, 0);
    }
    memtraq::disable();

    let bytes = std::fs::read(&log).unwrap();
    let (frames, tail) = common::parse_frames(&bytes);
    assert!(tail.is_empty());

    assert_eq!(frames.len(), 5, "frames: {frames:?}");
    assert_eq!(frames[0].event, Event::Init { enabled: 0 });
    assert_eq!(frames[1].event, Event::Tag { serial: 1, name: b"A".to_vec() });
    assert_eq!(frames[2].event, Event::Malloc { size: 200, ptr: q as u64 });
    assert_eq!(frames[3].event, Event::Free { ptr: p as u64 });
    assert_eq!(frames[4].event, Event::Free { ptr: q as u64 });

    // The tag carried a call chain even with nothing else being logged.
    assert!(frames[1].bt_count > 0);

    // A second tag continues the serial.
    memtraq::enable();
    memtraq::tag("B");
    memtraq::disable();
    let bytes = std::fs::read(&log).unwrap();
    let (frames, _) = common::parse_frames(&bytes);
    match &frames.last().unwrap().event {
        Event::Tag { serial, name } => {
            assert_eq!(*serial, 2);
            assert_eq!(name, b"B");
        }
        other => panic!("expected tag, got {other:?}"),
    }

    let _ = std::fs::remove_file(&log);
}

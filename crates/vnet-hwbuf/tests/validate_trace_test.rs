//! Allocation-state tracing. Only meaningful when validation is compiled in.
#![cfg(any(debug_assertions, feature = "validate"))]

use std::sync::Arc;

use vnet_hwbuf::{BufferMain, BufferState, BufferTemplate, HeapDma, PoolConfig, Ref, RefHeader, VALIDATE};

fn rx() -> (BufferMain, Arc<vnet_hwbuf::BufferPool>) {
    let elog = Arc::new(vnet_elog::Buffer::new(1024));
    elog.enable(true);
    let main = BufferMain::new(Arc::new(HeapDma::default()), elog);
    let pool = main
        .add_buffer_pool(PoolConfig::new("rx", BufferTemplate::default()))
        .unwrap();
    (main, pool)
}

#[test]
fn validation_is_compiled_in() {
    assert!(VALIDATE);
}

#[test]
fn states_alternate_and_trail_resets_on_alloc() {
    let (main, p) = rx();
    let mut r = [Ref::default(); 1];
    p.alloc_refs(&mut r).unwrap();
    assert_eq!(p.buffer_state(&r[0]), BufferState::KnownAllocated);
    r[0].trace(&p, "tx-ring", 3);
    p.free_refs(&r, false).unwrap();
    assert_eq!(main.buffer_state(r[0].offset()), BufferState::KnownFree);
    assert_eq!(
        p.trail(&r[0])[1..],
        [
            "  pool rx: set-state: known-allocated",
            "  pool rx: tx-ring 3",
            "  pool rx: set-state: known-free",
        ]
    );

    p.alloc_refs(&mut r).unwrap();
    assert_eq!(p.trail(&r[0])[1..], ["  pool rx: set-state: known-allocated"]);
    p.validate_refs(&r, BufferState::KnownAllocated, 1);
}

#[test]
fn state_changes_reach_the_event_log() {
    let (main, p) = rx();
    let mut r = [Ref::default(); 1];
    p.alloc_refs(&mut r).unwrap();
    p.free_refs(&r, false).unwrap();
    let view = main.elog().new_view();
    let states = view.events_matching("state").unwrap();
    assert_eq!(states.len(), 2);
    let off = r[0].offset();
    assert_eq!(
        view.event_lines(states[0]),
        [format!("hw buf rx {off:#x} unknown -> known-allocated")]
    );
    assert_eq!(
        view.event_lines(states[1]),
        [format!("hw buf rx {off:#x} known-allocated -> known-free")]
    );
}

#[test]
#[should_panic(expected = "want known-allocated != got known-free")]
fn double_free_panics() {
    let (_main, p) = rx();
    let mut r = [Ref::default(); 1];
    p.alloc_refs(&mut r).unwrap();
    p.free_refs(&r, false).unwrap();
    let _ = p.free_refs(&r, false);
}

#[test]
#[should_panic(expected = "want known-allocated != got unknown")]
fn freeing_a_foreign_ref_panics() {
    let (_main, p) = rx();
    let stray = Ref::from(RefHeader::new(0x7fff_0000, 128, 10));
    let _ = p.free_refs(&[stray], false);
}

#[test]
#[should_panic(expected = "events for offset")]
fn trail_is_part_of_the_panic() {
    let (_main, p) = rx();
    let mut r = [Ref::default(); 1];
    p.alloc_refs(&mut r).unwrap();
    r[0].validate_state(&p, BufferState::KnownFree);
}

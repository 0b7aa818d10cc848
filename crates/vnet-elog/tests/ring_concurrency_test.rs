use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use vnet_elog::{Arg, Buffer, CallSite};

static SITE: CallSite = CallSite::new("ring::writer", file!(), line!(), "writer %d seq %d");

#[test]
fn concurrent_writers_produce_monotonic_views() {
    const THREADS: u64 = 8;
    const PER_THREAD: u64 = 5_000;

    let buf = Arc::new(Buffer::new(1 << 10));
    buf.enable(true);
    let clock = Arc::new(AtomicU64::new(1));
    let stop = Arc::new(AtomicBool::new(false));

    // Snapshot continuously while writers run; every view must be sorted and untorn.
    let reader = {
        let buf = Arc::clone(&buf);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut views = 0usize;
            while !stop.load(Ordering::Relaxed) {
                let v = buf.new_view();
                assert!(v.num_events() <= buf.cap());
                for i in 1..v.num_events() {
                    assert!(v.event(i - 1).timestamp <= v.event(i).timestamp);
                }
                for i in 0..v.num_events() {
                    let lines = v.event_lines(i);
                    assert_eq!(lines.len(), 1, "torn event {lines:?}");
                    assert!(lines[0].starts_with("writer "), "torn event {lines:?}");
                }
                views += 1;
            }
            views
        })
    };

    let writers: Vec<_> = (0..THREADS)
        .map(|t| {
            let buf = Arc::clone(&buf);
            let clock = Arc::clone(&clock);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let ts = clock.fetch_add(1, Ordering::SeqCst);
                    buf.add_with_timestamp(&SITE, ts, &[Arg::Uint(t), Arg::Uint(i)]);
                }
            })
        })
        .collect();
    for w in writers {
        w.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    assert!(reader.join().unwrap() > 0);

    let v = buf.new_view();
    assert_eq!(v.num_events(), buf.cap());
    let ts: Vec<u64> = (0..v.num_events()).map(|i| v.event(i).timestamp).collect();
    assert!(ts.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn overwrite_keeps_exactly_the_newest_capacity_events() {
    let buf = Buffer::new(64);
    buf.enable(true);
    let added = 64 * 3 + 17;
    for i in 0..added {
        buf.add_with_timestamp(&SITE, 1_000 + i, &[Arg::Uint(0), Arg::Uint(i)]);
    }
    let v = buf.new_view();
    assert_eq!(v.num_events(), 64);
    for i in 0..64 {
        let seq = added - 64 + i as u64;
        assert_eq!(v.event(i).timestamp, 1_000 + seq);
        assert_eq!(v.event_lines(i), vec![format!("writer 0 seq {seq}")]);
    }
}

#[test]
fn toggling_while_writing_never_blocks() {
    let buf = Arc::new(Buffer::new(128));
    let toggler = {
        let buf = Arc::clone(&buf);
        thread::spawn(move || {
            for i in 0..1_000 {
                buf.enable(i % 2 == 0);
            }
            buf.enable(true);
        })
    };
    for i in 0..10_000u64 {
        buf.f2u(&SITE, 1, i);
    }
    toggler.join().unwrap();
    buf.f2u(&SITE, 2, 0);
    let v = buf.new_view();
    assert!(v.num_events() >= 1);
    assert_eq!(v.event_lines(v.num_events() - 1), vec!["writer 2 seq 0"]);
}

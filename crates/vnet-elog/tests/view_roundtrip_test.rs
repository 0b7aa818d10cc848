use vnet_elog::{Arg, Buffer, CallSite, ElogError, View, elog};

static COLOR: CallSite = CallSite::new("view::color", file!(), line!(), "%s");

#[derive(Clone, Copy, Debug)]
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }
}

const COLORS: [&str; 6] = ["dark blue", "light blue", "green", "yellow", "orange", "red"];

fn colors_buffer() -> Buffer {
    let b = Buffer::new(64);
    b.enable(true);
    for (i, c) in COLORS.iter().enumerate() {
        b.log(&COLOR, &[Arg::Str(&format!("{c} {i}"))]);
    }
    b
}

#[test]
fn six_color_events_decode_in_order() {
    let v = colors_buffer().new_view();
    assert_eq!(v.num_events(), 6);
    for (i, c) in COLORS.iter().enumerate() {
        assert_eq!(v.event_lines(i), vec![format!("{c} {i}")]);
        assert_eq!(v.event_caller(i).name, "view::color");
    }
}

fn random_view(seed: u64) -> View {
    let mut rng = XorShift64::new(seed);
    let b = Buffer::new(256);
    b.enable(true);
    let mut ts = 0u64;
    for i in 0..200u64 {
        ts += rng.next_u64() % 50_000;
        let r = b.set_string(&format!("name-{}", rng.next_u64() % 7));
        match rng.next_u64() % 3 {
            0 => b.add_with_timestamp(&COLOR, ts, &[Arg::Ref(r)]),
            1 => elog!(b, "pkt %d len %x ok=%t", i, rng.next_u64() % 1500, i % 2 == 0),
            _ => elog!(b, "signed %d\nline two %s", -(i as i64), "tail"),
        }
    }
    b.new_view()
}

#[test]
fn save_restore_preserves_lines_and_callers() {
    for seed in [1, 7, 42] {
        let mut v = random_view(seed);
        v.set_name(format!("seed {seed}"));
        let mut bytes = Vec::new();
        v.save(&mut bytes).unwrap();
        let r = View::restore(&mut bytes.as_slice()).unwrap();
        assert_eq!(r.name(), v.name());
        assert_eq!(r.num_events(), v.num_events());
        for i in 0..v.num_events() {
            assert_eq!(r.event_lines(i), v.event_lines(i), "seed {seed} event {i}");
            assert_eq!(r.event_caller(i).name, v.event_caller(i).name);
            assert_eq!(r.elapsed_time(i), v.elapsed_time(i));
        }

        // A restored view saves to the same bytes.
        let mut again = Vec::new();
        r.save(&mut again).unwrap();
        assert_eq!(again, bytes);
    }
}

#[test]
fn sub_view_keeps_events_inside_window() {
    let mut rng = XorShift64::new(99);
    for _ in 0..20 {
        let mut v = random_view(rng.next_u64() | 1);
        let n = v.num_events();
        let first = v.elapsed_time(0);
        let last = v.elapsed_time(n - 1);
        let span = last - first;
        let a = first + span * (rng.next_u64() % 1000) as f64 / 1000.0;
        let b = first + span * (rng.next_u64() % 1000) as f64 / 1000.0;
        let kept = v.sub_view(a, b);
        assert!(kept <= n);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        for i in 0..kept {
            let t = v.elapsed_time(i);
            assert!(t >= lo && t <= hi, "{t} outside [{lo}, {hi}]");
        }
        let times = v.times();
        assert!(times.min_elapsed <= times.max_elapsed);
        v.reset();
        assert_eq!(v.num_events(), n);
    }
}

#[test]
fn file_round_trip_and_errors() {
    let v = colors_buffer().new_view();
    let path = std::env::temp_dir().join(format!("vnet-elog-roundtrip-{}.view", std::process::id()));
    v.save_file(&path).unwrap();
    let r = View::restore_file(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(r.event_lines(5), vec!["red 5"]);

    let missing = View::restore_file(std::path::Path::new("/nonexistent/elog.view"));
    assert!(matches!(missing, Err(ElogError::Io(_))));
}

#[test]
fn matching_then_printing_filtered_events() {
    let v = random_view(5);
    let matched = v.events_matching("^view::color$").unwrap();
    let mut out = Vec::new();
    v.print_events(&mut out, &matched, true).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().count(), matched.len() + 1);
    assert!(matches!(v.events_matching("[unclosed"), Err(ElogError::Regex(_))));
}

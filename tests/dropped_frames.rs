mod common;

use common::{headless_context, headless_options, open_simulated};

#[test]
fn one_late_frame_is_one_dropped_frame() {
    let (clock, ctx) = headless_context(vec![]);
    let mut win = open_simulated(&ctx, headless_options()).unwrap();
    win.set_refresh_threshold(1.2 / 60.0);
    win.set_record_frame_intervals(true);
    for i in 0..10 {
        if i == 5 {
            // the next swap misses one vertical blank
            clock.advance(1.5 / 60.0);
        }
        win.flip(true).unwrap();
    }
    assert_eq!(win.n_dropped_frames(), 1);
}

#[test]
fn intervals_are_written_to_a_log() {
    let (_clock, ctx) = headless_context(vec![]);
    let mut win = open_simulated(&ctx, headless_options()).unwrap();
    win.set_record_frame_intervals(true);
    for _ in 0..4 {
        win.flip(true).unwrap();
    }
    let path = std::env::temp_dir().join(format!("psywin-intervals-{}.log", std::process::id()));
    win.save_frame_intervals(Some(&path), true).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    std::fs::remove_file(&path).ok();
    assert!(!text.trim().is_empty());
    assert!(win.frame_intervals().is_empty());
}

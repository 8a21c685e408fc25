mod common;

use psywin::backends::headless::HeadlessDisplay;
use psywin::backends::negotiate::VideoMode;

use common::{headless_context, headless_options, open_simulated};

#[test]
fn non_power_of_two_msaa_is_disabled_not_fatal() {
    let (_clock, ctx) = headless_context(vec![]);
    let mut options = headless_options();
    options.multi_sample = true;
    options.num_samples = 3;
    let win = open_simulated(&ctx, options).unwrap();
    assert!(!win.multi_sample());
}

#[test]
fn msaa_beyond_the_driver_limit_is_disabled() {
    let (_clock, ctx) = headless_context(vec![HeadlessDisplay::default().with_max_samples(4)]);
    let win = open_simulated(&ctx, headless_options().with_multi_sample(8)).unwrap();
    assert!(!win.multi_sample());

    let (_clock, ctx) = headless_context(vec![HeadlessDisplay::default().with_max_samples(4)]);
    let win = open_simulated(&ctx, headless_options().with_multi_sample(4)).unwrap();
    assert!(win.multi_sample());
    assert_eq!(win.num_samples(), 4);
}

#[test]
fn unknown_screens_fall_back_to_the_first() {
    let (_clock, ctx) = headless_context(vec![
        HeadlessDisplay::new(1920, 1080, 60),
        HeadlessDisplay::new(1280, 1024, 75).with_position(1920, 0),
    ]);
    let win = open_simulated(&ctx, headless_options().with_screen(1)).unwrap();
    assert_eq!(win.screen(), 1);
    drop(win);

    let win = open_simulated(&ctx, headless_options().with_screen(5)).unwrap();
    assert_eq!(win.screen(), 0);
}

#[test]
fn fullscreen_takes_the_native_mode_when_the_request_is_unsupported() {
    let display = HeadlessDisplay::new(1920, 1080, 60).with_mode(VideoMode::new((1280, 720), (8, 8, 8), 120));
    let (_clock, ctx) = headless_context(vec![display]);

    let supported = headless_options()
        .with_size(1280, 720)
        .with_fullscr(true)
        .with_backend_conf(psywin::visual::window::BackendConf {
            refresh_hz: 120,
            swap_interval: 1,
        });
    let win = open_simulated(&ctx, supported).unwrap();
    assert_eq!(win.size(), (1280, 720));
    drop(win);

    let unsupported = headless_options().with_size(1000, 700).with_fullscr(true);
    let win = open_simulated(&ctx, unsupported).unwrap();
    assert_eq!(win.size(), (1920, 1080));
}

mod common;

use psywin::backends::WindowBackendKind;
use psywin::gamma::{GammaRamp, RampType};
use psywin::visual::frame_stats::FrameRateProbe;

use common::{headless_context, headless_options, open_simulated};
use psywin::backends::headless::HeadlessDisplay;

#[test]
fn pyglet_window_flips_records_and_closes() {
    let (_clock, ctx) = headless_context(vec![]);
    let kind: WindowBackendKind = "pyglet".parse().unwrap();
    let options = headless_options().with_win_type(kind).with_gamma(2.2);
    let mut win = open_simulated(&ctx, options).unwrap();
    assert_eq!(win.win_type(), WindowBackendKind::Winit);
    assert_eq!(ctx.n_open_windows(), 1);

    win.set_record_frame_intervals(true);
    for _ in 0..10 {
        win.flip(true).unwrap();
    }
    // the first flip after switching recording on only sets the reference
    assert_eq!(win.frame_intervals().len(), 9);
    assert_eq!(win.n_dropped_frames(), 0);
    for interval in win.frame_intervals() {
        assert!((interval - 1.0 / 60.0).abs() < 1e-9);
    }

    let corrected = ctx.headless_display(0).unwrap().gamma_ramp;
    assert!(!corrected.approx_eq(&GammaRamp::linear(256, RampType::Plain), 1e-6));

    win.close().unwrap();
    assert_eq!(ctx.n_open_windows(), 0);
    assert_eq!(ctx.current(), None);
    let restored = ctx.headless_display(0).unwrap().gamma_ramp;
    assert!(restored.approx_eq(&GammaRamp::linear(256, RampType::Plain), 1e-9));
}

#[test]
fn gamma_ramps_round_trip_and_are_restored() {
    let original = GammaRamp::from_gamma(256, RampType::Plain, [1.1, 1.2, 1.3]).unwrap();
    let display = HeadlessDisplay::default().with_gamma_ramp(original.clone());
    let (_clock, ctx) = headless_context(vec![display]);
    let mut win = open_simulated(&ctx, headless_options()).unwrap();

    let ramp = GammaRamp::from_gamma(256, RampType::Plain, [2.0, 2.2, 2.4]).unwrap();
    win.set_gamma_ramp(&ramp).unwrap();
    assert!(win.gamma_ramp().unwrap().approx_eq(&ramp, 1e-9));
    assert_eq!(win.gamma_ramp_size().unwrap(), 256);

    drop(win);
    let restored = ctx.headless_display(0).unwrap().gamma_ramp;
    assert!(restored.approx_eq(&original, 1e-9));
}

#[test]
fn measured_frame_rate_comes_from_a_stable_window() {
    let (_clock, ctx) = headless_context(vec![HeadlessDisplay::new(1920, 1080, 144)]);
    let mut win = open_simulated(&ctx, headless_options()).unwrap();
    let probe = FrameRateProbe::default();
    let rate = win.get_actual_frame_rate(probe).unwrap().unwrap();
    assert!((rate - 144.0).abs() < 1e-6);
    // measuring leaves no trace in the recorded intervals
    assert!(win.frame_intervals().is_empty());
    assert!(!win.record_frame_intervals());

    let impossible = FrameRateProbe {
        n_identical: 200,
        ..probe
    };
    assert!(win.get_actual_frame_rate(impossible).is_err());
}

#[test]
fn two_windows_share_one_context() {
    let (_clock, ctx) = headless_context(vec![]);
    let mut a = open_simulated(&ctx, headless_options().with_name("a")).unwrap();
    let mut b = open_simulated(&ctx, headless_options().with_name("b")).unwrap();
    assert_eq!(ctx.current(), Some(b.id()));
    a.flip(true).unwrap();
    assert_eq!(ctx.current(), Some(a.id()));
    b.close().unwrap();
    assert_eq!(ctx.n_open_windows(), 1);
    assert_eq!(ctx.open_windows()[0].name, "a");
}

#[test]
fn cancelled_experiments_stop_at_the_next_flip() {
    use psywin::context::RenderingContext;
    use psywin::errors::PsywinError;
    use psywin::runner::CancellationToken;

    let token = CancellationToken::new();
    let ctx = RenderingContext::builder()
        .clock(std::rc::Rc::new(psywin::clock::ManualClock::new()))
        .cancellation(token.clone())
        .build();
    let mut win = open_simulated(&ctx, headless_options()).unwrap();
    win.flip(true).unwrap();
    token.cancel();
    assert!(matches!(win.flip(true), Err(PsywinError::CancelledError)));
    win.close().unwrap();
}

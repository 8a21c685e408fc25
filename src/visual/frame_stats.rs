//! Frame-interval bookkeeping and the statistics derived from it.

use crate::errors::{PsywinError, Result};

/// Number of dropped frames reported individually before going quiet.
pub const REPORT_N_DROPPED_FRAMES: usize = 5;

/// Flip timestamps kept for `get_future_flip_time`.
pub const FRAME_TIMES_CAPACITY: usize = 1000;

/// What the dropped-frame monitor made of one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameReport {
    OnTime,
    /// Dropped and warned about.
    Dropped,
    /// The drop that triggered the "stop bothering you" notice.
    LastNotice,
    /// Dropped, but no longer reported.
    Silent,
}

/// Counts intervals longer than the refresh threshold and rate-limits the warnings.
#[derive(Debug, Clone, Default)]
pub struct DroppedFrameMonitor {
    n_dropped: usize,
}

impl DroppedFrameMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_dropped(&self) -> usize {
        self.n_dropped
    }

    pub fn check(&mut self, delta: f64, threshold: f64, now: f64) -> FrameReport {
        if delta <= threshold {
            return FrameReport::OnTime;
        }
        self.n_dropped += 1;
        if self.n_dropped < REPORT_N_DROPPED_FRAMES {
            log::warn!(
                "{:.4} \tt of last frame was {:.2}ms (=1/{})",
                now,
                delta * 1000.0,
                (1.0 / delta) as i64
            );
            FrameReport::Dropped
        } else if self.n_dropped == REPORT_N_DROPPED_FRAMES {
            log::warn!("Multiple dropped frames have occurred - I'll stop bothering you about them!");
            FrameReport::LastNotice
        } else {
            FrameReport::Silent
        }
    }
}

/// Records the interval between successive flips while recording is switched on.
#[derive(Debug, Clone, Default)]
pub struct FrameIntervalRecorder {
    recording: bool,
    just_turned_on: bool,
    last_frame_t: f64,
    frames: usize,
    intervals: Vec<f64>,
    dropped: DroppedFrameMonitor,
}

impl FrameIntervalRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Returns true when recording was off and is now on; the caller resets its frame
    /// clock in either case.
    pub fn set_recording(&mut self, on: bool) -> bool {
        self.just_turned_on = !self.recording && on;
        self.recording = on;
        self.just_turned_on
    }

    /// Book-keeping for a flip that completed at `now`. The first flip after recording
    /// was switched on only sets the reference time.
    pub fn on_flip(&mut self, now: f64, refresh_threshold: f64) -> Option<FrameReport> {
        if !self.recording {
            return None;
        }
        self.frames += 1;
        let delta = now - self.last_frame_t;
        self.last_frame_t = now;
        if self.just_turned_on {
            self.just_turned_on = false;
            return None;
        }
        self.intervals.push(delta);
        Some(self.dropped.check(delta, refresh_threshold, now))
    }

    pub fn intervals(&self) -> &[f64] {
        &self.intervals
    }

    pub fn clear_intervals(&mut self) {
        self.intervals.clear();
    }

    pub fn n_dropped_frames(&self) -> usize {
        self.dropped.n_dropped()
    }

    /// Frames counted since the last call, resetting the count.
    pub fn take_frames(&mut self) -> usize {
        std::mem::take(&mut self.frames)
    }
}

/// Settings for measuring the display's refresh rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRateProbe {
    /// Consecutive intervals that must agree.
    pub n_identical: usize,
    pub n_max_frames: usize,
    pub n_warm_up_frames: usize,
    /// Maximum standard deviation of the agreeing intervals, in ms.
    pub threshold_ms: f64,
}

impl Default for FrameRateProbe {
    fn default() -> Self {
        Self {
            n_identical: 10,
            n_max_frames: 100,
            n_warm_up_frames: 10,
            threshold_ms: 1.0,
        }
    }
}

impl FrameRateProbe {
    pub fn validate(&self) -> Result<()> {
        if self.n_identical > self.n_max_frames {
            return Err(PsywinError::InvalidOptionError(
                "Parameter `n_identical` must be equal to or less than `n_max_frames`".into(),
            ));
        }
        Ok(())
    }

    /// The rate implied by the trailing `n_identical` intervals, if there are enough of
    /// them and they are stable.
    pub fn stable_rate(&self, intervals: &[f64]) -> Option<f64> {
        let recent = &intervals[intervals.len().saturating_sub(self.n_identical)..];
        if recent.len() < 3 || intervals.len() < self.n_identical {
            return None;
        }
        if std_dev(recent) < self.threshold_ms / 1000.0 {
            let period = mean(recent);
            (period > 0.0).then(|| 1.0 / period)
        } else {
            None
        }
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> f64 {
    let m = mean(values);
    (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64).sqrt()
}

/// Refresh timing measured by `Window::get_ms_per_frame`, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MsPerFrame {
    pub mean_ms: f64,
    pub std_ms: f64,
    /// Mean of the frame times around the median.
    pub median_ms: f64,
}

/// How many frame times around the median are averaged.
const N_AROUND_MEDIAN: usize = 12;

impl MsPerFrame {
    /// Statistics of the intervals between successive `timestamps` (seconds).
    pub fn from_timestamps(timestamps: &[f64]) -> Option<Self> {
        let mut frame_times: Vec<f64> = timestamps.windows(2).map(|w| w[1] - w[0]).collect();
        if frame_times.is_empty() {
            return None;
        }
        frame_times.sort_by(|a, b| a.total_cmp(b));
        let n = frame_times.len();
        let lo = n.saturating_sub(N_AROUND_MEDIAN) / 2;
        let hi = ((n + N_AROUND_MEDIAN) / 2).min(n);
        Some(Self {
            mean_ms: 1000.0 * mean(&frame_times),
            std_ms: 1000.0 * std_dev(&frame_times),
            median_ms: 1000.0 * mean(&frame_times[lo..hi.max(lo + 1)]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_gap_is_one_drop() {
        let mut rec = FrameIntervalRecorder::new();
        assert!(rec.set_recording(true));
        let threshold = 1.2 / 60.0;
        let mut t = 0.0;
        let mut reports = Vec::new();
        for i in 0..10 {
            t += if i == 5 { 2.0 / 60.0 } else { 1.0 / 60.0 };
            reports.extend(rec.on_flip(t, threshold));
        }
        // first flip only sets the reference time
        assert_eq!(rec.intervals().len(), 9);
        assert_eq!(rec.n_dropped_frames(), 1);
        assert_eq!(
            reports.iter().filter(|r| **r == FrameReport::Dropped).count(),
            1
        );
    }

    #[test]
    fn warnings_stop_after_the_fifth_drop() {
        let mut monitor = DroppedFrameMonitor::new();
        let reports: Vec<_> = (0..7).map(|_| monitor.check(0.1, 0.02, 0.0)).collect();
        assert_eq!(
            reports,
            vec![
                FrameReport::Dropped,
                FrameReport::Dropped,
                FrameReport::Dropped,
                FrameReport::Dropped,
                FrameReport::LastNotice,
                FrameReport::Silent,
                FrameReport::Silent,
            ]
        );
        assert_eq!(monitor.n_dropped(), 7);
        assert_eq!(monitor.check(0.01, 0.02, 0.0), FrameReport::OnTime);
    }

    #[test]
    fn intervals_are_ignored_while_not_recording() {
        let mut rec = FrameIntervalRecorder::new();
        assert_eq!(rec.on_flip(1.0, 0.02), None);
        assert_eq!(rec.take_frames(), 0);
        rec.set_recording(true);
        rec.on_flip(2.0, 0.02);
        rec.on_flip(2.5, 0.02);
        assert_eq!(rec.intervals(), &[0.5]);
        assert_eq!(rec.take_frames(), 2);
        assert_eq!(rec.take_frames(), 0);
        // switching on again while on is not a fresh start
        assert!(!rec.set_recording(true));
    }

    #[test]
    fn stable_rate_needs_n_identical_samples() {
        let probe = FrameRateProbe::default();
        let steady = vec![1.0 / 60.0; 9];
        assert_eq!(probe.stable_rate(&steady), None);
        let steady = vec![1.0 / 60.0; 10];
        let rate = probe.stable_rate(&steady).unwrap();
        assert!((rate - 60.0).abs() < 1e-9);

        let mut jittery = vec![1.0 / 60.0; 10];
        jittery[9] = 1.0 / 30.0;
        assert_eq!(probe.stable_rate(&jittery), None);
        assert_eq!(probe.stable_rate(&[0.01, 0.01]), None);
    }

    #[test]
    fn probe_rejects_impossible_settings() {
        let probe = FrameRateProbe {
            n_identical: 20,
            n_max_frames: 10,
            ..Default::default()
        };
        assert!(probe.validate().is_err());
        assert!(FrameRateProbe::default().validate().is_ok());
    }

    #[test]
    fn ms_per_frame_statistics() {
        let timestamps: Vec<f64> = (0..61).map(|i| i as f64 * 0.01).collect();
        let stats = MsPerFrame::from_timestamps(&timestamps).unwrap();
        assert!((stats.mean_ms - 10.0).abs() < 1e-9);
        assert!(stats.std_ms < 1e-9);
        assert!((stats.median_ms - 10.0).abs() < 1e-9);
        assert!(MsPerFrame::from_timestamps(&[1.0]).is_none());
    }
}

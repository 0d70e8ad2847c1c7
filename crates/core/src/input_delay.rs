//! Adaptive input-delay estimator: tracks a rolling window of round-trip
//! samples and converts the smoothed one-way latency into a frame count,
//! so the client can submit input far enough ahead that it lands before
//! the server simulates the frame it targets.

use std::collections::VecDeque;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::RTT_SAMPLE_WINDOW;

const MIN_REASONABLE_RTT_MS: u32 = 1;
const MAX_REASONABLE_RTT_MS: u32 = 10_000;

pub struct InputDelayController {
    samples: VecDeque<u32>,
    last_avg_rtt_ms: f32,
    last_input_delay_frames: u32,
}

impl Default for InputDelayController {
    fn default() -> Self {
        InputDelayController {
            samples: VecDeque::with_capacity(RTT_SAMPLE_WINDOW),
            last_avg_rtt_ms: 0.0,
            last_input_delay_frames: 1,
        }
    }
}

impl InputDelayController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Milliseconds since the epoch, truncated to 32 bits, matching the
    /// wire's `u32 timestamp_ms` field width.
    pub fn timestamp_ms() -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u32
    }

    /// Processes one `INPUT_DELAY` echo: `now_ms` is the current wall
    /// clock, `sent_timestamp_ms` is the value this client stamped the
    /// outgoing probe with. Returns the newly computed `input_delay_frames`
    /// if the sample was accepted, or `None` if it fell outside the sanity
    /// band `[1ms, 10000ms]`.
    pub fn update_rtt(&mut self, now_ms: u32, sent_timestamp_ms: u32, tick_rate: u32) -> Option<u32> {
        let rtt_ms = now_ms.wrapping_sub(sent_timestamp_ms);
        if rtt_ms < MIN_REASONABLE_RTT_MS || rtt_ms > MAX_REASONABLE_RTT_MS {
            return None;
        }

        if self.samples.len() >= RTT_SAMPLE_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt_ms);

        let sum: u32 = self.samples.iter().sum();
        self.last_avg_rtt_ms = sum as f32 / self.samples.len() as f32;

        let latency_ms = self.last_avg_rtt_ms / 2.0;
        let frame_ms = 1000.0 / tick_rate as f32;
        self.last_input_delay_frames = (latency_ms / frame_ms).ceil().max(1.0) as u32;

        Some(self.last_input_delay_frames)
    }

    pub fn input_delay_frames(&self) -> u32 {
        self.last_input_delay_frames
    }

    pub fn avg_rtt_ms(&self) -> f32 {
        self.last_avg_rtt_ms
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtt_outside_sanity_band_is_discarded() {
        let mut ctl = InputDelayController::new();
        assert!(ctl.update_rtt(1000, 1000, 30).is_none()); // rtt = 0ms, below MIN
        assert_eq!(ctl.sample_count(), 0);
        assert!(ctl.update_rtt(20_000, 1_000, 30).is_none()); // rtt = 19000ms, above MAX
        assert_eq!(ctl.sample_count(), 0);
    }

    #[test]
    fn input_delay_matches_windowed_rtt() {
        let mut ctl = InputDelayController::new();
        let rtts = [40u32, 44, 38, 300, 42];
        let mut last = None;
        for rtt in rtts {
            last = ctl.update_rtt(rtt, 0, 30);
        }
        assert_eq!(ctl.sample_count(), 5);
        // avg_rtt = 92.8ms, latency = 46.4ms, frame_ms ~ 33.33ms -> ceil(1.392) = 2
        assert_eq!(last, Some(2));
        assert_eq!(ctl.input_delay_frames(), 2);
        assert!((ctl.avg_rtt_ms() - 92.8).abs() < 0.01);
    }

    #[test]
    fn window_keeps_only_the_last_five_samples() {
        let mut ctl = InputDelayController::new();
        for rtt in [10u32, 10, 10, 10, 10, 100] {
            ctl.update_rtt(rtt, 0, 30);
        }
        assert_eq!(ctl.sample_count(), 5);
        // last five samples are [10,10,10,10,100] -> avg = 28ms
        assert!((ctl.avg_rtt_ms() - 28.0).abs() < 0.01);
    }

    #[test]
    fn input_delay_frames_never_reported_below_one() {
        let mut ctl = InputDelayController::new();
        ctl.update_rtt(2, 0, 30);
        assert!(ctl.input_delay_frames() >= 1);
    }
}

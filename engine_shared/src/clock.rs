//! Clock synchronization: RTT/offset estimation from ping/pong round trips.
//!
//! Every peer runs one `ClockSync` tracking its estimate of the remote's
//! clock relative to its own `Instant`-based local clock. Only the client
//! actually needs `remote_now()` (to know the server's tick), but the
//! estimator itself is symmetric, so the server can run one too for
//! diagnostics without extra code.

use std::time::{Duration, Instant};

const EMA_ALPHA: f64 = 0.1;
const OUTLIER_REJECT_FACTOR: f64 = 3.0;
const ACK_HISTORY: usize = 128;

/// One completed ping/pong round trip.
#[derive(Debug, Clone, Copy)]
pub struct PingSample {
    pub rtt: Duration,
    /// Estimated `remote_clock - local_clock` at the moment of this sample.
    pub offset: Duration,
    /// Sign of the offset: true if the remote clock reads ahead of ours.
    pub remote_ahead: bool,
}

#[derive(Debug)]
pub struct ClockSync {
    rtt_ema: Option<f64>,
    offset_ema_secs: Option<f64>,
    offset_ahead: bool,
    samples_taken: u32,
    outliers_rejected: u32,
    /// Ring of the last `ACK_HISTORY` send slots: true if acked, used to
    /// derive a loss ratio for diagnostics.
    ack_history: Vec<bool>,
    ack_cursor: usize,
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSync {
    pub fn new() -> Self {
        Self {
            rtt_ema: None,
            offset_ema_secs: None,
            offset_ahead: false,
            samples_taken: 0,
            outliers_rejected: 0,
            ack_history: Vec::new(),
            ack_cursor: 0,
        }
    }

    /// Current smoothed round-trip time, or `None` before the first sample.
    pub fn rtt(&self) -> Option<Duration> {
        self.rtt_ema.map(Duration::from_secs_f64)
    }

    /// Best current estimate of `remote_clock - local_clock`.
    pub fn offset(&self) -> Duration {
        Duration::from_secs_f64(self.offset_ema_secs.unwrap_or(0.0))
    }

    pub fn offset_is_remote_ahead(&self) -> bool {
        self.offset_ahead
    }

    /// Projects the remote's clock reading for `local_instant`.
    pub fn remote_now(&self, local_instant: Instant) -> Instant {
        if self.offset_ahead {
            local_instant + self.offset()
        } else {
            local_instant
                .checked_sub(self.offset())
                .unwrap_or(local_instant)
        }
    }

    /// Records one ping/pong round trip. `sent_at`/`received_at` are local
    /// timestamps of the ping send and pong receive; `remote_timestamp_offset`
    /// is how far into the RTT window the remote reported itself when it
    /// produced the pong (0 = as soon as the ping landed).
    ///
    /// Outliers (`rtt > 3x` the current EMA) are rejected so one congested
    /// link spike doesn't yank the estimate around.
    pub fn record_round_trip(&mut self, sent_at: Instant, received_at: Instant, remote_processing: Duration) -> Option<PingSample> {
        let rtt = received_at.saturating_duration_since(sent_at).saturating_sub(remote_processing);
        let rtt_secs = rtt.as_secs_f64();

        if let Some(ema) = self.rtt_ema {
            if rtt_secs > ema * OUTLIER_REJECT_FACTOR && self.samples_taken >= 4 {
                self.outliers_rejected += 1;
                return None;
            }
        }

        self.rtt_ema = Some(match self.rtt_ema {
            Some(ema) => ema + EMA_ALPHA * (rtt_secs - ema),
            None => rtt_secs,
        });

        // The remote's clock, at the moment it produced the pong, read
        // `sent_at + rtt/2 + remote_processing` in our local time if clocks
        // agreed; any difference from that is the offset.
        let midpoint = sent_at + rtt / 2;
        let remote_reported_at = midpoint + remote_processing;
        let (offset, ahead) = signed_duration(remote_reported_at, received_at);
        let offset_secs = offset.as_secs_f64();
        let signed_offset_secs = if ahead { offset_secs } else { -offset_secs };

        let smoothed = match self.offset_ema_secs {
            Some(prev) => {
                let prev_signed = if self.offset_ahead { prev } else { -prev };
                prev_signed + EMA_ALPHA * (signed_offset_secs - prev_signed)
            }
            None => signed_offset_secs,
        };
        self.offset_ahead = smoothed >= 0.0;
        self.offset_ema_secs = Some(smoothed.abs());

        self.samples_taken += 1;
        Some(PingSample {
            rtt,
            offset: self.offset(),
            remote_ahead: self.offset_ahead,
        })
    }

    /// Records whether the datagram sent `ACK_HISTORY` slots ago for this
    /// peer was ultimately acknowledged, for a rolling loss ratio.
    pub fn record_ack_slot(&mut self, acked: bool) {
        if self.ack_history.len() < ACK_HISTORY {
            self.ack_history.push(acked);
        } else {
            self.ack_history[self.ack_cursor] = acked;
        }
        self.ack_cursor = (self.ack_cursor + 1) % ACK_HISTORY;
    }

    /// Fraction of the last (up to 128) recorded send slots that were never acked.
    pub fn loss_ratio(&self) -> f32 {
        if self.ack_history.is_empty() {
            return 0.0;
        }
        let lost = self.ack_history.iter().filter(|acked| !**acked).count();
        lost as f32 / self.ack_history.len() as f32
    }

    pub fn samples_taken(&self) -> u32 {
        self.samples_taken
    }

    pub fn outliers_rejected(&self) -> u32 {
        self.outliers_rejected
    }
}

fn signed_duration(a: Instant, b: Instant) -> (Duration, bool) {
    if a >= b {
        (a - b, true)
    } else {
        (b - a, false)
    }
}

/// Cadence for ping scheduling: a fast burst while the estimate is fresh,
/// then a slow steady-state rate once it has settled.
pub struct PingSchedule {
    burst_remaining: u32,
}

impl Default for PingSchedule {
    fn default() -> Self {
        Self { burst_remaining: 5 }
    }
}

impl PingSchedule {
    /// Interval until the next ping should be sent, given `samples_taken` so far.
    pub fn next_interval(&mut self, samples_taken: u32) -> Duration {
        if samples_taken < 5 {
            Duration::from_millis(100)
        } else {
            Duration::from_secs(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtt_converges_toward_steady_samples() {
        let mut sync = ClockSync::new();
        let t0 = Instant::now();
        for i in 0..50 {
            let sent = t0 + Duration::from_millis(i * 100);
            let received = sent + Duration::from_millis(40);
            sync.record_round_trip(sent, received, Duration::ZERO);
        }
        let rtt = sync.rtt().unwrap();
        assert!(rtt.as_millis() > 30 && rtt.as_millis() < 50, "rtt={:?}", rtt);
    }

    #[test]
    fn outlier_rtt_is_rejected_after_warmup() {
        let mut sync = ClockSync::new();
        let t0 = Instant::now();
        for i in 0..10 {
            let sent = t0 + Duration::from_millis(i * 100);
            sync.record_round_trip(sent, sent + Duration::from_millis(40), Duration::ZERO);
        }
        let before = sync.rtt().unwrap();
        let spike_sent = t0 + Duration::from_millis(2000);
        let result = sync.record_round_trip(spike_sent, spike_sent + Duration::from_millis(2000), Duration::ZERO);
        assert!(result.is_none());
        assert_eq!(sync.rtt().unwrap(), before);
        assert_eq!(sync.outliers_rejected(), 1);
    }

    #[test]
    fn remote_ahead_clock_offsets_forward() {
        let mut sync = ClockSync::new();
        let t0 = Instant::now();
        // Remote reports itself 200ms ahead of the RTT midpoint, consistently.
        for i in 0..20 {
            let sent = t0 + Duration::from_millis(i * 150);
            let received = sent + Duration::from_millis(40);
            sync.record_round_trip(sent, received, Duration::from_millis(200));
        }
        assert!(sync.offset_is_remote_ahead());
        assert!(sync.offset() >= Duration::from_millis(100));
    }

    #[test]
    fn loss_ratio_reflects_unacked_slots() {
        let mut sync = ClockSync::new();
        for _ in 0..8 {
            sync.record_ack_slot(true);
        }
        for _ in 0..2 {
            sync.record_ack_slot(false);
        }
        assert!((sync.loss_ratio() - 0.2).abs() < 1e-6);
    }

    #[test]
    fn ping_schedule_bursts_then_settles() {
        let mut schedule = PingSchedule::default();
        assert_eq!(schedule.next_interval(0), Duration::from_millis(100));
        assert_eq!(schedule.next_interval(4), Duration::from_millis(100));
        assert_eq!(schedule.next_interval(5), Duration::from_secs(1));
    }
}

/// Per-second rate between two readings of a cumulative counter.
///
/// Returns 0 when no time has elapsed (or the clock went backwards) and when
/// the counter went down, which happens on interface resets and wraparound.
pub fn compute_rate(current: u64, previous: u64, delta_seconds: f64) -> f64 {
    if delta_seconds <= 0.0 || !delta_seconds.is_finite() {
        return 0.0;
    }
    let rate = (current as f64 - previous as f64) / delta_seconds;
    if rate.is_finite() { rate.max(0.0) } else { 0.0 }
}

/// Per-second rate of an amount that already covers just one interval.
pub fn per_second(amount: u64, delta_seconds: f64) -> f64 {
    compute_rate(amount, 0, delta_seconds)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateState {
    pub previous_value: u64,
    pub previous_timestamp_ms: u64,
}

/// Remembers the last reading of one counter between sampling cycles.
#[derive(Clone, Debug, Default)]
pub struct RateTracker {
    state: Option<RateState>,
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reading and return the rate since the previous one.
    /// The first reading only seeds the state and yields 0.
    pub fn update(&mut self, current: u64, timestamp_ms: u64) -> f64 {
        let rate = match self.state {
            Some(prev) => compute_rate(
                current,
                prev.previous_value,
                elapsed_seconds(prev.previous_timestamp_ms, timestamp_ms),
            ),
            None => 0.0,
        };
        self.state = Some(RateState {
            previous_value: current,
            previous_timestamp_ms: timestamp_ms,
        });
        rate
    }

    pub fn state(&self) -> Option<RateState> {
        self.state
    }
}

/// Seconds from `earlier_ms` to `later_ms`, 0 if the clock went backwards.
pub fn elapsed_seconds(earlier_ms: u64, later_ms: u64) -> f64 {
    later_ms.saturating_sub(earlier_ms) as f64 / 1000.0
}

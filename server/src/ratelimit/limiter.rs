//! Fixed-window rate limiter with 429 cool-down.
//!
//! Pure policy: no clocks are read here, callers pass `now`. The reply worker
//! owns one [`RateLimiterState`] per queue; the inbound slow-down middleware
//! owns another.

use std::time::{Duration, Instant};

/// Throughput budget: at most `max` admissions per `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum admissions allowed in one window
    pub max: u32,
    /// Window length
    pub duration: Duration,
}

impl RateLimit {
    #[must_use]
    pub const fn new(max: u32, duration: Duration) -> Self {
        Self { max, duration }
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The attempt may proceed now.
    Admit,
    /// The attempt must wait at least `retry_after`.
    Deny { retry_after: Duration },
}

impl Admission {
    #[must_use]
    pub const fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit)
    }
}

/// Mutable window and throttle state.
#[derive(Debug, Clone, Default)]
pub struct RateLimiterState {
    window_start: Option<Instant>,
    count: u32,
    throttled_until: Option<Instant>,
}

impl RateLimiterState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Same decision as [`Self::try_admit`] without counting the attempt.
    #[must_use]
    pub fn peek(&self, limit: &RateLimit, now: Instant) -> Admission {
        if let Some(until) = self.throttled_until {
            if now < until {
                return Admission::Deny {
                    retry_after: until - now,
                };
            }
        }
        match self.window_start {
            Some(start)
                if now.saturating_duration_since(start) < limit.duration
                    && self.count >= limit.max =>
            {
                Admission::Deny {
                    retry_after: (start + limit.duration).saturating_duration_since(now),
                }
            }
            _ => Admission::Admit,
        }
    }

    /// Decides whether one more attempt may run at `now`, counting it if so.
    pub fn try_admit(&mut self, limit: &RateLimit, now: Instant) -> Admission {
        if let Some(until) = self.throttled_until {
            if now < until {
                return Admission::Deny {
                    retry_after: until - now,
                };
            }
            self.throttled_until = None;
        }

        let window_start = match self.window_start {
            Some(start) if now.saturating_duration_since(start) < limit.duration => start,
            _ => {
                self.window_start = Some(now);
                self.count = 0;
                now
            }
        };

        if self.count < limit.max {
            self.count += 1;
            Admission::Admit
        } else {
            let window_end = window_start + limit.duration;
            Admission::Deny {
                retry_after: window_end.saturating_duration_since(now),
            }
        }
    }

    /// Imposes a cool-down after a rate-limit signal and returns its end.
    ///
    /// An existing, longer cool-down is kept.
    pub fn throttle(&mut self, cool_down: Duration, now: Instant) -> Instant {
        let until = now + cool_down;
        let until = match self.throttled_until {
            Some(existing) if existing > until => existing,
            _ => until,
        };
        self.throttled_until = Some(until);
        until
    }

    #[must_use]
    pub fn is_throttled(&self, now: Instant) -> bool {
        self.throttled_until.is_some_and(|until| now < until)
    }

    #[must_use]
    pub const fn throttled_until(&self) -> Option<Instant> {
        self.throttled_until
    }
}

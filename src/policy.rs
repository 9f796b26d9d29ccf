//! Daily blackout window and buffer rules.
//!
//! The blackout is a wall-clock interval that recurs every day in one
//! canonical UTC offset. Task timezones are not consulted.

use std::fmt;

use crate::model::*;

/// True if `interval` intersects `blackout` (half-open).
pub fn overlaps(interval: &Span, blackout: &Span) -> bool {
    interval.overlaps(blackout)
}

/// Move `interval` so it starts `buffer` after the blackout ends.
/// Identity when the two do not intersect.
pub fn clamp_after(interval: &Span, blackout: &Span, buffer: Ms) -> Span {
    if !overlaps(interval, blackout) {
        return *interval;
    }
    interval.shifted_to(blackout.end + buffer)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlackoutPolicy {
    /// Offset of the window start from local midnight.
    window_start: Ms,
    /// Offset of the window end from local midnight.
    window_end: Ms,
    /// Local time minus UTC.
    utc_offset: Ms,
    buffer: Ms,
    insert_buffer: Ms,
}

impl Default for BlackoutPolicy {
    /// 12:00–12:30 UTC, 5 minute buffer, 30 minute insertion gap.
    fn default() -> Self {
        Self {
            window_start: 12 * HOUR_MS,
            window_end: 12 * HOUR_MS + 30 * MINUTE_MS,
            utc_offset: 0,
            buffer: 5 * MINUTE_MS,
            insert_buffer: 30 * MINUTE_MS,
        }
    }
}

impl BlackoutPolicy {
    pub fn new(
        window_start: Ms,
        window_end: Ms,
        utc_offset: Ms,
        buffer: Ms,
        insert_buffer: Ms,
    ) -> Result<Self, PolicyError> {
        if window_start < 0 || window_end > DAY_MS || window_start >= window_end {
            return Err(PolicyError("blackout window must satisfy 00:00 <= start < end <= 24:00"));
        }
        if buffer < 0 || insert_buffer < 0 {
            return Err(PolicyError("buffers must not be negative"));
        }
        if utc_offset.abs() >= DAY_MS {
            return Err(PolicyError("utc offset must be within one day"));
        }
        if window_end - window_start + buffer >= DAY_MS {
            return Err(PolicyError("blackout window plus buffer leaves no schedulable time"));
        }
        Ok(Self {
            window_start,
            window_end,
            utc_offset,
            buffer,
            insert_buffer,
        })
    }

    pub fn with_buffers(self, buffer: Ms, insert_buffer: Ms) -> Result<Self, PolicyError> {
        Self::new(
            self.window_start,
            self.window_end,
            self.utc_offset,
            buffer,
            insert_buffer,
        )
    }

    pub fn buffer(&self) -> Ms {
        self.buffer
    }

    pub fn insert_buffer(&self) -> Ms {
        self.insert_buffer
    }

    /// Longest task that fits between two consecutive blackouts.
    pub fn max_task_duration(&self) -> Ms {
        DAY_MS - (self.window_end - self.window_start) - self.buffer
    }

    /// The blackout occurrence on local day `day` (days since the epoch).
    pub fn occurrence_on(&self, day: i64) -> Span {
        let midnight = day * DAY_MS - self.utc_offset;
        Span::new(midnight + self.window_start, midnight + self.window_end)
    }

    fn local_day(&self, t: Ms) -> i64 {
        (t + self.utc_offset).div_euclid(DAY_MS)
    }

    /// Earliest occurrence intersecting `span`, if any.
    pub fn occurrence_overlapping(&self, span: &Span) -> Option<Span> {
        let first = self.local_day(span.start);
        let last = self.local_day(span.end - 1);
        (first..=last)
            .map(|day| self.occurrence_on(day))
            .find(|occ| overlaps(span, occ))
    }

    /// Push `span` forward until it clears every blackout occurrence.
    ///
    /// Callers must reject spans longer than `max_task_duration` first;
    /// such a span can never clear the window.
    pub fn clamp(&self, span: Span) -> Span {
        debug_assert!(span.duration_ms() <= self.max_task_duration());
        let mut span = span;
        while let Some(blackout) = self.occurrence_overlapping(&span) {
            span = clamp_after(&span, &blackout, self.buffer);
        }
        span
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyError(&'static str);

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid blackout policy: {}", self.0)
    }
}

impl std::error::Error for PolicyError {}

#[cfg(test)]
mod tests {
    use super::*;

    const M: Ms = MINUTE_MS;
    const H: Ms = HOUR_MS;
    /// 2024-03-04T00:00:00Z
    const DAY0: Ms = 1_709_510_400_000;

    #[test]
    fn clamp_after_moves_to_blackout_end_plus_buffer() {
        let blackout = Span::new(12 * H, 12 * H + 30 * M);
        let moved = clamp_after(&Span::new(12 * H, 12 * H + 30 * M), &blackout, 5 * M);
        assert_eq!(moved, Span::new(12 * H + 35 * M, 13 * H + 5 * M));
    }

    #[test]
    fn clamp_after_is_identity_when_clear() {
        let blackout = Span::new(12 * H, 12 * H + 30 * M);
        let s = Span::new(11 * H, 12 * H); // ends exactly at blackout start
        assert_eq!(clamp_after(&s, &blackout, 5 * M), s);
    }

    #[test]
    fn occurrence_found_on_each_day() {
        let policy = BlackoutPolicy::default();
        let monday = Span::new(DAY0 + 11 * H, DAY0 + 13 * H);
        assert_eq!(
            policy.occurrence_overlapping(&monday),
            Some(Span::new(DAY0 + 12 * H, DAY0 + 12 * H + 30 * M))
        );
        let tuesday = Span::new(DAY0 + DAY_MS + 12 * H + 10 * M, DAY0 + DAY_MS + 12 * H + 20 * M);
        assert_eq!(
            policy.occurrence_overlapping(&tuesday),
            Some(policy.occurrence_on((DAY0 + DAY_MS) / DAY_MS))
        );
        let evening = Span::new(DAY0 + 18 * H, DAY0 + 19 * H);
        assert_eq!(policy.occurrence_overlapping(&evening), None);
    }

    #[test]
    fn clamp_into_blackout_lands_at_twelve_thirty_five() {
        let policy = BlackoutPolicy::default();
        let clamped = policy.clamp(Span::new(DAY0 + 12 * H, DAY0 + 12 * H + 30 * M));
        assert_eq!(clamped.start, DAY0 + 12 * H + 35 * M);
        assert_eq!(clamped.duration_ms(), 30 * M);
    }

    #[test]
    fn clamp_leaves_post_blackout_gap_alone() {
        // Starts after the window ends but inside the buffer: not an intersection.
        let policy = BlackoutPolicy::default();
        let s = Span::new(DAY0 + 12 * H + 32 * M, DAY0 + 13 * H);
        assert_eq!(policy.clamp(s), s);
    }

    #[test]
    fn utc_offset_moves_the_window() {
        // 12:00-12:30 at +05:30 is 06:30-07:00 UTC.
        let policy = BlackoutPolicy::new(12 * H, 12 * H + 30 * M, 5 * H + 30 * M, 5 * M, 30 * M).unwrap();
        let s = Span::new(DAY0 + 6 * H + 45 * M, DAY0 + 7 * H + 15 * M);
        assert_eq!(
            policy.occurrence_overlapping(&s),
            Some(Span::new(DAY0 + 6 * H + 30 * M, DAY0 + 7 * H))
        );
        assert_eq!(policy.clamp(s).start, DAY0 + 7 * H + 5 * M);
        // Noon UTC is clear at this offset.
        let noon = Span::new(DAY0 + 12 * H, DAY0 + 12 * H + 30 * M);
        assert_eq!(policy.clamp(noon), noon);
    }

    #[test]
    fn long_task_clears_next_day_window() {
        let policy = BlackoutPolicy::default();
        let longest = policy.max_task_duration();
        let s = Span::new(DAY0 + 12 * H, DAY0 + 12 * H + longest);
        let clamped = policy.clamp(s);
        assert_eq!(clamped.start, DAY0 + 12 * H + 35 * M);
        assert!(policy.occurrence_overlapping(&clamped).is_none());
    }

    #[test]
    fn rejects_degenerate_windows() {
        assert!(BlackoutPolicy::new(13 * H, 12 * H, 0, 0, 0).is_err());
        assert!(BlackoutPolicy::new(0, DAY_MS, 0, 0, 0).is_err());
        assert!(BlackoutPolicy::new(12 * H, 13 * H, 0, -1, 0).is_err());
        assert!(BlackoutPolicy::new(12 * H, 13 * H, DAY_MS, 0, 0).is_err());
        assert!(BlackoutPolicy::default().with_buffers(10 * M, 0).is_ok());
    }
}

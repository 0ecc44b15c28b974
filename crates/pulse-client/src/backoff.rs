use std::time::Duration;

/// Bounded exponential backoff for stream reconnects.
///
/// Reconnection pauses entirely while the tab is hidden; regaining
/// visibility retries immediately if an attempt was deferred. A successful
/// reconnect resets the schedule to the base delay.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max_delay: Duration,
    max_attempts: u32,
    attempts: u32,
    visible: bool,
    deferred: bool,
}

impl Backoff {
    pub const DEFAULT_BASE: Duration = Duration::from_secs(1);
    pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

    pub fn new(base: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_delay,
            max_attempts,
            attempts: 0,
            visible: true,
            deferred: false,
        }
    }

    /// Delay to wait before the next reconnect attempt.
    ///
    /// `None` means "do not reconnect now": either the bounded retry count
    /// is exhausted, or the tab is hidden (in which case the attempt is
    /// remembered and replayed by [`set_visible`](Self::set_visible)).
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.visible {
            self.deferred = true;
            return None;
        }
        if self.attempts >= self.max_attempts {
            return None;
        }

        // Exponent capped so the shift can't overflow before max_delay kicks in.
        let exp = self.attempts.min(16);
        let delay = self
            .base
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        self.attempts += 1;
        Some(delay)
    }

    /// A connection was established; the schedule starts over.
    pub fn on_success(&mut self) {
        self.attempts = 0;
        self.deferred = false;
    }

    /// Track tab visibility. Returns true when a reconnect deferred while
    /// hidden should be attempted immediately.
    pub fn set_visible(&mut self, visible: bool) -> bool {
        self.visible = visible;
        visible && std::mem::take(&mut self.deferred)
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(
            Self::DEFAULT_BASE,
            Self::DEFAULT_MAX_DELAY,
            Self::DEFAULT_MAX_ATTEMPTS,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_up_to_the_cap() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(8), 10);
        assert_eq!(b.next_delay(), Some(Duration::from_secs(1)));
        assert_eq!(b.next_delay(), Some(Duration::from_secs(2)));
        assert_eq!(b.next_delay(), Some(Duration::from_secs(4)));
        assert_eq!(b.next_delay(), Some(Duration::from_secs(8)));
        assert_eq!(b.next_delay(), Some(Duration::from_secs(8)));
    }

    #[test]
    fn retry_count_is_bounded_and_resets_on_success() {
        let mut b = Backoff::new(Duration::from_millis(10), Duration::from_secs(1), 2);
        assert!(b.next_delay().is_some());
        assert!(b.next_delay().is_some());
        assert_eq!(b.next_delay(), None);
        assert!(b.is_exhausted());

        b.on_success();
        assert!(!b.is_exhausted());
        assert_eq!(b.next_delay(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn hidden_tab_defers_and_visibility_regain_retries_immediately() {
        let mut b = Backoff::default();
        assert!(!b.set_visible(false));
        assert_eq!(b.next_delay(), None);

        // Regaining visibility replays the deferred attempt once.
        assert!(b.set_visible(true));
        assert!(!b.set_visible(true));
        assert!(b.next_delay().is_some());
    }
}

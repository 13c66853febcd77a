//! # Restart throttle for crashed listeners.
//!
//! [`ListenerBackoff`] tracks recent listener start/death events and tells
//! the master how long to hold off before forking a replacement. The shape
//! is the classic supervisor throttle: exponential growth while the child
//! is flapping, reset to the base delay once a run outlives the stability
//! threshold.
//!
//! ```rust
//! use std::time::{Duration, Instant};
//! use resqued::BackoffSettings;
//! use resqued::ListenerBackoff;
//!
//! let mut backoff = ListenerBackoff::new(BackoffSettings::default());
//! let t0 = Instant::now();
//!
//! backoff.started_at(t0);
//! assert!(backoff.how_long_at(t0).is_none());
//!
//! // Dies right away: wait one second before the next fork.
//! backoff.died_at(t0 + Duration::from_secs(2));
//! assert_eq!(backoff.how_long_at(t0 + Duration::from_secs(2)), Some(Duration::from_secs(1)));
//! ```

use std::time::{Duration, Instant};

/// Tuning knobs for the listener restart throttle.
///
/// ## Field semantics
/// - `base`: first delay after a crash, and the value the wait resets to
///   after a stable run
/// - `max`: cap on the doubled wait
/// - `threshold`: a listener that survives longer than this is considered
///   stable; the next crash starts over at `base`
#[derive(Clone, Copy, Debug)]
pub struct BackoffSettings {
    /// Initial delay before the first respawn.
    pub base: Duration,
    /// Maximum delay cap.
    pub max: Duration,
    /// Run length after which the wait resets to `base`.
    pub threshold: Duration,
}

impl Default for BackoffSettings {
    /// Returns the production defaults: `base = 1s`, `max = 64s`,
    /// `threshold = 60s`.
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(64),
            threshold: Duration::from_secs(60),
        }
    }
}

/// Stateful restart throttle.
///
/// The master calls [`started`](Self::started) when it forks a listener,
/// [`died`](Self::died) when the current listener exits unexpectedly, and
/// consults [`how_long`](Self::how_long) before forking again.
///
/// All operations have `*_at(Instant)` variants so the timing logic stays
/// deterministic under test.
#[derive(Clone, Copy, Debug)]
pub struct ListenerBackoff {
    settings: BackoffSettings,
    /// Current wait duration; zero until the first crash.
    wait: Duration,
    last_started: Option<Instant>,
    restart_at: Option<Instant>,
}

impl ListenerBackoff {
    /// Creates a tracker with the given settings.
    pub fn new(settings: BackoffSettings) -> Self {
        Self {
            settings,
            wait: Duration::ZERO,
            last_started: None,
            restart_at: None,
        }
    }

    /// Records that a listener was forked. Clears any pending delay.
    pub fn started(&mut self) {
        self.started_at(Instant::now());
    }

    /// Records that the current listener exited unexpectedly.
    ///
    /// Doubles the wait (capped) when the previous start was recent,
    /// otherwise resets it to the base delay.
    pub fn died(&mut self) {
        self.died_at(Instant::now());
    }

    /// Remaining delay before a respawn is allowed, or `None` when a
    /// listener may be forked immediately.
    pub fn how_long(&self) -> Option<Duration> {
        self.how_long_at(Instant::now())
    }

    /// [`started`](Self::started) with an injected clock.
    pub fn started_at(&mut self, now: Instant) {
        self.last_started = Some(now);
        self.restart_at = None;
    }

    /// [`died`](Self::died) with an injected clock.
    pub fn died_at(&mut self, now: Instant) {
        let flapping = self
            .last_started
            .is_some_and(|at| now.duration_since(at) < self.settings.threshold);

        self.wait = if flapping {
            (self.wait * 2).clamp(self.settings.base, self.settings.max)
        } else {
            self.settings.base
        };
        self.restart_at = Some(now + self.wait);
    }

    /// [`how_long`](Self::how_long) with an injected clock.
    pub fn how_long_at(&self, now: Instant) -> Option<Duration> {
        let at = self.restart_at?;
        let remaining = at.checked_duration_since(now)?;
        (remaining > Duration::ZERO).then_some(remaining)
    }
}

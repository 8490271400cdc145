//! Delay curve between empty polls.

use std::{fmt, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::options::millis;

/// Lowest delay the default curve produces.
pub const MIN_EMPTY_DELAY: Duration = Duration::from_millis(2);

/// Pure function computing the next delay from the previous one.
pub type DelayFn = Arc<dyn Fn(Duration, &DelayWhenEmptyBehavior) -> Duration + Send + Sync>;

/// How long the receive loop sleeps when a fetch (and claim) came back empty.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayWhenEmptyBehavior {
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
    pub delay_factor: f64,
    #[serde(skip)]
    calc: Option<DelayFn>,
}

impl Default for DelayWhenEmptyBehavior {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(5),
            delay_factor: 1.2,
            calc: None,
        }
    }
}

impl fmt::Debug for DelayWhenEmptyBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelayWhenEmptyBehavior")
            .field("max_delay", &self.max_delay)
            .field("delay_factor", &self.delay_factor)
            .field("custom_calc", &self.calc.is_some())
            .finish()
    }
}

impl DelayWhenEmptyBehavior {
    pub fn new(max_delay: Duration, delay_factor: f64) -> Self {
        Self {
            max_delay,
            delay_factor,
            calc: None,
        }
    }

    /// Replace the delay curve. The result is still capped at `max_delay`.
    #[must_use]
    pub fn with_calc(
        mut self,
        calc: impl Fn(Duration, &DelayWhenEmptyBehavior) -> Duration + Send + Sync + 'static,
    ) -> Self {
        self.calc = Some(Arc::new(calc));
        self
    }

    /// Next delay after `previous`: `max(ceil(previous * factor), 2ms)` by
    /// default, never above `max_delay`.
    pub fn calc_next_delay(&self, previous: Duration) -> Duration {
        let next = match &self.calc {
            Some(calc) => calc(previous, self),
            None => default_curve(previous, self.delay_factor),
        };
        next.min(self.max_delay)
    }
}

fn default_curve(previous: Duration, factor: f64) -> Duration {
    let scaled = (previous.as_millis() as f64 * factor).ceil();
    let scaled = if scaled.is_finite() && scaled > 0.0 {
        Duration::from_millis(scaled as u64)
    } else {
        Duration::ZERO
    };
    scaled.max(MIN_EMPTY_DELAY)
}

/// Running position on the delay curve of one subscription.
#[derive(Debug, Clone)]
pub struct EmptyBackoff {
    behavior: DelayWhenEmptyBehavior,
    current: Duration,
}

impl EmptyBackoff {
    pub fn new(behavior: DelayWhenEmptyBehavior) -> Self {
        Self {
            behavior,
            current: Duration::ZERO,
        }
    }

    /// Advance the curve and return the delay to sleep now.
    pub fn next_delay(&mut self) -> Duration {
        self.current = self.behavior.calc_next_delay(self.current);
        self.current
    }

    /// Back to the floor after any non-empty result.
    pub fn reset(&mut self) {
        self.current = Duration::ZERO;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

//! Backoff interval strategies.
//!
//! Every strategy answers one question: after the failure of attempt `n`
//! (1-based), how long until the next attempt? Strategies return the pure
//! formula value; bounding is the policy's job, through its opt-in cap.
//! Arithmetic that overflows `Duration` saturates to `Duration::MAX` rather
//! than wrapping. Strategies are pure over the attempt number except the
//! jittered ones, which draw from thread-local randomness.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// A backoff interval strategy.
pub trait IntervalFn: Send + Sync {
    /// Interval after the failure of `attempt` (1-based).
    fn interval(&self, attempt: u32) -> Duration;
}

/// Same interval after every failure.
#[derive(Debug, Clone)]
pub struct FixedInterval {
    base: Duration,
}

impl FixedInterval {
    /// Creates the strategy with the given base interval.
    pub fn new(base: Duration) -> Self {
        Self { base }
    }
}

impl IntervalFn for FixedInterval {
    fn interval(&self, _attempt: u32) -> Duration {
        self.base
    }
}

/// `base × attempt`.
#[derive(Debug, Clone)]
pub struct LinearInterval {
    base: Duration,
}

impl LinearInterval {
    /// Creates the strategy with the given base interval.
    pub fn new(base: Duration) -> Self {
        Self { base }
    }
}

impl IntervalFn for LinearInterval {
    fn interval(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt.max(1))
    }
}

/// `base × multiplierⁿ⁻¹`.
#[derive(Debug, Clone)]
pub struct ExponentialInterval {
    base: Duration,
    multiplier: f64,
}

impl ExponentialInterval {
    /// Creates the strategy with a doubling multiplier.
    pub fn new(base: Duration) -> Self {
        Self {
            base,
            multiplier: 2.0,
        }
    }

    /// Overrides the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    fn raw(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::try_from_secs_f64(self.base.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }
}

impl IntervalFn for ExponentialInterval {
    fn interval(&self, attempt: u32) -> Duration {
        self.raw(attempt)
    }
}

/// `base × fib(n)` with `fib(1) = fib(2) = 1`.
#[derive(Debug, Clone)]
pub struct FibonacciInterval {
    base: Duration,
}

impl FibonacciInterval {
    /// Creates the strategy with the given base interval.
    pub fn new(base: Duration) -> Self {
        Self { base }
    }
}

impl IntervalFn for FibonacciInterval {
    fn interval(&self, attempt: u32) -> Duration {
        let (mut previous, mut current) = (1u64, 1u64);
        for _ in 2..attempt.max(1) {
            let next = previous.saturating_add(current);
            previous = current;
            current = next;
        }
        self.base
            .saturating_mul(current.min(u32::MAX as u64) as u32)
    }
}

/// Uniform random interval in `[0, base]`.
#[derive(Debug, Clone)]
pub struct UniformJitterInterval {
    base: Duration,
}

impl UniformJitterInterval {
    /// Creates the strategy with the given upper bound.
    pub fn new(base: Duration) -> Self {
        Self { base }
    }
}

impl IntervalFn for UniformJitterInterval {
    fn interval(&self, _attempt: u32) -> Duration {
        let bound = self.base.as_secs_f64();
        Duration::try_from_secs_f64(rand::rng().random_range(0.0..=bound))
            .unwrap_or(Duration::MAX)
    }
}

/// Full-jitter exponential backoff: uniform random in `[0, base × mⁿ⁻¹]`.
#[derive(Debug, Clone)]
pub struct ExponentialJitterInterval {
    exponential: ExponentialInterval,
}

impl ExponentialJitterInterval {
    /// Creates the strategy with a doubling multiplier.
    pub fn new(base: Duration) -> Self {
        Self {
            exponential: ExponentialInterval::new(base),
        }
    }

    /// Overrides the multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.exponential = self.exponential.with_multiplier(multiplier);
        self
    }
}

impl IntervalFn for ExponentialJitterInterval {
    fn interval(&self, attempt: u32) -> Duration {
        let bound = self.exponential.raw(attempt).as_secs_f64();
        Duration::try_from_secs_f64(rand::rng().random_range(0.0..=bound))
            .unwrap_or(Duration::MAX)
    }
}

/// A closure-backed strategy.
pub struct FnInterval {
    f: Arc<dyn Fn(u32) -> Duration + Send + Sync>,
}

impl FnInterval {
    /// Wraps `f`; the argument is the 1-based attempt that just failed.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }
}

impl IntervalFn for FnInterval {
    fn interval(&self, attempt: u32) -> Duration {
        (self.f)(attempt)
    }
}

//! Pre-request jitter.
//!
//! A configured delay of `d` seconds becomes a sleep of `d * (0.5 + r)` with
//! `r` uniform in `[0, 1)`, so consecutive requests never land on a fixed
//! cadence.

use std::time::Duration;

use crate::models::MAX_DELAY_SECS;

/// Jittered duration for a base delay in seconds.
///
/// Non-finite and non-positive delays yield zero. Delays above
/// [`MAX_DELAY_SECS`] are clamped to it.
pub fn jittered_delay(base_secs: f64) -> Duration {
    if !base_secs.is_finite() || base_secs <= 0.0 {
        return Duration::ZERO;
    }
    let factor = 0.5 + rand::random::<f64>();
    Duration::try_from_secs_f64(base_secs.min(MAX_DELAY_SECS) * factor).unwrap_or(Duration::ZERO)
}

/// Sleep for the jittered form of `delay`, if one is configured.
pub async fn pause_before_request(delay: Option<f64>) {
    let Some(base) = delay else {
        return;
    };
    let wait = jittered_delay(base);
    if wait.is_zero() {
        return;
    }
    tracing::debug!(sleep_ms = %wait.as_millis(), "Delaying request");
    tokio::time::sleep(wait).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_is_bounded() {
        for _ in 0..200 {
            let d = jittered_delay(2.0);
            assert!(d >= Duration::from_secs(1));
            assert!(d < Duration::from_secs(3));
        }
    }

    #[test]
    fn invalid_delays_are_zero() {
        assert_eq!(jittered_delay(0.0), Duration::ZERO);
        assert_eq!(jittered_delay(-1.0), Duration::ZERO);
        assert_eq!(jittered_delay(f64::NAN), Duration::ZERO);
    }

    #[test]
    fn huge_delays_are_clamped() {
        let max = Duration::from_secs_f64(MAX_DELAY_SECS * 1.5);
        for base in [1e300, f64::MAX, MAX_DELAY_SECS * 10.0] {
            let d = jittered_delay(base);
            assert!(d >= Duration::from_secs_f64(MAX_DELAY_SECS * 0.5));
            assert!(d < max);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pause_sleeps_within_jitter_window() {
        let start = tokio::time::Instant::now();
        pause_before_request(Some(1.0)).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn no_delay_returns_immediately() {
        let start = std::time::Instant::now();
        pause_before_request(None).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}

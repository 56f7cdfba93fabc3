use chrono::TimeDelta;

pub const BASE_BACKOFF_MS: f64 = 1000.0;
pub const MAX_BACKOFF_MS: i64 = 300_000;

/// Delay before the next attempt, given the retry count before it is incremented.
///
/// `min(300s, 1s * factor^retry_count)`; a non-finite or non-positive factor counts as 1.
pub fn backoff_delay(backoff_factor: f64, retry_count: i32) -> TimeDelta {
    let factor = if backoff_factor.is_finite() && backoff_factor > 0.0 {
        backoff_factor
    } else {
        1.0
    };
    let ms = BASE_BACKOFF_MS * factor.powi(retry_count.max(0));
    let ms = if ms.is_finite() {
        (ms as i64).min(MAX_BACKOFF_MS)
    } else {
        MAX_BACKOFF_MS
    };
    TimeDelta::milliseconds(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_per_retry() {
        assert_eq!(backoff_delay(2.0, 0).num_milliseconds(), 1000);
        assert_eq!(backoff_delay(2.0, 1).num_milliseconds(), 2000);
        assert_eq!(backoff_delay(2.0, 3).num_milliseconds(), 8000);
    }

    #[test]
    fn capped_at_five_minutes() {
        assert_eq!(backoff_delay(2.0, 20).num_milliseconds(), MAX_BACKOFF_MS);
        assert_eq!(backoff_delay(f64::MAX, 5).num_milliseconds(), MAX_BACKOFF_MS);
    }

    #[test]
    fn degenerate_factor_is_constant() {
        assert_eq!(backoff_delay(0.0, 4).num_milliseconds(), 1000);
        assert_eq!(backoff_delay(-3.0, 2).num_milliseconds(), 1000);
        assert_eq!(backoff_delay(f64::NAN, 2).num_milliseconds(), 1000);
    }
}

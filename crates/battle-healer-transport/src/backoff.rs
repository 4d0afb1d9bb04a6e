//! Exponential backoff with jitter, and `Retry-After` header parsing.

use rand::Rng;
use std::time::Duration;

/// `min(max_ms, base * 2^attempt) + uniform(0, jitter_ratio * exponential)`.
pub fn compute_delay(attempt: u32, base_ms: u64, max_ms: u64, jitter_ratio: f64) -> Duration {
    let exponential = (base_ms as f64) * 2f64.powi(attempt as i32);
    let capped = exponential.min(max_ms as f64);

    let jitter = if jitter_ratio > 0.0 && capped > 0.0 {
        rand::thread_rng().gen_range(0.0..=(jitter_ratio * capped))
    } else {
        0.0
    };

    Duration::from_millis((capped + jitter).round() as u64)
}

/// Parses a `Retry-After` header value, either as integer seconds or an
/// HTTP-date, clamped to `[0, max_ms]`.
pub fn parse_retry_after(value: &str, max_ms: u64) -> Option<Duration> {
    let trimmed = value.trim();

    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(Duration::from_millis((seconds.saturating_mul(1000)).min(max_ms)));
    }

    parse_http_date(trimmed).map(|target| {
        let now = chrono::Utc::now();
        let millis = (target - now).num_milliseconds().max(0) as u64;
        Duration::from_millis(millis.min(max_ms))
    })
}

fn parse_http_date(value: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    if let Ok(parsed) = chrono::DateTime::parse_from_rfc2822(value) {
        return Some(parsed.with_timezone(&chrono::Utc));
    }
    chrono::NaiveDateTime::parse_from_str(value, "%a, %d %b %Y %H:%M:%S GMT")
        .ok()
        .map(|naive| chrono::DateTime::from_naive_utc_and_offset(naive, chrono::Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_delay_is_capped_at_max() {
        let delay = compute_delay(10, 300, 3_000, 0.0);
        assert!(delay.as_millis() <= 3_000);
    }

    #[test]
    fn compute_delay_grows_exponentially_before_cap() {
        let d0 = compute_delay(0, 300, 30_000, 0.0);
        let d1 = compute_delay(1, 300, 30_000, 0.0);
        let d2 = compute_delay(2, 300, 30_000, 0.0);
        assert_eq!(d0.as_millis(), 300);
        assert_eq!(d1.as_millis(), 600);
        assert_eq!(d2.as_millis(), 1_200);
    }

    #[test]
    fn compute_delay_jitter_stays_within_ratio_bound() {
        for _ in 0..50 {
            let delay = compute_delay(1, 300, 30_000, 0.25);
            assert!(delay.as_millis() >= 600);
            assert!(delay.as_millis() <= 600 + (0.25 * 600.0) as u128);
        }
    }

    #[test]
    fn parse_retry_after_accepts_integer_seconds() {
        let delay = parse_retry_after("5", 30_000).unwrap();
        assert_eq!(delay.as_millis(), 5_000);
    }

    #[test]
    fn parse_retry_after_clamps_to_max() {
        let delay = parse_retry_after("600", 3_000).unwrap();
        assert_eq!(delay.as_millis(), 3_000);
    }

    #[test]
    fn parse_retry_after_rejects_garbage() {
        assert!(parse_retry_after("not-a-date-or-number", 3_000).is_none());
    }

    #[test]
    fn parse_retry_after_accepts_http_date_in_the_future() {
        let future = chrono::Utc::now() + chrono::Duration::seconds(10);
        let formatted = future.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let delay = parse_retry_after(&formatted, 30_000).unwrap();
        assert!(delay.as_millis() > 0);
    }
}

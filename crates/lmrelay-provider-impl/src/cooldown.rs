use std::time::{Duration, SystemTime};

use http::header::RETRY_AFTER;
use http::HeaderMap;
use serde_json::Value as JsonValue;
use time::format_description::well_known::Rfc3339;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};

pub const DEFAULT_COOLDOWN_SECS: u64 = 60;

/// How long a rate-limited key stays on cooldown. A reset hint in the
/// error body wins, then `Retry-After`, then the quota heuristic, then a
/// flat fallback.
pub fn cooldown_duration(headers: &HeaderMap, body: &str) -> Duration {
    let now = OffsetDateTime::now_utc();

    if let Ok(parsed) = serde_json::from_str::<JsonValue>(body) {
        let error = parsed.get("error").unwrap_or(&parsed);
        for field in ["reset_time", "resets_at", "reset_at"] {
            if let Some(value) = error.get(field)
                && let Some(when) = parse_reset_time(value)
                && when > now
            {
                return duration_until(now, when);
            }
        }
        if let Some(seconds) = retry_after_seconds(headers) {
            return Duration::from_secs(seconds);
        }
        // Out-of-quota keys stay blocked until the billing period rolls
        // over.
        if quota_exhausted(error) {
            return duration_until(now, first_of_next_month(now));
        }
    } else if let Some(seconds) = retry_after_seconds(headers) {
        return Duration::from_secs(seconds);
    }

    Duration::from_secs(DEFAULT_COOLDOWN_SECS)
}

pub fn retry_after_seconds(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            let value = value.trim();
            if let Ok(seconds) = value.parse::<u64>() {
                return Some(seconds);
            }
            if let Ok(when) = httpdate::parse_http_date(value) {
                return when
                    .duration_since(SystemTime::now())
                    .ok()
                    .map(|duration| duration.as_secs());
            }
            None
        })
}

/// Reset timestamps arrive as epoch seconds (number or numeric string)
/// or RFC3339.
pub fn parse_reset_time(value: &JsonValue) -> Option<OffsetDateTime> {
    match value {
        JsonValue::Number(number) => number
            .as_i64()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok()),
        JsonValue::String(text) => {
            let text = text.trim();
            if let Ok(secs) = text.parse::<i64>() {
                return OffsetDateTime::from_unix_timestamp(secs).ok();
            }
            OffsetDateTime::parse(text, &Rfc3339).ok()
        }
        _ => None,
    }
}

pub fn first_of_next_month(now: OffsetDateTime) -> OffsetDateTime {
    let (year, month) = match now.month() {
        Month::December => (now.year() + 1, Month::January),
        month => (now.year(), month.next()),
    };
    match Date::from_calendar_date(year, month, 1) {
        Ok(date) => PrimitiveDateTime::new(date, Time::MIDNIGHT).assume_utc(),
        Err(_) => now + time::Duration::days(30),
    }
}

fn quota_exhausted(error: &JsonValue) -> bool {
    let code = error.get("code").and_then(|value| value.as_str()).unwrap_or("");
    let kind = error.get("type").and_then(|value| value.as_str()).unwrap_or("");
    code.contains("quota") || kind.contains("quota")
}

fn duration_until(now: OffsetDateTime, when: OffsetDateTime) -> Duration {
    let delta = when - now;
    if delta.is_positive() {
        Duration::from_secs(delta.whole_seconds().max(1) as u64)
    } else {
        Duration::from_secs(DEFAULT_COOLDOWN_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn next_month_rolls_over_december() {
        let now = datetime!(2025-12-15 08:30 UTC);
        assert_eq!(first_of_next_month(now), datetime!(2026-01-01 00:00 UTC));
        let now = datetime!(2025-03-31 23:59 UTC);
        assert_eq!(first_of_next_month(now), datetime!(2025-04-01 00:00 UTC));
    }

    #[test]
    fn parses_epoch_and_rfc3339_reset_times() {
        let epoch = parse_reset_time(&json!(1735689600)).unwrap();
        assert_eq!(epoch, datetime!(2025-01-01 00:00 UTC));
        let text = parse_reset_time(&json!("1735689600")).unwrap();
        assert_eq!(text, epoch);
        let rfc = parse_reset_time(&json!("2025-01-01T00:00:00Z")).unwrap();
        assert_eq!(rfc, epoch);
        assert!(parse_reset_time(&json!(true)).is_none());
    }

    #[test]
    fn body_reset_time_beats_retry_after() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("5"));
        let future = OffsetDateTime::now_utc() + time::Duration::seconds(120);
        let body = json!({ "error": { "reset_time": future.unix_timestamp() } }).to_string();
        let duration = cooldown_duration(&headers, &body);
        assert!(duration > Duration::from_secs(60));
    }

    #[test]
    fn retry_after_header_used_when_body_has_no_hint() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("17"));
        let body = json!({ "error": { "message": "slow down" } }).to_string();
        assert_eq!(cooldown_duration(&headers, &body), Duration::from_secs(17));
    }

    #[test]
    fn quota_exhaustion_blocks_until_next_month() {
        let body = json!({ "error": { "code": "insufficient_quota" } }).to_string();
        let duration = cooldown_duration(&HeaderMap::new(), &body);
        assert!(duration >= Duration::from_secs(1));
        assert!(duration <= Duration::from_secs(32 * 24 * 3600));
    }

    #[test]
    fn unparseable_body_falls_back_to_default() {
        let duration = cooldown_duration(&HeaderMap::new(), "<html>teapot</html>");
        assert_eq!(duration, Duration::from_secs(DEFAULT_COOLDOWN_SECS));
    }
}

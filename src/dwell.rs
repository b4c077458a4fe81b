//! Deterministic decisions about dwelling at stops that have no timetabled dwell.
//!
//! Every decision is a pure function of the trip, the stop and the time of day,
//! so the same vehicle makes the same choice on every tick and on every run.

use crate::util::Interval;
use chrono::{DateTime, Duration, TimeZone, Timelike};

/// The chance of stopping at the start of the service day.
const MORNING_PROBABILITY: f64 = 0.95;

/// The chance of stopping at the end of the service day.
const NIGHT_PROBABILITY: f64 = 0.50;

/// The service day, in hours since midnight. Earlier hours belong to the previous day.
const SERVICE_DAY: Interval<f64> = Interval::new(5.0, 24.0);

/// The range of simulated dwell durations, in ms.
const DWELL_MS: Interval<f64> = Interval::new(20_000.0, 30_000.0);

/// The number of distinct values a draw can take.
const DRAW_BUCKETS: u32 = 10_000;

/// A stable 32-bit rolling hash over the UTF-16 code units of a string.
pub fn string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
}

/// Reduces a string to a pseudo-random value in `[0, 1)`.
fn draw(key: &str) -> f64 {
    (string_hash(key).unsigned_abs() % DRAW_BUCKETS) as f64 / DRAW_BUCKETS as f64
}

/// The probability of a vehicle stopping at a stop at the given hour of the day,
/// falling linearly from 95% at 05:00 to 50% at midnight.
pub fn stop_probability(hour: f64) -> f64 {
    let hour = if hour < SERVICE_DAY.min {
        hour + 24.0
    } else {
        hour
    };
    let t = SERVICE_DAY.inv_lerp(hour);
    let p = Interval::new(MORNING_PROBABILITY, NIGHT_PROBABILITY).lerp(t);
    Interval::new(NIGHT_PROBABILITY, MORNING_PROBABILITY).clamp(p)
}

/// The fractional hour of the day of a local time.
pub fn hour_of_day<Tz: TimeZone>(time: &DateTime<Tz>) -> f64 {
    time.hour() as f64 + time.minute() as f64 / 60.0 + time.second() as f64 / 3600.0
}

/// Whether the vehicle running `trip_id` stops at `stop_id`, given the local time.
pub fn should_stop_at_station<Tz: TimeZone>(
    trip_id: &str,
    stop_id: &str,
    time: &DateTime<Tz>,
) -> bool {
    draw(&format!("{}:{}", trip_id, stop_id)) < stop_probability(hour_of_day(time))
}

/// How long the vehicle running `trip_id` dwells at `stop_id` if it stops there.
pub fn dwell_duration(trip_id: &str, stop_id: &str) -> Duration {
    let ms = DWELL_MS.lerp(draw(&format!("{}:{}:dwell", trip_id, stop_id)));
    Duration::milliseconds(ms as i64)
}

/// Decides whether the vehicle dwells at the stop, and for how long.
pub fn simulated_dwell<Tz: TimeZone>(
    trip_id: &str,
    stop_id: &str,
    time: &DateTime<Tz>,
) -> Option<Duration> {
    should_stop_at_station(trip_id, stop_id, time).then(|| dwell_duration(trip_id, stop_id))
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn hash_matches_reference_values() {
        assert_eq!(string_hash(""), 0);
        assert_eq!(string_hash("a"), 97);
        assert_eq!(string_hash("ab"), 97 * 31 + 98);
        // Overflows wrap like 32-bit signed integer arithmetic.
        assert_eq!(string_hash("hello world"), 1794106052);
        assert_eq!(string_hash("Königsplatz"), -1047384583);
    }

    #[test]
    fn draws_are_in_unit_interval() {
        for key in ["", "a", "trip-1:stop-9", "ü:ß:dwell"] {
            let d = draw(key);
            assert!((0.0..1.0).contains(&d), "{} -> {}", key, d);
        }
    }

    #[test]
    fn probability_endpoints() {
        assert_approx_eq!(stop_probability(5.0), 0.95);
        assert_approx_eq!(stop_probability(24.0), 0.50);
        assert_approx_eq!(stop_probability(14.5), 0.725);
        // Small hours continue the previous evening's decline and are clamped.
        assert_approx_eq!(stop_probability(0.0), 0.50);
        assert_approx_eq!(stop_probability(4.9), 0.50);
    }

    #[test]
    fn probability_is_non_increasing_over_service_day() {
        let mut last = 1.0;
        for i in 0..=190 {
            let p = stop_probability(5.0 + i as f64 * 0.1);
            assert!(p <= last + 1e-12);
            last = p;
        }
    }

    #[test]
    fn decisions_are_deterministic() {
        let time = FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 5, 6, 17, 30, 0)
            .unwrap();
        for i in 0..50 {
            let trip = format!("trip-{}", i);
            let first = should_stop_at_station(&trip, "de:09761:401", &time);
            for _ in 0..5 {
                assert_eq!(should_stop_at_station(&trip, "de:09761:401", &time), first);
            }
            assert_eq!(
                dwell_duration(&trip, "de:09761:401"),
                dwell_duration(&trip, "de:09761:401")
            );
        }
    }

    #[test]
    fn dwell_durations_in_range() {
        for i in 0..200 {
            let d = dwell_duration(&format!("t{}", i), "s").num_milliseconds();
            assert!((20_000..30_000).contains(&d), "got {}", d);
        }
    }

    #[test]
    fn stopping_is_more_likely_in_the_morning() {
        let morning = Utc.with_ymd_and_hms(2024, 5, 6, 5, 0, 0).unwrap();
        let night = Utc.with_ymd_and_hms(2024, 5, 6, 23, 59, 0).unwrap();
        let count = |time: &DateTime<Utc>| {
            (0..2000)
                .filter(|i| should_stop_at_station(&format!("trip{}", i), "stop", time))
                .count()
        };
        let (m, n) = (count(&morning), count(&night));
        assert!(m > n, "{} <= {}", m, n);
        assert!(m > 1700 && n < 1200, "{} / {}", m, n);
        let stops = (0..2000)
            .filter(|i| simulated_dwell(&format!("trip{}", i), "stop", &morning).is_some())
            .count();
        assert_eq!(stops, m);
    }
}

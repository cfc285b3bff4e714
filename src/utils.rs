use log::warn;
use std::fmt::Display;

/// Attempts per remote write before the command is reported as failed.
pub const MAX_COMMAND_ATTEMPTS: u32 = 2;

/// Round to one decimal place, the precision minute drivers are reported with.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Minutes from `now_s` until `target_s` (both epoch seconds), never negative.
pub fn minutes_until(target_s: i64, now_s: i64) -> f64 {
    round1((target_s - now_s).max(0) as f64 / 60.0)
}

/// Whole minutes left on a rain delay expiring at `expiration_ms` (epoch milliseconds).
/// Truncates: 125 seconds left is 2 minutes.
pub fn rain_delay_minutes(expiration_ms: i64, now_s: i64) -> i64 {
    let seconds_left = (expiration_ms as f64 / 1000.0 - now_s as f64).max(0.0);
    (seconds_left / 60.0) as i64
}

pub fn ms_to_secs(ms: i64) -> i64 {
    ms / 1000
}

/// Remaining and elapsed minutes of a run that started at `start_ms` and lasts `duration_s`.
pub fn run_progress(start_ms: i64, duration_s: i64, now_s: i64) -> (f64, f64) {
    let elapsed = (now_s - ms_to_secs(start_ms)).max(0);
    let remaining = (duration_s - elapsed).max(0);
    (round1(remaining as f64 / 60.0), round1(elapsed as f64 / 60.0))
}

/// Remote ratio (0.85) to hub percentage (85).
pub fn percent_from_ratio(ratio: f64) -> f64 {
    (ratio * 10_000.0).round() / 100.0
}

/// Hub percentage (120) to remote ratio (1.2).
pub fn ratio_from_percent(percent: f64) -> f64 {
    percent / 100.0
}

/// Integer percentage, truncated.
pub fn whole_percent(ratio: f64) -> i64 {
    (ratio * 100.0) as i64
}

pub fn minutes_to_seconds(minutes: f64) -> i64 {
    (minutes * 60.0) as i64
}

/// Run `op` up to `max_attempts` times, back to back, returning the first success or the
/// last error. Each failure is logged.
pub fn with_retries<T, E: Display>(
    max_attempts: u32,
    what: &str,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => {
                warn!("{} failed (attempt {}/{}): {}", what, attempt, max_attempts, e);
                if attempt >= max_attempts {
                    return Err(e);
                }
                attempt += 1;
            }
        }
    }
}

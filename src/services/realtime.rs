use crate::bridge::Bridge;
use crate::hub::NodeHost;
use log::{debug, error, info};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Short,
    Long,
}

/// Decides which pass a tick runs: a long (forced) pass once `long` has elapsed since the
/// previous one, a short pass otherwise.
#[derive(Debug)]
pub struct PollSchedule {
    long: Duration,
    last_long: Instant,
}

impl PollSchedule {
    /// `started` is when the last forced pass ran (discovery ends with one).
    pub fn new(long: Duration, started: Instant) -> Self {
        PollSchedule { long, last_long: started }
    }

    pub fn next(&mut self, now: Instant) -> Pass {
        if now.saturating_duration_since(self.last_long) >= self.long {
            self.last_long = now;
            Pass::Long
        } else {
            Pass::Short
        }
    }
}

pub struct LoopSettings {
    pub short_interval: Duration,
    pub long_interval: Duration,
    pub discovery_retry: Duration,
}

pub fn run_loop(
    bridge: &mut Bridge,
    host: &mut dyn NodeHost,
    api_key: &str,
    settings: &LoopSettings,
) -> Result<(), String> {
    // Discovery must succeed before anything can be polled
    loop {
        match bridge.discover(host, api_key) {
            Ok(summary) => {
                info!(
                    "Discovery complete: {} controller(s), {} node(s) added, {} updated, {} failed",
                    summary.devices, summary.added, summary.initial_pass.updated, summary.initial_pass.failed
                );
                break;
            }
            Err(e) => {
                error!(
                    "{}; retrying discovery in {}s",
                    e,
                    settings.discovery_retry.as_secs()
                );
                thread::sleep(settings.discovery_retry);
            }
        }
    }

    let mut schedule = PollSchedule::new(settings.long_interval, Instant::now());
    loop {
        let tick_start = Instant::now();

        let pass = schedule.next(tick_start);
        let summary = match pass {
            Pass::Short => bridge.poll_short(host),
            Pass::Long => bridge.poll_long(host),
        };
        debug!(
            "{:?} pass: {} updated, {} failed, {} running",
            pass, summary.updated, summary.failed, summary.running
        );

        // Maintain steady cadence
        let elapsed = tick_start.elapsed();
        if elapsed < settings.short_interval {
            thread::sleep(settings.short_interval - elapsed);
        }
    }
}

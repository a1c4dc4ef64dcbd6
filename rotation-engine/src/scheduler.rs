//! Hour-boundary scheduling for rotation cycles.
//!
//! Cycles fire a fixed offset past each UTC hour boundary so late
//! in-flight records for the closing hour have landed before the swap.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use core_types::HourPeriod;
use log::{error, info};
use tokio::{sync::watch, time::sleep};

use crate::coordinator::RotationCoordinator;

/// The next instant a cycle should fire at or after `now`.
pub fn next_fire(now: DateTime<Utc>, offset_s: u64) -> DateTime<Utc> {
    let offset = offset_s.min(3_599) as i64;
    let ts = now.timestamp();
    let hour = ts.div_euclid(3_600);
    let candidate = hour * 3_600 + offset;
    let fire = if candidate > ts {
        candidate
    } else {
        (hour + 1) * 3_600 + offset
    };
    DateTime::<Utc>::from_timestamp(fire, 0).unwrap_or(now)
}

/// The hour a firing at `fire` closes out: the last complete hour.
pub fn period_for_fire(fire: DateTime<Utc>) -> HourPeriod {
    HourPeriod::previous(fire)
}

/// Fire the coordinator on every hour boundary plus offset until the
/// shutdown channel flips. Cycle failures are logged and retried on the
/// next tick; the frozen segment they leave behind is recovered there.
pub async fn run(
    coordinator: Arc<RotationCoordinator>,
    offset_s: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let now = Utc::now();
        let fire = next_fire(now, offset_s);
        let wait = (fire - now).to_std().unwrap_or_default();
        tokio::select! {
            _ = sleep(wait) => {
                let period = period_for_fire(fire);
                if let Err(err) = coordinator.rotate_now(period).await {
                    error!(
                        "stream {}: scheduled rotation failed: {}",
                        coordinator.stream(),
                        err
                    );
                }
            }
            _ = shutdown.changed() => {
                info!("stream {}: rotation scheduler stopping", coordinator.stream());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn fires_at_offset_past_the_hour() {
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 14, 30, 0).unwrap();
        let fire = next_fire(now, 60);
        assert_eq!(fire, Utc.with_ymd_and_hms(2026, 8, 26, 15, 1, 0).unwrap());
    }

    #[test]
    fn fires_this_hour_when_offset_not_yet_reached() {
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 14, 0, 20).unwrap();
        let fire = next_fire(now, 60);
        assert_eq!(fire, Utc.with_ymd_and_hms(2026, 8, 26, 14, 1, 0).unwrap());
    }

    #[test]
    fn fire_exactly_at_offset_rolls_to_next_hour() {
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 14, 1, 0).unwrap();
        let fire = next_fire(now, 60);
        assert_eq!(fire, Utc.with_ymd_and_hms(2026, 8, 26, 15, 1, 0).unwrap());
    }

    #[test]
    fn fire_closes_the_previous_hour() {
        let fire = Utc.with_ymd_and_hms(2026, 8, 26, 15, 1, 0).unwrap();
        let period = period_for_fire(fire);
        assert_eq!(
            period.start(),
            Utc.with_ymd_and_hms(2026, 8, 26, 14, 0, 0).unwrap()
        );
    }
}

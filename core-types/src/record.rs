// Copyright (c) James Kassemi, SC, US. All rights reserved.

use chrono::{DateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Message classification carried on every captured record.
///
/// Wire codes and export labels are stable: `t=1`, `d=2`, `dp=3`,
/// `dl=4`. Anything that cannot be classified is coerced to
/// [`RecordKind::DeadLetter`]; there is no null/unknown state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Ticker,
    Deal,
    Depth,
    DeadLetter,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Ticker,
        RecordKind::Deal,
        RecordKind::Depth,
        RecordKind::DeadLetter,
    ];

    pub const fn code(self) -> u8 {
        match self {
            RecordKind::Ticker => 1,
            RecordKind::Deal => 2,
            RecordKind::Depth => 3,
            RecordKind::DeadLetter => 4,
        }
    }

    /// Decode a wire code, coercing anything undefined to `DeadLetter`.
    pub const fn from_code(code: u8) -> Self {
        match code {
            1 => RecordKind::Ticker,
            2 => RecordKind::Deal,
            3 => RecordKind::Depth,
            _ => RecordKind::DeadLetter,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            RecordKind::Ticker => "t",
            RecordKind::Deal => "d",
            RecordKind::Depth => "dp",
            RecordKind::DeadLetter => "dl",
        }
    }

    /// Strict label decode used by export verification; `None` means the
    /// artifact carries a kind outside the defined set.
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "t" => Some(RecordKind::Ticker),
            "d" => Some(RecordKind::Deal),
            "dp" => Some(RecordKind::Depth),
            "dl" => Some(RecordKind::DeadLetter),
            _ => None,
        }
    }
}

/// One captured market event. Immutable once created; owned by whichever
/// segment it is appended to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub ts_ns: i64,
    pub kind: RecordKind,
    pub payload: String,
}

impl Record {
    pub fn new(ts_ns: i64, kind: RecordKind, payload: impl Into<String>) -> Self {
        Self {
            ts_ns,
            kind,
            payload: payload.into(),
        }
    }
}

pub const NANOS_PER_HOUR: i64 = 3_600 * 1_000_000_000;

/// One export period: a UTC hour boundary, identified by its start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HourPeriod {
    pub start_ns: i64,
}

impl HourPeriod {
    /// The hour containing `ts_ns`.
    pub fn containing(ts_ns: i64) -> Self {
        Self {
            start_ns: ts_ns.div_euclid(NANOS_PER_HOUR) * NANOS_PER_HOUR,
        }
    }

    /// The most recent complete hour as of `now`.
    pub fn previous(now: DateTime<Utc>) -> Self {
        let current = Self::containing(now.timestamp_nanos_opt().unwrap_or(0));
        Self {
            start_ns: current.start_ns - NANOS_PER_HOUR,
        }
    }

    pub fn end_ns(&self) -> i64 {
        self.start_ns + NANOS_PER_HOUR
    }

    pub fn start(&self) -> DateTime<Utc> {
        Utc.timestamp_nanos(self.start_ns)
    }

    /// Filename stamp, e.g. `20260826_1400` for the 14:00 UTC hour.
    pub fn file_stamp(&self) -> String {
        let start = self.start();
        format!("{}{:02}00", start.format("%Y%m%d_"), start.hour())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn kind_codes_round_trip_and_coerce() {
        for kind in RecordKind::ALL {
            assert_eq!(RecordKind::from_code(kind.code()), kind);
            assert_eq!(RecordKind::from_label(kind.label()), Some(kind));
        }
        assert_eq!(RecordKind::from_code(0), RecordKind::DeadLetter);
        assert_eq!(RecordKind::from_code(9), RecordKind::DeadLetter);
        assert_eq!(RecordKind::from_label("x"), None);
        assert_eq!(RecordKind::from_label(""), None);
    }

    #[test]
    fn hour_period_boundaries() {
        let t = Utc.with_ymd_and_hms(2026, 8, 26, 14, 37, 12).unwrap();
        let period = HourPeriod::containing(t.timestamp_nanos_opt().unwrap());
        assert_eq!(
            period.start(),
            Utc.with_ymd_and_hms(2026, 8, 26, 14, 0, 0).unwrap()
        );
        assert_eq!(period.end_ns() - period.start_ns, NANOS_PER_HOUR);
        assert_eq!(period.file_stamp(), "20260826_1400");
    }

    #[test]
    fn previous_period_is_last_complete_hour() {
        let now = Utc.with_ymd_and_hms(2026, 8, 26, 15, 1, 0).unwrap();
        let period = HourPeriod::previous(now);
        assert_eq!(
            period.start(),
            Utc.with_ymd_and_hms(2026, 8, 26, 14, 0, 0).unwrap()
        );
    }
}

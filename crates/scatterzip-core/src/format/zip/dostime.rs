use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Datelike, Timelike, Utc};

const DOS_MIN_YEAR: i32 = 1980;
const DOS_MAX_YEAR: i32 = 2107;

/// MS-DOS packed timestamp as stored in ZIP headers. Interpreted as UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
}

impl DosDateTime {
    /// Earliest representable instant, 1980-01-01 00:00:00.
    pub const MIN: Self = Self {
        date: (1 << 5) | 1,
        time: 0,
    };

    /// Latest representable instant, 2107-12-31 23:59:58.
    pub const MAX: Self = Self {
        date: (((DOS_MAX_YEAR - DOS_MIN_YEAR) as u16) << 9) | (12 << 5) | 31,
        time: (23 << 11) | (59 << 5) | 29,
    };

    /// Packs `instant`, clamping to the 1980..=2107 range DOS can express.
    pub fn from_system_time(instant: SystemTime) -> Self {
        let seconds = match instant.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
            Err(_) => return Self::MIN,
        };
        Self::from_unix_seconds(seconds)
    }

    pub fn from_unix_seconds(seconds: i64) -> Self {
        match DateTime::<Utc>::from_timestamp(seconds, 0) {
            Some(datetime) => Self::from_datetime(&datetime),
            None if seconds < 0 => Self::MIN,
            None => Self::MAX,
        }
    }

    pub fn from_datetime(datetime: &DateTime<Utc>) -> Self {
        let year = datetime.year();
        if year < DOS_MIN_YEAR {
            return Self::MIN;
        }
        if year > DOS_MAX_YEAR {
            return Self::MAX;
        }

        let date = (((year - DOS_MIN_YEAR) as u16) << 9)
            | ((datetime.month() as u16) << 5)
            | datetime.day() as u16;
        let time = ((datetime.hour() as u16) << 11)
            | ((datetime.minute() as u16) << 5)
            | (datetime.second() as u16 / 2);
        Self { date, time }
    }
}

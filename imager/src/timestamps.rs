// DOS date/time encoding for directory records.
// FAT date: bits 15-9 year since 1980, bits 8-5 month, bits 4-0 day.
// FAT time: bits 15-11 hours, bits 10-5 minutes, bits 4-0 seconds/2; the
// dropped second bit and the sub-second remainder live in a centisecond
// byte ranging 0..=199.

use std::time::SystemTime;

use chrono::{DateTime, Datelike, Local, Timelike};

pub const DOS_EPOCH_YEAR: i32 = 1980;
pub const DOS_MAX_YEAR: i32 = 2107;

/// A wall-clock instant in the FAT on-disk encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub date: u16,
    pub time: u16,
    pub centiseconds: u8,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00.00, the clamp for earlier instants.
    pub const MIN: DosDateTime = DosDateTime {
        date: (1 << 5) | 1,
        time: 0,
        centiseconds: 0,
    };

    /// 2107-12-31 23:59:59.99, the clamp for later instants.
    pub const MAX: DosDateTime = DosDateTime {
        date: (127 << 9) | (12 << 5) | 31,
        time: (23 << 11) | (59 << 5) | (59 >> 1),
        centiseconds: 199,
    };

    pub fn from_system_time(t: SystemTime) -> Self {
        Self::from_local(DateTime::<Local>::from(t))
    }

    fn from_local(dt: DateTime<Local>) -> Self {
        let year = dt.year();
        if year < DOS_EPOCH_YEAR {
            return Self::MIN;
        }
        if year > DOS_MAX_YEAR {
            return Self::MAX;
        }
        let date = (((year - DOS_EPOCH_YEAR) as u16) << 9)
            | ((dt.month() as u16) << 5)
            | dt.day() as u16;
        let second = dt.second() as u16;
        let time = ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (second >> 1);
        // leap seconds surface as subsecond millis >= 1000
        let millis = dt.timestamp_subsec_millis().min(999);
        let centiseconds = (millis / 10) as u8 + (second as u8 & 1) * 100;
        DosDateTime {
            date,
            time,
            centiseconds,
        }
    }
}

/// Decode back to (year, month, day, hour, minute, second, milliseconds).
/// The inverse of the encoder up to the 10 ms resolution of the format.
pub fn decode(dt: DosDateTime) -> (i32, u32, u32, u32, u32, u32, u32) {
    let year = (dt.date >> 9) as i32 + DOS_EPOCH_YEAR;
    let month = ((dt.date >> 5) & 0x0F) as u32;
    let day = (dt.date & 0x1F) as u32;
    let hour = (dt.time >> 11) as u32;
    let minute = ((dt.time >> 5) & 0x3F) as u32;
    let second = ((dt.time & 0x1F) * 2) as u32 + (dt.centiseconds / 100) as u32;
    let millis = (dt.centiseconds % 100) as u32 * 10;
    (year, month, day, hour, minute, second, millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn encode_local(
        y: i32,
        mo: u32,
        d: u32,
        h: u32,
        mi: u32,
        s: u32,
        ms: u32,
    ) -> DosDateTime {
        let dt = Local
            .with_ymd_and_hms(y, mo, d, h, mi, s)
            .unwrap()
            .checked_add_signed(chrono::Duration::milliseconds(ms as i64))
            .unwrap();
        DosDateTime::from_system_time(dt.into())
    }

    #[test]
    fn round_trips_within_resolution() {
        let encoded = encode_local(1994, 6, 15, 13, 37, 21, 450);
        assert_eq!(decode(encoded), (1994, 6, 15, 13, 37, 21, 450));

        // odd seconds survive through the centisecond byte
        let encoded = encode_local(2003, 1, 1, 0, 0, 59, 0);
        assert_eq!(decode(encoded), (2003, 1, 1, 0, 0, 59, 0));
    }

    #[test]
    fn encodes_known_fields() {
        let encoded = encode_local(1980, 1, 1, 0, 0, 0, 0);
        assert_eq!(encoded.date, (1 << 5) | 1);
        assert_eq!(encoded.time, 0);
        assert_eq!(encoded.centiseconds, 0);

        let encoded = encode_local(2000, 12, 31, 23, 59, 58, 0);
        assert_eq!(encoded.date, (20 << 9) | (12 << 5) | 31);
        assert_eq!(encoded.time, (23 << 11) | (59 << 5) | 29);
    }

    #[test]
    fn clamps_outside_the_representable_range() {
        let before = encode_local(1970, 1, 1, 0, 0, 0, 0);
        assert_eq!(before, DosDateTime::MIN);

        let after = encode_local(2200, 6, 1, 12, 0, 0, 0);
        assert_eq!(after, DosDateTime::MAX);
        assert_eq!(decode(after), (2107, 12, 31, 23, 59, 59, 990));
    }

    #[test]
    fn unix_epoch_clamps_to_dos_epoch() {
        let encoded = DosDateTime::from_system_time(std::time::UNIX_EPOCH);
        assert_eq!(encoded, DosDateTime::MIN);
    }
}

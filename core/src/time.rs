//! Calendar date/time for the RTC module and the `AT+RTC` command
//!
//! Day arithmetic uses Howard Hinnant's days_from_civil algorithm.
//! Reference: http://howardhinnant.github.io/date_algorithms.html

use crate::error::DriverError;

/// Source of the current wall-clock time
pub trait Clock {
    fn now(&mut self) -> Result<DateTime, DriverError>;
}

/// Wall-clock date and time, 24 h, no timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Date/time field out of range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InvalidDateTime;

impl core::fmt::Display for InvalidDateTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Invalid date/time")
    }
}

impl core::error::Error for InvalidDateTime {}

impl DateTime {
    pub fn new(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> Result<Self, InvalidDateTime> {
        if !(1..=12).contains(&month)
            || day < 1
            || day > days_in_month(year, month)
            || hour > 23
            || minute > 59
            || second > 59
        {
            return Err(InvalidDateTime);
        }
        Ok(Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        })
    }

    /// Day of the week, 0 = Sunday.
    pub fn weekday(&self) -> u8 {
        // 1970-01-01 was a Thursday
        (days_from_civil(self.year, self.month, self.day) + 4).rem_euclid(7) as u8
    }

    /// Seconds since 1970-01-01 00:00:00.
    pub fn to_unix(&self) -> i64 {
        i64::from(days_from_civil(self.year, self.month, self.day)) * 86_400
            + i64::from(self.hour) * 3600
            + i64::from(self.minute) * 60
            + i64::from(self.second)
    }
}

impl core::fmt::Display for DateTime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}.{:02}.{:02} {}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

pub fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        2 if is_leap_year(year) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

/// Days since 1970-01-01.
fn days_from_civil(year: u16, month: u8, day: u8) -> i32 {
    let (y, m) = if month <= 2 {
        (i32::from(year) - 1, u32::from(month) + 9)
    } else {
        (i32::from(year), u32::from(month) - 3)
    };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u32;
    let doy = (153 * m + 2) / 5 + u32::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe as i32 - 719_468
}

pub const fn to_bcd(value: u8) -> u8 {
    ((value / 10) << 4) | (value % 10)
}

pub const fn from_bcd(value: u8) -> u8 {
    (value >> 4) * 10 + (value & 0x0F)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weekday() {
        assert_eq!(DateTime::new(1970, 1, 1, 0, 0, 0).unwrap().weekday(), 4);
        assert_eq!(DateTime::new(2024, 2, 29, 12, 0, 0).unwrap().weekday(), 4);
        assert_eq!(DateTime::new(2022, 5, 1, 0, 0, 0).unwrap().weekday(), 0);
    }

    #[test]
    fn test_unix_time() {
        assert_eq!(DateTime::new(2000, 1, 1, 0, 0, 0).unwrap().to_unix(), 946_684_800);
        assert_eq!(DateTime::new(2038, 1, 19, 3, 14, 7).unwrap().to_unix(), 2_147_483_647);
    }

    #[test]
    fn test_rejects_impossible_dates() {
        assert!(DateTime::new(2023, 2, 29, 0, 0, 0).is_err());
        assert!(DateTime::new(2024, 4, 31, 0, 0, 0).is_err());
        assert!(DateTime::new(2024, 1, 1, 24, 0, 0).is_err());
        assert!(DateTime::new(2024, 13, 1, 0, 0, 0).is_err());
        assert!(!is_leap_year(2100));
    }

    #[test]
    fn test_bcd() {
        assert_eq!(to_bcd(59), 0x59);
        assert_eq!(from_bcd(0x23), 23);
    }

    #[test]
    fn test_display() {
        let dt = DateTime::new(2024, 3, 7, 9, 5, 0).unwrap();
        assert_eq!(std::format!("{dt}"), "2024.03.07 9:05:00");
    }
}

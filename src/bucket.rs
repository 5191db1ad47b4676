//! Time-bucket naming for audit log files.
//!
//! Every audit line lands in `<root>/<YYYY-MM-DD>/log_<bucket>.log`, where the bucket
//! is the wall-clock time truncated to [`BUCKET_WIDTH_MINUTES`]. Everything here is
//! pure: no clock reads, no I/O.

use chrono::{Datelike, NaiveDateTime, Timelike};
use std::fmt;
use std::path::{Path, PathBuf};

/// Width of one bucket, in minutes. Must divide 60.
pub const BUCKET_WIDTH_MINUTES: u32 = 10;

/// A coarse time identifier: the calendar hour plus the minute truncated to the
/// bucket width.
///
/// Field order matters: the derived `Ord` compares chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeBucket {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
}

impl fmt::Display for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02}_{:02}-{:02}",
            self.year, self.month, self.day, self.hour, self.minute
        )
    }
}

/// Where a given bucket is written, relative to the log root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogDestination {
    pub directory: String,
    pub file_name: String,
}

impl LogDestination {
    /// Full path of the bucket file under `root`.
    pub fn path_under(&self, root: &Path) -> PathBuf {
        root.join(&self.directory).join(&self.file_name)
    }
}

/// Maps a timestamp to its bucket.
pub fn bucket(now: &NaiveDateTime) -> TimeBucket {
    TimeBucket {
        year: now.year(),
        month: now.month(),
        day: now.day(),
        hour: now.hour(),
        minute: (now.minute() / BUCKET_WIDTH_MINUTES) * BUCKET_WIDTH_MINUTES,
    }
}

/// Calendar-day directory name (`YYYY-MM-DD`) for a timestamp.
pub fn day_directory(now: &NaiveDateTime) -> String {
    now.format("%Y-%m-%d").to_string()
}

/// File name for a bucket. Zero-padded so lexical order is chronological order.
pub fn file_name(bucket: &TimeBucket) -> String {
    format!("log_{bucket}.log")
}

/// Directory and file name for the bucket `now` falls into.
pub fn destination(now: &NaiveDateTime) -> LogDestination {
    LogDestination {
        directory: day_directory(now),
        file_name: file_name(&bucket(now)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_minute_is_truncated_to_width() {
        let b = bucket(&at(10, 7, 0));
        assert_eq!(b.minute, 0);
        assert_eq!(bucket(&at(10, 19, 59)).minute, 10);
        assert_eq!(bucket(&at(23, 59, 59)).minute, 50);
    }

    #[test]
    fn test_same_bucket_same_file() {
        let a = at(10, 7, 0);
        let b = at(10, 9, 59);
        assert_eq!(bucket(&a), bucket(&b));
        assert_eq!(file_name(&bucket(&a)), file_name(&bucket(&b)));
        assert_eq!(file_name(&bucket(&a)), "log_2024-03-09_10-00.log");
    }

    #[test]
    fn test_next_bucket_same_day_directory() {
        let early = at(10, 9, 59);
        let late = at(10, 10, 1);
        assert_ne!(bucket(&early), bucket(&late));
        assert_eq!(day_directory(&early), day_directory(&late));
        assert_eq!(day_directory(&late), "2024-03-09");
        assert_eq!(file_name(&bucket(&late)), "log_2024-03-09_10-10.log");
    }

    #[test]
    fn test_file_names_sort_chronologically() {
        let mut t = NaiveDate::from_ymd_opt(2023, 12, 31)
            .unwrap()
            .and_hms_opt(22, 55, 0)
            .unwrap();
        let mut previous = file_name(&bucket(&t));
        for _ in 0..200 {
            t += Duration::minutes(i64::from(BUCKET_WIDTH_MINUTES));
            let current = file_name(&bucket(&t));
            assert!(previous < current, "{previous} !< {current}");
            assert!(bucket(&t) > bucket(&(t - Duration::minutes(10))));
            previous = current;
        }
    }

    #[test]
    fn test_destination_path() {
        let dest = destination(&at(0, 4, 0));
        assert_eq!(
            dest.path_under(Path::new("logs")),
            Path::new("logs").join("2024-03-09").join("log_2024-03-09_00-00.log")
        );
    }
}

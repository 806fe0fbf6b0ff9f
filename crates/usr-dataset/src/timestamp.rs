use std::time::SystemTime;

/// Broken-down UTC wall clock time, used for run names, option copies and log lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timestamp {
    pub year: u32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub millis: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        // Always "YYYY-MM-DDTHH:MM:SS.mmmZ".
        let text = humantime::format_rfc3339_millis(time).to_string();
        let field = |range: std::ops::Range<usize>| {
            text.get(range)
                .and_then(|s| s.parse().ok())
                .unwrap_or_default()
        };
        Self {
            year: field(0..4),
            month: field(5..7),
            day: field(8..10),
            hour: field(11..13),
            minute: field(14..16),
            second: field(17..19),
            millis: field(20..23),
        }
    }

    /// `YYMMDD_HHMMSS`, appended to saved option files.
    pub fn file_suffix(&self) -> String {
        format!(
            "{:02}{:02}{:02}_{:02}{:02}{:02}",
            self.year % 100,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second
        )
    }

    /// `YYYYMMDD-HHMM`, the run identifier.
    pub fn run_id(&self) -> String {
        format!(
            "{:04}{:02}{:02}-{:02}{:02}",
            self.year, self.month, self.day, self.hour, self.minute
        )
    }

    /// `YY-MM-DD HH:MM:SS.mmm`, the log line prefix.
    pub fn log_stamp(&self) -> String {
        format!(
            "{:02}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
            self.year % 100,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.millis
        )
    }
}

#[cfg(test)]
mod tests {
    use super::Timestamp;
    use std::time::{Duration, SystemTime};

    #[test]
    fn formats_known_instant() {
        // 2001-09-09T01:46:40.250Z
        let time = SystemTime::UNIX_EPOCH + Duration::from_millis(1_000_000_000_250);
        let ts = Timestamp::from_system_time(time);
        assert_eq!(ts.file_suffix(), "010909_014640");
        assert_eq!(ts.run_id(), "20010909-0146");
        assert_eq!(ts.log_stamp(), "01-09-09 01:46:40.250");
    }
}

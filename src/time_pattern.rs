use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{Datelike, NaiveDate};
use csv::ReaderBuilder;

use crate::errors::{Result, TwinError};
use crate::global_variables::SECONDS_PER_HALF_HOUR;
use crate::history::DateInfo;

/// Calendar of the simulated period, one row per half hour. The row index is
/// the source of truth; every date field is derived from it.
#[derive(Debug, Clone)]
pub struct TimePattern {
    rows: Vec<DateInfo>,
}

fn date_info(date: NaiveDate, hour: u32, minute: u32) -> DateInfo {
    DateInfo {
        year: date.year(),
        month: date.month(),
        day: date.day(),
        weekday: date.weekday().num_days_from_monday(),
        hour,
        minute,
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%d/%m/%Y")
        .map_err(|e| TwinError::Config(format!("bad date '{}': {}", raw, e)))
}

impl TimePattern {
    /// Reads a semicolon CSV with `date;hour;minute` columns, dates as
    /// dd/mm/yyyy.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv = ReaderBuilder::new().delimiter(b';').from_reader(reader);
        let headers = csv
            .headers()
            .map_err(|e| TwinError::Config(format!("time pattern: {}", e)))?
            .clone();
        let col = |name: &str| -> Result<usize> {
            headers
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| TwinError::Config(format!("time pattern: missing column '{}'", name)))
        };
        let (date_col, hour_col, minute_col) = (col("date")?, col("hour")?, col("minute")?);
        let mut rows = Vec::new();
        for record in csv.records() {
            let record = record.map_err(|e| TwinError::Config(format!("time pattern: {}", e)))?;
            let date = parse_date(&record[date_col])?;
            let hour: u32 = record[hour_col]
                .trim()
                .parse()
                .map_err(|_| TwinError::Config(format!("bad hour '{}'", &record[hour_col])))?;
            let minute: u32 = record[minute_col]
                .trim()
                .parse()
                .map_err(|_| TwinError::Config(format!("bad minute '{}'", &record[minute_col])))?;
            rows.push(date_info(date, hour, minute));
        }
        if rows.is_empty() {
            return Err(TwinError::Config("time pattern file has no rows".into()));
        }
        Ok(TimePattern { rows })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| TwinError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_reader(file)
    }

    /// Synthesizes the 48 half-hour rows of every day in an inclusive
    /// `dd/mm/yyyy-dd/mm/yyyy` range.
    pub fn from_date_range(spec: &str) -> Result<Self> {
        let (start_raw, end_raw) = spec
            .split_once('-')
            .ok_or_else(|| TwinError::Config(format!("bad date range '{}'", spec)))?;
        let start = parse_date(start_raw)?;
        let end = parse_date(end_raw)?;
        if end < start {
            return Err(TwinError::Config(format!(
                "date range '{}' ends before it starts",
                spec
            )));
        }
        let mut rows = Vec::new();
        let mut day = start;
        while day <= end {
            for half_hour in 0..48u32 {
                rows.push(date_info(day, half_hour / 2, (half_hour % 2) * 30));
            }
            day = day.succ_opt().ok_or_else(|| {
                TwinError::Config(format!("date range '{}' overflows the calendar", spec))
            })?;
        }
        Ok(TimePattern { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Simulated seconds the calendar covers; the loop's step bound.
    pub fn total_seconds(&self) -> u64 {
        self.rows.len() as u64 * SECONDS_PER_HALF_HOUR
    }

    /// Calendar fields at a simulation timestep. Steps past the calendar's
    /// end clamp to the last row.
    pub fn date_at(&self, timestep: u64) -> Option<DateInfo> {
        let idx = (timestep / SECONDS_PER_HALF_HOUR) as usize;
        self.rows
            .get(idx)
            .or_else(|| self.rows.last())
            .copied()
    }
}

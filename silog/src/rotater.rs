// Copyright 2021-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Datelike, Utc};

/// Calendar interval after which a rotating file protocol starts a new
/// log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotateMode {
    #[default]
    None,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl RotateMode {
    /// Parses a rotate-mode name as it appears in a connections string.
    pub fn from_name(name: &str) -> Option<RotateMode> {
        match name.trim().to_ascii_lowercase().as_str() {
            "none" => Some(RotateMode::None),
            "hourly" => Some(RotateMode::Hourly),
            "daily" => Some(RotateMode::Daily),
            "weekly" => Some(RotateMode::Weekly),
            "monthly" => Some(RotateMode::Monthly),
            _ => None,
        }
    }
}

/// Tracks the UTC calendar bucket the current log file belongs to.
///
/// A bucket is the half-open interval of the configured mode: the hour,
/// the day, the ISO week (starting Monday) or the month containing a
/// timestamp.
#[derive(Debug, Default)]
pub struct FileRotater {
    mode: RotateMode,
    bucket: Option<i64>,
}

impl FileRotater {
    pub fn new(mode: RotateMode) -> FileRotater {
        FileRotater { mode, bucket: None }
    }

    pub fn mode(&self) -> RotateMode {
        self.mode
    }

    /// Records the bucket of the file opened at `timestamp`.
    pub fn initialize(&mut self, timestamp: DateTime<Utc>) {
        self.bucket = bucket_of(self.mode, timestamp);
    }

    /// Returns true when `timestamp` falls outside the stored bucket, and
    /// stores the new bucket in that case.
    pub fn update(&mut self, timestamp: DateTime<Utc>) -> bool {
        let bucket = bucket_of(self.mode, timestamp);
        if bucket == self.bucket {
            return false;
        }
        self.bucket = bucket;
        true
    }
}

fn bucket_of(mode: RotateMode, timestamp: DateTime<Utc>) -> Option<i64> {
    match mode {
        RotateMode::None => None,
        RotateMode::Hourly => Some(timestamp.timestamp().div_euclid(3600)),
        RotateMode::Daily => Some(timestamp.timestamp().div_euclid(86400)),
        RotateMode::Weekly => {
            let week = timestamp.iso_week();
            Some(week.year() as i64 * 100 + week.week() as i64)
        }
        RotateMode::Monthly => {
            Some(timestamp.year() as i64 * 12 + timestamp.month0() as i64)
        }
    }
}

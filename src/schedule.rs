// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Daily trigger for relay sessions

use anyhow::{Context, Result};
use chrono::{DateTime, Days, NaiveTime, Utc};
use std::time::Duration;

/// Fires once a day at a fixed UTC wall-clock time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl DailySchedule {
    /// Parse `HH:MM`
    pub fn parse(s: &str) -> Result<Self> {
        let at = NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .context("schedule must be HH:MM (UTC)")?;
        Ok(Self { at })
    }

    /// First firing strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.at).and_utc();
        if today > now {
            today
        } else {
            now.date_naive()
                .checked_add_days(Days::new(1))
                .map(|d| d.and_time(self.at).and_utc())
                .unwrap_or(today)
        }
    }

    /// Time to wait from `now` until the next firing
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        (self.next_after(now) - now).to_std().unwrap_or(Duration::ZERO)
    }
}

//! Schedule configurator: build, validate and describe a schedule before
//! it is submitted for one or more customer groups.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use fbminer_core::error::{MinerError, Result};
use fbminer_core::types::{InactivityUnit, RepeatType, ScheduleMessage, ScheduleRequest, ScheduleType};
use serde::{Deserialize, Serialize};

const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// A schedule being edited. Dates and times are the operator's local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleDraft {
    pub page_id: String,
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub time: Option<NaiveTime>,
    #[serde(default = "default_period")]
    pub inactivity_period: u32,
    #[serde(default = "default_unit")]
    pub inactivity_unit: InactivityUnit,
    #[serde(default)]
    pub repeat_type: RepeatType,
    /// 0 = Sunday … 6 = Saturday.
    #[serde(default)]
    pub repeat_days: Vec<u8>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub group_ids: Vec<i64>,
    #[serde(default)]
    pub messages: Vec<ScheduleMessage>,
}

fn default_period() -> u32 { 1 }
fn default_unit() -> InactivityUnit { InactivityUnit::Days }

impl ScheduleDraft {
    fn with_type(page_id: &str, schedule_type: ScheduleType) -> Self {
        Self {
            page_id: page_id.to_string(),
            schedule_type,
            date: None,
            time: None,
            inactivity_period: default_period(),
            inactivity_unit: default_unit(),
            repeat_type: RepeatType::Once,
            repeat_days: Vec::new(),
            end_date: None,
            group_ids: Vec::new(),
            messages: Vec::new(),
        }
    }

    pub fn immediate(page_id: &str) -> Self {
        Self::with_type(page_id, ScheduleType::Immediate)
    }

    pub fn at(page_id: &str, date: NaiveDate, time: NaiveTime) -> Self {
        let mut draft = Self::with_type(page_id, ScheduleType::Scheduled);
        draft.date = Some(date);
        draft.time = Some(time);
        draft
    }

    pub fn after_inactivity(page_id: &str, period: u32, unit: InactivityUnit) -> Self {
        let mut draft = Self::with_type(page_id, ScheduleType::UserInactive);
        draft.inactivity_period = period;
        draft.inactivity_unit = unit;
        draft
    }

    pub fn repeat(mut self, repeat_type: RepeatType) -> Self {
        self.repeat_type = repeat_type;
        self
    }

    /// Weekdays for weekly repeats (0 = Sunday). Duplicates are dropped.
    pub fn on_days(mut self, days: &[u8]) -> Self {
        let mut days: Vec<u8> = days.iter().copied().filter(|d| *d < 7).collect();
        days.sort_unstable();
        days.dedup();
        self.repeat_days = days;
        self
    }

    pub fn until(mut self, end_date: NaiveDate) -> Self {
        self.end_date = Some(end_date);
        self
    }

    pub fn for_groups(mut self, group_ids: &[i64]) -> Self {
        self.group_ids = group_ids.to_vec();
        self
    }

    pub fn with_messages(mut self, messages: Vec<ScheduleMessage>) -> Self {
        self.messages = messages;
        self
    }

    fn start(&self) -> Option<NaiveDateTime> {
        Some(self.date?.and_time(self.time?))
    }

    /// Check the draft against `now` (local time).
    pub fn validate(&self, now: NaiveDateTime) -> Result<()> {
        if self.group_ids.is_empty() {
            return Err(MinerError::Validation("select at least one customer group".into()));
        }
        match self.schedule_type {
            ScheduleType::Scheduled => {
                let start = self
                    .start()
                    .ok_or_else(|| MinerError::Validation("pick a date and a time".into()))?;
                if start <= now {
                    return Err(MinerError::Validation(format!(
                        "scheduled time {start} is not in the future"
                    )));
                }
            }
            ScheduleType::UserInactive => {
                if self.inactivity_period < 1 {
                    return Err(MinerError::Validation(
                        "inactivity period must be at least 1".into(),
                    ));
                }
            }
            ScheduleType::Immediate => {}
        }
        if self.repeat_type == RepeatType::Weekly && self.repeat_days.is_empty() {
            return Err(MinerError::Validation("weekly repeat needs at least one weekday".into()));
        }
        if self.repeat_type != RepeatType::Once {
            if let (Some(end), Some(start)) = (self.end_date, self.date) {
                if end <= start {
                    return Err(MinerError::Validation(format!(
                        "end date {end} must be after start date {start}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Human-readable description, e.g.
    /// "Send on 2026-10-20 at 09:00, repeated every week on Mon, Fri".
    pub fn summary(&self) -> String {
        let mut summary = match self.schedule_type {
            ScheduleType::Immediate => return "Send immediately".to_string(),
            ScheduleType::UserInactive => format!(
                "Send when a customer has been inactive for over {} {}",
                self.inactivity_period,
                self.inactivity_unit.label()
            ),
            ScheduleType::Scheduled => match (self.date, self.time) {
                (Some(d), Some(t)) => format!("Send on {} at {}", d, t.format("%H:%M")),
                _ => "Send at an unset time".to_string(),
            },
        };
        let checking = self.schedule_type == ScheduleType::UserInactive;
        let repeat = match self.repeat_type {
            RepeatType::Once => None,
            RepeatType::Daily => Some("every day".to_string()),
            RepeatType::Weekly => Some(format!(
                "every week on {}",
                self.repeat_days
                    .iter()
                    .filter_map(|d| WEEKDAY_NAMES.get(*d as usize))
                    .copied()
                    .collect::<Vec<_>>()
                    .join(", ")
            )),
            RepeatType::Monthly => Some("every month".to_string()),
        };
        if let Some(repeat) = repeat {
            summary.push_str(if checking { ", checked and repeated " } else { ", repeated " });
            summary.push_str(&repeat);
            if let Some(end) = self.end_date {
                summary.push_str(&format!(" until {end}"));
            }
        }
        summary
    }

    /// One backend request per selected group.
    pub fn into_requests(self) -> Vec<ScheduleRequest> {
        let scheduled_date = self.start();
        let scheduled_time = self.time.map(|t| t.format("%H:%M").to_string());
        let inactive = self.schedule_type == ScheduleType::UserInactive;
        let end_date = self.end_date.and_then(|d| d.and_hms_opt(23, 59, 59));
        self.group_ids
            .iter()
            .map(|group_id| ScheduleRequest {
                group_id: *group_id,
                page_id: self.page_id.clone(),
                schedule_type: self.schedule_type,
                scheduled_date,
                scheduled_time: scheduled_time.clone(),
                inactivity_period: inactive.then_some(self.inactivity_period),
                inactivity_unit: inactive.then_some(self.inactivity_unit),
                repeat_type: self.repeat_type,
                repeat_days: self.repeat_days.clone(),
                end_date,
                messages: self.messages.clone(),
                is_active: true,
            })
            .collect()
    }

    /// Next run strictly after `now` for fixed-time schedules (preview only).
    pub fn next_run_after(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        if self.schedule_type != ScheduleType::Scheduled {
            return None;
        }
        let start = self.start()?;
        let time = self.time?;
        let within_end = |at: NaiveDateTime| self.end_date.is_none_or(|end| at.date() <= end);

        let next = match self.repeat_type {
            RepeatType::Once => (start > now).then_some(start),
            RepeatType::Daily => {
                if start > now {
                    Some(start)
                } else {
                    Some(start + Duration::days((now - start).num_days() + 1))
                }
            }
            RepeatType::Weekly => {
                let first_day = start.date().max(now.date());
                (0..8)
                    .map(|offset| first_day + Duration::days(offset))
                    .filter(|d| self.repeat_days.contains(&weekday_index(d.weekday())))
                    .map(|d| d.and_time(time))
                    .find(|at| *at > now && *at >= start)
            }
            RepeatType::Monthly => {
                let day = start.day();
                let (mut year, mut month) = (start.year(), start.month())
                    .max((now.date().year(), now.date().month()));
                // Months lacking the start day are skipped.
                (0..14).find_map(|_| {
                    let at = NaiveDate::from_ymd_opt(year, month, day).map(|d| d.and_time(time));
                    if month == 12 {
                        (year, month) = (year + 1, 1);
                    } else {
                        month += 1;
                    }
                    at.filter(|at| *at > now && *at >= start)
                })
            }
        }?;
        within_end(next).then_some(next)
    }
}

fn weekday_index(day: Weekday) -> u8 {
    day.num_days_from_sunday() as u8
}

//! Daily mining quota. The counter resets when the local date changes.

use chrono::NaiveDate;
use fbminer_core::error::{MinerError, Result};
use serde::{Deserialize, Serialize};

/// Persisted usage for one day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaRecord {
    pub date: Option<NaiveDate>,
    pub used: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct DailyQuota {
    limit: u32,
}

impl DailyQuota {
    pub fn new(limit: u32) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn used(&self, record: &QuotaRecord, today: NaiveDate) -> u32 {
        if record.date == Some(today) { record.used } else { 0 }
    }

    pub fn remaining(&self, record: &QuotaRecord, today: NaiveDate) -> u32 {
        self.limit.saturating_sub(self.used(record, today))
    }

    /// Fail unless `requested` conversations fit in what is left today.
    pub fn check(&self, record: &QuotaRecord, today: NaiveDate, requested: usize) -> Result<u32> {
        let remaining = self.remaining(record, today);
        if remaining == 0 {
            return Err(MinerError::Quota(format!(
                "all {} conversations for {today} are used",
                self.limit
            )));
        }
        if requested > remaining as usize {
            return Err(MinerError::Quota(format!(
                "{requested} selected but only {remaining} of {} left today",
                self.limit
            )));
        }
        Ok(remaining)
    }

    /// Count `n` mined conversations against today.
    pub fn charge(&self, record: &mut QuotaRecord, today: NaiveDate, n: u32) {
        let used = self.used(record, today);
        record.date = Some(today);
        record.used = used.saturating_add(n);
    }
}

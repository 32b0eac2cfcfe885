//! Conversation table state: loaded rows, active filters and the ordered
//! selection a dispatch job is built from.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use fbminer_core::types::{Conversation, InactivityEntry, MiningStatusEntry, parse_timestamp};

/// Mining status shown for customers the backend has no record for.
pub const NOT_MINED: &str = "not_mined";

/// "Gone for" filter buckets, measured from the last activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisappearWindow {
    Day,
    ThreeDays,
    Week,
    Month,
    ThreeMonths,
    SixMonths,
    Year,
    OverYear,
}

impl DisappearWindow {
    fn matches(&self, idle_days: f64) -> bool {
        match self {
            DisappearWindow::Day => idle_days <= 1.0,
            DisappearWindow::ThreeDays => idle_days <= 3.0,
            DisappearWindow::Week => idle_days <= 7.0,
            DisappearWindow::Month => idle_days <= 30.0,
            DisappearWindow::ThreeMonths => idle_days <= 90.0,
            DisappearWindow::SixMonths => idle_days <= 180.0,
            DisappearWindow::Year => idle_days <= 365.0,
            DisappearWindow::OverYear => idle_days > 365.0,
        }
    }
}

impl std::str::FromStr for DisappearWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1d" => Ok(DisappearWindow::Day),
            "3d" => Ok(DisappearWindow::ThreeDays),
            "7d" => Ok(DisappearWindow::Week),
            "1m" => Ok(DisappearWindow::Month),
            "3m" => Ok(DisappearWindow::ThreeMonths),
            "6m" => Ok(DisappearWindow::SixMonths),
            "1y" => Ok(DisappearWindow::Year),
            "over1y" => Ok(DisappearWindow::OverYear),
            other => Err(format!("unknown window '{other}' (1d, 3d, 7d, 1m, 3m, 6m, 1y, over1y)")),
        }
    }
}

/// Active table filters; `None` fields don't filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationFilter {
    pub disappear: Option<DisappearWindow>,
    pub customer_type: Option<String>,
    pub platform: Option<String>,
    pub mining_status: Option<String>,
    /// Inclusive range on the first-interaction date.
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Exact first-contact day (the "entered on" quick filter).
    pub entry_date: Option<NaiveDate>,
}

impl ConversationFilter {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, conv: &Conversation, now: DateTime<Utc>) -> bool {
        if let Some(day) = self.entry_date {
            if conv.first_seen().map(|t| t.date_naive()) != Some(day) {
                return false;
            }
        }
        if let Some(window) = self.disappear {
            let Some(last) = conv.last_activity() else {
                return false;
            };
            let idle_days = (now - last).num_seconds() as f64 / 86_400.0;
            if !window.matches(idle_days) {
                return false;
            }
        }
        if let Some(kind) = &self.customer_type {
            if !conv
                .customer_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case(kind))
            {
                return false;
            }
        }
        if let Some(platform) = &self.platform {
            if !conv
                .platform
                .as_deref()
                .is_some_and(|p| p.eq_ignore_ascii_case(platform))
            {
                return false;
            }
        }
        if let Some(status) = &self.mining_status {
            if conv.mining_status.as_deref().unwrap_or(NOT_MINED) != status {
                return false;
            }
        }
        if self.start_date.is_some() || self.end_date.is_some() {
            let Some(first) = conv
                .first_interaction_at
                .as_deref()
                .and_then(parse_timestamp)
                .map(|t| t.date_naive())
            else {
                return false;
            };
            if self.start_date.is_some_and(|start| first < start) {
                return false;
            }
            if self.end_date.is_some_and(|end| first > end) {
                return false;
            }
        }
        true
    }
}

/// Rows, filter and selection of the conversation table for one page.
#[derive(Debug, Default)]
pub struct ConversationBoard {
    page_id: Option<String>,
    conversations: Vec<Conversation>,
    filter: ConversationFilter,
    selected: Vec<String>,
}

impl ConversationBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_id(&self) -> Option<&str> {
        self.page_id.as_deref()
    }

    /// Replace the loaded rows. Switching page drops the selection.
    pub fn load(&mut self, page_id: &str, conversations: Vec<Conversation>) {
        if self.page_id.as_deref() != Some(page_id) {
            self.selected.clear();
            self.page_id = Some(page_id.to_string());
        }
        self.conversations = conversations;
        // Keep only selections that still exist.
        let ids: Vec<&str> = self.conversations.iter().map(|c| c.conversation_id.as_str()).collect();
        self.selected.retain(|id| ids.contains(&id.as_str()));
    }

    pub fn all(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn filter(&self) -> &ConversationFilter {
        &self.filter
    }

    pub fn set_filter(&mut self, filter: ConversationFilter) {
        self.filter = filter;
    }

    pub fn clear_filter(&mut self) {
        self.filter = ConversationFilter::default();
    }

    /// Rows passing the filter, in load order.
    pub fn displayed(&self) -> Vec<&Conversation> {
        self.displayed_at(Utc::now())
    }

    pub fn displayed_at(&self, now: DateTime<Utc>) -> Vec<&Conversation> {
        self.conversations
            .iter()
            .filter(|c| self.filter.matches(c, now))
            .collect()
    }

    // ─── Selection ─────────────────────────────────────

    /// Selected conversation ids, in the order they were picked.
    pub fn selected(&self) -> &[String] {
        &self.selected
    }

    pub fn is_selected(&self, conversation_id: &str) -> bool {
        self.selected.iter().any(|id| id == conversation_id)
    }

    pub fn select(&mut self, conversation_id: &str) {
        if !self.is_selected(conversation_id) {
            self.selected.push(conversation_id.to_string());
        }
    }

    pub fn deselect(&mut self, conversation_id: &str) {
        self.selected.retain(|id| id != conversation_id);
    }

    pub fn toggle(&mut self, conversation_id: &str) {
        if self.is_selected(conversation_id) {
            self.deselect(conversation_id);
        } else {
            self.select(conversation_id);
        }
    }

    /// Select every displayed row (appended after existing picks).
    pub fn select_displayed(&mut self) {
        let ids: Vec<String> = self
            .displayed()
            .into_iter()
            .map(|c| c.conversation_id.clone())
            .collect();
        for id in ids {
            self.select(&id);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selected.clear();
    }

    /// Send target of a conversation, looked up among the displayed rows.
    pub fn resolve_target(&self, conversation_id: &str) -> Option<String> {
        self.displayed()
            .into_iter()
            .find(|c| c.conversation_id == conversation_id)
            .and_then(|c| c.raw_psid.clone())
            .filter(|psid| !psid.is_empty())
    }

    /// Selection paired with resolved targets, in selection order.
    pub fn selected_targets(&self) -> Vec<(String, Option<String>)> {
        self.selected
            .iter()
            .map(|id| (id.clone(), self.resolve_target(id)))
            .collect()
    }

    // ─── Row updates ───────────────────────────────────

    /// Set the mining status of rows whose PSID is listed.
    pub fn mark_mined(&mut self, psids: &[String], status: &str) -> usize {
        let mut marked = 0;
        for conv in &mut self.conversations {
            if conv.raw_psid.as_ref().is_some_and(|p| psids.contains(p)) {
                conv.mining_status = Some(status.to_string());
                marked += 1;
            }
        }
        marked
    }

    /// Merge statuses fetched from the backend into the rows.
    pub fn apply_mining_statuses(&mut self, statuses: &HashMap<String, MiningStatusEntry>) {
        for conv in &mut self.conversations {
            if let Some(entry) = conv.raw_psid.as_ref().and_then(|p| statuses.get(p)) {
                conv.mining_status = Some(entry.status.clone());
            }
        }
    }

    /// Insert or replace a row pushed by the backend; new rows go first.
    pub fn upsert(&mut self, conversation: Conversation) -> bool {
        match self
            .conversations
            .iter_mut()
            .find(|c| c.conversation_id == conversation.conversation_id)
        {
            Some(existing) => {
                *existing = conversation;
                false
            }
            None => {
                self.conversations.insert(0, conversation);
                true
            }
        }
    }

    /// Inactivity of every row with a target, for the backend's
    /// user-inactive schedules.
    pub fn inactivity_batch(&self, now: DateTime<Utc>) -> Vec<InactivityEntry> {
        self.conversations
            .iter()
            .filter_map(|c| {
                let psid = c.raw_psid.clone()?;
                Some(InactivityEntry {
                    user_id: psid,
                    conversation_id: c.conversation_id.clone(),
                    last_message_time: c.last_user_message_time.clone().or_else(|| c.updated_time.clone()),
                    inactivity_minutes: c.inactivity_minutes(now),
                })
            })
            .collect()
    }
}

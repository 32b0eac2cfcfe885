//! Wire and domain types exchanged with the mining backend.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

// ─── Pages & conversations ─────────────────────────────

/// A connected Facebook Page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub name: String,
}

/// A customer thread as displayed in the conversation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Row identifier used by the selection.
    pub conversation_id: String,
    /// Display name of the customer.
    pub name: String,
    /// Page-scoped user id, the send target. Missing for broken rows.
    pub raw_psid: Option<String>,
    pub updated_time: Option<String>,
    pub created_time: Option<String>,
    /// Last time the customer (not the page) wrote.
    pub last_user_message_time: Option<String>,
    pub first_interaction_at: Option<String>,
    pub source_type: Option<String>,
    pub platform: Option<String>,
    pub customer_type: Option<String>,
    pub mining_status: Option<String>,
}

impl Conversation {
    /// Reference time for inactivity: last user message, else last update.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_user_message_time
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| self.updated_time.as_deref().and_then(parse_timestamp))
    }

    /// First contact: first interaction, else creation time.
    pub fn first_seen(&self) -> Option<DateTime<Utc>> {
        self.first_interaction_at
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| self.created_time.as_deref().and_then(parse_timestamp))
    }

    /// Whole minutes since the last activity, clamped at zero.
    pub fn inactivity_minutes(&self, now: DateTime<Utc>) -> i64 {
        self.last_activity()
            .map(|t| (now - t).num_minutes().max(0))
            .unwrap_or(0)
    }
}

/// Raw customer row from `/fb-customers/by-page/{page}`.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomerRow {
    pub customer_psid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub last_interaction_at: Option<String>,
    #[serde(default)]
    pub first_interaction_at: Option<String>,
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default, alias = "customer_type_knowledge_name")]
    pub customer_type: Option<String>,
    #[serde(default)]
    pub mining_status: Option<String>,
}

impl From<CustomerRow> for Conversation {
    fn from(row: CustomerRow) -> Self {
        let psid = if row.customer_psid.is_empty() {
            None
        } else {
            Some(row.customer_psid.clone())
        };
        Self {
            conversation_id: row.customer_psid,
            name: row.name.unwrap_or_default(),
            raw_psid: psid,
            updated_time: row.updated_at,
            created_time: row.created_at,
            last_user_message_time: row.last_interaction_at,
            first_interaction_at: row.first_interaction_at,
            source_type: row.source_type,
            platform: row.platform,
            customer_type: row.customer_type,
            mining_status: row.mining_status,
        }
    }
}

/// One entry of a conversation history (`/messages/{page}/{conversation}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub from: Option<HistorySender>,
    #[serde(default)]
    pub created_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySender {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

// ─── Messages & message sets ───────────────────────────

/// Kind of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
        }
    }

    /// Bracketed marker the editor prepends to media content.
    pub fn marker(&self) -> Option<&'static str> {
        match self {
            MessageKind::Text => None,
            MessageKind::Image => Some("[IMAGE]"),
            MessageKind::Video => Some("[VIDEO]"),
        }
    }

    /// Media folder on the backend static server.
    pub fn media_dir(&self) -> Option<&'static str> {
        match self {
            MessageKind::Text => None,
            MessageKind::Image => Some("images"),
            MessageKind::Video => Some("videos"),
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "video" => Ok(MessageKind::Video),
            other => Err(format!("unknown message type '{other}'")),
        }
    }
}

/// A named, ordered collection of messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSet {
    pub id: i64,
    pub page_id: String,
    pub set_name: String,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A message stored inside a message set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetMessage {
    pub id: i64,
    pub message_set_id: i64,
    #[serde(default)]
    pub page_id: String,
    pub message_type: MessageKind,
    pub content: String,
    pub display_order: i64,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Payload for creating a message inside a set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSetMessage {
    pub message_set_id: i64,
    pub page_id: String,
    pub message_type: MessageKind,
    pub content: String,
    pub display_order: i64,
    /// Inline media upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data_base64: Option<String>,
}

/// Body of `POST /send/{page}/{psid}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default)]
    pub is_system_message: bool,
}

/// Backend acknowledgement of a queued send.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendReceipt {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body of `POST /mining-status/update/{page}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningStatusUpdate {
    pub customer_psids: Vec<String>,
    pub status: String,
    #[serde(default)]
    pub note: Option<String>,
}

// ─── Customer groups ───────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerGroup {
    pub id: i64,
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    pub page_id: Option<String>,
    #[serde(alias = "type_name")]
    pub name: String,
    #[serde(default)]
    pub customer_count: i64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub rule_description: String,
    #[serde(default, deserialize_with = "de_string_list")]
    pub keywords: Vec<String>,
    #[serde(default, deserialize_with = "de_string_list")]
    pub examples: Vec<String>,
    #[serde(default = "bool_true")]
    pub is_active: bool,
}

/// Payload for creating or updating a group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub rule_description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub examples: Vec<String>,
}

/// A message attached to a customer group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub page_id: String,
    /// Group id on the backend.
    pub customer_type_custom_id: i64,
    pub message_type: MessageKind,
    pub content: String,
    pub display_order: i64,
}

// ─── Schedules ─────────────────────────────────────────

/// When a schedule fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleType {
    Immediate,
    Scheduled,
    UserInactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InactivityUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

impl InactivityUnit {
    /// Length of `period` units in minutes (a month counts as 30 days).
    pub fn to_minutes(&self, period: u32) -> i64 {
        let per = match self {
            InactivityUnit::Minutes => 1,
            InactivityUnit::Hours => 60,
            InactivityUnit::Days => 60 * 24,
            InactivityUnit::Weeks => 60 * 24 * 7,
            InactivityUnit::Months => 60 * 24 * 30,
        };
        per * period as i64
    }

    pub fn label(&self) -> &'static str {
        match self {
            InactivityUnit::Minutes => "minutes",
            InactivityUnit::Hours => "hours",
            InactivityUnit::Days => "days",
            InactivityUnit::Weeks => "weeks",
            InactivityUnit::Months => "months",
        }
    }
}

impl std::str::FromStr for InactivityUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().trim_end_matches('s') {
            "minute" | "min" => Ok(InactivityUnit::Minutes),
            "hour" | "h" => Ok(InactivityUnit::Hours),
            "day" | "d" => Ok(InactivityUnit::Days),
            "week" | "w" => Ok(InactivityUnit::Weeks),
            "month" | "m" => Ok(InactivityUnit::Months),
            other => Err(format!("unknown inactivity unit '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatType {
    #[default]
    Once,
    Daily,
    Weekly,
    Monthly,
}

impl std::str::FromStr for RepeatType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "once" | "none" => Ok(RepeatType::Once),
            "daily" => Ok(RepeatType::Daily),
            "weekly" => Ok(RepeatType::Weekly),
            "monthly" => Ok(RepeatType::Monthly),
            other => Err(format!("unknown repeat type '{other}'")),
        }
    }
}

/// Message reference carried by a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleMessage {
    pub message_type: MessageKind,
    pub content: String,
    pub display_order: i64,
}

/// Body of `POST /message-schedules` (one group per request).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub group_id: i64,
    pub page_id: String,
    #[serde(rename = "type")]
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub scheduled_date: Option<NaiveDateTime>,
    /// "HH:MM"
    #[serde(default)]
    pub scheduled_time: Option<String>,
    #[serde(default)]
    pub inactivity_period: Option<u32>,
    #[serde(default)]
    pub inactivity_unit: Option<InactivityUnit>,
    #[serde(default)]
    pub repeat_type: RepeatType,
    /// Weekdays, 0 = Sunday … 6 = Saturday.
    #[serde(default)]
    pub repeat_days: Vec<u8>,
    #[serde(default)]
    pub end_date: Option<NaiveDateTime>,
    pub messages: Vec<ScheduleMessage>,
    #[serde(default = "bool_true")]
    pub is_active: bool,
}

/// A schedule as stored by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: i64,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_string_or_number")]
    pub page_id: Option<String>,
    #[serde(rename = "type")]
    pub schedule_type: ScheduleType,
    #[serde(default)]
    pub scheduled_date: Option<String>,
    #[serde(default)]
    pub scheduled_time: Option<String>,
    #[serde(default)]
    pub inactivity_period: Option<u32>,
    #[serde(default)]
    pub inactivity_unit: Option<InactivityUnit>,
    #[serde(default)]
    pub repeat_type: RepeatType,
    #[serde(default)]
    pub repeat_days: Option<Vec<u8>>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub messages: Vec<serde_json::Value>,
    #[serde(default = "bool_true")]
    pub is_active: bool,
    #[serde(default)]
    pub last_run_at: Option<String>,
    #[serde(default)]
    pub next_run_at: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

// ─── Reports ───────────────────────────────────────────

/// Current mining status of one customer (`/mining-status/{page}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MiningStatusEntry {
    pub status: String,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// `/customer-statistics/{page}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerStatistics {
    #[serde(default)]
    pub page_id: String,
    #[serde(default)]
    pub page_name: Option<String>,
    #[serde(default)]
    pub statistics: serde_json::Value,
    #[serde(default)]
    pub generated_at: Option<String>,
}

/// A newly arrived customer from `/new-user-notifications/{page}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub profile_pic: Option<String>,
}

/// `/sync-customers/{page}` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub synced: i64,
    #[serde(default)]
    pub errors: i64,
    #[serde(default)]
    pub message: String,
}

/// One row of the inactivity batch (`/update-user-inactivity/{page}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InactivityEntry {
    pub user_id: String,
    pub conversation_id: String,
    pub last_message_time: Option<String>,
    pub inactivity_minutes: i64,
}

// ─── Helpers ───────────────────────────────────────────

/// Parse a backend timestamp. Accepts RFC 3339 or a naive ISO string
/// (interpreted as UTC).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

fn bool_true() -> bool {
    true
}

fn de_opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Accepts `["a","b"]`, `"a, b"` or null.
fn de_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Array(items)) => items
            .into_iter()
            .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
            .collect(),
        Some(serde_json::Value::String(s)) => s
            .split([',', '\n'])
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => Vec::new(),
    })
}

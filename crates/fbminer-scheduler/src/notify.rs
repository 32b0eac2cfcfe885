//! Operator notices: dispatch progress, results, new customers.
//! In-memory only; the CLI subscribes and prints them as they arrive.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Most notices kept in history.
const HISTORY_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    /// Transient "sending…" banner, removed when the job ends.
    Send,
    Success,
    Error,
    Warning,
    Info,
}

impl NoticeKind {
    pub fn emoji(&self) -> &'static str {
        match self {
            NoticeKind::Send => "📤",
            NoticeKind::Success => "✅",
            NoticeKind::Error => "❌",
            NoticeKind::Warning => "⚠️",
            NoticeKind::Info => "ℹ️",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub id: u64,
    pub kind: NoticeKind,
    pub title: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl Notice {
    /// One-line rendering for terminals.
    pub fn render(&self) -> String {
        if self.body.is_empty() {
            format!("{} {}", self.kind.emoji(), self.title)
        } else {
            format!("{} {}: {}", self.kind.emoji(), self.title, self.body)
        }
    }
}

/// Notice history plus a broadcast feed for live listeners.
pub struct NotifyRouter {
    history: Mutex<VecDeque<Notice>>,
    next_id: AtomicU64,
    feed: broadcast::Sender<Notice>,
}

impl NotifyRouter {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(32);
        Self {
            history: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            feed,
        }
    }

    /// Record and broadcast a notice; returns its id.
    pub fn push(&self, kind: NoticeKind, title: &str, body: &str) -> u64 {
        let notice = Notice {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            title: title.to_string(),
            body: body.to_string(),
            timestamp: Utc::now(),
        };
        let id = notice.id;
        if let Ok(mut history) = self.history.lock() {
            history.push_back(notice.clone());
            // Ring buffer: keep last 100
            while history.len() > HISTORY_LIMIT {
                history.pop_front();
            }
        }
        // No listeners is fine.
        let _ = self.feed.send(notice);
        id
    }

    pub fn dismiss(&self, id: u64) {
        if let Ok(mut history) = self.history.lock() {
            history.retain(|n| n.id != id);
        }
    }

    /// Remove every notice of one kind (e.g. the transient `Send` banner).
    pub fn dismiss_kind(&self, kind: NoticeKind) {
        if let Ok(mut history) = self.history.lock() {
            history.retain(|n| n.kind != kind);
        }
    }

    pub fn history(&self) -> Vec<Notice> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.feed.subscribe()
    }
}

impl Default for NotifyRouter {
    fn default() -> Self {
        Self::new()
    }
}

//! Detects new customer activity on the selected page.
//!
//! Two strategies share one output type: polling re-fetches the
//! conversation list on an interval and diffs timestamps, push mode maps
//! Socket.IO events. Either way the loop lives in a tokio task owned by a
//! [`WatchHandle`] and stops when the handle is dropped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fbminer_core::config::{CompareBy, WatchConfig, WatchMode};
use fbminer_core::error::Result;
use fbminer_core::traits::Catalog;
use fbminer_core::types::{Conversation, NewUser};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::http::HttpBackend;
use crate::realtime::{RealtimeClient, RealtimeEvent, RealtimeHandle};

/// A conversation that appeared or moved since the last look.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationChange {
    New(Conversation),
    Updated(Conversation),
}

impl ConversationChange {
    pub fn conversation(&self) -> &Conversation {
        match self {
            ConversationChange::New(c) | ConversationChange::Updated(c) => c,
        }
    }

    pub fn into_conversation(self) -> Conversation {
        match self {
            ConversationChange::New(c) | ConversationChange::Updated(c) => c,
        }
    }
}

/// Timestamp diff between successive conversation lists.
pub struct ChangeDetector {
    compare_by: CompareBy,
    seen: HashMap<String, Option<String>>,
    primed: bool,
}

impl ChangeDetector {
    pub fn new(compare_by: CompareBy) -> Self {
        Self {
            compare_by,
            seen: HashMap::new(),
            primed: false,
        }
    }

    fn stamp(&self, conv: &Conversation) -> Option<String> {
        match self.compare_by {
            CompareBy::LastUserMessage => conv
                .last_user_message_time
                .clone()
                .or_else(|| conv.updated_time.clone()),
            CompareBy::Updated => conv.updated_time.clone(),
        }
    }

    /// Compare against the previous list. The first call only records a
    /// baseline and reports nothing.
    pub fn diff(&mut self, conversations: &[Conversation]) -> Vec<ConversationChange> {
        let mut changes = Vec::new();
        let mut next = HashMap::with_capacity(conversations.len());
        for conv in conversations {
            let stamp = self.stamp(conv);
            if self.primed {
                match self.seen.get(&conv.conversation_id) {
                    None => changes.push(ConversationChange::New(conv.clone())),
                    Some(prev) if *prev != stamp => changes.push(ConversationChange::Updated(conv.clone())),
                    Some(_) => {}
                }
            }
            next.insert(conv.conversation_id.clone(), stamp);
        }
        self.seen = next;
        self.primed = true;
        changes
    }

    pub fn reset(&mut self) {
        self.seen.clear();
        self.primed = false;
    }
}

/// Owns the background watch tasks; dropping it stops them.
pub struct WatchHandle {
    page: watch::Sender<String>,
    realtime: Option<RealtimeHandle>,
    tasks: Vec<JoinHandle<()>>,
    clock: watch::Receiver<DateTime<Utc>>,
}

impl WatchHandle {
    fn new(page: watch::Sender<String>, realtime: Option<RealtimeHandle>, mut tasks: Vec<JoinHandle<()>>) -> Self {
        let (clock_task, clock) = spawn_clock(Duration::from_secs(1));
        tasks.push(clock_task);
        Self {
            page,
            realtime,
            tasks,
            clock,
        }
    }

    pub fn page_id(&self) -> String {
        self.page.borrow().clone()
    }

    /// Follow another page; the diff baseline starts over.
    pub async fn switch_page(&self, page_id: &str) -> Result<()> {
        if let Some(realtime) = &self.realtime {
            realtime.switch_page(page_id).await?;
        }
        self.page.send_replace(page_id.to_string());
        Ok(())
    }

    /// Wall clock ticking once a second, for "updated N s ago" displays.
    pub fn clock(&self) -> watch::Receiver<DateTime<Utc>> {
        self.clock.clone()
    }

    /// Abort every task owned by this handle.
    pub fn stop(self) {
        drop(self);
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

fn spawn_clock(period: Duration) -> (JoinHandle<()>, watch::Receiver<DateTime<Utc>>) {
    let (tx, rx) = watch::channel(Utc::now());
    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            if tx.send(Utc::now()).is_err() {
                return;
            }
        }
    });
    (task, rx)
}

pub struct ChangeWatcher;

impl ChangeWatcher {
    /// Start watching in the configured mode. Polling must be given an
    /// uncached catalog or it will only ever see cached lists.
    pub fn start<C: Catalog + 'static>(
        catalog: Arc<C>,
        base_url: &str,
        config: &WatchConfig,
        page_id: &str,
    ) -> (WatchHandle, mpsc::Receiver<ConversationChange>) {
        match config.mode {
            WatchMode::Push => Self::push(base_url, config, page_id),
            WatchMode::Poll => Self::poll(
                catalog,
                page_id,
                Duration::from_secs(config.poll_interval_secs.max(1)),
                config.compare_by,
            ),
        }
    }

    /// Re-fetch and diff every `interval`.
    pub fn poll<C: Catalog + 'static>(
        catalog: Arc<C>,
        page_id: &str,
        interval: Duration,
        compare_by: CompareBy,
    ) -> (WatchHandle, mpsc::Receiver<ConversationChange>) {
        let (page_tx, mut page_rx) = watch::channel(page_id.to_string());
        let (tx, rx) = mpsc::channel(64);
        tracing::info!("👀 Polling conversations every {interval:?}");

        let task = tokio::spawn(async move {
            let mut detector = ChangeDetector::new(compare_by);
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = page_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        detector.reset();
                    }
                }
                let page = page_rx.borrow_and_update().clone();
                let conversations = match catalog.list_conversations(&page).await {
                    Ok(list) => list,
                    Err(e) => {
                        tracing::warn!("⚠️ Poll of page {page} failed: {e}");
                        continue;
                    }
                };
                for change in detector.diff(&conversations) {
                    tracing::info!(
                        "🔔 {} conversation: {}",
                        if matches!(change, ConversationChange::New(_)) { "New" } else { "Updated" },
                        change.conversation().name
                    );
                    if tx.send(change).await.is_err() {
                        return;
                    }
                }
            }
        });

        (WatchHandle::new(page_tx, None, vec![task]), rx)
    }

    /// Follow Socket.IO `new_customer` / `customer_updated` events.
    pub fn push(base_url: &str, config: &WatchConfig, page_id: &str) -> (WatchHandle, mpsc::Receiver<ConversationChange>) {
        let (page_tx, _) = watch::channel(page_id.to_string());
        let (tx, rx) = mpsc::channel(64);
        let (realtime, mut events) = RealtimeClient::new(base_url, config).spawn(page_id);

        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let change = match event {
                    RealtimeEvent::NewCustomer { customer, .. } => ConversationChange::New(customer.into()),
                    RealtimeEvent::CustomerUpdated { customer, .. } => ConversationChange::Updated(customer.into()),
                    RealtimeEvent::Subscribed { page_id } => {
                        tracing::info!("✅ Subscribed to page {page_id}");
                        continue;
                    }
                    RealtimeEvent::Connected => continue,
                    RealtimeEvent::Disconnected => {
                        tracing::warn!("Realtime channel disconnected");
                        continue;
                    }
                };
                tracing::info!("🔔 Push: {}", change.conversation().name);
                if tx.send(change).await.is_err() {
                    return;
                }
            }
        });

        (WatchHandle::new(page_tx, Some(realtime), vec![task]), rx)
    }

    /// Poll `/new-user-notifications` for freshly arrived customers.
    pub fn new_users(backend: Arc<HttpBackend>, page_id: &str, interval: Duration) -> (JoinHandle<()>, mpsc::Receiver<Vec<NewUser>>) {
        let page_id = page_id.to_string();
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match backend.new_user_notifications(&page_id).await {
                    Ok(users) if !users.is_empty() => {
                        if tx.send(users).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(e) => tracing::debug!("New-user poll failed: {e}"),
                }
            }
        });
        (task, rx)
    }
}

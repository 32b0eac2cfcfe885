//! Bulk dispatch: send an ordered list of message sets to every selected
//! conversation, one request at a time.
//!
//! ```text
//! for conversation in selection        (selection order)
//!   no target → failed += 1
//!   for set in message_set_ids         (given order)
//!     fetch set messages fresh, sort by display_order
//!     for message → send, pause message_delay
//!     pause set_delay
//! mining status update → quota charge → selection cleared
//! ```

use std::sync::Arc;

use chrono::Local;
use fbminer_client::ConversationBoard;
use fbminer_core::config::DispatchConfig;
use fbminer_core::error::{MinerError, Result};
use fbminer_core::traits::{Catalog, Messenger};
use fbminer_core::types::{MiningStatusUpdate, OutboundMessage, SetMessage};
use tokio::sync::{Mutex, MutexGuard, watch};

use crate::notify::{NoticeKind, NotifyRouter};
use crate::pacing::Pacer;
use crate::quota::DailyQuota;
use crate::store::ClientStore;

/// One unit of work: who gets what.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchJob {
    pub page_id: String,
    /// Conversation id with its resolved send target, in selection order.
    pub targets: Vec<(String, Option<String>)>,
    pub message_set_ids: Vec<i64>,
}

/// Live progress, published after every step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchProgress {
    pub conversations_done: usize,
    pub conversations_total: usize,
    pub messages_sent: usize,
    pub messages_failed: usize,
    pub current_conversation: Option<String>,
    pub current_set: Option<i64>,
    pub running: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Conversations with a resolved target that were processed.
    pub succeeded: usize,
    /// Conversations without a resolvable target.
    pub failed: usize,
    pub messages_sent: usize,
    pub messages_failed: usize,
    /// (conversation, set) pairs skipped because the set could not be loaded.
    pub sets_skipped: usize,
    /// Targets of the succeeded conversations, in selection order.
    pub contacted_psids: Vec<String>,
    /// Whether the backend accepted the mining status for `contacted_psids`.
    pub status_recorded: bool,
}

pub struct Dispatcher<B> {
    backend: Arc<B>,
    pacer: Pacer,
    quota: DailyQuota,
    mined_status: String,
    notify: Arc<NotifyRouter>,
    progress: watch::Sender<DispatchProgress>,
    busy: Mutex<()>,
}

impl<B: Catalog + Messenger> Dispatcher<B> {
    /// `backend` must be uncached: set messages are always read fresh.
    /// Fails when the configured rate limit is unusable.
    pub fn new(backend: Arc<B>, config: &DispatchConfig, notify: Arc<NotifyRouter>) -> Result<Self> {
        let (progress, _) = watch::channel(DispatchProgress::default());
        Ok(Self {
            backend,
            pacer: Pacer::new(config)?,
            quota: DailyQuota::new(config.daily_limit),
            mined_status: config.mined_status.clone(),
            notify,
            progress,
            busy: Mutex::new(()),
        })
    }

    pub fn with_pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn quota(&self) -> DailyQuota {
        self.quota
    }

    pub fn progress(&self) -> watch::Receiver<DispatchProgress> {
        self.progress.subscribe()
    }

    fn claim(&self) -> Result<MutexGuard<'_, ()>> {
        self.busy
            .try_lock()
            .map_err(|_| MinerError::Busy("a dispatch job is already running".into()))
    }

    /// Dispatch to the board's current selection.
    ///
    /// Checks the daily quota first. Once the job has started the selection
    /// is cleared however it ends. Every contacted conversation is charged to
    /// the quota; rows are marked mined only once the backend has recorded it.
    pub async fn run(
        &self,
        board: &mut ConversationBoard,
        message_set_ids: &[i64],
        store: &mut ClientStore,
    ) -> Result<DispatchReport> {
        let _guard = self.claim()?;
        let page_id = board
            .page_id()
            .ok_or_else(|| MinerError::Validation("no page loaded".into()))?
            .to_string();
        if board.selected().is_empty() {
            return Err(MinerError::Validation("no conversations selected".into()));
        }
        if message_set_ids.is_empty() {
            return Err(MinerError::Validation("no message sets chosen".into()));
        }
        let today = Local::now().date_naive();
        self.quota
            .check(&store.state().quota, today, board.selected().len())?;

        let job = DispatchJob {
            page_id,
            targets: board.selected_targets(),
            message_set_ids: message_set_ids.to_vec(),
        };
        let outcome = self.execute(&job).await;
        board.clear_selection();

        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                self.notify.push(NoticeKind::Error, "Sending failed", &e.to_string());
                return Err(e);
            }
        };

        if report.status_recorded {
            board.mark_mined(&report.contacted_psids, &self.mined_status);
        }
        if report.succeeded > 0 {
            let quota = self.quota;
            let charged = report.succeeded as u32;
            store.update(|s| quota.charge(&mut s.quota, today, charged))?;
        }
        Ok(report)
    }

    /// Dispatch a prepared job (no quota, no board).
    pub async fn run_job(&self, job: &DispatchJob) -> Result<DispatchReport> {
        let _guard = self.claim()?;
        self.execute(job).await
    }

    async fn execute(&self, job: &DispatchJob) -> Result<DispatchReport> {
        let total = job.targets.len();
        tracing::info!(
            "📤 Dispatching {} set(s) to {total} conversation(s) on page {}",
            job.message_set_ids.len(),
            job.page_id
        );
        let banner = self.notify.push(
            NoticeKind::Send,
            "Sending messages",
            &format!("{total} conversation(s), {} set(s)", job.message_set_ids.len()),
        );

        let mut report = DispatchReport::default();
        let mut progress = DispatchProgress {
            conversations_total: total,
            running: true,
            ..Default::default()
        };
        self.progress.send_replace(progress.clone());

        for (conversation_id, target) in &job.targets {
            progress.current_conversation = Some(conversation_id.clone());
            progress.current_set = None;
            self.progress.send_replace(progress.clone());

            let Some(psid) = target else {
                tracing::warn!("No send target for conversation {conversation_id}");
                report.failed += 1;
                progress.conversations_done += 1;
                continue;
            };

            for set_id in &job.message_set_ids {
                progress.current_set = Some(*set_id);
                self.progress.send_replace(progress.clone());

                let mut messages = match self.backend.list_set_messages(*set_id).await {
                    Ok(messages) => messages,
                    Err(e) => {
                        tracing::warn!("⚠️ Skipping set {set_id} for {conversation_id}: {e}");
                        report.sets_skipped += 1;
                        continue;
                    }
                };
                messages.sort_by_key(|m| m.display_order);

                for message in &messages {
                    let outbound = self.outbound(message);
                    self.pacer.before_send().await;
                    match self.backend.send_message(&job.page_id, psid, &outbound).await {
                        Ok(_) => {
                            report.messages_sent += 1;
                            progress.messages_sent += 1;
                        }
                        Err(e) => {
                            tracing::warn!("Send of message {} to {psid} failed: {e}", message.id);
                            report.messages_failed += 1;
                            progress.messages_failed += 1;
                        }
                    }
                    self.progress.send_replace(progress.clone());
                    self.pacer.after_message().await;
                }
                self.pacer.after_set().await;
            }

            report.succeeded += 1;
            report.contacted_psids.push(psid.clone());
            progress.conversations_done += 1;
            self.progress.send_replace(progress.clone());
        }

        if !report.contacted_psids.is_empty() {
            report.status_recorded = self.record_mined(job, &report.contacted_psids).await;
        }

        progress.running = false;
        progress.current_conversation = None;
        progress.current_set = None;
        self.progress.send_replace(progress);

        self.notify.dismiss(banner);
        let summary = format!(
            "{} succeeded, {} failed, {} message(s) sent, {} message(s) failed",
            report.succeeded, report.failed, report.messages_sent, report.messages_failed
        );
        let status_lost = report.succeeded > 0 && !report.status_recorded;
        if report.failed > 0 || report.messages_failed > 0 || report.sets_skipped > 0 || status_lost {
            self.notify.push(NoticeKind::Warning, "Sending finished with problems", &summary);
        } else {
            self.notify.push(NoticeKind::Success, "Sending finished", &summary);
        }
        tracing::info!("✅ Dispatch done: {summary}");
        Ok(report)
    }

    /// Returns whether the backend accepted the update.
    async fn record_mined(&self, job: &DispatchJob, psids: &[String]) -> bool {
        let ids: Vec<String> = job.message_set_ids.iter().map(i64::to_string).collect();
        let update = MiningStatusUpdate {
            customer_psids: psids.to_vec(),
            status: self.mined_status.clone(),
            note: Some(format!("Mined with message sets: {}", ids.join(", "))),
        };
        match self.backend.update_mining_status(&job.page_id, &update).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("⚠️ Mining status update failed: {e}");
                self.notify
                    .push(NoticeKind::Warning, "Mining status not saved", &e.to_string());
                false
            }
        }
    }

    fn outbound(&self, message: &SetMessage) -> OutboundMessage {
        let kind = message.message_type;
        let text = match (kind.marker(), kind.media_dir()) {
            (Some(marker), Some(dir)) => media_reference(self.backend.as_ref(), marker, dir, &message.content),
            _ => message.content.clone(),
        };
        OutboundMessage {
            message: text,
            kind,
            is_system_message: true,
        }
    }
}

/// Fully-qualified media URL for stored content like `[IMAGE] cat.jpg`.
/// Content that already is an absolute URL passes through.
pub fn media_reference<M: Messenger + ?Sized>(messenger: &M, marker: &str, dir: &str, content: &str) -> String {
    let trimmed = content.trim();
    let name = trimmed.strip_prefix(marker).unwrap_or(trimmed).trim();
    if name.starts_with("http://") || name.starts_with("https://") {
        return name.to_string();
    }
    messenger.media_url(dir, name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fbminer_core::types::{
        Conversation, CustomerGroup, GroupDraft, MessageKind, MessageSet, NewSetMessage, SendReceipt,
    };
    use std::collections::{HashMap, HashSet};

    /// Records sends; serves set messages from memory.
    #[derive(Default)]
    struct FakeBackend {
        sets: HashMap<i64, Vec<SetMessage>>,
        broken_sets: HashSet<i64>,
        reject_content: Option<String>,
        status_rejected: bool,
        sent: std::sync::Mutex<Vec<(String, OutboundMessage)>>,
        status_updates: std::sync::Mutex<Vec<MiningStatusUpdate>>,
    }

    impl FakeBackend {
        fn sent(&self) -> Vec<(String, OutboundMessage)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Catalog for FakeBackend {
        async fn list_conversations(&self, _page_id: &str) -> Result<Vec<Conversation>> {
            Ok(Vec::new())
        }
        async fn list_message_sets(&self, _page_id: &str) -> Result<Vec<MessageSet>> {
            Ok(Vec::new())
        }
        async fn create_message_set(&self, _page_id: &str, _set_name: &str) -> Result<MessageSet> {
            Err(MinerError::Validation("unsupported".into()))
        }
        async fn rename_message_set(&self, _set_id: i64, _set_name: &str) -> Result<MessageSet> {
            Err(MinerError::Validation("unsupported".into()))
        }
        async fn delete_message_set(&self, _set_id: i64) -> Result<()> {
            Ok(())
        }
        async fn list_set_messages(&self, set_id: i64) -> Result<Vec<SetMessage>> {
            if self.broken_sets.contains(&set_id) {
                return Err(MinerError::Http {
                    status: 500,
                    endpoint: format!("/custom_messages/{set_id}"),
                    body: "boom".into(),
                });
            }
            Ok(self.sets.get(&set_id).cloned().unwrap_or_default())
        }
        async fn create_set_message(&self, _message: &NewSetMessage) -> Result<SetMessage> {
            Err(MinerError::Validation("unsupported".into()))
        }
        async fn create_set_messages_batch(&self, _messages: &[NewSetMessage]) -> Result<usize> {
            Err(MinerError::Validation("unsupported".into()))
        }
        async fn update_set_message(
            &self,
            _message_id: i64,
            _kind: MessageKind,
            _content: &str,
            _display_order: i64,
        ) -> Result<SetMessage> {
            Err(MinerError::Validation("unsupported".into()))
        }
        async fn delete_set_message(&self, _message_id: i64) -> Result<()> {
            Ok(())
        }
        async fn list_groups(&self, _page_id: &str, _include_inactive: bool) -> Result<Vec<CustomerGroup>> {
            Ok(Vec::new())
        }
        async fn create_group(&self, _draft: &GroupDraft) -> Result<()> {
            Ok(())
        }
        async fn update_group(&self, _group_id: i64, _draft: &GroupDraft) -> Result<()> {
            Ok(())
        }
        async fn delete_group(&self, _group_id: i64, _hard_delete: bool) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Messenger for FakeBackend {
        async fn send_message(&self, _page_id: &str, psid: &str, message: &OutboundMessage) -> Result<SendReceipt> {
            if self.reject_content.as_deref() == Some(message.message.as_str()) {
                return Err(MinerError::Backend("send rejected".into()));
            }
            self.sent.lock().unwrap().push((psid.to_string(), message.clone()));
            Ok(SendReceipt {
                success: true,
                ..Default::default()
            })
        }

        async fn update_mining_status(&self, _page_id: &str, update: &MiningStatusUpdate) -> Result<()> {
            if self.status_rejected {
                return Err(MinerError::Backend("Missing required data".into()));
            }
            self.status_updates.lock().unwrap().push(update.clone());
            Ok(())
        }

        fn media_url(&self, dir: &str, name: &str) -> String {
            format!("http://localhost:8000/{dir}/{name}")
        }
    }

    fn msg(id: i64, set: i64, kind: MessageKind, content: &str, order: i64) -> SetMessage {
        SetMessage {
            id,
            message_set_id: set,
            page_id: "p1".into(),
            message_type: kind,
            content: content.into(),
            display_order: order,
            created_at: None,
        }
    }

    fn dispatcher(backend: FakeBackend) -> (Arc<FakeBackend>, Dispatcher<FakeBackend>) {
        let backend = Arc::new(backend);
        let d = Dispatcher::new(backend.clone(), &DispatchConfig::default(), Arc::new(NotifyRouter::new()))
            .unwrap()
            .with_pacer(Pacer::immediate());
        (backend, d)
    }

    fn temp_store(name: &str) -> (std::path::PathBuf, ClientStore) {
        let dir = std::env::temp_dir().join(format!("fbminer-dispatch-{name}-{}", std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        let store = ClientStore::open(&dir.join("state.json")).unwrap();
        (dir, store)
    }

    fn job(targets: &[(&str, Option<&str>)], sets: &[i64]) -> DispatchJob {
        DispatchJob {
            page_id: "p1".into(),
            targets: targets
                .iter()
                .map(|(c, p)| (c.to_string(), p.map(str::to_string)))
                .collect(),
            message_set_ids: sets.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_send_count_and_order() {
        let mut fake = FakeBackend::default();
        fake.sets.insert(1, vec![msg(1, 1, MessageKind::Text, "a1", 0), msg(2, 1, MessageKind::Text, "a2", 1)]);
        fake.sets.insert(2, vec![msg(3, 2, MessageKind::Text, "b1", 0)]);
        let (backend, d) = dispatcher(fake);

        let report = d
            .run_job(&job(&[("c1", Some("u1")), ("c2", Some("u2")), ("c3", Some("u3"))], &[2, 1]))
            .await
            .unwrap();

        assert_eq!(report.messages_sent, 9);
        assert_eq!(report.succeeded, 3);
        let order: Vec<String> = backend
            .sent()
            .iter()
            .map(|(psid, m)| format!("{psid}:{}", m.message))
            .collect();
        assert_eq!(
            order,
            [
                "u1:b1", "u1:a1", "u1:a2", "u2:b1", "u2:a1", "u2:a2", "u3:b1", "u3:a1", "u3:a2"
            ]
        );
        assert!(backend.sent().iter().all(|(_, m)| m.is_system_message));
    }

    #[tokio::test]
    async fn test_messages_sorted_by_display_order() {
        let mut fake = FakeBackend::default();
        fake.sets.insert(
            1,
            vec![
                msg(1, 1, MessageKind::Text, "three", 3),
                msg(2, 1, MessageKind::Text, "one", 1),
                msg(3, 1, MessageKind::Text, "two", 2),
            ],
        );
        let (backend, d) = dispatcher(fake);
        d.run_job(&job(&[("c1", Some("u1"))], &[1])).await.unwrap();
        let texts: Vec<String> = backend.sent().into_iter().map(|(_, m)| m.message).collect();
        assert_eq!(texts, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_missing_target_counts_failure_without_sends() {
        let mut fake = FakeBackend::default();
        fake.sets.insert(1, vec![msg(1, 1, MessageKind::Text, "hi", 0)]);
        let (backend, d) = dispatcher(fake);
        let report = d.run_job(&job(&[("c1", None)], &[1])).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.succeeded, 0);
        assert!(backend.sent().is_empty());
        assert!(backend.status_updates.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_two_by_two_with_image() {
        let mut fake = FakeBackend::default();
        fake.sets.insert(
            1,
            vec![
                msg(1, 1, MessageKind::Text, "Hello!", 0),
                msg(2, 1, MessageKind::Image, "[IMAGE] promo.jpg", 1),
            ],
        );
        let (backend, d) = dispatcher(fake);
        let report = d
            .run_job(&job(&[("c1", Some("u1")), ("c2", Some("u2"))], &[1]))
            .await
            .unwrap();

        assert_eq!(report.messages_sent, 4);
        let sent = backend.sent();
        assert_eq!(sent.len(), 4);
        for (_, m) in sent.iter().filter(|(_, m)| m.kind == MessageKind::Image) {
            assert_eq!(m.message, "http://localhost:8000/images/promo.jpg");
            assert!(!m.message.contains("[IMAGE]"));
        }

        let updates = backend.status_updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].customer_psids, vec!["u1", "u2"]);
        assert_eq!(updates[0].status, "mined");
        assert_eq!(updates[0].note.as_deref(), Some("Mined with message sets: 1"));
    }

    #[tokio::test]
    async fn test_broken_set_is_skipped() {
        let mut fake = FakeBackend::default();
        fake.sets.insert(2, vec![msg(1, 2, MessageKind::Text, "ok", 0)]);
        fake.broken_sets.insert(1);
        let (backend, d) = dispatcher(fake);
        let report = d.run_job(&job(&[("c1", Some("u1"))], &[1, 2])).await.unwrap();
        assert_eq!(report.sets_skipped, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(backend.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_send_failure_is_counted_and_loop_continues() {
        let mut fake = FakeBackend::default();
        fake.sets.insert(
            1,
            vec![msg(1, 1, MessageKind::Text, "bad", 0), msg(2, 1, MessageKind::Text, "good", 1)],
        );
        fake.reject_content = Some("bad".into());
        let (backend, d) = dispatcher(fake);
        let report = d.run_job(&job(&[("c1", Some("u1"))], &[1])).await.unwrap();
        assert_eq!(report.messages_failed, 1);
        assert_eq!(report.messages_sent, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(backend.sent()[0].1.message, "good");
    }

    #[tokio::test]
    async fn test_busy_while_job_runs() {
        let (_, d) = dispatcher(FakeBackend::default());
        let _held = d.claim().unwrap();
        let err = d.run_job(&job(&[("c1", Some("u1"))], &[1])).await.unwrap_err();
        assert!(matches!(err, MinerError::Busy(_)));
    }

    #[tokio::test]
    async fn test_progress_reports_final_counts() {
        let mut fake = FakeBackend::default();
        fake.sets.insert(1, vec![msg(1, 1, MessageKind::Text, "hi", 0)]);
        let (_, d) = dispatcher(fake);
        let rx = d.progress();
        d.run_job(&job(&[("c1", Some("u1")), ("c2", None)], &[1])).await.unwrap();
        let last = rx.borrow().clone();
        assert_eq!(last.conversations_done, 2);
        assert_eq!(last.conversations_total, 2);
        assert_eq!(last.messages_sent, 1);
        assert!(!last.running);
    }

    fn board_with(ids: &[(&str, Option<&str>)]) -> ConversationBoard {
        let mut board = ConversationBoard::new();
        board.load(
            "p1",
            ids.iter()
                .map(|(id, psid)| Conversation {
                    conversation_id: id.to_string(),
                    name: id.to_string(),
                    raw_psid: psid.map(str::to_string),
                    updated_time: None,
                    created_time: None,
                    last_user_message_time: None,
                    first_interaction_at: None,
                    source_type: None,
                    platform: None,
                    customer_type: None,
                    mining_status: None,
                })
                .collect(),
        );
        for (id, _) in ids {
            board.select(id);
        }
        board
    }

    #[tokio::test]
    async fn test_run_marks_mined_charges_quota_and_clears_selection() {
        let (dir, mut store) = temp_store("run");

        let mut fake = FakeBackend::default();
        fake.sets.insert(1, vec![msg(1, 1, MessageKind::Text, "hi", 0)]);
        let (_, d) = dispatcher(fake);
        let mut board = board_with(&[("c1", Some("u1")), ("c2", None)]);

        let report = d.run(&mut board, &[1], &mut store).await.unwrap();
        assert_eq!((report.succeeded, report.failed), (1, 1));
        assert!(board.selected().is_empty());
        assert_eq!(board.all()[0].mining_status.as_deref(), Some("mined"));
        assert!(report.status_recorded);
        assert_eq!(store.state().quota.used, 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_rejected_status_update_leaves_rows_unmarked() {
        let (dir, mut store) = temp_store("status-rejected");
        let mut fake = FakeBackend::default();
        fake.sets.insert(1, vec![msg(1, 1, MessageKind::Text, "hi", 0)]);
        fake.status_rejected = true;
        let notify = Arc::new(NotifyRouter::new());
        let d = Dispatcher::new(Arc::new(fake), &DispatchConfig::default(), notify.clone())
            .unwrap()
            .with_pacer(Pacer::immediate());
        let mut board = board_with(&[("c1", Some("u1"))]);

        let report = d.run(&mut board, &[1], &mut store).await.unwrap();
        assert_eq!(report.contacted_psids, vec!["u1"]);
        assert!(!report.status_recorded);
        assert_eq!(board.all()[0].mining_status, None);
        assert!(board.selected().is_empty());
        // The message went out, so the quota is still charged.
        assert_eq!(store.state().quota.used, 1);
        assert!(
            notify
                .history()
                .iter()
                .any(|n| n.kind == NoticeKind::Warning && n.title == "Mining status not saved")
        );
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_pacing_between_messages_and_sets() {
        let mut fake = FakeBackend::default();
        fake.sets.insert(
            1,
            vec![msg(1, 1, MessageKind::Text, "a1", 0), msg(2, 1, MessageKind::Text, "bad", 1)],
        );
        fake.sets.insert(
            2,
            vec![msg(3, 2, MessageKind::Text, "b1", 0), msg(4, 2, MessageKind::Text, "b2", 1)],
        );
        fake.broken_sets.insert(9);
        fake.reject_content = Some("bad".into());
        let d = Dispatcher::new(Arc::new(fake), &DispatchConfig::default(), Arc::new(NotifyRouter::new()))
            .unwrap();

        let start = tokio::time::Instant::now();
        let report = d.run_job(&job(&[("c1", Some("u1"))], &[1, 9, 2])).await.unwrap();

        assert_eq!(report.messages_sent, 3);
        assert_eq!(report.messages_failed, 1);
        assert_eq!(report.sets_skipped, 1);
        // 4 messages x 500 ms (the rejected one included) + 2 loaded sets x 1000 ms.
        assert_eq!(start.elapsed(), std::time::Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_run_rejects_selection_over_quota() {
        let (dir, mut store) = temp_store("quota");

        let backend = Arc::new(FakeBackend::default());
        let config = DispatchConfig {
            daily_limit: 1,
            ..Default::default()
        };
        let d = Dispatcher::new(backend.clone(), &config, Arc::new(NotifyRouter::new()))
            .unwrap()
            .with_pacer(Pacer::immediate());
        let mut board = board_with(&[("c1", Some("u1")), ("c2", Some("u2"))]);

        let err = d.run(&mut board, &[1], &mut store).await.unwrap_err();
        assert!(matches!(err, MinerError::Quota(_)));
        // Rejected before the job started.
        assert_eq!(board.selected().len(), 2);
        assert!(backend.sent().is_empty());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_media_reference() {
        let fake = FakeBackend::default();
        assert_eq!(
            media_reference(&fake, "[VIDEO]", "videos", "  [VIDEO]  clip.mp4 "),
            "http://localhost:8000/videos/clip.mp4"
        );
        assert_eq!(
            media_reference(&fake, "[IMAGE]", "images", "https://cdn.example.com/a.png"),
            "https://cdn.example.com/a.png"
        );
        assert_eq!(
            media_reference(&fake, "[IMAGE]", "images", "plain.png"),
            "http://localhost:8000/images/plain.png"
        );
    }
}

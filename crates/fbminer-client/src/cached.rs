//! `Catalog` wrapper that serves reads from TTL caches.
//!
//! Conversations and set messages use the long TTL, message-set and group
//! listings the short one. Every write invalidates the affected resource by
//! prefix. A failed load falls back to the last value seen, however old.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use fbminer_core::config::CacheConfig;
use fbminer_core::error::Result;
use fbminer_core::traits::Catalog;
use fbminer_core::types::{
    Conversation, CustomerGroup, GroupDraft, MessageKind, MessageSet, NewSetMessage, SetMessage,
};

use crate::cache::{TtlCache, prefix, scoped};
use crate::http::media_message;

const CONVERSATIONS: &str = "conversations";
const MESSAGE_SETS: &str = "message_sets";
const SET_MESSAGES: &str = "set_messages";
const GROUPS: &str = "groups";

pub struct CachedCatalog<C> {
    inner: C,
    conversations: TtlCache<Vec<Conversation>>,
    message_sets: TtlCache<Vec<MessageSet>>,
    set_messages: TtlCache<Vec<SetMessage>>,
    groups: TtlCache<Vec<CustomerGroup>>,
}

impl<C: Catalog> CachedCatalog<C> {
    pub fn new(inner: C, config: &CacheConfig) -> Self {
        Self::with_ttls(
            inner,
            Duration::from_secs(config.ttl_secs),
            Duration::from_secs(config.listing_ttl_secs),
        )
    }

    pub fn with_ttls(inner: C, ttl: Duration, listing_ttl: Duration) -> Self {
        Self {
            inner,
            conversations: TtlCache::new(ttl),
            message_sets: TtlCache::new(listing_ttl),
            set_messages: TtlCache::new(ttl),
            groups: TtlCache::new(listing_ttl),
        }
    }

    /// The uncached catalog, for reads that must be fresh.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Forget everything cached for a page (used on page switch and refresh).
    pub fn invalidate_page(&self, page_id: &str) {
        self.conversations.invalidate(&prefix(CONVERSATIONS, page_id));
        self.message_sets.invalidate(&prefix(MESSAGE_SETS, page_id));
        self.groups.invalidate(&prefix(GROUPS, page_id));
    }

    /// Upload a media file inline as a set message.
    pub async fn upload_media(
        &self,
        message_set_id: i64,
        page_id: &str,
        kind: MessageKind,
        file_name: &str,
        bytes: &[u8],
        display_order: i64,
    ) -> Result<SetMessage> {
        let message = media_message(message_set_id, page_id, kind, file_name, bytes, display_order)?;
        tracing::info!("📤 Uploading {kind} '{file_name}' ({} bytes)", bytes.len());
        self.create_set_message(&message).await
    }

    fn invalidate_set(&self, set_id: i64) {
        self.set_messages.invalidate(&prefix(SET_MESSAGES, &set_id.to_string()));
    }

    pub fn clear(&self) {
        self.conversations.clear();
        self.message_sets.clear();
        self.set_messages.clear();
        self.groups.clear();
    }
}

async fn load<V, F>(cache: &TtlCache<V>, key: String, fetch: F) -> Result<V>
where
    V: Clone,
    F: Future<Output = Result<V>>,
{
    if let Some(hit) = cache.get(&key) {
        tracing::trace!("cache hit {key}");
        return Ok(hit);
    }
    match fetch.await {
        Ok(value) => {
            cache.set(key, value.clone());
            Ok(value)
        }
        Err(e) => match cache.get_stale(&key) {
            Some(stale) => {
                tracing::warn!("⚠️ Load of {key} failed, serving stale copy: {e}");
                Ok(stale)
            }
            None => Err(e),
        },
    }
}

#[async_trait]
impl<C: Catalog> Catalog for CachedCatalog<C> {
    async fn list_conversations(&self, page_id: &str) -> Result<Vec<Conversation>> {
        let key = scoped(CONVERSATIONS, page_id, "");
        load(&self.conversations, key, self.inner.list_conversations(page_id)).await
    }

    async fn list_message_sets(&self, page_id: &str) -> Result<Vec<MessageSet>> {
        let key = scoped(MESSAGE_SETS, page_id, "");
        load(&self.message_sets, key, self.inner.list_message_sets(page_id)).await
    }

    async fn create_message_set(&self, page_id: &str, set_name: &str) -> Result<MessageSet> {
        let created = self.inner.create_message_set(page_id, set_name).await?;
        self.message_sets.invalidate(&prefix(MESSAGE_SETS, page_id));
        Ok(created)
    }

    async fn rename_message_set(&self, set_id: i64, set_name: &str) -> Result<MessageSet> {
        let renamed = self.inner.rename_message_set(set_id, set_name).await?;
        self.message_sets.invalidate(&prefix(MESSAGE_SETS, &renamed.page_id));
        Ok(renamed)
    }

    async fn delete_message_set(&self, set_id: i64) -> Result<()> {
        self.inner.delete_message_set(set_id).await?;
        // The owning page is unknown here.
        self.message_sets.invalidate(MESSAGE_SETS);
        self.invalidate_set(set_id);
        Ok(())
    }

    async fn list_set_messages(&self, set_id: i64) -> Result<Vec<SetMessage>> {
        let key = scoped(SET_MESSAGES, &set_id.to_string(), "");
        load(&self.set_messages, key, self.inner.list_set_messages(set_id)).await
    }

    async fn create_set_message(&self, message: &NewSetMessage) -> Result<SetMessage> {
        let created = self.inner.create_set_message(message).await?;
        self.invalidate_set(message.message_set_id);
        Ok(created)
    }

    async fn create_set_messages_batch(&self, messages: &[NewSetMessage]) -> Result<usize> {
        let stored = self.inner.create_set_messages_batch(messages).await?;
        let mut set_ids: Vec<i64> = messages.iter().map(|m| m.message_set_id).collect();
        set_ids.sort_unstable();
        set_ids.dedup();
        for set_id in set_ids {
            self.invalidate_set(set_id);
        }
        Ok(stored)
    }

    async fn update_set_message(
        &self,
        message_id: i64,
        kind: MessageKind,
        content: &str,
        display_order: i64,
    ) -> Result<SetMessage> {
        let updated = self
            .inner
            .update_set_message(message_id, kind, content, display_order)
            .await?;
        self.invalidate_set(updated.message_set_id);
        Ok(updated)
    }

    async fn delete_set_message(&self, message_id: i64) -> Result<()> {
        self.inner.delete_set_message(message_id).await?;
        self.set_messages.invalidate(SET_MESSAGES);
        Ok(())
    }

    async fn list_groups(&self, page_id: &str, include_inactive: bool) -> Result<Vec<CustomerGroup>> {
        let key = scoped(GROUPS, page_id, &include_inactive.to_string());
        load(&self.groups, key, self.inner.list_groups(page_id, include_inactive)).await
    }

    async fn create_group(&self, draft: &GroupDraft) -> Result<()> {
        self.inner.create_group(draft).await?;
        match &draft.page_id {
            Some(page_id) => self.groups.invalidate(&prefix(GROUPS, page_id)),
            None => self.groups.invalidate(GROUPS),
        };
        Ok(())
    }

    async fn update_group(&self, group_id: i64, draft: &GroupDraft) -> Result<()> {
        self.inner.update_group(group_id, draft).await?;
        self.groups.invalidate(GROUPS);
        Ok(())
    }

    async fn delete_group(&self, group_id: i64, hard_delete: bool) -> Result<()> {
        self.inner.delete_group(group_id, hard_delete).await?;
        self.groups.invalidate(GROUPS);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fbminer_core::error::MinerError;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// In-memory catalog that counts backend reads.
    #[derive(Default)]
    struct CountingCatalog {
        reads: AtomicUsize,
        failing: AtomicBool,
        sets: Mutex<Vec<MessageSet>>,
        messages: Mutex<Vec<SetMessage>>,
        groups: Mutex<Vec<CustomerGroup>>,
    }

    impl CountingCatalog {
        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }

        fn hit(&self) -> Result<()> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(MinerError::Backend("connection refused".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Catalog for CountingCatalog {
        async fn list_conversations(&self, _page_id: &str) -> Result<Vec<Conversation>> {
            self.hit()?;
            Ok(Vec::new())
        }
        async fn list_message_sets(&self, page_id: &str) -> Result<Vec<MessageSet>> {
            self.hit()?;
            let sets = self.sets.lock().unwrap();
            Ok(sets.iter().filter(|s| s.page_id == page_id).cloned().collect())
        }
        async fn create_message_set(&self, page_id: &str, set_name: &str) -> Result<MessageSet> {
            let mut sets = self.sets.lock().unwrap();
            let set = MessageSet {
                id: sets.len() as i64 + 1,
                page_id: page_id.into(),
                set_name: set_name.into(),
                created_at: None,
            };
            sets.push(set.clone());
            Ok(set)
        }
        async fn rename_message_set(&self, set_id: i64, set_name: &str) -> Result<MessageSet> {
            let mut sets = self.sets.lock().unwrap();
            let set = sets
                .iter_mut()
                .find(|s| s.id == set_id)
                .ok_or_else(|| MinerError::Validation("no such set".into()))?;
            set.set_name = set_name.into();
            Ok(set.clone())
        }
        async fn delete_message_set(&self, set_id: i64) -> Result<()> {
            self.sets.lock().unwrap().retain(|s| s.id != set_id);
            Ok(())
        }
        async fn list_set_messages(&self, set_id: i64) -> Result<Vec<SetMessage>> {
            self.hit()?;
            let messages = self.messages.lock().unwrap();
            Ok(messages.iter().filter(|m| m.message_set_id == set_id).cloned().collect())
        }
        async fn create_set_message(&self, message: &NewSetMessage) -> Result<SetMessage> {
            let mut messages = self.messages.lock().unwrap();
            let created = SetMessage {
                id: messages.len() as i64 + 1,
                message_set_id: message.message_set_id,
                page_id: message.page_id.clone(),
                message_type: message.message_type,
                content: message.content.clone(),
                display_order: message.display_order,
                created_at: None,
            };
            messages.push(created.clone());
            Ok(created)
        }
        async fn create_set_messages_batch(&self, messages: &[NewSetMessage]) -> Result<usize> {
            for message in messages {
                self.create_set_message(message).await?;
            }
            Ok(messages.len())
        }
        async fn update_set_message(
            &self,
            message_id: i64,
            kind: MessageKind,
            content: &str,
            display_order: i64,
        ) -> Result<SetMessage> {
            let mut messages = self.messages.lock().unwrap();
            let message = messages
                .iter_mut()
                .find(|m| m.id == message_id)
                .ok_or_else(|| MinerError::Validation("no such message".into()))?;
            message.message_type = kind;
            message.content = content.into();
            message.display_order = display_order;
            Ok(message.clone())
        }
        async fn delete_set_message(&self, _message_id: i64) -> Result<()> {
            Ok(())
        }
        async fn list_groups(&self, _page_id: &str, _include_inactive: bool) -> Result<Vec<CustomerGroup>> {
            self.hit()?;
            Ok(self.groups.lock().unwrap().clone())
        }
        async fn create_group(&self, draft: &GroupDraft) -> Result<()> {
            let mut groups = self.groups.lock().unwrap();
            let next_id = groups.len() as i64 + 1;
            groups.push(CustomerGroup {
                id: next_id,
                page_id: draft.page_id.clone(),
                name: draft.name.clone(),
                customer_count: 0,
                created_at: None,
                rule_description: draft.rule_description.clone(),
                keywords: draft.keywords.clone(),
                examples: draft.examples.clone(),
                is_active: true,
            });
            Ok(())
        }
        async fn update_group(&self, _group_id: i64, _draft: &GroupDraft) -> Result<()> {
            Ok(())
        }
        async fn delete_group(&self, group_id: i64, _hard_delete: bool) -> Result<()> {
            self.groups.lock().unwrap().retain(|g| g.id != group_id);
            Ok(())
        }
    }

    fn cached(ttl: Duration) -> CachedCatalog<CountingCatalog> {
        CachedCatalog::with_ttls(CountingCatalog::default(), ttl, ttl)
    }

    #[tokio::test]
    async fn test_read_within_ttl_skips_backend() {
        let catalog = cached(Duration::from_secs(60));
        catalog.inner().create_message_set("p1", "Welcome").await.unwrap();

        let first = catalog.list_message_sets("p1").await.unwrap();
        let second = catalog.list_message_sets("p1").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(catalog.inner().reads(), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_refetches() {
        let catalog = cached(Duration::ZERO);
        catalog.list_conversations("p1").await.unwrap();
        catalog.list_conversations("p1").await.unwrap();
        assert_eq!(catalog.inner().reads(), 2);
    }

    #[tokio::test]
    async fn test_writes_invalidate_sets() {
        let catalog = cached(Duration::from_secs(60));
        assert!(catalog.list_message_sets("p1").await.unwrap().is_empty());

        let set = catalog.create_message_set("p1", "Promo").await.unwrap();
        assert_eq!(catalog.list_message_sets("p1").await.unwrap().len(), 1);

        catalog.rename_message_set(set.id, "Promo v2").await.unwrap();
        let sets = catalog.list_message_sets("p1").await.unwrap();
        assert_eq!(sets[0].set_name, "Promo v2");

        catalog.delete_message_set(set.id).await.unwrap();
        assert!(catalog.list_message_sets("p1").await.unwrap().is_empty());
        assert_eq!(catalog.inner().reads(), 4);
    }

    #[tokio::test]
    async fn test_group_writes_cover_every_flag_variant() {
        let catalog = cached(Duration::from_secs(60));
        catalog.list_groups("p1", false).await.unwrap();
        catalog.list_groups("p1", true).await.unwrap();

        let draft = GroupDraft {
            page_id: Some("p1".into()),
            name: "VIP".into(),
            ..Default::default()
        };
        catalog.create_group(&draft).await.unwrap();

        assert_eq!(catalog.list_groups("p1", false).await.unwrap().len(), 1);
        assert_eq!(catalog.list_groups("p1", true).await.unwrap().len(), 1);
        assert_eq!(catalog.inner().reads(), 4);
    }

    fn text(set_id: i64, content: &str, order: i64) -> NewSetMessage {
        NewSetMessage {
            message_set_id: set_id,
            page_id: "p1".into(),
            message_type: MessageKind::Text,
            content: content.into(),
            display_order: order,
            image_data_base64: None,
        }
    }

    #[tokio::test]
    async fn test_update_set_message_invalidates_its_set() {
        let catalog = cached(Duration::from_secs(60));
        let created = catalog.inner().create_set_message(&text(1, "Hi", 0)).await.unwrap();
        assert_eq!(catalog.list_set_messages(1).await.unwrap()[0].content, "Hi");

        catalog
            .update_set_message(created.id, MessageKind::Text, "Hello", 0)
            .await
            .unwrap();
        let messages = catalog.list_set_messages(1).await.unwrap();
        assert_eq!(messages[0].content, "Hello");
        assert_eq!(catalog.inner().reads(), 2);
    }

    #[tokio::test]
    async fn test_batch_create_invalidates_every_touched_set() {
        let catalog = cached(Duration::from_secs(60));
        catalog.list_set_messages(1).await.unwrap();
        catalog.list_set_messages(2).await.unwrap();
        catalog.list_set_messages(3).await.unwrap();

        let stored = catalog
            .create_set_messages_batch(&[text(1, "a", 0), text(2, "b", 0), text(1, "c", 1)])
            .await
            .unwrap();
        assert_eq!(stored, 3);

        assert_eq!(catalog.list_set_messages(1).await.unwrap().len(), 2);
        assert_eq!(catalog.list_set_messages(2).await.unwrap().len(), 1);
        // Set 3 was untouched and still comes from the cache.
        assert!(catalog.list_set_messages(3).await.unwrap().is_empty());
        assert_eq!(catalog.inner().reads(), 5);
    }

    #[tokio::test]
    async fn test_upload_media_invalidates_its_set() {
        let catalog = cached(Duration::from_secs(60));
        assert!(catalog.list_set_messages(4).await.unwrap().is_empty());

        let uploaded = catalog
            .upload_media(4, "p1", MessageKind::Image, "cat.jpg", b"\x89PNG", 0)
            .await
            .unwrap();
        assert_eq!(uploaded.content, "[IMAGE] cat.jpg");
        assert_eq!(catalog.list_set_messages(4).await.unwrap(), vec![uploaded]);
        assert_eq!(catalog.inner().reads(), 2);

        let err = catalog
            .upload_media(4, "p1", MessageKind::Text, "notes.txt", b"hi", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, MinerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_failed_load_serves_stale_copy() {
        let catalog = cached(Duration::ZERO);
        catalog.inner().create_message_set("p1", "Welcome").await.unwrap();
        let fresh = catalog.list_message_sets("p1").await.unwrap();

        catalog.inner().failing.store(true, Ordering::SeqCst);
        let stale = catalog.list_message_sets("p1").await.unwrap();
        assert_eq!(fresh, stale);

        // Nothing cached for this page, so the error surfaces.
        assert!(catalog.list_message_sets("p2").await.is_err());
    }
}

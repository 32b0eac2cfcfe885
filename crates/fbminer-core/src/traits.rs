//! Backend seams.
//!
//! `Catalog` covers the cacheable resources (conversations, message sets,
//! groups); `Messenger` covers outbound sends. The HTTP gateway implements
//! both, the cached wrapper implements `Catalog`, and tests plug in
//! in-memory fakes.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    Conversation, CustomerGroup, GroupDraft, MessageKind, MessageSet, MiningStatusUpdate, NewSetMessage,
    OutboundMessage, SendReceipt, SetMessage,
};

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Conversations of a page, newest first as served by the backend.
    async fn list_conversations(&self, page_id: &str) -> Result<Vec<Conversation>>;

    async fn list_message_sets(&self, page_id: &str) -> Result<Vec<MessageSet>>;
    async fn create_message_set(&self, page_id: &str, set_name: &str) -> Result<MessageSet>;
    async fn rename_message_set(&self, set_id: i64, set_name: &str) -> Result<MessageSet>;
    async fn delete_message_set(&self, set_id: i64) -> Result<()>;

    /// Messages of one set (backend order; callers sort by `display_order`).
    async fn list_set_messages(&self, set_id: i64) -> Result<Vec<SetMessage>>;
    async fn create_set_message(&self, message: &NewSetMessage) -> Result<SetMessage>;
    /// Insert several messages in one request; returns how many were stored.
    async fn create_set_messages_batch(&self, messages: &[NewSetMessage]) -> Result<usize>;
    async fn update_set_message(
        &self,
        message_id: i64,
        kind: MessageKind,
        content: &str,
        display_order: i64,
    ) -> Result<SetMessage>;
    async fn delete_set_message(&self, message_id: i64) -> Result<()>;

    async fn list_groups(&self, page_id: &str, include_inactive: bool) -> Result<Vec<CustomerGroup>>;
    /// Group writes may be processed asynchronously by the backend, so they
    /// only acknowledge; re-list to observe the result.
    async fn create_group(&self, draft: &GroupDraft) -> Result<()>;
    async fn update_group(&self, group_id: i64, draft: &GroupDraft) -> Result<()>;
    async fn delete_group(&self, group_id: i64, hard_delete: bool) -> Result<()>;
}

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Queue one outbound message to a page-scoped user.
    async fn send_message(&self, page_id: &str, psid: &str, message: &OutboundMessage) -> Result<SendReceipt>;

    /// Mark customers with a mining status.
    async fn update_mining_status(&self, page_id: &str, update: &MiningStatusUpdate) -> Result<()>;

    /// Absolute URL of a media file served by the backend.
    fn media_url(&self, dir: &str, name: &str) -> String;
}

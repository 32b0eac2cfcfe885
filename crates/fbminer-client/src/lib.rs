//! # fbminer client
//!
//! Everything the operator surface needs to talk to the mining backend:
//!
//! ```text
//! HttpBackend (REST)  ──► CachedCatalog (TTL + prefix invalidation)
//!        │                        │
//!        │                        └──► ConversationBoard (filters, selection)
//!        │
//!        ├──► ChangeWatcher (poll: re-fetch + diff)
//!        └──► RealtimeClient (Socket.IO: new_customer / customer_updated)
//! ```

pub mod cache;
pub mod cached;
pub mod http;
pub mod realtime;
pub mod selection;
pub mod watcher;

pub use cache::TtlCache;
pub use cached::CachedCatalog;
pub use http::HttpBackend;
pub use realtime::{RealtimeClient, RealtimeEvent};
pub use selection::{ConversationBoard, ConversationFilter, DisappearWindow};
pub use watcher::{ChangeWatcher, ConversationChange, WatchHandle};

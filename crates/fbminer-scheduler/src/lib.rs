//! # fbminer scheduler
//!
//! Everything that acts on the backend on the operator's behalf.
//!
//! ## Architecture
//! ```text
//! Dispatcher (one job at a time)
//!   ├── DailyQuota gate → ClientStore (quota record)
//!   ├── per conversation → per set → per message
//!   │     └── Messenger::send_message, then Pacer (fixed delays + token bucket)
//!   ├── Messenger::update_mining_status
//!   └── progress → watch channel, notices → NotifyRouter
//!
//! ScheduleDraft (configurator)
//!   ├── validate(now) → summary() → into_requests()
//!   └── drafts + navigation handoff → ClientStore (JSON file)
//! ```

pub mod dispatch;
pub mod notify;
pub mod pacing;
pub mod quota;
pub mod schedule;
pub mod store;

pub use dispatch::{DispatchJob, DispatchProgress, DispatchReport, Dispatcher};
pub use notify::{Notice, NoticeKind, NotifyRouter};
pub use pacing::{Pacer, TokenBucket};
pub use quota::{DailyQuota, QuotaRecord};
pub use schedule::ScheduleDraft;
pub use store::{ClientState, ClientStore, Handoff};

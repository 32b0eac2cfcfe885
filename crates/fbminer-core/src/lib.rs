//! # fbminer core
//!
//! Shared data model, backend traits, error type and configuration used by
//! the client, scheduler and CLI crates.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use config::MinerConfig;
pub use error::{MinerError, Result};
pub use traits::{Catalog, Messenger};

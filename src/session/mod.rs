//! Session affinity.
//!
//! # Responsibilities
//! - Extract session ids from requests and responses (`extractor.rs`)
//! - Track session → node bindings with last-use times (`store.rs`)
//! - Periodically evict idle sessions (`cleanup.rs`)
//!
//! # Design Decisions
//! - A session refers to its node weakly; removing a node never keeps it alive
//! - A binding to a node that is down or no longer a member is treated as absent

pub mod cleanup;
pub mod extractor;
pub mod store;

pub use cleanup::{CleanupHandle, SessionCleanupTask};
pub use extractor::SessionExtractor;
pub use store::{Resolution, Session, SessionStore};

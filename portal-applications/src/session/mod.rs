//! Session Management Module
//!
//! Owns the session lifecycle: startup check, sign-in, sign-out, reaction to
//! backend auth notifications and role derivation.

pub mod manager;
pub mod storage;
pub mod types;

pub use manager::SessionManager;
pub use storage::{CachedRole, FileLocalStore, MemoryLocalStore, RoleCache};
pub use types::*;

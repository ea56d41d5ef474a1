//! Portal Core - Core data structures, backend contracts and resilience utilities
//!
//! This crate defines the abstractions shared by the backend adapters and the
//! application layer of the client portal

pub mod async_utils;
pub mod config;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use async_utils::*;
pub use config::*;
pub use error::*;
pub use logging::*;
pub use traits::*;
pub use types::*;

// Re-export commonly used external types
pub use async_trait::async_trait;
pub use tokio;
pub use tracing;

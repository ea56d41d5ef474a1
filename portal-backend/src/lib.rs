//! Portal Backend - clients for the hosted backend-as-a-service
//!
//! `HttpBackend` talks to the hosted auth and REST endpoints; `MemoryBackend`
//! keeps everything in process and supports fault injection.

pub mod api;
pub mod memory;

pub use api::{ApiClientConfig, HttpBackend};
pub use memory::MemoryBackend;

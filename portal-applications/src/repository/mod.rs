//! Data access for the portal entities

pub mod resilient;
pub mod services;
pub mod types;

pub use resilient::ResilientClient;
pub use services::{PaymentService, PortalServices, ProjectService, PvService, QuoteService};
pub use types::*;

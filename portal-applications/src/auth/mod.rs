//! Authentication and Authorization Module
//!
//! Holds the observable auth state of the portal and the rules derived from it:
//! - Who is signed in and with which role ([`SessionStore`], [`AuthSnapshot`])
//! - How a role is looked up and cached ([`resolve_role`])
//! - What the role allows ([`has_permission`], [`AccessScope`])

pub mod context;
pub mod identity;
pub mod permissions;
pub mod role;

pub use context::{AuthSnapshot, AuthState, SessionStore};
pub use identity::UserIdentity;
pub use permissions::{ensure_permission, has_permission, AccessScope};
pub use role::{resolve_role, RoleLookup, RoleResolution, RoleSource};

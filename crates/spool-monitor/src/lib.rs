//! Lifecycle collaborator surface.
//!
//! The polling loop (outside this workspace) detects state
//! transitions from already-fetched printer status payloads and calls
//! the [`LifecycleHandler`] here. No code in this crate talks to a
//! printer; inputs arrive fully decoded.

pub mod handler;
pub mod payload;

pub use handler::{LifecycleHandler, STATUS_FINISH};
pub use payload::JobStartPayload;

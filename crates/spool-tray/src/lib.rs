//! Pure tray-domain logic shared by the persistence and monitor layers.
//!
//! Nothing in this crate performs I/O. The codec and the color
//! normalizer are the single sources of truth for their rules; the DB
//! layer mirrors them but must never reimplement them with different
//! semantics.

pub mod codec;
pub mod color;
pub mod types;

pub use codec::TrayPosition;
pub use color::normalize_color;
pub use types::LoadedTray;

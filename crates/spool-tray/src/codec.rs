//! Active-tray indicator codec.
//!
//! Bambu printers report the currently feeding tray as a single byte:
//!
//! - `0..=15`    — AMS slot: four AMS units with four trays each, so
//!   `ams_id = n / 4`, `tray_id = n % 4`.
//! - `254 | 255` — external spool holder (no AMS position).
//! - anything else, or no value at all — unknown.
//!
//! # Invariants
//!
//! - **Total**: every input decodes; malformed indicators become
//!   [`TrayPosition::Unknown`], never a panic or an error.
//! - **Pure**: no I/O, no clock, no allocation beyond the enum.
//! - **Single source of truth**: the persistence layer stores the
//!   decoded `(ams_id, tray_id)` pair produced here and matches on it
//!   with null-tolerant equality; it never re-decodes raw indicators.

use serde::{Deserialize, Serialize};

/// Decoded position of the printer's active tray.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TrayPosition {
    /// A concrete AMS slot.
    Slot { ams_id: i16, tray_id: i16 },

    /// The external spool holder. Matches the snapshot row whose
    /// `ams_id` and `tray_id` are both null.
    ExternalSpool,

    /// Indicator absent or outside the defined encoding. Treated as
    /// "no active tray": capture marks no primary, attribution is a
    /// no-op.
    Unknown,
}

const AMS_TRAYS_PER_UNIT: u8 = 4;
const AMS_SLOT_MAX: u8 = 15;
const EXTERNAL_SPOOL_LO: u8 = 254;

impl TrayPosition {
    /// Decode a raw active-tray indicator.
    pub fn decode(indicator: Option<u8>) -> TrayPosition {
        match indicator {
            None => TrayPosition::Unknown,
            Some(n) if n <= AMS_SLOT_MAX => TrayPosition::Slot {
                ams_id: i16::from(n / AMS_TRAYS_PER_UNIT),
                tray_id: i16::from(n % AMS_TRAYS_PER_UNIT),
            },
            Some(n) if n >= EXTERNAL_SPOOL_LO => TrayPosition::ExternalSpool,
            Some(_) => TrayPosition::Unknown,
        }
    }

    /// `true` when the position identifies a tray that can be matched
    /// against snapshot rows (a slot or the external spool).
    pub fn is_attributable(&self) -> bool {
        !matches!(self, TrayPosition::Unknown)
    }

    /// Nullable AMS id as stored in `filament_snapshots.ams_id`.
    ///
    /// `None` for both the external spool and unknown; callers must
    /// check [`is_attributable`][Self::is_attributable] before using
    /// the pair as a match key.
    pub fn ams_db(&self) -> Option<i16> {
        match self {
            TrayPosition::Slot { ams_id, .. } => Some(*ams_id),
            _ => None,
        }
    }

    /// Nullable tray id as stored in `filament_snapshots.tray_id`.
    pub fn tray_db(&self) -> Option<i16> {
        match self {
            TrayPosition::Slot { tray_id, .. } => Some(*tray_id),
            _ => None,
        }
    }

    /// `true` when this position refers to the given nullable
    /// snapshot-row position.
    pub fn matches_row(&self, ams_id: Option<i16>, tray_id: Option<i16>) -> bool {
        match self {
            TrayPosition::Slot {
                ams_id: a,
                tray_id: t,
            } => ams_id == Some(*a) && tray_id == Some(*t),
            TrayPosition::ExternalSpool => ams_id.is_none() && tray_id.is_none(),
            TrayPosition::Unknown => false,
        }
    }
}

impl std::fmt::Display for TrayPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrayPosition::Slot { ams_id, tray_id } => write!(f, "AMS{ams_id}/T{tray_id}"),
            TrayPosition::ExternalSpool => write!(f, "external"),
            TrayPosition::Unknown => write!(f, "unknown"),
        }
    }
}

//! Loaded-tray descriptor as delivered by the upstream printer client.
//!
//! All fields are already decoded from the MQTT status payload before
//! they reach this crate; everything optional really is optional on
//! the wire (an empty AMS slot reports almost nothing).

use serde::{Deserialize, Serialize};

use crate::codec::TrayPosition;

/// One filament tray observed loaded on a printer.
///
/// `ams_id`/`tray_id` both `None` means the external spool holder.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadedTray {
    pub ams_id: Option<i16>,
    pub tray_id: Option<i16>,

    /// Filament catalog key (e.g. `GFL99`). Absent for unidentified
    /// third-party spools; such rows persist without enrichment.
    pub filament_id: Option<String>,

    /// RFID tag of the physical spool, when present.
    pub tray_uuid: Option<String>,

    pub tray_name: Option<String>,
    /// Material type string as reported (`PLA`, `PETG`, ...).
    pub tray_type: Option<String>,
    /// Raw reported color, usually `RRGGBBAA` hex.
    pub tray_color: Option<String>,
    /// Vendor / sub-brand string.
    pub vendor: Option<String>,

    pub nozzle_temp_min: Option<i32>,
    pub nozzle_temp_max: Option<i32>,
    pub bed_temp: Option<i32>,

    pub weight_grams: Option<f64>,
    pub cost: Option<f64>,
    pub density: Option<f64>,
    pub diameter: Option<f64>,
}

impl LoadedTray {
    /// The tray's position expressed as a [`TrayPosition`].
    ///
    /// A half-specified position (one of ams/tray null) is reported by
    /// no known firmware; it maps to `Unknown` so it can never be
    /// marked primary or used.
    pub fn position(&self) -> TrayPosition {
        match (self.ams_id, self.tray_id) {
            (Some(ams_id), Some(tray_id)) => TrayPosition::Slot { ams_id, tray_id },
            (None, None) => TrayPosition::ExternalSpool,
            _ => TrayPosition::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_covers_slot_external_and_half_specified() {
        let slot = LoadedTray {
            ams_id: Some(1),
            tray_id: Some(2),
            ..LoadedTray::default()
        };
        assert_eq!(
            slot.position(),
            TrayPosition::Slot {
                ams_id: 1,
                tray_id: 2
            }
        );

        assert_eq!(LoadedTray::default().position(), TrayPosition::ExternalSpool);

        // A half-specified position can never be attributed.
        let half = LoadedTray {
            ams_id: Some(0),
            tray_id: None,
            ..LoadedTray::default()
        };
        assert_eq!(half.position(), TrayPosition::Unknown);
        assert!(!half.position().is_attributable());
    }
}

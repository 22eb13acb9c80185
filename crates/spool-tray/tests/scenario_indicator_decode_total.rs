//! Decode table for the active-tray indicator: every byte value must
//! decode without panicking, AMS slots follow the div/mod-4 layout,
//! 254/255 mean the external spool, and everything else is unknown.

use spool_tray::TrayPosition;

#[test]
fn ams_slots_decode_div_mod_four() {
    for n in 0u8..=15 {
        let pos = TrayPosition::decode(Some(n));
        assert_eq!(
            pos,
            TrayPosition::Slot {
                ams_id: i16::from(n / 4),
                tray_id: i16::from(n % 4),
            },
            "indicator {n}"
        );
        assert!(pos.is_attributable());
        assert_eq!(pos.ams_db(), Some(i16::from(n / 4)));
        assert_eq!(pos.tray_db(), Some(i16::from(n % 4)));
    }
}

#[test]
fn external_spool_values_decode_external() {
    for n in [254u8, 255] {
        let pos = TrayPosition::decode(Some(n));
        assert_eq!(pos, TrayPosition::ExternalSpool, "indicator {n}");
        assert!(pos.is_attributable());
        assert_eq!(pos.ams_db(), None);
        assert_eq!(pos.tray_db(), None);
    }
}

#[test]
fn absent_and_out_of_range_decode_unknown() {
    assert_eq!(TrayPosition::decode(None), TrayPosition::Unknown);
    for n in 16u8..=253 {
        assert_eq!(
            TrayPosition::decode(Some(n)),
            TrayPosition::Unknown,
            "indicator {n}"
        );
    }
    assert!(!TrayPosition::decode(None).is_attributable());
}

#[test]
fn row_matching_follows_null_position_convention() {
    let slot = TrayPosition::decode(Some(5)); // AMS1/T1
    assert!(slot.matches_row(Some(1), Some(1)));
    assert!(!slot.matches_row(Some(1), Some(2)));
    assert!(!slot.matches_row(None, None));

    let ext = TrayPosition::decode(Some(255));
    assert!(ext.matches_row(None, None));
    assert!(!ext.matches_row(Some(0), Some(0)));

    // Unknown matches nothing, including the external row.
    assert!(!TrayPosition::Unknown.matches_row(None, None));
}

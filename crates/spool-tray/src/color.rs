//! Filament color normalization.
//!
//! The printer reports tray colors as `RRGGBBAA` hex (the alpha byte
//! is almost always `FF`), while the color-variation reference data
//! stores plain `RRGGBB`. Comparison therefore happens on a
//! normalized 6-digit form: trimmed, `#` stripped, uppercased, alpha
//! suffix dropped.
//!
//! The SQL side of the ColorVariationMatcher applies the same
//! suffix-strip rule in-query; keep the two in lockstep.

/// Normalize a reported color to uppercase `RRGGBB`.
///
/// Returns `None` for values that are not 6- or 8-digit hex after
/// trimming; those can never match a mapping, and pretending
/// otherwise would hide bad reference data.
pub fn normalize_color(raw: &str) -> Option<String> {
    let t = raw.trim().trim_start_matches('#');
    if !matches!(t.len(), 6 | 8) {
        return None;
    }
    if !t.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(t[..6].to_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::normalize_color;

    #[test]
    fn strips_alpha_suffix_from_eight_digit_hex() {
        assert_eq!(normalize_color("FF0000FF").as_deref(), Some("FF0000"));
        // Non-FF alpha is still an alpha channel.
        assert_eq!(normalize_color("00ff0080").as_deref(), Some("00FF00"));
    }

    #[test]
    fn passes_six_digit_hex_through_uppercased() {
        assert_eq!(normalize_color("  #a1b2c3 ").as_deref(), Some("A1B2C3"));
    }

    #[test]
    fn rejects_non_hex_values() {
        assert_eq!(normalize_color("N/A"), None);
        assert_eq!(normalize_color(""), None);
        assert_eq!(normalize_color("FF00"), None);
        assert_eq!(normalize_color("GG0000FF"), None);
    }
}

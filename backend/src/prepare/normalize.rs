//! Label normalisation used to match spreadsheet columns to station names.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Unit suffixes dropped before matching.
const UNIT_SUFFIXES: [&str; 3] = ["(m3/s)", "(mm)", "(hm3)"];

/// Fold a label to `[a-z0-9 ]` words separated by single spaces.
///
/// Accents are stripped (NFKD then combining marks removed), so
/// `Débit (m3/s)` and `debit` normalise the same way.
pub fn normalize_label(text: &str) -> String {
    let folded: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();

    let mut stripped = folded;
    for suffix in UNIT_SUFFIXES {
        stripped = stripped.replace(suffix, " ");
    }

    let spaced: String = stripped
        .chars()
        .map(|c| if c.is_ascii_lowercase() || c.is_ascii_digit() { c } else { ' ' })
        .collect();
    spaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_accents_units_and_separators() {
        assert_eq!(normalize_label("Al Wahda_Débit (m3/s)"), "al wahda debit");
        assert_eq!(normalize_label("  Brg  de   Garde "), "brg de garde");
        assert_eq!(normalize_label("Fès_Pluie 1hr (mm)"), "fes pluie 1hr");
        assert_eq!(normalize_label("Taux de remplissage (%)"), "taux de remplissage");
        assert_eq!(normalize_label(""), "");
    }

    proptest! {
        #[test]
        fn prop_normalized_is_idempotent(s in "\\PC{0,40}") {
            let once = normalize_label(&s);
            prop_assert_eq!(normalize_label(&once), once);
        }

        #[test]
        fn prop_normalized_alphabet(s in "\\PC{0,40}") {
            let out = normalize_label(&s);
            prop_assert!(out.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == ' '));
            prop_assert!(!out.contains("  "));
            prop_assert_eq!(out.trim(), out.as_str());
        }
    }
}

// src/pipeline/validator.rs
//
// License plate validation and normalization. Raw recognized text is
// stripped of separators and upper-cased, then checked against the
// strict plate shape: two letters, one or two digits, one or two
// letters, three or four trailing digits, total length 8-10. Anything
// else is rejected outright -- the text is deterministic output of a
// fixed image, so a retry cannot improve it.

use once_cell::sync::Lazy;
use regex::Regex;

static PLATE_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z]{2}[0-9]{1,2}[A-Z]{1,2}[0-9]{3,4}$")
        .expect("plate regex must compile")
});

const MIN_PLATE_LENGTH: usize = 8;
const MAX_PLATE_LENGTH: usize = 10;

/// Strip separators (spaces, dashes) and upper-case.
pub fn normalize(raw: &str) -> String {
    raw.chars()
        .filter(|c| *c != ' ' && *c != '-')
        .collect::<String>()
        .to_uppercase()
}

/// Validate raw recognized text. Returns the canonical plate identity,
/// or None when the text does not form a plate.
pub fn validate(raw: &str) -> Option<String> {
    let normalized = normalize(raw);
    if normalized.len() < MIN_PLATE_LENGTH || normalized.len() > MAX_PLATE_LENGTH {
        return None;
    }
    if !PLATE_REGEX.is_match(&normalized) {
        return None;
    }
    Some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_well_formed_plates() {
        assert_eq!(validate("MH12AB1234"), Some("MH12AB1234".to_string()));
        assert_eq!(validate("KA01CD5678"), Some("KA01CD5678".to_string()));
        assert_eq!(validate("dl8c1234"), Some("DL8C1234".to_string()));
    }

    #[test]
    fn test_normalizes_separators_and_case() {
        assert_eq!(validate("KA 01 CD 5678"), Some("KA01CD5678".to_string()));
        assert_eq!(validate("MH-12-AB-1234"), Some("MH12AB1234".to_string()));
        assert_eq!(validate("mh 12-ab 1234"), Some("MH12AB1234".to_string()));
    }

    #[test]
    fn test_rejects_wrong_shape() {
        // Too short / wrong shape
        assert_eq!(validate("ABC123"), None);
        // Digits only
        assert_eq!(validate("12345678"), None);
        // Letters only
        assert_eq!(validate("ABCDEFGH"), None);
        // Shape fits the pattern but total length is under 8
        assert_eq!(validate("MH1A123"), None);
        // Too long
        assert_eq!(validate("MH123AB12345"), None);
    }

    #[test]
    fn test_rejects_recognition_sentinels() {
        assert_eq!(validate("unreadable"), None);
        assert_eq!(validate("error"), None);
        assert_eq!(validate(""), None);
    }
}

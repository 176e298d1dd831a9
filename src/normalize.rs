// Normalization primitives shared by every engine.
// Permit keys, dates and owner identities arrive in whatever shape the
// registry export used that day; everything downstream assumes the
// normalized forms produced here.

use anyhow::{bail, Result};

// ============================================================================
// PERMIT KEYS
// ============================================================================

/// Normalize a permit key: trim, strip ALL whitespace (including inner),
/// uppercase. "h f 0910" and "H-F-0910 " both resolve to a stable form.
pub fn normalize_permit_key(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase()
}

// ============================================================================
// DATES
// ============================================================================

/// Reduce a date-ish string to its leading 10-character ISO form
/// ("2024-06-01T00:00:00" -> "2024-06-01"). Blank input yields None.
/// Anything shorter than 10 chars passes through unmodified; downstream
/// comparisons degrade to plain string equality for such values.
pub fn iso10(raw: &str) -> Option<String> {
    let t = raw.trim();
    if t.is_empty() {
        return None;
    }
    if t.len() >= 10 {
        // Char-boundary safe: ISO prefixes are ASCII, but the source is not
        // guaranteed to be.
        if t.is_char_boundary(10) {
            Some(t[..10].to_string())
        } else {
            Some(t.to_string())
        }
    } else {
        Some(t.to_string())
    }
}

/// Optional-column variant of `iso10`.
pub fn iso10_opt(raw: Option<&str>) -> Option<String> {
    raw.and_then(iso10)
}

// ============================================================================
// OWNER IDENTITY
// ============================================================================

/// True if the value is a Norwegian organization number: exactly 9 digits,
/// whitespace ignored.
pub fn is_nine_digits(raw: &str) -> bool {
    let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    stripped.len() == 9 && stripped.chars().all(|c| c.is_ascii_digit())
}

/// Validate a caller-supplied owner identity before any lookup.
/// This is the one user-facing validation error in the core; every other
/// miss degrades to an empty result instead.
pub fn validate_owner_identity(raw: &str) -> Result<String> {
    let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if !is_nine_digits(&stripped) {
        bail!("invalid owner identity {raw:?}: expected a 9-digit organization number");
    }
    Ok(stripped)
}

/// Collapse whitespace and trim, for exact owner matching across sources
/// that disagree about padding.
pub fn normalize_owner_identity(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Aggregation bucket key for an owner: identity when present, else name,
/// else a literal unknown bucket so unattributed permits stay visible.
pub fn owner_key(identity: &str, name: &str) -> String {
    let ident = identity.trim();
    if !ident.is_empty() {
        return ident.to_string();
    }
    let name = name.trim();
    if !name.is_empty() {
        return name.to_string();
    }
    "(unknown)".to_string()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permit_key_normalization() {
        assert_eq!(normalize_permit_key("  h f 0910 "), "HF0910");
        assert_eq!(normalize_permit_key("H-F-0910"), "H-F-0910");
        assert_eq!(normalize_permit_key(""), "");
    }

    #[test]
    fn test_iso10_truncates_timestamps() {
        assert_eq!(iso10("2024-06-01T00:00:00"), Some("2024-06-01".to_string()));
        assert_eq!(iso10("2024-06-01"), Some("2024-06-01".to_string()));
        assert_eq!(iso10("   "), None);
        assert_eq!(iso10(""), None);
    }

    #[test]
    fn test_iso10_short_values_pass_through() {
        assert_eq!(iso10("ukjent"), Some("ukjent".to_string()));
    }

    #[test]
    fn test_nine_digit_check() {
        assert!(is_nine_digits("914904185"));
        assert!(is_nine_digits(" 914 904 185 "));
        assert!(!is_nine_digits("91490418"));
        assert!(!is_nine_digits("9149041850"));
        assert!(!is_nine_digits("H-F-0910"));
        assert!(!is_nine_digits(""));
    }

    #[test]
    fn test_validate_owner_identity() {
        assert_eq!(validate_owner_identity("914 904 185").unwrap(), "914904185");
        assert!(validate_owner_identity("H-F-0910").is_err());
        assert!(validate_owner_identity("").is_err());
    }

    #[test]
    fn test_owner_key_fallback_chain() {
        assert_eq!(owner_key("914904185", "Firma AS"), "914904185");
        assert_eq!(owner_key("  ", "Firma AS"), "Firma AS");
        assert_eq!(owner_key("", "  "), "(unknown)");
    }
}

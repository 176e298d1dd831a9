// Raw attribute bundle - typed view over the registry's schema-free rows.
//
// Every permit row carries a `row_json` blob keyed by the source's own
// column names. The source schema is not fixed across exports, so this
// module models the documented superset of known keys as an explicit
// optional-field struct: accessors return an absent value for missing
// keys and never panic. Unknown keys are retained untyped.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// KNOWN SOURCE FIELDS
// ============================================================================

/// Source field names this crate understands. Candidate lists are ordered
/// by priority; the first present (or first matching) field wins.
pub mod fields {
    pub const SPECIES: &str = "ART";
    pub const PURPOSE: &str = "FORMÅL";
    pub const PRODUCTION_STAGE: &str = "PRODUKSJONSSTADIUM";
    /// Legacy exports carried the production stage under this name.
    pub const PRODUCTION_FORM: &str = "PRODUKSJONSFORM";
    pub const CAPACITY_QUANTITY: &str = "TILL_KAP";
    pub const CAPACITY_UNIT: &str = "TILL_ENHET";
    pub const REGION_LABEL: &str = "PROD_OMR";
    pub const WATER_MEDIUM: &str = "VANNMILJØ";
    pub const SITING: &str = "LOK_PLASS";
    pub const FIXED_TERM_EXPIRY: &str = "TIDSBEGRENSET";

    /// Owner identity candidates, in resolution priority order.
    pub const OWNER_IDENTITY_CANDIDATES: [&str; 2] = ["OK_ORGNR", "ORG.NR/PERS.NR"];
    /// Owner name candidates, in resolution priority order.
    pub const OWNER_NAME_CANDIDATES: [&str; 2] = ["OK_NAVN", "NAVN"];
}

// ============================================================================
// CAPACITY
// ============================================================================

/// A (quantity, unit) capacity pair. Only the unit "TN" (tonnes) is
/// numerically aggregable; every other unit is excluded from capacity sums.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capacity {
    pub quantity: f64,
    pub unit: String,
}

impl Capacity {
    pub fn is_tonnes(&self) -> bool {
        self.unit == "TN"
    }

    /// Quantity if and only if this capacity is in tonnes.
    pub fn tonnes(&self) -> Option<f64> {
        if self.is_tonnes() {
            Some(self.quantity)
        } else {
            None
        }
    }
}

// ============================================================================
// ATTRIBUTE BUNDLE
// ============================================================================

/// Typed view over one permit's raw attribute bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PermitAttributes {
    pub species: Option<String>,
    pub purpose: Option<String>,
    pub production_stage: Option<String>,
    pub capacity_quantity: Option<String>,
    pub capacity_unit: Option<String>,
    pub region_label: Option<String>,
    pub water_medium: Option<String>,
    pub siting: Option<String>,
    pub fixed_term_expiry: Option<String>,

    /// Source keys we do not type. Kept so nothing is silently lost.
    pub extra: HashMap<String, String>,
}

impl PermitAttributes {
    /// Parse a `row_json` blob. Malformed or empty JSON yields an empty
    /// bundle rather than an error: missing attributes are a normal state
    /// of the registry, not a failure.
    pub fn from_json(row_json: &str) -> PermitAttributes {
        let parsed: serde_json::Value = match serde_json::from_str(row_json) {
            Ok(v) => v,
            Err(_) => return PermitAttributes::default(),
        };
        let obj = match parsed.as_object() {
            Some(o) => o,
            None => return PermitAttributes::default(),
        };

        let mut attrs = PermitAttributes::default();
        for (key, value) in obj {
            let text = match value {
                serde_json::Value::String(s) => s.trim().to_string(),
                serde_json::Value::Null => continue,
                other => other.to_string(),
            };
            if text.is_empty() {
                continue;
            }
            match key.as_str() {
                fields::SPECIES => attrs.species = Some(text),
                fields::PURPOSE => attrs.purpose = Some(text),
                fields::PRODUCTION_STAGE => attrs.production_stage = Some(text),
                fields::PRODUCTION_FORM => {
                    // Only a fallback: never overwrite the modern field.
                    if attrs.production_stage.is_none() {
                        attrs.production_stage = Some(text);
                    }
                }
                fields::CAPACITY_QUANTITY => attrs.capacity_quantity = Some(text),
                fields::CAPACITY_UNIT => attrs.capacity_unit = Some(text),
                fields::REGION_LABEL => attrs.region_label = Some(text),
                fields::WATER_MEDIUM => attrs.water_medium = Some(text),
                fields::SITING => attrs.siting = Some(text),
                fields::FIXED_TERM_EXPIRY => attrs.fixed_term_expiry = Some(text),
                _ => {
                    attrs.extra.insert(key.clone(), text);
                }
            }
        }

        // PRODUKSJONSSTADIUM can appear after PRODUKSJONSFORM in iteration
        // order; re-check so the modern field always wins.
        if let Some(modern) = obj
            .get(fields::PRODUCTION_STAGE)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            attrs.production_stage = Some(modern.to_string());
        }

        attrs
    }

    /// Parsed capacity, if both quantity and unit are present and the
    /// quantity is numeric. The source writes decimal commas.
    pub fn capacity(&self) -> Option<Capacity> {
        let raw = self.capacity_quantity.as_deref()?.trim();
        let unit = self.capacity_unit.as_deref()?.trim();
        if raw.is_empty() || unit.is_empty() {
            return None;
        }
        let quantity: f64 = raw.replace(',', ".").parse().ok()?;
        Some(Capacity {
            quantity,
            unit: unit.to_string(),
        })
    }

    /// Region code extracted from the free-text region label: the first
    /// contiguous digit run, accepted only in 1..=13. Anything else is
    /// "no region".
    pub fn region_code(&self) -> Option<u8> {
        region_code_from_label(self.region_label.as_deref()?)
    }

    /// Owner identity for snapshot rows, resolved from the priority-ordered
    /// candidate fields; the first 9-digit-numeric value wins.
    pub fn snapshot_owner_identity(&self) -> Option<String> {
        for field in fields::OWNER_IDENTITY_CANDIDATES {
            if let Some(raw) = self.raw(field) {
                let stripped = crate::normalize::normalize_owner_identity(raw);
                if crate::normalize::is_nine_digits(&stripped) {
                    return Some(stripped);
                }
            }
        }
        None
    }

    /// Owner name for snapshot rows, first non-empty candidate.
    pub fn snapshot_owner_name(&self) -> Option<String> {
        for field in fields::OWNER_NAME_CANDIDATES {
            if let Some(raw) = self.raw(field) {
                let t = raw.trim();
                if !t.is_empty() {
                    return Some(t.to_string());
                }
            }
        }
        None
    }

    /// Raw value of any source field, typed or not.
    pub fn raw(&self, field: &str) -> Option<&str> {
        match field {
            fields::SPECIES => self.species.as_deref(),
            fields::PURPOSE => self.purpose.as_deref(),
            fields::PRODUCTION_STAGE => self.production_stage.as_deref(),
            fields::CAPACITY_QUANTITY => self.capacity_quantity.as_deref(),
            fields::CAPACITY_UNIT => self.capacity_unit.as_deref(),
            fields::REGION_LABEL => self.region_label.as_deref(),
            fields::WATER_MEDIUM => self.water_medium.as_deref(),
            fields::SITING => self.siting.as_deref(),
            fields::FIXED_TERM_EXPIRY => self.fixed_term_expiry.as_deref(),
            other => self.extra.get(other).map(String::as_str),
        }
    }
}

/// First contiguous digit run in a free-text region label, accepted only
/// when it parses into 1..=13.
pub fn region_code_from_label(label: &str) -> Option<u8> {
    let mut digits = String::new();
    for c in label.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
        } else if !digits.is_empty() {
            break;
        }
    }
    let code: u8 = digits.parse().ok()?;
    if (1..=13).contains(&code) {
        Some(code)
    } else {
        None
    }
}

// ============================================================================
// TESTS
// ============================================================================

// Change Classifier - why did a historical ownership period end?
//
// Each closed period gets exactly one reason, decided by the first matching
// rule: still open, expired on its fixed-term date, handed over to a
// following period, or gone from the active register with no successor.

use serde::{Deserialize, Serialize};

use crate::db::OwnershipPeriod;
use crate::normalize::iso10;

// ============================================================================
// REASON CODES
// ============================================================================

/// Termination reason attached to an ownership period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeriodEndReason {
    /// The period has no end date; nothing to classify.
    Open,
    /// The end date equals the period's fixed-term expiry date.
    ExpiredFixedTerm { expiry: String },
    /// A following period exists for the same permit.
    Transferred,
    /// The permit left the active register with no successor.
    Terminated,
}

impl PeriodEndReason {
    /// Registry-facing display label, matching what the public view shows.
    pub fn label(&self) -> String {
        match self {
            PeriodEndReason::Open => String::new(),
            PeriodEndReason::ExpiredFixedTerm { expiry } => {
                format!("Utløpt (tidsbegrenset {expiry})")
            }
            PeriodEndReason::Transferred => "Overført / ny periode".to_string(),
            PeriodEndReason::Terminated => "Avsluttet".to_string(),
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, PeriodEndReason::Open)
    }
}

// ============================================================================
// CLASSIFICATION
// ============================================================================

/// Classify one period, given lookahead to the immediately following period
/// for the same permit (if any).
///
/// Dates are compared on their leading 10-character ISO form; values that
/// do not look like dates pass through unmodified and compare by plain
/// string equality.
pub fn classify_period(
    period: &OwnershipPeriod,
    next_same_permit: Option<&OwnershipPeriod>,
) -> PeriodEndReason {
    let end = match period.valid_to.as_deref().and_then(iso10) {
        Some(d) => d,
        None => return PeriodEndReason::Open,
    };

    if let Some(expiry) = period.fixed_term_expiry.as_deref().and_then(iso10) {
        if expiry == end {
            return PeriodEndReason::ExpiredFixedTerm { expiry };
        }
    }

    if next_same_permit.is_some() {
        return PeriodEndReason::Transferred;
    }

    PeriodEndReason::Terminated
}

/// Classify an ordered per-permit history in one pass. The input must be
/// ordered the way `Dataset::history_for` returns it (start date, then
/// insertion order); each period's lookahead is simply its successor.
pub fn classify_history(periods: &[&OwnershipPeriod]) -> Vec<PeriodEndReason> {
    periods
        .iter()
        .enumerate()
        .map(|(i, period)| classify_period(period, periods.get(i + 1).copied()))
        .collect()
}

/// Lookahead variant for mixed-permit listings (an owner's full history):
/// the follower counts only when it belongs to the same permit.
pub fn classify_mixed_history(periods: &[&OwnershipPeriod]) -> Vec<PeriodEndReason> {
    periods
        .iter()
        .enumerate()
        .map(|(i, period)| {
            let next = periods
                .get(i + 1)
                .copied()
                .filter(|n| n.permit_key == period.permit_key);
            classify_period(period, next)
        })
        .collect()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn period(
        permit_key: &str,
        valid_from: &str,
        valid_to: Option<&str>,
        expiry: Option<&str>,
    ) -> OwnershipPeriod {
        OwnershipPeriod {
            id: 0,
            permit_key: permit_key.to_string(),
            owner_identity: "914904185".to_string(),
            owner_name: "Firma AS".to_string(),
            valid_from: valid_from.to_string(),
            valid_to: valid_to.map(str::to_string),
            fixed_term_expiry: expiry.map(str::to_string),
        }
    }

    #[test]
    fn test_open_period_has_no_reason() {
        let p = period("H-F-0910", "2024-01-01", None, None);
        assert_eq!(classify_period(&p, None), PeriodEndReason::Open);
        assert_eq!(classify_period(&p, None).label(), "");
    }

    #[test]
    fn test_end_matching_fixed_term_expiry() {
        let p = period("H-F-0910", "2023-01-01", Some("2024-06-01"), Some("2024-06-01"));
        let next = period("H-F-0910", "2024-06-02", None, None);

        // Expiry wins even when a follower exists.
        let reason = classify_period(&p, Some(&next));
        assert_eq!(
            reason,
            PeriodEndReason::ExpiredFixedTerm {
                expiry: "2024-06-01".to_string()
            }
        );
        assert_eq!(reason.label(), "Utløpt (tidsbegrenset 2024-06-01)");
    }

    #[test]
    fn test_closed_with_follower_is_transferred() {
        let p = period("H-F-0910", "2022-01-01", Some("2023-01-01"), None);
        let next = period("H-F-0910", "2023-01-02", None, None);
        assert_eq!(classify_period(&p, Some(&next)), PeriodEndReason::Transferred);
    }

    #[test]
    fn test_closed_without_follower_is_terminated() {
        let p = period("H-F-0910", "2022-01-01", Some("2023-01-01"), None);
        assert_eq!(classify_period(&p, None), PeriodEndReason::Terminated);
    }

    #[test]
    fn test_timestamps_normalize_before_comparison() {
        let p = period(
            "H-F-0910",
            "2023-01-01",
            Some("2024-06-01T00:00:00"),
            Some("2024-06-01"),
        );
        assert_eq!(
            classify_period(&p, None),
            PeriodEndReason::ExpiredFixedTerm {
                expiry: "2024-06-01".to_string()
            }
        );
    }

    #[test]
    fn test_non_iso_values_compare_by_string_equality() {
        let p = period("H-F-0910", "2023-01-01", Some("ukjent"), Some("ukjent"));
        assert_eq!(
            classify_period(&p, None),
            PeriodEndReason::ExpiredFixedTerm {
                expiry: "ukjent".to_string()
            }
        );
    }

    #[test]
    fn test_classify_history_walks_with_lookahead() {
        let p1 = period("H-F-0910", "2020-01-01", Some("2021-12-31"), None);
        let p2 = period("H-F-0910", "2022-01-01", Some("2023-06-30"), None);
        let p3 = period("H-F-0910", "2023-07-01", None, None);

        let reasons = classify_history(&[&p1, &p2, &p3]);
        assert_eq!(
            reasons,
            vec![
                PeriodEndReason::Transferred,
                PeriodEndReason::Transferred,
                PeriodEndReason::Open,
            ]
        );
    }

    #[test]
    fn test_mixed_history_only_counts_same_permit_followers() {
        let p1 = period("H-F-0910", "2020-01-01", Some("2021-12-31"), None);
        let p2 = period("N-X-0001", "2022-01-01", None, None);

        // p1's follower in the listing is another permit, so p1 terminated.
        let reasons = classify_mixed_history(&[&p1, &p2]);
        assert_eq!(
            reasons,
            vec![PeriodEndReason::Terminated, PeriodEndReason::Open]
        );
    }
}

// Dataset integrity checks.
//
// The refresh pipeline is expected to keep the registry file consistent;
// these checks verify that it actually did. Every check inspects the
// loaded dataset as a whole and reports findings instead of failing the
// load: a dirty dataset is still servable, but the report tells the
// operator what to fix upstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::Dataset;
use crate::normalize::{iso10, normalize_owner_identity};

// ============================================================================
// REPORT TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// The invariant the engines rely on is broken.
    Error,
    /// Suspicious but tolerated; results may be incomplete.
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub check: String,
    pub permit_key: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub checks_run: usize,
    pub issues: Vec<QualityIssue>,
}

impl QualityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues.len() - self.error_count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} checks, {} errors, {} warnings",
            self.checks_run,
            self.error_count(),
            self.warning_count()
        )
    }
}

// ============================================================================
// VALIDATION
// ============================================================================

/// Run every integrity check against a loaded dataset.
pub fn validate_dataset(ds: &Dataset) -> QualityReport {
    let mut issues = Vec::new();
    let mut checks_run = 0;

    let checks: &[fn(&Dataset, &mut Vec<QualityIssue>)] = &[
        check_duplicate_periods,
        check_negative_periods,
        check_multiple_open_periods,
        check_overlapping_periods,
        check_current_matches_history,
        check_current_snapshot_date,
        check_snapshot_hashes,
    ];
    for check in checks {
        check(ds, &mut issues);
        checks_run += 1;
    }

    QualityReport {
        run_id: Uuid::new_v4().to_string(),
        generated_at: Utc::now(),
        checks_run,
        issues,
    }
}

fn issue(
    issues: &mut Vec<QualityIssue>,
    severity: Severity,
    check: &str,
    permit_key: Option<&str>,
    message: String,
) {
    issues.push(QualityIssue {
        severity,
        check: check.to_string(),
        permit_key: permit_key.map(str::to_string),
        message,
    });
}

/// Two history rows with identical permit, owner and validity window.
fn check_duplicate_periods(ds: &Dataset, issues: &mut Vec<QualityIssue>) {
    let mut seen: HashMap<(String, String, String, String), i64> = HashMap::new();
    for period in &ds.history {
        let fingerprint = (
            period.permit_key.clone(),
            normalize_owner_identity(&period.owner_identity),
            period.valid_from.clone(),
            period.valid_to.clone().unwrap_or_default(),
        );
        if let Some(first_id) = seen.get(&fingerprint) {
            issue(
                issues,
                Severity::Error,
                "duplicate_periods",
                Some(&period.permit_key),
                format!("row {} duplicates row {first_id}", period.id),
            );
        } else {
            seen.insert(fingerprint, period.id);
        }
    }
}

/// A period that ends before it starts.
fn check_negative_periods(ds: &Dataset, issues: &mut Vec<QualityIssue>) {
    for period in &ds.history {
        let from = match iso10(&period.valid_from) {
            Some(d) => d,
            None => continue,
        };
        let to = match period.valid_to.as_deref().and_then(iso10) {
            Some(d) => d,
            None => continue,
        };
        if to < from {
            issue(
                issues,
                Severity::Error,
                "negative_period",
                Some(&period.permit_key),
                format!("row {} ends {to} before it starts {from}", period.id),
            );
        }
    }
}

/// More than one open period for the same permit.
fn check_multiple_open_periods(ds: &Dataset, issues: &mut Vec<QualityIssue>) {
    let mut open_counts: HashMap<&str, usize> = HashMap::new();
    for period in &ds.history {
        if period.is_open() {
            *open_counts.entry(period.permit_key.as_str()).or_default() += 1;
        }
    }
    for (permit_key, count) in open_counts {
        if count > 1 {
            issue(
                issues,
                Severity::Error,
                "multiple_open_periods",
                Some(permit_key),
                format!("{count} open periods; expected at most one"),
            );
        }
    }
}

/// Consecutive periods of the same permit whose windows overlap.
fn check_overlapping_periods(ds: &Dataset, issues: &mut Vec<QualityIssue>) {
    let mut permit_keys: Vec<&str> = ds.history.iter().map(|p| p.permit_key.as_str()).collect();
    permit_keys.sort_unstable();
    permit_keys.dedup();

    for permit_key in permit_keys {
        let periods = ds.history_for(permit_key);
        for pair in periods.windows(2) {
            let earlier_end = match pair[0].valid_to.as_deref().and_then(iso10) {
                Some(d) => d,
                // An open period followed by anything overlaps it.
                None => {
                    issue(
                        issues,
                        Severity::Error,
                        "overlapping_periods",
                        Some(permit_key),
                        format!(
                            "open row {} is followed by row {}",
                            pair[0].id, pair[1].id
                        ),
                    );
                    continue;
                }
            };
            if let Some(later_start) = iso10(&pair[1].valid_from) {
                if later_start <= earlier_end {
                    issue(
                        issues,
                        Severity::Error,
                        "overlapping_periods",
                        Some(permit_key),
                        format!(
                            "row {} starts {later_start} before row {} ends {earlier_end}",
                            pair[1].id, pair[0].id
                        ),
                    );
                }
            }
        }
    }
}

/// Every active permit should have exactly one open period naming the
/// same owner.
fn check_current_matches_history(ds: &Dataset, issues: &mut Vec<QualityIssue>) {
    for permit in &ds.current {
        let open: Vec<_> = ds
            .history_for(&permit.permit_key)
            .into_iter()
            .filter(|p| p.is_open())
            .collect();

        match open.as_slice() {
            [] => issue(
                issues,
                Severity::Error,
                "current_without_open_period",
                Some(&permit.permit_key),
                "active permit has no open ownership period".to_string(),
            ),
            [period] => {
                let current_owner = normalize_owner_identity(&permit.owner_identity);
                let period_owner = normalize_owner_identity(&period.owner_identity);
                if !current_owner.is_empty() && current_owner != period_owner {
                    issue(
                        issues,
                        Severity::Error,
                        "current_owner_mismatch",
                        Some(&permit.permit_key),
                        format!(
                            "active owner {current_owner} but open period names {period_owner}"
                        ),
                    );
                }
            }
            // Covered by multiple_open_periods.
            _ => {}
        }
    }
}

/// No active permit may claim a snapshot date the dataset has never seen.
fn check_current_snapshot_date(ds: &Dataset, issues: &mut Vec<QualityIssue>) {
    let newest = match ds.snapshot_dates.last() {
        Some(d) => d.as_str(),
        None => return,
    };
    for permit in &ds.current {
        if permit.snapshot_date.as_str() > newest {
            issue(
                issues,
                Severity::Error,
                "current_snapshot_date_ahead",
                Some(&permit.permit_key),
                format!(
                    "snapshot date {} is newer than the newest recorded snapshot {newest}",
                    permit.snapshot_date
                ),
            );
        }
    }
}

/// Stored row hashes must match the stored row payloads.
fn check_snapshot_hashes(ds: &Dataset, issues: &mut Vec<QualityIssue>) {
    for snap in &ds.snapshots {
        let stored = match snap.row_hash.as_deref() {
            Some(h) if !h.trim().is_empty() => h.trim().to_lowercase(),
            _ => continue,
        };
        let computed = format!("{:x}", Sha256::digest(snap.row_json.as_bytes()));
        if stored != computed {
            issue(
                issues,
                Severity::Error,
                "snapshot_hash_mismatch",
                Some(&snap.permit_key),
                format!("row payload for {} does not match its stored hash", snap.snapshot_date),
            );
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::PermitAttributes;
    use crate::db::{CurrentPermit, OwnershipPeriod, PermitSnapshot};

    fn period(
        id: i64,
        key: &str,
        ident: &str,
        from: &str,
        to: Option<&str>,
    ) -> OwnershipPeriod {
        OwnershipPeriod {
            id,
            permit_key: key.to_string(),
            owner_identity: ident.to_string(),
            owner_name: format!("{ident} AS"),
            valid_from: from.to_string(),
            valid_to: to.map(str::to_string),
            fixed_term_expiry: None,
        }
    }

    fn current(key: &str, ident: &str, snapshot_date: &str) -> CurrentPermit {
        CurrentPermit {
            permit_key: key.to_string(),
            owner_identity: ident.to_string(),
            owner_name: format!("{ident} AS"),
            tax_liable: false,
            snapshot_date: snapshot_date.to_string(),
            attributes: PermitAttributes::default(),
        }
    }

    fn dataset(
        current: Vec<CurrentPermit>,
        history: Vec<OwnershipPeriod>,
        snapshots: Vec<PermitSnapshot>,
        dates: &[&str],
    ) -> Dataset {
        Dataset::from_rows(
            current,
            history,
            vec![],
            vec![],
            snapshots,
            vec![],
            dates.iter().map(|d| d.to_string()).collect(),
        )
    }

    fn checks(report: &QualityReport) -> Vec<&str> {
        report.issues.iter().map(|i| i.check.as_str()).collect()
    }

    #[test]
    fn test_consistent_dataset_is_clean() {
        let ds = dataset(
            vec![current("H-F-0910", "914904185", "2026-08-01")],
            vec![
                period(1, "H-F-0910", "111111111", "2020-01-01", Some("2023-12-31")),
                period(2, "H-F-0910", "914904185", "2024-01-01", None),
            ],
            vec![],
            &["2026-07-31", "2026-08-01"],
        );

        let report = validate_dataset(&ds);
        assert!(report.is_clean(), "unexpected issues: {:?}", report.issues);
        assert_eq!(report.checks_run, 7);
    }

    #[test]
    fn test_duplicate_and_negative_periods() {
        let ds = dataset(
            vec![],
            vec![
                period(1, "H-F-0910", "914904185", "2020-01-01", Some("2021-01-01")),
                period(2, "H-F-0910", "914904185", "2020-01-01", Some("2021-01-01")),
                period(3, "N-X-0001", "914904185", "2022-06-01", Some("2022-01-01")),
            ],
            vec![],
            &[],
        );

        let report = validate_dataset(&ds);
        let found = checks(&report);
        assert!(found.contains(&"duplicate_periods"));
        assert!(found.contains(&"negative_period"));
        // Identical windows also overlap each other.
        assert!(found.contains(&"overlapping_periods"));
        // Every check failure blocks validation.
        assert_eq!(report.warning_count(), 0);
        assert_eq!(report.error_count(), report.issues.len());
    }

    #[test]
    fn test_multiple_open_and_overlapping_periods() {
        let ds = dataset(
            vec![],
            vec![
                period(1, "H-F-0910", "111111111", "2020-01-01", None),
                period(2, "H-F-0910", "914904185", "2024-01-01", None),
                period(3, "N-X-0001", "111111111", "2020-01-01", Some("2022-06-30")),
                period(4, "N-X-0001", "914904185", "2022-01-01", Some("2023-01-01")),
            ],
            vec![],
            &[],
        );

        let report = validate_dataset(&ds);
        let found = checks(&report);
        assert!(found.contains(&"multiple_open_periods"));
        assert!(found.contains(&"overlapping_periods"));
    }

    #[test]
    fn test_current_permit_without_open_period_or_wrong_owner() {
        let ds = dataset(
            vec![
                current("H-F-0910", "914904185", "2026-08-01"),
                current("N-X-0001", "914904185", "2026-08-01"),
            ],
            vec![
                // H-F-0910 has only a closed period.
                period(1, "H-F-0910", "914904185", "2020-01-01", Some("2024-01-01")),
                // N-X-0001's open period names a different owner.
                period(2, "N-X-0001", "111111111", "2020-01-01", None),
            ],
            vec![],
            &["2026-08-01"],
        );

        let report = validate_dataset(&ds);
        let found = checks(&report);
        assert!(found.contains(&"current_without_open_period"));
        assert!(found.contains(&"current_owner_mismatch"));
        assert_eq!(report.error_count(), 2);
    }

    #[test]
    fn test_current_snapshot_date_ahead_of_recorded_snapshots() {
        let ds = dataset(
            vec![current("H-F-0910", "914904185", "2026-09-15")],
            vec![period(1, "H-F-0910", "914904185", "2020-01-01", None)],
            vec![],
            &["2026-07-31", "2026-08-01"],
        );

        let report = validate_dataset(&ds);
        assert!(checks(&report).contains(&"current_snapshot_date_ahead"));
        assert_eq!(report.error_count(), 1);
    }

    #[test]
    fn test_snapshot_hash_verification() {
        let good_json = r#"{"ART":"Laks"}"#;
        let good_hash = format!("{:x}", Sha256::digest(good_json.as_bytes()));

        let snapshots = vec![
            PermitSnapshot {
                snapshot_date: "2026-08-01".to_string(),
                permit_key: "H-F-0910".to_string(),
                tax_liable: true,
                attributes: PermitAttributes::from_json(good_json),
                row_json: good_json.to_string(),
                row_hash: Some(good_hash),
            },
            PermitSnapshot {
                snapshot_date: "2026-08-01".to_string(),
                permit_key: "N-X-0001".to_string(),
                tax_liable: true,
                attributes: PermitAttributes::from_json(good_json),
                row_json: good_json.to_string(),
                row_hash: Some("deadbeef".to_string()),
            },
            // No stored hash: nothing to verify.
            PermitSnapshot {
                snapshot_date: "2026-08-01".to_string(),
                permit_key: "N-X-0002".to_string(),
                tax_liable: true,
                attributes: PermitAttributes::from_json(good_json),
                row_json: good_json.to_string(),
                row_hash: None,
            },
        ];

        let ds = dataset(vec![], vec![], snapshots, &["2026-08-01"]);
        let report = validate_dataset(&ds);

        let mismatches: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.check == "snapshot_hash_mismatch")
            .collect();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].permit_key.as_deref(), Some("N-X-0001"));
        assert_eq!(mismatches[0].severity, Severity::Error);
    }
}

// Liability Change-Event Differ.
//
// Walks the permit-per-day time series and reports, per owner, when their
// resource-rent liable holdings went from zero to some ("started") or from
// some to zero ("stopped"). Movement between non-zero counts is not an
// event; only the crossings of zero matter for tax onboarding.

use anyhow::{bail, Result};
use std::collections::{BTreeMap, BTreeSet};

use crate::db::Dataset;

// ============================================================================
// REPORT TYPES
// ============================================================================

/// One owner crossing the zero-liability boundary between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiabilityTransition {
    pub owner_identity: String,
    pub owner_name: String,
    /// Snapshot date at which the new state was first observed.
    pub date: String,
    pub before_count: usize,
    pub after_count: usize,
    /// The liable permits on the non-zero side of the crossing.
    pub permit_keys: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TransitionReport {
    pub started: Vec<LiabilityTransition>,
    pub stopped: Vec<LiabilityTransition>,
}

impl TransitionReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }

    fn merge(&mut self, mut other: TransitionReport) {
        self.started.append(&mut other.started);
        self.stopped.append(&mut other.stopped);
    }

    fn sort(&mut self) {
        let key = |t: &LiabilityTransition| {
            (t.owner_name.clone(), t.owner_identity.clone(), t.date.clone())
        };
        self.started.sort_by_key(key);
        self.stopped.sort_by_key(key);
    }
}

// ============================================================================
// OWNER STATE PER SNAPSHOT
// ============================================================================

#[derive(Debug, Default, Clone)]
struct OwnerHoldings {
    owner_identity: String,
    owner_name: String,
    permit_keys: BTreeSet<String>,
}

/// Liable holdings per owner at one snapshot date, keyed by resolved
/// organization number. Owner identity comes from the snapshot row itself
/// (the raw registry columns), so attribution reflects what the registry
/// said on that day, not the current state. Rows with no resolvable
/// 9-digit identity cannot be attributed and contribute nothing.
fn liable_holdings_at(ds: &Dataset, snapshot_date: &str) -> BTreeMap<String, OwnerHoldings> {
    let mut holdings: BTreeMap<String, OwnerHoldings> = BTreeMap::new();

    for snap in &ds.snapshots {
        if snap.snapshot_date != snapshot_date || !snap.tax_liable {
            continue;
        }
        let identity = match snap.attributes.snapshot_owner_identity() {
            Some(id) => id,
            None => continue,
        };
        let name = snap.attributes.snapshot_owner_name().unwrap_or_default();

        let entry = holdings.entry(identity.clone()).or_default();
        if entry.owner_identity.is_empty() {
            entry.owner_identity = identity;
        }
        if entry.owner_name.is_empty() {
            entry.owner_name = name;
        }
        entry.permit_keys.insert(snap.permit_key.clone());
    }

    holdings
}

fn diff_pair(
    older: &BTreeMap<String, OwnerHoldings>,
    newer: &BTreeMap<String, OwnerHoldings>,
    newer_date: &str,
) -> TransitionReport {
    let mut report = TransitionReport::default();

    for (key, now) in newer {
        if older.contains_key(key) {
            continue;
        }
        report.started.push(LiabilityTransition {
            owner_identity: now.owner_identity.clone(),
            owner_name: now.owner_name.clone(),
            date: newer_date.to_string(),
            before_count: 0,
            after_count: now.permit_keys.len(),
            permit_keys: now.permit_keys.clone(),
        });
    }

    for (key, before) in older {
        if newer.contains_key(key) {
            continue;
        }
        report.stopped.push(LiabilityTransition {
            owner_identity: before.owner_identity.clone(),
            owner_name: before.owner_name.clone(),
            date: newer_date.to_string(),
            before_count: before.permit_keys.len(),
            after_count: 0,
            permit_keys: before.permit_keys.clone(),
        });
    }

    report
}

// ============================================================================
// PUBLIC ENTRY POINTS
// ============================================================================

/// Zero-crossings between two specific snapshot dates.
pub fn diff_snapshots(ds: &Dataset, older_date: &str, newer_date: &str) -> TransitionReport {
    let older = liable_holdings_at(ds, older_date);
    let newer = liable_holdings_at(ds, newer_date);
    let mut report = diff_pair(&older, &newer, newer_date);
    report.sort();
    report
}

/// Zero-crossings between the two most recent dataset snapshots.
pub fn diff_latest(ds: &Dataset) -> Result<TransitionReport> {
    match ds.latest_two_snapshot_dates() {
        Some((older, newer)) => Ok(diff_snapshots(ds, &older, &newer)),
        None => bail!("trenger minst to snapshots for å sammenligne"),
    }
}

/// All zero-crossings observed within one calendar year.
///
/// Snapshot dates inside the year are walked in ascending order; the first
/// date is the baseline and produces no events of its own, so an owner who
/// was already liable at the start of the year does not show up as
/// "started".
pub fn diff_year(ds: &Dataset, year: i32) -> TransitionReport {
    let prefix = format!("{year}-");
    let mut dates: Vec<&str> = ds
        .snapshot_dates
        .iter()
        .map(String::as_str)
        .filter(|d| d.starts_with(&prefix))
        .collect();
    dates.sort_unstable();
    dates.dedup();

    let mut report = TransitionReport::default();
    if dates.len() < 2 {
        return report;
    }

    let mut previous = liable_holdings_at(ds, dates[0]);
    for date in &dates[1..] {
        let current = liable_holdings_at(ds, date);
        report.merge(diff_pair(&previous, &current, date));
        previous = current;
    }

    report.sort();
    report
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::PermitAttributes;
    use crate::db::PermitSnapshot;

    fn snap(date: &str, key: &str, liable: bool, orgnr: &str, name: &str) -> PermitSnapshot {
        let row_json = format!(r#"{{"OK_ORGNR":"{orgnr}","OK_NAVN":"{name}"}}"#);
        PermitSnapshot {
            snapshot_date: date.to_string(),
            permit_key: key.to_string(),
            tax_liable: liable,
            attributes: PermitAttributes::from_json(&row_json),
            row_json,
            row_hash: None,
        }
    }

    fn dataset(snapshots: Vec<PermitSnapshot>, dates: &[&str]) -> Dataset {
        Dataset::from_rows(
            vec![],
            vec![],
            vec![],
            vec![],
            snapshots,
            vec![],
            dates.iter().map(|d| d.to_string()).collect(),
        )
    }

    #[test]
    fn test_owner_going_zero_to_two_starts_once() {
        let ds = dataset(
            vec![
                snap("2026-08-01", "H-F-0001", true, "914904185", "Firma AS"),
                snap("2026-08-01", "H-F-0002", true, "914904185", "Firma AS"),
            ],
            &["2026-07-31", "2026-08-01"],
        );

        let report = diff_snapshots(&ds, "2026-07-31", "2026-08-01");
        assert_eq!(report.started.len(), 1);
        assert!(report.stopped.is_empty());

        let t = &report.started[0];
        assert_eq!(t.owner_identity, "914904185");
        assert_eq!(t.date, "2026-08-01");
        assert_eq!(t.before_count, 0);
        assert_eq!(t.after_count, 2);
        assert_eq!(t.permit_keys.len(), 2);
    }

    #[test]
    fn test_rows_without_resolvable_identity_produce_no_events() {
        // A liable row carrying only a name (or a non-numeric identity)
        // cannot be attributed to an owner and must not cross the zero
        // boundary for anyone.
        let name_only = PermitSnapshot {
            snapshot_date: "2026-08-01".to_string(),
            permit_key: "H-F-0001".to_string(),
            tax_liable: true,
            attributes: PermitAttributes::from_json(r#"{"OK_NAVN":"Navnløs AS"}"#),
            row_json: r#"{"OK_NAVN":"Navnløs AS"}"#.to_string(),
            row_hash: None,
        };
        let ds = dataset(
            vec![
                name_only,
                snap("2026-08-01", "H-F-0002", true, "privatperson", "Uten Orgnr AS"),
            ],
            &["2026-07-31", "2026-08-01"],
        );

        assert!(diff_snapshots(&ds, "2026-07-31", "2026-08-01").is_empty());
    }

    #[test]
    fn test_owner_going_two_to_zero_stops_with_prior_holdings() {
        let ds = dataset(
            vec![
                snap("2026-07-31", "H-F-0001", true, "914904185", "Firma AS"),
                snap("2026-07-31", "H-F-0002", true, "914904185", "Firma AS"),
                // Still present on the newer date but no longer liable.
                snap("2026-08-01", "H-F-0001", false, "914904185", "Firma AS"),
            ],
            &["2026-07-31", "2026-08-01"],
        );

        let report = diff_snapshots(&ds, "2026-07-31", "2026-08-01");
        assert!(report.started.is_empty());
        assert_eq!(report.stopped.len(), 1);
        assert_eq!(
            report.stopped[0].permit_keys,
            BTreeSet::from(["H-F-0001".to_string(), "H-F-0002".to_string()])
        );
    }

    #[test]
    fn test_nonzero_to_nonzero_movement_is_not_an_event() {
        let ds = dataset(
            vec![
                snap("2026-07-31", "H-F-0001", true, "914904185", "Firma AS"),
                snap("2026-07-31", "H-F-0002", true, "914904185", "Firma AS"),
                snap("2026-08-01", "H-F-0001", true, "914904185", "Firma AS"),
            ],
            &["2026-07-31", "2026-08-01"],
        );

        assert!(diff_snapshots(&ds, "2026-07-31", "2026-08-01").is_empty());
    }

    #[test]
    fn test_year_walk_uses_first_date_as_baseline() {
        let ds = dataset(
            vec![
                // Liable from the first snapshot of the year: baseline only.
                snap("2026-01-10", "H-F-0001", true, "111111111", "Allerede AS"),
                snap("2026-02-10", "H-F-0001", true, "111111111", "Allerede AS"),
                // Becomes liable mid-year.
                snap("2026-02-10", "H-F-0002", true, "222222222", "Ny AS"),
                // Liable in February, gone in March.
                snap("2026-03-10", "H-F-0001", true, "111111111", "Allerede AS"),
            ],
            &["2026-01-10", "2026-02-10", "2026-03-10"],
        );

        let report = diff_year(&ds, 2026);
        assert_eq!(report.started.len(), 1);
        assert_eq!(report.started[0].owner_identity, "222222222");
        assert_eq!(report.started[0].date, "2026-02-10");

        assert_eq!(report.stopped.len(), 1);
        assert_eq!(report.stopped[0].owner_identity, "222222222");
        assert_eq!(report.stopped[0].date, "2026-03-10");
    }

    #[test]
    fn test_year_with_fewer_than_two_snapshots_is_quiet() {
        let ds = dataset(
            vec![snap("2026-01-10", "H-F-0001", true, "111111111", "Firma AS")],
            &["2026-01-10"],
        );
        assert!(diff_year(&ds, 2026).is_empty());
        assert!(diff_year(&ds, 2025).is_empty());
    }

    #[test]
    fn test_report_sorted_by_owner_name_then_identity() {
        let ds = dataset(
            vec![
                snap("2026-08-01", "H-F-0001", true, "999999999", "Øst AS"),
                snap("2026-08-01", "H-F-0002", true, "111111111", "Alfa AS"),
                snap("2026-08-01", "H-F-0003", true, "555555555", "Alfa AS"),
            ],
            &["2026-07-31", "2026-08-01"],
        );

        let report = diff_snapshots(&ds, "2026-07-31", "2026-08-01");
        let names: Vec<(&str, &str)> = report
            .started
            .iter()
            .map(|t| (t.owner_name.as_str(), t.owner_identity.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![("Alfa AS", "111111111"), ("Alfa AS", "555555555"), ("Øst AS", "999999999")]
        );
    }

    #[test]
    fn test_latest_requires_two_snapshots() {
        let ds = dataset(vec![], &["2026-08-01"]);
        assert!(diff_latest(&ds).is_err());

        let ds = dataset(
            vec![snap("2026-08-01", "H-F-0001", true, "914904185", "Firma AS")],
            &["2026-07-31", "2026-08-01"],
        );
        let report = diff_latest(&ds).unwrap();
        assert_eq!(report.started.len(), 1);
    }
}

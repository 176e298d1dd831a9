// Area/Owner Aggregator - per-region and per-owner rollups.
//
// Built exactly once per dataset load by scanning every current permit a
// single time. The result is an explicit value owned by the load
// lifecycle: a reload builds a fresh `RegistryIndexes` and swaps it in
// whole, so a stale index is never served across reloads and nothing is
// mutated while a read is in flight.

use anyhow::Result;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::db::Dataset;
use crate::liability::{liability_years, DEFAULT_ORIGIN_YEAR};
use crate::normalize::{normalize_owner_identity, owner_key, validate_owner_identity};

// ============================================================================
// REGION ROLLUPS
// ============================================================================

/// Per-owner slice of one production area.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnerAreaRollup {
    pub owner_name: String,
    pub liable_count: usize,
    pub non_liable_count: usize,
    /// Summed capacity, tonnes-unit permits only.
    pub capacity_tn: f64,
}

/// Rollup for one production area (region codes 1-13).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AreaRollup {
    pub region_code: u8,
    /// Latest recorded traffic-light status for the area, if any.
    pub latest_status: Option<String>,
    pub liable_count: usize,
    pub non_liable_count: usize,
    pub capacity_tn: f64,
    /// Owner aggregation key -> per-owner breakdown.
    pub owners: BTreeMap<String, OwnerAreaRollup>,
}

impl AreaRollup {
    pub fn permit_count(&self) -> usize {
        self.liable_count + self.non_liable_count
    }
}

/// The memoized aggregation indexes for one dataset load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryIndexes {
    pub by_region: BTreeMap<u8, AreaRollup>,
}

impl RegistryIndexes {
    /// Build both indexes in one scan of the current permits.
    ///
    /// Permits whose region label yields no code in 1..=13 are excluded
    /// from these indexes entirely (they still count as normal active
    /// permits elsewhere). Capacity contributes only for unit "TN".
    pub fn build(ds: &Dataset) -> RegistryIndexes {
        let latest_status = latest_area_status(ds);
        let mut by_region: BTreeMap<u8, AreaRollup> = BTreeMap::new();

        for permit in &ds.current {
            let region = match permit.attributes.region_code() {
                Some(r) => r,
                None => continue,
            };

            let rollup = by_region.entry(region).or_insert_with(|| AreaRollup {
                region_code: region,
                latest_status: latest_status.get(&region).cloned(),
                ..AreaRollup::default()
            });

            let tonnes = permit
                .attributes
                .capacity()
                .and_then(|c| c.tonnes())
                .unwrap_or(0.0);

            if permit.tax_liable {
                rollup.liable_count += 1;
            } else {
                rollup.non_liable_count += 1;
            }
            rollup.capacity_tn += tonnes;

            let key = owner_key(&permit.owner_identity, &permit.owner_name);
            let owner = rollup.owners.entry(key).or_default();
            if owner.owner_name.is_empty() && !permit.owner_name.trim().is_empty() {
                owner.owner_name = permit.owner_name.trim().to_string();
            }
            if permit.tax_liable {
                owner.liable_count += 1;
            } else {
                owner.non_liable_count += 1;
            }
            owner.capacity_tn += tonnes;
        }

        RegistryIndexes { by_region }
    }

    pub fn region(&self, code: u8) -> Option<&AreaRollup> {
        self.by_region.get(&code)
    }
}

/// Latest traffic-light status per region, taken from the newest
/// `production_area_status` row for each code.
fn latest_area_status(ds: &Dataset) -> HashMap<u8, String> {
    let mut latest: HashMap<u8, (String, String)> = HashMap::new();
    for row in &ds.area_status {
        let status = match &row.status {
            Some(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => continue,
        };
        match latest.get(&row.region_code) {
            Some((date, _)) if *date >= row.snapshot_date => {}
            _ => {
                latest.insert(row.region_code, (row.snapshot_date.clone(), status));
            }
        }
    }
    latest.into_iter().map(|(k, (_, s))| (k, s)).collect()
}

// ============================================================================
// OWNER SUMMARY
// ============================================================================

/// Derived per-owner summary: current holdings, former holdings and the
/// attributed liability year-set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnerSummary {
    pub owner_identity: String,
    pub owner_name: String,
    pub active_permits: usize,
    pub liable_active_permits: usize,
    /// Distinct permits the owner once held but holds no longer.
    pub former_permits: usize,
    pub capacity_tn_active: f64,
    pub capacity_tn_liable: f64,
    pub liability_years: BTreeSet<i32>,
}

/// Assemble the summary for one owner. The identity is validated up front
/// (9-digit organization number); this is the only lookup in the core that
/// rejects its input instead of returning an empty result.
pub fn owner_summary(
    ds: &Dataset,
    owner_identity: &str,
    origin_year: i32,
    current_year: i32,
) -> Result<OwnerSummary> {
    let ident = validate_owner_identity(owner_identity)?;

    let mut summary = OwnerSummary {
        owner_identity: ident.clone(),
        owner_name: String::new(),
        active_permits: 0,
        liable_active_permits: 0,
        former_permits: 0,
        capacity_tn_active: 0.0,
        capacity_tn_liable: 0.0,
        liability_years: liability_years(ds, &ident, origin_year, current_year),
    };

    let mut held_now: BTreeSet<&str> = BTreeSet::new();
    for permit in &ds.current {
        if normalize_owner_identity(&permit.owner_identity) != ident {
            continue;
        }
        held_now.insert(permit.permit_key.as_str());
        summary.active_permits += 1;
        let tonnes = permit
            .attributes
            .capacity()
            .and_then(|c| c.tonnes())
            .unwrap_or(0.0);
        summary.capacity_tn_active += tonnes;
        if permit.tax_liable {
            summary.liable_active_permits += 1;
            summary.capacity_tn_liable += tonnes;
        }
        if summary.owner_name.is_empty() && !permit.owner_name.trim().is_empty() {
            summary.owner_name = permit.owner_name.trim().to_string();
        }
    }

    let mut former: BTreeSet<&str> = BTreeSet::new();
    for period in &ds.history {
        if normalize_owner_identity(&period.owner_identity) != ident {
            continue;
        }
        if summary.owner_name.is_empty() && !period.owner_name.trim().is_empty() {
            summary.owner_name = period.owner_name.trim().to_string();
        }
        if !period.is_open() && !held_now.contains(period.permit_key.as_str()) {
            former.insert(period.permit_key.as_str());
        }
    }
    summary.former_permits = former.len();

    Ok(summary)
}

/// [`owner_summary`] with the default origin year and current UTC year.
pub fn owner_summary_now(ds: &Dataset, owner_identity: &str) -> Result<OwnerSummary> {
    owner_summary(ds, owner_identity, DEFAULT_ORIGIN_YEAR, Utc::now().year())
}

// ============================================================================
// TESTS
// ============================================================================

// Liability Year-Set Calculator.
//
// For one owner, derive the set of calendar years in which they held at
// least one permit that is *presently* flagged tax-liable ("grunnrente").
//
// Deliberate policy, preserved from the surrounding system's displayed
// figures: liability is judged by each permit's current flag, not a
// historical per-year flag, because per-year liability is not reliably
// recoverable before the tax's cutover year. The displayed numbers depend
// on this exact retrospective approximation.

use chrono::{Datelike, Utc};
use std::collections::BTreeSet;

use crate::db::Dataset;
use crate::intervals::{reconstruct_intervals_for_owner, IntervalEnd, IntervalStart};
use crate::normalize::normalize_owner_identity;

/// First year the resource-rent tax applies.
pub const DEFAULT_ORIGIN_YEAR: i32 = 2023;

/// Calendar year of an ISO-ish date string, if the leading 4 characters
/// parse as a year. Anything else is treated as unknown.
fn year_of(date: &str) -> Option<i32> {
    let head = date.get(..4)?;
    let year: i32 = head.parse().ok()?;
    // Guard against strings like "ukje" parsing or absurd values.
    if (1900..=9999).contains(&year) {
        Some(year)
    } else {
        None
    }
}

/// Years in which `owner_identity` is attributed tax liability, bounded
/// below by `origin_year` and above by `current_year`.
///
/// Both years are explicit so tests can pin the clipping behavior; use
/// [`liability_years_now`] for the wall-clock variant.
pub fn liability_years(
    ds: &Dataset,
    owner_identity: &str,
    origin_year: i32,
    current_year: i32,
) -> BTreeSet<i32> {
    let owner = normalize_owner_identity(owner_identity);
    let mut years = BTreeSet::new();
    if owner.is_empty() {
        return years;
    }

    for permit in &ds.current {
        if !permit.tax_liable {
            continue;
        }
        if !owner_ever_held(ds, &permit.permit_key, &owner) {
            continue;
        }

        for interval in reconstruct_intervals_for_owner(ds, &permit.permit_key, &owner) {
            let start_year = match &interval.start {
                IntervalStart::Original => origin_year,
                IntervalStart::Date(d) => year_of(d).unwrap_or(origin_year),
            };
            let end_year = match &interval.end {
                IntervalEnd::Active => current_year,
                IntervalEnd::Date(d) => year_of(d).unwrap_or(current_year),
            };

            let start = start_year.max(origin_year);
            let end = end_year.min(current_year);
            if end < origin_year || start > end {
                continue;
            }
            years.extend(start..=end);
        }
    }

    years
}

/// [`liability_years`] with the default origin year and the current UTC
/// calendar year.
pub fn liability_years_now(ds: &Dataset, owner_identity: &str) -> BTreeSet<i32> {
    liability_years(ds, owner_identity, DEFAULT_ORIGIN_YEAR, Utc::now().year())
}

/// Whether the owner appears anywhere in a permit's fact chain: as the
/// original registrant or as the resulting owner of any transfer.
fn owner_ever_held(ds: &Dataset, permit_key: &str, owner: &str) -> bool {
    if let Some(origin) = ds.origin_for(permit_key) {
        if normalize_owner_identity(&origin.owner_identity) == *owner {
            return true;
        }
    }
    ds.transfers_for(permit_key)
        .iter()
        .any(|t| normalize_owner_identity(&t.owner_identity) == *owner)
}

// ============================================================================
// TESTS
// ============================================================================

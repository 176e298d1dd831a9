// Interval Reconstruction Engine.
//
// Two independent, partially overlapping fact sources describe who has held
// a permit: the original registrant (no concrete date) and the chronological
// transfer log (owner *after* each event). This module merges them into one
// ordered list of contiguous, non-overlapping ownership intervals per
// permit. Reconstruction is a pure function of the facts: calling it twice
// returns structurally identical lists.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::db::Dataset;
use crate::normalize::{iso10, normalize_owner_identity};

// ============================================================================
// BOUNDARIES
// ============================================================================

/// Start of an ownership interval: either the origin sentinel (the original
/// registrant, whose concrete start date is unknown) or a transfer date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalStart {
    Original,
    Date(String),
}

impl IntervalStart {
    /// Registry-facing label: "Opprinnelig" for the origin sentinel.
    pub fn label(&self) -> &str {
        match self {
            IntervalStart::Original => "Opprinnelig",
            IntervalStart::Date(d) => d,
        }
    }
}

/// End of an ownership interval: still active, or the day before the next
/// interval's start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalEnd {
    Active,
    Date(String),
}

impl IntervalEnd {
    pub fn label(&self) -> &str {
        match self {
            IntervalEnd::Active => "Aktiv",
            IntervalEnd::Date(d) => d,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, IntervalEnd::Active)
    }
}

/// One derived ownership interval. Never persisted; recomputed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipInterval {
    pub permit_key: String,
    pub owner_identity: String,
    pub owner_name: String,
    pub start: IntervalStart,
    pub end: IntervalEnd,
}

// ============================================================================
// EVENT ASSEMBLY
// ============================================================================

/// An ownership-change event in the merged walk. `date` is None only for
/// the origin fact, which sorts before every dated event.
#[derive(Debug, Clone)]
struct OwnershipEvent {
    /// Normalized (iso10) event date; None = origin sentinel.
    date: Option<String>,
    /// Insertion sequence, the tie-break for same-date events.
    seq: i64,
    owner_identity: String,
    owner_name: String,
}

/// Ordering contract for ownership events: the origin sentinel first, then
/// event date ascending, then insertion sequence ascending.
///
/// The same-date tie-break is an assumption about upstream insertion
/// order being stable; it is pinned by tests rather than "fixed".
fn compare_events(a: &OwnershipEvent, b: &OwnershipEvent) -> Ordering {
    match (&a.date, &b.date) {
        (None, None) => a.seq.cmp(&b.seq),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(da), Some(db)) => da.cmp(db).then(a.seq.cmp(&b.seq)),
    }
}

/// The calendar day immediately preceding an ISO date, computed in UTC day
/// arithmetic with no timezone conversion. Unparseable input degrades to
/// the raw string instead of failing.
fn previous_day(iso_date: &str) -> String {
    match NaiveDate::parse_from_str(iso_date, "%Y-%m-%d") {
        Ok(d) => (d - Duration::days(1)).format("%Y-%m-%d").to_string(),
        Err(_) => iso_date.to_string(),
    }
}

// ============================================================================
// RECONSTRUCTION
// ============================================================================

/// Reconstruct the full ownership timeline of one permit.
///
/// No origin fact and no transfers yields an empty list. Transfer events
/// with no resolvable recipient (identity and name both blank) contribute
/// no interval and do not break the chain: the predecessor's interval runs
/// to the day before the next surviving event.
pub fn reconstruct_intervals(ds: &Dataset, permit_key: &str) -> Vec<OwnershipInterval> {
    build_intervals(ds, permit_key, None)
}

/// Same as [`reconstruct_intervals`], filtered to intervals held by one
/// owner (exact identity match after whitespace normalization). An owner
/// who re-acquired the permit gets multiple disjoint intervals.
pub fn reconstruct_intervals_for_owner(
    ds: &Dataset,
    permit_key: &str,
    owner_identity: &str,
) -> Vec<OwnershipInterval> {
    build_intervals(ds, permit_key, Some(owner_identity))
}

fn build_intervals(
    ds: &Dataset,
    permit_key: &str,
    owner_filter: Option<&str>,
) -> Vec<OwnershipInterval> {
    let mut events: Vec<OwnershipEvent> = Vec::new();

    if let Some(origin) = ds.origin_for(permit_key) {
        events.push(OwnershipEvent {
            date: None,
            seq: -1,
            owner_identity: origin.owner_identity.clone(),
            owner_name: origin.owner_name.clone(),
        });
    }

    for transfer in ds.transfers_for(permit_key) {
        // A dateless transfer keeps its slot: the empty date sorts after
        // the origin sentinel but before every dated event.
        events.push(OwnershipEvent {
            date: Some(iso10(transfer.event_date.as_deref().unwrap_or("")).unwrap_or_default()),
            seq: transfer.seq,
            owner_identity: transfer.owner_identity.clone(),
            owner_name: transfer.owner_name.clone(),
        });
    }

    // A transfer with no resolvable recipient contributes nothing.
    events.retain(|e| {
        !(e.owner_identity.trim().is_empty() && e.owner_name.trim().is_empty())
    });

    events.sort_by(compare_events);

    let key = crate::normalize::normalize_permit_key(permit_key);
    let filter = owner_filter.map(normalize_owner_identity);

    let mut intervals = Vec::with_capacity(events.len());
    for (i, event) in events.iter().enumerate() {
        let start = match &event.date {
            None => IntervalStart::Original,
            Some(d) => IntervalStart::Date(d.clone()),
        };
        let end = match events.get(i + 1) {
            None => IntervalEnd::Active,
            Some(next) => match &next.date {
                // An undated successor can only be the origin fact, which
                // never follows another event; treated as open end.
                None => IntervalEnd::Active,
                Some(d) => IntervalEnd::Date(previous_day(d)),
            },
        };

        if let Some(wanted) = &filter {
            if normalize_owner_identity(&event.owner_identity) != *wanted {
                continue;
            }
        }

        intervals.push(OwnershipInterval {
            permit_key: key.clone(),
            owner_identity: event.owner_identity.clone(),
            owner_name: event.owner_name.clone(),
            start,
            end,
        });
    }

    intervals
}

// ============================================================================
// TESTS
// ============================================================================

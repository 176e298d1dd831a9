// Akvakulturregisteret analysis core.
// Exposes all engines for use by the CLI and tests.

pub mod aggregate;
pub mod attributes;
pub mod classify;
pub mod db;
pub mod diff;
pub mod intervals;
pub mod liability;
pub mod normalize;
pub mod quality;

// Re-export commonly used types
pub use aggregate::{
    owner_summary, owner_summary_now, AreaRollup, OwnerAreaRollup, OwnerSummary, RegistryIndexes,
};
pub use attributes::{region_code_from_label, Capacity, PermitAttributes};
pub use classify::{classify_history, classify_mixed_history, classify_period, PeriodEndReason};
pub use db::{
    setup_database, AreaStatus, CurrentPermit, Dataset, OriginalOwner, OwnershipPeriod,
    PermitSnapshot, TransferEvent,
};
pub use diff::{diff_latest, diff_snapshots, diff_year, LiabilityTransition, TransitionReport};
pub use intervals::{
    reconstruct_intervals, reconstruct_intervals_for_owner, IntervalEnd, IntervalStart,
    OwnershipInterval,
};
pub use liability::{liability_years, liability_years_now, DEFAULT_ORIGIN_YEAR};
pub use normalize::{
    is_nine_digits, iso10, iso10_opt, normalize_owner_identity, normalize_permit_key, owner_key,
    validate_owner_identity,
};
pub use quality::{validate_dataset, QualityIssue, QualityReport, Severity};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

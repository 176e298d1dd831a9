// Query surface over the registry SQLite file.
//
// The dataset is refreshed out-of-band; this crate only reads it. A load
// materializes every table into one immutable `Dataset` value, and all
// engines are pure functions over `&Dataset`. A reload therefore means
// building a fresh `Dataset` and swapping it in whole - readers never
// observe a half-updated state.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::collections::HashMap;

use crate::attributes::PermitAttributes;
use crate::normalize::normalize_permit_key;

// ============================================================================
// ROW TYPES
// ============================================================================

/// One currently active permit (`permit_current`).
#[derive(Debug, Clone)]
pub struct CurrentPermit {
    pub permit_key: String,
    pub owner_identity: String,
    pub owner_name: String,
    /// The "grunnrente" resource-rent tax liability flag.
    pub tax_liable: bool,
    pub snapshot_date: String,
    pub attributes: PermitAttributes,
}

/// One historical ownership period (`ownership_history`).
#[derive(Debug, Clone)]
pub struct OwnershipPeriod {
    /// Row id; doubles as the insertion-order tie-break.
    pub id: i64,
    pub permit_key: String,
    pub owner_identity: String,
    pub owner_name: String,
    pub valid_from: String,
    /// None or empty = the period is still open.
    pub valid_to: Option<String>,
    /// Fixed-term expiry date, when the permit was time-limited.
    pub fixed_term_expiry: Option<String>,
}

impl OwnershipPeriod {
    pub fn is_open(&self) -> bool {
        self.valid_to.as_deref().map_or(true, |v| v.trim().is_empty())
    }
}

/// One recorded transfer (`license_transfers`): the owner *after* the event.
#[derive(Debug, Clone)]
pub struct TransferEvent {
    /// Row id; the insertion-order tie-break for same-date transfers.
    pub seq: i64,
    pub permit_key: String,
    pub event_date: Option<String>,
    pub owner_identity: String,
    pub owner_name: String,
}

/// The original registrant of a permit (`license_original_owner`).
/// No concrete start date exists for this fact.
#[derive(Debug, Clone)]
pub struct OriginalOwner {
    pub permit_key: String,
    pub owner_identity: String,
    pub owner_name: String,
}

/// One permit-per-day time-series row (`permit_snapshot`).
#[derive(Debug, Clone)]
pub struct PermitSnapshot {
    pub snapshot_date: String,
    pub permit_key: String,
    pub tax_liable: bool,
    pub row_json: String,
    pub row_hash: Option<String>,
    pub attributes: PermitAttributes,
}

/// Traffic-light status of a production area at one snapshot date
/// (`production_area_status`).
#[derive(Debug, Clone)]
pub struct AreaStatus {
    pub snapshot_date: String,
    pub region_code: u8,
    pub status: Option<String>,
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Create the registry tables if they do not exist. The refresh pipeline
/// owns the real file; this exists for tests and fresh databases.
pub fn setup_database(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS permit_current (
            permit_key TEXT PRIMARY KEY,
            owner_orgnr TEXT,
            owner_name TEXT,
            owner_identity TEXT,
            snapshot_date TEXT NOT NULL,
            row_json TEXT NOT NULL,
            grunnrente_pliktig INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS ownership_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            permit_key TEXT NOT NULL,
            owner_orgnr TEXT,
            owner_name TEXT,
            owner_identity TEXT NOT NULL,
            valid_from TEXT NOT NULL,
            valid_to TEXT,
            tidsbegrenset TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS license_transfers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            permit_key TEXT NOT NULL,
            journal_date TEXT,
            current_owner_orgnr TEXT,
            current_owner_name TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS license_original_owner (
            permit_key TEXT PRIMARY KEY,
            original_owner_orgnr TEXT,
            original_owner_name TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS permit_snapshot (
            snapshot_date TEXT NOT NULL,
            permit_key TEXT NOT NULL,
            row_json TEXT NOT NULL,
            row_hash TEXT,
            grunnrente_pliktig INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (snapshot_date, permit_key)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS production_area_status (
            snapshot_date TEXT NOT NULL,
            prod_area_code INTEGER NOT NULL,
            prod_area_status TEXT,
            PRIMARY KEY (snapshot_date, prod_area_code)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS snapshots (
            snapshot_date TEXT PRIMARY KEY
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_ownerhist_key ON ownership_history(permit_key, valid_from)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_transfers_permit ON license_transfers(permit_key, journal_date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_snap_key ON permit_snapshot(permit_key, snapshot_date)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// DATASET
// ============================================================================

/// Immutable in-memory snapshot of the whole registry dataset, plus the
/// lookup indexes the engines need (point lookups by normalized permit key,
/// ordered history scans). Built in one pass by [`Dataset::load`].
#[derive(Debug, Default)]
pub struct Dataset {
    pub current: Vec<CurrentPermit>,
    pub history: Vec<OwnershipPeriod>,
    pub transfers: Vec<TransferEvent>,
    pub origins: Vec<OriginalOwner>,
    pub snapshots: Vec<PermitSnapshot>,
    pub area_status: Vec<AreaStatus>,
    /// All dataset snapshot dates, ascending.
    pub snapshot_dates: Vec<String>,

    current_by_key: HashMap<String, usize>,
    history_by_key: HashMap<String, Vec<usize>>,
    transfers_by_key: HashMap<String, Vec<usize>>,
    origin_by_key: HashMap<String, usize>,
}

impl Dataset {
    /// Load every table into memory. Permit keys are normalized here so no
    /// engine ever sees a raw key.
    pub fn load(conn: &Connection) -> Result<Dataset> {
        let mut ds = Dataset::default();

        let mut stmt = conn
            .prepare(
                "SELECT permit_key, owner_identity, owner_name, snapshot_date,
                        row_json, grunnrente_pliktig
                 FROM permit_current",
            )
            .context("permit_current query failed")?;
        let rows = stmt.query_map([], |row| {
            let row_json: String = row.get(4)?;
            Ok(CurrentPermit {
                permit_key: normalize_permit_key(&row.get::<_, String>(0)?),
                owner_identity: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                owner_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                snapshot_date: row.get(3)?,
                tax_liable: row.get::<_, i64>(5)? == 1,
                attributes: PermitAttributes::from_json(&row_json),
            })
        })?;
        for row in rows {
            let permit = row?;
            ds.current_by_key
                .insert(permit.permit_key.clone(), ds.current.len());
            ds.current.push(permit);
        }

        let mut stmt = conn
            .prepare(
                "SELECT id, permit_key, owner_identity, owner_name,
                        valid_from, valid_to, tidsbegrenset
                 FROM ownership_history
                 ORDER BY id",
            )
            .context("ownership_history query failed")?;
        let rows = stmt.query_map([], |row| {
            Ok(OwnershipPeriod {
                id: row.get(0)?,
                permit_key: normalize_permit_key(&row.get::<_, String>(1)?),
                owner_identity: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                owner_name: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                valid_from: row.get(4)?,
                valid_to: row.get(5)?,
                fixed_term_expiry: row.get(6)?,
            })
        })?;
        for row in rows {
            let period = row?;
            ds.history_by_key
                .entry(period.permit_key.clone())
                .or_default()
                .push(ds.history.len());
            ds.history.push(period);
        }

        let mut stmt = conn
            .prepare(
                "SELECT id, permit_key, journal_date, current_owner_orgnr, current_owner_name
                 FROM license_transfers
                 ORDER BY id",
            )
            .context("license_transfers query failed")?;
        let rows = stmt.query_map([], |row| {
            Ok(TransferEvent {
                seq: row.get(0)?,
                permit_key: normalize_permit_key(&row.get::<_, String>(1)?),
                event_date: row.get(2)?,
                owner_identity: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                owner_name: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
            })
        })?;
        for row in rows {
            let transfer = row?;
            ds.transfers_by_key
                .entry(transfer.permit_key.clone())
                .or_default()
                .push(ds.transfers.len());
            ds.transfers.push(transfer);
        }

        let mut stmt = conn
            .prepare(
                "SELECT permit_key, original_owner_orgnr, original_owner_name
                 FROM license_original_owner",
            )
            .context("license_original_owner query failed")?;
        let rows = stmt.query_map([], |row| {
            Ok(OriginalOwner {
                permit_key: normalize_permit_key(&row.get::<_, String>(0)?),
                owner_identity: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                owner_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            })
        })?;
        for row in rows {
            let origin = row?;
            ds.origin_by_key
                .insert(origin.permit_key.clone(), ds.origins.len());
            ds.origins.push(origin);
        }

        let mut stmt = conn
            .prepare(
                "SELECT snapshot_date, permit_key, row_json, row_hash, grunnrente_pliktig
                 FROM permit_snapshot
                 ORDER BY snapshot_date",
            )
            .context("permit_snapshot query failed")?;
        let rows = stmt.query_map([], |row| {
            let row_json: String = row.get(2)?;
            Ok(PermitSnapshot {
                snapshot_date: row.get(0)?,
                permit_key: normalize_permit_key(&row.get::<_, String>(1)?),
                attributes: PermitAttributes::from_json(&row_json),
                row_json,
                row_hash: row.get(3)?,
                tax_liable: row.get::<_, i64>(4)? == 1,
            })
        })?;
        for row in rows {
            ds.snapshots.push(row?);
        }

        let mut stmt = conn
            .prepare(
                "SELECT snapshot_date, prod_area_code, prod_area_status
                 FROM production_area_status
                 ORDER BY snapshot_date",
            )
            .context("production_area_status query failed")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;
        for row in rows {
            let (snapshot_date, code, status) = row?;
            // Out-of-range codes carry no region; skip them like the
            // aggregator does for unmappable permits.
            if (1..=13).contains(&code) {
                ds.area_status.push(AreaStatus {
                    snapshot_date,
                    region_code: code as u8,
                    status,
                });
            }
        }

        let mut stmt = conn
            .prepare("SELECT snapshot_date FROM snapshots ORDER BY date(snapshot_date)")
            .context("snapshots query failed")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for row in rows {
            ds.snapshot_dates.push(row?);
        }

        ds.sort_indexes();
        Ok(ds)
    }

    /// Build a dataset directly from rows. Test and tooling entry point;
    /// applies the same normalization and ordering as [`Dataset::load`].
    pub fn from_rows(
        current: Vec<CurrentPermit>,
        history: Vec<OwnershipPeriod>,
        transfers: Vec<TransferEvent>,
        origins: Vec<OriginalOwner>,
        snapshots: Vec<PermitSnapshot>,
        area_status: Vec<AreaStatus>,
        snapshot_dates: Vec<String>,
    ) -> Dataset {
        let mut ds = Dataset {
            current,
            history,
            transfers,
            origins,
            snapshots,
            area_status,
            snapshot_dates,
            ..Dataset::default()
        };
        for permit in &mut ds.current {
            permit.permit_key = normalize_permit_key(&permit.permit_key);
        }
        for (i, permit) in ds.current.iter().enumerate() {
            ds.current_by_key.insert(permit.permit_key.clone(), i);
        }
        for (i, period) in ds.history.iter_mut().enumerate() {
            period.permit_key = normalize_permit_key(&period.permit_key);
            ds.history_by_key
                .entry(period.permit_key.clone())
                .or_default()
                .push(i);
        }
        for (i, transfer) in ds.transfers.iter_mut().enumerate() {
            transfer.permit_key = normalize_permit_key(&transfer.permit_key);
            ds.transfers_by_key
                .entry(transfer.permit_key.clone())
                .or_default()
                .push(i);
        }
        for (i, origin) in ds.origins.iter_mut().enumerate() {
            origin.permit_key = normalize_permit_key(&origin.permit_key);
            ds.origin_by_key.insert(origin.permit_key.clone(), i);
        }
        for snapshot in &mut ds.snapshots {
            snapshot.permit_key = normalize_permit_key(&snapshot.permit_key);
        }
        ds.snapshot_dates.sort();
        ds.sort_indexes();
        ds
    }

    /// Order per-permit history by start date, then row id. ISO dates sort
    /// correctly as strings; malformed dates degrade to plain string order.
    fn sort_indexes(&mut self) {
        let history = &self.history;
        for indexes in self.history_by_key.values_mut() {
            indexes.sort_by(|&a, &b| {
                let pa = &history[a];
                let pb = &history[b];
                crate::normalize::iso10(&pa.valid_from)
                    .cmp(&crate::normalize::iso10(&pb.valid_from))
                    .then(pa.id.cmp(&pb.id))
            });
        }
    }

    // ------------------------------------------------------------------------
    // Point lookups (keys normalized on the way in)
    // ------------------------------------------------------------------------

    pub fn current_permit(&self, permit_key: &str) -> Option<&CurrentPermit> {
        let key = normalize_permit_key(permit_key);
        self.current_by_key.get(&key).map(|&i| &self.current[i])
    }

    /// Ownership periods for one permit, ordered by start date then row id.
    pub fn history_for(&self, permit_key: &str) -> Vec<&OwnershipPeriod> {
        let key = normalize_permit_key(permit_key);
        self.history_by_key
            .get(&key)
            .map(|indexes| indexes.iter().map(|&i| &self.history[i]).collect())
            .unwrap_or_default()
    }

    /// Transfer events for one permit, in insertion order. Callers that
    /// need chronological order sort with the interval-engine comparator.
    pub fn transfers_for(&self, permit_key: &str) -> Vec<&TransferEvent> {
        let key = normalize_permit_key(permit_key);
        self.transfers_by_key
            .get(&key)
            .map(|indexes| indexes.iter().map(|&i| &self.transfers[i]).collect())
            .unwrap_or_default()
    }

    pub fn origin_for(&self, permit_key: &str) -> Option<&OriginalOwner> {
        let key = normalize_permit_key(permit_key);
        self.origin_by_key.get(&key).map(|&i| &self.origins[i])
    }

    /// The two most recent snapshot dates as (older, newer), if the dataset
    /// has at least two.
    pub fn latest_two_snapshot_dates(&self) -> Option<(String, String)> {
        let n = self.snapshot_dates.len();
        if n < 2 {
            return None;
        }
        Some((
            self.snapshot_dates[n - 2].clone(),
            self.snapshot_dates[n - 1].clone(),
        ))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn seeded_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        conn.execute(
            "INSERT INTO permit_current
                (permit_key, owner_identity, owner_name, snapshot_date, row_json, grunnrente_pliktig)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                "H-F 0910",
                "914904185",
                "Firma AS",
                "2026-08-01",
                r#"{"TILL_KAP":"780","TILL_ENHET":"TN","PROD_OMR":"3 Karmøy til Sotra"}"#,
                1
            ],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO ownership_history
                (permit_key, owner_identity, owner_name, valid_from, valid_to, tidsbegrenset)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params!["H-F 0910", "914904185", "Firma AS", "2024-01-01", Option::<String>::None, Option::<String>::None],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO license_transfers
                (permit_key, journal_date, current_owner_orgnr, current_owner_name)
             VALUES (?1, ?2, ?3, ?4)",
            params!["H-F 0910", "2024-01-01", "914904185", "Firma AS"],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO license_original_owner
                (permit_key, original_owner_orgnr, original_owner_name)
             VALUES (?1, ?2, ?3)",
            params!["H-F 0910", "876543210", "Gammel Eier AS"],
        )
        .unwrap();

        conn.execute(
            "INSERT INTO snapshots (snapshot_date) VALUES ('2026-07-31'), ('2026-08-01')",
            [],
        )
        .unwrap();

        conn
    }

    #[test]
    fn test_load_normalizes_permit_keys() {
        let conn = seeded_connection();
        let ds = Dataset::load(&conn).unwrap();

        // Stored with a space; both lookup spellings hit the same row.
        let permit = ds.current_permit("h-f0910").unwrap();
        assert_eq!(permit.permit_key, "H-F0910");
        assert!(permit.tax_liable);
        assert_eq!(permit.attributes.region_code(), Some(3));

        assert_eq!(ds.history_for(" H-F 0910 ").len(), 1);
        assert_eq!(ds.transfers_for("H-F0910").len(), 1);
        assert_eq!(
            ds.origin_for("H-F0910").unwrap().owner_identity,
            "876543210"
        );
    }

    #[test]
    fn test_missing_permit_yields_empty_results() {
        let conn = seeded_connection();
        let ds = Dataset::load(&conn).unwrap();

        assert!(ds.current_permit("N-X-0001").is_none());
        assert!(ds.history_for("N-X-0001").is_empty());
        assert!(ds.transfers_for("N-X-0001").is_empty());
        assert!(ds.origin_for("N-X-0001").is_none());
    }

    #[test]
    fn test_latest_two_snapshot_dates() {
        let conn = seeded_connection();
        let ds = Dataset::load(&conn).unwrap();

        let (older, newer) = ds.latest_two_snapshot_dates().unwrap();
        assert_eq!(older, "2026-07-31");
        assert_eq!(newer, "2026-08-01");
    }

    #[test]
    fn test_history_ordering_by_date_then_id() {
        let conn = seeded_connection();
        conn.execute(
            "INSERT INTO ownership_history
                (permit_key, owner_identity, owner_name, valid_from, valid_to)
             VALUES
                ('N-T-0001', 'A', 'A AS', '2023-05-01', '2023-12-31'),
                ('N-T-0001', 'B', 'B AS', '2022-01-01', '2023-04-30')",
            [],
        )
        .unwrap();

        let ds = Dataset::load(&conn).unwrap();
        let periods = ds.history_for("N-T-0001");
        assert_eq!(periods.len(), 2);
        assert_eq!(periods[0].owner_identity, "B");
        assert_eq!(periods[1].owner_identity, "A");
    }
}

use anyhow::{bail, Context, Result};
use rusqlite::Connection;
use std::env;
use std::path::Path;

use aqua_registry::{
    classify_mixed_history, diff_latest, diff_year, owner_summary_now, reconstruct_intervals,
    validate_dataset, Dataset, RegistryIndexes, TransitionReport, VERSION,
};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let db_path = env::var("AQUA_REGISTRY_DB").unwrap_or_else(|_| "akvakultur.db".to_string());
    if !Path::new(&db_path).exists() {
        bail!("database not found at {db_path} (set AQUA_REGISTRY_DB to override)");
    }

    let conn = Connection::open(&db_path)
        .with_context(|| format!("could not open {db_path}"))?;
    let ds = Dataset::load(&conn)?;

    match args[1].as_str() {
        "permit" => {
            let key = args.get(2).map(String::as_str);
            match key {
                Some(key) => show_permit(&ds, key),
                None => bail!("usage: aqua-registry permit <permit-key>"),
            }
        }
        "owner" => {
            let orgnr = args.get(2).map(String::as_str);
            match orgnr {
                Some(orgnr) => show_owner(&ds, orgnr),
                None => bail!("usage: aqua-registry owner <orgnr>"),
            }
        }
        "areas" => show_areas(&ds),
        "changes" => {
            let report = match args.get(2).map(String::as_str) {
                Some("last") | None => diff_latest(&ds)?,
                Some(raw) => {
                    let year: i32 = raw
                        .parse()
                        .with_context(|| format!("invalid year {raw:?}"))?;
                    diff_year(&ds, year)
                }
            };
            show_changes(&report);
            Ok(())
        }
        "validate" => run_validate(&ds),
        "export" => {
            let path = args.get(2).map(String::as_str);
            match path {
                Some(path) => export_intervals(&ds, path),
                None => bail!("usage: aqua-registry export <csv-path>"),
            }
        }
        other => {
            eprintln!("unknown command: {other}");
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    eprintln!("aqua-registry {VERSION}");
    eprintln!();
    eprintln!("Usage: aqua-registry <command> [args]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  permit <key>       ownership timeline for one permit");
    eprintln!("  owner <orgnr>      holdings and liability years for one owner");
    eprintln!("  areas              per-production-area rollup");
    eprintln!("  changes [year|last] liability zero-crossings");
    eprintln!("  validate           dataset integrity report");
    eprintln!("  export <path>      all ownership intervals as CSV");
    eprintln!();
    eprintln!("Database path comes from AQUA_REGISTRY_DB (default akvakultur.db).");
}

fn show_permit(ds: &Dataset, key: &str) -> Result<()> {
    match ds.current_permit(key) {
        Some(permit) => {
            println!("{}  {} ({})", permit.permit_key, permit.owner_name, permit.owner_identity);
            println!(
                "  grunnrente: {}  snapshot: {}",
                if permit.tax_liable { "ja" } else { "nei" },
                permit.snapshot_date
            );
            if let Some(capacity) = permit.attributes.capacity() {
                println!("  kapasitet: {} {}", capacity.quantity, capacity.unit);
            }
            if let Some(region) = permit.attributes.region_code() {
                println!("  produksjonsområde: {region}");
            }
        }
        None => println!("{key}: not in the active register"),
    }

    let intervals = reconstruct_intervals(ds, key);
    if intervals.is_empty() {
        println!("  no ownership timeline on record");
    } else {
        println!("  eierskapshistorikk:");
        for interval in &intervals {
            println!(
                "    {} -> {}  {} ({})",
                interval.start.label(),
                interval.end.label(),
                interval.owner_name,
                interval.owner_identity
            );
        }
    }

    let history = ds.history_for(key);
    if !history.is_empty() {
        println!("  registrerte perioder:");
        let reasons = classify_mixed_history(&history);
        for (period, reason) in history.iter().zip(reasons) {
            println!(
                "    {} -> {}  {}  {}",
                period.valid_from,
                period.valid_to.as_deref().unwrap_or("Aktiv"),
                period.owner_name,
                reason.label()
            );
        }
    }

    Ok(())
}

fn show_owner(ds: &Dataset, orgnr: &str) -> Result<()> {
    let summary = owner_summary_now(ds, orgnr)?;

    println!("{} ({})", summary.owner_name, summary.owner_identity);
    println!(
        "  aktive tillatelser: {} ({} grunnrentepliktige)",
        summary.active_permits, summary.liable_active_permits
    );
    println!("  tidligere tillatelser: {}", summary.former_permits);
    println!(
        "  kapasitet: {:.1} TN ({:.1} TN grunnrentepliktig)",
        summary.capacity_tn_active, summary.capacity_tn_liable
    );

    if summary.liability_years.is_empty() {
        println!("  grunnrenteår: ingen");
    } else {
        let years: Vec<String> = summary.liability_years.iter().map(i32::to_string).collect();
        println!("  grunnrenteår: {}", years.join(", "));
    }

    Ok(())
}

fn show_areas(ds: &Dataset) -> Result<()> {
    let indexes = RegistryIndexes::build(ds);

    if indexes.by_region.is_empty() {
        println!("no permits with a production area on record");
        return Ok(());
    }

    println!("område  tillatelser  grunnrente  kapasitet (TN)  status");
    for rollup in indexes.by_region.values() {
        println!(
            "{:>6}  {:>11}  {:>10}  {:>14.1}  {}",
            rollup.region_code,
            rollup.permit_count(),
            rollup.liable_count,
            rollup.capacity_tn,
            rollup.latest_status.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}

fn show_changes(report: &TransitionReport) {
    if report.is_empty() {
        println!("no liability changes in the selected window");
        return;
    }

    if !report.started.is_empty() {
        println!("nye grunnrentepliktige eiere:");
        for t in &report.started {
            let permits: Vec<&str> = t.permit_keys.iter().map(String::as_str).collect();
            println!(
                "  {}  {} ({})  {}",
                t.date,
                t.owner_name,
                t.owner_identity,
                permits.join(", ")
            );
        }
    }

    if !report.stopped.is_empty() {
        println!("eiere ute av grunnrenteplikt:");
        for t in &report.stopped {
            let permits: Vec<&str> = t.permit_keys.iter().map(String::as_str).collect();
            println!(
                "  {}  {} ({})  {}",
                t.date,
                t.owner_name,
                t.owner_identity,
                permits.join(", ")
            );
        }
    }
}

fn run_validate(ds: &Dataset) -> Result<()> {
    let report = validate_dataset(ds);
    println!("{}", report.summary());

    for issue in &report.issues {
        let key = issue.permit_key.as_deref().unwrap_or("-");
        println!("  [{:?}] {} {}: {}", issue.severity, issue.check, key, issue.message);
    }

    if report.error_count() > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Write every permit's reconstructed ownership intervals to one CSV file.
fn export_intervals(ds: &Dataset, path: &str) -> Result<()> {
    let mut keys: Vec<&str> = ds
        .current
        .iter()
        .map(|p| p.permit_key.as_str())
        .chain(ds.transfers.iter().map(|t| t.permit_key.as_str()))
        .chain(ds.origins.iter().map(|o| o.permit_key.as_str()))
        .collect();
    keys.sort_unstable();
    keys.dedup();

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("could not create {path}"))?;
    writer.write_record(["permit_key", "owner_identity", "owner_name", "from", "to"])?;

    let mut rows = 0usize;
    for key in keys {
        for interval in reconstruct_intervals(ds, key) {
            writer.write_record([
                interval.permit_key.as_str(),
                interval.owner_identity.as_str(),
                interval.owner_name.as_str(),
                &interval.start.label(),
                &interval.end.label(),
            ])?;
            rows += 1;
        }
    }
    writer.flush()?;

    println!("wrote {rows} intervals to {path}");
    Ok(())
}

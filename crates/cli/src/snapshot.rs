//! `placelink diff` — change detection between two snapshots of one dataset.

use std::path::PathBuf;

use placelink_linkage::config::{default_key_attrs, ColumnMapping, SourceConfig};
use placelink_linkage::diff::{compare_snapshots, DiffPolicy};
use placelink_linkage::model::ChangeSet;
use placelink_linkage::{load_csv_records, Record};

use crate::exit_codes::{EXIT_DIFF_CHANGES, EXIT_DIFF_PARSE};
use crate::CliError;

fn diff_err(msg: impl Into<String>) -> CliError {
    CliError { code: EXIT_DIFF_PARSE, message: msg.into(), hint: None }
}

fn load_snapshot(label: &str, path: &PathBuf, id_column: &str) -> Result<Vec<Record>, CliError> {
    // Only the id is mapped; every other column stays under its own header
    // so key attributes can be named verbatim.
    let config = SourceConfig {
        file: path.display().to_string(),
        columns: ColumnMapping {
            id: id_column.to_string(),
            uprn: None,
            postcode: None,
            latitude: None,
            longitude: None,
            name: None,
        },
    };

    let data = std::fs::read_to_string(path)
        .map_err(|e| diff_err(format!("cannot read {}: {e}", path.display())))?;
    load_csv_records(label, &data, &config).map_err(|e| diff_err(e.to_string()))
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_diff(
    old: PathBuf,
    new: PathBuf,
    id_column: String,
    attrs: Vec<String>,
    sample_cap: usize,
    exhaustive: bool,
    json_output: bool,
    output_file: Option<PathBuf>,
    csv_dir: Option<PathBuf>,
    strict_exit: bool,
) -> Result<(), CliError> {
    let old_records = load_snapshot("old", &old, &id_column)?;
    let new_records = load_snapshot("new", &new, &id_column)?;

    let key_attrs = if attrs.is_empty() { default_key_attrs() } else { attrs };
    let policy = if exhaustive {
        DiffPolicy::Exhaustive
    } else {
        DiffPolicy::Sampled(sample_cap)
    };

    let changes = compare_snapshots(&old_records, &new_records, &key_attrs, policy);

    let json_str = serde_json::to_string_pretty(&changes)
        .map_err(|e| diff_err(format!("JSON serialization error: {e}")))?;

    if let Some(ref path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| diff_err(format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if let Some(ref dir) = csv_dir {
        write_change_csvs(dir, &changes)?;
        eprintln!("wrote {}/{{added,removed,modified}}.csv", dir.display());
    }

    if json_output {
        println!("{json_str}");
    }

    let s = &changes.summary;
    eprintln!(
        "snapshot diff: {} -> {} rows — {} added, {} removed, {} modified ({}/{} common ids checked)",
        s.old_total, s.new_total, s.added, s.removed, s.modified, s.diffed, s.common,
    );

    if strict_exit && (s.added > 0 || s.removed > 0 || s.modified > 0) {
        return Err(CliError {
            code: EXIT_DIFF_CHANGES,
            message: String::new(),
            hint: None,
        });
    }

    Ok(())
}

/// One CSV per change class. Added/removed carry the full rows; modified is
/// an id-to-details index (the full NEW rows are in the JSON output).
fn write_change_csvs(dir: &std::path::Path, changes: &ChangeSet) -> Result<(), CliError> {
    std::fs::create_dir_all(dir).map_err(|e| diff_err(e.to_string()))?;

    crate::run::write_records_csv(&dir.join("added.csv"), &changes.added)
        .map_err(|e| diff_err(e.to_string()))?;
    crate::run::write_records_csv(&dir.join("removed.csv"), &changes.removed)
        .map_err(|e| diff_err(e.to_string()))?;

    let mut writer =
        csv::Writer::from_path(dir.join("modified.csv")).map_err(|e| diff_err(e.to_string()))?;
    writer
        .write_record(["record_id", "change_details"])
        .map_err(|e| diff_err(e.to_string()))?;
    for m in &changes.modified {
        writer
            .write_record([m.record.record_id.as_str(), m.change_details.as_str()])
            .map_err(|e| diff_err(e.to_string()))?;
    }
    writer.flush().map_err(|e| diff_err(e.to_string()))?;
    Ok(())
}

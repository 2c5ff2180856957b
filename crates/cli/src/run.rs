//! `placelink run` / `placelink validate` — config-driven linkage pipelines.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use placelink_linkage::model::{SourceState, StepState, StepStats};
use placelink_linkage::{load_csv_records, Config, LinkError, Record, RecordSource, SourceError};

use crate::exit_codes::{EXIT_RUN_BASE_SOURCE, EXIT_RUN_INVALID_CONFIG, EXIT_RUN_RUNTIME};
use crate::CliError;

fn run_err(code: u8, msg: impl Into<String>) -> CliError {
    CliError { code, message: msg.into(), hint: None }
}

/// A configured source backed by a CSV file on disk. Reading happens inside
/// `fetch` so the engine's fan-out and failure isolation apply per file.
struct CsvFileSource {
    name: String,
    path: PathBuf,
    config: placelink_linkage::config::SourceConfig,
}

impl RecordSource for CsvFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self) -> Result<Vec<Record>, SourceError> {
        let data = std::fs::read_to_string(&self.path)
            .map_err(|e| SourceError::new(format!("cannot read {}: {e}", self.path.display())))?;
        load_csv_records(&self.name, &data, &self.config).map_err(|e| SourceError::new(e.to_string()))
    }
}

pub fn cmd_run(
    config_path: PathBuf,
    json_output: bool,
    output_file: Option<PathBuf>,
    records_file: Option<PathBuf>,
) -> Result<(), CliError> {
    let config_str = std::fs::read_to_string(&config_path)
        .map_err(|e| run_err(EXIT_RUN_RUNTIME, format!("cannot read config: {e}")))?;

    let config = Config::from_toml(&config_str)
        .map_err(|e| run_err(EXIT_RUN_INVALID_CONFIG, e.to_string()))?;

    // Resolve source files relative to the config file's directory.
    let base_dir = config_path
        .parent()
        .unwrap_or_else(|| Path::new("."));

    let file_sources: Vec<CsvFileSource> = config
        .sources
        .iter()
        .map(|(name, source_config)| CsvFileSource {
            name: name.clone(),
            path: base_dir.join(&source_config.file),
            config: source_config.clone(),
        })
        .collect();
    let sources: Vec<&dyn RecordSource> =
        file_sources.iter().map(|s| s as &dyn RecordSource).collect();

    let result = placelink_linkage::run(&config, &sources).map_err(|e| match e {
        LinkError::BaseSourceFailed { .. } => run_err(EXIT_RUN_BASE_SOURCE, e.to_string()),
        LinkError::ConfigParse(_) | LinkError::ConfigValidation(_) | LinkError::UnknownSource(_) => {
            run_err(EXIT_RUN_INVALID_CONFIG, e.to_string())
        }
        LinkError::NoUsableColumns { .. } => run_err(EXIT_RUN_INVALID_CONFIG, e.to_string()),
        _ => run_err(EXIT_RUN_RUNTIME, e.to_string()),
    })?;

    let json_str = serde_json::to_string_pretty(&result)
        .map_err(|e| run_err(EXIT_RUN_RUNTIME, format!("JSON serialization error: {e}")))?;

    if let Some(ref path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| run_err(EXIT_RUN_RUNTIME, format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if let Some(ref path) = records_file {
        write_records_csv(path, &result.records)
            .map_err(|e| run_err(EXIT_RUN_RUNTIME, format!("cannot write records: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if json_output {
        println!("{json_str}");
    }

    // Human summary to stderr
    for s in &result.sources {
        match s.state {
            SourceState::Ok => eprintln!("source {}: {} rows", s.name, s.rows),
            SourceState::Failed => eprintln!(
                "source {}: FAILED ({})",
                s.name,
                s.error.as_deref().unwrap_or("unknown")
            ),
        }
    }
    for step in &result.steps {
        match step.state {
            StepState::Skipped => eprintln!(
                "step vs {}: skipped ({})",
                step.right_source,
                step.skip_reason.as_deref().unwrap_or("unknown")
            ),
            StepState::Ran => {
                let matched = match step.stats {
                    Some(StepStats::Exact(ref s)) | Some(StepStats::Multi(ref s)) => s.matched,
                    Some(StepStats::Spatial(ref s)) => s.matched,
                    None => 0,
                };
                eprintln!("step vs {}: {} matched", step.right_source, matched);
            }
        }
    }
    eprintln!(
        "fusion: {}/{} records with a date estimate",
        result.fusion.with_estimate, result.fusion.total
    );

    Ok(())
}

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config_str = std::fs::read_to_string(&config_path)
        .map_err(|e| run_err(EXIT_RUN_RUNTIME, format!("cannot read config: {e}")))?;

    let config = Config::from_toml(&config_str)
        .map_err(|e| run_err(EXIT_RUN_INVALID_CONFIG, e.to_string()))?;

    eprintln!(
        "config OK: \"{}\" — {} sources, {} steps, fusion {}",
        config.pipeline.name,
        config.sources.len(),
        config.steps.len(),
        if config.fusion.is_some() { "on" } else { "off" },
    );
    Ok(())
}

/// Flatten enriched records to CSV: well-known columns first, then the
/// sorted union of every extension key seen across the batch.
pub fn write_records_csv(path: &Path, records: &[Record]) -> Result<(), csv::Error> {
    let extra_keys: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.extra.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_path(path)?;

    let mut header: Vec<&str> = vec![
        "record_id", "source", "uprn", "postcode", "latitude", "longitude", "name",
    ];
    header.extend(extra_keys.iter().copied());
    writer.write_record(&header)?;

    for r in records {
        let lat = r.latitude.map(|v| v.to_string()).unwrap_or_default();
        let lon = r.longitude.map(|v| v.to_string()).unwrap_or_default();
        let mut row: Vec<&str> = vec![
            &r.record_id,
            &r.source,
            r.uprn.as_deref().unwrap_or(""),
            r.postcode.as_deref().unwrap_or(""),
            &lat,
            &lon,
            r.name.as_deref().unwrap_or(""),
        ];
        for key in &extra_keys {
            row.push(r.extra.get(*key).map(String::as_str).unwrap_or(""));
        }
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

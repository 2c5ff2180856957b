use std::collections::HashMap;
use std::thread;

use chrono::Datelike;

use crate::config::{Config, DateParseKind, SourceConfig, Strategy};
use crate::error::{LinkError, SourceError};
use crate::fusion;
use crate::join::{join_exact, join_multi};
use crate::model::{
    FusionSummary, PipelineMeta, PipelineResult, Record, SourceState, SourceStatus, StepReport,
    StepState, StepStats, TemporalEstimate,
};
use crate::spatial::join_spatial;

/// A collaborator data source. The pipeline makes no assumption about fetch
/// latency, caching, or retry; it receives only the resolved collection.
pub trait RecordSource: Sync {
    fn name(&self) -> &str;
    fn fetch(&self) -> Result<Vec<Record>, SourceError>;
}

/// Run the full pipeline: fetch -> link -> fuse -> report.
///
/// Per-source fetch failures (including panics) are captured as statuses and
/// skip that source's join steps. Only a failed base source aborts the run.
pub fn run(config: &Config, sources: &[&dyn RecordSource]) -> Result<PipelineResult, LinkError> {
    let (fetched, statuses) = fetch_all(config, sources);

    let base_name = &config.pipeline.base;
    let mut records = match fetched.get(base_name) {
        Some(rows) => rows.clone(),
        None => {
            let reason = statuses
                .iter()
                .find(|s| &s.name == base_name)
                .and_then(|s| s.error.clone())
                .unwrap_or_else(|| "not fetched".into());
            return Err(LinkError::BaseSourceFailed {
                source: base_name.clone(),
                reason,
            });
        }
    };

    let mut steps = Vec::with_capacity(config.steps.len());
    for step in &config.steps {
        let Some(right) = fetched.get(&step.source) else {
            steps.push(StepReport {
                right_source: step.source.clone(),
                state: StepState::Skipped,
                skip_reason: Some(format!("source '{}' unavailable this run", step.source)),
                stats: None,
            });
            continue;
        };

        let stats = match step.strategy {
            Strategy::Exact => {
                // Validated at config load time.
                let spec = step.key.as_ref().ok_or_else(|| {
                    LinkError::ConfigValidation("exact step without a key".into())
                })?;
                let out = join_exact(&records, right, spec);
                merge_matches(
                    &mut records,
                    &step.source,
                    out.matches.iter().map(|m| {
                        (
                            m.left.record_id.as_str(),
                            &m.right,
                            [
                                ("confidence_score", m.confidence_score.to_string()),
                                ("confidence_level", m.confidence_level.clone()),
                            ],
                        )
                    }),
                );
                StepStats::Exact(out.stats)
            }
            Strategy::Multi => {
                let out = join_multi(&records, right, &step.columns, step.min_confidence)?;
                merge_matches(
                    &mut records,
                    &step.source,
                    out.matches.iter().map(|m| {
                        (
                            m.left.record_id.as_str(),
                            &m.right,
                            [
                                ("confidence_score", m.confidence_score.to_string()),
                                ("confidence_level", m.confidence_level.clone()),
                            ],
                        )
                    }),
                );
                StepStats::Multi(out.stats)
            }
            Strategy::Spatial => {
                let out = join_spatial(&records, right, step.max_distance_meters);
                merge_matches(
                    &mut records,
                    &step.source,
                    out.matches.iter().map(|m| {
                        (
                            m.left.record_id.as_str(),
                            &m.right,
                            [(
                                "distance_meters",
                                format!("{:.2}", m.distance_meters),
                            )],
                        )
                    }),
                );
                StepStats::Spatial(out.stats)
            }
        };

        steps.push(StepReport {
            right_source: step.source.clone(),
            state: StepState::Ran,
            skip_reason: None,
            stats: Some(stats),
        });
    }

    let fusion_summary = match config.fusion {
        Some(ref fusion_config) => fuse_records(&mut records, fusion_config),
        None => FusionSummary {
            total: records.len(),
            ..Default::default()
        },
    };

    Ok(PipelineResult {
        meta: PipelineMeta {
            config_name: config.pipeline.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
        },
        sources: statuses,
        steps,
        fusion: fusion_summary,
        records,
    })
}

/// Fetch every configured source through its handle, fanning out across a
/// bounded pool of scoped threads. A panicking fetch is captured like a
/// fetch error.
fn fetch_all(
    config: &Config,
    sources: &[&dyn RecordSource],
) -> (HashMap<String, Vec<Record>>, Vec<SourceStatus>) {
    let mut wanted: Vec<&str> = config.sources.keys().map(String::as_str).collect();
    wanted.sort_unstable();

    let mut fetched = HashMap::new();
    let mut statuses = Vec::with_capacity(wanted.len());

    for chunk in wanted.chunks(config.pipeline.fetch_workers.max(1)) {
        let mut results: Vec<(&str, Result<Vec<Record>, SourceError>)> =
            Vec::with_capacity(chunk.len());

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(chunk.len());
            for &name in chunk {
                let handle = sources.iter().find(|s| s.name() == name);
                handles.push((name, handle.map(|&s| scope.spawn(move || s.fetch()))));
            }
            for (name, handle) in handles {
                let result = match handle {
                    None => Err(SourceError::new("no source handle provided")),
                    Some(h) => match h.join() {
                        Ok(r) => r,
                        Err(_) => Err(SourceError::new("source fetch thread panicked")),
                    },
                };
                results.push((name, result));
            }
        });

        for (name, result) in results {
            match result {
                Ok(mut rows) => {
                    for r in &mut rows {
                        r.source = name.to_string();
                    }
                    statuses.push(SourceStatus {
                        name: name.to_string(),
                        state: SourceState::Ok,
                        rows: rows.len(),
                        error: None,
                    });
                    fetched.insert(name.to_string(), rows);
                }
                Err(e) => {
                    statuses.push(SourceStatus {
                        name: name.to_string(),
                        state: SourceState::Failed,
                        rows: 0,
                        error: Some(e.to_string()),
                    });
                }
            }
        }
    }

    (fetched, statuses)
}

/// Merge matched right rows into the enriched records: right fields land in
/// the extension map prefixed with the source name, annotation columns under
/// their canonical names. One-to-many joins keep the first pair per left
/// row. Annotation keys already taken by an earlier step get the source
/// prefix instead of clobbering.
fn merge_matches<'a, const N: usize>(
    records: &mut [Record],
    source: &str,
    matches: impl Iterator<Item = (&'a str, &'a Record, [(&'static str, String); N])>,
) {
    // Owned keys so the index survives the mutation below. First occurrence
    // wins on duplicate ids.
    let mut index: HashMap<String, usize> = HashMap::new();
    for (i, r) in records.iter().enumerate() {
        index.entry(r.record_id.clone()).or_insert(i);
    }

    let mut merged_this_step = vec![false; records.len()];

    for (left_id, right, annotations) in matches {
        let Some(&li) = index.get(left_id) else { continue };
        if merged_this_step[li] {
            continue;
        }
        merged_this_step[li] = true;

        let rec = &mut records[li];
        rec.extra
            .insert(format!("{source}_record_id"), right.record_id.clone());
        if let Some(ref v) = right.uprn {
            rec.extra.insert(format!("{source}_uprn"), v.clone());
        }
        if let Some(ref v) = right.postcode {
            rec.extra.insert(format!("{source}_postcode"), v.clone());
        }
        if let Some(ref v) = right.name {
            rec.extra.insert(format!("{source}_name"), v.clone());
        }
        if let Some(v) = right.latitude {
            rec.extra.insert(format!("{source}_latitude"), v.to_string());
        }
        if let Some(v) = right.longitude {
            rec.extra
                .insert(format!("{source}_longitude"), v.to_string());
        }
        for (k, v) in &right.extra {
            rec.extra.insert(format!("{source}_{k}"), v.clone());
        }

        for (key, value) in annotations {
            if rec.extra.contains_key(key) {
                rec.extra.insert(format!("{source}_{key}"), value);
            } else {
                rec.extra.insert(key.to_string(), value);
            }
        }
    }
}

/// Extract per-source temporal estimates from each enriched record, fuse
/// them, and fill the opening-date columns from the priority winner.
fn fuse_records(records: &mut [Record], config: &crate::config::FusionConfig) -> FusionSummary {
    let current_year = chrono::Utc::now().year();

    let mut summary = FusionSummary {
        total: records.len(),
        ..Default::default()
    };

    for rec in records.iter_mut() {
        // (estimate, raw field value) per configured source.
        let mut estimates: Vec<(TemporalEstimate, String)> = Vec::new();
        for src in &config.sources {
            let Some(raw) = rec.field(&src.field) else {
                continue;
            };
            let Some((year_min, year_max)) = parse_evidence(raw, src.parse, current_year) else {
                continue;
            };
            estimates.push((
                TemporalEstimate {
                    source: src.name.clone(),
                    year_min,
                    year_max,
                    confidence: src.declared_confidence(),
                },
                raw.to_string(),
            ));
        }

        let bare: Vec<TemporalEstimate> = estimates.iter().map(|(e, _)| e.clone()).collect();
        let fused = fusion::fuse(&bare, config.tier_policy);
        let winner = fusion::pick_by_priority(&bare, &config.priority);

        if let Some(ref fused) = fused {
            summary.with_estimate += 1;
            rec.extra
                .insert("opening_date_year".into(), fused.estimated_year.to_string());
        }

        match winner {
            Some(winner) => {
                let raw = estimates
                    .iter()
                    .find(|(e, _)| e.source == winner.source)
                    .map(|(_, raw)| raw.clone())
                    .unwrap_or_default();
                rec.extra.insert("estimated_opening_date".into(), raw);
                rec.extra
                    .insert("opening_date_source".into(), winner.source.clone());
                rec.extra.insert(
                    "opening_date_confidence".into(),
                    winner.confidence.to_string(),
                );
                *summary
                    .sources_used
                    .entry(winner.source.clone())
                    .or_default() += 1;
                *summary
                    .confidence_distribution
                    .entry(winner.confidence.to_string())
                    .or_default() += 1;
            }
            None => {
                *summary.sources_used.entry("none".into()).or_default() += 1;
            }
        }
    }

    summary
}

fn parse_evidence(raw: &str, kind: DateParseKind, current_year: i32) -> Option<(i32, i32)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match kind {
        DateParseKind::Year => {
            // Tolerate float-ish year values like "1994.0".
            let year = raw.parse::<f64>().ok()?;
            if year < 1.0 {
                return None;
            }
            let year = year as i32;
            Some((year, year))
        }
        DateParseKind::Date => {
            let date = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
            Some((date.year(), date.year()))
        }
        DateParseKind::AgeBand => fusion::parse_age_band(raw, current_year),
    }
}

/// Load one source's CSV into records, applying its column mapping. Mapped
/// columns become well-known fields; every other column lands in `extra`
/// under its original header.
pub fn load_csv_records(
    source_name: &str,
    csv_data: &str,
    source_config: &SourceConfig,
) -> Result<Vec<Record>, LinkError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_data.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| LinkError::Io(e.to_string()))?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let col = &source_config.columns;

    let idx = |name: &str| -> Result<usize, LinkError> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| LinkError::MissingColumn {
                source: source_name.into(),
                column: name.into(),
            })
    };
    let opt_idx = |name: &Option<String>| -> Result<Option<usize>, LinkError> {
        name.as_deref().map(idx).transpose()
    };

    let id_idx = idx(&col.id)?;
    let uprn_idx = opt_idx(&col.uprn)?;
    let postcode_idx = opt_idx(&col.postcode)?;
    let lat_idx = opt_idx(&col.latitude)?;
    let lon_idx = opt_idx(&col.longitude)?;
    let name_idx = opt_idx(&col.name)?;

    let mapped: Vec<usize> = [Some(id_idx), uprn_idx, postcode_idx, lat_idx, lon_idx, name_idx]
        .into_iter()
        .flatten()
        .collect();

    let get = |record: &csv::StringRecord, i: usize| -> Option<String> {
        record.get(i).filter(|v| !v.is_empty()).map(String::from)
    };

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| LinkError::Io(e.to_string()))?;

        let mut extra = HashMap::new();
        for (i, header) in headers.iter().enumerate() {
            if mapped.contains(&i) {
                continue;
            }
            if let Some(val) = record.get(i) {
                if !val.is_empty() {
                    extra.insert(header.clone(), val.to_string());
                }
            }
        }

        rows.push(Record {
            record_id: record.get(id_idx).unwrap_or("").to_string(),
            source: source_name.to_string(),
            uprn: uprn_idx.and_then(|i| get(&record, i)),
            postcode: postcode_idx.and_then(|i| get(&record, i)),
            latitude: lat_idx
                .and_then(|i| get(&record, i))
                .and_then(|v| v.parse().ok()),
            longitude: lon_idx
                .and_then(|i| get(&record, i))
                .and_then(|v| v.parse().ok()),
            name: name_idx.and_then(|i| get(&record, i)),
            extra,
        });
    }

    Ok(rows)
}

use std::sync::OnceLock;

use regex::Regex;

use crate::config::TierPolicy;
use crate::model::{ConfidenceTier, FusedEstimate, FusionMethod, TemporalEstimate};

/// Fold one entity's estimates into a single fused estimate. No estimates,
/// no output. The math treats every surviving estimate uniformly; source
/// priority only governs selection upstream.
pub fn fuse(estimates: &[TemporalEstimate], policy: TierPolicy) -> Option<FusedEstimate> {
    if estimates.is_empty() {
        return None;
    }

    let confidence = tier(estimates, policy);

    // Intersection of all ranges.
    let min_year = estimates.iter().map(|e| e.year_min).max()?;
    let max_year = estimates.iter().map(|e| e.year_max).min()?;

    if min_year <= max_year {
        return Some(FusedEstimate {
            estimated_year: midpoint(min_year, max_year),
            range_min: min_year,
            range_max: max_year,
            method: FusionMethod::Intersection,
            confidence,
        });
    }

    // Disjoint ranges: average the per-source midpoints, widen to the full
    // envelope.
    let mean: f64 = estimates
        .iter()
        .map(|e| (e.year_min + e.year_max) as f64 / 2.0)
        .sum::<f64>()
        / estimates.len() as f64;

    Some(FusedEstimate {
        estimated_year: mean.round() as i32,
        range_min: estimates.iter().map(|e| e.year_min).min()?,
        range_max: estimates.iter().map(|e| e.year_max).max()?,
        method: FusionMethod::Average,
        confidence,
    })
}

fn midpoint(min: i32, max: i32) -> i32 {
    ((min + max) as f64 / 2.0).round() as i32
}

fn tier(estimates: &[TemporalEstimate], policy: TierPolicy) -> ConfidenceTier {
    match policy {
        TierPolicy::Count => match estimates.len() {
            n if n >= 3 => ConfidenceTier::High,
            2 => ConfidenceTier::Medium,
            _ => ConfidenceTier::Low,
        },
        TierPolicy::Weighted => {
            let total: u32 = estimates
                .iter()
                .map(|e| match e.confidence {
                    ConfidenceTier::High => 3,
                    ConfidenceTier::Medium => 2,
                    ConfidenceTier::Low => 1,
                })
                .sum();
            match total {
                t if t >= 6 => ConfidenceTier::High,
                t if t >= 3 => ConfidenceTier::Medium,
                _ => ConfidenceTier::Low,
            }
        }
    }
}

/// First source in priority order with a usable estimate wins; later sources
/// never overwrite. Sources absent from the priority list are never picked.
pub fn pick_by_priority<'a>(
    estimates: &'a [TemporalEstimate],
    priority: &[String],
) -> Option<&'a TemporalEstimate> {
    priority
        .iter()
        .find_map(|src| estimates.iter().find(|e| &e.source == src))
}

// England-and-Wales EPC construction age bands. Matching is
// case-insensitive substring containment of the full banner.
const AGE_BANDS: &[(&str, i32, i32)] = &[
    ("england and wales: before 1900", 1800, 1899),
    ("england and wales: 1900-1929", 1900, 1929),
    ("england and wales: 1930-1949", 1930, 1949),
    ("england and wales: 1950-1966", 1950, 1966),
    ("england and wales: 1967-1975", 1967, 1975),
    ("england and wales: 1976-1982", 1976, 1982),
    ("england and wales: 1983-1990", 1983, 1990),
    ("england and wales: 1991-1995", 1991, 1995),
    ("england and wales: 1996-2002", 1996, 2002),
    ("england and wales: 2003-2006", 2003, 2006),
    ("england and wales: 2007-2011", 2007, 2011),
];

fn range_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})\s*[-–]\s*(\d{4})").unwrap())
}

fn before_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)before\s*(\d{4})").unwrap())
}

fn onwards_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\d{4})\s*onwards").unwrap())
}

/// Parse an EPC construction age band string to a year range. Unknown bands
/// fall back to extracting years directly; anything else is None.
pub fn parse_age_band(band: &str, current_year: i32) -> Option<(i32, i32)> {
    let lower = band.to_lowercase();
    if lower.is_empty() {
        return None;
    }

    for &(banner, min, max) in AGE_BANDS {
        if lower.contains(banner) {
            return Some((min, max));
        }
    }
    if lower.contains("england and wales: 2012 onwards") {
        return Some((2012, current_year));
    }

    if let Some(caps) = range_re().captures(band) {
        let min: i32 = caps[1].parse().ok()?;
        let max: i32 = caps[2].parse().ok()?;
        return Some((min, max));
    }
    if let Some(caps) = before_re().captures(band) {
        let year: i32 = caps[1].parse().ok()?;
        return Some((1800, year - 1));
    }
    if let Some(caps) = onwards_re().captures(band) {
        let year: i32 = caps[1].parse().ok()?;
        return Some((year, current_year));
    }

    None
}

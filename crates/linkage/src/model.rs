use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// A single row from any source dataset. Well-known fields the join and
/// fusion logic reads are typed; everything else lands in `extra` under its
/// original header name.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Record {
    pub record_id: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uprn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, String>,
}

impl Record {
    /// Look up a field by logical name: well-known fields first, then the
    /// extension map. Coordinates are numeric and have their own accessors.
    pub fn field(&self, name: &str) -> Option<&str> {
        match name {
            "record_id" => Some(&self.record_id),
            "source" => Some(&self.source),
            "uprn" => self.uprn.as_deref(),
            "postcode" => self.postcode.as_deref(),
            "name" => self.name.as_deref(),
            _ => self.extra.get(name).map(String::as_str),
        }
    }

    /// Latitude/longitude pair, when both are present.
    pub fn coords(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Join outputs
// ---------------------------------------------------------------------------

/// One matched (left, right) pair with its confidence annotation.
/// Immutable once produced.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub left: Record,
    pub right: Record,
    /// Count of join columns whose normalized keys agreed (base column
    /// included).
    pub confidence_score: u32,
    /// "k/n" where n = usable configured columns.
    pub confidence_level: String,
}

/// Spatial variant of a matched pair: distance instead of a discrete score.
#[derive(Debug, Clone, Serialize)]
pub struct SpatialMatch {
    pub left: Record,
    pub right: Record,
    pub distance_meters: f64,
}

/// Coverage and multiplicity statistics for an equality join. These are the
/// observable side channel for data-quality gaps: a null key never raises,
/// it just shows up as reduced coverage here.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JoinStats {
    pub left_total: usize,
    pub right_total: usize,
    /// Rows with a non-null normalized base key, per side.
    pub left_keyed: usize,
    pub right_keyed: usize,
    pub left_unique_keys: usize,
    pub right_unique_keys: usize,
    pub matched: usize,
    /// Base keys with more than one joined pair (one-to-many multiplicity).
    pub one_to_many_keys: usize,
    pub max_pairs_per_key: usize,
    /// Configured columns skipped because they exist on neither/only one side.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_columns: Vec<String>,
    pub usable_columns: usize,
    /// confidence_score -> pair count, after the min_confidence filter.
    pub score_distribution: BTreeMap<u32, usize>,
}

#[derive(Debug, Clone)]
pub struct MatchOutput {
    pub matches: Vec<MatchCandidate>,
    pub stats: JoinStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SpatialJoinStats {
    pub left_total: usize,
    pub right_total: usize,
    pub left_with_coords: usize,
    pub right_with_coords: usize,
    pub matched: usize,
    pub mean_distance_meters: f64,
    pub median_distance_meters: f64,
    pub max_distance_meters: f64,
}

#[derive(Debug, Clone)]
pub struct SpatialOutput {
    pub matches: Vec<SpatialMatch>,
    pub stats: SpatialJoinStats,
}

// ---------------------------------------------------------------------------
// Temporal fusion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// One source's opinion about an entity's date. A point date has
/// `year_min == year_max`.
#[derive(Debug, Clone, Serialize)]
pub struct TemporalEstimate {
    pub source: String,
    pub year_min: i32,
    pub year_max: i32,
    pub confidence: ConfidenceTier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMethod {
    /// All source ranges overlap; the estimate is the intersection midpoint.
    Intersection,
    /// Ranges are disjoint; the estimate averages per-source midpoints.
    Average,
}

impl std::fmt::Display for FusionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Intersection => write!(f, "intersection"),
            Self::Average => write!(f, "average"),
        }
    }
}

/// The fused result for one entity. Recomputed from scratch whenever the
/// estimate list changes; never partially updated.
#[derive(Debug, Clone, Serialize)]
pub struct FusedEstimate {
    pub estimated_year: i32,
    pub range_min: i32,
    pub range_max: i32,
    pub method: FusionMethod,
    pub confidence: ConfidenceTier,
}

// ---------------------------------------------------------------------------
// Change detection
// ---------------------------------------------------------------------------

/// A common record whose key attributes differ between snapshots. Carries
/// the NEW row plus a human-readable list of what changed.
#[derive(Debug, Clone, Serialize)]
pub struct ModifiedRecord {
    #[serde(flatten)]
    pub record: Record,
    /// "attr: 'old' -> 'new'" pairs joined by "; ".
    pub change_details: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeSummary {
    pub old_total: usize,
    pub new_total: usize,
    pub added: usize,
    pub removed: usize,
    pub common: usize,
    /// How many common ids were actually diffed. When this is less than
    /// `common`, absence from `modified` is not proof of no change.
    pub diffed: usize,
    pub modified: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangeSet {
    pub summary: ChangeSummary,
    pub added: Vec<Record>,
    pub removed: Vec<Record>,
    pub modified: Vec<ModifiedRecord>,
}

// ---------------------------------------------------------------------------
// Pipeline output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    Ok,
    Failed,
}

/// Per-source fetch outcome for one run. A failed non-base source is
/// recorded here and its join steps are skipped; it never aborts the run.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub name: String,
    pub state: SourceState,
    pub rows: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Ran,
    Skipped,
}

/// Per-step join statistics, tagged by strategy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "strategy")]
pub enum StepStats {
    Exact(JoinStats),
    Multi(JoinStats),
    Spatial(SpatialJoinStats),
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub right_source: String,
    pub state: StepState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<StepStats>,
}

/// Breakdown of which sources filled the opening-date columns and with what
/// declared confidence.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FusionSummary {
    pub total: usize,
    pub with_estimate: usize,
    pub sources_used: BTreeMap<String, usize>,
    pub confidence_distribution: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineMeta {
    pub config_name: String,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub meta: PipelineMeta,
    pub sources: Vec<SourceStatus>,
    pub steps: Vec<StepReport>,
    pub fusion: FusionSummary,
    pub records: Vec<Record>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_resolves_well_known_before_extra() {
        let mut rec = Record {
            record_id: "r1".into(),
            source: "epc".into(),
            postcode: Some("E1 6AN".into()),
            ..Default::default()
        };
        rec.extra.insert("postcode".into(), "SHADOWED".into());
        rec.extra.insert("ADDRESS".into(), "1 Main St".into());

        assert_eq!(rec.field("postcode"), Some("E1 6AN"));
        assert_eq!(rec.field("ADDRESS"), Some("1 Main St"));
        assert_eq!(rec.field("missing"), None);
    }

    #[test]
    fn coords_require_both_halves() {
        let rec = Record {
            latitude: Some(51.5),
            ..Default::default()
        };
        assert_eq!(rec.coords(), None);

        let rec = Record {
            latitude: Some(51.5),
            longitude: Some(-0.1),
            ..Default::default()
        };
        assert_eq!(rec.coords(), Some((51.5, -0.1)));
    }
}

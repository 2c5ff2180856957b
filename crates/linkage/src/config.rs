use std::collections::HashMap;

use serde::Deserialize;

use crate::error::LinkError;
use crate::model::ConfidenceTier;
use crate::normalize::KeyKind;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    pub pipeline: PipelineSection,
    pub sources: HashMap<String, SourceConfig>,
    #[serde(default)]
    pub steps: Vec<StepConfig>,
    #[serde(default)]
    pub fusion: Option<FusionConfig>,
    #[serde(default)]
    pub diff: DiffConfig,
}

#[derive(Debug, Deserialize)]
pub struct PipelineSection {
    pub name: String,
    /// The source every join step's left side starts from. A failed fetch of
    /// this source is the one irrecoverable pipeline error.
    pub base: String,
    #[serde(default = "default_fetch_workers")]
    pub fetch_workers: usize,
}

fn default_fetch_workers() -> usize {
    5
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub file: String,
    pub columns: ColumnMapping,
}

/// Maps a source's CSV headers onto the well-known record fields. Only `id`
/// is required; a source with no UPRN column simply cannot match in a UPRN
/// join.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnMapping {
    pub id: String,
    #[serde(default)]
    pub uprn: Option<String>,
    #[serde(default)]
    pub postcode: Option<String>,
    #[serde(default)]
    pub latitude: Option<String>,
    #[serde(default)]
    pub longitude: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

// ---------------------------------------------------------------------------
// Join steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct StepConfig {
    /// Right-side source name. The left side is always the (progressively
    /// enriched) base collection.
    pub source: String,
    pub strategy: Strategy,
    /// Join column for `exact`.
    #[serde(default)]
    pub key: Option<ColumnSpec>,
    /// Ordered join columns for `multi`; the first usable one is the
    /// mandatory base join, the rest only score.
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: u32,
    #[serde(default = "default_max_distance")]
    pub max_distance_meters: f64,
}

fn default_min_confidence() -> u32 {
    1
}

fn default_max_distance() -> f64 {
    15.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Exact,
    Multi,
    Spatial,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Multi => write!(f, "multi"),
            Self::Spatial => write!(f, "spatial"),
        }
    }
}

/// One configured join column: logical name plus the per-side field names.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub left: String,
    pub right: String,
    /// Explicit normalizer kind. When omitted, inferred from `name` by the
    /// inherited naming convention (substring "uprn"/"postcode", else text).
    #[serde(default)]
    pub kind: Option<KeyKind>,
}

impl ColumnSpec {
    pub fn key_kind(&self) -> KeyKind {
        self.kind.unwrap_or_else(|| KeyKind::infer(&self.name))
    }
}

// ---------------------------------------------------------------------------
// Fusion
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct FusionConfig {
    /// First source in this order with a usable estimate fills the
    /// opening-date columns; later sources never overwrite.
    #[serde(default = "default_priority")]
    pub priority: Vec<String>,
    #[serde(default)]
    pub tier_policy: TierPolicy,
    #[serde(default)]
    pub sources: Vec<FusionSourceConfig>,
}

pub fn default_priority() -> Vec<String> {
    [
        "wikidata",
        "companies_house",
        "planning",
        "land_registry",
        "building_age",
        "epc",
        "heritage",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierPolicy {
    /// Tier from raw source count (>=3 high, 2 medium, 1 low). Inherited
    /// behavior and the default.
    #[default]
    Count,
    /// Tier from summed per-source confidence weights (high=3, medium=2,
    /// low=1; total >=6 high, >=3 medium, else low). Documented deviation.
    Weighted,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FusionSourceConfig {
    pub name: String,
    /// Field on the enriched record holding this source's date evidence.
    pub field: String,
    pub parse: DateParseKind,
    /// Declared confidence; defaults per source name when omitted.
    #[serde(default)]
    pub confidence: Option<ConfidenceTier>,
}

impl FusionSourceConfig {
    pub fn declared_confidence(&self) -> ConfidenceTier {
        self.confidence
            .unwrap_or_else(|| default_confidence_for(&self.name))
    }
}

/// Inherited per-source confidence defaults: registries with exact dates are
/// high, inference from transactions or construction bands is medium.
pub fn default_confidence_for(source: &str) -> ConfidenceTier {
    match source {
        "wikidata" | "companies_house" | "planning" => ConfidenceTier::High,
        _ => ConfidenceTier::Medium,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateParseKind {
    /// A bare year, e.g. "1994" (float-ish values tolerated).
    Year,
    /// A full date, `%Y-%m-%d`.
    Date,
    /// An EPC construction age band string.
    AgeBand,
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DiffConfig {
    #[serde(default = "default_key_attrs")]
    pub key_attrs: Vec<String>,
    #[serde(default = "default_sample_cap")]
    pub sample_cap: usize,
    /// Diff every common id instead of sampling.
    #[serde(default)]
    pub exhaustive: bool,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            key_attrs: default_key_attrs(),
            sample_cap: default_sample_cap(),
            exhaustive: false,
        }
    }
}

pub fn default_key_attrs() -> Vec<String> {
    [
        "name",
        "amenity",
        "tourism",
        "leisure",
        "shop",
        "cuisine",
        "opening_hours",
        "phone",
        "website",
        "addr:street",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_sample_cap() -> usize {
    1000
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl Config {
    pub fn from_toml(input: &str) -> Result<Self, LinkError> {
        let config: Config =
            toml::from_str(input).map_err(|e| LinkError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        if self.pipeline.fetch_workers == 0 {
            return Err(LinkError::ConfigValidation(
                "fetch_workers must be at least 1".into(),
            ));
        }

        if !self.sources.contains_key(&self.pipeline.base) {
            return Err(LinkError::UnknownSource(format!(
                "base source '{}' not found",
                self.pipeline.base
            )));
        }

        for (i, step) in self.steps.iter().enumerate() {
            if !self.sources.contains_key(&step.source) {
                return Err(LinkError::UnknownSource(format!(
                    "step {}: right source '{}' not found",
                    i + 1,
                    step.source
                )));
            }
            if step.source == self.pipeline.base {
                return Err(LinkError::ConfigValidation(format!(
                    "step {}: cannot join the base source '{}' to itself",
                    i + 1,
                    step.source
                )));
            }
            match step.strategy {
                Strategy::Exact => {
                    if step.key.is_none() {
                        return Err(LinkError::ConfigValidation(format!(
                            "step {}: exact strategy requires a [steps.key]",
                            i + 1
                        )));
                    }
                }
                Strategy::Multi => {
                    if step.columns.is_empty() {
                        return Err(LinkError::ConfigValidation(format!(
                            "step {}: multi strategy requires [[steps.columns]]",
                            i + 1
                        )));
                    }
                    if step.min_confidence < 1 {
                        return Err(LinkError::ConfigValidation(format!(
                            "step {}: min_confidence must be at least 1",
                            i + 1
                        )));
                    }
                }
                Strategy::Spatial => {
                    if step.max_distance_meters <= 0.0 {
                        return Err(LinkError::ConfigValidation(format!(
                            "step {}: max_distance_meters must be positive",
                            i + 1
                        )));
                    }
                }
            }
        }

        if let Some(ref fusion) = self.fusion {
            if fusion.priority.is_empty() {
                return Err(LinkError::ConfigValidation(
                    "fusion priority list must not be empty".into(),
                ));
            }
            for src in &fusion.sources {
                if src.name.is_empty() || src.field.is_empty() {
                    return Err(LinkError::ConfigValidation(
                        "fusion sources need both a name and a field".into(),
                    ));
                }
            }
        }

        if !self.diff.exhaustive && self.diff.sample_cap == 0 {
            return Err(LinkError::ConfigValidation(
                "diff sample_cap must be at least 1 (or set exhaustive = true)".into(),
            ));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[pipeline]
name = "EPC + POIs"
base = "epc"

[sources.epc]
file = "epc.csv"
[sources.epc.columns]
id = "LMK_KEY"
uprn = "UPRN"
postcode = "POSTCODE"

[sources.pois]
file = "pois.csv"
[sources.pois.columns]
id = "osmid"
postcode = "addr:postcode"
latitude = "latitude"
longitude = "longitude"
name = "name"

[[steps]]
source = "pois"
strategy = "multi"
min_confidence = 1

[[steps.columns]]
name = "postcode"
left = "postcode"
right = "postcode"

[[steps.columns]]
name = "address"
left = "ADDRESS"
right = "addr:street"

[fusion]
[[fusion.sources]]
name = "epc"
field = "construction_age_band"
parse = "age_band"
"#;

    #[test]
    fn parse_valid() {
        let config = Config::from_toml(VALID).unwrap();
        assert_eq!(config.pipeline.name, "EPC + POIs");
        assert_eq!(config.pipeline.base, "epc");
        assert_eq!(config.pipeline.fetch_workers, 5);
        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.steps.len(), 1);
        assert_eq!(config.steps[0].min_confidence, 1);
        assert!((config.steps[0].max_distance_meters - 15.0).abs() < f64::EPSILON);

        let fusion = config.fusion.as_ref().unwrap();
        assert_eq!(fusion.priority, default_priority());
        assert_eq!(fusion.tier_policy, TierPolicy::Count);
        assert_eq!(
            fusion.sources[0].declared_confidence(),
            ConfidenceTier::Medium
        );
    }

    #[test]
    fn column_kind_inferred_from_name_unless_explicit() {
        let spec = ColumnSpec {
            name: "postcode".into(),
            left: "POSTCODE".into(),
            right: "addr:postcode".into(),
            kind: None,
        };
        assert_eq!(spec.key_kind(), KeyKind::Postcode);

        let spec = ColumnSpec {
            name: "reference".into(),
            left: "ref".into(),
            right: "ref".into(),
            kind: Some(KeyKind::Uprn),
        };
        assert_eq!(spec.key_kind(), KeyKind::Uprn);
    }

    #[test]
    fn diff_defaults() {
        let config = Config::from_toml(VALID).unwrap();
        assert_eq!(config.diff.sample_cap, 1000);
        assert!(!config.diff.exhaustive);
        assert_eq!(config.diff.key_attrs[0], "name");
    }

    #[test]
    fn reject_unknown_base() {
        let input = VALID.replace("base = \"epc\"", "base = \"missing\"");
        let err = Config::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn reject_unknown_step_source() {
        let input = VALID.replace("source = \"pois\"", "source = \"nope\"");
        let err = Config::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn reject_exact_without_key() {
        let input = VALID.replace("strategy = \"multi\"", "strategy = \"exact\"");
        let err = Config::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("key"));
    }

    #[test]
    fn tier_policy_parses_and_rejects_typos() {
        let input = VALID.replace("[fusion]", "[fusion]\ntier_policy = \"weighted\"");
        let config = Config::from_toml(&input).unwrap();
        assert_eq!(config.fusion.unwrap().tier_policy, TierPolicy::Weighted);

        let input = VALID.replace("[fusion]", "[fusion]\ntier_policy = \"weigthed\"");
        assert!(Config::from_toml(&input).is_err());
    }

    #[test]
    fn reject_zero_workers() {
        let input = VALID.replace(
            "base = \"epc\"",
            "base = \"epc\"\nfetch_workers = 0",
        );
        let err = Config::from_toml(&input).unwrap_err();
        assert!(err.to_string().contains("fetch_workers"));
    }

    #[test]
    fn spatial_step_rejects_nonpositive_distance() {
        let input = r#"
[pipeline]
name = "t"
base = "a"

[sources.a]
file = "a.csv"
[sources.a.columns]
id = "id"

[sources.b]
file = "b.csv"
[sources.b.columns]
id = "id"

[[steps]]
source = "b"
strategy = "spatial"
max_distance_meters = 0.0
"#;
        let err = Config::from_toml(input).unwrap_err();
        assert!(err.to_string().contains("max_distance_meters"));
    }
}

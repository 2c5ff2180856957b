use ordered_float::OrderedFloat;
use serde::Deserialize;

/// Which normalization a join column gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyKind {
    Uprn,
    Postcode,
    Text,
}

impl KeyKind {
    /// Infer the kind from a column's logical name, the convention the
    /// original pipeline used. Explicit `kind` in config overrides this.
    pub fn infer(column_name: &str) -> Self {
        let lower = column_name.to_lowercase();
        if lower.contains("uprn") {
            Self::Uprn
        } else if lower.contains("postcode") {
            Self::Postcode
        } else {
            Self::Text
        }
    }
}

impl std::fmt::Display for KeyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uprn => write!(f, "uprn"),
            Self::Postcode => write!(f, "postcode"),
            Self::Text => write!(f, "text"),
        }
    }
}

/// A comparison-ready key. Kind-tagged: a postcode key never equals a text
/// key, even for identical strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NormalizedKey {
    Uprn(OrderedFloat<f64>),
    Postcode(String),
    Text(String),
}

/// UPRN: parse as a number, require strictly positive. Invalid UPRNs are
/// dropped from matching, never coerced.
pub fn normalize_uprn(value: &str) -> Option<f64> {
    let parsed: f64 = value.trim().parse().ok()?;
    if parsed > 0.0 {
        Some(parsed)
    } else {
        None
    }
}

/// Postcode: uppercase, drop all spaces. Anything shorter than 5 characters
/// after stripping cannot be a full UK postcode.
pub fn normalize_postcode(value: &str) -> Option<String> {
    let stripped: String = value.trim().to_uppercase().replace(' ', "");
    if stripped.len() >= 5 {
        Some(stripped)
    } else {
        None
    }
}

/// Free text: lowercase, collapse whitespace runs to single spaces.
pub fn normalize_text(value: &str) -> Option<String> {
    let collapsed = value
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Normalize a raw field value under the given kind. None never matches.
pub fn normalize(kind: KeyKind, value: &str) -> Option<NormalizedKey> {
    match kind {
        KeyKind::Uprn => normalize_uprn(value).map(|v| NormalizedKey::Uprn(OrderedFloat(v))),
        KeyKind::Postcode => normalize_postcode(value).map(NormalizedKey::Postcode),
        KeyKind::Text => normalize_text(value).map(NormalizedKey::Text),
    }
}

use std::collections::BTreeMap;

use crate::config::ColumnSpec;
use crate::error::LinkError;
use crate::model::{JoinStats, MatchCandidate, MatchOutput, Record};
use crate::normalize::{normalize, NormalizedKey};

/// Inner-join two collections on one normalized key column. Rows whose key
/// normalizes to null are dropped from matching; two nulls never match.
pub fn join_exact(left: &[Record], right: &[Record], spec: &ColumnSpec) -> MatchOutput {
    let kind = spec.key_kind();

    let left_keys: Vec<Option<NormalizedKey>> = left
        .iter()
        .map(|r| r.field(&spec.left).and_then(|v| normalize(kind, v)))
        .collect();
    let right_keys: Vec<Option<NormalizedKey>> = right
        .iter()
        .map(|r| r.field(&spec.right).and_then(|v| normalize(kind, v)))
        .collect();

    let mut right_index: BTreeMap<&NormalizedKey, Vec<usize>> = BTreeMap::new();
    for (ri, key) in right_keys.iter().enumerate() {
        if let Some(key) = key {
            right_index.entry(key).or_default().push(ri);
        }
    }

    let mut matches = Vec::new();
    let mut pairs_per_key: BTreeMap<&NormalizedKey, usize> = BTreeMap::new();

    for (li, key) in left_keys.iter().enumerate() {
        let Some(key) = key else { continue };
        let Some(right_rows) = right_index.get(key) else {
            continue;
        };
        for &ri in right_rows {
            matches.push(MatchCandidate {
                left: left[li].clone(),
                right: right[ri].clone(),
                confidence_score: 1,
                confidence_level: "1/1".into(),
            });
        }
        *pairs_per_key.entry(key).or_default() += right_rows.len();
    }

    let mut score_distribution = BTreeMap::new();
    if !matches.is_empty() {
        score_distribution.insert(1, matches.len());
    }

    let stats = JoinStats {
        left_total: left.len(),
        right_total: right.len(),
        left_keyed: left_keys.iter().filter(|k| k.is_some()).count(),
        right_keyed: right_keys.iter().filter(|k| k.is_some()).count(),
        left_unique_keys: unique_count(&left_keys),
        right_unique_keys: unique_count(&right_keys),
        matched: matches.len(),
        one_to_many_keys: pairs_per_key.values().filter(|&&n| n > 1).count(),
        max_pairs_per_key: pairs_per_key.values().copied().max().unwrap_or(0),
        skipped_columns: Vec::new(),
        usable_columns: 1,
        score_distribution,
    };

    MatchOutput { matches, stats }
}

/// Multi-column join with confidence scoring. The first usable configured
/// column is the mandatory base equi-join; the remaining usable columns only
/// contribute to the score. A configured column missing from either side is
/// skipped (recorded in the stats); zero usable columns is a hard error.
pub fn join_multi(
    left: &[Record],
    right: &[Record],
    specs: &[ColumnSpec],
    min_confidence: u32,
) -> Result<MatchOutput, LinkError> {
    let mut usable: Vec<&ColumnSpec> = Vec::new();
    let mut skipped: Vec<String> = Vec::new();

    for spec in specs {
        let on_left = column_present(left, &spec.left);
        let on_right = column_present(right, &spec.right);
        if on_left && on_right {
            usable.push(spec);
        } else {
            let side = match (on_left, on_right) {
                (false, false) => "either side",
                (false, true) => "left side",
                (true, false) => "right side",
                (true, true) => unreachable!(),
            };
            skipped.push(format!("{} (missing on {side})", spec.name));
        }
    }

    if usable.is_empty() {
        return Err(LinkError::NoUsableColumns {
            requested: specs.len(),
        });
    }
    let n = usable.len() as u32;

    // Normalized keys per usable column, per side.
    let left_keys: Vec<Vec<Option<NormalizedKey>>> = usable
        .iter()
        .map(|spec| {
            let kind = spec.key_kind();
            left.iter()
                .map(|r| r.field(&spec.left).and_then(|v| normalize(kind, v)))
                .collect()
        })
        .collect();
    let right_keys: Vec<Vec<Option<NormalizedKey>>> = usable
        .iter()
        .map(|spec| {
            let kind = spec.key_kind();
            right
                .iter()
                .map(|r| r.field(&spec.right).and_then(|v| normalize(kind, v)))
                .collect()
        })
        .collect();

    let mut right_index: BTreeMap<&NormalizedKey, Vec<usize>> = BTreeMap::new();
    for (ri, key) in right_keys[0].iter().enumerate() {
        if let Some(key) = key {
            right_index.entry(key).or_default().push(ri);
        }
    }

    let mut matches = Vec::new();
    let mut pairs_per_key: BTreeMap<&NormalizedKey, usize> = BTreeMap::new();
    let mut score_distribution: BTreeMap<u32, usize> = BTreeMap::new();

    for (li, base_key) in left_keys[0].iter().enumerate() {
        let Some(base_key) = base_key else { continue };
        let Some(right_rows) = right_index.get(base_key) else {
            continue;
        };
        for &ri in right_rows {
            // Base column already matched; score the rest independently of
            // any other pair.
            let mut score = 1u32;
            for ci in 1..usable.len() {
                if let (Some(lk), Some(rk)) = (&left_keys[ci][li], &right_keys[ci][ri]) {
                    if lk == rk {
                        score += 1;
                    }
                }
            }
            if score < min_confidence {
                continue;
            }
            *score_distribution.entry(score).or_default() += 1;
            *pairs_per_key.entry(base_key).or_default() += 1;
            matches.push(MatchCandidate {
                left: left[li].clone(),
                right: right[ri].clone(),
                confidence_score: score,
                confidence_level: format!("{score}/{n}"),
            });
        }
    }

    let stats = JoinStats {
        left_total: left.len(),
        right_total: right.len(),
        left_keyed: left_keys[0].iter().filter(|k| k.is_some()).count(),
        right_keyed: right_keys[0].iter().filter(|k| k.is_some()).count(),
        left_unique_keys: unique_count(&left_keys[0]),
        right_unique_keys: unique_count(&right_keys[0]),
        matched: matches.len(),
        one_to_many_keys: pairs_per_key.values().filter(|&&c| c > 1).count(),
        max_pairs_per_key: pairs_per_key.values().copied().max().unwrap_or(0),
        skipped_columns: skipped,
        usable_columns: usable.len(),
        score_distribution,
    };

    Ok(MatchOutput { matches, stats })
}

/// A column is present on a side when at least one record exposes it.
fn column_present(records: &[Record], field: &str) -> bool {
    records.iter().any(|r| r.field(field).is_some())
}

fn unique_count(keys: &[Option<NormalizedKey>]) -> usize {
    keys.iter()
        .flatten()
        .collect::<std::collections::BTreeSet<_>>()
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::KeyKind;

    fn rec(id: &str, fields: &[(&str, &str)]) -> Record {
        let mut r = Record {
            record_id: id.into(),
            ..Default::default()
        };
        for (k, v) in fields {
            match *k {
                "uprn" => r.uprn = Some((*v).into()),
                "postcode" => r.postcode = Some((*v).into()),
                "name" => r.name = Some((*v).into()),
                _ => {
                    r.extra.insert((*k).into(), (*v).into());
                }
            }
        }
        r
    }

    fn uprn_spec() -> ColumnSpec {
        ColumnSpec {
            name: "uprn".into(),
            left: "uprn".into(),
            right: "uprn".into(),
            kind: None,
        }
    }

    #[test]
    fn exact_uprn_join_drops_nulls() {
        // Scenario: left [100, 200, null], right [100, 300] -> one pair.
        let left = vec![
            rec("l1", &[("uprn", "100")]),
            rec("l2", &[("uprn", "200")]),
            rec("l3", &[]),
        ];
        let right = vec![rec("r1", &[("uprn", "100")]), rec("r2", &[("uprn", "300")])];

        let out = join_exact(&left, &right, &uprn_spec());
        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.matches[0].left.record_id, "l1");
        assert_eq!(out.matches[0].right.record_id, "r1");
        assert_eq!(out.stats.left_keyed, 2);
        assert_eq!(out.stats.right_keyed, 2);
        assert_eq!(out.stats.matched, 1);
        assert_eq!(out.stats.one_to_many_keys, 0);
    }

    #[test]
    fn exact_join_reports_one_to_many() {
        let left = vec![rec("l1", &[("uprn", "100")])];
        let right = vec![
            rec("r1", &[("uprn", "100")]),
            rec("r2", &[("uprn", "100.0")]),
        ];

        let out = join_exact(&left, &right, &uprn_spec());
        assert_eq!(out.matches.len(), 2);
        assert_eq!(out.stats.one_to_many_keys, 1);
        assert_eq!(out.stats.max_pairs_per_key, 2);
        assert_eq!(out.stats.right_unique_keys, 1);
    }

    #[test]
    fn exact_join_soundness() {
        let left = vec![
            rec("l1", &[("uprn", " 42 ")]),
            rec("l2", &[("uprn", "0")]),
            rec("l3", &[("uprn", "junk")]),
        ];
        let right = vec![rec("r1", &[("uprn", "42.0")])];

        let out = join_exact(&left, &right, &uprn_spec());
        for m in &out.matches {
            let lk = normalize(KeyKind::Uprn, m.left.field("uprn").unwrap());
            let rk = normalize(KeyKind::Uprn, m.right.field("uprn").unwrap());
            assert!(lk.is_some() && rk.is_some());
            assert_eq!(lk, rk);
        }
        assert_eq!(out.matches.len(), 1);
    }

    #[test]
    fn empty_input_yields_empty_output() {
        let right = vec![rec("r1", &[("uprn", "100")])];
        let out = join_exact(&[], &right, &uprn_spec());
        assert!(out.matches.is_empty());
        assert_eq!(out.stats.matched, 0);
        assert_eq!(out.stats.left_total, 0);
    }

    fn multi_specs() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec {
                name: "postcode".into(),
                left: "postcode".into(),
                right: "postcode".into(),
                kind: None,
            },
            ColumnSpec {
                name: "address".into(),
                left: "address".into(),
                right: "address".into(),
                kind: None,
            },
        ]
    }

    #[test]
    fn multi_join_scores_agreeing_columns() {
        // Scenario: {postcode: "E1 6AN", address: "1 Main St"} vs
        // {postcode: "E16AN", address: "1 main st"} -> score 2/2.
        let left = vec![rec(
            "l1",
            &[("postcode", "E1 6AN"), ("address", "1 Main St")],
        )];
        let right = vec![rec(
            "r1",
            &[("postcode", "E16AN"), ("address", "1 main st")],
        )];

        let out = join_multi(&left, &right, &multi_specs(), 1).unwrap();
        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.matches[0].confidence_score, 2);
        assert_eq!(out.matches[0].confidence_level, "2/2");
        assert_eq!(out.stats.usable_columns, 2);
    }

    #[test]
    fn multi_join_base_column_is_mandatory() {
        // Addresses agree but postcodes differ: the base join produces no
        // pair at all, secondary agreement never rescues it.
        let left = vec![rec(
            "l1",
            &[("postcode", "E1 6AN"), ("address", "1 Main St")],
        )];
        let right = vec![rec(
            "r1",
            &[("postcode", "SW1A 1AA"), ("address", "1 main st")],
        )];

        let out = join_multi(&left, &right, &multi_specs(), 1).unwrap();
        assert!(out.matches.is_empty());
    }

    #[test]
    fn multi_join_min_confidence_filters() {
        let left = vec![
            rec("l1", &[("postcode", "E1 6AN"), ("address", "1 Main St")]),
            rec("l2", &[("postcode", "N1 9GU"), ("address", "2 Side Rd")]),
        ];
        let right = vec![
            rec("r1", &[("postcode", "E16AN"), ("address", "1 main st")]),
            rec("r2", &[("postcode", "N19GU"), ("address", "different")]),
        ];

        let out = join_multi(&left, &right, &multi_specs(), 2).unwrap();
        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.matches[0].left.record_id, "l1");
        assert_eq!(out.stats.score_distribution.get(&2), Some(&1));
        assert!(out.stats.score_distribution.get(&1).is_none());
    }

    #[test]
    fn multi_join_skips_missing_column_with_warning() {
        let mut specs = multi_specs();
        specs.push(ColumnSpec {
            name: "city".into(),
            left: "POSTTOWN".into(),
            right: "addr:city".into(),
            kind: None,
        });

        let left = vec![rec(
            "l1",
            &[("postcode", "E1 6AN"), ("address", "1 Main St")],
        )];
        let right = vec![rec(
            "r1",
            &[("postcode", "E16AN"), ("address", "1 main st")],
        )];

        let out = join_multi(&left, &right, &specs, 1).unwrap();
        assert_eq!(out.stats.usable_columns, 2);
        assert_eq!(out.stats.skipped_columns.len(), 1);
        assert!(out.stats.skipped_columns[0].contains("city"));
        // Level denominator counts usable columns only.
        assert_eq!(out.matches[0].confidence_level, "2/2");
    }

    #[test]
    fn multi_join_zero_usable_is_hard_error() {
        let left = vec![rec("l1", &[("postcode", "E1 6AN")])];
        let right = vec![rec("r1", &[("postcode", "E16AN")])];
        let specs = vec![ColumnSpec {
            name: "city".into(),
            left: "POSTTOWN".into(),
            right: "addr:city".into(),
            kind: None,
        }];

        let err = join_multi(&left, &right, &specs, 1).unwrap_err();
        assert!(matches!(err, LinkError::NoUsableColumns { requested: 1 }));
    }

    #[test]
    fn multi_join_score_bounds() {
        let left = vec![rec(
            "l1",
            &[("postcode", "E1 6AN"), ("address", "1 Main St")],
        )];
        let right = vec![
            rec("r1", &[("postcode", "E16AN"), ("address", "1 main st")]),
            rec("r2", &[("postcode", "e1 6an")]),
        ];

        let out = join_multi(&left, &right, &multi_specs(), 1).unwrap();
        let n = out.stats.usable_columns as u32;
        for m in &out.matches {
            assert!(m.confidence_score >= 1 && m.confidence_score <= n);
        }
        // r2 has no address: null never matches, so its score stays 1.
        let r2 = out
            .matches
            .iter()
            .find(|m| m.right.record_id == "r2")
            .unwrap();
        assert_eq!(r2.confidence_score, 1);
    }
}

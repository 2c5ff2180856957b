use std::collections::HashMap;

use crate::model::{Record, SpatialJoinStats, SpatialMatch, SpatialOutput};

// Airy 1830 ellipsoid / OS National Grid transverse Mercator parameters.
// The datum shift is omitted: only inter-point distances feed the join, and
// at a 15 m threshold the shift cancels to sub-millimeter.
const AIRY_A: f64 = 6_377_563.396;
const AIRY_B: f64 = 6_356_256.909;
const SCALE_F0: f64 = 0.999_601_271_7;
const LAT0_DEG: f64 = 49.0;
const LON0_DEG: f64 = -2.0;
const FALSE_E: f64 = 400_000.0;
const FALSE_N: f64 = -100_000.0;

/// Project a WGS-ish lat/lon point onto the National Grid metric plane.
/// Returns (easting, northing) in meters.
pub fn project(lat_deg: f64, lon_deg: f64) -> (f64, f64) {
    let phi = lat_deg.to_radians();
    let lam = lon_deg.to_radians();
    let phi0 = LAT0_DEG.to_radians();
    let lam0 = LON0_DEG.to_radians();

    let e2 = 1.0 - (AIRY_B * AIRY_B) / (AIRY_A * AIRY_A);
    let n = (AIRY_A - AIRY_B) / (AIRY_A + AIRY_B);

    let sin_phi = phi.sin();
    let cos_phi = phi.cos();
    let tan_phi = phi.tan();

    let nu = AIRY_A * SCALE_F0 / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let rho =
        AIRY_A * SCALE_F0 * (1.0 - e2) / (1.0 - e2 * sin_phi * sin_phi).powf(1.5);
    let eta2 = nu / rho - 1.0;

    // Meridional arc (OS series expansion in n).
    let m = AIRY_B
        * SCALE_F0
        * ((1.0 + n + 1.25 * n * n + 1.25 * n * n * n) * (phi - phi0)
            - (3.0 * n + 3.0 * n * n + 2.625 * n * n * n)
                * (phi - phi0).sin()
                * (phi + phi0).cos()
            + (1.875 * n * n + 1.875 * n * n * n)
                * (2.0 * (phi - phi0)).sin()
                * (2.0 * (phi + phi0)).cos()
            - (35.0 / 24.0) * n * n * n
                * (3.0 * (phi - phi0)).sin()
                * (3.0 * (phi + phi0)).cos());

    let i = m + FALSE_N;
    let ii = (nu / 2.0) * sin_phi * cos_phi;
    let iii = (nu / 24.0)
        * sin_phi
        * cos_phi.powi(3)
        * (5.0 - tan_phi * tan_phi + 9.0 * eta2);
    let iiia = (nu / 720.0)
        * sin_phi
        * cos_phi.powi(5)
        * (61.0 - 58.0 * tan_phi * tan_phi + tan_phi.powi(4));
    let iv = nu * cos_phi;
    let v = (nu / 6.0) * cos_phi.powi(3) * (nu / rho - tan_phi * tan_phi);
    let vi = (nu / 120.0)
        * cos_phi.powi(5)
        * (5.0 - 18.0 * tan_phi * tan_phi + tan_phi.powi(4) + 14.0 * eta2
            - 58.0 * tan_phi * tan_phi * eta2);

    let dl = lam - lam0;
    let northing = i + ii * dl * dl + iii * dl.powi(4) + iiia * dl.powi(6);
    let easting = FALSE_E + iv * dl + v * dl.powi(3) + vi * dl.powi(5);

    (easting, northing)
}

/// Nearest-neighbor spatial join: for each left point, the single closest
/// right point, retained only within `max_distance_meters`. Left records
/// without a match (or without coordinates) are excluded, never emitted with
/// a null pair.
pub fn join_spatial(
    left: &[Record],
    right: &[Record],
    max_distance_meters: f64,
) -> SpatialOutput {
    let left_pts: Vec<(usize, (f64, f64))> = left
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.coords().map(|(lat, lon)| (i, project(lat, lon))))
        .collect();
    let right_pts: Vec<(usize, (f64, f64))> = right
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.coords().map(|(lat, lon)| (i, project(lat, lon))))
        .collect();

    let mut stats = SpatialJoinStats {
        left_total: left.len(),
        right_total: right.len(),
        left_with_coords: left_pts.len(),
        right_with_coords: right_pts.len(),
        ..Default::default()
    };

    if left_pts.is_empty() || right_pts.is_empty() || max_distance_meters <= 0.0 {
        return SpatialOutput {
            matches: Vec::new(),
            stats,
        };
    }

    // Grid-bucket prefilter with cell size = max distance: the nearest
    // in-range point is always within the 3x3 neighborhood of a left cell.
    let cell = max_distance_meters;
    let bucket = |e: f64, n: f64| ((e / cell).floor() as i64, (n / cell).floor() as i64);

    let mut grid: HashMap<(i64, i64), Vec<usize>> = HashMap::new();
    for (pi, &(_, (e, n))) in right_pts.iter().enumerate() {
        grid.entry(bucket(e, n)).or_default().push(pi);
    }

    let max_sq = max_distance_meters * max_distance_meters;
    let mut matches = Vec::new();
    let mut distances = Vec::new();

    for &(li, (le, ln)) in &left_pts {
        let (ce, cn) = bucket(le, ln);
        let mut best: Option<(usize, f64)> = None;

        for de in -1..=1 {
            for dn in -1..=1 {
                let Some(candidates) = grid.get(&(ce + de, cn + dn)) else {
                    continue;
                };
                for &pi in candidates {
                    let (re, rn) = right_pts[pi].1;
                    let d2 = (le - re) * (le - re) + (ln - rn) * (ln - rn);
                    if d2 > max_sq {
                        continue;
                    }
                    if best.map_or(true, |(_, bd2)| d2 < bd2) {
                        best = Some((pi, d2));
                    }
                }
            }
        }

        if let Some((pi, d2)) = best {
            let distance = d2.sqrt();
            distances.push(distance);
            matches.push(SpatialMatch {
                left: left[li].clone(),
                right: right[right_pts[pi].0].clone(),
                distance_meters: distance,
            });
        }
    }

    if !distances.is_empty() {
        let mut sorted = distances.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        stats.matched = matches.len();
        stats.mean_distance_meters = distances.iter().sum::<f64>() / distances.len() as f64;
        stats.median_distance_meters = sorted[sorted.len() / 2];
        stats.max_distance_meters = sorted[sorted.len() - 1];
    }

    SpatialOutput { matches, stats }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pt(id: &str, lat: f64, lon: f64) -> Record {
        Record {
            record_id: id.into(),
            latitude: Some(lat),
            longitude: Some(lon),
            ..Default::default()
        }
    }

    #[test]
    fn projection_hits_known_national_grid_point() {
        // OS worked example: 52°39'27.2531"N 1°43'4.5177"E ->
        // E 651409.903, N 313177.270 (OSGB36 coordinates; we project the
        // same ellipsoidal lat/lon so the expected plane point is exact).
        let lat = 52.0 + 39.0 / 60.0 + 27.2531 / 3600.0;
        let lon = 1.0 + 43.0 / 60.0 + 4.5177 / 3600.0;
        let (e, n) = project(lat, lon);
        assert!((e - 651_409.903).abs() < 0.01, "easting {e}");
        assert!((n - 313_177.270).abs() < 0.01, "northing {n}");
    }

    #[test]
    fn projection_preserves_small_distances() {
        // ~0.00009 degrees of latitude is ~10 m anywhere in the UK.
        let (e1, n1) = project(51.5000, -0.1000);
        let (e2, n2) = project(51.50009, -0.1000);
        let d = ((e1 - e2).powi(2) + (n1 - n2).powi(2)).sqrt();
        assert!((d - 10.0).abs() < 0.1, "distance {d}");
    }

    #[test]
    fn nearest_within_threshold_matches() {
        let left = vec![pt("poi", 51.5000, -0.1000)];
        let right = vec![
            pt("far", 51.5010, -0.1000),  // ~111 m away
            pt("near", 51.50005, -0.1000), // ~5.5 m away
        ];

        let out = join_spatial(&left, &right, 15.0);
        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.matches[0].right.record_id, "near");
        assert!(out.matches[0].distance_meters <= 15.0);
        assert!(out.matches[0].distance_meters > 4.0);
    }

    #[test]
    fn out_of_range_left_is_excluded() {
        let left = vec![pt("a", 51.5, -0.1), pt("b", 51.6, -0.1)];
        let right = vec![pt("r", 51.5, -0.1)];

        let out = join_spatial(&left, &right, 15.0);
        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.matches[0].left.record_id, "a");
        assert_eq!(out.stats.left_with_coords, 2);
        assert_eq!(out.stats.matched, 1);
    }

    #[test]
    fn each_left_matches_at_most_once() {
        let left = vec![pt("a", 51.5, -0.1)];
        let right = vec![
            pt("r1", 51.50001, -0.1),
            pt("r2", 51.50002, -0.1),
            pt("r3", 51.50003, -0.1),
        ];

        let out = join_spatial(&left, &right, 15.0);
        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.matches[0].right.record_id, "r1");
    }

    #[test]
    fn records_without_coords_are_skipped() {
        let left = vec![
            pt("a", 51.5, -0.1),
            Record {
                record_id: "no_coords".into(),
                ..Default::default()
            },
        ];
        let right = vec![pt("r", 51.5, -0.1)];

        let out = join_spatial(&left, &right, 15.0);
        assert_eq!(out.stats.left_total, 2);
        assert_eq!(out.stats.left_with_coords, 1);
        assert_eq!(out.matches.len(), 1);
    }

    #[test]
    fn all_output_distances_respect_threshold() {
        let left: Vec<Record> = (0..20)
            .map(|i| pt(&format!("l{i}"), 51.5 + i as f64 * 0.00005, -0.1))
            .collect();
        let right: Vec<Record> = (0..20)
            .map(|i| pt(&format!("r{i}"), 51.5 + i as f64 * 0.00005, -0.10001))
            .collect();

        let out = join_spatial(&left, &right, 10.0);
        for m in &out.matches {
            assert!(m.distance_meters <= 10.0);
        }
        assert!(out.stats.max_distance_meters <= 10.0);
    }
}

//! Seam polygon merge engine.
//!
//! A label cut by a tile seam shows up as two detections whose polygons end
//! on opposite sides of the boundary. The engine scans the collection once,
//! left to right: a polygon with a vertex near a multiple of the seam
//! spacing looks ahead for the first later polygon that is also near a seam
//! and x-adjacent by bounding box, and the pair collapses into one
//! axis-aligned box with concatenated text and averaged score.
//!
//! The pass is greedy and first-match-wins; changing scan order changes the
//! outcome, so it must stay sequential. Adjacency deliberately tests only
//! the x axis (vertical seams are never merged). The y axis can be brought
//! in with [`MergeConfig::y_threshold`] for callers that cannot live with
//! the coarse policy.

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::feature::{Feature, FeatureCollection, Properties, Ring};

/// How detections without a confidence score enter a merged average.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScorePolicy {
    /// An absent score contributes 0 to the sum but still increments the
    /// count. Default, replicating the source pipeline's arithmetic.
    #[default]
    CountMissingAsZero,
    /// Absent scores are left out of both sum and count; a merge of
    /// all-unscored inputs stays unscored.
    ExcludeMissing,
}

/// Tuning for one merge pass. No global state: callers build one of these
/// per job and pass it in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeConfig {
    /// Distance (px) within which a vertex counts as touching a seam, and
    /// within which two bounding boxes count as adjacent.
    pub edge_threshold: f64,
    /// Tile-boundary spacing unit of the stitched mosaic (px).
    pub seam_spacing: f64,
    /// When set, merge partners must also have y-ranges within this
    /// distance of each other. `None` keeps the x-only adjacency test.
    pub y_threshold: Option<f64>,
    pub score_policy: ScorePolicy,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            edge_threshold: 5.0,
            seam_spacing: 1000.0,
            y_threshold: None,
            score_policy: ScorePolicy::default(),
        }
    }
}

impl MergeConfig {
    fn validate(&self) -> Result<()> {
        if !self.edge_threshold.is_finite() || self.edge_threshold < 0.0 {
            return Err(Error::Config(format!(
                "edge_threshold must be finite and non-negative, got {}",
                self.edge_threshold
            )));
        }
        if !self.seam_spacing.is_finite() || self.seam_spacing <= 0.0 {
            return Err(Error::Config(format!(
                "seam_spacing must be finite and positive, got {}",
                self.seam_spacing
            )));
        }
        if let Some(t) = self.y_threshold {
            if !t.is_finite() || t < 0.0 {
                return Err(Error::Config(format!(
                    "y_threshold must be finite and non-negative, got {t}"
                )));
            }
        }
        Ok(())
    }
}

/// Axis-aligned extent of a ring.
#[derive(Debug, Clone, Copy)]
struct RingBounds {
    min_x: f64,
    max_x: f64,
    min_y: f64,
    max_y: f64,
}

impl RingBounds {
    fn of(ring: &[[f64; 2]]) -> Option<Self> {
        let first = ring.first()?;
        let mut bounds = Self {
            min_x: first[0],
            max_x: first[0],
            min_y: first[1],
            max_y: first[1],
        };
        for p in &ring[1..] {
            bounds.min_x = bounds.min_x.min(p[0]);
            bounds.max_x = bounds.max_x.max(p[0]);
            bounds.min_y = bounds.min_y.min(p[1]);
            bounds.max_y = bounds.max_y.max(p[1]);
        }
        Some(bounds)
    }

    fn is_finite(&self) -> bool {
        self.min_x.is_finite()
            && self.max_x.is_finite()
            && self.min_y.is_finite()
            && self.max_y.is_finite()
    }

    /// Minimal bounding rectangle as a closed ring, clockwise from the
    /// top-left: `(minX,maxY) (maxX,maxY) (maxX,minY) (minX,minY)` closed.
    fn to_rect_ring(self) -> Ring {
        vec![
            [self.min_x, self.max_y],
            [self.max_x, self.max_y],
            [self.max_x, self.min_y],
            [self.min_x, self.min_y],
            [self.min_x, self.max_y],
        ]
    }
}

/// True if any vertex lies within the threshold of a seam, i.e. of a
/// multiple of the spacing unit. Candidate multiples run from one spacing up
/// to the ring's own maximum x plus one spacing; every candidate is itself a
/// multiple of the spacing, so one remainder test per vertex decides the
/// whole set without walking it.
fn is_near_seam(ring: &[[f64; 2]], max_x: f64, cfg: &MergeConfig) -> bool {
    // A ring that never extends right of x = 0 has no seam candidates.
    if !(max_x > 0.0) {
        return false;
    }
    let spacing = cfg.seam_spacing;
    ring.iter().any(|p| {
        let rem = p[0].rem_euclid(spacing);
        rem <= cfg.edge_threshold || spacing - rem <= cfg.edge_threshold
    })
}

/// Bounding boxes touch on the x axis: one box's left edge is within the
/// threshold of the other's right edge. The y axis is intentionally not part
/// of the base test.
fn x_adjacent(a: &RingBounds, b: &RingBounds, threshold: f64) -> bool {
    (a.min_x - b.max_x).abs() < threshold || (b.min_x - a.max_x).abs() < threshold
}

/// Gap between the boxes' y-ranges (zero when they overlap) is within the
/// threshold.
fn y_near(a: &RingBounds, b: &RingBounds, threshold: f64) -> bool {
    let gap = (a.min_y - b.max_y).max(b.min_y - a.max_y).max(0.0);
    gap <= threshold
}

/// Smallest repair that yields a usable simple outline: non-finite vertices
/// are dropped and consecutive duplicates collapsed, then the ring is
/// re-closed. `None` if fewer than three distinct vertices survive.
fn repair_ring(ring: &[[f64; 2]]) -> Option<Ring> {
    let mut cleaned: Ring = Vec::with_capacity(ring.len());
    for &p in ring {
        if !(p[0].is_finite() && p[1].is_finite()) {
            continue;
        }
        if cleaned.last() == Some(&p) {
            continue;
        }
        cleaned.push(p);
    }
    if cleaned.len() > 1 && cleaned.first() == cleaned.last() {
        cleaned.pop();
    }
    if cleaned.len() < 3 {
        return None;
    }
    let first = cleaned[0];
    cleaned.push(first);
    Some(cleaned)
}

fn merged_score(scores: &[Option<f64>], policy: ScorePolicy) -> Option<f64> {
    match policy {
        ScorePolicy::CountMissingAsZero => {
            let sum: f64 = scores.iter().map(|s| s.unwrap_or(0.0)).sum();
            Some(sum / scores.len() as f64)
        }
        ScorePolicy::ExcludeMissing => {
            let present: Vec<f64> = scores.iter().flatten().copied().collect();
            if present.is_empty() {
                None
            } else {
                Some(present.iter().sum::<f64>() / present.len() as f64)
            }
        }
    }
}

fn merge_pair(
    seed_index: usize,
    seed: &Feature,
    seed_ring: &[[f64; 2]],
    partner_index: usize,
    partner: &Feature,
    partner_ring: &[[f64; 2]],
    cfg: &MergeConfig,
) -> Result<Feature> {
    let conflict = |reason: &str| Error::MergeConflict {
        seed: seed_index,
        partner: partner_index,
        reason: reason.to_owned(),
    };

    let a = repair_ring(seed_ring).ok_or_else(|| conflict("seed ring cannot be repaired"))?;
    let b = repair_ring(partner_ring).ok_or_else(|| conflict("partner ring cannot be repaired"))?;

    // Concatenate, dropping the partner's duplicate first vertex, then
    // replace the union with its minimal bounding rectangle: merged label
    // boxes are always axis-aligned.
    let mut combined = a;
    combined.extend_from_slice(&b[1..]);
    let bounds =
        RingBounds::of(&combined).ok_or_else(|| conflict("merged ring has no vertices"))?;
    if !bounds.is_finite() {
        return Err(conflict("merged ring has no finite extent"));
    }

    let text = format!("{}{}", seed.properties.text, partner.properties.text);
    let score = merged_score(
        &[seed.properties.score, partner.properties.score],
        cfg.score_policy,
    );
    Ok(Feature::polygon(
        bounds.to_rect_ring(),
        Properties::new(text, score),
    ))
}

/// Merge detections split across tile seams.
///
/// Single greedy pass in collection order: each unconsumed near-seam polygon
/// takes the first later unconsumed polygon that is also near a seam and
/// x-adjacent, and the pair is replaced (at the seed's position) by its
/// bounding rectangle with concatenated text and averaged score. Everything
/// else is copied through unchanged, in order.
///
/// A pair that fails validity repair is logged and left unmerged; the only
/// fatal condition beyond a bad [`MergeConfig`] is a polygon with an empty
/// ring, which has no extremes to scan.
pub fn merge_adjacent_seam_polygons(
    collection: &FeatureCollection,
    cfg: &MergeConfig,
) -> Result<FeatureCollection> {
    cfg.validate()?;

    let features = &collection.features;
    // Rings extracted once up front; features without a usable polygon ring
    // are never merge candidates and pass through untouched.
    let mut rings: Vec<Option<Ring>> = Vec::with_capacity(features.len());
    for (index, feature) in features.iter().enumerate() {
        match feature.geometry.outer_ring() {
            Ok(ring) if ring.is_empty() => return Err(Error::EmptyGeometry { index }),
            Ok(ring) => rings.push(Some(ring)),
            Err(issue) => {
                debug!("feature {index} not merge-eligible: {issue}");
                rings.push(None);
            }
        }
    }

    let mut consumed = vec![false; features.len()];
    let mut out = Vec::with_capacity(features.len());
    let mut merges = 0usize;

    for i in 0..features.len() {
        if consumed[i] {
            continue;
        }
        let seed = &features[i];
        let Some(seed_ring) = &rings[i] else {
            out.push(seed.clone());
            continue;
        };
        // Non-empty by construction above.
        let Some(seed_bounds) = RingBounds::of(seed_ring) else {
            return Err(Error::EmptyGeometry { index: i });
        };
        if !is_near_seam(seed_ring, seed_bounds.max_x, cfg) {
            out.push(seed.clone());
            continue;
        }

        let mut merged: Option<Feature> = None;
        for j in (i + 1)..features.len() {
            if consumed[j] {
                continue;
            }
            let Some(partner_ring) = &rings[j] else {
                continue;
            };
            let Some(partner_bounds) = RingBounds::of(partner_ring) else {
                return Err(Error::EmptyGeometry { index: j });
            };
            if !is_near_seam(partner_ring, partner_bounds.max_x, cfg) {
                continue;
            }
            if !x_adjacent(&seed_bounds, &partner_bounds, cfg.edge_threshold) {
                continue;
            }
            if let Some(t) = cfg.y_threshold {
                if !y_near(&seed_bounds, &partner_bounds, t) {
                    continue;
                }
            }

            match merge_pair(i, seed, seed_ring, j, &features[j], partner_ring, cfg) {
                Ok(feature) => {
                    debug!(
                        "merged seam features {i} ({:?}) and {j} ({:?})",
                        seed.properties.text, features[j].properties.text
                    );
                    consumed[j] = true;
                    merged = Some(feature);
                    merges += 1;
                    break; // first match wins
                }
                Err(error) => {
                    // Pair skipped, both originals retained; keep scanning.
                    warn!("{error}");
                }
            }
        }

        out.push(merged.unwrap_or_else(|| seed.clone()));
    }

    if merges > 0 {
        info!(
            "seam merge: {} features in, {} out ({merges} pairs merged)",
            features.len(),
            out.len()
        );
    }
    Ok(FeatureCollection::new(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, x1: f64, y0: f64, y1: f64) -> Ring {
        vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]]
    }

    fn detection(ring: Ring, text: &str, score: Option<f64>) -> Feature {
        Feature::polygon(ring, Properties::new(text, score))
    }

    fn seam_pair() -> FeatureCollection {
        FeatureCollection::new(vec![
            detection(square(995.0, 1005.0, 0.0, -10.0), "Spring", Some(0.8)),
            detection(square(1005.0, 1015.0, 0.0, -10.0), "field", Some(0.6)),
        ])
    }

    #[test]
    fn split_label_merges_into_one_rectangle() {
        let merged = merge_adjacent_seam_polygons(&seam_pair(), &MergeConfig::default()).unwrap();
        assert_eq!(merged.len(), 1);

        let feature = &merged.features[0];
        assert_eq!(feature.properties.text, "Springfield");
        assert!((feature.properties.score.unwrap() - 0.7).abs() < 1e-12);

        let ring = feature.geometry.outer_ring().unwrap();
        assert_eq!(
            ring,
            vec![
                [995.0, 0.0],
                [1015.0, 0.0],
                [1015.0, -10.0],
                [995.0, -10.0],
                [995.0, 0.0],
            ]
        );
    }

    #[test]
    fn text_concatenates_in_scan_order_not_sorted() {
        let mut collection = seam_pair();
        collection.features.swap(0, 1);
        let merged = merge_adjacent_seam_polygons(&collection, &MergeConfig::default()).unwrap();
        assert_eq!(merged.features[0].properties.text, "fieldSpring");
    }

    #[test]
    fn polygons_away_from_every_seam_are_never_merged() {
        let collection = FeatureCollection::new(vec![
            detection(square(400.0, 500.0, 0.0, -10.0), "left", Some(0.5)),
            detection(square(500.0, 600.0, 0.0, -10.0), "right", Some(0.5)),
        ]);
        let merged = merge_adjacent_seam_polygons(&collection, &MergeConfig::default()).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.features[0].properties.text, "left");
        assert_eq!(merged.features[1].properties.text, "right");
    }

    #[test]
    fn merge_is_idempotent_on_its_own_output() {
        let once = merge_adjacent_seam_polygons(&seam_pair(), &MergeConfig::default()).unwrap();
        let twice = merge_adjacent_seam_polygons(&once, &MergeConfig::default()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unmerged_features_keep_their_order() {
        let collection = FeatureCollection::new(vec![
            detection(square(100.0, 200.0, 0.0, -10.0), "a", None),
            detection(square(995.0, 1005.0, 0.0, -10.0), "b", Some(0.5)),
            detection(square(300.0, 400.0, 0.0, -10.0), "c", None),
            detection(square(1005.0, 1015.0, 0.0, -10.0), "d", Some(0.5)),
        ]);
        let merged = merge_adjacent_seam_polygons(&collection, &MergeConfig::default()).unwrap();
        let texts: Vec<&str> = merged
            .features
            .iter()
            .map(|f| f.properties.text.as_str())
            .collect();
        // Merged pair lands at the seed's position.
        assert_eq!(texts, vec!["a", "bd", "c"]);
    }

    #[test]
    fn absent_scores_count_as_zero_by_default() {
        let collection = FeatureCollection::new(vec![
            detection(square(995.0, 1005.0, 0.0, -10.0), "a", Some(0.8)),
            detection(square(1005.0, 1015.0, 0.0, -10.0), "b", None),
        ]);
        let merged = merge_adjacent_seam_polygons(&collection, &MergeConfig::default()).unwrap();
        assert!((merged.features[0].properties.score.unwrap() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn exclude_missing_policy_averages_only_present_scores() {
        let cfg = MergeConfig {
            score_policy: ScorePolicy::ExcludeMissing,
            ..MergeConfig::default()
        };
        let collection = FeatureCollection::new(vec![
            detection(square(995.0, 1005.0, 0.0, -10.0), "a", Some(0.8)),
            detection(square(1005.0, 1015.0, 0.0, -10.0), "b", None),
        ]);
        let merged = merge_adjacent_seam_polygons(&collection, &cfg).unwrap();
        assert!((merged.features[0].properties.score.unwrap() - 0.8).abs() < 1e-12);

        let unscored = FeatureCollection::new(vec![
            detection(square(995.0, 1005.0, 0.0, -10.0), "a", None),
            detection(square(1005.0, 1015.0, 0.0, -10.0), "b", None),
        ]);
        let merged = merge_adjacent_seam_polygons(&unscored, &cfg).unwrap();
        assert_eq!(merged.features[0].properties.score, None);
    }

    #[test]
    fn x_aligned_but_vertically_distant_polygons_merge_only_in_default_mode() {
        let collection = FeatureCollection::new(vec![
            detection(square(995.0, 1005.0, 0.0, -10.0), "top", Some(0.5)),
            detection(square(1005.0, 1015.0, -500.0, -510.0), "far", Some(0.5)),
        ]);

        // Documented coarse policy: the y axis is ignored.
        let loose = merge_adjacent_seam_polygons(&collection, &MergeConfig::default()).unwrap();
        assert_eq!(loose.len(), 1);

        let strict = MergeConfig {
            y_threshold: Some(5.0),
            ..MergeConfig::default()
        };
        let kept = merge_adjacent_seam_polygons(&collection, &strict).unwrap();
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn extra_properties_survive_on_untouched_features() {
        let mut feature = detection(square(400.0, 500.0, 0.0, -10.0), "plain", Some(0.9));
        feature
            .properties
            .extra
            .insert("img_id".to_owned(), serde_json::json!("sheet_042"));
        let collection = FeatureCollection::new(vec![feature.clone()]);

        let merged = merge_adjacent_seam_polygons(&collection, &MergeConfig::default()).unwrap();
        assert_eq!(merged.features[0], feature);
        assert_eq!(
            merged.features[0].properties.extra["img_id"],
            serde_json::json!("sheet_042")
        );
    }

    #[test]
    fn far_offshore_coordinates_do_not_stall_the_seam_scan() {
        // The distance to the nearest seam stays 400 no matter how large x
        // grows; the scan must decide that without walking every multiple.
        let collection = FeatureCollection::new(vec![
            detection(square(7.5e12 + 400.0, 7.5e12 + 500.0, 0.0, -10.0), "far", None),
            detection(square(995.0, 1005.0, 0.0, -10.0), "a", Some(0.5)),
            detection(square(1005.0, 1015.0, 0.0, -10.0), "b", Some(0.5)),
        ]);
        let merged = merge_adjacent_seam_polygons(&collection, &MergeConfig::default()).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.features[0].properties.text, "far");
        assert_eq!(merged.features[1].properties.text, "ab");
    }

    #[test]
    fn rings_left_of_the_first_tile_have_no_seam_candidates() {
        // x = 0 is within the threshold of a multiple, but no candidate
        // seams exist for a ring whose max x is not positive.
        let collection = FeatureCollection::new(vec![
            detection(square(-10.0, 0.0, 0.0, -10.0), "left", Some(0.5)),
            detection(square(0.0, 5.0, 0.0, -10.0), "right", Some(0.5)),
        ]);
        let merged = merge_adjacent_seam_polygons(&collection, &MergeConfig::default()).unwrap();
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn first_match_wins_over_later_candidates() {
        let collection = FeatureCollection::new(vec![
            detection(square(995.0, 1005.0, 0.0, -10.0), "seed", Some(0.5)),
            detection(square(1005.0, 1015.0, 0.0, -10.0), "first", Some(0.5)),
            detection(square(1005.0, 1015.0, -20.0, -30.0), "second", Some(0.5)),
        ]);
        let merged = merge_adjacent_seam_polygons(&collection, &MergeConfig::default()).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.features[0].properties.text, "seedfirst");
        assert_eq!(merged.features[1].properties.text, "second");
    }

    #[test]
    fn non_polygon_features_pass_through_untouched() {
        let point = Feature {
            kind: "Feature".to_owned(),
            geometry: crate::feature::Geometry {
                kind: "Point".to_owned(),
                coordinates: serde_json::json!([1.0, 2.0]),
                latlon: None,
            },
            properties: Properties::new("pin", None),
        };
        let collection = FeatureCollection::new(vec![point.clone()]);
        let merged = merge_adjacent_seam_polygons(&collection, &MergeConfig::default()).unwrap();
        assert_eq!(merged.features[0], point);
    }

    #[test]
    fn empty_ring_is_a_fatal_error() {
        let empty = Feature {
            kind: "Feature".to_owned(),
            geometry: crate::feature::Geometry {
                kind: "Polygon".to_owned(),
                coordinates: serde_json::json!([[]]),
                latlon: None,
            },
            properties: Properties::new("ghost", None),
        };
        let collection = FeatureCollection::new(vec![empty]);
        let result = merge_adjacent_seam_polygons(&collection, &MergeConfig::default());
        assert!(matches!(result, Err(Error::EmptyGeometry { index: 0 })));
    }

    #[test]
    fn unrepairable_pair_is_kept_unmerged() {
        // The seed collapses to a single point; repair cannot produce a
        // simple outline, so the pair is a logged conflict.
        let degenerate = vec![[1000.0, 0.0], [1000.0, 0.0], [1000.0, 0.0], [1000.0, 0.0]];
        let collection = FeatureCollection::new(vec![
            detection(degenerate, "bad", Some(0.5)),
            detection(square(1005.0, 1015.0, 0.0, -10.0), "good", Some(0.5)),
        ]);
        let merged = merge_adjacent_seam_polygons(&collection, &MergeConfig::default()).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.features[0].properties.text, "bad");
        assert_eq!(merged.features[1].properties.text, "good");
    }

    #[test]
    fn repair_collapses_duplicates_and_drops_non_finite_vertices() {
        let ring = vec![
            [0.0, 0.0],
            [0.0, 0.0],
            [f64::NAN, 1.0],
            [10.0, 0.0],
            [10.0, -10.0],
            [0.0, 0.0],
        ];
        let repaired = repair_ring(&ring).unwrap();
        assert_eq!(
            repaired,
            vec![[0.0, 0.0], [10.0, 0.0], [10.0, -10.0], [0.0, 0.0]]
        );
        assert_eq!(repair_ring(&[[1.0, 1.0], [1.0, 1.0]]), None);
    }

    #[test]
    fn bad_config_is_rejected_before_processing() {
        let cfg = MergeConfig {
            seam_spacing: 0.0,
            ..MergeConfig::default()
        };
        assert!(matches!(
            merge_adjacent_seam_polygons(&seam_pair(), &cfg),
            Err(Error::Config(_))
        ));
    }
}

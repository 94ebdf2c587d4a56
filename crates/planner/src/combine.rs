use std::fmt;

use penplot_geom::{GeomError, Pattern, Point, Stroke};

#[derive(Clone, Debug, PartialEq)]
pub struct CombineReport {
    /// How many strokes were spliced onto another one.
    pub merges: usize,
    pub lifts_before: usize,
    pub lifts_after: usize,
    pub tolerance: f64,
}

impl CombineReport {
    pub fn lifts_saved(&self) -> usize {
        self.lifts_before.saturating_sub(self.lifts_after)
    }
}

impl fmt::Display for CombineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Combine endpoints: merged {} links, pen lifts {} -> {} (saved {}), join_tol={} mm.",
            self.merges,
            self.lifts_before,
            self.lifts_after,
            self.lifts_saved(),
            self.tolerance
        )
    }
}

// Tries to attach `other` to one of the ends of `chain`, dropping the point
// they have in common.
fn splice(chain: &[Point], other: &[Point], tolerance: f64) -> Option<Vec<Point>> {
    let near = |a: Point, b: Point| (a - b).length() <= tolerance;
    let (head, tail) = (chain[0], chain[chain.len() - 1]);
    let (other_head, other_tail) = (other[0], other[other.len() - 1]);
    let other_but_head = &other[1..];
    let other_but_tail = &other[..other.len() - 1];

    let joined = if near(tail, other_head) {
        chain.iter().chain(other_but_head).copied().collect()
    } else if near(tail, other_tail) {
        chain
            .iter()
            .chain(other_but_tail.iter().rev())
            .copied()
            .collect()
    } else if near(head, other_tail) {
        other_but_tail.iter().chain(chain).copied().collect()
    } else if near(head, other_head) {
        other_but_head.iter().rev().chain(chain).copied().collect()
    } else {
        return None;
    };
    Some(joined)
}

/// Merges strokes of the same pen whose endpoints are within `tolerance` of
/// each other.
///
/// This is greedy: each not-yet-merged stroke seeds a chain, and the other
/// strokes are repeatedly scanned for something that can be attached to
/// either end of the chain (possibly reversed) until a full scan finds
/// nothing. The merged chain keeps the seed's pen, pressure and feed, and its
/// points are stored in traversal order.
pub fn combine_endpoints(
    pattern: &mut Pattern,
    tolerance: f64,
) -> Result<CombineReport, GeomError> {
    let strokes = std::mem::take(pattern).into_strokes();
    let lifts_before = strokes.len().saturating_sub(1);

    let mut pending: Vec<Option<Stroke>> = strokes
        .into_iter()
        .map(|s| Some(s.into_forward()))
        .collect();
    let mut merged = Vec::with_capacity(pending.len());
    let mut merges = 0;

    for i in 0..pending.len() {
        let Some(mut seed) = pending[i].take() else {
            continue;
        };
        let pen = seed.pen();
        let mut chain = seed.points().to_vec();

        let mut changed = true;
        while changed {
            changed = false;
            for slot in pending.iter_mut() {
                let Some(other) = slot else {
                    continue;
                };
                if other.pen() != pen {
                    continue;
                }
                if let Some(joined) = splice(&chain, other.points(), tolerance) {
                    chain = joined;
                    *slot = None;
                    merges += 1;
                    changed = true;
                }
            }
        }

        seed.rewrite_points(|_| chain)?;
        merged.push(seed);
    }

    *pattern = merged.into_iter().collect();
    let report = CombineReport {
        merges,
        lifts_before,
        lifts_after: pattern.len().saturating_sub(1),
        tolerance,
    };
    log::debug!("{report}");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use penplot_geom::{Orientation, Shape, StrokeStyle};

    fn pt(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    fn pattern(strokes: &[&[(f64, f64)]]) -> Pattern {
        let mut p = Pattern::new();
        for s in strokes {
            p.add(Shape::polyline(s.iter().map(|&(x, y)| pt(x, y))))
                .unwrap();
        }
        p
    }

    fn points(p: &Pattern) -> Vec<Vec<(f64, f64)>> {
        p.iter()
            .map(|s| s.oriented().map(|q| (q.x, q.y)).collect())
            .collect()
    }

    #[test]
    fn two_touching_segments() {
        let mut p = pattern(&[&[(0.0, 0.0), (1.0, 0.0)], &[(1.0, 0.0), (2.0, 0.0)]]);
        let report = combine_endpoints(&mut p, 0.05).unwrap();
        assert_eq!(report.merges, 1);
        assert_eq!(report.lifts_before, 1);
        assert_eq!(report.lifts_after, 0);
        assert_eq!(points(&p), vec![vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]]);
        assert_eq!(
            report.to_string(),
            "Combine endpoints: merged 1 links, pen lifts 1 -> 0 (saved 1), join_tol=0.05 mm."
        );
    }

    #[test]
    fn all_four_cases() {
        // tail to tail
        let mut p = pattern(&[&[(0.0, 0.0), (1.0, 0.0)], &[(2.0, 0.0), (1.0, 0.0)]]);
        combine_endpoints(&mut p, 0.05).unwrap();
        assert_eq!(points(&p), vec![vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]]);

        // head to tail
        let mut p = pattern(&[&[(1.0, 0.0), (2.0, 0.0)], &[(0.0, 0.0), (1.0, 0.0)]]);
        combine_endpoints(&mut p, 0.05).unwrap();
        assert_eq!(points(&p), vec![vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]]);

        // head to head
        let mut p = pattern(&[&[(1.0, 0.0), (2.0, 0.0)], &[(1.0, 0.0), (0.0, 0.0)]]);
        combine_endpoints(&mut p, 0.05).unwrap();
        assert_eq!(points(&p), vec![vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]]);
    }

    #[test]
    fn within_tolerance_only() {
        let mut p = pattern(&[&[(0.0, 0.0), (1.0, 0.0)], &[(1.1, 0.0), (2.0, 0.0)]]);
        let report = combine_endpoints(&mut p, 0.05).unwrap();
        assert_eq!(report.merges, 0);
        assert_eq!(p.len(), 2);

        let report = combine_endpoints(&mut p, 0.2).unwrap();
        assert_eq!(report.merges, 1);
        assert_eq!(points(&p), vec![vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]]);
    }

    #[test]
    fn pens_stay_separate() {
        let mut p = Pattern::new();
        p.add(Shape::line(pt(0.0, 0.0), pt(1.0, 0.0))).unwrap();
        p.add(
            Shape::line(pt(1.0, 0.0), pt(2.0, 0.0))
                .with_style(StrokeStyle::default().with_pen(1)),
        )
        .unwrap();
        let report = combine_endpoints(&mut p, 0.05).unwrap();
        assert_eq!(report.merges, 0);
        assert_eq!(p.len(), 2);
    }

    #[test]
    fn chain_grows_both_ways_and_keeps_seed_style() {
        let mut p = Pattern::new();
        let seed = StrokeStyle::default().with_pressure(-0.3).with_feed(900);
        p.add(Shape::line(pt(1.0, 0.0), pt(2.0, 0.0)).with_style(seed))
            .unwrap();
        p.add(Shape::line(pt(3.0, 0.0), pt(2.0, 0.0))).unwrap();
        p.add(Shape::line(pt(0.0, 0.0), pt(1.0, 0.0))).unwrap();
        p.add(Shape::line(pt(3.0, 0.0), pt(4.0, 0.0))).unwrap();

        let report = combine_endpoints(&mut p, 0.05).unwrap();
        assert_eq!(report.merges, 3);
        assert_eq!(report.lifts_saved(), 3);
        assert_eq!(
            points(&p),
            vec![vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (3.0, 0.0), (4.0, 0.0)]]
        );
        let s = p.iter().next().unwrap();
        assert_eq!(s.style(), seed);
        assert_eq!(s.orientation(), Orientation::Forward);
    }

    #[test]
    fn reversed_strokes_are_materialized() {
        let mut p = pattern(&[&[(1.0, 0.0), (0.0, 0.0)], &[(5.0, 5.0), (6.0, 6.0)]]);
        p.iter_mut().next().unwrap().reverse();
        combine_endpoints(&mut p, 0.05).unwrap();
        assert_eq!(
            points(&p),
            vec![vec![(0.0, 0.0), (1.0, 0.0)], vec![(5.0, 5.0), (6.0, 6.0)]]
        );
        assert_eq!(p.iter().next().unwrap().orientation(), Orientation::Forward);
    }
}

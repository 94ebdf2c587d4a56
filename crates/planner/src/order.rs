use std::fmt;

use penplot_geom::{Orientation, Pattern, Point, Stroke};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrderReport {
    pub travel_before: f64,
    pub travel_after: f64,
}

impl OrderReport {
    pub fn saved(&self) -> f64 {
        (self.travel_before - self.travel_after).max(0.0)
    }

    pub fn saved_percent(&self) -> f64 {
        if self.travel_before > 0.0 {
            self.saved() / self.travel_before * 100.0
        } else {
            0.0
        }
    }
}

impl fmt::Display for OrderReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Optimize order: nn, travel {:.2} -> {:.2} mm, saved {:.2} mm ({:.1} percent).",
            self.travel_before,
            self.travel_after,
            self.saved(),
            self.saved_percent()
        )
    }
}

/// Pen-up travel needed to draw the pattern in its current order, starting
/// from `start`.
pub fn travel_distance(pattern: &Pattern, start: Point) -> f64 {
    let mut cur = start;
    let mut total = 0.0;
    for stroke in pattern {
        let (head, tail) = stroke.endpoints();
        total += (head - cur).length();
        cur = tail;
    }
    total
}

/// Reorders the pattern with a greedy nearest-neighbor tour.
///
/// Starting at `start`, repeatedly picks the unvisited stroke with an
/// endpoint closest to the current position, orienting it so that it starts
/// at that endpoint. Ties go to the stroke that came first, and to the
/// forward orientation. This is quadratic in the number of strokes.
pub fn optimize_order_nn(pattern: &mut Pattern, start: Point) -> OrderReport {
    let travel_before = travel_distance(pattern, start);

    let mut remaining: Vec<Stroke> = std::mem::take(pattern).into_strokes();
    let mut ordered = Vec::with_capacity(remaining.len());
    let mut cur = start;

    while !remaining.is_empty() {
        let mut best = (0, f64::INFINITY, Orientation::Forward);
        for (i, stroke) in remaining.iter().enumerate() {
            // Measure from the stored ends, so that strokes that were already
            // reversed are treated the same as any other.
            let pts = stroke.points();
            let d_fwd = (pts[0] - cur).length();
            let d_rev = (pts[pts.len() - 1] - cur).length();
            let (cost, orientation) = if d_fwd <= d_rev {
                (d_fwd, Orientation::Forward)
            } else {
                (d_rev, Orientation::Reversed)
            };
            if cost < best.1 {
                best = (i, cost, orientation);
            }
        }

        let mut stroke = remaining.remove(best.0);
        stroke.set_orientation(best.2);
        cur = stroke.endpoints().1;
        ordered.push(stroke);
    }

    *pattern = ordered.into_iter().collect();
    let report = OrderReport {
        travel_before,
        travel_after: travel_distance(pattern, start),
    };
    log::debug!("{report}");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use penplot_geom::Shape;

    fn pt(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    fn fixture() -> Pattern {
        let mut p = Pattern::new();
        // far
        p.add(Shape::line(pt(100.0, 100.0), pt(110.0, 100.0))).unwrap();
        // middle, drawn backwards relative to the tour
        p.add(Shape::line(pt(30.0, 0.0), pt(20.0, 0.0))).unwrap();
        // near
        p.add(Shape::line(pt(1.0, 1.0), pt(10.0, 1.0))).unwrap();
        p
    }

    #[test]
    fn picks_nearest_first() {
        let mut p = fixture();
        let start = pt(0.0, 0.0);
        let before = travel_distance(&p, start);
        let report = optimize_order_nn(&mut p, start);

        let order: Vec<_> = p.iter().map(|s| s.endpoints()).collect();
        assert_eq!(
            order,
            vec![
                (pt(1.0, 1.0), pt(10.0, 1.0)),
                (pt(20.0, 0.0), pt(30.0, 0.0)),
                (pt(100.0, 100.0), pt(110.0, 100.0)),
            ]
        );
        assert_eq!(p.iter().nth(1).unwrap().orientation(), Orientation::Reversed);
        assert_eq!(report.travel_before, before);
        assert!(report.travel_after <= before);
        assert!(report.saved() > 0.0);
        assert!(report.to_string().starts_with("Optimize order: nn, travel "));
    }

    #[test]
    fn ties_go_to_the_first_stroke() {
        let mut p = Pattern::new();
        p.add(Shape::line(pt(1.0, 0.0), pt(2.0, 0.0))).unwrap();
        p.add(Shape::line(pt(-1.0, 0.0), pt(-2.0, 0.0))).unwrap();
        p.add(Shape::line(pt(0.0, 1.0), pt(0.0, -1.0))).unwrap();
        optimize_order_nn(&mut p, pt(0.0, 0.0));
        let heads: Vec<_> = p.iter().map(|s| s.endpoints().0).collect();
        assert_eq!(heads[0], pt(1.0, 0.0));
    }

    #[test]
    fn forward_wins_ties_within_a_stroke() {
        let mut p = Pattern::new();
        p.add(Shape::line(pt(1.0, 0.0), pt(-1.0, 0.0))).unwrap();
        optimize_order_nn(&mut p, pt(0.0, 0.0));
        assert_eq!(p.iter().next().unwrap().orientation(), Orientation::Forward);
    }

    #[test]
    fn already_reversed_strokes() {
        let mut p = Pattern::new();
        p.add(Shape::line(pt(0.0, 0.0), pt(10.0, 0.0))).unwrap();
        p.iter_mut().next().unwrap().reverse();
        optimize_order_nn(&mut p, pt(0.0, 0.0));
        let s = p.iter().next().unwrap();
        assert_eq!(s.endpoints().0, pt(0.0, 0.0));
    }

    #[test]
    fn travel() {
        let p = fixture();
        let d = travel_distance(&p, pt(0.0, 0.0));
        let expected = pt(100.0, 100.0).to_vector().length()
            + (pt(30.0, 0.0) - pt(110.0, 100.0)).length()
            + (pt(1.0, 1.0) - pt(20.0, 0.0)).length();
        assert!((d - expected).abs() < 1e-9);
        assert_eq!(travel_distance(&Pattern::new(), pt(0.0, 0.0)), 0.0);
    }
}

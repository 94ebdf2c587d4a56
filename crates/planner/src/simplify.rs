use std::fmt;

use penplot_geom::{GeomError, Pattern, Point, MAX_SEGMENTS};
use serde::{Deserialize, Serialize};

/// Parameters for [`resample_polylines`]. A pass whose parameter is unset
/// (or not positive) is skipped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResampleParams {
    /// Maximum allowed deviation of the simplified stroke, in millimeters.
    pub max_deviation: Option<f64>,
    /// Maximum segment length, in millimeters.
    pub max_segment: Option<f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResampleReport {
    pub strokes: usize,
    pub points_before: usize,
    pub points_after: usize,
    /// Strokes with fewer than two points. They stay in the pattern but will
    /// never be drawn.
    pub degenerate: usize,
    pub params: ResampleParams,
}

struct Param(Option<f64>);

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(x) => write!(f, "{x}"),
            None => f.write_str("none"),
        }
    }
}

impl fmt::Display for ResampleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.strokes == 0 {
            return f.write_str("Resample: no polylines.");
        }
        let ratio = self.points_after as f64 / self.points_before.max(1) as f64;
        write!(
            f,
            "Resample: {} polylines, points {} -> {} (x{ratio:.2}), max_dev={}, max_seg={}.",
            self.strokes,
            self.points_before,
            self.points_after,
            Param(self.params.max_deviation),
            Param(self.params.max_segment),
        )?;
        if self.degenerate > 0 {
            write!(f, " Skipping {} degenerate strokes.", self.degenerate)?;
        }
        Ok(())
    }
}

fn distance_to_segment(p: Point, a: Point, b: Point) -> f64 {
    let d = b - a;
    let len2 = d.square_length();
    if len2 == 0.0 {
        return (p - a).length();
    }
    let t = ((p - a).dot(d) / len2).clamp(0.0, 1.0);
    (p - (a + d * t)).length()
}

/// Ramer-Douglas-Peucker simplification.
///
/// The endpoints are always kept, and the output is a subsequence of the
/// input.
pub fn rdp(points: &[Point], epsilon: f64) -> Vec<Point> {
    if points.len() <= 2 {
        return points.to_vec();
    }
    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut stack = vec![(0, points.len() - 1)];
    while let Some((start, end)) = stack.pop() {
        let (a, b) = (points[start], points[end]);
        let mut farthest = None;
        let mut max_dist = -1.0;
        for (i, p) in points.iter().enumerate().take(end).skip(start + 1) {
            let d = distance_to_segment(*p, a, b);
            if d > max_dist {
                max_dist = d;
                farthest = Some(i);
            }
        }
        if let Some(i) = farthest {
            if max_dist > epsilon {
                keep[i] = true;
                stack.push((start, i));
                stack.push((i, end));
            }
        }
    }

    points
        .iter()
        .zip(keep)
        .filter_map(|(p, k)| k.then_some(*p))
        .collect()
}

/// Inserts evenly spaced points so that no segment is longer than `max_len`.
///
/// Fails if the result would have more than [`MAX_SEGMENTS`] segments.
pub fn split_long(points: &[Point], max_len: f64) -> Result<Vec<Point>, GeomError> {
    let Some(&first) = points.first() else {
        return Ok(Vec::new());
    };
    let mut ret = vec![first];
    for w in points.windows(2) {
        let (a, b) = (w[0], w[1]);
        let len = (b - a).length();
        if max_len <= 0.0 || len <= max_len {
            ret.push(b);
            continue;
        }
        let n = (len / max_len).ceil().max(1.0);
        let room = (MAX_SEGMENTS + 1).saturating_sub(ret.len());
        if !(n <= room as f64) {
            return Err(GeomError::InvalidShape(format!(
                "splitting at {max_len} mm needs more than {MAX_SEGMENTS} segments"
            )));
        }
        let n = n as usize;
        ret.extend((1..=n).map(|k| a.lerp(b, k as f64 / n as f64)));
    }
    Ok(ret)
}

fn positive(x: Option<f64>) -> Option<f64> {
    x.filter(|x| *x > 0.0)
}

/// Simplifies and then splits every stroke in the pattern.
pub fn resample_polylines(
    pattern: &mut Pattern,
    params: &ResampleParams,
) -> Result<ResampleReport, GeomError> {
    let mut report = ResampleReport {
        strokes: 0,
        points_before: 0,
        points_after: 0,
        degenerate: 0,
        params: *params,
    };

    for stroke in pattern.iter_mut() {
        report.strokes += 1;
        report.points_before += stroke.len();
        let mut out = stroke.points().to_vec();
        if let Some(eps) = positive(params.max_deviation) {
            out = rdp(&out, eps);
        }
        if let Some(max_len) = positive(params.max_segment) {
            out = split_long(&out, max_len)?;
        }
        stroke.rewrite_points(|_| out)?;
        report.points_after += stroke.len();
        if !stroke.is_drawable() {
            report.degenerate += 1;
        }
    }

    log::debug!("{report}");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use penplot_geom::Shape;
    use proptest::prelude::*;

    fn pt(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn rdp_drops_collinear_points() {
        let pts = vec![pt(0.0, 0.0), pt(1.0, 0.001), pt(2.0, 0.0), pt(3.0, 1.0)];
        assert_eq!(rdp(&pts, 0.01), vec![pt(0.0, 0.0), pt(2.0, 0.0), pt(3.0, 1.0)]);
        assert_eq!(rdp(&pts, 0.0), pts);
    }

    #[test]
    fn rdp_measures_to_the_segment() {
        // The middle point projects beyond the chord's end, so its distance is
        // measured to the endpoint rather than to the infinite line.
        let pts = vec![pt(0.0, 0.0), pt(3.0, 0.0), pt(1.0, 0.0)];
        assert_eq!(rdp(&pts, 1.5), pts);
        assert_eq!(rdp(&pts, 2.5), vec![pt(0.0, 0.0), pt(1.0, 0.0)]);
    }

    #[test]
    fn rdp_closed_loop() {
        let pts = vec![pt(0.0, 0.0), pt(1.0, 0.0), pt(1.0, 1.0), pt(0.0, 0.0)];
        assert_eq!(rdp(&pts, 0.1), pts);
    }

    #[test]
    fn split() {
        let pts = vec![pt(0.0, 0.0), pt(1.0, 0.0), pt(1.0, 0.0)];
        assert_eq!(split_long(&pts, 2.0).unwrap(), pts);

        let pts = vec![pt(0.0, 0.0), pt(10.0, 0.0)];
        let out = split_long(&pts, 3.0).unwrap();
        assert_eq!(out.len(), 5);
        assert_eq!(out[0], pt(0.0, 0.0));
        assert_eq!(out[4], pt(10.0, 0.0));
        for w in out.windows(2) {
            assert!((w[1] - w[0]).length() <= 3.0 + 1e-12);
        }
        assert!(split_long(&[], 1.0).unwrap().is_empty());
    }

    #[test]
    fn split_has_a_segment_limit() {
        let pts = vec![pt(0.0, 0.0), pt(1e300, 0.0)];
        assert!(matches!(
            split_long(&pts, 1e-300),
            Err(GeomError::InvalidShape(_))
        ));

        // Many pieces that are each under the limit add up.
        let pts: Vec<_> = (0..4).map(|i| pt(i as f64 * 1000.0, 0.0)).collect();
        assert!(split_long(&pts, 0.002).is_err());
        assert!(split_long(&pts, 0.01).is_ok());

        let mut p = Pattern::new();
        p.add(Shape::line(pt(0.0, 0.0), pt(1e9, 0.0))).unwrap();
        let before = p.clone();
        let params = ResampleParams {
            max_deviation: None,
            max_segment: Some(1e-3),
        };
        assert!(resample_polylines(&mut p, &params).is_err());
        assert_eq!(p, before);
    }

    #[test]
    fn report() {
        let mut p = Pattern::new();
        p.add(Shape::polyline([pt(0.0, 0.0), pt(1.0, 0.0), pt(2.0, 0.0)]))
            .unwrap();
        p.add(Shape::polyline([pt(5.0, 5.0)])).unwrap();
        let params = ResampleParams {
            max_deviation: Some(0.05),
            max_segment: None,
        };
        let report = resample_polylines(&mut p, &params).unwrap();
        assert_eq!(report.points_before, 4);
        assert_eq!(report.points_after, 3);
        assert_eq!(report.degenerate, 1);
        assert_eq!(
            report.to_string(),
            "Resample: 2 polylines, points 4 -> 3 (x0.75), max_dev=0.05, max_seg=none. \
             Skipping 1 degenerate strokes."
        );

        let mut empty = Pattern::new();
        let report = resample_polylines(&mut empty, &params).unwrap();
        assert_eq!(report.to_string(), "Resample: no polylines.");
    }

    #[test]
    fn nonpositive_params_are_ignored() {
        let mut p = Pattern::new();
        p.add(Shape::polyline([pt(0.0, 0.0), pt(1.0, 0.0), pt(2.0, 0.0)]))
            .unwrap();
        let before = p.clone();
        let params = ResampleParams {
            max_deviation: Some(0.0),
            max_segment: Some(-1.0),
        };
        resample_polylines(&mut p, &params).unwrap();
        assert_eq!(p, before);
    }

    fn arb_points() -> impl Strategy<Value = Vec<Point>> {
        prop::collection::vec((-50.0..50.0f64, -50.0..50.0f64), 1..40)
            .prop_map(|v| v.into_iter().map(|(x, y)| pt(x, y)).collect())
    }

    proptest! {
        #[test]
        fn rdp_keeps_endpoints_and_is_a_subsequence(pts in arb_points(), eps in 0.0..20.0f64) {
            let out = rdp(&pts, eps);
            prop_assert_eq!(out.first(), pts.first());
            prop_assert_eq!(out.last(), pts.last());

            let mut remaining = pts.iter();
            for p in &out {
                prop_assert!(remaining.any(|q| q == p));
            }
        }

        #[test]
        fn split_bounds_segment_length(pts in arb_points(), max_len in 0.5..20.0f64) {
            let out = split_long(&pts, max_len).unwrap();
            prop_assert_eq!(out.first(), pts.first());
            prop_assert_eq!(out.last(), pts.last());
            for w in out.windows(2) {
                prop_assert!((w[1] - w[0]).length() <= max_len + 1e-9);
            }
        }
    }
}

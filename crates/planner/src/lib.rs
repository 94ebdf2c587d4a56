//! Toolpath optimization for pen plots.
//!
//! There are three passes, and when more than one is requested they always
//! run in the same order:
//!
//! 1. [`combine_endpoints`] glues strokes whose endpoints touch into longer
//!    chains, so the pen is lifted less often.
//! 2. [`resample_polylines`] simplifies strokes (Ramer-Douglas-Peucker) and
//!    then splits segments that are too long.
//! 3. [`optimize_order_nn`] reorders (and possibly reverses) strokes with a
//!    greedy nearest-neighbor tour, to cut down on pen-up travel.
//!
//! Each pass returns a small report that formats as a human-readable status
//! line.

use penplot_geom::{GeomError, Pattern, Point};
use serde::{Deserialize, Serialize};

mod combine;
mod order;
mod simplify;

pub use combine::{combine_endpoints, CombineReport};
pub use order::{optimize_order_nn, travel_distance, OrderReport};
pub use simplify::{rdp, resample_polylines, split_long, ResampleParams, ResampleReport};

/// The endpoint tolerance used when combining is requested without an
/// explicit one, in millimeters.
pub const DEFAULT_JOIN_TOLERANCE: f64 = 0.05;

/// Which passes to run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanOptions {
    /// Combine strokes whose endpoints are within this distance.
    pub combine: Option<f64>,
    pub resample: Option<ResampleParams>,
    /// Reorder strokes with a nearest-neighbor tour.
    pub reorder: bool,
    /// Where the pen starts, for the purposes of reordering.
    pub start: Point,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            combine: None,
            resample: None,
            reorder: false,
            start: Point::origin(),
        }
    }
}

impl PlanOptions {
    pub fn with_combine(mut self, tolerance: f64) -> Self {
        self.combine = Some(tolerance);
        self
    }

    pub fn with_resample(mut self, params: ResampleParams) -> Self {
        self.resample = Some(params);
        self
    }

    pub fn with_reorder(mut self, start: Point) -> Self {
        self.reorder = true;
        self.start = start;
        self
    }
}

/// What the requested passes did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlanReport {
    pub combine: Option<CombineReport>,
    pub resample: Option<ResampleReport>,
    pub order: Option<OrderReport>,
}

impl PlanReport {
    /// One status line per pass that ran, in the order they ran.
    pub fn messages(&self) -> Vec<String> {
        let mut ret = Vec::new();
        if let Some(c) = &self.combine {
            ret.push(c.to_string());
        }
        if let Some(r) = &self.resample {
            ret.push(r.to_string());
        }
        if let Some(o) = &self.order {
            ret.push(o.to_string());
        }
        ret
    }
}

/// Runs the requested passes on `pattern`, in place.
pub fn plan(pattern: &mut Pattern, options: &PlanOptions) -> Result<PlanReport, GeomError> {
    let mut report = PlanReport::default();
    if let Some(tol) = options.combine {
        report.combine = Some(combine_endpoints(pattern, tol)?);
    }
    if let Some(params) = &options.resample {
        report.resample = Some(resample_polylines(pattern, params)?);
    }
    if options.reorder {
        report.order = Some(optimize_order_nn(pattern, options.start));
    }
    for msg in report.messages() {
        log::info!("{msg}");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use penplot_geom::Shape;

    fn pt(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn passes_run_in_order() {
        let mut p = Pattern::new();
        p.add(Shape::polyline([pt(50.0, 0.0), pt(50.0, 10.0)])).unwrap();
        p.add(Shape::polyline([pt(0.0, 0.0), pt(5.0, 0.0)])).unwrap();
        p.add(Shape::polyline([pt(5.0, 0.0), pt(10.0, 0.0)])).unwrap();

        let opts = PlanOptions::default()
            .with_combine(DEFAULT_JOIN_TOLERANCE)
            .with_resample(ResampleParams {
                max_deviation: Some(0.01),
                max_segment: None,
            })
            .with_reorder(pt(0.0, 0.0));
        let report = plan(&mut p, &opts).unwrap();

        assert_eq!(report.combine.as_ref().unwrap().merges, 1);
        // The collinear middle point of the merged chain is simplified away.
        assert_eq!(report.resample.as_ref().unwrap().points_after, 4);
        assert_eq!(p.len(), 2);
        assert_eq!(p.iter().next().unwrap().endpoints().0, pt(0.0, 0.0));

        let msgs = report.messages();
        assert_eq!(msgs.len(), 3);
        assert!(msgs[0].starts_with("Combine endpoints"));
        assert!(msgs[1].starts_with("Resample"));
        assert!(msgs[2].starts_with("Optimize order"));
    }

    #[test]
    fn nothing_requested() {
        let mut p = Pattern::new();
        p.add(Shape::line(pt(1.0, 1.0), pt(2.0, 2.0))).unwrap();
        let before = p.clone();
        let report = plan(&mut p, &PlanOptions::default()).unwrap();
        assert!(report.messages().is_empty());
        assert_eq!(p, before);
    }

    #[test]
    fn options_from_json() {
        let opts: PlanOptions =
            serde_json::from_str(r#"{"combine": 0.1, "reorder": true, "start": [5, 5]}"#).unwrap();
        assert_eq!(opts.combine, Some(0.1));
        assert!(opts.reorder);
        assert_eq!(opts.start, pt(5.0, 5.0));
        assert_eq!(opts.resample, None);
    }
}

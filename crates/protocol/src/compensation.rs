use penplot_geom::{Box2D, Point};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Pen-down heights measured at the four corners of a rectangle, bilinearly
/// interpolated in between.
///
/// Heights are normalized pen positions: the height at which the pen just
/// touches the paper at that corner.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSurface", into = "RawSurface")]
pub struct CompensationSurface {
    area: Box2D,
    bottom_left: f64,
    bottom_right: f64,
    top_left: f64,
    top_right: f64,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
struct RawSurface {
    min: Point,
    max: Point,
    bottom_left: f64,
    bottom_right: f64,
    top_left: f64,
    top_right: f64,
}

impl TryFrom<RawSurface> for CompensationSurface {
    type Error = Error;

    fn try_from(raw: RawSurface) -> Result<Self> {
        CompensationSurface::new(
            Box2D::new(raw.min, raw.max),
            [raw.bottom_left, raw.bottom_right, raw.top_left, raw.top_right],
        )
    }
}

impl From<CompensationSurface> for RawSurface {
    fn from(s: CompensationSurface) -> Self {
        RawSurface {
            min: s.area.min,
            max: s.area.max,
            bottom_left: s.bottom_left,
            bottom_right: s.bottom_right,
            top_left: s.top_left,
            top_right: s.top_right,
        }
    }
}

impl CompensationSurface {
    /// Creates a surface from its area and the heights at the bottom-left,
    /// bottom-right, top-left and top-right corners, in that order.
    ///
    /// "Bottom" is the `min.y` edge of the area.
    pub fn new(area: Box2D, heights: [f64; 4]) -> Result<Self> {
        let coords = [area.min.x, area.min.y, area.max.x, area.max.y];
        if coords.iter().any(|c| !c.is_finite()) || area.max.x < area.min.x || area.max.y < area.min.y
        {
            return Err(Error::Configuration(format!(
                "malformed compensation area {area:?}"
            )));
        }
        if let Some(h) = heights.iter().find(|h| !(0.0..=1.0).contains(*h)) {
            return Err(Error::Configuration(format!(
                "compensation heights must be in [0, 1], got {h}"
            )));
        }
        let [bottom_left, bottom_right, top_left, top_right] = heights;
        Ok(Self {
            area,
            bottom_left,
            bottom_right,
            top_left,
            top_right,
        })
    }

    /// A surface with the same height everywhere.
    pub fn flat(area: Box2D, height: f64) -> Result<Self> {
        Self::new(area, [height; 4])
    }

    pub fn area(&self) -> Box2D {
        self.area
    }

    /// The pen-down height at `p`. Points outside the area get the height of
    /// the nearest point on its boundary.
    pub fn height_at(&self, p: Point) -> f64 {
        let p = p.clamp(self.area.min, self.area.max);
        let size = self.area.size();
        if size.width <= 0.0 || size.height <= 0.0 {
            return self.bottom_left;
        }
        let u = (p.x - self.area.min.x) / size.width;
        let v = (p.y - self.area.min.y) / size.height;
        (1.0 - u) * (1.0 - v) * self.bottom_left
            + u * (1.0 - v) * self.bottom_right
            + (1.0 - u) * v * self.top_left
            + u * v * self.top_right
    }
}

/// Adds a pressure offset to a base height, clamping into `[0, 1]`.
///
/// Driving the pen below zero is almost always a calibration mistake, so it
/// gets a warning (but isn't an error).
pub fn apply_offset(base: f64, offset: f64) -> f64 {
    let v = base + offset;
    if v < 0.0 {
        log::warn!(
            "pressure offset drives the pen below 0.0 (base {base:.3} + {offset:.3}), clipping to 0.0"
        );
        return 0.0;
    }
    v.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn surface() -> CompensationSurface {
        CompensationSurface::new(
            Box2D::new(Point::new(10.0, 20.0), Point::new(110.0, 220.0)),
            [0.1, 0.2, 0.3, 0.6],
        )
        .unwrap()
    }

    #[test]
    fn corners_and_center() {
        let s = surface();
        assert_eq!(s.height_at(Point::new(10.0, 20.0)), 0.1);
        assert_eq!(s.height_at(Point::new(110.0, 20.0)), 0.2);
        assert_eq!(s.height_at(Point::new(10.0, 220.0)), 0.3);
        assert_eq!(s.height_at(Point::new(110.0, 220.0)), 0.6);
        assert!((s.height_at(Point::new(60.0, 120.0)) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn outside_is_clamped() {
        let s = surface();
        assert_eq!(s.height_at(Point::new(-50.0, -50.0)), 0.1);
        assert_eq!(s.height_at(Point::new(500.0, 1000.0)), 0.6);
    }

    #[test]
    fn degenerate_area() {
        let s = CompensationSurface::new(
            Box2D::new(Point::new(10.0, 20.0), Point::new(10.0, 220.0)),
            [0.4, 0.2, 0.3, 0.6],
        )
        .unwrap();
        assert_eq!(s.height_at(Point::new(10.0, 100.0)), 0.4);
        assert_eq!(s.height_at(Point::new(0.0, 0.0)), 0.4);
    }

    #[test]
    fn malformed() {
        let area = Box2D::new(Point::new(10.0, 20.0), Point::new(0.0, 220.0));
        assert!(matches!(
            CompensationSurface::new(area, [0.0; 4]),
            Err(Error::Configuration(_))
        ));
        let area = Box2D::new(Point::new(0.0, 0.0), Point::new(1.0, 1.0));
        assert!(CompensationSurface::new(area, [0.0, 1.5, 0.0, 0.0]).is_err());
        assert!(CompensationSurface::new(area, [0.0, f64::NAN, 0.0, 0.0]).is_err());

        let json = r#"{"min": [0, 0], "max": [1, 1], "bottom_left": 0.2, "bottom_right": 0.2,
                       "top_left": 0.2, "top_right": -1.0}"#;
        assert!(serde_json::from_str::<CompensationSurface>(json).is_err());
    }

    #[test]
    fn from_json() {
        let json = r#"{"min": [0, 0], "max": [100, 50], "bottom_left": 0.2, "bottom_right": 0.4,
                       "top_left": 0.2, "top_right": 0.4}"#;
        let s: CompensationSurface = serde_json::from_str(json).unwrap();
        assert!((s.height_at(Point::new(50.0, 10.0)) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn offsets() {
        assert_eq!(apply_offset(0.5, -0.1), 0.4);
        assert_eq!(apply_offset(0.05, -0.1), 0.0);
        assert_eq!(apply_offset(0.95, 0.2), 1.0);
    }

    proptest! {
        #[test]
        fn stays_within_corner_range(
            x in -100.0..300.0f64,
            y in -100.0..300.0f64,
            h in prop::array::uniform4(0.0..=1.0f64),
        ) {
            let area = Box2D::new(Point::new(0.0, 0.0), Point::new(200.0, 100.0));
            let s = CompensationSurface::new(area, h).unwrap();
            let lo = h.iter().cloned().fold(f64::INFINITY, f64::min);
            let hi = h.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let z = s.height_at(Point::new(x, y));
            prop_assert!(z >= lo - 1e-12 && z <= hi + 1e-12);
        }
    }
}

//! Geometry of a pen plot: millimeter-typed points, strokes, and patterns.
//!
//! Everything a plotter draws ends up as a [`Stroke`]: an ordered list of
//! points plus the pen metadata (which pen, how hard to press, how fast to
//! draw). Lines, arcs and raw point lists are normalized into strokes as soon
//! as they are added to a [`Pattern`], so the rest of the system only ever
//! deals with one primitive.
//!
//! Coordinates are in millimeters on the plotter bed, with `y` growing away
//! from the home corner.

use serde::{Deserialize, Serialize};

mod pattern;
mod stroke;

pub use pattern::{Pattern, StrokeRecord};
pub use stroke::{Arc, OrientedPoints, Orientation, Shape, Stroke, StrokeStyle};

/// Unit marker for bed coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mm;

pub type Point = euclid::Point2D<f64, Mm>;
pub type Vector = euclid::Vector2D<f64, Mm>;
pub type Box2D = euclid::Box2D<f64, Mm>;
pub type Angle = euclid::Angle<f64>;

/// The pressure used when a shape doesn't ask for one. Negative values push
/// the pen slightly below the compensated surface.
pub const DEFAULT_PRESSURE: f64 = -0.1;

/// The default chord length used to polygonize arcs, in millimeters.
pub const DEFAULT_CHORD_TOLERANCE: f64 = 0.3;

/// The most segments a single stroke may be cut into when an arc is
/// polygonized or a long segment is split.
pub const MAX_SEGMENTS: usize = 1_000_000;

/// Preview colors for pens 0 through 8.
pub const PEN_COLORS: [&str; 9] = [
    "#111111", "#e41a1c", "#377eb8", "#4daf4a", "#984ea3", "#ff7f00", "#a65628", "#f781bf",
    "#999999",
];

/// The preview color of a pen. Pens without a color of their own get pen 0's.
pub fn pen_color(pen: u32) -> &'static str {
    PEN_COLORS
        .get(pen as usize)
        .copied()
        .unwrap_or(PEN_COLORS[0])
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum GeomError {
    /// A shape that can't be turned into a stroke, like an arc with a
    /// negative radius.
    #[error("invalid shape: {0}")]
    InvalidShape(String),

    /// Stroke data that breaks the stroke invariants, like an empty point
    /// list or a non-finite coordinate.
    #[error("invalid stroke: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pen_colors() {
        assert_eq!(pen_color(0), "#111111");
        assert_eq!(pen_color(2), "#377eb8");
        assert_eq!(pen_color(8), "#999999");
        assert_eq!(pen_color(42), "#111111");
    }
}

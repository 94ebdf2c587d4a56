use serde::{Deserialize, Serialize};

use crate::{
    Angle, GeomError, Point, DEFAULT_CHORD_TOLERANCE, DEFAULT_PRESSURE, MAX_SEGMENTS,
};

/// Which way a stroke's points are traversed.
///
/// Reversing a stroke only flips this flag; the stored points keep their
/// original order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Forward,
    Reversed,
}

impl Orientation {
    pub fn flipped(self) -> Self {
        match self {
            Orientation::Forward => Orientation::Reversed,
            Orientation::Reversed => Orientation::Forward,
        }
    }
}

/// Pen metadata shared by every shape kind.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrokeStyle {
    /// Which pen to draw with. Selects the preview color.
    pub pen: u32,
    /// Offset added to the compensated height while drawing, in normalized
    /// pen units.
    pub pressure: f64,
    /// Draw feed override in mm/min.
    pub feed: Option<u32>,
}

impl Default for StrokeStyle {
    fn default() -> Self {
        Self {
            pen: 0,
            pressure: DEFAULT_PRESSURE,
            feed: None,
        }
    }
}

impl StrokeStyle {
    pub fn with_pen(mut self, pen: u32) -> Self {
        self.pen = pen;
        self
    }

    pub fn with_pressure(mut self, pressure: f64) -> Self {
        self.pressure = pressure;
        self
    }

    pub fn with_feed(mut self, feed: u32) -> Self {
        self.feed = Some(feed);
        self
    }
}

/// A drawable polyline.
///
/// A stroke always has at least one point, and all of its coordinates are
/// finite. Strokes with a single point are legal (the optimizer can produce
/// them) but they are never drawn.
#[derive(Clone, Debug, PartialEq)]
pub struct Stroke {
    points: Vec<Point>,
    style: StrokeStyle,
    orientation: Orientation,
}

fn check_points(points: &[Point]) -> Result<(), GeomError> {
    if points.is_empty() {
        return Err(GeomError::Validation("stroke has no points".to_owned()));
    }
    if let Some(p) = points.iter().find(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(GeomError::Validation(format!(
            "non-finite coordinate ({}, {})",
            p.x, p.y
        )));
    }
    Ok(())
}

impl Stroke {
    pub fn new(points: Vec<Point>, style: StrokeStyle) -> Result<Self, GeomError> {
        check_points(&points)?;
        Ok(Self {
            points,
            style,
            orientation: Orientation::Forward,
        })
    }

    /// The points in storage order, ignoring the orientation.
    pub fn points(&self) -> &[Point] {
        &self.points
    }

    /// The points in traversal order.
    pub fn oriented(&self) -> OrientedPoints<'_> {
        OrientedPoints {
            inner: self.points.iter(),
            orientation: self.orientation,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Can this stroke actually be drawn?
    pub fn is_drawable(&self) -> bool {
        self.points.len() >= 2
    }

    /// The number of drawn segments.
    pub fn segment_count(&self) -> usize {
        self.points.len().saturating_sub(1)
    }

    pub fn style(&self) -> StrokeStyle {
        self.style
    }

    pub fn pen(&self) -> u32 {
        self.style.pen
    }

    pub fn pressure(&self) -> f64 {
        self.style.pressure
    }

    pub fn feed(&self) -> Option<u32> {
        self.style.feed
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn set_orientation(&mut self, orientation: Orientation) {
        self.orientation = orientation;
    }

    pub fn reverse(&mut self) {
        self.orientation = self.orientation.flipped();
    }

    /// The first and last points in traversal order.
    pub fn endpoints(&self) -> (Point, Point) {
        let first = self.points[0];
        let last = self.points[self.points.len() - 1];
        match self.orientation {
            Orientation::Forward => (first, last),
            Orientation::Reversed => (last, first),
        }
    }

    /// Sum of the segment lengths.
    pub fn length(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| (w[1] - w[0]).length())
            .sum()
    }

    /// The arithmetic mean of the points.
    pub fn centroid(&self) -> Point {
        let sum = self
            .points
            .iter()
            .fold(crate::Vector::zero(), |acc, p| acc + p.to_vector());
        (sum / self.points.len() as f64).to_point()
    }

    /// Returns the same stroke with its points physically stored in
    /// traversal order, and a forward orientation.
    pub fn into_forward(mut self) -> Self {
        if self.orientation == Orientation::Reversed {
            self.points.reverse();
            self.orientation = Orientation::Forward;
        }
        self
    }

    /// Replaces the stored points with `f(points)`.
    ///
    /// The result must satisfy the stroke invariants; if it doesn't, the
    /// stroke is left untouched and the error is returned.
    pub fn rewrite_points(
        &mut self,
        f: impl FnOnce(&[Point]) -> Vec<Point>,
    ) -> Result<(), GeomError> {
        let points = f(&self.points);
        check_points(&points)?;
        self.points = points;
        Ok(())
    }
}

/// Iterator over a stroke's points in traversal order.
#[derive(Clone, Debug)]
pub struct OrientedPoints<'a> {
    inner: std::slice::Iter<'a, Point>,
    orientation: Orientation,
}

impl Iterator for OrientedPoints<'_> {
    type Item = Point;

    fn next(&mut self) -> Option<Point> {
        match self.orientation {
            Orientation::Forward => self.inner.next().copied(),
            Orientation::Reversed => self.inner.next_back().copied(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl DoubleEndedIterator for OrientedPoints<'_> {
    fn next_back(&mut self) -> Option<Point> {
        match self.orientation {
            Orientation::Forward => self.inner.next_back().copied(),
            Orientation::Reversed => self.inner.next().copied(),
        }
    }
}

impl ExactSizeIterator for OrientedPoints<'_> {}

/// A circular arc, which gets polygonized when it's added to a pattern.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Arc {
    pub center: Point,
    pub radius: f64,
    pub start: Angle,
    /// Signed sweep; positive is counter-clockwise.
    pub sweep: Angle,
    /// Maximum chord length of the polygonization, in millimeters.
    pub chord_tolerance: f64,
    /// Traverse from the end angle back to the start angle.
    pub reversed: bool,
    pub style: StrokeStyle,
}

impl Arc {
    /// A full counter-clockwise circle starting at angle zero.
    pub fn circle(center: Point, radius: f64) -> Self {
        Self {
            center,
            radius,
            start: Angle::zero(),
            sweep: Angle::degrees(360.0),
            chord_tolerance: DEFAULT_CHORD_TOLERANCE,
            reversed: false,
            style: StrokeStyle::default(),
        }
    }

    pub fn with_angles(mut self, start: Angle, sweep: Angle) -> Self {
        self.start = start;
        self.sweep = sweep;
        self
    }

    pub fn with_chord_tolerance(mut self, tol: f64) -> Self {
        self.chord_tolerance = tol;
        self
    }

    pub fn with_style(mut self, style: StrokeStyle) -> Self {
        self.style = style;
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reversed = !self.reversed;
        self
    }

    fn point_at(&self, angle: f64) -> Point {
        Point::new(
            self.center.x + self.radius * angle.cos(),
            self.center.y + self.radius * angle.sin(),
        )
    }

    /// Samples the arc at equally spaced angles.
    ///
    /// The number of segments is the arc length divided by the chord
    /// tolerance, rounded up, and at least 3. Arcs that would need more than
    /// [`MAX_SEGMENTS`] segments are rejected. A reversed arc swaps its start
    /// and end angles before sampling.
    pub fn polygonize(&self) -> Result<Vec<Point>, GeomError> {
        if !self.radius.is_finite() || self.radius <= 0.0 {
            return Err(GeomError::InvalidShape(format!(
                "arc radius must be positive, got {}",
                self.radius
            )));
        }
        if !self.chord_tolerance.is_finite() || self.chord_tolerance <= 0.0 {
            return Err(GeomError::InvalidShape(format!(
                "chord tolerance must be positive, got {}",
                self.chord_tolerance
            )));
        }
        if !self.center.x.is_finite()
            || !self.center.y.is_finite()
            || !self.start.radians.is_finite()
            || !self.sweep.radians.is_finite()
        {
            return Err(GeomError::InvalidShape("non-finite arc parameters".to_owned()));
        }

        let arc_len = self.sweep.radians.abs() * self.radius;
        let n = (arc_len / self.chord_tolerance).ceil();
        if !(n <= MAX_SEGMENTS as f64) {
            return Err(GeomError::InvalidShape(format!(
                "arc needs {n} segments, the limit is {MAX_SEGMENTS}"
            )));
        }
        let n = (n as usize).max(3);

        let mut from = self.start.radians;
        let mut to = self.start.radians + self.sweep.radians;
        if self.reversed {
            std::mem::swap(&mut from, &mut to);
        }

        Ok((0..=n)
            .map(|k| {
                let t = k as f64 / n as f64;
                self.point_at(from + (to - from) * t)
            })
            .collect())
    }
}

/// The shapes that a pattern accepts.
#[derive(Clone, Debug, PartialEq)]
pub enum Shape {
    Line {
        from: Point,
        to: Point,
        style: StrokeStyle,
    },
    Arc(Arc),
    Polyline {
        points: Vec<Point>,
        style: StrokeStyle,
    },
}

impl Shape {
    pub fn line(from: Point, to: Point) -> Self {
        Shape::Line {
            from,
            to,
            style: StrokeStyle::default(),
        }
    }

    pub fn polyline(points: impl IntoIterator<Item = Point>) -> Self {
        Shape::Polyline {
            points: points.into_iter().collect(),
            style: StrokeStyle::default(),
        }
    }

    pub fn with_style(mut self, new_style: StrokeStyle) -> Self {
        match &mut self {
            Shape::Line { style, .. } | Shape::Polyline { style, .. } => *style = new_style,
            Shape::Arc(arc) => arc.style = new_style,
        }
        self
    }

    /// Normalizes this shape into a stroke.
    pub fn into_stroke(self) -> Result<Stroke, GeomError> {
        match self {
            Shape::Line { from, to, style } => Stroke::new(vec![from, to], style)
                .map_err(|e| GeomError::InvalidShape(format!("line: {e}"))),
            Shape::Arc(arc) => Stroke::new(arc.polygonize()?, arc.style),
            Shape::Polyline { points, style } => {
                if points.is_empty() {
                    return Err(GeomError::InvalidShape("polyline has no points".to_owned()));
                }
                Stroke::new(points, style)
                    .map_err(|e| GeomError::InvalidShape(format!("polyline: {e}")))
            }
        }
    }
}

impl From<Arc> for Shape {
    fn from(arc: Arc) -> Self {
        Shape::Arc(arc)
    }
}

impl From<Stroke> for Shape {
    fn from(stroke: Stroke) -> Self {
        let style = stroke.style();
        Shape::Polyline {
            points: stroke.oriented().collect(),
            style,
        }
    }
}

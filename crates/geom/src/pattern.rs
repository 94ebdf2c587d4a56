use serde::{Deserialize, Serialize};

use crate::{Box2D, GeomError, Point, Shape, Stroke, StrokeStyle, DEFAULT_PRESSURE};

/// A stroke as it crosses the boundary with the outside world.
///
/// This is the format of pattern files, and of the strokes handed to preview
/// collaborators. Points are `[x, y]` pairs in traversal order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrokeRecord {
    pub points: Vec<Point>,
    #[serde(default)]
    pub pen: u32,
    #[serde(default)]
    pub feed: Option<u32>,
    #[serde(default = "default_pressure")]
    pub pressure: f64,
}

fn default_pressure() -> f64 {
    DEFAULT_PRESSURE
}

impl StrokeRecord {
    fn from_stroke(stroke: &Stroke) -> Self {
        StrokeRecord {
            points: stroke.oriented().collect(),
            pen: stroke.pen(),
            feed: stroke.feed(),
            pressure: stroke.pressure(),
        }
    }
}

/// An ordered collection of strokes.
///
/// The order of the strokes is the order in which they will be drawn,
/// unless an optimizer pass reorders them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pattern {
    strokes: Vec<Stroke>,
}

impl Pattern {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes a shape into a stroke and appends it.
    pub fn add(&mut self, shape: impl Into<Shape>) -> Result<&mut Self, GeomError> {
        let stroke = shape.into().into_stroke()?;
        self.strokes.push(stroke);
        Ok(self)
    }

    /// Adds many shapes, stopping at the first one that fails to normalize.
    pub fn extend<S: Into<Shape>>(
        &mut self,
        shapes: impl IntoIterator<Item = S>,
    ) -> Result<&mut Self, GeomError> {
        for shape in shapes {
            self.add(shape)?;
        }
        Ok(self)
    }

    pub fn push(&mut self, stroke: Stroke) -> &mut Self {
        self.strokes.push(stroke);
        self
    }

    pub fn len(&self) -> usize {
        self.strokes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Stroke> {
        self.strokes.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Stroke> {
        self.strokes.iter_mut()
    }

    pub fn into_strokes(self) -> Vec<Stroke> {
        self.strokes
    }

    /// The smallest box containing every point, or `None` if there are no
    /// points at all.
    pub fn bounding_box(&self) -> Option<Box2D> {
        let mut points = self.strokes.iter().flat_map(|s| s.points().iter());
        let first = *points.next()?;
        Some(points.fold(Box2D::new(first, first), |b, p| {
            Box2D::new(b.min.min(*p), b.max.max(*p))
        }))
    }

    /// The total drawn length, in millimeters.
    pub fn total_length(&self) -> f64 {
        self.strokes.iter().map(Stroke::length).sum()
    }

    /// Does the pattern fit on a bed of the given size, with its corner at
    /// the origin?
    pub fn fits_within(&self, width: f64, height: f64) -> bool {
        const TOL: f64 = 1e-6;
        match self.bounding_box() {
            None => true,
            Some(b) => {
                b.min.x >= -TOL && b.min.y >= -TOL && b.max.x <= width + TOL && b.max.y <= height + TOL
            }
        }
    }

    /// The drawable strokes, with their points in traversal order.
    ///
    /// Strokes with fewer than two points are skipped.
    pub fn strokes(&self) -> impl Iterator<Item = StrokeRecord> + '_ {
        self.strokes
            .iter()
            .filter(|s| s.is_drawable())
            .map(StrokeRecord::from_stroke)
    }

    /// Every stroke in boundary format, including degenerate ones.
    pub fn records(&self) -> Vec<StrokeRecord> {
        self.strokes.iter().map(StrokeRecord::from_stroke).collect()
    }

    pub fn from_records(
        records: impl IntoIterator<Item = StrokeRecord>,
    ) -> Result<Self, GeomError> {
        let strokes = records
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                let style = StrokeStyle {
                    pen: r.pen,
                    pressure: r.pressure,
                    feed: r.feed,
                };
                if !r.pressure.is_finite() {
                    return Err(GeomError::Validation(format!(
                        "stroke {i}: non-finite pressure"
                    )));
                }
                Stroke::new(r.points, style).map_err(|e| match e {
                    GeomError::Validation(msg) => GeomError::Validation(format!("stroke {i}: {msg}")),
                    e => e,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Pattern { strokes })
    }
}

impl FromIterator<Stroke> for Pattern {
    fn from_iter<I: IntoIterator<Item = Stroke>>(iter: I) -> Self {
        Pattern {
            strokes: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Pattern {
    type Item = &'a Stroke;
    type IntoIter = std::slice::Iter<'a, Stroke>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

//! SVG previews of what a run is going to draw.

use penplot_geom::{pen_color, Box2D, Point, StrokeRecord};
use svg::{
    node::element::{path::Data, Group, Path, Rectangle},
    Document,
};

/// Draws each stroke in its pen's color, inside the outline of `bed`.
///
/// The y axis is flipped, so the picture looks like the paper does from
/// above. Strokes with fewer than two points are skipped.
pub fn render(strokes: &[StrokeRecord], bed: Box2D) -> Document {
    let size = bed.size();
    let mut paths = Group::new().set(
        "transform",
        format!("translate(0,{}) scale(1,-1)", bed.max.y + bed.min.y),
    );
    paths = paths.add(
        Rectangle::new()
            .set("x", bed.min.x as f32)
            .set("y", bed.min.y as f32)
            .set("width", size.width as f32)
            .set("height", size.height as f32)
            .set("fill", "none")
            .set("stroke", "#cccccc")
            .set("stroke-width", 0.5),
    );

    let cvt = |p: &Point| (p.x as f32, p.y as f32);
    for stroke in strokes {
        let [first, rest @ ..] = stroke.points.as_slice() else {
            continue;
        };
        if rest.is_empty() {
            continue;
        }
        let data = rest
            .iter()
            .fold(Data::new().move_to(cvt(first)), |d, p| d.line_to(cvt(p)));
        paths = paths.add(
            Path::new()
                .set("fill", "none")
                .set("stroke", pen_color(stroke.pen))
                .set("stroke-width", 0.4)
                .set("stroke-linecap", "round")
                .set("stroke-linejoin", "round")
                .set("d", data),
        );
    }

    Document::new()
        .set(
            "viewBox",
            (
                (bed.min.x - 5.0) as f32,
                (bed.min.y - 5.0) as f32,
                (size.width + 10.0) as f32,
                (size.height + 10.0) as f32,
            ),
        )
        .set("width", format!("{}mm", size.width + 10.0))
        .set("height", format!("{}mm", size.height + 10.0))
        .add(paths)
}

pub fn save(path: &std::path::Path, strokes: &[StrokeRecord], bed: Box2D) -> std::io::Result<()> {
    svg::save(path, &render(strokes, bed))
}

//! Polygon geometry for annotations, in full-resolution pixel coordinates.
//!
//! Rings are closed implicitly (the last vertex connects back to the first).
//! Exterior rings of traced regions run clockwise on screen (y grows downwards),
//! which gives them a positive shoelace area; holes run the other way.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounds, `max` exclusive in the pixel sense.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    fn union(self, other: Bounds) -> Bounds {
        Bounds {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// An integer pixel rectangle, used for crop regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Smallest pixel rectangle covering `bounds`, clipped to a `width` x `height` image.
    pub fn covering(bounds: Bounds, width: u32, height: u32) -> Self {
        let clamp = |v: f64, max: u32| v.max(0.0).min(max as f64) as u32;
        let x0 = clamp(bounds.min_x.floor(), width);
        let y0 = clamp(bounds.min_y.floor(), height);
        let x1 = clamp(bounds.max_x.ceil(), width);
        let y1 = clamp(bounds.max_y.ceil(), height);
        Self::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

/// Signed shoelace area of a closed ring.
pub fn ring_area(ring: &[Point]) -> f64 {
    if ring.len() < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for (i, p) in ring.iter().enumerate() {
        let q = ring[(i + 1) % ring.len()];
        sum += p.x * q.y - q.x * p.y;
    }
    sum / 2.0
}

fn ring_bounds(ring: &[Point]) -> Option<Bounds> {
    let first = ring.first()?;
    let init = Bounds {
        min_x: first.x,
        min_y: first.y,
        max_x: first.x,
        max_y: first.y,
    };
    Some(ring.iter().fold(init, |b, p| Bounds {
        min_x: b.min_x.min(p.x),
        min_y: b.min_y.min(p.y),
        max_x: b.max_x.max(p.x),
        max_y: b.max_y.max(p.y),
    }))
}

// Even-odd crossing test.
fn ring_contains(ring: &[Point], p: Point) -> bool {
    let mut inside = false;
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (ring[i], ring[j]);
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x;
            if p.x < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

/// A polygon with one exterior ring and zero or more holes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<Point>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub holes: Vec<Vec<Point>>,
}

impl Polygon {
    pub fn new(exterior: Vec<Point>, holes: Vec<Vec<Point>>) -> Self {
        Self { exterior, holes }
    }

    pub fn rectangle(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(
            vec![
                Point::new(x, y),
                Point::new(x + width, y),
                Point::new(x + width, y + height),
                Point::new(x, y + height),
            ],
            Vec::new(),
        )
    }

    pub fn area(&self) -> f64 {
        let holes: f64 = self.holes.iter().map(|h| ring_area(h).abs()).sum();
        ring_area(&self.exterior).abs() - holes
    }

    pub fn bounds(&self) -> Option<Bounds> {
        ring_bounds(&self.exterior)
    }

    pub fn contains(&self, p: Point) -> bool {
        ring_contains(&self.exterior, p) && !self.holes.iter().any(|h| ring_contains(h, p))
    }
}

/// Zero or more disjoint polygons treated as one geometry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MultiPolygon {
    pub polygons: Vec<Polygon>,
}

impl MultiPolygon {
    pub fn new(polygons: Vec<Polygon>) -> Self {
        Self { polygons }
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty()
    }

    pub fn area(&self) -> f64 {
        self.polygons.iter().map(Polygon::area).sum()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.polygons
            .iter()
            .filter_map(Polygon::bounds)
            .reduce(Bounds::union)
    }

    pub fn contains(&self, p: Point) -> bool {
        self.polygons.iter().any(|poly| poly.contains(p))
    }

    /// One single-part geometry per connected component.
    pub fn split(self) -> Vec<MultiPolygon> {
        self.polygons
            .into_iter()
            .map(|p| MultiPolygon::new(vec![p]))
            .collect()
    }
}

impl From<Polygon> for MultiPolygon {
    fn from(polygon: Polygon) -> Self {
        MultiPolygon::new(vec![polygon])
    }
}

/// A classified region on an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    pub geometry: MultiPolygon,
}

impl Annotation {
    pub fn new(class_name: Option<String>, geometry: MultiPolygon) -> Self {
        Self {
            id: Uuid::new_v4(),
            class_name,
            geometry,
        }
    }

    pub fn has_class(&self, name: &str) -> bool {
        self.class_name.as_deref() == Some(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_with_hole() -> Polygon {
        // 4x4 square with a 2x2 hole; hole runs counter-clockwise on screen.
        Polygon::new(
            Polygon::rectangle(0.0, 0.0, 4.0, 4.0).exterior,
            vec![vec![
                Point::new(1.0, 1.0),
                Point::new(1.0, 3.0),
                Point::new(3.0, 3.0),
                Point::new(3.0, 1.0),
            ]],
        )
    }

    #[test]
    fn clockwise_ring_has_positive_area() {
        let rect = Polygon::rectangle(0.0, 0.0, 3.0, 2.0);
        assert_eq!(ring_area(&rect.exterior), 6.0);
    }

    #[test]
    fn holes_are_subtracted_from_area() {
        assert_eq!(square_with_hole().area(), 12.0);
    }

    #[test]
    fn contains_respects_holes() {
        let poly = square_with_hole();
        assert!(poly.contains(Point::new(0.5, 0.5)));
        assert!(!poly.contains(Point::new(2.0, 2.0)));
        assert!(!poly.contains(Point::new(5.0, 2.0)));
    }

    #[test]
    fn multipolygon_bounds_cover_all_parts() {
        let mp = MultiPolygon::new(vec![
            Polygon::rectangle(1.0, 1.0, 2.0, 2.0),
            Polygon::rectangle(5.0, 0.0, 1.0, 6.0),
        ]);
        let b = mp.bounds().unwrap();
        assert_eq!((b.min_x, b.min_y, b.max_x, b.max_y), (1.0, 0.0, 6.0, 6.0));
        assert!(MultiPolygon::default().bounds().is_none());
    }

    #[test]
    fn split_keeps_total_area() {
        let mp = MultiPolygon::new(vec![
            Polygon::rectangle(0.0, 0.0, 2.0, 2.0),
            square_with_hole(),
        ]);
        let total = mp.area();
        let parts = mp.split();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts.iter().map(MultiPolygon::area).sum::<f64>(), total);
    }

    #[test]
    fn region_covering_is_clipped_to_image() {
        let bounds = Bounds {
            min_x: -2.5,
            min_y: 1.2,
            max_x: 7.1,
            max_y: 30.0,
        };
        assert_eq!(Region::covering(bounds, 10, 20), Region::new(0, 1, 8, 19));
    }

    #[test]
    fn annotation_serializes_without_empty_fields() {
        let anno = Annotation::new(None, Polygon::rectangle(0.0, 0.0, 1.0, 1.0).into());
        let json = serde_json::to_string(&anno).unwrap();
        assert!(!json.contains("class_name"));
        assert!(!json.contains("holes"));
    }
}

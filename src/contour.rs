//! Label-mask contour tracing.
//!
//! Pixels equal to a label are grouped into 8-connected components with
//! `imageproc`, and each component's boundary is walked along pixel edges.
//! Vertices land on pixel corners, so a traced polygon covers exactly the
//! pixels of its component.

use std::collections::{BTreeMap, HashMap};

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};

use crate::geometry::{MultiPolygon, Point, Polygon, ring_area};

/// Single-channel label raster; pixel value = label id, 0 = background.
pub type LabelMask = ImageBuffer<Luma<u16>, Vec<u16>>;

type Vertex = (i64, i64);
type Dir = (i64, i64);

#[derive(Debug, Clone, Copy)]
struct Edge {
    from: Vertex,
    dir: Dir,
}

impl Edge {
    fn to(&self) -> Vertex {
        (self.from.0 + self.dir.0, self.from.1 + self.dir.1)
    }
}

/// Trace every 8-connected region of `label` into one polygon each.
///
/// Returns an empty geometry when the label does not occur in the mask.
pub fn trace_label(mask: &LabelMask, label: u16) -> MultiPolygon {
    let (width, height) = mask.dimensions();
    // `connected_components` cannot label a lone foreground pixel.
    if u64::from(width) * u64::from(height) <= 1 {
        let polygons = mask
            .enumerate_pixels()
            .filter(|(_, _, px)| px[0] == label)
            .map(|(x, y, _)| Polygon::rectangle(x as f64, y as f64, 1.0, 1.0))
            .collect();
        return MultiPolygon::new(polygons);
    }
    let binary = GrayImage::from_fn(width, height, |x, y| {
        if mask.get_pixel(x, y)[0] == label {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    let components = connected_components(&binary, Connectivity::Eight, Luma([0u8]));

    // Boundary edges per component. A pixel side is a boundary when the
    // neighbour across it belongs to a different component (or is outside).
    let mut edges: BTreeMap<u32, Vec<Edge>> = BTreeMap::new();
    let component_at = |x: i64, y: i64| -> u32 {
        if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
            0
        } else {
            components.get_pixel(x as u32, y as u32)[0]
        }
    };
    for (x, y, px) in components.enumerate_pixels() {
        let id = px[0];
        if id == 0 {
            continue;
        }
        let (x, y) = (x as i64, y as i64);
        let list = edges.entry(id).or_default();
        if component_at(x, y - 1) != id {
            list.push(Edge { from: (x, y), dir: (1, 0) });
        }
        if component_at(x + 1, y) != id {
            list.push(Edge { from: (x + 1, y), dir: (0, 1) });
        }
        if component_at(x, y + 1) != id {
            list.push(Edge { from: (x + 1, y + 1), dir: (-1, 0) });
        }
        if component_at(x - 1, y) != id {
            list.push(Edge { from: (x, y + 1), dir: (0, -1) });
        }
    }

    let polygons = edges
        .into_values()
        .filter_map(|component_edges| assemble_polygon(link_rings(component_edges)))
        .collect();
    MultiPolygon::new(polygons)
}

/// Label ids present in the mask, ascending, background excluded.
pub fn labels_present(mask: &LabelMask) -> Vec<u16> {
    let mut seen: Vec<u16> = mask.pixels().map(|p| p[0]).filter(|&v| v != 0).collect();
    seen.sort_unstable();
    seen.dedup();
    seen
}

// Chain directed boundary edges into closed rings. At a vertex with two
// candidate exits (diagonally touching pixels) the left turn is taken, which
// keeps diagonal neighbours inside one ring.
fn link_rings(edges: Vec<Edge>) -> Vec<Vec<Point>> {
    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::new();
    for (i, e) in edges.iter().enumerate() {
        outgoing.entry(e.from).or_default().push(i);
    }
    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();

    for start in 0..edges.len() {
        if used[start] {
            continue;
        }
        let mut ring: Vec<Vertex> = Vec::new();
        let mut current = start;
        loop {
            used[current] = true;
            let edge = edges[current];
            ring.push(edge.from);
            let candidates: Vec<usize> = outgoing
                .get(&edge.to())
                .map(|c| c.iter().copied().filter(|&i| !used[i] || i == start).collect())
                .unwrap_or_default();
            match pick_exit(edge.dir, &candidates, &edges) {
                Some(i) if i != start => current = i,
                _ => break,
            }
        }
        rings.push(simplify(&ring));
    }
    rings
}

fn pick_exit(dir: Dir, candidates: &[usize], edges: &[Edge]) -> Option<usize> {
    let left = (dir.1, -dir.0);
    let right = (-dir.1, dir.0);
    [left, dir, right]
        .into_iter()
        .find_map(|preferred| candidates.iter().copied().find(|&i| edges[i].dir == preferred))
}

// Drop vertices that sit in the middle of a straight run.
fn simplify(ring: &[Vertex]) -> Vec<Point> {
    let n = ring.len();
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let prev = ring[(i + n - 1) % n];
        let cur = ring[i];
        let next = ring[(i + 1) % n];
        let d1 = (cur.0 - prev.0, cur.1 - prev.1);
        let d2 = (next.0 - cur.0, next.1 - cur.1);
        if d1 != d2 {
            out.push(Point::new(cur.0 as f64, cur.1 as f64));
        }
    }
    out
}

fn assemble_polygon(rings: Vec<Vec<Point>>) -> Option<Polygon> {
    let mut exterior: Option<(f64, Vec<Point>)> = None;
    let mut holes = Vec::new();
    for ring in rings {
        let area = ring_area(&ring);
        if area < 0.0 {
            holes.push(ring);
            continue;
        }
        match &exterior {
            Some((best, _)) if *best >= area => holes.push(ring),
            _ => {
                if let Some((_, previous)) = exterior.replace((area, ring)) {
                    holes.push(previous);
                }
            }
        }
    }
    exterior.map(|(_, ring)| Polygon::new(ring, holes))
}

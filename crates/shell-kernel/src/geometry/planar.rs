//! Planar (XY) predicates shared by triangulation, carving and attachment
//! placement.

use approx::AbsDiffEq;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Mul, Sub};

use super::vector::Vec3;

/// A point or direction in the layout plane.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn dot(&self, other: &Self) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Z component of the 3D cross product.
    pub fn cross(&self, other: &Self) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn length(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn length_squared(&self) -> f64 {
        self.dot(self)
    }

    pub fn distance_squared(&self, other: &Self) -> f64 {
        (*self - *other).length_squared()
    }

    /// Counter-clockwise perpendicular.
    pub fn perp(&self) -> Self {
        Self::new(-self.y, self.x)
    }

    pub fn normalized(&self) -> Option<Self> {
        let len = self.length();
        if len < 1e-15 || !len.is_finite() {
            None
        } else {
            Some(Self::new(self.x / len, self.y / len))
        }
    }

    pub fn extend(&self, z: f64) -> Vec3 {
        Vec3::new(self.x, self.y, z)
    }
}

impl From<Vec3> for Vec2 {
    fn from(v: Vec3) -> Self {
        Self::new(v.x, v.y)
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl AbsDiffEq for Vec2 {
    type Epsilon = f64;

    fn default_epsilon() -> f64 {
        1e-9
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: f64) -> bool {
        f64::abs_diff_eq(&self.x, &other.x, epsilon) && f64::abs_diff_eq(&self.y, &other.y, epsilon)
    }
}

// ── Polygons ─────────────────────────────────────────────────

/// Separating-axis test between two convex polygons. Touching counts as
/// intersecting.
pub fn polygons_intersect(a: &[Vec2], b: &[Vec2]) -> bool {
    !has_separating_edge(a, a, b) && !has_separating_edge(b, a, b)
}

fn has_separating_edge(edges: &[Vec2], a: &[Vec2], b: &[Vec2]) -> bool {
    let n = edges.len();
    (0..n).any(|i| {
        let Some(side) = (edges[i] - edges[(i + 1) % n]).normalized() else {
            return false;
        };
        let normal = side.perp();
        let (a_min, a_max) = project(a, &normal);
        let (b_min, b_max) = project(b, &normal);
        a_max < b_min || a_min > b_max
    })
}

fn project(poly: &[Vec2], axis: &Vec2) -> (f64, f64) {
    poly.iter()
        .map(|p| p.dot(axis))
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), d| {
            (lo.min(d), hi.max(d))
        })
}

/// Even-odd ray cast. A point equal to one of the polygon vertices is inside.
pub fn point_in_polygon(point: Vec2, poly: &[Vec2]) -> bool {
    if poly.contains(&point) {
        return true;
    }
    let mut inside = false;
    let mut j = poly.len().wrapping_sub(1);
    for i in 0..poly.len() {
        let (pi, pj) = (poly[i], poly[j]);
        if (pi.y > point.y) != (pj.y > point.y)
            && point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Signed area, positive for counter-clockwise polygons.
pub fn signed_area(poly: &[Vec2]) -> f64 {
    let n = poly.len();
    (0..n)
        .map(|i| poly[i].cross(&poly[(i + 1) % n]))
        .sum::<f64>()
        / 2.0
}

/// Twice the signed area of `(a, b, c)`; positive when counter-clockwise.
pub fn orient(a: Vec2, b: Vec2, c: Vec2) -> f64 {
    (b - a).cross(&(c - a))
}

pub fn point_in_triangle(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> bool {
    let d1 = orient(a, b, p);
    let d2 = orient(b, c, p);
    let d3 = orient(c, a, p);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

/// Proper crossing of segments `ab` and `cd`. Shared endpoints and collinear
/// overlaps are not crossings.
pub fn segments_cross(a: Vec2, b: Vec2, c: Vec2, d: Vec2) -> bool {
    let d1 = orient(c, d, a);
    let d2 = orient(c, d, b);
    let d3 = orient(a, b, c);
    let d4 = orient(a, b, d);
    d1 * d2 < 0.0 && d3 * d4 < 0.0
}

/// True when no two non-adjacent edges of the closed polyline cross.
pub fn is_simple_polygon(poly: &[Vec2]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }
    for i in 0..n {
        for j in (i + 2)..n {
            if i == 0 && j == n - 1 {
                continue;
            }
            if segments_cross(poly[i], poly[(i + 1) % n], poly[j], poly[(j + 1) % n]) {
                return false;
            }
        }
    }
    true
}

// ── Distances ────────────────────────────────────────────────

/// Squared distance from `p` to the segment `ab`.
pub fn sq_segment_distance(p: Vec2, a: Vec2, b: Vec2) -> f64 {
    let ab = b - a;
    let len_sq = ab.length_squared();
    if len_sq == 0.0 {
        return p.distance_squared(&a);
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    p.distance_squared(&(a + ab * t))
}

/// Squared distance between segments `p1q1` and `p2q2`.
pub fn sq_segment_segment_distance(p1: Vec2, q1: Vec2, p2: Vec2, q2: Vec2) -> f64 {
    if segments_cross(p1, q1, p2, q2) {
        return 0.0;
    }
    sq_segment_distance(p1, p2, q2)
        .min(sq_segment_distance(q1, p2, q2))
        .min(sq_segment_distance(p2, p1, q1))
        .min(sq_segment_distance(q2, p1, q1))
}

// ── Circles ──────────────────────────────────────────────────

/// Points where the segment `ab` crosses the circle, tested in XY. The
/// returned points keep the segment's Z.
pub fn line_circle_intersections(a: Vec3, b: Vec3, center: Vec3, radius: f64) -> Vec<Vec3> {
    let origin = center - b;
    let dir = a - b;
    let qa = dir.x * origin.x + dir.y * origin.y;
    let disc = (dir.x * radius).powi(2) + (dir.y * radius).powi(2)
        - (dir.x * origin.y - dir.y * origin.x).powi(2);
    let qc = dir.x * dir.x + dir.y * dir.y;
    if qc == 0.0 || disc < 0.0 {
        return Vec::new();
    }
    let qb = disc.sqrt();
    [(qa + qb) / qc, (qa - qb) / qc]
        .into_iter()
        .filter(|t| (0.0..=1.0).contains(t))
        .map(|t| b + dir * t)
        .collect()
}

pub fn triangle_circle_intersections(a: Vec3, b: Vec3, c: Vec3, center: Vec3, radius: f64) -> Vec<Vec3> {
    let mut hits = line_circle_intersections(a, b, center, radius);
    hits.extend(line_circle_intersections(b, c, center, radius));
    hits.extend(line_circle_intersections(c, a, center, radius));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(cx: f64, cy: f64, half: f64) -> Vec<Vec2> {
        vec![
            Vec2::new(cx - half, cy + half),
            Vec2::new(cx + half, cy + half),
            Vec2::new(cx + half, cy - half),
            Vec2::new(cx - half, cy - half),
        ]
    }

    #[test]
    fn test_overlapping_squares_intersect() {
        assert!(polygons_intersect(&square(0.0, 0.0, 1.0), &square(1.5, 0.0, 1.0)));
    }

    #[test]
    fn test_separated_squares_do_not_intersect() {
        assert!(!polygons_intersect(&square(0.0, 0.0, 1.0), &square(2.5, 0.0, 1.0)));
    }

    #[test]
    fn test_diagonal_gap_is_found() {
        // Bounding boxes overlap but the diamond edge separates them.
        let diamond = vec![
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, -1.0),
            Vec2::new(-1.0, 0.0),
        ];
        assert!(!polygons_intersect(&diamond, &square(1.2, 1.2, 0.5)));
    }

    #[test]
    fn test_point_in_polygon() {
        let sq = square(0.0, 0.0, 1.0);
        assert!(point_in_polygon(Vec2::new(0.2, -0.3), &sq));
        assert!(!point_in_polygon(Vec2::new(1.2, 0.0), &sq));
        assert!(point_in_polygon(sq[2], &sq));
    }

    #[test]
    fn test_signed_area_orientation() {
        let cw = square(0.0, 0.0, 1.0);
        assert!((signed_area(&cw) + 4.0).abs() < 1e-12);
        let ccw: Vec<Vec2> = cw.iter().rev().copied().collect();
        assert!((signed_area(&ccw) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_simple_polygon_detects_bowtie() {
        let bowtie = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 1.0),
        ];
        assert!(!is_simple_polygon(&bowtie));
        assert!(is_simple_polygon(&square(0.0, 0.0, 1.0)));
    }

    #[test]
    fn test_segment_distance() {
        let d = sq_segment_distance(Vec2::new(0.5, 2.0), Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0));
        assert!((d - 4.0).abs() < 1e-12);
        let end = sq_segment_distance(Vec2::new(3.0, 0.0), Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0));
        assert!((end - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_line_circle_intersections() {
        let hits = line_circle_intersections(
            Vec3::new(-2.0, 0.0, 1.0),
            Vec3::new(2.0, 0.0, 1.0),
            Vec3::ZERO,
            1.0,
        );
        assert_eq!(hits.len(), 2);
        for h in &hits {
            assert!((h.x.abs() - 1.0).abs() < 1e-12);
            assert!((h.z - 1.0).abs() < 1e-12);
        }
        let miss = line_circle_intersections(
            Vec3::new(-2.0, 3.0, 0.0),
            Vec3::new(2.0, 3.0, 0.0),
            Vec3::ZERO,
            1.0,
        );
        assert!(miss.is_empty());
    }

    #[test]
    fn test_triangle_circle_intersections() {
        let hits = triangle_circle_intersections(
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::new(0.0, 4.0, 0.0),
            Vec3::ZERO,
            2.0,
        );
        assert_eq!(hits.len(), 2);
    }
}

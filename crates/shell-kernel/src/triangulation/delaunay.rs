//! Constrained Delaunay triangulation of the flattened key corners.
//!
//! Points are inserted one at a time into a large enclosing triangle
//! (Bowyer-Watson). Missing constraint edges are then recovered by flipping
//! the edges that cross them, and the remaining free edges are flipped
//! until every one is locally Delaunay again.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, warn};

use crate::error::{ShellError, ShellResult};
use crate::geometry::planar::{Vec2, orient, point_in_triangle, segments_cross};

/// Points closer than this are merged before triangulating.
const MERGE_DISTANCE_SQ: f64 = 1e-18;
/// In-circle values at or below this do not trigger a flip.
const INCIRCLE_EPS: f64 = 1e-9;
/// Orientation values at or below this count as collinear.
const COLLINEAR_EPS: f64 = 1e-12;

/// Positive when `d` lies inside the circumcircle of the counter-clockwise
/// triangle `abc`.
pub fn in_circle(a: Vec2, b: Vec2, c: Vec2, d: Vec2) -> f64 {
    let (adx, ady) = (a.x - d.x, a.y - d.y);
    let (bdx, bdy) = (b.x - d.x, b.y - d.y);
    let (cdx, cdy) = (c.x - d.x, c.y - d.y);
    let ad = adx * adx + ady * ady;
    let bd = bdx * bdx + bdy * bdy;
    let cd = cdx * cdx + cdy * cdy;
    adx * (bdy * cd - bd * cdy) - ady * (bdx * cd - bd * cdx) + ad * (bdx * cdy - bdy * cdx)
}

/// Working mesh with tombstoned triangles and a directed-edge index.
struct Mesh {
    pts: Vec<Vec2>,
    tris: Vec<Option<[usize; 3]>>,
    edges: HashMap<(usize, usize), usize>,
}

impl Mesh {
    fn add(&mut self, t: [usize; 3]) -> usize {
        let idx = self.tris.len();
        for e in 0..3 {
            self.edges.insert((t[e], t[(e + 1) % 3]), idx);
        }
        self.tris.push(Some(t));
        idx
    }

    fn kill(&mut self, idx: usize) {
        if let Some(t) = self.tris[idx].take() {
            for e in 0..3 {
                let key = (t[e], t[(e + 1) % 3]);
                if self.edges.get(&key) == Some(&idx) {
                    self.edges.remove(&key);
                }
            }
        }
    }

    /// Triangle holding the directed edge `a→b`, and its third vertex.
    fn opposite(&self, a: usize, b: usize) -> Option<(usize, usize)> {
        let &idx = self.edges.get(&(a, b))?;
        let t = self.tris[idx]?;
        let third = t.into_iter().find(|&v| v != a && v != b)?;
        Some((idx, third))
    }

    fn has_edge(&self, a: usize, b: usize) -> bool {
        self.edges.contains_key(&(a, b)) || self.edges.contains_key(&(b, a))
    }

    /// Flip the diagonal `ab` of the quad formed by its two triangles when
    /// that quad is strictly convex. Returns the new diagonal.
    fn flip(&mut self, a: usize, b: usize) -> Option<(usize, usize)> {
        let (t1, c) = self.opposite(a, b)?;
        let (t2, d) = self.opposite(b, a)?;
        let (pa, pb, pc, pd) = (self.pts[a], self.pts[b], self.pts[c], self.pts[d]);
        // Convex when c and d straddle ab and a and b straddle cd.
        if orient(pc, pd, pa) * orient(pc, pd, pb) >= 0.0 || orient(pa, pb, pc) * orient(pa, pb, pd) >= 0.0 {
            return None;
        }
        self.kill(t1);
        self.kill(t2);
        self.add([a, d, c]);
        self.add([d, b, c]);
        Some((c, d))
    }

    fn alive(&self) -> impl Iterator<Item = (usize, [usize; 3])> + '_ {
        self.tris.iter().enumerate().filter_map(|(i, t)| t.map(|t| (i, t)))
    }

    fn insert_point(&mut self, p: usize) -> ShellResult<()> {
        let pp = self.pts[p];
        let start = self
            .alive()
            .find(|&(_, [a, b, c])| point_in_triangle(pp, self.pts[a], self.pts[b], self.pts[c]))
            .map(|(i, _)| i)
            .ok_or_else(|| ShellError::Triangulation {
                reason: format!("point {p} is outside the enclosing triangle"),
            })?;

        // Grow the cavity from the containing triangle through neighbours
        // whose circumcircle contains the new point.
        let mut cavity = HashSet::from([start]);
        let mut frontier = vec![start];
        while let Some(idx) = frontier.pop() {
            let Some(t) = self.tris[idx] else { continue };
            for e in 0..3 {
                let (u, v) = (t[e], t[(e + 1) % 3]);
                if let Some((n, _)) = self.opposite(v, u) {
                    if cavity.contains(&n) {
                        continue;
                    }
                    if let Some([a, b, c]) = self.tris[n] {
                        if in_circle(self.pts[a], self.pts[b], self.pts[c], pp) > 0.0 {
                            cavity.insert(n);
                            frontier.push(n);
                        }
                    }
                }
            }
        }

        let mut rim = Vec::new();
        for &idx in &cavity {
            if let Some(t) = self.tris[idx] {
                for e in 0..3 {
                    let (u, v) = (t[e], t[(e + 1) % 3]);
                    let outside = self.opposite(v, u).is_none_or(|(n, _)| !cavity.contains(&n));
                    if outside {
                        rim.push((u, v));
                    }
                }
            }
        }
        for idx in cavity {
            self.kill(idx);
        }
        for (u, v) in rim {
            self.add([u, v, p]);
        }
        Ok(())
    }

    /// Directed boundary edges of the live triangles.
    fn rim(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for (_, t) in self.alive() {
            for e in 0..3 {
                let (u, v) = (t[e], t[(e + 1) % 3]);
                if !self.edges.contains_key(&(v, u)) {
                    out.push((u, v));
                }
            }
        }
        out
    }

    /// Close reflex corners of the outer boundary left behind by removing
    /// the enclosing triangle.
    fn fill_hull(&mut self, real: &[usize]) {
        for _ in 0..real.len() * 2 {
            let next: HashMap<usize, usize> = self.rim().into_iter().collect();
            let mut added = false;
            for (&a, &b) in &next {
                let Some(&c) = next.get(&b) else { continue };
                if a == c {
                    continue;
                }
                let (pa, pb, pc) = (self.pts[a], self.pts[b], self.pts[c]);
                if orient(pa, pb, pc) >= -COLLINEAR_EPS {
                    continue;
                }
                let blocked = real.iter().any(|&q| {
                    q != a && q != b && q != c && point_in_triangle(self.pts[q], pa, pc, pb)
                });
                if blocked {
                    continue;
                }
                self.add([a, c, b]);
                added = true;
                break;
            }
            if !added {
                return;
            }
        }
    }

    /// Recover the edge `ab` by flipping every edge that crosses it.
    fn recover(&mut self, a: usize, b: usize, constrained: &HashSet<(usize, usize)>) -> ShellResult<bool> {
        if self.has_edge(a, b) {
            return Ok(true);
        }
        let (pa, pb) = (self.pts[a], self.pts[b]);
        let on_segment = (0..self.pts.len()).any(|q| {
            if q == a || q == b {
                return false;
            }
            let pq = self.pts[q];
            orient(pa, pb, pq).abs() <= COLLINEAR_EPS
                && (pq - pa).dot(&(pb - pa)) > 0.0
                && (pq - pb).dot(&(pa - pb)) > 0.0
        });
        if on_segment {
            return Ok(false);
        }

        let mut queue: VecDeque<(usize, usize)> = VecDeque::new();
        let mut seen = HashSet::new();
        for (_, t) in self.alive() {
            for e in 0..3 {
                let (u, v) = (t[e], t[(e + 1) % 3]);
                let key = (u.min(v), u.max(v));
                if seen.insert(key) && segments_cross(self.pts[u], self.pts[v], pa, pb) {
                    queue.push_back((u, v));
                }
            }
        }

        let cap = 100 * (queue.len() + 1) * (queue.len() + 1);
        let mut steps = 0;
        while let Some((u, v)) = queue.pop_front() {
            steps += 1;
            if steps > cap {
                return Err(ShellError::Triangulation {
                    reason: format!("could not recover constraint edge {a}-{b}"),
                });
            }
            if constrained.contains(&(u.min(v), u.max(v))) {
                return Err(ShellError::Triangulation {
                    reason: format!("constraint edges {a}-{b} and {u}-{v} cross"),
                });
            }
            match self.flip(u, v) {
                Some((c, d)) => {
                    if segments_cross(self.pts[c], self.pts[d], pa, pb) {
                        queue.push_back((c, d));
                    }
                }
                None => queue.push_back((u, v)),
            }
        }
        Ok(self.has_edge(a, b))
    }

    /// Flip free edges until every one is locally Delaunay.
    fn restore_delaunay(&mut self, constrained: &HashSet<(usize, usize)>) {
        let mut stack: Vec<(usize, usize)> = self
            .alive()
            .flat_map(|(_, t)| (0..3).map(move |e| (t[e], t[(e + 1) % 3])))
            .collect();
        let cap = 50 * stack.len().max(1) * stack.len().max(1);
        let mut steps = 0;
        while let Some((u, v)) = stack.pop() {
            steps += 1;
            if steps > cap {
                warn!(steps, "delaunay restoration did not settle");
                return;
            }
            if constrained.contains(&(u.min(v), u.max(v))) {
                continue;
            }
            let (Some((_, c)), Some((_, d))) = (self.opposite(u, v), self.opposite(v, u)) else {
                continue;
            };
            if in_circle(self.pts[u], self.pts[v], self.pts[c], self.pts[d]) <= INCIRCLE_EPS {
                continue;
            }
            if self.flip(u, v).is_some() {
                stack.extend([(u, d), (d, v), (v, c), (c, u)]);
            }
        }
    }
}

/// Triangulate `points`, keeping every `constraints` edge. Triangles are
/// counter-clockwise. Coincident points are merged onto the first of them,
/// so a merged index never appears in the output.
pub fn triangulate(points: &[Vec2], constraints: &[(usize, usize)]) -> ShellResult<Vec<[usize; 3]>> {
    if points.len() < 3 {
        return Err(ShellError::degenerate(format!(
            "need at least 3 points to triangulate, got {}",
            points.len()
        )));
    }
    if points.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(ShellError::degenerate("key corner has a non-finite coordinate"));
    }

    let mut representative: Vec<usize> = (0..points.len()).collect();
    let mut unique: Vec<usize> = Vec::new();
    for i in 0..points.len() {
        match unique
            .iter()
            .find(|&&j| points[i].distance_squared(&points[j]) < MERGE_DISTANCE_SQ)
        {
            Some(&j) => representative[i] = j,
            None => unique.push(i),
        }
    }
    if unique.len() < 3 {
        return Err(ShellError::degenerate("fewer than 3 distinct points"));
    }
    let p0 = points[unique[0]];
    let far = unique
        .iter()
        .copied()
        .max_by(|&a, &b| p0.distance_squared(&points[a]).total_cmp(&p0.distance_squared(&points[b])))
        .unwrap_or(unique[0]);
    if unique
        .iter()
        .all(|&q| orient(p0, points[far], points[q]).abs() <= COLLINEAR_EPS)
    {
        return Err(ShellError::degenerate("all points are collinear"));
    }

    let (mut min, mut max) = (Vec2::new(f64::INFINITY, f64::INFINITY), Vec2::new(f64::NEG_INFINITY, f64::NEG_INFINITY));
    for &i in &unique {
        min = Vec2::new(min.x.min(points[i].x), min.y.min(points[i].y));
        max = Vec2::new(max.x.max(points[i].x), max.y.max(points[i].y));
    }
    let span = (max.x - min.x).max(max.y - min.y).max(1.0) * 100.0;
    let center = Vec2::new((min.x + max.x) / 2.0, (min.y + max.y) / 2.0);
    let n = points.len();
    let mut pts = points.to_vec();
    pts.push(Vec2::new(center.x - 20.0 * span, center.y - span));
    pts.push(Vec2::new(center.x + 20.0 * span, center.y - span));
    pts.push(Vec2::new(center.x, center.y + 20.0 * span));

    let mut mesh = Mesh {
        pts,
        tris: Vec::new(),
        edges: HashMap::new(),
    };
    mesh.add([n, n + 1, n + 2]);
    for &p in &unique {
        mesh.insert_point(p)?;
    }
    let outer: Vec<usize> = mesh
        .alive()
        .filter(|(_, t)| t.iter().any(|&v| v >= n))
        .map(|(i, _)| i)
        .collect();
    for idx in outer {
        mesh.kill(idx);
    }
    mesh.fill_hull(&unique);

    let mut constrained = HashSet::new();
    let mut skipped = 0;
    for &(a, b) in constraints {
        let (a, b) = (representative[a], representative[b]);
        if a == b {
            continue;
        }
        if mesh.recover(a, b, &constrained)? {
            constrained.insert((a.min(b), a.max(b)));
        } else {
            skipped += 1;
        }
    }
    if skipped > 0 {
        warn!(skipped, "constraint edges pass through other points and were dropped");
    }
    mesh.restore_delaunay(&constrained);

    let out: Vec<[usize; 3]> = mesh.alive().map(|(_, t)| t).collect();
    debug!(points = unique.len(), triangles = out.len(), constraints = constrained.len(), "triangulated");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(nx: usize, ny: usize) -> Vec<Vec2> {
        let mut pts = Vec::new();
        for j in 0..ny {
            for i in 0..nx {
                pts.push(Vec2::new(i as f64 * 10.0, j as f64 * 10.0));
            }
        }
        pts
    }

    fn area(pts: &[Vec2], t: &[usize; 3]) -> f64 {
        orient(pts[t[0]], pts[t[1]], pts[t[2]]) / 2.0
    }

    #[test]
    fn test_in_circle_sign() {
        let (a, b, c) = (Vec2::new(0.0, 0.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 1.0));
        assert!(in_circle(a, b, c, Vec2::new(0.4, 0.4)) > 0.0);
        assert!(in_circle(a, b, c, Vec2::new(3.0, 3.0)) < 0.0);
    }

    #[test]
    fn test_square_gives_two_triangles() {
        let pts = grid(2, 2);
        let tris = triangulate(&pts, &[]).unwrap();
        assert_eq!(tris.len(), 2);
        let total: f64 = tris.iter().map(|t| area(&pts, t)).sum();
        assert!((total - 100.0).abs() < 1e-9);
        assert!(tris.iter().all(|t| area(&pts, t) > 0.0));
    }

    #[test]
    fn test_grid_covers_hull() {
        let pts = grid(4, 3);
        let tris = triangulate(&pts, &[]).unwrap();
        assert_eq!(tris.len(), 2 * 3 * 2);
        let total: f64 = tris.iter().map(|t| area(&pts, t)).sum();
        assert!((total - 30.0 * 20.0).abs() < 1e-6);
    }

    #[test]
    fn test_random_cloud_is_locally_delaunay() {
        let pts: Vec<Vec2> = (0..40)
            .map(|i| {
                let f = i as f64;
                Vec2::new((f * 7.31).sin() * 50.0, (f * 3.17).cos() * 40.0)
            })
            .collect();
        let tris = triangulate(&pts, &[]).unwrap();
        let mut third = HashMap::new();
        for t in &tris {
            assert!(area(&pts, t) > 0.0);
            for e in 0..3 {
                third.insert((t[e], t[(e + 1) % 3]), t[(e + 2) % 3]);
            }
        }
        for t in &tris {
            for e in 0..3 {
                let (u, v) = (t[e], t[(e + 1) % 3]);
                if let Some(&d) = third.get(&(v, u)) {
                    assert!(in_circle(pts[t[0]], pts[t[1]], pts[t[2]], pts[d]) <= 1e-6);
                }
            }
        }
    }

    #[test]
    fn test_constraint_is_recovered() {
        // A wide, short quad whose Delaunay diagonal is the short one.
        let pts = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, -1.0),
            Vec2::new(20.0, 0.0),
            Vec2::new(10.0, 1.0),
        ];
        let free = triangulate(&pts, &[]).unwrap();
        let has = |tris: &[[usize; 3]], a: usize, b: usize| {
            tris.iter().any(|t| t.contains(&a) && t.contains(&b))
        };
        assert!(!has(&free, 0, 2));
        let forced = triangulate(&pts, &[(0, 2)]).unwrap();
        assert!(has(&forced, 0, 2));
        assert_eq!(forced.len(), 2);
    }

    #[test]
    fn test_duplicates_are_merged() {
        let mut pts = grid(2, 2);
        pts.push(pts[1]);
        let tris = triangulate(&pts, &[(4, 3)]).unwrap();
        assert_eq!(tris.len(), 2);
        assert!(tris.iter().all(|t| !t.contains(&4)));
    }

    #[test]
    fn test_collinear_is_degenerate() {
        let pts = vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0), Vec2::new(2.0, 2.0)];
        assert!(matches!(triangulate(&pts, &[]), Err(ShellError::DegenerateInput { .. })));
    }

    #[test]
    fn test_too_few_points() {
        let pts = vec![Vec2::new(0.0, 0.0), Vec2::new(1.0, 1.0)];
        assert!(triangulate(&pts, &[]).is_err());
    }
}

//! Triangle arena over the flattened key corners, plus the solve step that
//! triangulates, drops key interiors and carves the outline.

pub mod delaunay;

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use tracing::{debug, info, instrument};

use crate::config::HullConfig;
use crate::error::{ShellError, ShellResult};
use crate::footprint::KeyPoint;
use crate::geometry::Vec2;
use crate::hull::{self, CarveOptions};
use crate::wall::WallSynthesizer;

new_key_type! {
    pub struct TriangleId;
}

/// Slivers at least this large are kept.
pub const SLIVER_MAX_AREA: f64 = 5.0;
/// Slivers with at least this area-to-perimeter ratio are kept.
pub const SLIVER_MAX_RATIO: f64 = 0.1;

/// Counter-clockwise triangles over an indexed point set, with a
/// directed-edge index for neighbour lookups.
#[derive(Debug, Clone, Default)]
pub struct Triangulation {
    points: Vec<Vec2>,
    triangles: SlotMap<TriangleId, [usize; 3]>,
    edges: HashMap<(usize, usize), TriangleId>,
    revision: u64,
}

impl Triangulation {
    pub fn new(points: Vec<Vec2>) -> Self {
        Self {
            points,
            ..Self::default()
        }
    }

    pub fn from_triangles(points: Vec<Vec2>, triangles: &[[usize; 3]]) -> Self {
        let mut mesh = Self::new(points);
        for &t in triangles {
            mesh.insert(t);
        }
        mesh
    }

    // ── Points ──────────────────────────────────────────────

    pub fn points(&self) -> &[Vec2] {
        &self.points
    }

    pub fn point(&self, i: usize) -> Vec2 {
        self.points[i]
    }

    pub fn push_point(&mut self, p: Vec2) -> usize {
        self.points.push(p);
        self.revision += 1;
        self.points.len() - 1
    }

    pub fn set_point(&mut self, i: usize, p: Vec2) {
        self.points[i] = p;
        self.revision += 1;
    }

    // ── Triangles ───────────────────────────────────────────

    pub fn insert(&mut self, t: [usize; 3]) -> TriangleId {
        let id = self.triangles.insert(t);
        for e in 0..3 {
            self.edges.insert((t[e], t[(e + 1) % 3]), id);
        }
        self.revision += 1;
        id
    }

    pub fn remove(&mut self, id: TriangleId) -> Option<[usize; 3]> {
        let t = self.triangles.remove(id)?;
        for e in 0..3 {
            let key = (t[e], t[(e + 1) % 3]);
            if self.edges.get(&key) == Some(&id) {
                self.edges.remove(&key);
            }
        }
        self.revision += 1;
        Some(t)
    }

    /// Swap the vertices of a live triangle, keeping its id.
    pub fn replace(&mut self, id: TriangleId, t: [usize; 3]) -> bool {
        let Some(old) = self.triangles.get(id).copied() else {
            return false;
        };
        for e in 0..3 {
            let key = (old[e], old[(e + 1) % 3]);
            if self.edges.get(&key) == Some(&id) {
                self.edges.remove(&key);
            }
        }
        self.triangles[id] = t;
        for e in 0..3 {
            self.edges.insert((t[e], t[(e + 1) % 3]), id);
        }
        self.revision += 1;
        true
    }

    pub fn get(&self, id: TriangleId) -> Option<&[usize; 3]> {
        self.triangles.get(id)
    }

    pub fn contains(&self, id: TriangleId) -> bool {
        self.triangles.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TriangleId, &[usize; 3])> {
        self.triangles.iter()
    }

    pub fn triangle_list(&self) -> Vec<[usize; 3]> {
        self.triangles.values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Bumped on every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The triangle holding the directed edge `a→b`, with its third vertex.
    pub fn opposite(&self, a: usize, b: usize) -> Option<(usize, TriangleId)> {
        let &id = self.edges.get(&(a, b))?;
        let t = self.triangles.get(id)?;
        let third = t.iter().copied().find(|&v| v != a && v != b)?;
        Some((third, id))
    }

    /// Like [`opposite`](Self::opposite), trying `b→a` when `a→b` is missing.
    pub fn opposite_either(&self, a: usize, b: usize) -> Option<(usize, TriangleId)> {
        self.opposite(a, b).or_else(|| self.opposite(b, a))
    }

    pub fn area(&self, t: &[usize; 3]) -> f64 {
        let [a, b, c] = t.map(|i| self.points[i]);
        (b - a).cross(&(c - a)) / 2.0
    }

    /// The outer boundary as one counter-clockwise loop.
    pub fn boundary(&self) -> ShellResult<Vec<usize>> {
        let mut next: HashMap<usize, usize> = HashMap::new();
        for t in self.triangles.values() {
            for e in 0..3 {
                let (a, b) = (t[e], t[(e + 1) % 3]);
                if !self.edges.contains_key(&(b, a)) && next.insert(a, b).is_some() {
                    return Err(ShellError::invalid_boundary(format!(
                        "vertex {a} has two outgoing boundary edges"
                    )));
                }
            }
        }
        let Some(&start) = next.keys().min() else {
            return Err(ShellError::invalid_boundary("triangulation has no boundary"));
        };
        let mut out = vec![start];
        let mut cur = start;
        loop {
            let Some(&n) = next.get(&cur) else {
                return Err(ShellError::invalid_boundary(format!("boundary is open at {cur}")));
            };
            if n == start {
                break;
            }
            if out.len() > next.len() {
                return Err(ShellError::invalid_boundary("boundary does not close"));
            }
            out.push(n);
            cur = n;
        }
        if out.len() != next.len() {
            return Err(ShellError::invalid_boundary(format!(
                "boundary splits into several loops ({} of {} edges reached)",
                out.len(),
                next.len()
            )));
        }
        Ok(out)
    }
}

// ── Solve ───────────────────────────────────────────────────

/// Outcome of triangulating and carving the layout.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Remaining triangles over the flattened points.
    pub mesh: Triangulation,
    /// Clockwise outline the walls are built on.
    pub boundary: Vec<usize>,
    /// `boundary` with the apex of every removed sliver spliced in.
    pub inner_boundary: Vec<usize>,
    /// Slivers removed along the boundary. Their edges get rounded walls.
    pub removed_triangles: Vec<[usize; 3]>,
    /// Point indices of every key outline.
    pub polys: Vec<Vec<usize>>,
}

/// Serializable summary of the triangulation for output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriangulationSummary {
    pub points: Vec<Vec2>,
    pub triangles: Vec<[usize; 3]>,
    pub boundary: Vec<usize>,
    pub inner_boundary: Vec<usize>,
    pub removed_triangles: Vec<[usize; 3]>,
}

impl From<&Solution> for TriangulationSummary {
    fn from(s: &Solution) -> Self {
        Self {
            points: s.mesh.points().to_vec(),
            triangles: s.mesh.triangle_list(),
            boundary: s.boundary.clone(),
            inner_boundary: s.inner_boundary.clone(),
            removed_triangles: s.removed_triangles.clone(),
        }
    }
}

/// Triangulate the flattened key outlines and carve the outline down to
/// the concave boundary the walls follow.
#[instrument(skip_all, fields(keys = flat.len()))]
pub fn solve(
    flat: &[Vec<Vec2>],
    points: &[KeyPoint],
    synth: &dyn WallSynthesizer,
    config: &HullConfig,
) -> ShellResult<Solution> {
    let mut polys = Vec::with_capacity(flat.len());
    let mut pts = Vec::new();
    for poly in flat {
        polys.push((pts.len()..pts.len() + poly.len()).collect::<Vec<_>>());
        pts.extend_from_slice(poly);
    }
    if pts.len() != points.len() {
        return Err(ShellError::degenerate(format!(
            "{} flattened corners for {} key points",
            pts.len(),
            points.len()
        )));
    }

    let constraints: Vec<(usize, usize)> = if config.constrain_keys {
        polys
            .iter()
            .flat_map(|p| (0..p.len()).map(move |i| (p[i], p[(i + 1) % p.len()])))
            .collect()
    } else {
        Vec::new()
    };
    let tris = delaunay::triangulate(&pts, &constraints)?;
    let mut mesh = Triangulation::from_triangles(pts, &tris);
    let hull_boundary = mesh.boundary()?;

    if config.drop_key_triangles {
        let owner: HashMap<usize, usize> = polys
            .iter()
            .enumerate()
            .flat_map(|(k, p)| p.iter().map(move |&i| (i, k)))
            .collect();
        let inside: Vec<TriangleId> = mesh
            .iter()
            .filter(|(_, t)| {
                let k = owner.get(&t[0]);
                k.is_some() && t.iter().all(|v| owner.get(v) == k)
            })
            .map(|(id, _)| id)
            .collect();
        debug!(dropped = inside.len(), "dropping key interiors");
        for id in inside {
            mesh.remove(id);
        }
    }

    let carved = hull::carve(
        &mut mesh,
        &hull_boundary,
        points,
        synth,
        &CarveOptions::from_config(config, synth.params().rounded_sides),
    )?;
    let boundary = carved.boundary;
    let (inner_boundary, removed_triangles) = remove_slivers(&mut mesh, &boundary);

    info!(
        triangles = mesh.len(),
        boundary = boundary.len(),
        splits = carved.removed.len(),
        slivers = removed_triangles.len(),
        "layout triangulated"
    );
    Ok(Solution {
        mesh,
        boundary,
        inner_boundary,
        removed_triangles,
        polys,
    })
}

/// Remove thin triangles lying on a boundary edge. Each removed apex is
/// spliced into the inner boundary between the edge's endpoints.
fn remove_slivers(mesh: &mut Triangulation, boundary: &[usize]) -> (Vec<usize>, Vec<[usize; 3]>) {
    let on_boundary: HashSet<usize> = boundary.iter().copied().collect();
    let n = boundary.len();
    let boundary_edges: HashSet<(usize, usize)> = (0..n)
        .flat_map(|i| {
            let (a, b) = (boundary[i], boundary[(i + 1) % n]);
            [(a, b), (b, a)]
        })
        .collect();

    let mut inner = boundary.to_vec();
    let mut removed = Vec::new();
    let candidates: Vec<(TriangleId, [usize; 3])> = mesh.iter().map(|(id, t)| (id, *t)).collect();
    for (id, t) in candidates {
        let Some(e) = (0..3).find(|&e| boundary_edges.contains(&(t[e], t[(e + 1) % 3]))) else {
            continue;
        };
        let (a, b, apex) = (t[e], t[(e + 1) % 3], t[(e + 2) % 3]);
        if on_boundary.contains(&apex) {
            continue;
        }
        let (pa, pb, pc) = (mesh.point(a), mesh.point(b), mesh.point(apex));
        let u = pb - pa;
        let v = pc - pa;
        let perimeter = u.length() + v.length();
        let area = u.cross(&v).abs() / 2.0;
        if area > SLIVER_MAX_AREA || area / perimeter > SLIVER_MAX_RATIO {
            continue;
        }
        let m = inner.len();
        let (Some(ia), Some(ib)) = (inner.iter().position(|&x| x == a), inner.iter().position(|&x| x == b)) else {
            continue;
        };
        if (ia + 1) % m == ib {
            inner.insert(ia + 1, apex);
        } else if (ib + 1) % m == ia {
            inner.insert(ib + 1, apex);
        } else {
            continue;
        }
        debug!(a, b, apex, area, "removing boundary sliver");
        mesh.remove(id);
        removed.push(t);
    }
    (inner, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square_mesh() -> Triangulation {
        let pts = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(0.0, 10.0),
        ];
        Triangulation::from_triangles(pts, &[[0, 1, 2], [0, 2, 3]])
    }

    #[test]
    fn test_opposite_is_directed() {
        let mesh = square_mesh();
        assert_eq!(mesh.opposite(0, 2).map(|(k, _)| k), Some(3));
        assert_eq!(mesh.opposite(2, 0).map(|(k, _)| k), Some(1));
        assert!(mesh.opposite(1, 0).is_none());
        assert_eq!(mesh.opposite_either(1, 0).map(|(k, _)| k), Some(2));
    }

    #[test]
    fn test_boundary_is_ccw_loop() {
        let mesh = square_mesh();
        let b = mesh.boundary().unwrap();
        assert_eq!(b, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_remove_updates_edges_and_revision() {
        let mut mesh = square_mesh();
        let rev = mesh.revision();
        let (_, id) = mesh.opposite(0, 2).unwrap();
        assert_eq!(mesh.remove(id), Some([0, 2, 3]));
        assert!(mesh.opposite(0, 2).is_none());
        assert!(mesh.revision() > rev);
        assert_eq!(mesh.boundary().unwrap(), vec![0, 1, 2]);
        assert!(mesh.remove(id).is_none());
    }

    #[test]
    fn test_replace_keeps_id() {
        let mut mesh = square_mesh();
        let (_, id) = mesh.opposite(0, 2).unwrap();
        // Flip the diagonal by hand.
        let (_, other) = mesh.opposite(2, 0).unwrap();
        assert!(mesh.replace(id, [0, 1, 3]));
        assert!(mesh.replace(other, [1, 2, 3]));
        assert_eq!(mesh.len(), 2);
        assert_eq!(mesh.opposite(1, 3), Some((0, id)));
        assert_eq!(mesh.opposite(3, 1), Some((2, other)));
        assert!(mesh.opposite(0, 2).is_none());
        mesh.remove(id);
        assert!(!mesh.replace(id, [0, 1, 3]));
    }

    #[test]
    fn test_split_boundary_is_rejected() {
        let pts = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(5.0, 0.0),
            Vec2::new(6.0, 0.0),
            Vec2::new(5.0, 1.0),
        ];
        let mesh = Triangulation::from_triangles(pts, &[[0, 1, 2], [3, 4, 5]]);
        assert!(matches!(mesh.boundary(), Err(ShellError::InvalidBoundary { .. })));
    }

    #[test]
    fn test_empty_boundary_is_rejected() {
        assert!(Triangulation::new(Vec::new()).boundary().is_err());
    }

    #[test]
    fn test_sliver_is_removed_and_spliced() {
        let pts = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(5.0, 0.05),
            Vec2::new(5.0, 10.0),
        ];
        let mut mesh = Triangulation::from_triangles(pts, &[[0, 1, 2], [0, 2, 3], [2, 1, 3]]);
        // Clockwise outline 0 → 3 → 1.
        let (inner, removed) = remove_slivers(&mut mesh, &[0, 3, 1]);
        assert_eq!(removed, vec![[0, 1, 2]]);
        assert_eq!(inner, vec![0, 3, 1, 2]);
        assert_eq!(mesh.len(), 2);
    }

    #[test]
    fn test_fat_triangle_is_kept() {
        let pts = vec![Vec2::new(0.0, 0.0), Vec2::new(10.0, 0.0), Vec2::new(5.0, 1.0), Vec2::new(5.0, 10.0)];
        let mut mesh = Triangulation::from_triangles(pts, &[[0, 1, 2], [0, 2, 3], [2, 1, 3]]);
        let (inner, removed) = remove_slivers(&mut mesh, &[0, 3, 1]);
        assert!(removed.is_empty());
        assert_eq!(inner, vec![0, 3, 1]);
    }
}

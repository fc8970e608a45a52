//! Concave outline carving.
//!
//! Starting from the convex boundary of the triangulation, boundary edges
//! are repeatedly split through the opposite vertex of their interior
//! triangle. A split is taken when the new vertex is closer to the edge
//! than to its neighbouring edges and not too far from either endpoint,
//! and, unless disabled, when the walls around it stay well formed.

use std::collections::VecDeque;

use slotmap::{SlotMap, new_key_type};
use tracing::{debug, info, trace};

use crate::config::HullConfig;
use crate::error::{ShellError, ShellResult};
use crate::footprint::KeyPoint;
use crate::geometry::planar::{Vec2, point_in_triangle, sq_segment_distance};
use crate::geometry::Vec3;
use crate::geometry::thickness::prism_thickness;
use crate::triangulation::{TriangleId, Triangulation};
use crate::wall::WallSynthesizer;

/// Below the length threshold an edge is still split when its triangle is
/// thinner than this.
pub const THIN_TRIANGLE: f64 = 2.0;

new_key_type! {
    pub struct NodeId;
}

/// Tunables for [`carve`].
#[derive(Debug, Clone, PartialEq)]
pub struct CarveOptions {
    pub concavity: f64,
    pub length_threshold: f64,
    pub reject_bad_walls: bool,
    pub no_cut: bool,
    pub guard_bottom_points: bool,
    pub max_backtrack_depth: usize,
    pub wall_check_budget: usize,
}

impl CarveOptions {
    pub fn from_config(config: &HullConfig, rounded_sides: bool) -> Self {
        Self {
            concavity: config.concavity,
            length_threshold: config.effective_length_threshold(rounded_sides),
            reject_bad_walls: config.reject_bad_walls,
            no_cut: config.no_cut,
            guard_bottom_points: config.guard_bottom_points,
            max_backtrack_depth: config.max_backtrack_depth,
            wall_check_budget: config.wall_check_budget,
        }
    }
}

impl Default for CarveOptions {
    fn default() -> Self {
        Self::from_config(&HullConfig::default(), false)
    }
}

/// Result of carving.
#[derive(Debug, Clone, PartialEq)]
pub struct Carved {
    /// Clockwise outline.
    pub boundary: Vec<usize>,
    /// Triangles removed by accepted splits.
    pub removed: Vec<[usize; 3]>,
    /// Wall checks spent, repairs included.
    pub wall_checks: usize,
}

// ── Ring ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Node {
    p: usize,
    prev: NodeId,
    next: NodeId,
}

/// Circular doubly linked list of point indices.
#[derive(Debug, Default)]
struct Ring {
    nodes: SlotMap<NodeId, Node>,
    /// How many nodes hold each point.
    count: Vec<u32>,
}

impl Ring {
    fn new(points: usize) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            count: vec![0; points],
        }
    }

    fn p(&self, n: NodeId) -> usize {
        self.nodes[n].p
    }

    fn next(&self, n: NodeId) -> NodeId {
        self.nodes[n].next
    }

    fn prev(&self, n: NodeId) -> NodeId {
        self.nodes[n].prev
    }

    fn contains(&self, p: usize) -> bool {
        self.count.get(p).is_some_and(|&c| c > 0)
    }

    /// Insert `p` after `after`, or start the ring when `after` is `None`.
    fn insert_after(&mut self, p: usize, after: Option<NodeId>) -> NodeId {
        if let Some(c) = self.count.get_mut(p) {
            *c += 1;
        }
        match after {
            None => self.nodes.insert_with_key(|id| Node { p, prev: id, next: id }),
            Some(prev) => {
                let next = self.nodes[prev].next;
                let id = self.nodes.insert(Node { p, prev, next });
                self.nodes[prev].next = id;
                self.nodes[next].prev = id;
                id
            }
        }
    }

    fn remove(&mut self, n: NodeId) {
        let Some(node) = self.nodes.remove(n) else { return };
        if let Some(c) = self.count.get_mut(node.p) {
            *c = c.saturating_sub(1);
        }
        self.nodes[node.prev].next = node.next;
        self.nodes[node.next].prev = node.prev;
    }

    fn walk(&self, start: NodeId) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut n = start;
        loop {
            out.push(self.p(n));
            n = self.next(n);
            if n == start {
                return out;
            }
        }
    }
}

// ── Carver ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Split {
    k: usize,
    tri: TriangleId,
}

/// One level of the bad-wall repair search: the edge before the tentative
/// vertex, the tentative vertex itself, and how many of the two have been tried.
struct Attempt {
    before: NodeId,
    tentative: NodeId,
    tried: u8,
}

struct Carver<'a> {
    mesh: &'a Triangulation,
    points: &'a [KeyPoint],
    synth: &'a dyn WallSynthesizer,
    opts: &'a CarveOptions,
    bottom: Option<Vec<Vec2>>,
    ring: Ring,
    sq_concavity: f64,
    sq_length_threshold: f64,
    wall_checks: usize,
}

impl Carver<'_> {
    fn flat(&self, i: usize) -> Vec2 {
        self.mesh.point(i)
    }

    fn can_split_edge(&self, node: NodeId) -> Option<Split> {
        let ring = &self.ring;
        let g = ring.p(ring.prev(node));
        let i = ring.p(node);
        let j = ring.p(ring.next(node));
        let l = ring.p(ring.next(ring.next(node)));

        let (k, tri) = self.mesh.opposite(i, j)?;
        if ring.contains(k) {
            return None;
        }

        if let Some(bottom) = &self.bottom {
            let (bi, bj, bk) = (bottom[i], bottom[j], bottom[k]);
            let covers = bottom
                .iter()
                .enumerate()
                .any(|(q, &pt)| q != i && q != j && q != k && point_in_triangle(pt, bi, bj, bk));
            if covers {
                trace!(i, j, k, "split would swallow a bottom point");
                return None;
            }
        }

        let (a, b) = (self.flat(i), self.flat(j));
        let sq_len = a.distance_squared(&b);
        if sq_len < self.sq_length_threshold {
            let thick = self.thickness(i, j, k).unwrap_or(f64::INFINITY);
            if thick > THIN_TRIANGLE {
                return None;
            }
        }

        let c = self.flat(k);
        let d0 = sq_segment_distance(c, self.flat(g), a);
        let d1 = sq_segment_distance(c, b, self.flat(l));
        let dist = sq_segment_distance(c, a, b);
        let max_sq_len = sq_len / self.sq_concavity;
        if dist < d0 && dist < d1 && c.distance_squared(&a).min(c.distance_squared(&b)) <= max_sq_len {
            Some(Split { k, tri })
        } else {
            None
        }
    }

    /// Web thickness across the triangle `i j k`, using each corner's own key.
    fn thickness(&self, i: usize, j: usize, k: usize) -> ShellResult<f64> {
        let params = self.synth.params();
        let mut top = [Vec3::ZERO; 3];
        let mut bottom = top;
        for (slot, idx) in [i, j, k].into_iter().enumerate() {
            let pt = &self.points[idx];
            top[slot] = pt.frame.origin();
            bottom[slot] = pt.frame.pretranslated(0.0, 0.0, -params.web_for(pt.key)?).origin();
        }
        Ok(prism_thickness(top, bottom))
    }

    /// Walls at `t1 t2 t3` for the consecutive points `t0..t4`, built in
    /// clockwise order, must not fold.
    fn window_ok(&mut self, t: [usize; 5]) -> bool {
        self.wall_checks += 1;
        let pts = self.points;
        let p = move |i: usize| &pts[t[i]];
        let walls = (
            self.synth.cross_section(p(4), p(3), p(2), 0.0),
            self.synth.cross_section(p(3), p(2), p(1), 0.0),
            self.synth.cross_section(p(2), p(1), p(0), 0.0),
        );
        match walls {
            (Ok(w0), Ok(w1), Ok(w2)) => !self.synth.walls_intersect(&w0, &w1, &w2),
            _ => false,
        }
    }

    /// Check the five walls that change when `k` is inserted after `node`.
    fn walls_ok_with_split(&mut self, node: NodeId, k: usize) -> bool {
        let ring = &self.ring;
        let g_node = ring.prev(node);
        let f_node = ring.prev(g_node);
        let e_node = ring.prev(f_node);
        let j_node = ring.next(node);
        let l_node = ring.next(j_node);
        let m_node = ring.next(l_node);
        let n_node = ring.next(m_node);
        let [e, f, g, i, j, l, m, n] =
            [e_node, f_node, g_node, node, j_node, l_node, m_node, n_node].map(|id| ring.p(id));

        self.window_ok([g, i, k, j, l])
            && self.window_ok([i, k, j, l, m])
            && self.window_ok([f, g, i, k, j])
            && self.window_ok([k, j, l, m, n])
            && self.window_ok([e, f, g, i, k])
    }

    /// Whether the bad walls caused by inserting `k` after `node` could be
    /// cured by splitting one of the two new edges, recursively. The ring is
    /// left as it was found.
    fn can_fix_bad_walls(&mut self, node: NodeId, k: usize) -> bool {
        let budget = self.wall_checks + self.opts.wall_check_budget;
        let mut stack: Vec<Attempt> = Vec::new();
        let mut candidate = Some((node, k));

        let found = loop {
            if let Some((before, k)) = candidate.take() {
                if self.wall_checks >= budget {
                    break false;
                }
                if self.walls_ok_with_split(before, k) {
                    break true;
                }
                if stack.len() < self.opts.max_backtrack_depth {
                    let tentative = self.ring.insert_after(k, Some(before));
                    stack.push(Attempt {
                        before,
                        tentative,
                        tried: 0,
                    });
                }
            }

            while candidate.is_none() {
                let Some(top) = stack.last_mut() else { break };
                if top.tried >= 2 {
                    let tentative = top.tentative;
                    stack.pop();
                    self.ring.remove(tentative);
                    continue;
                }
                let choice = if top.tried == 0 { top.before } else { top.tentative };
                top.tried += 1;
                if let Some(split) = self.can_split_edge(choice) {
                    candidate = Some((choice, split.k));
                }
            }
            if candidate.is_none() {
                break false;
            }
        };

        while let Some(attempt) = stack.pop() {
            self.ring.remove(attempt.tentative);
        }
        found
    }
}

/// Carve the counter-clockwise convex `boundary` of `mesh` into a concave
/// outline. Triangles cut away are removed from `mesh`. The returned
/// boundary is clockwise.
pub fn carve(
    mesh: &mut Triangulation,
    boundary: &[usize],
    points: &[KeyPoint],
    synth: &dyn WallSynthesizer,
    opts: &CarveOptions,
) -> ShellResult<Carved> {
    if boundary.len() > points.len() {
        return Err(ShellError::invalid_boundary("Invalid wall boundary"));
    }
    if boundary.len() < 3 {
        return Err(ShellError::invalid_boundary(format!(
            "boundary has only {} points",
            boundary.len()
        )));
    }
    if let Some(&bad) = boundary.iter().find(|&&b| b >= points.len()) {
        return Err(ShellError::invalid_boundary(format!("boundary index {bad} out of range")));
    }

    let bottom = if opts.guard_bottom_points {
        let params = synth.params();
        let pts = points
            .iter()
            .map(|p| {
                params
                    .web_for(p.key)
                    .map(|w| Vec2::from(p.frame.pretranslated(0.0, 0.0, -w).origin()))
            })
            .collect::<ShellResult<Vec<_>>>()?;
        Some(pts)
    } else {
        None
    };

    let concavity = opts.concavity.max(0.0);
    let mut carver = Carver {
        mesh: &*mesh,
        points,
        synth,
        opts,
        bottom,
        ring: Ring::new(points.len()),
        sq_concavity: concavity * concavity,
        sq_length_threshold: opts.length_threshold * opts.length_threshold,
        wall_checks: 0,
    };

    let mut queue = VecDeque::new();
    let mut last = None;
    for &p in boundary {
        let id = carver.ring.insert_after(p, last);
        queue.push_back(id);
        last = Some(id);
    }
    let Some(last) = last else {
        return Err(ShellError::invalid_boundary("empty boundary"));
    };

    let mut accepted: Vec<TriangleId> = Vec::new();
    if !opts.no_cut {
        while let Some(node) = queue.pop_front() {
            let Some(split) = carver.can_split_edge(node) else { continue };
            let ok = !opts.reject_bad_walls
                || carver.walls_ok_with_split(node, split.k)
                || carver.can_fix_bad_walls(node, split.k);
            let (i, j) = (carver.ring.p(node), carver.ring.p(carver.ring.next(node)));
            if !ok {
                trace!(i, j, k = split.k, "split rejected by wall check");
                continue;
            }
            debug!(i, j, k = split.k, "splitting boundary edge");
            queue.push_back(node);
            let inserted = carver.ring.insert_after(split.k, Some(node));
            queue.push_back(inserted);
            // The split triangle holds k→i and j→k, which no later
            // directed lookup asks for, so it can stay until the end.
            accepted.push(split.tri);
        }
    }

    let mut concave = carver.ring.walk(last);
    concave.reverse();
    let wall_checks = carver.wall_checks;

    let removed: Vec<[usize; 3]> = accepted.into_iter().filter_map(|id| mesh.remove(id)).collect();
    info!(boundary = concave.len(), splits = removed.len(), wall_checks, "outline carved");
    Ok(Carved {
        boundary: concave,
        removed,
        wall_checks,
    })
}

//! Web thickening.
//!
//! Where the web slopes away from a key edge the material between the key
//! and its neighbour gets thin. For each edge of each key outline the
//! triangle across the edge is inspected. When it slopes the wrong way the
//! two edge corners are pushed outward just far enough to restore the
//! minimum thickness. A copy of each moved corner stays behind and the gap
//! is filled with new triangles.
//!
//! The top and bottom faces are processed independently. Thicknesses and
//! neighbours are always measured on the unmodified corners, so the order
//! in which edges are visited does not change the result.

use std::collections::{BTreeMap, HashSet};
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use slotmap::SecondaryMap;
use tracing::{debug, info, instrument, warn};

use crate::config::WebConfig;
use crate::error::{ShellError, ShellResult};
use crate::footprint::{Key, KeyPoint};
use crate::geometry::planar::orient;
use crate::geometry::{Frame, Vec2, Vec3};
use crate::triangulation::{Solution, TriangleId, Triangulation};
use crate::wall::{WallCrossSection, WallSynthesizer};

pub const DEFAULT_MWT_FACTOR: f64 = 0.8;
/// Web thicknesses are capped at this when solving offsets.
pub const MAX_WEB_THICKNESS: f64 = 5.0;
/// Offsets at or below this are not applied.
pub const OFFSET_THRESH: f64 = 0.1;
/// Faces within this angle of the key plane count as flat.
const FLAT_ANGLE: f64 = 0.01;
/// Height of a pressed keycap above the socket top.
const PRESSED_HEIGHT: f64 = 2.6;
const KEYCAP_CLEARANCE: f64 = 0.25;
const THICKNESS_EPS: f64 = 1e-6;

/// Which side of the web a pass works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Face {
    Top,
    Bottom,
}

impl Face {
    /// +1 on the top face, -1 on the bottom face.
    pub fn sign(self) -> f64 {
        match self {
            Face::Top => 1.0,
            Face::Bottom => -1.0,
        }
    }
}

/// What decided the thickness of a reinforced edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThicknessLimit {
    /// The target thickness was met.
    Reached,
    /// No neighbouring corner across the gap.
    NoNeighbour,
    /// The neighbour lies on the wrong side of the face.
    Twisted,
    /// The offset would run into the neighbouring keycap.
    Keycap,
    /// The offset would cross the projected surface of the neighbouring socket.
    NeighbourSurface,
    /// The offset equation has no usable root.
    NoSolution,
    /// The offset was reduced to keep the wall well formed.
    Wall,
    /// The offset was too small to apply.
    Threshold,
}

/// Outcome for one key edge whose web sloped away from the key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeReinforcement {
    pub key: usize,
    /// Original corner indices of the edge, in outline order.
    pub corners: [usize; 2],
    pub face: Face,
    pub target: f64,
    /// Thickness after the offsets, when a neighbour was found.
    pub achieved: Option<f64>,
    pub offset_prev: f64,
    pub offset_next: f64,
    pub limit: ThicknessLimit,
    /// Corner across the gap from each end of the edge.
    pub across: [Option<usize>; 2],
    /// Face points holding each end of the edge after the offsets.
    pub moved: [usize; 2],
}

impl EdgeReinforcement {
    pub fn is_short(&self) -> bool {
        self.achieved
            .is_some_and(|a| a < self.target - THICKNESS_EPS)
    }
}

/// Outward move of one wall cross-section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WallShift {
    pub direction: Vec3,
    pub offset: f64,
}

/// Neighbouring socket corner seen from the edge being thickened.
#[derive(Debug, Clone, Copy)]
pub struct Neighbour<'a> {
    pub top: &'a Frame,
    pub hole: &'a Frame,
    pub key: &'a Key,
}

/// Everything a pass reads but never changes.
#[derive(Clone, Copy)]
pub struct WebInputs<'a> {
    pub keys: &'a [Key],
    pub holes: &'a [Frame],
    pub solution: &'a Solution,
    pub synth: &'a dyn WallSynthesizer,
    pub min_thickness_factor: f64,
}

/// One thickened face.
#[derive(Debug, Clone)]
pub struct ReinforcedWeb {
    pub face: Face,
    /// Flattened corners and the web triangles over them.
    pub mesh: Triangulation,
    /// 3D corners, indexed like the mesh points.
    pub frames: Vec<Frame>,
    pub thickness: SecondaryMap<TriangleId, f64>,
    pub key_of: Vec<usize>,
    pub wall_shifts: BTreeMap<usize, WallShift>,
    /// Gap walls between a moved corner and the copy left behind.
    pub extra_walls: Vec<[usize; 3]>,
    pub edges: Vec<EdgeReinforcement>,
}

/// Serializable form of a [`ReinforcedWeb`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebFace {
    pub face: Face,
    pub points: Vec<Frame>,
    pub flat_points: Vec<Vec2>,
    pub triangles: Vec<[usize; 3]>,
    /// Thickness per triangle; `None` keeps the key's web thickness.
    pub thickness: Vec<Option<f64>>,
    pub extra_walls: Vec<[usize; 3]>,
    pub edges: Vec<EdgeReinforcement>,
}

impl ReinforcedWeb {
    /// The solved web with nothing moved.
    pub fn untouched(face: Face, frames: Vec<Frame>, solution: &Solution) -> ShellResult<Self> {
        let key_of = owners(solution, frames.len())?;
        Ok(Self {
            face,
            mesh: solution.mesh.clone(),
            frames,
            thickness: SecondaryMap::new(),
            key_of,
            wall_shifts: BTreeMap::new(),
            extra_walls: Vec::new(),
            edges: Vec::new(),
        })
    }

    pub fn short_edges(&self) -> impl Iterator<Item = &EdgeReinforcement> {
        self.edges.iter().filter(|e| e.is_short())
    }

    pub fn to_face(&self) -> WebFace {
        let (triangles, thickness) = self
            .mesh
            .iter()
            .map(|(id, t)| (*t, self.thickness.get(id).copied()))
            .unzip();
        WebFace {
            face: self.face,
            points: self.frames.clone(),
            flat_points: self.mesh.points().to_vec(),
            triangles,
            thickness,
            extra_walls: self.extra_walls.clone(),
            edges: self.edges.clone(),
        }
    }
}

/// Both faces and the walls moved to follow them.
#[derive(Debug, Clone)]
pub struct WebLayout {
    pub top: ReinforcedWeb,
    pub bottom: ReinforcedWeb,
    pub walls: Vec<WallCrossSection>,
}

fn owners(solution: &Solution, n: usize) -> ShellResult<Vec<usize>> {
    let mut key_of = vec![None; n];
    for (k, poly) in solution.polys.iter().enumerate() {
        for &p in poly {
            let slot = key_of
                .get_mut(p)
                .ok_or_else(|| ShellError::degenerate(format!("corner {p} has no frame")))?;
            *slot = Some(k);
        }
    }
    key_of
        .into_iter()
        .enumerate()
        .map(|(p, k)| k.ok_or_else(|| ShellError::degenerate(format!("corner {p} belongs to no key"))))
        .collect()
}

// ── Thickness measures ──────────────────────────────────────

/// Coordinates of `v` in the plane spanned by `normal` and `binormal`.
fn project(v: Vec3, normal: Vec3, binormal: Vec3) -> Vec2 {
    Vec2::new(v.dot(&normal), v.dot(&binormal))
}

fn triangle_normal(a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    (b - a).cross(&(c - a)).normalize()
}

/// The bottom corner and the neighbour's top corner, relative to `this_top`,
/// in the `normal`/`binormal` plane.
fn edge_profile(this_top: &Frame, this_thick: f64, next_top: &Frame, normal: Vec3, binormal: Vec3, face: Face) -> (Vec2, Vec2) {
    let origin = this_top.origin();
    let bottom = origin + this_top.axis(0.0, 0.0, -face.sign() * this_thick);
    (
        project(bottom - origin, normal, binormal),
        project(next_top.origin() - origin, normal, binormal),
    )
}

/// Web thickness between this key's corner, moved out by `offset`, and the
/// neighbour's corner.
pub fn calc_thickness(
    this_top: &Frame,
    this_thick: f64,
    next_top: &Frame,
    normal: Vec3,
    binormal: Vec3,
    offset: f64,
    face: Face,
) -> f64 {
    let (pab, pbt) = edge_profile(this_top, this_thick, next_top, normal, binormal, face);
    let denom = ((offset - pbt.x).powi(2) + pbt.y * pbt.y).sqrt();
    if denom < 1e-12 {
        return 0.0;
    }
    (offset * (pbt.y - pab.y) + pab.y * pbt.x).abs() / denom
}

/// Offset along `normal` that brings the web to `target` thickness, and
/// what limited it.
///
/// The thickness is the distance from the bottom corner to the line through
/// the offset top corner and the neighbour. Setting it equal to the target
/// gives a quadratic in the offset. The result never passes the projected
/// surface of the neighbouring socket on the bottom face, nor the
/// neighbouring keycap on the top face.
pub fn reinforcement_offset(
    this_top: &Frame,
    this_thick: f64,
    next: &Neighbour<'_>,
    normal: Vec3,
    binormal: Vec3,
    target: f64,
    face: Face,
) -> (f64, ThicknessLimit) {
    let (pab, pbt) = edge_profile(this_top, this_thick, next.top, normal, binormal, face);
    let next_axis = project(next.top.axis(0.0, 0.0, 1.0), normal, binormal);

    let reach = pbt.length();
    if reach > 0.0 && (pab.y * pbt.x).abs() / reach > target {
        return (0.0, ThicknessLimit::Reached);
    }

    let mut proj_offset = if next_axis.y == 0.0 || next_axis.y * pbt.y < 0.0 {
        // The neighbour's surface never crosses this face.
        target
    } else {
        pbt.x - next_axis.x * pbt.y / next_axis.y
    };
    proj_offset = proj_offset.max(0.0).max(target / 2.0);

    let mut key_offset = target;
    let origin = this_top.origin();
    if face == Face::Top && pbt.y < 0.0 && (next.top.origin() - next.hole.origin()).dot(&normal) < 0.0 {
        let kind = next.key.kind;
        let margin = (kind.keycap_width() - kind.socket_size().x) / 2.0 + KEYCAP_CLEARANCE;
        let keycap = next.top.origin() - normal * margin + next.top.axis(0.0, 0.0, PRESSED_HEIGHT);
        let pk = project(keycap - origin, normal, binormal);
        if pk.y >= pbt.y && pk.y != pbt.y {
            key_offset = pbt.x - pbt.y * (pk.x - pbt.x) / (pk.y - pbt.y);
        }
        key_offset = key_offset.max(0.0);
    }

    let (max_offset, max_limit) = match face {
        Face::Top => (key_offset, ThicknessLimit::Keycap),
        Face::Bottom => (proj_offset, ThicknessLimit::NeighbourSurface),
    };

    let t2 = target * target;
    let d2 = (pab.y - pbt.y).powi(2);
    let disc = pbt.x * pbt.x - t2 + d2;
    let denom = t2 - d2;
    if disc < 0.0 || denom.abs() < 1e-12 {
        return (max_offset, ThicknessLimit::NoSolution);
    }
    let pm = pbt.y * target * disc.sqrt();
    let first = pbt.x * (pab.y * pbt.y + t2 - pab.y * pab.y);
    let roots = [(first + pm) / denom, (first - pm) / denom];
    let Some(best) = roots.into_iter().filter(|s| *s >= 0.0).min_by(f64::total_cmp) else {
        return (max_offset / 2.0, ThicknessLimit::NoSolution);
    };
    if best <= max_offset {
        (best, ThicknessLimit::Reached)
    } else {
        (max_offset, max_limit)
    }
}

/// Pick the two neighbouring corners across the gap from edge `p1 -> p2`.
///
/// Starts from the corner across the edge and tries the corners of the two
/// triangles next to it, keeping the pair with the shortest spans as long as
/// neither span is more than three times the other.
fn closest_points(frames: &[Frame], mesh: &Triangulation, p1: usize, p2: usize) -> [Option<usize>; 2] {
    let Some((this_p, _)) = mesh.opposite(p1, p2) else {
        return [None, None];
    };
    let len = |a: usize, b: usize| frames[a].origin().distance_to(&frames[b].origin());

    let mut best = [None, None];
    let mut best_len = f64::INFINITY;
    let (len1, len2) = (len(p1, this_p), len(p2, this_p));
    if len1 < len2 * 3.0 {
        best[0] = Some(this_p);
    }
    if len2 < len1 * 3.0 {
        best[1] = Some(this_p);
    }
    if best[0].is_some() && best[1].is_some() {
        best_len = len1 + len2;
    }

    let mut try_pair = |a: usize, b: usize| {
        let (la, lb) = (len(p1, a), len(p2, b));
        if la * lb < best_len && la < lb.max(1.0) * 3.0 && lb < la.max(1.0) * 3.0 {
            best_len = la * lb;
            best = [Some(a), Some(b)];
        }
    };
    let before = mesh.opposite(p1, this_p).map(|(k, _)| k);
    let after = mesh.opposite(this_p, p2).map(|(k, _)| k);
    if let Some(b) = before {
        try_pair(this_p, b);
        try_pair(b, this_p);
    }
    if let Some(a) = after {
        try_pair(this_p, a);
        try_pair(a, this_p);
    }
    if let (Some(b), Some(a)) = (before, after) {
        try_pair(b, a);
        try_pair(a, b);
    }
    best
}

// ── Edge flips ──────────────────────────────────────────────

/// Flip edge `e0 -> e1` of triangle `v_tri` (apex `v`) when the angles
/// opposite the edge sum past a half turn.
///
/// With `check_convexity` the flip is also refused when it makes the
/// surface fold more sharply. Flips that would invert a triangle in the
/// flat layout are always refused.
pub fn maybe_flip(
    mesh: &mut Triangulation,
    frames: &[Frame],
    v: usize,
    v_tri: TriangleId,
    e0: usize,
    e1: usize,
    check_convexity: bool,
) -> bool {
    if mesh.opposite(e0, e1) != Some((v, v_tri)) {
        return false;
    }
    let Some((adj, adj_tri)) = mesh.opposite(e1, e0) else {
        return false;
    };
    if adj == v {
        return false;
    }
    let at = |i: usize| frames[i].origin();
    let (p_adj, p_v, p0, p1) = (at(adj), at(v), at(e0), at(e1));

    let angle1 = (p1 - p_adj).angle_to(&(p0 - p_adj));
    let angle2 = (p1 - p_v).angle_to(&(p0 - p_v));
    if !(angle1 + angle2 > PI) {
        return false;
    }

    let (q_adj, q_v, q0, q1) = (mesh.point(adj), mesh.point(v), mesh.point(e0), mesh.point(e1));
    if orient(q_adj, q1, q_v) <= 0.0 || orient(q0, q_adj, q_v) <= 0.0 {
        return false;
    }

    if check_convexity {
        let before = triangle_normal(p_v, p0, p1).angle_about(&triangle_normal(p1, p0, p_adj), &(p1 - p0));
        let after = triangle_normal(p_adj, p1, p_v).angle_about(&triangle_normal(p0, p_adj, p_v), &(p_v - p_adj));
        if after < before {
            return false;
        }
    }

    mesh.replace(v_tri, [adj, e1, v]);
    mesh.replace(adj_tri, [e0, adj, v]);
    true
}

/// Flip every interior edge that fails the opposite-angle test. Returns
/// the number of flips.
pub fn flip_all_triangles(mesh: &mut Triangulation, frames: &[Frame]) -> usize {
    let mut edges: Vec<(usize, usize)> = mesh
        .iter()
        .flat_map(|(_, t)| (0..3).map(move |i| (t[i], t[(i + 1) % 3])))
        .filter(|(a, b)| a < b)
        .collect();
    edges.sort_unstable();
    let mut flips = 0;
    for (a, b) in edges {
        let Some((v, tri)) = mesh.opposite(a, b) else {
            continue;
        };
        if maybe_flip(mesh, frames, v, tri, a, b, false) {
            flips += 1;
        }
    }
    debug!(flips, "web edges flipped");
    flips
}

// ── Wall shifts ─────────────────────────────────────────────

pub fn shift_wall_top(wall: &WallCrossSection, direction: Vec3, amount: f64) -> WallCrossSection {
    let d = direction * amount;
    WallCrossSection {
        ti: wall.ti.translated(d),
        to: wall.to.translated(d),
        si: wall.si.map(|f| f.translated(d)),
        sm: wall.sm.map(|f| f.translated(d)),
        ..*wall
    }
}

/// Move the lower part of a wall. The floor points move only across the
/// wall's up direction, and the mid points never sink below the floor.
pub fn shift_wall_bottom(
    synth: &dyn WallSynthesizer,
    wall: &WallCrossSection,
    direction: Vec3,
    amount: f64,
) -> WallCrossSection {
    let up = synth.up_dir(wall);
    let flat = direction - up * direction.dot(&up);
    let d = direction * amount;
    let mut shifted = WallCrossSection {
        ki: wall.ki.translated(d),
        mi: wall.mi.translated(d),
        mo: wall.mo.translated(d),
        bi: wall.bi.translated(flat * amount),
        bo: wall.bo.translated(flat * amount),
        ..*wall
    };
    let floor = synth.floor();
    for mid in [&mut shifted.mo, &mut shifted.mi] {
        let below = floor.height_of(mid.origin());
        if below < 0.0 {
            mid.translate(floor.world_z * -below);
        }
    }
    shifted
}

pub fn shift_walls(
    synth: &dyn WallSynthesizer,
    walls: &[WallCrossSection],
    shifts: &BTreeMap<usize, WallShift>,
    face: Face,
) -> Vec<WallCrossSection> {
    walls
        .iter()
        .enumerate()
        .map(|(i, w)| match (shifts.get(&i), face) {
            (Some(s), Face::Top) => shift_wall_top(w, s.direction, s.offset),
            (Some(s), Face::Bottom) => shift_wall_bottom(synth, w, s.direction, s.offset),
            (None, _) => *w,
        })
        .collect()
}

/// Thickness between two neighbouring wall bottoms, measured the way the
/// web thickness is.
pub fn wall_thickness(synth: &dyn WallSynthesizer, prev: &WallCrossSection, next: &WallCrossSection) -> f64 {
    let Some(out) = (prev.bo.origin() - prev.bi.origin()).normalized() else {
        return 0.0;
    };
    let side = out.cross(&synth.up_dir(prev));
    let base = prev.bo.origin();
    let pab = project(prev.bi.origin() - base, side, out);
    let pbt = project(next.bo.origin() - base, side, out);
    let reach = pbt.length();
    if reach < 1e-12 {
        return 0.0;
    }
    (pab.y * pbt.x).abs() / reach
}

/// Largest of `offset`, `offset / 2` and `offset / 4` that keeps wall `i`
/// from folding into its neighbours or thinning below half the wall
/// thickness; zero when none does.
pub fn max_offset_for_wall(
    synth: &dyn WallSynthesizer,
    walls: &[WallCrossSection],
    i: usize,
    offset: f64,
    direction: Vec3,
) -> f64 {
    let n = walls.len();
    if n < 3 || i >= n {
        return 0.0;
    }
    let prev = &walls[(i + n - 1) % n];
    let next = &walls[(i + 1) % n];
    let min_thickness = synth.params().thickness / 2.0;
    for divisor in [1.0, 2.0, 4.0] {
        let shifted = shift_wall_bottom(synth, &walls[i], direction, offset / divisor);
        if synth.walls_intersect(prev, &shifted, next) {
            continue;
        }
        let thinnest = wall_thickness(synth, &shifted, prev).min(wall_thickness(synth, &shifted, next));
        if thinnest < min_thickness {
            continue;
        }
        return offset / divisor;
    }
    0.0
}

// ── Passes ──────────────────────────────────────────────────

/// Mesh and per-corner data being edited by one pass. Triangles split from
/// another share its thickness slot.
struct PassState {
    mesh: Triangulation,
    frames: Vec<Frame>,
    thickness: Vec<f64>,
    key_of: Vec<usize>,
    slot: SecondaryMap<TriangleId, usize>,
    slot_thickness: Vec<Option<f64>>,
}

impl PassState {
    fn new(mesh: Triangulation, frames: Vec<Frame>, thickness: Vec<f64>, key_of: Vec<usize>) -> Self {
        let mut slot = SecondaryMap::new();
        for (i, (id, _)) in mesh.iter().enumerate() {
            slot.insert(id, i);
        }
        let slot_thickness = vec![None; slot.len()];
        Self {
            mesh,
            frames,
            thickness,
            key_of,
            slot,
            slot_thickness,
        }
    }

    /// Copy corner `p` into a new index.
    fn duplicate(&mut self, p: usize) -> usize {
        let q = self.mesh.push_point(self.mesh.point(p));
        self.frames.push(self.frames[p]);
        self.thickness.push(self.thickness[p]);
        self.key_of.push(self.key_of[p]);
        q
    }

    fn shift(&mut self, p: usize, d3: Vec3, d2: Vec2) {
        self.frames[p].translate(d3);
        self.mesh.set_point(p, self.mesh.point(p) + d2);
    }

    fn insert_like(&mut self, t: [usize; 3], like: TriangleId) -> TriangleId {
        let id = self.mesh.insert(t);
        let slot = match self.slot.get(like) {
            Some(&s) => s,
            None => {
                self.slot_thickness.push(None);
                self.slot_thickness.len() - 1
            }
        };
        self.slot.insert(id, slot);
        id
    }

    fn set_thickness(&mut self, id: TriangleId, value: f64) {
        if let Some(&s) = self.slot.get(id) {
            self.slot_thickness[s] = Some(value);
        }
    }

    fn triangle_normal(&self, t: &[usize; 3]) -> Vec3 {
        let [a, b, c] = t.map(|i| self.frames[i].origin());
        triangle_normal(a, b, c)
    }

    fn resolved_thickness(&self) -> SecondaryMap<TriangleId, f64> {
        self.mesh
            .iter()
            .filter_map(|(id, _)| {
                let s = *self.slot.get(id)?;
                self.slot_thickness[s].map(|t| (id, t))
            })
            .collect()
    }
}

/// Thicken one face of the web.
///
/// `frames` are the face's corners, indexed like the solved mesh. Wall
/// offsets are clamped against `walls` on the bottom face only.
#[instrument(skip_all, fields(face = ?face, corners = frames.len()))]
pub fn reinforce(
    face: Face,
    frames: Vec<Frame>,
    inputs: &WebInputs<'_>,
    walls: Option<&[WallCrossSection]>,
) -> ShellResult<ReinforcedWeb> {
    let solution = inputs.solution;
    if frames.len() != solution.mesh.points().len() {
        return Err(ShellError::degenerate(format!(
            "{} web corners for {} mesh points",
            frames.len(),
            solution.mesh.points().len()
        )));
    }
    if inputs.keys.len() < solution.polys.len() || inputs.holes.len() < solution.polys.len() {
        return Err(ShellError::degenerate("fewer keys than key outlines"));
    }
    let key_of = owners(solution, frames.len())?;
    let params = inputs.synth.params();
    let thickness = key_of
        .iter()
        .map(|&k| params.web_for(k).map(|t| t.min(MAX_WEB_THICKNESS)))
        .collect::<ShellResult<Vec<_>>>()?;

    let original = frames.clone();
    let original_thickness = thickness.clone();
    let original_key = key_of.clone();
    let inner: HashSet<usize> = solution.inner_boundary.iter().copied().collect();
    let factor = inputs.min_thickness_factor;
    let sign = face.sign();

    let mut state = PassState::new(solution.mesh.clone(), frames, thickness, key_of);
    let mut wall_shifts = BTreeMap::new();
    let mut extra_walls = Vec::new();
    let mut edges = Vec::new();

    let side_offset = |o: usize, opposite: Option<usize>, normal: Vec3, binormal: Vec3, tangent: Vec3| {
        let Some(q) = opposite else {
            return (0.0, ThicknessLimit::NoNeighbour);
        };
        let toward = original[q].origin() - original[o].origin();
        if normal.angle_about(&toward, &tangent) <= 0.0 {
            return (0.0, ThicknessLimit::Twisted);
        }
        let k = original_key[q];
        let neighbour = Neighbour {
            top: &original[q],
            hole: &inputs.holes[k],
            key: &inputs.keys[k],
        };
        let th = original_thickness[o];
        reinforcement_offset(&original[o], th, &neighbour, normal, binormal, factor * th, face)
    };
    let clamp_to_wall = |wall: Option<usize>, offset: f64, limit: ThicknessLimit, normal: Vec3| {
        match (face, wall, walls) {
            (Face::Bottom, Some(w), Some(walls)) => {
                let clamped = max_offset_for_wall(inputs.synth, walls, w, offset, normal);
                if clamped < offset {
                    (clamped, ThicknessLimit::Wall)
                } else {
                    (offset, limit)
                }
            }
            _ => (offset, limit),
        }
    };

    for (key, poly) in solution.polys.iter().enumerate() {
        let mut cur = poly.clone();
        let n = cur.len();
        for i in 0..n {
            let (i0, i1, i2, i3) = (i, (i + 1) % n, (i + 2) % n, (i + 3) % n);
            let (pi0, pi1, pi2, pi3) = (cur[i0], cur[i1], cur[i2], cur[i3]);
            let (o0, o1, o2, o3) = (poly[i0], poly[i1], poly[i2], poly[i3]);

            let Some((this_p, this_tri)) = state.mesh.opposite(pi1, pi2) else {
                continue;
            };
            let Some(&tri) = state.mesh.get(this_tri) else {
                continue;
            };
            let tangent = (original[o2].origin() - original[o1].origin()) * sign;
            let binormal = original[o2].axis(0.0, 0.0, sign);
            let Some(normal) = binormal.cross(&tangent).normalized() else {
                continue;
            };
            let tri_normal = state.triangle_normal(&tri) * sign;
            let angle = binormal.cross(&tri_normal).dot(&tangent).atan2(binormal.dot(&tri_normal));
            if angle.abs() < FLAT_ANGLE {
                state.set_thickness(this_tri, original_thickness[o1]);
                continue;
            }
            if angle > 0.0 {
                continue;
            }
            // Round outlines are left unthickened.
            if n > 4 {
                let t = calc_thickness(
                    &state.frames[cur[i1]],
                    original_thickness[o1],
                    &state.frames[this_p],
                    normal,
                    binormal,
                    0.0,
                    face,
                );
                state.set_thickness(this_tri, t);
                continue;
            }

            let opposites = closest_points(&original, &solution.mesh, o1, o2);
            let (offset_prev, limit_prev) = side_offset(o1, opposites[0], normal, binormal, tangent);
            let (offset_next, limit_next) = side_offset(o2, opposites[1], normal, binormal, tangent);
            let normal2 = (state.mesh.point(pi2) - state.mesh.point(pi1))
                .perp()
                .normalized()
                .unwrap_or_default();

            let wall_prev = solution.boundary.iter().position(|&b| b == pi1);
            let (offset_prev, mut limit_prev) = clamp_to_wall(wall_prev, offset_prev, limit_prev, normal);
            let mut applied_prev = 0.0;
            if offset_prev > OFFSET_THRESH {
                applied_prev = offset_prev;
                let new_prev = state.duplicate(pi1);
                cur[i1] = new_prev;
                state.shift(pi1, normal * offset_prev, normal2 * offset_prev);

                if let Some((prev, prev_tri)) = state.mesh.opposite(pi0, pi1) {
                    state.mesh.replace(prev_tri, [prev, pi0, new_prev]);
                    let added = state.insert_like([prev, new_prev, pi1], prev_tri);
                    maybe_flip(&mut state.mesh, &state.frames, new_prev, prev_tri, prev, pi0, true);
                    maybe_flip(&mut state.mesh, &state.frames, new_prev, added, pi1, prev, true);
                }
                if let Some(w) = wall_prev {
                    wall_shifts.insert(
                        w,
                        WallShift {
                            direction: normal,
                            offset: offset_prev,
                        },
                    );
                }
                if inner.contains(&o1) && inner.contains(&o0) {
                    extra_walls.push([new_prev, pi1, pi1]);
                }
                state.insert_like([cur[i2], pi1, new_prev], this_tri);
            } else if offset_prev > 0.0 {
                limit_prev = ThicknessLimit::Threshold;
            }

            let wall_next = solution.boundary.iter().position(|&b| b == pi2);
            let (offset_next, mut limit_next) = clamp_to_wall(wall_next, offset_next, limit_next, normal);
            let mut applied_next = 0.0;
            if offset_next > OFFSET_THRESH {
                applied_next = offset_next;
                let new_next = state.duplicate(pi2);
                cur[i2] = new_next;
                state.shift(pi2, normal * offset_next, normal2 * offset_next);

                if let Some((next, next_tri)) = state.mesh.opposite(pi2, pi3) {
                    state.mesh.replace(next_tri, [next, new_next, pi3]);
                    let added = state.insert_like([new_next, next, pi2], next_tri);
                    maybe_flip(&mut state.mesh, &state.frames, new_next, next_tri, pi3, next, true);
                    maybe_flip(&mut state.mesh, &state.frames, new_next, added, next, pi2, true);
                }
                if let Some(w) = wall_next {
                    wall_shifts.insert(
                        w,
                        WallShift {
                            direction: normal,
                            offset: offset_next,
                        },
                    );
                }
                if inner.contains(&o2) && inner.contains(&o3) {
                    extra_walls.push([pi2, new_next, pi2]);
                }
                state.insert_like([new_next, pi2, cur[i1]], this_tri);
            } else if offset_next > 0.0 {
                limit_next = ThicknessLimit::Threshold;
            }

            let measure = |o: usize, q: Option<usize>, applied: f64| {
                q.map(|q| {
                    calc_thickness(&original[o], original_thickness[o], &original[q], normal, binormal, applied, face)
                })
            };
            let achieved = match (measure(o1, opposites[0], applied_prev), measure(o2, opposites[1], applied_next)) {
                (Some(a), Some(b)) => Some((a + b) / 2.0),
                (a, None) => a,
                (None, b) => b,
            };
            if let Some(t) = achieved {
                state.set_thickness(this_tri, t);
            }

            let target = factor * original_thickness[o1];
            let limit = match achieved {
                None => ThicknessLimit::NoNeighbour,
                Some(a) if a >= target - THICKNESS_EPS => ThicknessLimit::Reached,
                Some(_) => [limit_prev, limit_next]
                    .into_iter()
                    .find(|l| *l != ThicknessLimit::Reached)
                    .unwrap_or(ThicknessLimit::NoSolution),
            };
            let record = EdgeReinforcement {
                key,
                corners: [o1, o2],
                face,
                target,
                achieved,
                offset_prev: applied_prev,
                offset_next: applied_next,
                limit,
                across: opposites,
                moved: [pi1, pi2],
            };
            if record.is_short() {
                warn!(key, corner = o1, ?face, target, achieved, ?limit, "web edge below target thickness");
            } else {
                debug!(key, corner = o1, ?face, applied_prev, applied_next, "web edge reinforced");
            }
            edges.push(record);
        }
    }

    let added = state.frames.len() - original.len();
    info!(
        ?face,
        edges = edges.len(),
        added,
        short = edges.iter().filter(|e| e.is_short()).count(),
        "web face reinforced"
    );
    let thickness = state.resolved_thickness();
    Ok(ReinforcedWeb {
        face,
        mesh: state.mesh,
        frames: state.frames,
        thickness,
        key_of: state.key_of,
        wall_shifts,
        extra_walls,
        edges,
    })
}

/// Thicken both faces and move the walls after them.
///
/// Both passes start from the solved web and the unshifted walls. Top
/// shifts are applied to the walls first, then bottom shifts.
#[instrument(skip_all, fields(corners = points.len(), walls = walls.len()))]
pub fn thicken(
    inputs: &WebInputs<'_>,
    points: &[KeyPoint],
    walls: &[WallCrossSection],
    config: &WebConfig,
) -> ShellResult<WebLayout> {
    let params = inputs.synth.params();
    let top_frames: Vec<Frame> = points.iter().map(|p| p.frame).collect();
    let bottom_frames = points
        .iter()
        .map(|p| Ok(p.frame.pretranslated(0.0, 0.0, -params.web_for(p.key)?)))
        .collect::<ShellResult<Vec<_>>>()?;

    if !config.thicken {
        return Ok(WebLayout {
            top: ReinforcedWeb::untouched(Face::Top, top_frames, inputs.solution)?,
            bottom: ReinforcedWeb::untouched(Face::Bottom, bottom_frames, inputs.solution)?,
            walls: walls.to_vec(),
        });
    }

    let mut top = reinforce(Face::Top, top_frames, inputs, Some(walls))?;
    let mut bottom = reinforce(Face::Bottom, bottom_frames, inputs, Some(walls))?;
    if config.flip_edges {
        flip_all_triangles(&mut top.mesh, &top.frames);
        flip_all_triangles(&mut bottom.mesh, &bottom.frames);
    }
    let shifted = shift_walls(inputs.synth, walls, &top.wall_shifts, Face::Top);
    let shifted = shift_walls(inputs.synth, &shifted, &bottom.wall_shifts, Face::Bottom);
    Ok(WebLayout {
        top,
        bottom,
        walls: shifted,
    })
}

//! Wall cross-sections: the inner and outer profile of the case wall at each
//! boundary vertex.
//!
//! The wall ring runs clockwise seen from above. For a vertex `cur` with
//! neighbours `prev` and `next` the outward direction is the offset
//! bisector of the two adjacent edges. Each shell mode has its own
//! [`WallSynthesizer`]; the pipeline picks one at the start of a run.

mod basic;
mod block;
mod stilts;

pub use basic::BasicWalls;
pub use block::BlockWalls;
pub use stilts::StiltsWalls;

use serde::{Deserialize, Serialize};

use crate::config::{ShellConfig, ShellMode};
use crate::error::{ShellError, ShellResult};
use crate::floor::Floor;
use crate::footprint::{Key, KeyPoint, web_thickness};
use crate::geometry::{Frame, Vec3};

/// Shroud inset from the top inner point.
const SHROUD_INSET: f64 = 0.5;
/// Shroud heights at or below this are treated as absent.
pub const SHROUD_EPSILON: f64 = 1e-6;

/// Named frames of one wall vertex, ordered top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WallCrossSection {
    /// Top inner point, the offset bisector frame at the key corner.
    pub ti: Frame,
    /// Top outer point.
    pub to: Frame,
    pub mi: Frame,
    pub mo: Frame,
    /// Bottom inner point, on the floor.
    pub bi: Frame,
    /// Bottom outer point, on the floor.
    pub bo: Frame,
    /// Key corner lowered by the web thickness.
    pub ki: Frame,
    pub si: Option<Frame>,
    pub sm: Option<Frame>,
    pub key: usize,
    /// Index of the boundary point this wall was built from.
    pub point: Option<usize>,
    /// The edge to the next wall stays on one key or borders a sliver
    /// removed along the boundary.
    pub round_next: bool,
    pub round_prev: bool,
}

impl WallCrossSection {
    pub fn has_shroud(&self) -> bool {
        self.si.is_some() && self.sm.is_some()
    }

    pub fn outer(&self) -> [Frame; 3] {
        [self.to, self.mo, self.bo]
    }

    pub fn inner(&self) -> [Frame; 3] {
        [self.ti, self.mi, self.bi]
    }

    /// Every frame of the cross-section, shroud frames included.
    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        [&self.ti, &self.to, &self.mi, &self.mo, &self.bi, &self.bo, &self.ki]
            .into_iter()
            .chain(self.si.iter())
            .chain(self.sm.iter())
    }

    pub fn is_finite(&self) -> bool {
        self.frames().all(Frame::is_finite)
    }
}

/// Mode-independent wall inputs resolved from the configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct WallParams {
    pub thickness: f64,
    pub shrouding: f64,
    pub xy_offset: f64,
    pub z_offset: f64,
    pub rounded_sides: bool,
    /// Web thickness per key.
    pub web_thickness: Vec<f64>,
}

impl WallParams {
    pub fn new(config: &ShellConfig, keys: &[Key]) -> Self {
        Self {
            thickness: config.wall.thickness,
            shrouding: config.wall.shrouding,
            xy_offset: config.wall_xy_offset(),
            z_offset: config.wall.z_offset,
            rounded_sides: config.wall.rounded_sides,
            web_thickness: keys.iter().map(|k| web_thickness(&config.web, k)).collect(),
        }
    }

    pub fn web_for(&self, key: usize) -> ShellResult<f64> {
        self.web_thickness
            .get(key)
            .copied()
            .ok_or_else(|| ShellError::degenerate(format!("no web thickness for key {key}")))
    }

    pub fn has_shroud(&self) -> bool {
        self.shrouding > SHROUD_EPSILON
    }
}

/// Builds wall cross-sections and judges whether neighbouring walls collide.
pub trait WallSynthesizer {
    fn mode(&self) -> ShellMode;

    fn params(&self) -> &WallParams;

    fn floor(&self) -> &Floor;

    /// Cross-section at `cur`, widened by `offset` beyond the configured thickness.
    fn cross_section(
        &self,
        prev: &KeyPoint,
        cur: &KeyPoint,
        next: &KeyPoint,
        offset: f64,
    ) -> ShellResult<WallCrossSection>;

    /// True when the walls `w0-w1` and `w1-w2` fold over each other.
    fn walls_intersect(
        &self,
        w0: &WallCrossSection,
        w1: &WallCrossSection,
        w2: &WallCrossSection,
    ) -> bool {
        bisector_crossed_2d(w0, w1, w2) || shroud_crossed(w0, w1, w2)
    }

    /// Local "up" along the wall.
    fn up_dir(&self, _wall: &WallCrossSection) -> Vec3 {
        Vec3::Z
    }
}

/// Pick the synthesizer for the configured shell mode.
pub fn synthesizer_for(config: &ShellConfig, keys: &[Key], floor: Floor) -> Box<dyn WallSynthesizer> {
    let params = WallParams::new(config, keys);
    match config.mode {
        ShellMode::Basic => Box::new(BasicWalls::new(params, floor)),
        ShellMode::Tilt { .. } => Box::new(BasicWalls::tilted(params, floor)),
        ShellMode::Stilts => Box::new(StiltsWalls::new(params, floor)),
        ShellMode::Block => Box::new(BlockWalls::new(params, floor)),
    }
}

/// Walls for every vertex of a clockwise boundary. Edges shared with a
/// removed sliver are marked for rounding, on top of the edges that stay on
/// one key.
pub fn build_ring(
    synth: &dyn WallSynthesizer,
    points: &[KeyPoint],
    boundary: &[usize],
    removed: &[[usize; 3]],
) -> ShellResult<Vec<WallCrossSection>> {
    let n = boundary.len();
    if n < 3 {
        return Err(ShellError::invalid_boundary(format!(
            "boundary has only {n} points"
        )));
    }
    let point = |i: usize| {
        points
            .get(i)
            .ok_or_else(|| ShellError::invalid_boundary(format!("boundary index {i} out of range")))
    };
    let mut walls = Vec::with_capacity(n);
    for i in 0..n {
        let p = boundary[(i + n - 1) % n];
        let c = boundary[i];
        let x = boundary[(i + 1) % n];
        let mut wall = synth.cross_section(point(p)?, point(c)?, point(x)?, 0.0)?;
        wall.point = Some(c);
        if removed.iter().any(|t| t.contains(&c) && t.contains(&x)) {
            wall.round_next = true;
        }
        if removed.iter().any(|t| t.contains(&c) && t.contains(&p)) {
            wall.round_prev = true;
        }
        walls.push(wall);
    }
    Ok(walls)
}

// ── Offset bisector ─────────────────────────────────────────

/// Outward direction at `p2` whose offset lines stay parallel to both
/// adjacent edges. Fails on edges that vanish when projected along `z`.
pub fn offset_axis(p1: &Frame, p2: &Frame, p3: &Frame, z: Vec3) -> ShellResult<Vec3> {
    let z = z
        .normalized()
        .ok_or_else(|| ShellError::degenerate("wall up direction is zero length"))?;
    let origin = p2.origin();
    let a = p1.origin() - origin;
    let b = p3.origin() - origin;

    let a_proj = (a - z * a.dot(&z))
        .normalized()
        .ok_or_else(|| ShellError::degenerate("vectors are zero length"))?;
    let b_proj = (b - z * b.dot(&z))
        .normalized()
        .ok_or_else(|| ShellError::degenerate("vectors are zero length"))?;

    // Edge normals, both pointing out of a clockwise ring.
    let c = a.cross(&z).normalize();
    let d = z.cross(&b).normalize();

    if c.y == d.y && c.z == d.z {
        return Ok(c);
    }
    if a_proj.x == b_proj.x {
        return a
            .normalized()
            .ok_or_else(|| ShellError::degenerate("vectors are zero length"));
    }

    // The offset corner lies at c + a_proj * s, with s fixed by requiring
    // it to also sit on the offset of the second edge.
    let side_len = -(d - c).x / (b_proj - a_proj).x;
    let axis = a_proj * side_len + c;
    if !axis.is_finite() {
        return Err(ShellError::degenerate("invalid offset bisector"));
    }
    axis.normalized()
        .ok_or_else(|| ShellError::degenerate("invalid offset bisector"))
}

/// Frame at `p2` whose X axis is the offset axis and whose Z axis is `z`.
pub fn offset_bisector(p1: &Frame, p2: &Frame, p3: &Frame, z: Vec3) -> ShellResult<Frame> {
    let axis = offset_axis(p1, p2, p3, z)?;
    Ok(Frame::coord_system_change(p2.origin(), axis, z.normalize()))
}

fn xy_alignment(a: Vec3, b: Vec3) -> f64 {
    (a.x * b.x + a.y * b.y).abs()
}

/// Outward offset multiplier for rounded sides.
fn offset_scale(rounded_sides: bool, bisector: &Frame, pt: &Frame) -> f64 {
    if !rounded_sides {
        return 1.0;
    }
    let axis = bisector.axis(1.0, 0.0, 0.0);
    xy_alignment(axis, pt.axis(1.0, 0.0, 0.0)).max(xy_alignment(axis, pt.axis(0.0, 1.0, 0.0)))
}

// ── Shared profile ──────────────────────────────────────────

/// The part of a cross-section every mode computes the same way.
pub(crate) struct UpperProfile {
    pub bisect: Frame,
    pub ti: Frame,
    pub ki: Frame,
    pub to: Frame,
    pub x_out: f64,
    pub z_out: f64,
    pub thickness: f64,
}

impl UpperProfile {
    /// `own_z` uses `cur`'s Z axis instead of the weighted neighbour average.
    pub fn new(
        params: &WallParams,
        prev: &KeyPoint,
        cur: &KeyPoint,
        next: &KeyPoint,
        offset: f64,
        own_z: bool,
    ) -> ShellResult<Self> {
        let thickness = params.thickness + offset;
        let web = params.web_for(cur.key)?;
        let z = if own_z || params.shrouding != 0.0 {
            cur.frame.axis(0.0, 0.0, 1.0)
        } else {
            cur.frame.axis(0.0, 0.0, 1.0) + prev.frame.axis(0.0, 0.0, 0.5) + next.frame.axis(0.0, 0.0, 0.5)
        };
        let bisect = offset_bisector(&prev.frame, &cur.frame, &next.frame, z)?;
        let x_out = params.xy_offset * offset_scale(params.rounded_sides, &bisect, &cur.frame);
        let z_out = params.z_offset;

        // Shift the outer line so its distance to the inner line through ki
        // is exactly the wall thickness.
        let cos_th = z_out / x_out.hypot(z_out);
        let tan_th = x_out / z_out;
        let x_offset = thickness / cos_th - web * tan_th;

        Ok(Self {
            bisect,
            ti: bisect,
            ki: cur.frame.pretranslated(0.0, 0.0, -web),
            to: bisect.pretranslated(x_offset, 0.0, 0.0),
            x_out,
            z_out,
            thickness,
        })
    }

    pub fn outer_mid(&self) -> Frame {
        self.to.pretranslated(self.x_out, 0.0, -self.z_out)
    }

    /// Inner mid point, pulled in along `x_axis` so the lower wall keeps
    /// the full thickness measured against `mo`.
    pub fn inner_mid(&self, mo: &Frame, x_axis: Vec3) -> Frame {
        let mut mi = self.ti.pretranslated(self.x_out, 0.0, -self.z_out);
        let x_adj = self.thickness - mo.origin().dot(&x_axis) + mi.origin().dot(&x_axis);
        mi.translate(x_axis * -x_adj);
        mi
    }

    pub fn assemble(
        self,
        cur: &KeyPoint,
        prev: &KeyPoint,
        next: &KeyPoint,
        mi: Frame,
        mo: Frame,
        bi: Frame,
        bo: Frame,
    ) -> WallCrossSection {
        WallCrossSection {
            ti: self.ti,
            to: self.to,
            mi,
            mo,
            bi,
            bo,
            ki: self.ki,
            si: None,
            sm: None,
            key: cur.key,
            point: None,
            round_next: cur.key == next.key,
            round_prev: cur.key == prev.key,
        }
    }
}

/// Add the shroud frames and lift the top outer point.
pub(crate) fn apply_shroud(params: &WallParams, cur: &KeyPoint, wall: &mut WallCrossSection) {
    if !params.has_shroud() {
        return;
    }
    let lift = cur.frame.axis(0.0, 0.0, params.shrouding);
    let si = wall.ti.pretranslated(SHROUD_INSET, 0.0, 0.0);
    wall.sm = Some(si.translated(lift));
    wall.si = Some(si);
    wall.to.pretranslate(0.0, 0.0, params.shrouding);
}

// ── Intersection tests ──────────────────────────────────────

fn opposite_sides(a: f64, b: f64) -> bool {
    a * b <= 0.0
}

/// The walls fold when `w0` and `w2` project onto the same side of the
/// plane through `w1`'s bottom segment.
pub(crate) fn bisector_crossed_2d(w0: &WallCrossSection, w1: &WallCrossSection, w2: &WallCrossSection) -> bool {
    let seg = w1.bo.origin() - w1.bi.origin();
    let normal = Vec3::new(-seg.y, seg.x, 0.0);
    let side = |a: Vec3, b: Vec3| {
        let d = a - b;
        d.x * normal.x + d.y * normal.y
    };
    let inner_ok = opposite_sides(
        side(w0.bi.origin(), w1.bi.origin()),
        side(w2.bi.origin(), w1.bi.origin()),
    );
    let outer_ok = opposite_sides(
        side(w0.bo.origin(), w1.bo.origin()),
        side(w2.bo.origin(), w1.bo.origin()),
    );
    !(inner_ok && outer_ok)
}

/// Same test in 3D with the plane spanned by `up` and `w1`'s bottom segment.
pub(crate) fn bisector_crossed_3d(
    w0: &WallCrossSection,
    w1: &WallCrossSection,
    w2: &WallCrossSection,
    up: Vec3,
) -> bool {
    let out = w1.bo.origin() - w1.bi.origin();
    let normal = up.cross(&out);
    let i0 = (w0.bi.origin() - w1.bi.origin()).dot(&normal);
    let i1 = (w2.bi.origin() - w1.bi.origin()).dot(&normal);
    if !opposite_sides(i0, i1) {
        return true;
    }
    let o0 = (w0.bo.origin() - w1.bo.origin()).dot(&normal);
    let o1 = (w2.bo.origin() - w1.bo.origin()).dot(&normal);
    !opposite_sides(o0, o1)
}

pub(crate) fn shroud_crossed(w0: &WallCrossSection, w1: &WallCrossSection, w2: &WallCrossSection) -> bool {
    let (Some(sm0), Some(sm1), Some(si1), Some(sm2)) = (w0.sm, w1.sm, w1.si, w2.sm) else {
        return false;
    };
    let base = sm1.origin();
    let normal = (si1.origin() - base).cross(&(w1.to.origin() - base));
    let o0 = (sm0.origin() - base).dot(&normal);
    let o1 = (sm2.origin() - base).dot(&normal);
    !opposite_sides(o0, o1)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::footprint::{KeyKind, key_points};

    /// Corner points of one MX key at height `z`, in clockwise order.
    pub(crate) fn square_points(z: f64) -> Vec<KeyPoint> {
        let key = Key::new(KeyKind::MxBetter, Frame::at(Vec3::new(0.0, 0.0, z)));
        let polys = vec![key.critical_points(&key.position, 0.0)];
        key_points(&polys, &[key.position])
    }

    pub(crate) fn params(shrouding: f64) -> WallParams {
        WallParams {
            thickness: 4.0,
            shrouding,
            xy_offset: 5.0,
            z_offset: 15.0,
            rounded_sides: false,
            web_thickness: vec![4.7],
        }
    }

    fn ring(synth: &dyn WallSynthesizer, pts: &[KeyPoint]) -> Vec<WallCrossSection> {
        build_ring(synth, pts, &[0, 1, 2, 3], &[]).unwrap()
    }

    fn distance_to_line(p: Vec3, origin: Vec3, dir: Vec3) -> f64 {
        let d = dir.normalize();
        let v = p - origin;
        (v - d * v.dot(&d)).length()
    }

    #[test]
    fn test_offset_axis_square_corner() {
        let pts = square_points(0.0);
        let axis = offset_axis(&pts[0].frame, &pts[1].frame, &pts[2].frame, Vec3::Z).unwrap();
        let s = 1.0 / 2f64.sqrt();
        assert!((axis.x - s).abs() < 1e-12);
        assert!((axis.y - s).abs() < 1e-12);
        assert!(axis.z.abs() < 1e-12);
    }

    #[test]
    fn test_offset_axis_straight_edge() {
        let a = Frame::at(Vec3::new(-1.0, 0.0, 0.0));
        let b = Frame::at(Vec3::ZERO);
        let c = Frame::at(Vec3::new(1.0, 0.0, 0.0));
        let axis = offset_axis(&a, &b, &c, Vec3::Z).unwrap();
        assert!((axis.y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_offset_axis_zero_length_fails() {
        let a = Frame::at(Vec3::new(0.0, 0.0, 5.0));
        let b = Frame::identity();
        let c = Frame::at(Vec3::X);
        let err = offset_axis(&a, &b, &c, Vec3::Z).unwrap_err();
        assert!(matches!(err, ShellError::DegenerateInput { .. }));
        assert!(err.to_string().contains("zero length"));
    }

    #[test]
    fn test_wall_thickness_invariant() {
        let pts = square_points(30.0);
        let synth = BasicWalls::new(params(0.0), Floor::flat(0.0));
        for w in ring(&synth, &pts) {
            let dir = w.mo.origin() - w.to.origin();
            let d = distance_to_line(w.to.origin(), w.ki.origin(), dir);
            assert!((d - 4.0).abs() < 1e-3, "top thickness {d}");
            let y = w.ti.axis(0.0, 1.0, 0.0);
            let xa = Vec3::new(y.y, -y.x, 0.0);
            let lower = w.mo.origin().dot(&xa) - w.mi.origin().dot(&xa);
            assert!((lower - 4.0).abs() < 1e-9, "lower thickness {lower}");
        }
    }

    #[test]
    fn test_bottom_points_on_floor() {
        let pts = square_points(30.0);
        let synth = BasicWalls::new(params(0.0), Floor::flat(2.0));
        for w in ring(&synth, &pts) {
            assert!((w.bo.origin().z - 2.0).abs() < 1e-9);
            assert!((w.bi.origin().z - 2.0).abs() < 1e-9);
            assert!(w.mo.origin().z >= 2.0);
        }
    }

    #[test]
    fn test_low_key_clamps_mid_points() {
        let pts = square_points(8.0);
        let synth = BasicWalls::new(params(0.0), Floor::flat(0.0));
        for w in ring(&synth, &pts) {
            assert!(w.mo.origin().z > 0.0 && w.mo.origin().z < 0.01);
            assert!(w.mi.origin().z > 0.0 && w.mi.origin().z < 0.01);
            assert!((w.bo.origin().z).abs() < 1e-9);
        }
    }

    #[test]
    fn test_shroud_presence() {
        let pts = square_points(30.0);
        let with = BasicWalls::new(params(2.0), Floor::flat(0.0));
        let without = BasicWalls::new(params(1e-7), Floor::flat(0.0));
        let w = with.cross_section(&pts[3], &pts[0], &pts[1], 0.0).unwrap();
        assert!(w.has_shroud());
        assert!((w.sm.unwrap().origin().z - 32.0).abs() < 1e-9);
        assert!((w.to.origin().z - 32.0).abs() < 1e-9);
        let w = without.cross_section(&pts[3], &pts[0], &pts[1], 0.0).unwrap();
        assert!(w.si.is_none() && w.sm.is_none());
    }

    #[test]
    fn test_single_key_walls_round_both_sides() {
        let pts = square_points(30.0);
        let synth = BasicWalls::new(params(0.0), Floor::flat(0.0));
        let walls = ring(&synth, &pts);
        assert!(walls.iter().all(|w| w.round_next && w.round_prev));
        assert_eq!(walls[2].point, Some(2));
    }

    #[test]
    fn test_convex_ring_does_not_intersect() {
        let pts = square_points(30.0);
        let synth = BasicWalls::new(params(2.0), Floor::flat(0.0));
        let walls = ring(&synth, &pts);
        for i in 0..4 {
            let (a, b, c) = (&walls[(i + 3) % 4], &walls[i], &walls[(i + 1) % 4]);
            assert!(!synth.walls_intersect(a, b, c));
        }
    }

    #[test]
    fn test_folded_walls_intersect() {
        let pts = square_points(30.0);
        let synth = BasicWalls::new(params(0.0), Floor::flat(0.0));
        let walls = ring(&synth, &pts);
        // Walking back onto the same side folds the wall.
        assert!(synth.walls_intersect(&walls[3], &walls[0], &walls[3]));
    }

    #[test]
    fn test_build_ring_marks_removed_triangles() {
        let pts = square_points(30.0);
        let synth = BasicWalls::new(params(0.0), Floor::flat(0.0));
        let walls = build_ring(&synth, &pts, &[0, 1, 2, 3], &[[0, 1, 2]]).unwrap();
        assert!(walls[0].round_next);
        assert!(walls[1].round_prev);
    }

    #[test]
    fn test_build_ring_rounds_slivers_and_single_key_edges() {
        let keys = [0.0, 19.0].map(|x| Key::new(KeyKind::MxBetter, Frame::at(Vec3::new(x, 0.0, 30.0))));
        let polys: Vec<_> = keys.iter().map(|k| k.critical_points(&k.position, 0.0)).collect();
        let holes: Vec<Frame> = keys.iter().map(|k| k.position).collect();
        let pts = key_points(&polys, &holes);
        let two_keys = WallParams {
            web_thickness: vec![4.7, 4.7],
            ..params(0.0)
        };
        let synth = BasicWalls::new(two_keys, Floor::flat(0.0));
        // Outer corners only: TL and BL of the left key, TR and BR of the right.
        let boundary = [0, 5, 6, 3];
        let flags = |walls: &[WallCrossSection]| walls.iter().map(|w| (w.round_prev, w.round_next)).collect::<Vec<_>>();

        let plain = build_ring(&synth, &pts, &boundary, &[]).unwrap();
        assert_eq!(flags(&plain), vec![(true, false), (false, true), (true, false), (false, true)]);

        let walls = build_ring(&synth, &pts, &boundary, &[[0, 5, 1]]).unwrap();
        assert_eq!(flags(&walls), vec![(true, true), (true, true), (true, false), (false, true)]);
    }

    #[test]
    fn test_build_ring_rejects_short_boundary() {
        let pts = square_points(30.0);
        let synth = BasicWalls::new(params(0.0), Floor::flat(0.0));
        assert!(build_ring(&synth, &pts, &[0, 1], &[]).is_err());
    }
}

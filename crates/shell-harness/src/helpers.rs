//! Helper functions: error types, key layout fixtures, outline math.

use shell_kernel::geometry::planar::signed_area;
use shell_kernel::web::{EdgeReinforcement, Face, MAX_WEB_THICKNESS, WebFace};
use shell_kernel::{Frame, Key, KeyKind, PipelineError, ShellError, ShellLayout, Vec2, Vec3};

// ── Error Type ──────────────────────────────────────────────────────────────

/// Unified error type for the test harness.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("key not found: {name}")]
    KeyNotFound { name: String },

    #[error("duplicate name: {name}")]
    DuplicateName { name: String },

    #[error("layout has not been built")]
    NotBuilt,

    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("kernel error: {0}")]
    Kernel(#[from] ShellError),

    #[error("assertion failed: {detail}")]
    AssertionFailed { detail: String },

    #[error("oracle failure ({oracle}): {detail}")]
    OracleFailure { oracle: String, detail: String },
}

// ── Key Layout Fixtures ─────────────────────────────────────────────────────

/// Standard key pitch (mm).
pub const PITCH: f64 = 19.0;

/// One MX key at `(x, y, z)`.
pub fn mx_at(x: f64, y: f64, z: f64) -> Key {
    Key::new(KeyKind::MxBetter, Frame::at(Vec3::new(x, y, z)))
}

/// `cols` x `rows` MX keys at height `z`, row-major from the top left.
pub fn key_grid(cols: usize, rows: usize, pitch: f64, z: f64) -> Vec<Key> {
    (0..rows)
        .flat_map(|r| (0..cols).map(move |c| mx_at(c as f64 * pitch, -(r as f64) * pitch, z)))
        .collect()
}

/// A 3x3 grid with the bottom-right key missing.
pub fn l_shape(z: f64) -> Vec<Key> {
    let mut keys = key_grid(3, 3, PITCH, z);
    keys.pop();
    keys
}

/// Columns shifted vertically by `stagger[c]`, as on a column-staggered
/// split keyboard.
pub fn staggered_columns(rows: usize, stagger: &[f64], z: f64) -> Vec<Key> {
    stagger
        .iter()
        .enumerate()
        .flat_map(|(c, &dy)| (0..rows).map(move |r| mx_at(c as f64 * PITCH, dy - r as f64 * PITCH, z)))
        .collect()
}

/// Keys fanned around a pivot below the first key, each turned `step_deg`
/// further than the last and tilted up on the outside.
pub fn thumb_arc(count: usize, step_deg: f64, z: f64) -> Vec<Key> {
    let pivot = Vec3::new(0.0, -60.0, z);
    (0..count)
        .map(|i| {
            let angle = -(i as f64) * step_deg;
            let start = Vec3::new(0.0, 0.0, z);
            let frame = Frame::at(start)
                .rotated(5.0, start, Vec3::Y)
                .rotated(angle, pivot, Vec3::Z);
            Key::new(KeyKind::MxBetter, frame)
        })
        .collect()
}

// ── Outline Math ────────────────────────────────────────────────────────────

/// The flattened wall outline of a layout.
pub fn outline(layout: &ShellLayout) -> Vec<Vec2> {
    layout
        .boundary()
        .iter()
        .filter_map(|&i| layout.triangulation.points.get(i).copied())
        .collect()
}

/// Area enclosed by the outline (always positive).
pub fn outline_area(layout: &ShellLayout) -> f64 {
    signed_area(&outline(layout)).abs()
}

/// Axis-aligned bounds of every wall frame: `(min, max)`.
pub fn wall_bounds(layout: &ShellLayout) -> Option<(Vec3, Vec3)> {
    let mut frames = layout.walls.iter().flat_map(|w| w.frames()).map(|f| f.origin());
    let first = frames.next()?;
    Some(frames.fold((first, first), |(lo, hi), p| {
        (
            Vec3::new(lo.x.min(p.x), lo.y.min(p.y), lo.z.min(p.z)),
            Vec3::new(hi.x.max(p.x), hi.y.max(p.y), hi.z.max(p.z)),
        )
    }))
}

/// Horizontal wall thickness of the lower wall section: the distance
/// between the outer and inner mid frames across the wall.
pub fn lower_wall_thickness(wall: &shell_kernel::WallCrossSection) -> f64 {
    let along = wall.ti.axis(0.0, 1.0, 0.0);
    let across = Vec3::new(along.y, -along.x, 0.0);
    wall.mo.origin().dot(&across) - wall.mi.origin().dot(&across)
}

// ── Web Math ────────────────────────────────────────────────────────────────

/// Corner `i` of a web face as it was before thickening.
pub fn web_corner(layout: &ShellLayout, face: Face, i: usize) -> Option<Frame> {
    let point = layout.key_points.get(i)?;
    match face {
        Face::Top => Some(point.frame),
        Face::Bottom => {
            let web = *layout.web_thickness.get(point.key)?;
            Some(point.frame.pretranslated(0.0, 0.0, -web))
        }
    }
}

/// Thickness at one end of a reinforced edge, measured from the point the
/// face holds for it: the distance from the corner's underside to the line
/// running from that point to the corner across the gap, in the plane
/// across the edge.
fn web_side_thickness(layout: &ShellLayout, web: &WebFace, edge: &EdgeReinforcement, side: usize, tangent: Vec3) -> Option<f64> {
    let corner = web_corner(layout, web.face, edge.corners[side])?;
    let across = web_corner(layout, web.face, edge.across[side]?)?;
    let key = layout.key_points.get(edge.corners[side])?.key;
    let th = layout.web_thickness.get(key)?.min(MAX_WEB_THICKNESS);
    let moved = web.points.get(edge.moved[side])?.origin();

    let under = corner.origin() + corner.axis(0.0, 0.0, -web.face.sign() * th);
    let toward = (across.origin() - moved).reject_from(&tangent);
    let down = (under - moved).reject_from(&tangent);
    let len = toward.length();
    if len < 1e-12 {
        return Some(0.0);
    }
    Some(toward.cross(&down).length() / len)
}

/// Web thickness of a reinforced edge recomputed from the face's points,
/// averaged over the ends that have a corner across the gap.
pub fn web_edge_thickness(layout: &ShellLayout, web: &WebFace, edge: &EdgeReinforcement) -> Option<f64> {
    let [c1, c2] = edge.corners.map(|c| web_corner(layout, web.face, c));
    let tangent = (c2?.origin() - c1?.origin()).normalized()?;
    let sides: Vec<f64> = (0..2)
        .filter_map(|s| web_side_thickness(layout, web, edge, s, tangent))
        .collect();
    match sides[..] {
        [a, b] => Some((a + b) / 2.0),
        [a] => Some(a),
        _ => None,
    }
}

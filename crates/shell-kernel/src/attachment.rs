//! Screw inserts, the microcontroller holder and its connector.
//!
//! Every attachment is a fractional wall index: the integer part picks the
//! wall segment and the fraction interpolates along it. The connector sits
//! on the back half of the ring, the holder is fastened at three mounts
//! around it and screw inserts are then placed greedily at segment
//! midpoints, one at a time, until every automatic slot is filled.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::{BoardConfig, HolderBounds, ScrewConfig, ScrewMount, ScrewSize, ShellConfig, ShellMode};
use crate::error::{AttachmentKind, ShellError, ShellResult};
use crate::floor::Floor;
use crate::geometry::planar::line_circle_intersections;
use crate::geometry::{Frame, Vec3};
use crate::wall::WallCrossSection;

/// Gap left between the holder origin and the lowest wall under it.
pub const BOARD_HOLDER_OFFSET: f64 = 0.02;
/// Stilts connectors whose screws let the case tip further than this are penalised.
const MAX_TIPPAGE: f64 = 20.0;
const TIPPING_PENALTY: f64 = 1e6;
/// Material around an insert.
const INSERT_WALL: f64 = 1.6;
/// Head room the screw needs above the insert.
const INSERT_HEAD_ROOM: f64 = 5.0;
const MAX_ADJUST_ITERATIONS: usize = 100;
/// Refinement samples either side of the best integer wall, in tenths.
const REFINE_STEPS: i32 = 9;
const MM_PER_INCH: f64 = 25.4;

// ── Screw catalogue ─────────────────────────────────────────

/// Hole dimensions of one screw size as `(diameter, height)` per mount.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ScrewSpec {
    insert: (f64, f64),
    tapered: (f64, f64),
    expanding: (f64, f64),
    tapped: (f64, f64),
    plate_diameter: f64,
    countersunk_diameter: f64,
}

impl ScrewSpec {
    fn scaled(self, k: f64) -> Self {
        let s = |(d, h): (f64, f64)| (d * k, h * k);
        Self {
            insert: s(self.insert),
            tapered: s(self.tapered),
            expanding: s(self.expanding),
            tapped: s(self.tapped),
            plate_diameter: self.plate_diameter * k,
            countersunk_diameter: self.countersunk_diameter * k,
        }
    }

    fn hole(&self, mount: ScrewMount) -> (f64, f64) {
        match mount {
            ScrewMount::Insert => self.insert,
            ScrewMount::TaperedInsert => self.tapered,
            ScrewMount::ExpandingInsert => self.expanding,
            ScrewMount::TappedHole => self.tapped,
        }
    }
}

impl ScrewSize {
    fn spec(self) -> ScrewSpec {
        match self {
            ScrewSize::M3 => ScrewSpec {
                insert: (4.3, 5.0),
                tapered: (5.0, 4.6),
                expanding: (4.0, 4.8),
                tapped: (2.5, 4.8),
                plate_diameter: 3.4,
                countersunk_diameter: 6.3,
            },
            ScrewSize::M4 => ScrewSpec {
                insert: (5.6, 5.5),
                tapered: (5.6, 5.5),
                expanding: (5.6, 6.4),
                tapped: (3.3, 6.4),
                plate_diameter: 4.5,
                countersunk_diameter: 9.4,
            },
            ScrewSize::No4_40 => ScrewSpec {
                insert: (0.159, 0.165),
                tapered: (0.153, 0.165),
                expanding: (0.156, 0.188),
                tapped: (0.089, 0.188),
                plate_diameter: 0.1285,
                countersunk_diameter: 0.28125,
            }
            .scaled(MM_PER_INCH),
            ScrewSize::No6_32 => ScrewSpec {
                insert: (0.191, 0.18),
                tapered: (0.199, 0.18),
                expanding: (0.188, 0.25),
                tapped: (0.107, 0.25),
                plate_diameter: 0.1495,
                countersunk_diameter: 0.34375,
            }
            .scaled(MM_PER_INCH),
        }
    }
}

/// Size of the boss that carries one screw insert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InsertDimensions {
    pub diameter: f64,
    pub height: f64,
    pub outer_bottom_radius: f64,
    pub outer_top_radius: f64,
    pub plate_diameter: f64,
    pub countersunk_diameter: f64,
}

impl InsertDimensions {
    pub fn new(size: ScrewSize, mount: ScrewMount) -> Self {
        let spec = size.spec();
        let (diameter, height) = spec.hole(mount);
        let outer = diameter / 2.0 + INSERT_WALL;
        Self {
            diameter,
            height,
            outer_bottom_radius: outer,
            outer_top_radius: outer,
            plate_diameter: spec.plate_diameter,
            countersunk_diameter: spec.countersunk_diameter,
        }
    }

    pub fn for_config(config: &ScrewConfig) -> Self {
        Self::new(config.size, config.mount)
    }

    /// Wall height a segment needs before a screw can pass through it.
    pub fn clearance_height(&self) -> f64 {
        self.height + self.outer_top_radius + INSERT_HEAD_ROOM
    }

    /// Radius of the screw bosses on the microcontroller holder.
    pub fn holder_outer_radius(&self) -> f64 {
        self.countersunk_diameter / 2.0 + 1.5
    }

    /// Default minimum distance between two inserts.
    pub fn min_spacing(&self) -> f64 {
        self.outer_bottom_radius * 2.0
    }

    /// How far a positioned insert sits inside the wall.
    fn inset(&self) -> f64 {
        self.outer_bottom_radius.max(self.countersunk_diameter / 2.0 + 1.0)
    }
}

/// Holder bounds moved to `origin`. Only the XY position is applied.
pub fn holder_at(bounds: &HolderBounds, origin: Vec3) -> HolderBounds {
    HolderBounds {
        min_x: origin.x + bounds.min_x,
        max_x: origin.x + bounds.max_x,
        min_y: origin.y + bounds.min_y,
        max_y: origin.y + bounds.max_y,
    }
}

// ── Results ─────────────────────────────────────────────────

/// The three points that fasten the microcontroller holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardMount {
    TopLeft,
    TopRight,
    BottomLeft,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoardIndices {
    pub top_left: f64,
    pub top_right: f64,
    pub bottom_left: f64,
}

impl BoardIndices {
    pub fn mounts(&self) -> [(BoardMount, f64); 3] {
        [
            (BoardMount::TopLeft, self.top_left),
            (BoardMount::TopRight, self.top_right),
            (BoardMount::BottomLeft, self.bottom_left),
        ]
    }

    fn distinct(&self) -> bool {
        self.top_left != self.top_right && self.top_left != self.bottom_left && self.top_right != self.bottom_left
    }
}

/// A resolved attachment: its wall index and the frame the part is built on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub index: f64,
    pub frame: Frame,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoardPlacement {
    pub mount: BoardMount,
    pub index: f64,
    pub frame: Frame,
}

/// Placement outcome per category. A failing category leaves the others intact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentLayout {
    /// `None` when no holder is configured.
    pub connector: Option<ShellResult<Placement>>,
    pub board: Option<ShellResult<Vec<BoardPlacement>>>,
    pub screws: ShellResult<Vec<Placement>>,
}

impl AttachmentLayout {
    fn failed(config: &ShellConfig, err: ShellError) -> Self {
        Self {
            connector: config.board.map(|_| Err(err.clone())),
            board: config.board.map(|_| Err(err.clone())),
            screws: Err(err),
        }
    }

    pub fn errors(&self) -> Vec<&ShellError> {
        let mut errors = Vec::new();
        if let Some(Err(e)) = &self.connector {
            errors.push(e);
        }
        if let Some(Err(e)) = &self.board {
            errors.push(e);
        }
        if let Err(e) = &self.screws {
            errors.push(e);
        }
        errors
    }

    pub fn is_complete(&self) -> bool {
        self.errors().is_empty()
    }

    /// Placed screws, empty when screw placement failed.
    pub fn screw_placements(&self) -> &[Placement] {
        self.screws.as_deref().unwrap_or(&[])
    }
}

/// Where a wall profile crosses a vertical line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WallCrossing {
    /// First wall past the line.
    pub wall: usize,
    /// The wall before it in walking order.
    pub next: usize,
    pub first: Vec3,
    pub second: Vec3,
    /// Profile Y interpolated at the line.
    pub y: f64,
}

/// Walk the ring from `start` in steps of `step` until a wall lies past `x`
/// (`check` = 1 for "greater", -1 for "smaller") and interpolate the
/// profile's Y there.
pub fn wall_x_to_y(
    walls: &[WallCrossSection],
    x: f64,
    start: isize,
    step: isize,
    check: f64,
    profile: impl Fn(&WallCrossSection) -> Frame,
) -> Option<WallCrossing> {
    let n = walls.len() as isize;
    if n == 0 {
        return None;
    }
    let mut ind = start.rem_euclid(n);
    for _ in 0..n {
        let first = profile(&walls[ind as usize]).origin();
        if first.x * check > x * check {
            let next = (ind - step).rem_euclid(n) as usize;
            let second = profile(&walls[next]).origin();
            let dx = second.x - first.x;
            let y = if dx == 0.0 {
                first.y
            } else {
                (x - first.x) / dx * (second.y - first.y) + first.y
            };
            return Some(WallCrossing {
                wall: ind as usize,
                next,
                first,
                second,
                y,
            });
        }
        ind = (ind + step).rem_euclid(n);
    }
    None
}

/// A line between two supports the case could tip over.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tip {
    pub i: usize,
    pub j: usize,
    /// Lever arm of `pressed` about the line.
    pub tippage: f64,
}

/// Support lines through pairs of `origins` that have every other support
/// on the far side from `pressed`.
pub fn tipping_lines(origins: &[Vec3], pressed: Vec3) -> Vec<Tip> {
    let mut tips = Vec::new();
    for i in 0..origins.len() {
        for j in 0..i {
            let o1 = origins[i];
            let mut line = origins[j] - o1;
            line.z = 0.0;
            let normal = line.normalize().cross(&Vec3::Z);
            let tippage = (pressed - o1).dot(&normal);
            let good = origins
                .iter()
                .enumerate()
                .filter(|&(k, _)| k != i && k != j)
                .all(|(_, o)| tippage * (*o - o1).dot(&normal) <= 0.0);
            if good {
                tips.push(Tip {
                    i,
                    j,
                    tippage: tippage.abs(),
                });
            }
        }
    }
    tips
}

/// Board and holder state the screw search keeps clear of.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HolderContext {
    pub board: Option<BoardIndices>,
    /// Holder footprint in world XY.
    pub holder: Option<HolderBounds>,
    /// Origin of the placed connector.
    pub connector: Option<Vec3>,
}

/// A placed attachment at the point its clearance is measured from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttachmentPoint {
    pub kind: AttachmentKind,
    pub index: f64,
    pub origin: Vec3,
}

// ── Wall ring ───────────────────────────────────────────────

/// The finished wall ring as seen by the placement searches.
#[derive(Debug, Clone, Copy)]
pub struct WallRing<'a> {
    walls: &'a [WallCrossSection],
    dims: InsertDimensions,
    mode: ShellMode,
    world_z: Vec3,
    bottom_z: f64,
}

impl<'a> WallRing<'a> {
    pub fn new(walls: &'a [WallCrossSection], dims: InsertDimensions, mode: ShellMode, floor: &Floor) -> ShellResult<Self> {
        if walls.len() < 3 {
            return Err(ShellError::invalid_boundary(format!(
                "a wall ring needs 3 walls, got {}",
                walls.len()
            )));
        }
        if !walls.iter().all(WallCrossSection::is_finite) {
            return Err(ShellError::degenerate("NaN point coordinates in the wall ring"));
        }
        let n = walls.len();
        for (w, wall) in walls.iter().enumerate() {
            let along = wall.bi.origin() - walls[(w + 1) % n].bi.origin();
            if along.cross(&Vec3::Z).normalized().is_none() {
                return Err(ShellError::degenerate(format!(
                    "wall segment {w} has no length in the floor plane"
                )));
            }
        }
        Ok(Self {
            walls,
            dims,
            mode,
            world_z: floor.world_z,
            bottom_z: floor.bottom_z,
        })
    }

    pub fn len(&self) -> usize {
        self.walls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.walls.is_empty()
    }

    pub fn dims(&self) -> &InsertDimensions {
        &self.dims
    }

    fn with_floor(self, world_z: Vec3, bottom_z: f64) -> Self {
        Self {
            world_z,
            bottom_z,
            ..self
        }
    }

    fn is_stilts(&self) -> bool {
        self.mode.is_stilts()
    }

    /// Wall segment and lerp parameter of a fractional index.
    fn split(&self, i: f64) -> (usize, usize, f64) {
        let n = self.walls.len();
        let i = i.rem_euclid(n as f64);
        let whole = i.floor();
        let w = (whole as usize) % n;
        (w, (w + 1) % n, i - whole)
    }

    fn lerp(&self, i: f64, profile: impl Fn(&WallCrossSection) -> Frame) -> Vec3 {
        let (w, next, t) = self.split(i);
        profile(&self.walls[w]).origin().lerp(&profile(&self.walls[next]).origin(), t)
    }

    /// Height of the lowered key corners above the floor at `i`.
    pub fn height_at(&self, i: f64) -> f64 {
        self.lerp(i, |w| w.ki).dot(&self.world_z) - self.bottom_z
    }

    fn centroid(&self) -> Vec3 {
        let sum = self.walls.iter().fold(Vec3::ZERO, |acc, w| acc + w.bi.origin());
        sum / self.walls.len() as f64
    }

    /// Centre of an insert at `i`, one boss radius inside the inner wall.
    /// Segment lengths are checked when the ring is built.
    pub fn screw_origin(&self, i: f64) -> Vec3 {
        let (w, next, t) = self.split(i);
        let this = self.walls[w].bi.origin();
        let that = self.walls[next].bi.origin();
        let normal = -(this - that).normalize().cross(&Vec3::Z);
        this.lerp(&that, t) + normal * self.dims.outer_bottom_radius
    }

    /// Frame an attachment at `i` is built on. X points into the case.
    pub fn position_frame(&self, i: f64) -> ShellResult<Frame> {
        let (w, next, t) = self.split(i);
        let this = self.walls[w].bi.origin();
        let that = self.walls[next].bi.origin();
        let z = if self.is_stilts() {
            (self.lerp(i, |wall| wall.mi) - this.lerp(&that, t))
                .normalized()
                .ok_or_else(|| ShellError::degenerate(format!("wall {w} has no height")))?
        } else {
            self.world_z
        };
        let mut normal = (this - that)
            .normalized()
            .ok_or_else(|| ShellError::degenerate(format!("wall segment {w} has zero length")))?
            .cross(&z);
        if z.z > 0.0 {
            normal = -normal;
        }
        let center = this.lerp(&that, t) + normal * self.dims.inset();
        Ok(Frame::coord_system_change(center, normal, z))
    }

    /// Push `origin` away from every outer wall segment a circle of
    /// `radius` around it crosses.
    pub fn adjusted_stilts_origin(&self, origin: Vec3, radius: f64) -> Option<Vec3> {
        let n = self.walls.len();
        let mut origin = origin;
        let mut iterations = 0;
        loop {
            let mut converged = true;
            for i in 0..n {
                let bo = self.walls[i].bo.origin();
                let bon = self.walls[(i + 1) % n].bo.origin();
                if line_circle_intersections(bo, bon, origin, radius).is_empty() {
                    continue;
                }
                let normal = Vec3::new(bo.y - bon.y, bon.x - bo.x, 0.0).normalize();
                let distance = (origin - bo).dot(&normal) + radius;
                origin -= normal * (distance * 0.5 + 0.1);
                converged = false;
                iterations += 1;
            }
            if converged {
                return Some(origin);
            }
            if iterations >= MAX_ADJUST_ITERATIONS {
                return None;
            }
        }
    }

    fn screw_frame(&self, i: f64) -> ShellResult<Frame> {
        let mut frame = self.position_frame(i)?;
        if self.is_stilts() {
            let origin = frame.origin();
            match self.adjusted_stilts_origin(origin, self.dims.outer_bottom_radius) {
                Some(adjusted) => {
                    frame.translate(adjusted - origin);
                }
                None => warn!(index = i, "stilts screw did not clear the outer wall"),
            }
        }
        Ok(frame)
    }

    /// Largest lever arm about any support line when pressing on a wall.
    /// Zero when fewer than two screws are placed.
    pub fn max_tip(&self, indices: &[f64]) -> f64 {
        let origins: Vec<Vec3> = indices.iter().map(|&i| self.screw_origin(i)).collect();
        self.walls
            .iter()
            .flat_map(|w| tipping_lines(&origins, w.bo.origin()))
            .map(|t| t.tippage)
            .fold(0.0, f64::max)
    }

    /// Distance two attachments are kept apart by. Stilts shells measure it
    /// in the floor plane.
    pub fn clearance_distance(&self, a: Vec3, b: Vec3) -> f64 {
        if self.is_stilts() {
            (a - b).length_on_plane(&self.world_z)
        } else {
            (a - b).length()
        }
    }

    /// Every placed screw, holder mount and connector. Screws and mounts are
    /// measured at their boss centres, the connector at its frame origin.
    pub fn attachment_points(&self, layout: &AttachmentLayout) -> Vec<AttachmentPoint> {
        let mut points: Vec<AttachmentPoint> = layout
            .screw_placements()
            .iter()
            .map(|p| AttachmentPoint {
                kind: AttachmentKind::Screws,
                index: p.index,
                origin: self.screw_origin(p.index),
            })
            .collect();
        if let Some(Ok(mounts)) = &layout.board {
            points.extend(mounts.iter().map(|m| AttachmentPoint {
                kind: AttachmentKind::Board,
                index: m.index,
                origin: self.screw_origin(m.index),
            }));
        }
        if let Some(Ok(c)) = &layout.connector {
            points.push(AttachmentPoint {
                kind: AttachmentKind::Connector,
                index: c.index,
                origin: c.frame.origin(),
            });
        }
        points
    }

    /// Pairs of placed attachments and their clearance distance.
    pub fn attachment_pairs(&self, layout: &AttachmentLayout) -> Vec<(AttachmentPoint, AttachmentPoint, f64)> {
        let points = self.attachment_points(layout);
        points
            .iter()
            .enumerate()
            .flat_map(|(i, a)| {
                points[i + 1..]
                    .iter()
                    .map(move |b| (*a, *b, self.clearance_distance(a.origin, b.origin)))
            })
            .collect()
    }

    /// Reject holder mounts that crowd each other.
    fn check_mount_clearance(&self, indices: BoardIndices, min: f64) -> ShellResult<BoardIndices> {
        let mounts = indices.mounts();
        for (i, &(a, ia)) in mounts.iter().enumerate() {
            for &(b, ib) in &mounts[i + 1..] {
                let d = self.clearance_distance(self.screw_origin(ia), self.screw_origin(ib));
                if d < min {
                    return Err(ShellError::unplaceable(
                        AttachmentKind::Board,
                        format!("holder mounts {a:?} and {b:?} are only {d:.2} apart, need {min:.2}"),
                    ));
                }
            }
        }
        Ok(indices)
    }

    // ── Screws ──────────────────────────────────────────────

    fn scoring(&self, ctx: &HolderContext, min_clearance: Option<f64>) -> Scoring<'_, 'a> {
        let min_holder_disp = self.dims.min_spacing();
        Scoring {
            ring: self,
            ki_max: self
                .walls
                .iter()
                .map(|w| w.ki.origin().dot(&self.world_z))
                .fold(f64::NEG_INFINITY, f64::max),
            insert_height: self.dims.height,
            min_displacement: min_clearance.unwrap_or(min_holder_disp),
            min_holder_disp,
            board: ctx.board,
            holder: ctx.holder,
            connector: ctx.connector,
        }
    }

    /// Greedily pick up to `wanted` segment midpoints not in `taken`.
    pub fn auto_screw_positions(
        &self,
        ctx: &HolderContext,
        taken: &[f64],
        wanted: usize,
        min_clearance: Option<f64>,
    ) -> Vec<f64> {
        let scoring = self.scoring(ctx, min_clearance);
        let mut taken = taken.to_vec();
        let mut placed = Vec::with_capacity(wanted);
        while placed.len() < wanted {
            let mut best = f64::NEG_INFINITY;
            let mut best_pos = None;
            for w in 0..self.walls.len() {
                let candidate = w as f64 + 0.5;
                if taken.contains(&candidate) {
                    continue;
                }
                let score = scoring.score(candidate, &taken);
                if score > best {
                    best = score;
                    best_pos = Some(candidate);
                }
            }
            let Some(pos) = best_pos else {
                break;
            };
            debug!(index = pos, score = best, "screw insert placed");
            taken.push(pos);
            placed.push(pos);
        }
        placed
    }

    /// Requested screw indices with every automatic (negative) slot filled.
    /// The top-left holder mount seeds the search when it doubles as a screw.
    pub fn screw_indices(
        &self,
        screws: &ScrewConfig,
        board: Option<&BoardConfig>,
        ctx: &HolderContext,
    ) -> ShellResult<Vec<f64>> {
        let board_screws: Vec<f64> = match (board, ctx.board) {
            (Some(cfg), Some(b)) if cfg.top_left_is_screw => vec![b.top_left],
            _ => Vec::new(),
        };
        let mut slots: Vec<Option<f64>> = board_screws
            .iter()
            .copied()
            .map(Some)
            .chain(screws.indices.iter().map(|&i| (i >= 0.0).then_some(i)))
            .collect();
        let seed: Vec<f64> = slots.iter().flatten().copied().collect();
        let missing = slots.iter().filter(|s| s.is_none()).count();
        if missing > 0 {
            let mut auto = self
                .auto_screw_positions(ctx, &seed, missing, screws.min_clearance)
                .into_iter();
            for slot in slots.iter_mut().filter(|s| s.is_none()) {
                *slot = auto.next();
            }
        }
        let unfilled = slots.iter().filter(|s| s.is_none()).count();
        if unfilled > 0 {
            let requested = screws.indices.len();
            return Err(ShellError::unplaceable(
                AttachmentKind::Screws,
                format!("placed {} of {requested} screw inserts", requested - unfilled),
            ));
        }
        Ok(slots.into_iter().skip(board_screws.len()).flatten().collect())
    }

    // ── Holder ──────────────────────────────────────────────

    /// Best half-segment for `error`, among those whose local centre passes
    /// `accept` and whose wall is tall enough for a screw. Returns the index
    /// and its error, infinite when nothing qualified.
    fn find_closest_wall(
        &self,
        to_local: &Frame,
        accept: impl Fn(Vec3) -> bool,
        error: impl Fn(Vec3) -> f64,
        refine: bool,
    ) -> (f64, f64) {
        let n = self.walls.len() as f64;
        let min_height = self.dims.clearance_height();
        let mut best_error = f64::INFINITY;
        let mut best_wall = 0.0;
        for w in 0..self.walls.len() {
            let i = w as f64 + 0.5;
            let center = to_local.apply(self.screw_origin(i));
            if !accept(center) || self.height_at(i) < min_height {
                continue;
            }
            let e = error(center);
            if e < best_error {
                best_error = e;
                best_wall = i;
            }
        }
        if refine {
            for step in -REFINE_STEPS..=REFINE_STEPS {
                if step == 0 {
                    continue;
                }
                let wall = (best_wall + step as f64 / 10.0 + n) % n;
                let e = error(to_local.apply(self.screw_origin(wall)));
                if e < best_error {
                    best_error = e;
                    best_wall = wall;
                }
            }
        }
        (best_wall, best_error)
    }

    /// Mount indices for a holder at `origin` and the fit error.
    pub fn find_board_walls(&self, origin: &Frame, bounds: &HolderBounds, refine: bool) -> ShellResult<(BoardIndices, f64)> {
        let to_local = origin
            .inverted()
            .ok_or_else(|| ShellError::degenerate("connector frame is singular"))?;
        let r = self.dims.outer_bottom_radius;
        let p1 = Vec3::new(bounds.min_x - r, bounds.max_y, 0.0);
        let p2 = Vec3::new(bounds.max_x + r, bounds.max_y, 0.0);
        let p3 = Vec3::new(bounds.min_x - r, bounds.min_y, 0.0);

        let (i1, e1) = self.find_closest_wall(&to_local, |p| p.x < p1.x, |p| (p - p1).length_squared(), refine);
        let (i2, e2) = self.find_closest_wall(&to_local, |p| p.x > p2.x, |p| (p - p2).length_squared(), refine);
        let (i3, e3) = self.find_closest_wall(&to_local, |p| p.x < p3.x, |p| (p.y - p3.y).abs(), refine);

        let indices = BoardIndices {
            top_left: i1,
            top_right: i2,
            bottom_left: i3,
        };
        let mut error = e1 + e2 + (to_local.apply(self.screw_origin(i3)) - p3).length_squared();
        if !e3.is_finite() || !indices.distinct() {
            error = f64::INFINITY;
        }
        debug!(?indices, error, "holder mounts");
        Ok((indices, error))
    }

    pub fn board_indices(&self, origin: &Frame, bounds: &HolderBounds) -> ShellResult<BoardIndices> {
        let (indices, error) = self.find_board_walls(origin, bounds, false)?;
        if !error.is_finite() {
            return Err(ShellError::unplaceable(
                AttachmentKind::Board,
                "no walls to fasten the holder to; the board may be too close to the edge",
            ));
        }
        Ok(indices)
    }

    fn min_wall_y(&self, i: usize) -> f64 {
        let next = (i + 1) % self.walls.len();
        self.walls[i].bi.origin().y.min(self.walls[next].bi.origin().y)
    }

    /// Frame of a connector at wall `wall`, lowered to sit on the lowest
    /// inner wall under the holder.
    pub fn origin_for_connector(&self, wall: f64, bounds: &HolderBounds) -> ShellResult<Frame> {
        let n = self.walls.len();
        let (idx, next, t) = self.split(wall);
        let w = &self.walls[idx];
        let vert = (w.mi.origin() - w.bi.origin())
            .normalized()
            .ok_or_else(|| ShellError::degenerate(format!("wall {idx} has no height at the connector")))?;
        let horiz = Vec3::new(vert.z, 0.0, -vert.x)
            .normalized()
            .ok_or_else(|| ShellError::degenerate(format!("wall {idx} faces sideways at the connector")))?;
        let up = (vert + Vec3::Z)
            .reject_from(&horiz)
            .normalized()
            .ok_or_else(|| ShellError::degenerate(format!("wall {idx} hangs downward at the connector")))?;

        let mut pos = w.bi.origin().lerp(&self.walls[next].bi.origin(), t);
        let hb = holder_at(bounds, pos);
        let left = wall_x_to_y(self.walls, hb.min_x, idx as isize + 1, -1, -1.0, |w| w.bi);
        let right = wall_x_to_y(self.walls, hb.max_x, idx as isize, 1, 1.0, |w| w.bi);
        if let (Some(left), Some(right)) = (left, right) {
            let mut lowest = left.y.min(right.y);
            let mut i = left.wall;
            for _ in 0..n {
                if i == right.wall {
                    break;
                }
                lowest = lowest.min(self.min_wall_y(i));
                i = (i + 1) % n;
            }
            pos.y = lowest + BOARD_HOLDER_OFFSET;
        }
        Ok(Frame::coord_system_change(pos, horiz, up))
    }

    fn connector_error(&self, wall: f64, board: &BoardConfig, screws: &ScrewConfig) -> ShellResult<f64> {
        let bounds = &board.bounds;
        let origin = self.origin_for_connector(wall, bounds)?;
        let (_, mut error) = self.find_board_walls(&origin, bounds, false)?;
        match self.mode {
            ShellMode::Basic => {
                let h_min = origin.apply(Vec3::new(bounds.min_x, bounds.min_y, 0.0));
                let h_max = origin.apply(Vec3::new(bounds.max_x, bounds.min_y, 0.0));
                let ind = wall.floor() as isize;
                let left = wall_x_to_y(self.walls, h_min.x, ind, -1, -1.0, |w| w.bo);
                let right = wall_x_to_y(self.walls, h_max.x, ind, 1, 1.0, |w| w.bo);
                let (Some(left), Some(right)) = (left, right) else {
                    return Ok(f64::INFINITY);
                };
                error += 10.0 * (left.y - h_min.y).powi(2);
                error += 10.0 * (right.y - h_max.y).powi(2);
            }
            ShellMode::Stilts => {
                let lowered = self.with_floor(Vec3::Z, -100.0);
                if let Ok(tip) = lowered.connector_tippage(&origin, board, screws) {
                    if tip > MAX_TIPPAGE {
                        return Ok(TIPPING_PENALTY);
                    }
                }
            }
            ShellMode::Tilt { .. } | ShellMode::Block => {}
        }
        Ok(error)
    }

    fn connector_tippage(&self, origin: &Frame, board: &BoardConfig, screws: &ScrewConfig) -> ShellResult<f64> {
        let indices = self.board_indices(origin, &board.bounds)?;
        let ctx = HolderContext {
            board: Some(indices),
            holder: Some(holder_at(&board.bounds, origin.origin())),
            connector: Some(origin.origin()),
        };
        let placed = self.screw_indices(screws, Some(board), &ctx)?;
        Ok(self.max_tip(&placed))
    }

    /// Wall index for the connector: the best integer wall in the back half
    /// of the ring, refined in tenths and rounded to hundredths.
    pub fn connector_index(&self, board: &BoardConfig, screws: &ScrewConfig) -> ShellResult<f64> {
        let ys: Vec<f64> = self.walls.iter().map(|w| w.bo.origin().y).collect();
        let min_y = ys.iter().copied().fold(f64::INFINITY, f64::min);
        let max_y = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mid_y = (min_y + max_y) / 2.0;
        let n = self.walls.len() as f64;

        let error_at = |wall: f64| {
            self.connector_error(wall, board, screws).unwrap_or_else(|e| {
                debug!(wall, error = %e, "connector candidate rejected");
                f64::INFINITY
            })
        };

        let mut best_wall = 0.0;
        let mut best_error = f64::INFINITY;
        for (i, w) in self.walls.iter().enumerate() {
            if w.bi.origin().y < mid_y {
                continue;
            }
            let e = error_at(i as f64);
            if e < best_error {
                best_error = e;
                best_wall = i as f64;
            }
        }
        if !best_error.is_finite() {
            return Err(ShellError::unplaceable(
                AttachmentKind::Connector,
                "no wall in the back half of the case leaves room for the holder",
            ));
        }

        let mut refined_wall = best_wall;
        let mut refined_error = best_error;
        for step in -REFINE_STEPS..=REFINE_STEPS {
            if step == 0 {
                continue;
            }
            let wall = (best_wall + step as f64 / 10.0 + n) % n;
            let e = error_at(wall);
            if e < refined_error {
                refined_error = e;
                refined_wall = wall;
            }
        }
        if refined_error < best_error {
            Ok((refined_wall * 100.0).round() / 100.0)
        } else {
            Ok(best_wall)
        }
    }

    fn place_connector(&self, board: &BoardConfig, screws: &ScrewConfig) -> ShellResult<Placement> {
        let index = match board.connector_index {
            Some(i) => i,
            None => self.connector_index(board, screws)?,
        };
        let frame = self.origin_for_connector(index, &board.bounds)?;
        Ok(Placement { index, frame })
    }

    fn board_placements(&self, indices: &BoardIndices) -> ShellResult<Vec<BoardPlacement>> {
        indices
            .mounts()
            .into_iter()
            .map(|(mount, index)| {
                Ok(BoardPlacement {
                    mount,
                    index,
                    frame: self.position_frame(index)?,
                })
            })
            .collect()
    }
}

// ── Scoring ─────────────────────────────────────────────────

struct Scoring<'r, 'a> {
    ring: &'r WallRing<'a>,
    ki_max: f64,
    insert_height: f64,
    min_displacement: f64,
    min_holder_disp: f64,
    board: Option<BoardIndices>,
    holder: Option<HolderBounds>,
    connector: Option<Vec3>,
}

impl Scoring<'_, '_> {
    fn distance(&self, a: Vec3, b: Vec3) -> f64 {
        self.ring.clearance_distance(a, b)
    }

    fn blocked(&self, s: f64, others: &[f64]) -> bool {
        let ring = self.ring;
        if ring.height_at(s) < self.insert_height {
            return true;
        }
        let pos = ring.screw_origin(s);
        if others
            .iter()
            .any(|&o| self.distance(ring.screw_origin(o), pos) < self.min_displacement)
        {
            return true;
        }
        if let Some(c) = self.connector {
            if self.distance(c, pos) < self.min_displacement {
                return true;
            }
        }
        let r = ring.dims.holder_outer_radius();
        if let Some(board) = self.board {
            let min_board = (self.min_displacement / 2.0 + r).max(self.min_displacement);
            if board
                .mounts()
                .iter()
                .any(|&(_, b)| self.distance(ring.screw_origin(b), pos) < min_board)
            {
                return true;
            }
        }
        if let Some(bnd) = self.holder {
            let (min_y, max_y) = match self.board {
                Some(b) => (
                    (ring.screw_origin(b.bottom_left).y - r).min(bnd.min_y),
                    (ring.screw_origin(b.top_left).y + r)
                        .max(ring.screw_origin(b.top_right).y + r)
                        .max(bnd.max_y),
                ),
                None => (bnd.min_y, bnd.max_y),
            };
            let margin = if ring.is_stilts() {
                self.min_holder_disp
            } else {
                self.min_displacement
            };
            if pos.y + margin / 2.0 > min_y
                && pos.y - margin / 2.0 < max_y
                && pos.x + margin > bnd.min_x
                && pos.x - margin < bnd.max_x
            {
                return true;
            }
        }
        false
    }

    fn score(&self, s: f64, others: &[f64]) -> f64 {
        if self.blocked(s, others) {
            return f64::NEG_INFINITY;
        }
        if self.ring.is_stilts() {
            self.tippage_score(s, others)
        } else {
            self.spread_score(s, others)
        }
    }

    /// Favours tall walls far around the ring from every placed screw.
    fn spread_score(&self, s: f64, others: &[f64]) -> f64 {
        let n = self.ring.len() as f64;
        let nearest = others
            .iter()
            .map(|&o| {
                let diff = (o - s).abs();
                diff.min(n - diff) / n
            })
            .fold(f64::INFINITY, f64::min);
        let height = if self.ki_max > 0.0 {
            (self.ring.height_at(s).max(0.0) / self.ki_max).sqrt()
        } else {
            0.0
        };
        10.0 * nearest.sqrt() + height
    }

    /// Favours the wall that tips furthest when pressed, so the next
    /// support goes where it is needed most.
    fn tippage_score(&self, s: f64, others: &[f64]) -> f64 {
        let ring = self.ring;
        let pos = ring.screw_origin(s);
        match others {
            [] => pos.distance_to(&ring.centroid()),
            [first] => ring.screw_origin(*first).distance_to(&pos) + 5.0 * pos.distance_to(&ring.centroid()),
            _ => {
                let origins: Vec<Vec3> = others.iter().map(|&o| ring.screw_origin(o)).collect();
                let pressed = ring.lerp(s, |w| w.bo);
                let min = tipping_lines(&origins, pressed)
                    .iter()
                    .map(|t| t.tippage)
                    .fold(f64::INFINITY, f64::min);
                if min.is_finite() { min } else { 0.0 }
            }
        }
    }
}

// ── Entry point ─────────────────────────────────────────────

/// Place the connector, holder mounts and screw inserts on a finished ring.
#[instrument(skip_all, fields(walls = walls.len(), mode = ?config.mode))]
pub fn place_attachments(config: &ShellConfig, walls: &[WallCrossSection], floor: &Floor) -> AttachmentLayout {
    let dims = InsertDimensions::for_config(&config.screws);
    let ring = match WallRing::new(walls, dims, config.mode, floor) {
        Ok(ring) => ring,
        Err(e) => return AttachmentLayout::failed(config, e),
    };

    let connector = config
        .board
        .as_ref()
        .map(|board| ring.place_connector(board, &config.screws));
    let origin = match &connector {
        Some(Ok(p)) => Some(p.frame),
        _ => None,
    };

    let min_clearance = config.screws.min_clearance.unwrap_or(dims.min_spacing());
    let board_indices = config.board.as_ref().map(|board| match origin {
        Some(o) => ring
            .board_indices(&o, &board.bounds)
            .and_then(|b| ring.check_mount_clearance(b, min_clearance)),
        None => Err(ShellError::unplaceable(
            AttachmentKind::Board,
            "no connector to align the holder with",
        )),
    });

    let ctx = HolderContext {
        board: board_indices.as_ref().and_then(|r| r.as_ref().ok()).copied(),
        holder: match (origin, config.board.as_ref()) {
            (Some(o), Some(b)) => Some(holder_at(&b.bounds, o.origin())),
            _ => None,
        },
        connector: origin.map(|o| o.origin()),
    };
    let screws = ring
        .screw_indices(&config.screws, config.board.as_ref(), &ctx)
        .and_then(|indices| {
            indices
                .into_iter()
                .map(|index| {
                    Ok(Placement {
                        index,
                        frame: ring.screw_frame(index)?,
                    })
                })
                .collect::<ShellResult<Vec<_>>>()
        });
    let board = board_indices.map(|r| r.and_then(|b| ring.board_placements(&b)));

    let layout = AttachmentLayout {
        connector,
        board,
        screws,
    };
    for e in layout.errors() {
        warn!(error = %e, "attachment not placed");
    }
    info!(
        screws = layout.screw_placements().len(),
        connector = matches!(layout.connector, Some(Ok(_))),
        board = matches!(layout.board, Some(Ok(_))),
        "attachments placed"
    );
    layout
}

//! Floor plane computation.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::attachment::InsertDimensions;
use crate::config::{ShellConfig, ShellMode};
use crate::error::{ShellError, ShellResult};
use crate::footprint::{Key, web_thickness};
use crate::geometry::{Frame, Vec2, Vec3};
use crate::triangulation::{Triangulation, delaunay};

/// The plane the walls stand on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Floor {
    /// Height of the floor measured along `world_z`.
    pub bottom_z: f64,
    /// Lowest X, used by block shells.
    pub bottom_x: f64,
    /// Floor normal.
    pub world_z: Vec3,
}

impl Floor {
    pub fn flat(bottom_z: f64) -> Self {
        Self {
            bottom_z,
            bottom_x: 0.0,
            world_z: Vec3::Z,
        }
    }

    /// Floor tilted about the Y axis.
    pub fn tilted(tilt_deg: f64, bottom_z: f64) -> Self {
        let t = tilt_deg.to_radians();
        Self {
            bottom_z,
            bottom_x: 0.0,
            world_z: Vec3::new(t.sin(), 0.0, t.cos()),
        }
    }

    pub fn tilt_deg(&self) -> f64 {
        self.world_z.x.atan2(self.world_z.z).to_degrees()
    }

    /// X axis of the frames placed on the floor: world Y with its
    /// `world_z` component removed.
    pub fn frame_x(&self) -> Vec3 {
        (Vec3::Y - self.world_z * self.world_z.y).normalize()
    }

    /// Height of `p` above the floor.
    pub fn height_of(&self, p: Vec3) -> f64 {
        p.dot(&self.world_z) - self.bottom_z
    }
}

/// Lowest point of the layout along `normal`: part bottoms and the web
/// bottom outline widened by half the wall thickness.
pub fn lowest_along(config: &ShellConfig, keys: &[Key], holes: &[Frame], normal: Vec3) -> ShellResult<f64> {
    let mut lowest = f64::INFINITY;
    for (key, hole) in keys.iter().zip(holes) {
        let web_bottom = hole.pretranslated(0.0, 0.0, -web_thickness(&config.web, key));
        let parts = key.part_bottom_points(hole).into_iter();
        let web = key
            .critical_points(&web_bottom, config.wall.thickness / 2.0)
            .into_iter()
            .map(|f| f.origin());
        for p in parts.chain(web) {
            lowest = lowest.min(p.dot(&normal));
        }
    }
    if !lowest.is_finite() {
        return Err(ShellError::degenerate("no keys to place a floor under"));
    }
    Ok(lowest)
}

/// Extra drop so that three quarters of the convex boundary's wall
/// segments are tall enough for a screw insert.
fn screw_clearance(
    config: &ShellConfig,
    keys: &[Key],
    flat_points: &[Vec2],
    polys: &[Vec<Frame>],
    adjustment: f64,
) -> ShellResult<f64> {
    let tris = delaunay::triangulate(flat_points, &[])?;
    let mesh = Triangulation::from_triangles(flat_points.to_vec(), &tris);
    let boundary = mesh.boundary()?;

    let owners: Vec<(usize, &Frame)> = polys
        .iter()
        .enumerate()
        .flat_map(|(k, poly)| poly.iter().map(move |f| (k, f)))
        .collect();
    let boundary_z: Vec<f64> = boundary
        .iter()
        .filter_map(|&b| owners.get(b))
        .map(|&(k, f)| f.pretranslated(0.0, 0.0, -web_thickness(&config.web, &keys[k])).origin().z + adjustment)
        .collect();
    if boundary_z.is_empty() {
        return Ok(0.0);
    }
    let n = boundary_z.len();
    let mut mids: Vec<f64> = (0..n)
        .map(|i| (boundary_z[i] + boundary_z[(i + 1) % n]) / 2.0)
        .collect();
    mids.sort_by(|a, b| b.total_cmp(a));
    let p75 = mids[((n - 1) as f64 * 0.75).round() as usize];

    let insert_height = InsertDimensions::for_config(&config.screws).clearance_height();
    if p75 < insert_height {
        debug!(p75, insert_height, "lowering floor for screw inserts");
        Ok(insert_height - p75)
    } else {
        Ok(0.0)
    }
}

/// Place the floor for the configured mode.
///
/// `holes` are the 3D key placements, `polys` their corner outlines and
/// `flat_points` the flattened corners used for triangulation.
pub fn compute_floor(
    config: &ShellConfig,
    keys: &[Key],
    holes: &[Frame],
    polys: &[Vec<Frame>],
    flat_points: &[Vec2],
) -> ShellResult<Floor> {
    let clearance = config.floor.vertical_clearance;
    let floor = match config.mode {
        ShellMode::Tilt { tilt_deg } => {
            let mut floor = Floor::tilted(tilt_deg, 0.0);
            floor.bottom_z = lowest_along(config, keys, holes, floor.world_z)? - clearance;
            floor
        }
        ShellMode::Basic | ShellMode::Stilts | ShellMode::Block => {
            let z = lowest_along(config, keys, holes, Vec3::Z)?;
            let mut adjustment = -z;
            if config.floor.clear_screws && !config.screws.indices.is_empty() && config.mode != ShellMode::Block {
                adjustment += screw_clearance(config, keys, flat_points, polys, adjustment)?;
            }
            let mut floor = Floor::flat(-(adjustment + clearance));
            if config.mode == ShellMode::Block {
                floor.bottom_x = lowest_along(config, keys, holes, Vec3::X)?;
            }
            floor
        }
    };
    debug!(bottom_z = floor.bottom_z, bottom_x = floor.bottom_x, "floor placed");
    Ok(floor)
}

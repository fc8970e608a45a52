//! Global shell parameters consumed by every pipeline stage.

use serde::{Deserialize, Serialize};

use crate::Tolerance;
use crate::error::{ShellError, ShellResult};

/// Height of the bottom plate below the floor (mm).
pub const PLATE_HEIGHT: f64 = 3.0;

/// How the shell meets the ground.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShellMode {
    /// Walls drop straight to a flat floor.
    #[default]
    Basic,
    /// Short walls that hang below the keys; the shell rests on point supports.
    Stilts,
    /// Flat floor tilted about the Y axis by `tilt_deg` degrees.
    Tilt { tilt_deg: f64 },
    /// Walls end on a plane perpendicular to +X.
    Block,
}

impl ShellMode {
    pub fn is_stilts(&self) -> bool {
        matches!(self, ShellMode::Stilts)
    }
}

/// Wall cross-section parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WallConfig {
    /// Horizontal wall thickness.
    pub thickness: f64,
    /// Extra wall height above the key tops. Values ≤ 1e-6 disable shrouding.
    pub shrouding: f64,
    /// Outward offset of the mid points. Ignored for stilts.
    pub xy_offset: f64,
    /// Drop from the top points to the mid points.
    pub z_offset: f64,
    /// Scale the outward offset by the bisector's alignment with the key axes.
    pub rounded_sides: bool,
}

impl Default for WallConfig {
    fn default() -> Self {
        Self {
            thickness: 4.0,
            shrouding: 0.0,
            xy_offset: 5.0,
            z_offset: 15.0,
            rounded_sides: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WebConfig {
    /// Web thickness below each key top. Zero uses the socket depth.
    pub thickness: f64,
    /// Fraction of the web thickness that thickening must reach.
    pub min_thickness_factor: f64,
    /// Run web thickening.
    pub thicken: bool,
    /// Flip web edges whose opposite angles sum past a half turn after thickening.
    #[serde(default)]
    pub flip_edges: bool,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            thickness: 0.0,
            min_thickness_factor: 0.8,
            thicken: true,
            flip_edges: false,
        }
    }
}

/// Concave hull carving parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HullConfig {
    /// Relative concavity; larger values give simpler hulls.
    pub concavity: f64,
    /// Edges shorter than this are only cut when their triangle is thin.
    pub length_threshold: Option<f64>,
    /// Reject cuts that make neighbouring walls intersect.
    pub reject_bad_walls: bool,
    /// Use every key polygon edge as a triangulation constraint.
    pub constrain_keys: bool,
    /// Drop triangles whose three vertices belong to the same key.
    pub drop_key_triangles: bool,
    /// Skip carving entirely and keep the convex boundary.
    pub no_cut: bool,
    /// Reject cuts that would leave another key's bottom point outside the hull.
    pub guard_bottom_points: bool,
    /// Depth limit of the wall-repair search.
    pub max_backtrack_depth: usize,
    /// Wall checks one repair search may spend.
    pub wall_check_budget: usize,
}

impl Default for HullConfig {
    fn default() -> Self {
        Self {
            concavity: 1.5,
            length_threshold: None,
            reject_bad_walls: true,
            constrain_keys: true,
            drop_key_triangles: true,
            no_cut: false,
            guard_bottom_points: false,
            max_backtrack_depth: 8,
            wall_check_budget: 512,
        }
    }
}

impl HullConfig {
    /// Length threshold used when none is configured: 40 mm with rounded
    /// sides, otherwise none.
    pub fn effective_length_threshold(&self, rounded_sides: bool) -> f64 {
        match self.length_threshold {
            Some(t) => t,
            None if rounded_sides => 40.0,
            None => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloorConfig {
    /// Gap left between the lowest part and the floor.
    pub vertical_clearance: f64,
    /// Lower the floor so most wall segments fit a screw insert.
    pub clear_screws: bool,
}

impl Default for FloorConfig {
    fn default() -> Self {
        Self {
            vertical_clearance: 0.1,
            clear_screws: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlattenConfig {
    /// Roll and pitch kept when projecting keys into the layout plane (degrees).
    pub max_tilt_deg: f64,
    /// Push overlapping 2D footprints apart before triangulating.
    pub separate_sockets: bool,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            max_tilt_deg: 0.0,
            separate_sockets: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScrewSize {
    #[default]
    M3,
    M4,
    /// #4-40
    No4_40,
    /// #6-32
    No6_32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ScrewMount {
    #[default]
    Insert,
    TaperedInsert,
    ExpandingInsert,
    TappedHole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrewConfig {
    pub size: ScrewSize,
    pub mount: ScrewMount,
    /// Fractional wall indices. `-1` asks for automatic placement.
    pub indices: Vec<f64>,
    /// Minimum distance between screw centres. Defaults to the insert's outer diameter.
    pub min_clearance: Option<f64>,
}

impl Default for ScrewConfig {
    fn default() -> Self {
        Self {
            size: ScrewSize::M3,
            mount: ScrewMount::Insert,
            indices: vec![-1.0; 4],
            min_clearance: None,
        }
    }
}

/// Footprint of the microcontroller holder, relative to the connector origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HolderBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl Default for HolderBounds {
    fn default() -> Self {
        // 21 x 51 board plus the 2 mm alignment stopper.
        Self {
            min_x: -10.5,
            max_x: 10.5,
            min_y: -53.0,
            max_y: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub bounds: HolderBounds,
    /// Fractional wall index of the connector. `None` searches for one.
    pub connector_index: Option<f64>,
    /// The top-left holder mount also fastens the case.
    pub top_left_is_screw: bool,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            bounds: HolderBounds::default(),
            connector_index: None,
            top_left_is_screw: true,
        }
    }
}

/// Complete shell configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub mode: ShellMode,
    pub wall: WallConfig,
    pub web: WebConfig,
    pub hull: HullConfig,
    pub floor: FloorConfig,
    pub flatten: FlattenConfig,
    pub screws: ScrewConfig,
    pub board: Option<BoardConfig>,
    pub tolerance: Tolerance,
}

impl ShellConfig {
    pub fn basic() -> Self {
        Self::default()
    }

    pub fn stilts() -> Self {
        Self {
            mode: ShellMode::Stilts,
            ..Self::default()
        }
    }

    pub fn tilted(tilt_deg: f64) -> Self {
        Self {
            mode: ShellMode::Tilt { tilt_deg },
            ..Self::default()
        }
    }

    pub fn block() -> Self {
        Self {
            mode: ShellMode::Block,
            screws: ScrewConfig {
                indices: Vec::new(),
                ..ScrewConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn from_json(json: &str) -> ShellResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> ShellResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Outward offset of the wall mid points for this mode.
    pub fn wall_xy_offset(&self) -> f64 {
        if self.mode.is_stilts() { 0.0 } else { self.wall.xy_offset }
    }

    pub fn has_shroud(&self) -> bool {
        self.wall.shrouding > 1e-6
    }

    /// Reject values no stage can work with.
    pub fn validate(&self) -> ShellResult<()> {
        if !(self.wall.thickness > 0.0) {
            return Err(ShellError::degenerate("wall thickness must be positive"));
        }
        if !(self.wall.z_offset > 0.0) {
            return Err(ShellError::degenerate("wall z offset must be positive"));
        }
        if self.hull.concavity.is_nan() {
            return Err(ShellError::degenerate("concavity is not a number"));
        }
        if self.web.thickness < 0.0 {
            return Err(ShellError::degenerate("web thickness cannot be negative"));
        }
        Ok(())
    }
}
